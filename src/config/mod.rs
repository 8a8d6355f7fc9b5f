pub mod scan_config;
pub mod simulation_config;

use std::path::Path;

use anyhow::Result;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::config::scan_config::ScanConfig;
use crate::config::simulation_config::SimulationConfig;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BridgeConfig {
    pub scan: ScanConfig,
    pub simulation: SimulationConfig,
}

impl BridgeConfig {
    /// Loads the config from a configuration file, falling back to defaults
    /// when the file does not exist.
    pub async fn load_config(path: &Path) -> Result<Self> {
        if !path.exists() {
            warn!("Config file not found at {:?}, using default.", path);
            return Ok(Self::default());
        }

        let config_json = fs::read_to_string(path).await?;
        let config: Self = serde_json::from_str(&config_json)?;

        info!("Config loaded from {:?}", path);
        Ok(config)
    }

    /// Saves the current config to a configuration file.
    pub async fn save_config(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let config_json = serde_json::to_string_pretty(self)?;
        fs::write(path, config_json).await?;

        info!("Config saved to {:?}", path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_round_trips_through_json() {
        let config = BridgeConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: BridgeConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.scan.timeout_secs, config.scan.timeout_secs);
        assert_eq!(parsed.simulation.heart_rate_bpm, config.simulation.heart_rate_bpm);
    }
}
