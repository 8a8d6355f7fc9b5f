use serde::{Deserialize, Serialize};

use crate::core::bluetooth::constants::{DEFAULT_SCAN_TIMEOUT_SECS, MIN_RSSI_THRESHOLD};

/// Tuning for device discovery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Wall-clock bound on a scan session in seconds
    pub timeout_secs: u64,

    /// Advertisements weaker than this are ignored (dBm). Advertisements
    /// without a reported signal strength are kept.
    pub min_rssi: i16,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_SCAN_TIMEOUT_SECS,
            min_rssi: MIN_RSSI_THRESHOLD,
        }
    }
}
