use serde::{Deserialize, Serialize};

/// Value ranges for simulated readings, used when no physical peripheral is
/// available. Each range is inclusive `(min, max)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    pub heart_rate_bpm: (u16, u16),
    pub step_count: (u32, u32),
    pub battery_percent: (u8, u8),
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            heart_rate_bpm: (60, 100),
            step_count: (5000, 6000),
            battery_percent: (70, 100),
        }
    }
}
