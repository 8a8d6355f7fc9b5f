//! Application-facing state and collaborator record shapes.
//! This module defines the snapshot published to UI/application code and the
//! record format handed to the health-metric persistence collaborator.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::core::bluetooth::types::{
    ConnectionState, DeviceId, DiscoveredDevice, RadioState, RealTimeReading,
};
use crate::error::BridgeError;

/// The one authoritative snapshot of everything Bluetooth.
///
/// Published on every transition; consumers read it, they never mutate it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BluetoothState {
    pub radio: RadioState,
    pub connection: ConnectionState,
    /// Whether a scan session is currently running
    pub scanning: bool,
    /// Devices discovered in the current scan session
    pub devices: Vec<DiscoveredDevice>,
    /// Latest decoded values from the connected peripheral
    pub reading: RealTimeReading,
    /// Most recent failure, kept until acknowledged, superseded, or cleared
    /// by a successful transition
    pub last_error: Option<BridgeError>,
}

impl Default for BluetoothState {
    fn default() -> Self {
        Self {
            radio: RadioState::Unknown,
            connection: ConnectionState::Disconnected,
            scanning: false,
            devices: Vec::new(),
            reading: RealTimeReading::default(),
            last_error: None,
        }
    }
}

impl BluetoothState {
    /// The discovered-device entry for the active peripheral, if any.
    pub fn connected_device(&self) -> Option<&DiscoveredDevice> {
        let id = self.connection.device_id()?;
        self.devices.iter().find(|device| &device.id == id)
    }

    /// Builds persistence records from the current reading, one per
    /// populated field. Empty while no peripheral is connected — simulated
    /// readings carry no source device and are never persisted.
    pub fn metric_records(&self) -> Vec<HealthMetricRecord> {
        let Some(source) = self.connection.device_id() else {
            return Vec::new();
        };
        let Some(timestamp) = self.reading.observed_at else {
            return Vec::new();
        };

        let mut records = Vec::new();
        if let Some(bpm) = self.reading.heart_rate_bpm {
            records.push(HealthMetricRecord {
                metric_type: MetricType::HeartRate,
                value: f64::from(bpm),
                timestamp,
                source_device_id: source.clone(),
            });
        }
        if let Some(steps) = self.reading.step_count {
            records.push(HealthMetricRecord {
                metric_type: MetricType::Steps,
                value: f64::from(steps),
                timestamp,
                source_device_id: source.clone(),
            });
        }
        if let Some(percent) = self.reading.battery_percent {
            records.push(HealthMetricRecord {
                metric_type: MetricType::Battery,
                value: f64::from(percent),
                timestamp,
                source_device_id: source.clone(),
            });
        }
        records
    }
}

/// Authenticated-user handle obtained from the auth collaborator.
///
/// The facade refuses to initialize without one; this crate never inspects
/// the identity beyond logging its id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserIdentity {
    user_id: String,
}

impl UserIdentity {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self { user_id: user_id.into() }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }
}

/// Kind of physiological metric a record carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MetricType {
    HeartRate,
    Steps,
    Battery,
}

/// Record shape accepted by the health-metric persistence collaborator.
/// Constructed by the UI layer from snapshots; this core never persists.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthMetricRecord {
    pub metric_type: MetricType,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
    pub source_device_id: DeviceId,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::bluetooth::types::ReadingUpdate;

    #[test]
    fn test_metric_records_cover_populated_fields_only() {
        let mut state = BluetoothState::default();
        let id = DeviceId::from("strap-1");
        state.connection = ConnectionState::Connected(id.clone());
        state.reading.apply(ReadingUpdate::HeartRate(68), Utc::now());
        state.reading.apply(ReadingUpdate::Battery(91), Utc::now());

        let records = state.metric_records();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.source_device_id == id));
        assert!(records.iter().any(|r| r.metric_type == MetricType::HeartRate && r.value == 68.0));
        assert!(!records.iter().any(|r| r.metric_type == MetricType::Steps));
    }

    #[test]
    fn test_metric_records_empty_when_disconnected() {
        let mut state = BluetoothState::default();
        state.reading.apply(ReadingUpdate::HeartRate(70), Utc::now());
        assert!(state.metric_records().is_empty());
    }
}
