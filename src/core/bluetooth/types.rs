//! Defines shared data structures for the Bluetooth module.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Opaque platform identifier for a peripheral (MAC address on most
/// platforms, a CoreBluetooth UUID on macOS/iOS).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

/// Represents a discovered Bluetooth device
///
/// Created from the first advertisement seen during a scan session; later
/// advertisements for the same id are ignored for the rest of the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscoveredDevice {
    /// Platform-specific unique identifier for the device
    pub id: DeviceId,
    /// The advertised name of the device
    pub name: String,
    /// The signal strength (RSSI) of the device in dBm
    pub rssi: i16,
    /// Service UUIDs carried in the advertisement
    pub services: BTreeSet<Uuid>,
    /// Whether this device is the currently connected peripheral
    pub is_connected: bool,
}

impl DiscoveredDevice {
    pub fn new(id: DeviceId, name: String, rssi: i16, services: BTreeSet<Uuid>) -> Self {
        Self {
            id,
            name,
            rssi,
            services,
            is_connected: false,
        }
    }
}

/// Power state of the host radio, owned by the adapter session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RadioState {
    Unknown,
    Unsupported,
    PoweredOff,
    PoweredOn,
    Unauthorized,
}

/// Lifecycle of the single active peripheral.
///
/// Owned exclusively by the connection state machine; everything else reads
/// it through the published snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ConnectionState {
    Disconnected,
    Connecting(DeviceId),
    Discovering(DeviceId),
    Subscribing(DeviceId),
    Connected(DeviceId),
    Disconnecting(DeviceId),
}

impl ConnectionState {
    /// The peripheral this state refers to, if any.
    pub fn device_id(&self) -> Option<&DeviceId> {
        match self {
            Self::Disconnected => None,
            Self::Connecting(id)
            | Self::Discovering(id)
            | Self::Subscribing(id)
            | Self::Connected(id)
            | Self::Disconnecting(id) => Some(id),
        }
    }

    pub fn is_disconnected(&self) -> bool {
        matches!(self, Self::Disconnected)
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected(_))
    }
}

/// A single decoded characteristic value on its way to the shared reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadingUpdate {
    HeartRate(u16),
    StepCount(u32),
    Battery(u8),
}

/// Latest decoded values from the connected peripheral.
///
/// Fields update independently; a new heart-rate frame never clears the
/// battery level. Only a disconnect wipes the whole structure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RealTimeReading {
    pub heart_rate_bpm: Option<u16>,
    pub step_count: Option<u32>,
    pub battery_percent: Option<u8>,
    /// When the most recent field was decoded (not when it was advertised)
    pub observed_at: Option<DateTime<Utc>>,
}

impl RealTimeReading {
    pub fn apply(&mut self, update: ReadingUpdate, observed_at: DateTime<Utc>) {
        match update {
            ReadingUpdate::HeartRate(bpm) => self.heart_rate_bpm = Some(bpm),
            ReadingUpdate::StepCount(steps) => self.step_count = Some(steps),
            ReadingUpdate::Battery(percent) => self.battery_percent = Some(percent),
        }
        self.observed_at = Some(observed_at);
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}
