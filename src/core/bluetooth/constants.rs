//! Constants used throughout the application
//! This module contains all the constant values used in the application,
//! such as UUIDs, timeouts, and other configuration values.

use uuid::Uuid;

/// Standard Bluetooth Service UUIDs
pub const UUID_HEART_RATE_SERVICE: Uuid = Uuid::from_u128(0x0000180d_0000_1000_8000_00805f9b34fb);
pub const UUID_BATTERY_SERVICE: Uuid = Uuid::from_u128(0x0000180f_0000_1000_8000_00805f9b34fb);

/// Standard Bluetooth Characteristic UUIDs
pub const UUID_HEART_RATE_MEASUREMENT: Uuid =
    Uuid::from_u128(0x00002a37_0000_1000_8000_00805f9b34fb);
pub const UUID_BATTERY_LEVEL: Uuid = Uuid::from_u128(0x00002a19_0000_1000_8000_00805f9b34fb);

/// Services a peripheral must advertise to show up in a scan
pub const HEALTH_SERVICE_FILTER: [Uuid; 2] = [UUID_HEART_RATE_SERVICE, UUID_BATTERY_SERVICE];

/// Wall-clock bound on a scan session in seconds; the scan auto-stops after this
pub const DEFAULT_SCAN_TIMEOUT_SECS: u64 = 10;

/// Timeout for a single connection attempt in seconds
pub const CONNECT_TIMEOUT_SECS: u64 = 10;

/// Advertisements weaker than this are dropped before dedup (dBm)
pub const MIN_RSSI_THRESHOLD: i16 = -90;

/// RSSI recorded for advertisements that carry no signal-strength value (dBm)
pub const UNKNOWN_RSSI_DBM: i16 = -100;

/// Interval at which an established link is checked for out-of-band loss
pub const LINK_WATCH_INTERVAL_MS: u64 = 1000;

/// Interval between radio power-state probes
pub const RADIO_PROBE_INTERVAL_MS: u64 = 2000;

/// Upper bound on a single radio power-state probe
pub const RADIO_PROBE_TIMEOUT_MS: u64 = 500;

/// Capacity of the internal event channel drained by the coordination loop
pub const EVENT_CHANNEL_CAPACITY: usize = 64;
