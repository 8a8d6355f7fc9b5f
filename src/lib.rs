//! Health device bridge library
//! Discovers BLE health peripherals, manages the single active connection,
//! and streams decoded readings to the application through one observable
//! snapshot.

// Module declarations
pub mod config;
pub mod core;
pub mod error;
pub mod logging;
pub mod state;

// The public surface consumed by UI/application code
pub use crate::config::BridgeConfig;
pub use crate::core::bluetooth::{
    AdapterSession, Advertisement, BluetoothManager, Capability, CapabilityGate, ConnectionState,
    DeviceId, DiscoveredDevice, HostCapabilityGate, PeripheralLink, RadioBackend, RadioState,
    ReadingUpdate, RealTimeReading,
};
pub use crate::error::{
    BridgeError, CapabilityError, ConnectionError, RadioError, ScanError, SubscriptionError,
};
pub use crate::state::{BluetoothState, HealthMetricRecord, MetricType, UserIdentity};
