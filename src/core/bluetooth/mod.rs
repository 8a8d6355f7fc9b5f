//! Bluetooth functionality for the health device bridge
//! This module handles all bluetooth operations including scanning,
//! connecting, and decoding readings from health peripherals.

pub mod backend;
pub mod capability;
pub mod constants;
pub mod decoder;
pub mod manager;
pub mod session;
pub mod types;

mod connection;
mod events;
mod monitor;
mod scanner;

// Re-export types that should be publicly accessible
pub use backend::{Advertisement, PeripheralLink, RadioBackend};
pub use capability::{Capability, CapabilityGate, HostCapabilityGate};
pub use manager::BluetoothManager;
pub use session::AdapterSession;
pub use types::{
    ConnectionState, DeviceId, DiscoveredDevice, RadioState, ReadingUpdate, RealTimeReading,
};
