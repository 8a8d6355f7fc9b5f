//! Typed error taxonomy for the connectivity manager.
//!
//! Every variant is recoverable from the caller's perspective: failures are
//! recorded in the facade's last-error slot and the affected state machine
//! falls back to its pre-attempt state. All types are cloneable and
//! serializable so they can travel inside the published snapshot.

use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::core::bluetooth::types::{DeviceId, RadioState};

/// Host platform or permission problems surfaced by the capability gate.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
pub enum CapabilityError {
    #[error("bluetooth is not supported on this host ({platform})")]
    Unsupported { platform: String },
    #[error("bluetooth permissions were denied: {reason}")]
    PermissionDenied { reason: String },
    #[error("no authenticated user; sign in before using device connectivity")]
    SignedOut,
}

/// Radio power/authorization problems.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
pub enum RadioError {
    #[error("bluetooth radio is powered off")]
    PoweredOff,
    #[error("bluetooth radio access is unauthorized")]
    Unauthorized,
    #[error("bluetooth radio is not ready ({state:?})")]
    NotReady { state: RadioState },
}

impl RadioError {
    /// Maps a non-`PoweredOn` radio state to the matching error.
    pub fn from_state(state: RadioState) -> Self {
        match state {
            RadioState::PoweredOff => Self::PoweredOff,
            RadioState::Unauthorized => Self::Unauthorized,
            other => Self::NotReady { state: other },
        }
    }
}

/// Transport-level scan failures.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
pub enum ScanError {
    #[error("scan failed: {reason}")]
    Transport { reason: String },
}

/// Failures while establishing or tearing down the single active connection.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
pub enum ConnectionError {
    #[error("another peripheral is already connected or connecting")]
    AlreadyConnectedOrConnecting,
    #[error("device {0} was not seen in the current scan session")]
    UnknownDevice(DeviceId),
    #[error("connection attempt timed out after {seconds}s")]
    Timeout { seconds: u64 },
    #[error("the transport rejected the connection: {reason}")]
    Transport { reason: String },
    #[error("service discovery failed: {reason}")]
    ServiceDiscovery { reason: String },
}

/// Failures subscribing to or reading an individual characteristic.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
pub enum SubscriptionError {
    #[error("characteristic {uuid} is not present on the peripheral")]
    CharacteristicMissing { uuid: Uuid },
    #[error("notify setup for {uuid} failed: {reason}")]
    NotifySetup { uuid: Uuid, reason: String },
    #[error("read of {uuid} failed: {reason}")]
    Read { uuid: Uuid, reason: String },
}

/// The union recorded in [`BluetoothState::last_error`].
///
/// [`BluetoothState::last_error`]: crate::state::BluetoothState
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
pub enum BridgeError {
    #[error(transparent)]
    Capability(#[from] CapabilityError),
    #[error(transparent)]
    Radio(#[from] RadioError),
    #[error(transparent)]
    Scan(#[from] ScanError),
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error(transparent)]
    Subscription(#[from] SubscriptionError),
}
