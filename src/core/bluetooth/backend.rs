//! Platform seam between the connectivity core and the radio stack.
//!
//! The coordination loop, scanner, connection machine, and monitor only ever
//! talk to these traits. The production implementation is the bluest-backed
//! [`AdapterSession`]; tests substitute scripted fakes so the whole facade
//! runs without a radio.
//!
//! [`AdapterSession`]: crate::core::bluetooth::session::AdapterSession

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::core::bluetooth::types::{DeviceId, RadioState};
use crate::error::{ConnectionError, ScanError, SubscriptionError};

/// One advertisement frame as seen by the scanner.
#[derive(Debug, Clone)]
pub struct Advertisement {
    pub id: DeviceId,
    /// Local name, when the peripheral advertises one
    pub name: Option<String>,
    /// Signal strength in dBm, when the platform reports it
    pub rssi: Option<i16>,
    /// Service UUIDs carried in the advertisement
    pub services: Vec<Uuid>,
}

/// Handle to the host radio.
#[async_trait]
pub trait RadioBackend: Send + Sync + 'static {
    /// Current radio power state.
    fn radio_state(&self) -> RadioState;

    /// Infinite sequence of radio power-state transitions; re-subscribe to
    /// restart observation.
    fn radio_events(&self) -> watch::Receiver<RadioState>;

    /// Starts a platform scan filtered to the given services and returns the
    /// advertisement channel. Cancelling the token releases the platform
    /// scan; the channel closes once it is released.
    async fn start_scan(
        &self,
        services: Vec<Uuid>,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<Advertisement>, ScanError>;

    /// Establishes a link to a peripheral seen in the current or a previous
    /// scan session.
    async fn connect(&self, id: &DeviceId) -> Result<Arc<dyn PeripheralLink>, ConnectionError>;
}

/// An established link to one peripheral.
#[async_trait]
pub trait PeripheralLink: Send + Sync + 'static {
    fn id(&self) -> DeviceId;

    /// Runs GATT service discovery and returns the service UUIDs present.
    async fn discover_services(&self) -> Result<Vec<Uuid>, ConnectionError>;

    /// Subscribes to a notifying characteristic; the channel carries raw
    /// payloads and closes when the subscription ends.
    async fn subscribe(
        &self,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<mpsc::Receiver<Vec<u8>>, SubscriptionError>;

    /// Reads a characteristic value once.
    async fn read(&self, service: Uuid, characteristic: Uuid)
        -> Result<Vec<u8>, SubscriptionError>;

    /// Resolves when the transport drops the link out-of-band (peripheral
    /// out of range or powered off).
    async fn link_lost(&self);

    /// Tears the link down. Idempotent at the transport level.
    async fn disconnect(&self) -> Result<(), ConnectionError>;
}
