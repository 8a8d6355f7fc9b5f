//! bluest-backed adapter session
//! This module owns the process-wide radio handle and implements the
//! platform seam on top of it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bluest::{Adapter, Characteristic, Device};
use futures_util::StreamExt;
use log::{debug, error, info};
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::core::bluetooth::backend::{Advertisement, PeripheralLink, RadioBackend};
use crate::core::bluetooth::constants::{
    EVENT_CHANNEL_CAPACITY, LINK_WATCH_INTERVAL_MS, RADIO_PROBE_INTERVAL_MS,
    RADIO_PROBE_TIMEOUT_MS,
};
use crate::core::bluetooth::types::{DeviceId, RadioState};
use crate::error::{CapabilityError, ConnectionError, ScanError, SubscriptionError};

/// Owns the host radio for the process lifetime.
///
/// Construct once at application start and drop at shutdown; dropping
/// releases the radio probe and every pump spawned for scans and links.
/// Failure to acquire an adapter is fatal for Bluetooth capability until the
/// application is relaunched.
pub struct AdapterSession {
    adapter: Adapter,
    /// Device handles seen while scanning, so connect-by-id can resolve them
    devices: Arc<Mutex<HashMap<DeviceId, Device>>>,
    radio: Arc<watch::Sender<RadioState>>,
    shutdown: CancellationToken,
}

impl AdapterSession {
    pub async fn new() -> Result<Self, CapabilityError> {
        let adapter = Adapter::default().await.ok_or_else(|| CapabilityError::Unsupported {
            platform: std::env::consts::OS.to_string(),
        })?;
        info!("Bluetooth adapter acquired");

        let radio = Arc::new(watch::channel(RadioState::Unknown).0);
        let shutdown = CancellationToken::new();
        tokio::spawn(probe_radio(adapter.clone(), radio.clone(), shutdown.clone()));

        Ok(Self {
            adapter,
            devices: Arc::new(Mutex::new(HashMap::new())),
            radio,
            shutdown,
        })
    }
}

impl Drop for AdapterSession {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[async_trait]
impl RadioBackend for AdapterSession {
    fn radio_state(&self) -> RadioState {
        *self.radio.borrow()
    }

    fn radio_events(&self) -> watch::Receiver<RadioState> {
        self.radio.subscribe()
    }

    async fn start_scan(
        &self,
        services: Vec<Uuid>,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<Advertisement>, ScanError> {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (ready_tx, ready_rx) = oneshot::channel();
        let adapter = self.adapter.clone();
        let devices = self.devices.clone();
        let shutdown = self.shutdown.clone();

        tokio::spawn(async move {
            let mut scan_stream = match adapter.scan(&services).await {
                Ok(stream) => {
                    let _ = ready_tx.send(Ok(()));
                    stream
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(ScanError::Transport { reason: e.to_string() }));
                    return;
                }
            };

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = shutdown.cancelled() => break,
                    found = scan_stream.next() => {
                        let Some(found) = found else {
                            info!("Bluetooth scan stream has ended");
                            break;
                        };
                        let device = found.device;
                        let id = DeviceId::new(device.id().to_string());
                        let name = found
                            .adv_data
                            .local_name
                            .clone()
                            .or_else(|| device.name().ok());
                        let advertisement = Advertisement {
                            id: id.clone(),
                            name,
                            rssi: found.rssi,
                            services: found.adv_data.services.clone(),
                        };
                        devices.lock().unwrap().insert(id, device);
                        if tx.send(advertisement).await.is_err() {
                            break;
                        }
                    }
                }
            }
            debug!("Platform scan released");
        });

        match ready_rx.await {
            Ok(Ok(())) => Ok(rx),
            Ok(Err(error)) => Err(error),
            Err(_) => Err(ScanError::Transport { reason: "scan task ended before starting".into() }),
        }
    }

    async fn connect(&self, id: &DeviceId) -> Result<Arc<dyn PeripheralLink>, ConnectionError> {
        let device = {
            let devices = self.devices.lock().unwrap();
            devices.get(id).cloned()
        }
        .ok_or_else(|| ConnectionError::UnknownDevice(id.clone()))?;

        if !device.is_connected().await {
            info!("Initiating connection to {}...", id);
            self.adapter
                .connect_device(&device)
                .await
                .map_err(|e| ConnectionError::Transport { reason: e.to_string() })?;
        }

        Ok(Arc::new(BluestLink {
            adapter: self.adapter.clone(),
            device,
            teardown: self.shutdown.child_token(),
        }))
    }
}

/// Samples adapter availability into the radio-state channel.
///
/// bluest exposes no power-state events, only `wait_available`: a probe that
/// returns promptly means the radio is on, one that pends past the timeout
/// means it is off. Errors leave the state `Unknown` rather than guessing.
async fn probe_radio(
    adapter: Adapter,
    radio: Arc<watch::Sender<RadioState>>,
    shutdown: CancellationToken,
) {
    let probe_timeout = Duration::from_millis(RADIO_PROBE_TIMEOUT_MS);
    loop {
        let state = match tokio::time::timeout(probe_timeout, adapter.wait_available()).await {
            Ok(Ok(())) => RadioState::PoweredOn,
            Ok(Err(e)) => {
                debug!("Radio probe failed: {}", e);
                RadioState::Unknown
            }
            Err(_) => RadioState::PoweredOff,
        };
        if *radio.borrow() != state {
            info!("Radio state is now {:?}", state);
            radio.send_replace(state);
        }

        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(Duration::from_millis(RADIO_PROBE_INTERVAL_MS)) => {}
        }
    }
}

/// One established bluest link.
struct BluestLink {
    adapter: Adapter,
    device: Device,
    /// Cancels this link's notification pumps on disconnect
    teardown: CancellationToken,
}

impl BluestLink {
    /// Walks the GATT tree for one characteristic. `Ok(None)` means the
    /// peripheral does not expose it, `Err` carries a transport reason.
    async fn find_characteristic(
        &self,
        service_uuid: Uuid,
        characteristic_uuid: Uuid,
    ) -> Result<Option<Characteristic>, String> {
        let services = self.device.services().await.map_err(|e| e.to_string())?;
        for service in services {
            if service.uuid() != service_uuid {
                continue;
            }
            let characteristics = service.characteristics().await.map_err(|e| e.to_string())?;
            if let Some(characteristic) = characteristics
                .into_iter()
                .find(|c| c.uuid() == characteristic_uuid)
            {
                return Ok(Some(characteristic));
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl PeripheralLink for BluestLink {
    fn id(&self) -> DeviceId {
        DeviceId::new(self.device.id().to_string())
    }

    async fn discover_services(&self) -> Result<Vec<Uuid>, ConnectionError> {
        let services = self
            .device
            .services()
            .await
            .map_err(|e| ConnectionError::ServiceDiscovery { reason: e.to_string() })?;
        Ok(services.iter().map(|service| service.uuid()).collect())
    }

    async fn subscribe(
        &self,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<mpsc::Receiver<Vec<u8>>, SubscriptionError> {
        let found = self
            .find_characteristic(service, characteristic)
            .await
            .map_err(|reason| SubscriptionError::NotifySetup { uuid: characteristic, reason })?
            .ok_or(SubscriptionError::CharacteristicMissing { uuid: characteristic })?;

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (ready_tx, ready_rx) = oneshot::channel();
        let teardown = self.teardown.clone();

        tokio::spawn(async move {
            let mut notifications = match found.notify().await {
                Ok(stream) => {
                    let _ = ready_tx.send(Ok(()));
                    stream
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(SubscriptionError::NotifySetup {
                        uuid: characteristic,
                        reason: e.to_string(),
                    }));
                    return;
                }
            };

            loop {
                tokio::select! {
                    _ = teardown.cancelled() => break,
                    value = notifications.next() => {
                        match value {
                            Some(Ok(payload)) => {
                                if tx.send(payload).await.is_err() {
                                    break;
                                }
                            }
                            Some(Err(e)) => {
                                error!("Error in notification stream: {}", e);
                                break;
                            }
                            None => break,
                        }
                    }
                }
            }
            debug!("Notification stream for {} ended", characteristic);
        });

        match ready_rx.await {
            Ok(Ok(())) => Ok(rx),
            Ok(Err(error)) => Err(error),
            Err(_) => Err(SubscriptionError::NotifySetup {
                uuid: characteristic,
                reason: "notification task ended before starting".into(),
            }),
        }
    }

    async fn read(&self, service: Uuid, characteristic: Uuid) -> Result<Vec<u8>, SubscriptionError> {
        let found = self
            .find_characteristic(service, characteristic)
            .await
            .map_err(|reason| SubscriptionError::Read { uuid: characteristic, reason })?
            .ok_or(SubscriptionError::CharacteristicMissing { uuid: characteristic })?;
        found
            .read()
            .await
            .map_err(|e| SubscriptionError::Read { uuid: characteristic, reason: e.to_string() })
    }

    async fn link_lost(&self) {
        // bluest reports no disconnect event; sample the link instead
        loop {
            tokio::time::sleep(Duration::from_millis(LINK_WATCH_INTERVAL_MS)).await;
            if !self.device.is_connected().await {
                return;
            }
        }
    }

    async fn disconnect(&self) -> Result<(), ConnectionError> {
        self.teardown.cancel();
        if self.device.is_connected().await {
            info!("Disconnecting from device {}", self.device.id());
            self.adapter
                .disconnect_device(&self.device)
                .await
                .map_err(|e| ConnectionError::Transport { reason: e.to_string() })?;
            info!("Successfully disconnected");
        } else {
            info!("Device {} not connected", self.device.id());
        }
        Ok(())
    }
}
