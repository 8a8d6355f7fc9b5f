//! Integration tests for the Bluetooth manager facade, driven end to end
//! over a scripted fake backend.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch, Notify};
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use health_device_bridge::core::bluetooth::constants::{
    UUID_BATTERY_LEVEL, UUID_BATTERY_SERVICE, UUID_HEART_RATE_MEASUREMENT,
    UUID_HEART_RATE_SERVICE,
};
use health_device_bridge::{
    Advertisement, BluetoothManager, BluetoothState, BridgeConfig, BridgeError, Capability,
    CapabilityError, CapabilityGate, ConnectionError, ConnectionState, DeviceId,
    HostCapabilityGate, PeripheralLink, RadioBackend, RadioError, RadioState, ScanError,
    SubscriptionError, UserIdentity,
};

// -- Fakes -------------------------------------------------------------

struct FakeBackend {
    radio: watch::Sender<RadioState>,
    scan_starts: Mutex<u32>,
    advertisements: Mutex<Option<mpsc::Sender<Advertisement>>>,
    peripheral: Mutex<Option<Arc<FakePeripheral>>>,
}

impl FakeBackend {
    fn new(initial: RadioState) -> Arc<Self> {
        Arc::new(Self {
            radio: watch::channel(initial).0,
            scan_starts: Mutex::new(0),
            advertisements: Mutex::new(None),
            peripheral: Mutex::new(None),
        })
    }

    fn set_radio(&self, state: RadioState) {
        self.radio.send_replace(state);
    }

    fn install_peripheral(&self, peripheral: Arc<FakePeripheral>) {
        *self.peripheral.lock().unwrap() = Some(peripheral);
    }

    fn scan_starts(&self) -> u32 {
        *self.scan_starts.lock().unwrap()
    }

    async fn advertise(&self, advertisement: Advertisement) {
        let tx = self.advertisements.lock().unwrap().clone();
        if let Some(tx) = tx {
            let _ = tx.send(advertisement).await;
        }
    }
}

#[async_trait]
impl RadioBackend for FakeBackend {
    fn radio_state(&self) -> RadioState {
        *self.radio.borrow()
    }

    fn radio_events(&self) -> watch::Receiver<RadioState> {
        self.radio.subscribe()
    }

    async fn start_scan(
        &self,
        _services: Vec<Uuid>,
        _cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<Advertisement>, ScanError> {
        *self.scan_starts.lock().unwrap() += 1;
        let (tx, rx) = mpsc::channel(16);
        *self.advertisements.lock().unwrap() = Some(tx);
        Ok(rx)
    }

    async fn connect(&self, id: &DeviceId) -> Result<Arc<dyn PeripheralLink>, ConnectionError> {
        let peripheral = self.peripheral.lock().unwrap().clone();
        match peripheral {
            Some(peripheral) if peripheral.id == *id => Ok(peripheral),
            _ => Err(ConnectionError::UnknownDevice(id.clone())),
        }
    }
}

struct FakePeripheral {
    id: DeviceId,
    heart_rate_available: bool,
    battery_payload: Option<Vec<u8>>,
    heart_rate: Mutex<Option<mpsc::Sender<Vec<u8>>>>,
    lost: Notify,
}

impl FakePeripheral {
    fn new(id: &str, heart_rate_available: bool, battery_payload: Option<Vec<u8>>) -> Arc<Self> {
        Arc::new(Self {
            id: DeviceId::from(id),
            heart_rate_available,
            battery_payload,
            heart_rate: Mutex::new(None),
            lost: Notify::new(),
        })
    }

    async fn send_heart_rate(&self, payload: Vec<u8>) {
        let tx = self.heart_rate.lock().unwrap().clone();
        if let Some(tx) = tx {
            let _ = tx.send(payload).await;
        }
    }

    fn drop_link(&self) {
        self.lost.notify_one();
    }
}

#[async_trait]
impl PeripheralLink for FakePeripheral {
    fn id(&self) -> DeviceId {
        self.id.clone()
    }

    async fn discover_services(&self) -> Result<Vec<Uuid>, ConnectionError> {
        Ok(vec![UUID_HEART_RATE_SERVICE, UUID_BATTERY_SERVICE])
    }

    async fn subscribe(
        &self,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<mpsc::Receiver<Vec<u8>>, SubscriptionError> {
        if service == UUID_HEART_RATE_SERVICE
            && characteristic == UUID_HEART_RATE_MEASUREMENT
            && self.heart_rate_available
        {
            let (tx, rx) = mpsc::channel(16);
            *self.heart_rate.lock().unwrap() = Some(tx);
            return Ok(rx);
        }
        Err(SubscriptionError::CharacteristicMissing { uuid: characteristic })
    }

    async fn read(&self, service: Uuid, characteristic: Uuid) -> Result<Vec<u8>, SubscriptionError> {
        if service == UUID_BATTERY_SERVICE && characteristic == UUID_BATTERY_LEVEL {
            if let Some(payload) = &self.battery_payload {
                return Ok(payload.clone());
            }
        }
        Err(SubscriptionError::CharacteristicMissing { uuid: characteristic })
    }

    async fn link_lost(&self) {
        self.lost.notified().await;
    }

    async fn disconnect(&self) -> Result<(), ConnectionError> {
        Ok(())
    }
}

struct DenyGate;

impl CapabilityGate for DenyGate {
    fn check_capability(&self) -> Capability {
        Capability::Denied { reason: "bluetooth permission not granted".into() }
    }
}

// -- Helpers -----------------------------------------------------------

fn manager_over(backend: Arc<FakeBackend>) -> BluetoothManager {
    let identity = UserIdentity::new("tester");
    BluetoothManager::with_backend(
        Some(&identity),
        BridgeConfig::default(),
        backend,
        Arc::new(HostCapabilityGate),
    )
    .expect("manager should initialize")
}

fn advertisement(id: &str, name: &str, rssi: i16) -> Advertisement {
    Advertisement {
        id: DeviceId::from(id),
        name: Some(name.to_owned()),
        rssi: Some(rssi),
        services: vec![UUID_HEART_RATE_SERVICE],
    }
}

async fn wait_for(
    states: &mut watch::Receiver<BluetoothState>,
    predicate: impl Fn(&BluetoothState) -> bool,
) -> BluetoothState {
    timeout(Duration::from_secs(60), async {
        loop {
            {
                let snapshot = states.borrow();
                if predicate(&snapshot) {
                    return snapshot.clone();
                }
            }
            states.changed().await.expect("state channel closed");
        }
    })
    .await
    .expect("state predicate not reached in time")
}

/// Scans, advertises the peripheral, and connects to it.
async fn connect_to(
    manager: &BluetoothManager,
    backend: &FakeBackend,
    states: &mut watch::Receiver<BluetoothState>,
    id: &str,
) {
    manager.start_scan();
    wait_for(states, |s| s.scanning).await;
    backend.advertise(advertisement(id, "Pulse Strap", -55)).await;
    wait_for(states, |s| !s.devices.is_empty()).await;

    manager.connect(DeviceId::from(id));
    wait_for(states, |s| s.connection.is_connected()).await;
}

// -- Tests -------------------------------------------------------------

#[tokio::test]
async fn signed_out_cannot_initialize() {
    let backend = FakeBackend::new(RadioState::PoweredOn);
    let result = BluetoothManager::with_backend(
        None,
        BridgeConfig::default(),
        backend,
        Arc::new(HostCapabilityGate),
    );
    assert!(matches!(result, Err(CapabilityError::SignedOut)));
}

#[tokio::test]
async fn denied_gate_blocks_scanning() {
    let backend = FakeBackend::new(RadioState::PoweredOn);
    let identity = UserIdentity::new("tester");
    let manager = BluetoothManager::with_backend(
        Some(&identity),
        BridgeConfig::default(),
        backend.clone(),
        Arc::new(DenyGate),
    )
    .unwrap();
    let mut states = manager.subscribe();

    manager.start_scan();
    let state = wait_for(&mut states, |s| s.last_error.is_some()).await;
    assert!(matches!(
        state.last_error,
        Some(BridgeError::Capability(CapabilityError::PermissionDenied { .. }))
    ));
    assert!(!state.scanning);
    assert_eq!(backend.scan_starts(), 0);
}

#[tokio::test]
async fn scan_requires_powered_on_radio() {
    let backend = FakeBackend::new(RadioState::PoweredOff);
    let manager = manager_over(backend.clone());
    let mut states = manager.subscribe();

    manager.start_scan();
    let state = wait_for(&mut states, |s| s.last_error.is_some()).await;
    assert_eq!(
        state.last_error,
        Some(BridgeError::Radio(RadioError::PoweredOff))
    );
    assert!(!state.scanning);
    assert_eq!(backend.scan_starts(), 0);
}

#[tokio::test]
async fn scan_dedups_first_advertisement_wins() {
    let backend = FakeBackend::new(RadioState::PoweredOn);
    let manager = manager_over(backend.clone());
    let mut states = manager.subscribe();

    manager.start_scan();
    wait_for(&mut states, |s| s.scanning).await;

    backend.advertise(advertisement("strap-1", "Polar H10", -60)).await;
    wait_for(&mut states, |s| s.devices.len() == 1).await;

    // Same id again with a different name and stronger signal, then a new id
    backend.advertise(advertisement("strap-1", "Renamed", -30)).await;
    backend.advertise(advertisement("band-2", "Mi Band", -70)).await;
    let state = wait_for(&mut states, |s| s.devices.len() == 2).await;

    let first = state.devices.iter().find(|d| d.id.as_str() == "strap-1").unwrap();
    assert_eq!(first.name, "Polar H10");
    assert_eq!(first.rssi, -60);
}

#[tokio::test]
async fn restarting_scan_does_not_create_second_session() {
    let backend = FakeBackend::new(RadioState::PoweredOn);
    let manager = manager_over(backend.clone());
    let mut states = manager.subscribe();

    manager.start_scan();
    wait_for(&mut states, |s| s.scanning).await;
    manager.start_scan();
    sleep(Duration::from_millis(100)).await;

    assert_eq!(backend.scan_starts(), 1);
    assert!(manager.state().scanning);
}

#[tokio::test(start_paused = true)]
async fn scan_auto_stops_after_timeout() {
    let backend = FakeBackend::new(RadioState::PoweredOn);
    let manager = manager_over(backend.clone());
    let mut states = manager.subscribe();

    manager.start_scan();
    wait_for(&mut states, |s| s.scanning).await;

    // The 10-second deadline elapses without a stop command
    let state = wait_for(&mut states, |s| !s.scanning).await;
    assert!(state.last_error.is_none());
}

#[tokio::test]
async fn stop_scan_is_idempotent() {
    let backend = FakeBackend::new(RadioState::PoweredOn);
    let manager = manager_over(backend.clone());
    let mut states = manager.subscribe();

    // Stopping with no scan active is a no-op, not an error
    manager.stop_scan();
    sleep(Duration::from_millis(100)).await;
    assert!(manager.state().last_error.is_none());

    manager.start_scan();
    wait_for(&mut states, |s| s.scanning).await;
    manager.stop_scan();
    let state = wait_for(&mut states, |s| !s.scanning).await;
    assert!(state.last_error.is_none());
}

#[tokio::test]
async fn connect_reaches_connected_and_streams_readings() {
    let backend = FakeBackend::new(RadioState::PoweredOn);
    let peripheral = FakePeripheral::new("strap-1", true, Some(vec![87]));
    backend.install_peripheral(peripheral.clone());
    let manager = manager_over(backend.clone());
    let mut states = manager.subscribe();

    connect_to(&manager, &backend, &mut states, "strap-1").await;

    let state = manager.state();
    assert_eq!(state.connection, ConnectionState::Connected(DeviceId::from("strap-1")));
    assert!(state.connected_device().is_some_and(|d| d.is_connected));
    assert!(state.last_error.is_none());

    // Battery was read during subscription setup
    let state = wait_for(&mut states, |s| s.reading.battery_percent.is_some()).await;
    assert_eq!(state.reading.battery_percent, Some(87));

    // A notify frame flows through the decoder into the reading
    peripheral.send_heart_rate(vec![0x00, 72]).await;
    let state = wait_for(&mut states, |s| s.reading.heart_rate_bpm.is_some()).await;
    assert_eq!(state.reading.heart_rate_bpm, Some(72));
    assert!(state.reading.observed_at.is_some());

    // A malformed frame is swallowed, not fatal
    peripheral.send_heart_rate(vec![0x01]).await;
    peripheral.send_heart_rate(vec![0x00, 80]).await;
    let state = wait_for(&mut states, |s| s.reading.heart_rate_bpm == Some(80)).await;
    assert!(state.last_error.is_none());
}

#[tokio::test]
async fn connect_while_busy_is_rejected_without_state_change() {
    let backend = FakeBackend::new(RadioState::PoweredOn);
    let peripheral = FakePeripheral::new("strap-1", true, None);
    backend.install_peripheral(peripheral);
    let manager = manager_over(backend.clone());
    let mut states = manager.subscribe();

    connect_to(&manager, &backend, &mut states, "strap-1").await;

    manager.connect(DeviceId::from("band-2"));
    let state = wait_for(&mut states, |s| s.last_error.is_some()).await;
    assert_eq!(
        state.last_error,
        Some(BridgeError::Connection(ConnectionError::AlreadyConnectedOrConnecting))
    );
    assert_eq!(state.connection, ConnectionState::Connected(DeviceId::from("strap-1")));
}

#[tokio::test]
async fn partial_characteristic_capability_is_not_fatal() {
    let backend = FakeBackend::new(RadioState::PoweredOn);
    // Heart rate refuses to subscribe; battery reads fine
    let peripheral = FakePeripheral::new("band-2", false, Some(vec![64]));
    backend.install_peripheral(peripheral);
    let manager = manager_over(backend.clone());
    let mut states = manager.subscribe();

    connect_to(&manager, &backend, &mut states, "band-2").await;

    let state = wait_for(&mut states, |s| s.reading.battery_percent.is_some()).await;
    assert_eq!(state.reading.battery_percent, Some(64));
    assert_eq!(state.reading.heart_rate_bpm, None);
    assert!(state.connection.is_connected());
    assert!(state.last_error.is_none());
}

#[tokio::test]
async fn radio_loss_forces_disconnect_and_clears_reading() {
    let backend = FakeBackend::new(RadioState::PoweredOn);
    let peripheral = FakePeripheral::new("strap-1", true, Some(vec![90]));
    backend.install_peripheral(peripheral.clone());
    let manager = manager_over(backend.clone());
    let mut states = manager.subscribe();

    connect_to(&manager, &backend, &mut states, "strap-1").await;
    peripheral.send_heart_rate(vec![0x00, 75]).await;
    wait_for(&mut states, |s| s.reading.heart_rate_bpm.is_some()).await;

    backend.set_radio(RadioState::PoweredOff);
    let state = wait_for(&mut states, |s| s.connection.is_disconnected()).await;
    assert!(state.reading.is_empty());
    assert_eq!(state.radio, RadioState::PoweredOff);
    assert_eq!(
        state.last_error,
        Some(BridgeError::Radio(RadioError::PoweredOff))
    );
}

#[tokio::test]
async fn disconnect_while_disconnected_is_noop() {
    let backend = FakeBackend::new(RadioState::PoweredOn);
    let manager = manager_over(backend.clone());

    manager.disconnect();
    sleep(Duration::from_millis(100)).await;

    let state = manager.state();
    assert_eq!(state.connection, ConnectionState::Disconnected);
    assert!(state.last_error.is_none());
}

#[tokio::test]
async fn explicit_disconnect_clears_reading_and_mark() {
    let backend = FakeBackend::new(RadioState::PoweredOn);
    let peripheral = FakePeripheral::new("strap-1", true, Some(vec![50]));
    backend.install_peripheral(peripheral.clone());
    let manager = manager_over(backend.clone());
    let mut states = manager.subscribe();

    connect_to(&manager, &backend, &mut states, "strap-1").await;
    wait_for(&mut states, |s| s.reading.battery_percent.is_some()).await;

    manager.disconnect();
    let state = wait_for(&mut states, |s| s.connection.is_disconnected()).await;
    assert!(state.reading.is_empty());
    assert!(state.devices.iter().all(|d| !d.is_connected));
}

#[tokio::test]
async fn link_lost_folds_into_disconnected() {
    let backend = FakeBackend::new(RadioState::PoweredOn);
    let peripheral = FakePeripheral::new("strap-1", true, None);
    backend.install_peripheral(peripheral.clone());
    let manager = manager_over(backend.clone());
    let mut states = manager.subscribe();

    connect_to(&manager, &backend, &mut states, "strap-1").await;

    peripheral.drop_link();
    let state = wait_for(&mut states, |s| s.connection.is_disconnected()).await;
    assert!(state.reading.is_empty());
}

#[tokio::test]
async fn acknowledge_error_clears_slot() {
    let backend = FakeBackend::new(RadioState::PoweredOn);
    // No peripheral installed: connecting fails with UnknownDevice
    let manager = manager_over(backend.clone());
    let mut states = manager.subscribe();

    manager.connect(DeviceId::from("ghost"));
    let state = wait_for(&mut states, |s| s.last_error.is_some()).await;
    assert_eq!(
        state.last_error,
        Some(BridgeError::Connection(ConnectionError::UnknownDevice(DeviceId::from("ghost"))))
    );
    assert!(state.connection.is_disconnected());

    manager.acknowledge_error();
    wait_for(&mut states, |s| s.last_error.is_none()).await;
}

#[tokio::test]
async fn simulate_reading_uses_shared_update_path() {
    let backend = FakeBackend::new(RadioState::PoweredOn);
    let manager = manager_over(backend.clone());
    let mut states = manager.subscribe();

    manager.simulate_reading();
    let state = wait_for(&mut states, |s| !s.reading.is_empty()).await;

    let bpm = state.reading.heart_rate_bpm.unwrap();
    let steps = state.reading.step_count.unwrap();
    let battery = state.reading.battery_percent.unwrap();
    assert!((60..=100).contains(&bpm));
    assert!((5000..=6000).contains(&steps));
    assert!((70..=100).contains(&battery));
    assert!(state.reading.observed_at.is_some());
}
