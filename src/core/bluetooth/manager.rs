//! Bluetooth manager for the health device bridge
//! This module provides the main interface for bluetooth operations

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use log::{debug, info, warn};
use rand::Rng;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::BridgeConfig;
use crate::core::bluetooth::backend::RadioBackend;
use crate::core::bluetooth::capability::{CapabilityGate, HostCapabilityGate};
use crate::core::bluetooth::connection::{ConnectionMachine, DisconnectOutcome};
use crate::core::bluetooth::constants::{CONNECT_TIMEOUT_SECS, EVENT_CHANNEL_CAPACITY};
use crate::core::bluetooth::events::CoreEvent;
use crate::core::bluetooth::scanner::DiscoveryController;
use crate::core::bluetooth::session::AdapterSession;
use crate::core::bluetooth::types::{ConnectionState, DeviceId, RadioState, ReadingUpdate};
use crate::error::{BridgeError, CapabilityError, RadioError};
use crate::state::{BluetoothState, UserIdentity};

/// Commands accepted by the facade. Each returns as soon as it is enqueued;
/// effects are observed through the published snapshot.
#[derive(Debug, Clone)]
enum Command {
    StartScan,
    StopScan,
    Connect(DeviceId),
    Disconnect,
    AcknowledgeError,
    SimulateReading,
}

/// The single public surface for Bluetooth operations.
///
/// All state mutation happens on one coordination task; the facade only
/// enqueues commands and hands out snapshots, so it is cheap to share and
/// never blocks on radio I/O.
pub struct BluetoothManager {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<BluetoothState>,
    cancel: CancellationToken,
    coordinator: Option<JoinHandle<()>>,
}

impl BluetoothManager {
    /// Creates a manager backed by the host radio.
    ///
    /// Requires an authenticated user; device connectivity is never offered
    /// to signed-out sessions.
    pub async fn new(
        identity: Option<&UserIdentity>,
        config: BridgeConfig,
    ) -> Result<Self, CapabilityError> {
        let gate = Arc::new(HostCapabilityGate);
        gate.check_capability().into_result()?;
        let session = AdapterSession::new().await?;
        Self::with_backend(identity, config, Arc::new(session), gate)
    }

    /// Creates a manager over an explicit backend and gate. This is how
    /// tests (and alternative platforms) construct isolated instances.
    pub fn with_backend(
        identity: Option<&UserIdentity>,
        config: BridgeConfig,
        backend: Arc<dyn RadioBackend>,
        gate: Arc<dyn CapabilityGate>,
    ) -> Result<Self, CapabilityError> {
        let identity = identity.ok_or(CapabilityError::SignedOut)?;

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (publish, state_rx) = watch::channel(BluetoothState::default());
        let cancel = CancellationToken::new();

        let discovery = DiscoveryController::new(
            backend.clone(),
            events_tx.clone(),
            Duration::from_secs(config.scan.timeout_secs),
            config.scan.min_rssi,
        );
        let connection = ConnectionMachine::new(
            backend.clone(),
            events_tx,
            Duration::from_secs(CONNECT_TIMEOUT_SECS),
        );

        let coordinator = Coordinator {
            backend,
            gate,
            config,
            state: BluetoothState::default(),
            publish,
            discovery,
            connection,
        };
        let handle = tokio::spawn(coordinator.run(commands_rx, events_rx, cancel.clone()));

        info!("Bluetooth manager ready for user {}", identity.user_id());
        Ok(Self {
            commands: commands_tx,
            state: state_rx,
            cancel,
            coordinator: Some(handle),
        })
    }

    /// Clones the current snapshot.
    pub fn state(&self) -> BluetoothState {
        self.state.borrow().clone()
    }

    /// Hands out a state-change subscription. Consumers hold the receiver
    /// and drop it to unsubscribe.
    pub fn subscribe(&self) -> watch::Receiver<BluetoothState> {
        self.state.clone()
    }

    /// Starts (or extends) a bounded scan for health peripherals.
    pub fn start_scan(&self) {
        self.send(Command::StartScan);
    }

    /// Stops the running scan. No-op when nothing is scanning.
    pub fn stop_scan(&self) {
        self.send(Command::StopScan);
    }

    /// Connects to a previously discovered peripheral.
    pub fn connect(&self, id: DeviceId) {
        self.send(Command::Connect(id));
    }

    /// Tears down the active peripheral. No-op when disconnected.
    pub fn disconnect(&self) {
        self.send(Command::Disconnect);
    }

    /// Dismisses the last recorded error.
    pub fn acknowledge_error(&self) {
        self.send(Command::AcknowledgeError);
    }

    /// Synthesizes a reading through the regular update path, for demos
    /// without a physical peripheral.
    pub fn simulate_reading(&self) {
        self.send(Command::SimulateReading);
    }

    /// Cancels the coordination loop and releases every scan, link, and
    /// subscription.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(coordinator) = self.coordinator.take() {
            let _ = coordinator.await;
        }
    }

    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            warn!("Bluetooth coordinator is gone; dropping command");
        }
    }
}

impl Drop for BluetoothManager {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// The single writer. Owns the authoritative state and folds commands,
/// component events, and radio transitions into it one at a time.
struct Coordinator {
    backend: Arc<dyn RadioBackend>,
    gate: Arc<dyn CapabilityGate>,
    config: BridgeConfig,
    state: BluetoothState,
    publish: watch::Sender<BluetoothState>,
    discovery: DiscoveryController,
    connection: ConnectionMachine,
}

impl Coordinator {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut events: mpsc::Receiver<CoreEvent>,
        cancel: CancellationToken,
    ) {
        let mut radio = self.backend.radio_events();
        let mut radio_alive = true;
        self.state.radio = self.backend.radio_state();
        self.publish_if_changed();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    self.teardown();
                    break;
                }
                Some(command) = commands.recv() => {
                    self.handle_command(command).await;
                }
                Some(event) = events.recv() => {
                    self.handle_event(event);
                }
                changed = radio.changed(), if radio_alive => {
                    match changed {
                        Ok(()) => {
                            let state = *radio.borrow_and_update();
                            self.handle_radio(state);
                        }
                        Err(_) => radio_alive = false,
                    }
                }
            }
            self.publish_if_changed();
        }
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::StartScan => self.handle_start_scan().await,
            Command::StopScan => self.discovery.stop(),
            Command::Connect(id) => self.handle_connect(id),
            Command::Disconnect => self.handle_disconnect(),
            Command::AcknowledgeError => {
                self.state.last_error = None;
            }
            Command::SimulateReading => self.simulate_reading(),
        }
    }

    async fn handle_start_scan(&mut self) {
        if let Err(error) = self.gate.check_capability().into_result() {
            self.record_error(error.into());
            return;
        }
        let radio = self.backend.radio_state();
        if radio != RadioState::PoweredOn {
            self.record_error(RadioError::from_state(radio).into());
            return;
        }

        match self.discovery.start().await {
            Ok(Some(_session)) => {
                // New session: last session's results are discarded
                self.state.devices.clear();
                self.state.scanning = true;
                self.clear_error();
            }
            Ok(None) => {
                // De-bounced restart of the running session
            }
            Err(error) => self.record_error(error.into()),
        }
    }

    fn handle_connect(&mut self, id: DeviceId) {
        if let Err(error) = self.gate.check_capability().into_result() {
            self.record_error(error.into());
            return;
        }
        let radio = self.backend.radio_state();
        if radio != RadioState::PoweredOn {
            self.record_error(RadioError::from_state(radio).into());
            return;
        }

        // Only scanning and monitoring may overlap; a connect attempt ends
        // the scan first.
        self.discovery.stop();

        match self.connection.connect(id) {
            Ok(()) => {
                self.state.connection = self.connection.state().clone();
                self.clear_error();
            }
            Err(error) => self.record_error(error.into()),
        }
    }

    fn handle_disconnect(&mut self) {
        let previous = self.state.connection.device_id().cloned();
        match self.connection.disconnect() {
            DisconnectOutcome::Noop => {}
            DisconnectOutcome::Started => {
                self.state.connection = self.connection.state().clone();
            }
            DisconnectOutcome::CancelledAttempt => {
                self.state.connection = ConnectionState::Disconnected;
                self.state.reading.clear();
                if let Some(id) = previous {
                    self.set_connected_mark(&id, false);
                }
            }
        }
    }

    fn handle_event(&mut self, event: CoreEvent) {
        match event {
            CoreEvent::DeviceDiscovered { session, device } => {
                if !self.discovery.is_current(session) {
                    return;
                }
                if self.state.devices.iter().any(|known| known.id == device.id) {
                    return;
                }
                self.state.devices.push(device);
            }
            CoreEvent::ScanFinished { session } => {
                if self.discovery.finished(session) {
                    self.state.scanning = false;
                }
            }
            CoreEvent::ConnectPhase { attempt, phase } => {
                self.connection.apply_phase(attempt, phase);
                self.state.connection = self.connection.state().clone();
            }
            CoreEvent::ConnectEstablished { attempt, link, monitor } => {
                if self.connection.established(attempt, link, monitor) {
                    self.state.connection = self.connection.state().clone();
                    if let Some(id) = self.state.connection.device_id().cloned() {
                        self.set_connected_mark(&id, true);
                    }
                    self.clear_error();
                }
            }
            CoreEvent::ConnectFailed { attempt, error } => {
                if let Some(error) = self.connection.failed(attempt, error) {
                    self.state.connection = ConnectionState::Disconnected;
                    self.record_error(error.into());
                }
            }
            CoreEvent::LinkLost { attempt } => {
                let previous = self.state.connection.device_id().cloned();
                if self.connection.link_lost(attempt) {
                    self.after_disconnect(previous);
                }
            }
            CoreEvent::DisconnectComplete { attempt } => {
                let previous = self.state.connection.device_id().cloned();
                if self.connection.disconnect_complete(attempt) {
                    self.after_disconnect(previous);
                    self.clear_error();
                }
            }
            CoreEvent::Reading { attempt, update, observed_at } => {
                if self.connection.accepts_reading(attempt) {
                    self.state.reading.apply(update, observed_at);
                }
            }
        }
    }

    fn handle_radio(&mut self, radio: RadioState) {
        if self.state.radio == radio {
            return;
        }
        info!("Radio state changed: {:?} -> {:?}", self.state.radio, radio);
        self.state.radio = radio;

        if radio == RadioState::PoweredOn {
            return;
        }

        // Nothing survives the radio: end the scan and drop the peripheral
        let previous = self.state.connection.device_id().cloned();
        self.discovery.abandon();
        let forced = self.connection.force_disconnect();
        if forced {
            self.after_disconnect(previous);
        }
        let had_activity = self.state.scanning || forced;
        self.state.scanning = false;
        self.state.devices.clear();
        if radio != RadioState::Unknown || had_activity {
            self.record_error(RadioError::from_state(radio).into());
        }
    }

    fn simulate_reading(&mut self) {
        let simulation = &self.config.simulation;
        let mut rng = rand::thread_rng();
        let heart_rate: u16 =
            rng.gen_range(simulation.heart_rate_bpm.0..=simulation.heart_rate_bpm.1);
        let steps: u32 = rng.gen_range(simulation.step_count.0..=simulation.step_count.1);
        let battery: u8 =
            rng.gen_range(simulation.battery_percent.0..=simulation.battery_percent.1);

        // Same update path as decoded characteristic values
        let now = Utc::now();
        self.state.reading.apply(ReadingUpdate::HeartRate(heart_rate), now);
        self.state.reading.apply(ReadingUpdate::StepCount(steps), now);
        self.state.reading.apply(ReadingUpdate::Battery(battery), now);
        debug!(
            "Simulated reading: {} bpm, {} steps, {}% battery",
            heart_rate, steps, battery
        );
    }

    fn after_disconnect(&mut self, previous: Option<DeviceId>) {
        self.state.connection = ConnectionState::Disconnected;
        self.state.reading.clear();
        if let Some(id) = previous {
            self.set_connected_mark(&id, false);
        }
    }

    fn set_connected_mark(&mut self, id: &DeviceId, connected: bool) {
        for device in &mut self.state.devices {
            if &device.id == id {
                device.is_connected = connected;
            }
        }
    }

    fn record_error(&mut self, error: BridgeError) {
        warn!("Recording error: {}", error);
        self.state.last_error = Some(error);
    }

    fn clear_error(&mut self) {
        self.state.last_error = None;
    }

    fn publish_if_changed(&self) {
        if *self.publish.borrow() != self.state {
            self.publish.send_replace(self.state.clone());
        }
    }

    fn teardown(&mut self) {
        debug!("Bluetooth coordinator shutting down");
        self.discovery.abandon();
        self.connection.force_disconnect();
    }
}
