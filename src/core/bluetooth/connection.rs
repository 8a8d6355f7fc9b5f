//! Connection lifecycle for the single active peripheral
//! This module owns the connect/discover/subscribe/teardown walk and the
//! authoritative [`ConnectionState`].

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::core::bluetooth::backend::{PeripheralLink, RadioBackend};
use crate::core::bluetooth::events::{ConnectPhase, CoreEvent};
use crate::core::bluetooth::monitor::{self, MonitorHandle};
use crate::core::bluetooth::types::{ConnectionState, DeviceId};
use crate::error::ConnectionError;

/// What a disconnect request amounted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DisconnectOutcome {
    /// Teardown task launched; `DisconnectComplete` will follow
    Started,
    /// An in-flight attempt was cancelled; state is `Disconnected` now
    CancelledAttempt,
    /// Nothing to do
    Noop,
}

/// The connection state machine.
///
/// All methods run on the coordination loop; attempts and teardowns execute
/// in spawned tasks that report back through attempt-tagged events, so a
/// superseded task can never move the machine.
pub(crate) struct ConnectionMachine {
    backend: Arc<dyn RadioBackend>,
    events: mpsc::Sender<CoreEvent>,
    connect_timeout: Duration,
    state: ConnectionState,
    attempt: u64,
    inflight: Option<Inflight>,
    link: Option<Arc<dyn PeripheralLink>>,
    monitor: Option<MonitorHandle>,
    watchdog: Option<JoinHandle<()>>,
}

struct Inflight {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl ConnectionMachine {
    pub(crate) fn new(
        backend: Arc<dyn RadioBackend>,
        events: mpsc::Sender<CoreEvent>,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            backend,
            events,
            connect_timeout,
            state: ConnectionState::Disconnected,
            attempt: 0,
            inflight: None,
            link: None,
            monitor: None,
            watchdog: None,
        }
    }

    pub(crate) fn state(&self) -> &ConnectionState {
        &self.state
    }

    /// Begins a connection attempt. At most one peripheral is managed at a
    /// time; any state other than `Disconnected` refuses without mutating.
    pub(crate) fn connect(&mut self, id: DeviceId) -> Result<(), ConnectionError> {
        if !self.state.is_disconnected() {
            return Err(ConnectionError::AlreadyConnectedOrConnecting);
        }

        self.attempt += 1;
        let attempt = self.attempt;
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_attempt(
            self.backend.clone(),
            id.clone(),
            self.events.clone(),
            attempt,
            cancel.clone(),
            self.connect_timeout,
        ));

        info!("Connecting to {} (attempt {})", id, attempt);
        self.inflight = Some(Inflight { cancel, task });
        self.state = ConnectionState::Connecting(id);
        Ok(())
    }

    /// Advances the visible phase of the current attempt.
    pub(crate) fn apply_phase(&mut self, attempt: u64, phase: ConnectPhase) {
        if attempt != self.attempt {
            return;
        }
        let id = match (&self.state, phase) {
            (ConnectionState::Connecting(id), ConnectPhase::Discovering) => id.clone(),
            (ConnectionState::Discovering(id), ConnectPhase::Subscribing) => id.clone(),
            _ => return,
        };
        self.state = match phase {
            ConnectPhase::Discovering => ConnectionState::Discovering(id),
            ConnectPhase::Subscribing => ConnectionState::Subscribing(id),
        };
    }

    /// Folds a completed attempt in. Returns `true` when the machine entered
    /// `Connected`; a stale completion is torn down on the spot.
    pub(crate) fn established(
        &mut self,
        attempt: u64,
        link: Arc<dyn PeripheralLink>,
        monitor: MonitorHandle,
    ) -> bool {
        let current = attempt == self.attempt
            && matches!(
                self.state,
                ConnectionState::Connecting(_)
                    | ConnectionState::Discovering(_)
                    | ConnectionState::Subscribing(_)
            );
        if !current {
            debug!("Discarding stale connection (attempt {})", attempt);
            monitor.abort();
            tokio::spawn(async move {
                let _ = link.disconnect().await;
            });
            return false;
        }

        let id = link.id();
        self.inflight = None;
        self.watchdog = Some(spawn_watchdog(link.clone(), self.events.clone(), attempt));
        self.link = Some(link);
        self.monitor = Some(monitor);
        self.state = ConnectionState::Connected(id);
        true
    }

    /// Folds an attempt failure in; returns the error when it applied.
    pub(crate) fn failed(&mut self, attempt: u64, error: ConnectionError) -> Option<ConnectionError> {
        if attempt != self.attempt || self.state.is_disconnected() {
            return None;
        }
        warn!("Connection attempt {} failed: {}", attempt, error);
        self.inflight = None;
        self.state = ConnectionState::Disconnected;
        Some(error)
    }

    /// Whether a decoded reading tagged with this attempt may still be
    /// applied. Readings are accepted from subscription setup onwards (the
    /// battery read lands before the attempt reports established).
    pub(crate) fn accepts_reading(&self, attempt: u64) -> bool {
        attempt == self.attempt
            && matches!(
                self.state,
                ConnectionState::Subscribing(_) | ConnectionState::Connected(_)
            )
    }

    /// Requests teardown of the active peripheral. Idempotent from
    /// `Disconnected`.
    pub(crate) fn disconnect(&mut self) -> DisconnectOutcome {
        match self.state.clone() {
            ConnectionState::Disconnected | ConnectionState::Disconnecting(_) => {
                DisconnectOutcome::Noop
            }
            ConnectionState::Connected(id) => {
                self.state = ConnectionState::Disconnecting(id);
                if let Some(watchdog) = self.watchdog.take() {
                    watchdog.abort();
                }
                let monitor = self.monitor.take();
                let link = self.link.take();
                let events = self.events.clone();
                let attempt = self.attempt;
                tokio::spawn(async move {
                    if let Some(monitor) = monitor {
                        monitor.shutdown().await;
                    }
                    if let Some(link) = link {
                        if let Err(e) = link.disconnect().await {
                            warn!("Disconnect reported an error: {}", e);
                        }
                    }
                    let _ = events.send(CoreEvent::DisconnectComplete { attempt }).await;
                });
                DisconnectOutcome::Started
            }
            ConnectionState::Connecting(_)
            | ConnectionState::Discovering(_)
            | ConnectionState::Subscribing(_) => {
                self.cancel_inflight();
                self.state = ConnectionState::Disconnected;
                DisconnectOutcome::CancelledAttempt
            }
        }
    }

    /// Folds the teardown acknowledgement in.
    pub(crate) fn disconnect_complete(&mut self, attempt: u64) -> bool {
        if attempt == self.attempt && matches!(self.state, ConnectionState::Disconnecting(_)) {
            self.state = ConnectionState::Disconnected;
            true
        } else {
            false
        }
    }

    /// Folds an out-of-band transport disconnect in; treated exactly like a
    /// completed explicit disconnect.
    pub(crate) fn link_lost(&mut self, attempt: u64) -> bool {
        if attempt != self.attempt || !self.state.is_connected() {
            return false;
        }
        info!("Peripheral dropped the link");
        self.release_connected();
        self.state = ConnectionState::Disconnected;
        true
    }

    /// Immediate teardown when the radio leaves `PoweredOn` (or the manager
    /// shuts down). Returns `true` when there was anything to tear down.
    pub(crate) fn force_disconnect(&mut self) -> bool {
        if self.state.is_disconnected() {
            return false;
        }
        self.cancel_inflight();
        self.release_connected();
        self.state = ConnectionState::Disconnected;
        true
    }

    fn cancel_inflight(&mut self) {
        if let Some(inflight) = self.inflight.take() {
            inflight.cancel.cancel();
            inflight.task.abort();
        }
    }

    fn release_connected(&mut self) {
        if let Some(watchdog) = self.watchdog.take() {
            watchdog.abort();
        }
        if let Some(monitor) = self.monitor.take() {
            monitor.abort();
        }
        if let Some(link) = self.link.take() {
            tokio::spawn(async move {
                let _ = link.disconnect().await;
            });
        }
    }
}

/// Drives one attempt and reports the outcome. A cancelled attempt reports
/// nothing; the machine has already moved on.
async fn run_attempt(
    backend: Arc<dyn RadioBackend>,
    id: DeviceId,
    events: mpsc::Sender<CoreEvent>,
    attempt: u64,
    cancel: CancellationToken,
    connect_timeout: Duration,
) {
    let outcome = tokio::select! {
        _ = cancel.cancelled() => None,
        outcome = drive_attempt(&backend, &id, &events, attempt, &cancel, connect_timeout) => {
            Some(outcome)
        }
    };

    match outcome {
        Some(Ok((link, monitor))) => {
            let _ = events
                .send(CoreEvent::ConnectEstablished { attempt, link, monitor })
                .await;
        }
        Some(Err(error)) => {
            let _ = events.send(CoreEvent::ConnectFailed { attempt, error }).await;
        }
        None => {}
    }
}

async fn drive_attempt(
    backend: &Arc<dyn RadioBackend>,
    id: &DeviceId,
    events: &mpsc::Sender<CoreEvent>,
    attempt: u64,
    cancel: &CancellationToken,
    connect_timeout: Duration,
) -> Result<(Arc<dyn PeripheralLink>, MonitorHandle), ConnectionError> {
    let link = match tokio::time::timeout(connect_timeout, backend.connect(id)).await {
        Ok(Ok(link)) => link,
        Ok(Err(error)) => return Err(error),
        Err(_) => {
            return Err(ConnectionError::Timeout { seconds: connect_timeout.as_secs() });
        }
    };

    let _ = events
        .send(CoreEvent::ConnectPhase { attempt, phase: ConnectPhase::Discovering })
        .await;
    let services = link.discover_services().await?;
    debug!("Peripheral {} exposes {} services", id, services.len());

    let _ = events
        .send(CoreEvent::ConnectPhase { attempt, phase: ConnectPhase::Subscribing })
        .await;
    let monitor = monitor::attach(link.clone(), events.clone(), attempt, cancel.child_token()).await;

    Ok((link, monitor))
}

fn spawn_watchdog(
    link: Arc<dyn PeripheralLink>,
    events: mpsc::Sender<CoreEvent>,
    attempt: u64,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        link.link_lost().await;
        let _ = events.send(CoreEvent::LinkLost { attempt }).await;
    })
}
