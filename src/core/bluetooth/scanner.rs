//! Bounded, deduplicating device discovery.
//!
//! One scan session at a time: a session owns a dedup set, a resettable
//! 10-second deadline, and the cancellation token for the platform scan.
//! Starting a scan while one is active only resets the deadline.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::core::bluetooth::backend::{Advertisement, RadioBackend};
use crate::core::bluetooth::constants::{HEALTH_SERVICE_FILTER, UNKNOWN_RSSI_DBM};
use crate::core::bluetooth::events::CoreEvent;
use crate::core::bluetooth::types::{DeviceId, DiscoveredDevice};
use crate::error::ScanError;

pub(crate) struct DiscoveryController {
    backend: Arc<dyn RadioBackend>,
    events: mpsc::Sender<CoreEvent>,
    timeout: Duration,
    min_rssi: i16,
    session: Option<ScanSession>,
    next_session: u64,
}

struct ScanSession {
    id: u64,
    cancel: CancellationToken,
    deadline_reset: mpsc::Sender<()>,
}

impl DiscoveryController {
    pub(crate) fn new(
        backend: Arc<dyn RadioBackend>,
        events: mpsc::Sender<CoreEvent>,
        timeout: Duration,
        min_rssi: i16,
    ) -> Self {
        Self {
            backend,
            events,
            timeout,
            min_rssi,
            session: None,
            next_session: 0,
        }
    }

    /// Starts a new session, or resets the running session's deadline.
    /// Returns the new session id when one actually started.
    pub(crate) async fn start(&mut self) -> Result<Option<u64>, ScanError> {
        if let Some(session) = &self.session {
            // A session already winding down (stop was just requested) is
            // replaced instead of extended; its completion event is stale.
            if !session.cancel.is_cancelled() {
                debug!("Scan already active; restarting the timeout window");
                let _ = session.deadline_reset.try_send(());
                return Ok(None);
            }
        }

        let id = self.next_session;
        self.next_session += 1;

        let cancel = CancellationToken::new();
        let advertisements = self
            .backend
            .start_scan(HEALTH_SERVICE_FILTER.to_vec(), cancel.clone())
            .await?;

        let (deadline_reset, reset_rx) = mpsc::channel(1);
        tokio::spawn(run_session(
            id,
            advertisements,
            reset_rx,
            self.events.clone(),
            cancel.clone(),
            self.timeout,
            self.min_rssi,
        ));

        self.session = Some(ScanSession { id, cancel, deadline_reset });
        info!("Scan session {} started", id);
        Ok(Some(id))
    }

    /// Requests the running session to stop. No-op when nothing is scanning.
    pub(crate) fn stop(&self) {
        if let Some(session) = &self.session {
            info!("Stopping scan session {}", session.id);
            session.cancel.cancel();
        }
    }

    /// Whether discovery events tagged with this id belong to the current
    /// session.
    pub(crate) fn is_current(&self, id: u64) -> bool {
        self.session.as_ref().is_some_and(|s| s.id == id)
    }

    /// Cancels the running session without waiting for its completion
    /// event; used when the radio goes away under it.
    pub(crate) fn abandon(&mut self) {
        if let Some(session) = self.session.take() {
            session.cancel.cancel();
        }
    }

    /// Folds a `ScanFinished` event back in; returns whether it belonged to
    /// the current session (stale completions are ignored).
    pub(crate) fn finished(&mut self, id: u64) -> bool {
        if self.session.as_ref().is_some_and(|s| s.id == id) {
            self.session = None;
            true
        } else {
            false
        }
    }
}

async fn run_session(
    id: u64,
    mut advertisements: mpsc::Receiver<Advertisement>,
    mut reset_rx: mpsc::Receiver<()>,
    events: mpsc::Sender<CoreEvent>,
    cancel: CancellationToken,
    timeout: Duration,
    min_rssi: i16,
) {
    let mut seen: HashSet<DeviceId> = HashSet::new();
    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline => {
                info!("Scan session {} reached its timeout", id);
                break;
            }
            _ = cancel.cancelled() => {
                break;
            }
            Some(()) = reset_rx.recv() => {
                debug!("Scan session {} deadline reset", id);
                deadline.as_mut().reset(tokio::time::Instant::now() + timeout);
            }
            advertisement = advertisements.recv() => {
                match advertisement {
                    Some(advertisement) => {
                        if let Some(device) = admit(advertisement, &mut seen, min_rssi) {
                            info!(
                                "Found device: {} ({}), RSSI {} dBm",
                                device.name, device.id, device.rssi
                            );
                            if events
                                .send(CoreEvent::DeviceDiscovered { session: id, device })
                                .await
                                .is_err()
                            {
                                break;
                            }
                        }
                    }
                    None => {
                        info!("Scan session {}: advertisement stream ended", id);
                        break;
                    }
                }
            }
        }
    }

    // Release the platform scan before reporting the session finished.
    cancel.cancel();
    let _ = events.send(CoreEvent::ScanFinished { session: id }).await;
}

/// Applies the per-session admission rules: named devices only, optional
/// signal-strength floor, first observation wins per device id.
fn admit(
    advertisement: Advertisement,
    seen: &mut HashSet<DeviceId>,
    min_rssi: i16,
) -> Option<DiscoveredDevice> {
    let name = advertisement.name.filter(|name| !name.is_empty())?;
    if advertisement.rssi.is_some_and(|rssi| rssi < min_rssi) {
        return None;
    }
    if !seen.insert(advertisement.id.clone()) {
        return None;
    }
    let rssi = advertisement.rssi.unwrap_or(UNKNOWN_RSSI_DBM);
    Some(DiscoveredDevice::new(
        advertisement.id,
        name,
        rssi,
        advertisement.services.into_iter().collect(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::bluetooth::constants::UUID_HEART_RATE_SERVICE;

    fn advertisement(id: &str, name: Option<&str>, rssi: Option<i16>) -> Advertisement {
        Advertisement {
            id: DeviceId::from(id),
            name: name.map(str::to_owned),
            rssi,
            services: vec![UUID_HEART_RATE_SERVICE],
        }
    }

    #[test]
    fn test_first_observation_wins_per_session() {
        let mut seen = HashSet::new();
        let first = admit(advertisement("dev-1", Some("Polar H10"), Some(-60)), &mut seen, -90);
        let second = admit(advertisement("dev-1", Some("Renamed"), Some(-40)), &mut seen, -90);
        assert_eq!(first.unwrap().name, "Polar H10");
        assert!(second.is_none());
    }

    #[test]
    fn test_nameless_advertisements_are_skipped() {
        let mut seen = HashSet::new();
        assert!(admit(advertisement("dev-1", None, Some(-60)), &mut seen, -90).is_none());
        assert!(admit(advertisement("dev-1", Some(""), Some(-60)), &mut seen, -90).is_none());
        // The id stays unclaimed for a later named advertisement
        assert!(admit(advertisement("dev-1", Some("Band"), Some(-60)), &mut seen, -90).is_some());
    }

    #[test]
    fn test_weak_signals_are_dropped_unknown_kept() {
        let mut seen = HashSet::new();
        assert!(admit(advertisement("weak", Some("Far"), Some(-95)), &mut seen, -90).is_none());
        let unknown = admit(advertisement("near", Some("Near"), None), &mut seen, -90).unwrap();
        assert_eq!(unknown.rssi, UNKNOWN_RSSI_DBM);
    }
}
