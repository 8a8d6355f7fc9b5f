//! Characteristic monitoring for the connected peripheral
//! This module subscribes to the known health characteristics and routes
//! decoded values into the shared real-time reading.

use std::sync::Arc;

use chrono::Utc;
use log::{debug, info};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::core::bluetooth::backend::PeripheralLink;
use crate::core::bluetooth::constants::{
    UUID_BATTERY_LEVEL, UUID_BATTERY_SERVICE, UUID_HEART_RATE_MEASUREMENT,
    UUID_HEART_RATE_SERVICE,
};
use crate::core::bluetooth::decoder;
use crate::core::bluetooth::events::CoreEvent;
use crate::core::bluetooth::types::ReadingUpdate;

/// Live monitoring pumps for one connection attempt.
///
/// Dropping the handle alone does not stop the pumps; the connection machine
/// calls [`shutdown`](Self::shutdown) (or [`abort`](Self::abort) on forced
/// teardown) before it leaves `Connected`.
pub(crate) struct MonitorHandle {
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl MonitorHandle {
    /// Cancels every pump and waits for them to release their subscriptions.
    pub(crate) async fn shutdown(mut self) {
        self.cancel.cancel();
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }
    }

    /// Immediate teardown for paths that cannot await (radio loss).
    pub(crate) fn abort(self) {
        self.cancel.cancel();
        for task in self.tasks {
            task.abort();
        }
    }
}

/// Attempts each known characteristic independently and returns the pumps
/// that came up. A characteristic the peripheral does not expose is logged
/// and skipped; partial capability is normal.
pub(crate) async fn attach(
    link: Arc<dyn PeripheralLink>,
    events: mpsc::Sender<CoreEvent>,
    attempt: u64,
    cancel: CancellationToken,
) -> MonitorHandle {
    let mut tasks = Vec::new();

    match link
        .subscribe(UUID_HEART_RATE_SERVICE, UUID_HEART_RATE_MEASUREMENT)
        .await
    {
        Ok(rx) => {
            info!("Subscribed to heart rate measurements");
            tasks.push(spawn_pump(
                "heart rate",
                rx,
                events.clone(),
                attempt,
                cancel.clone(),
                |payload| decoder::decode_heart_rate(payload).map(ReadingUpdate::HeartRate),
            ));
        }
        Err(e) => info!("Heart rate monitoring unavailable: {}", e),
    }

    match link.read(UUID_BATTERY_SERVICE, UUID_BATTERY_LEVEL).await {
        Ok(payload) => match decoder::decode_battery_level(&payload) {
            Some(percent) => {
                let _ = events
                    .send(CoreEvent::Reading {
                        attempt,
                        update: ReadingUpdate::Battery(percent),
                        observed_at: Utc::now(),
                    })
                    .await;
            }
            None => debug!("Dropping unparseable battery frame ({} bytes)", payload.len()),
        },
        Err(e) => info!("Battery level unavailable: {}", e),
    }

    // Many trackers also push battery updates; take them when offered.
    match link.subscribe(UUID_BATTERY_SERVICE, UUID_BATTERY_LEVEL).await {
        Ok(rx) => {
            tasks.push(spawn_pump(
                "battery",
                rx,
                events.clone(),
                attempt,
                cancel.clone(),
                |payload| decoder::decode_battery_level(payload).map(ReadingUpdate::Battery),
            ));
        }
        Err(e) => debug!("Battery notifications unavailable: {}", e),
    }

    if tasks.is_empty() {
        info!("No characteristics came up; connection stays readable but idle");
    }

    MonitorHandle { cancel, tasks }
}

/// Forwards payloads from one subscription through the decoder. A frame that
/// fails to decode is logged and dropped; one malformed frame must not
/// interrupt a live stream.
fn spawn_pump(
    label: &'static str,
    mut payloads: mpsc::Receiver<Vec<u8>>,
    events: mpsc::Sender<CoreEvent>,
    attempt: u64,
    cancel: CancellationToken,
    decode: fn(&[u8]) -> Option<ReadingUpdate>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                payload = payloads.recv() => {
                    match payload {
                        Some(bytes) => match decode(&bytes) {
                            Some(update) => {
                                let observed_at = Utc::now();
                                if events
                                    .send(CoreEvent::Reading { attempt, update, observed_at })
                                    .await
                                    .is_err()
                                {
                                    break;
                                }
                            }
                            None => {
                                debug!("Dropping unparseable {} frame ({} bytes)", label, bytes.len());
                            }
                        },
                        None => {
                            debug!("{} notification stream ended", label);
                            break;
                        }
                    }
                }
            }
        }
    })
}
