//! Internal events drained by the coordination loop.
//!
//! Scan, connection, and monitor tasks never touch shared state directly;
//! they describe what happened on this channel and the single-writer loop
//! folds it into the published snapshot. Scan events carry their session id
//! and connection events their attempt id so anything emitted by a
//! superseded task is discarded instead of corrupting newer state.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::core::bluetooth::backend::PeripheralLink;
use crate::core::bluetooth::monitor::MonitorHandle;
use crate::core::bluetooth::types::{DiscoveredDevice, ReadingUpdate};
use crate::error::ConnectionError;

/// Phase reached by an in-flight connection attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConnectPhase {
    Discovering,
    Subscribing,
}

pub(crate) enum CoreEvent {
    /// First advertisement for a device id in this scan session
    DeviceDiscovered {
        session: u64,
        device: DiscoveredDevice,
    },
    /// Scan session ended (timeout, stop, or the platform closed the stream)
    ScanFinished { session: u64 },
    /// Connection attempt advanced a phase
    ConnectPhase {
        attempt: u64,
        phase: ConnectPhase,
    },
    /// Connection attempt completed; the link and its monitor are live
    ConnectEstablished {
        attempt: u64,
        link: Arc<dyn PeripheralLink>,
        monitor: MonitorHandle,
    },
    /// Connection attempt failed at some phase
    ConnectFailed {
        attempt: u64,
        error: ConnectionError,
    },
    /// Transport dropped the link out-of-band
    LinkLost { attempt: u64 },
    /// Requested teardown finished releasing platform resources
    DisconnectComplete { attempt: u64 },
    /// A characteristic payload decoded into a value
    Reading {
        attempt: u64,
        update: ReadingUpdate,
        observed_at: DateTime<Utc>,
    },
}
