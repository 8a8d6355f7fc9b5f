//! Host capability check gating every Bluetooth operation.
//!
//! Platform differences live behind [`CapabilityGate`] instead of being
//! scattered through the core logic; the coordination loop consults the gate
//! before discovery and before connection and records a typed error on a
//! negative answer.

use crate::error::CapabilityError;

/// Outcome of a capability check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Capability {
    /// BLE operations may proceed.
    Capable,
    /// The platform supports BLE but the host denied access.
    Denied { reason: String },
    /// The host platform has no usable BLE stack.
    Unsupported { platform: String },
}

impl Capability {
    /// Converts a negative check into the error surfaced to callers.
    pub fn into_result(self) -> Result<(), CapabilityError> {
        match self {
            Self::Capable => Ok(()),
            Self::Denied { reason } => Err(CapabilityError::PermissionDenied { reason }),
            Self::Unsupported { platform } => Err(CapabilityError::Unsupported { platform }),
        }
    }
}

pub trait CapabilityGate: Send + Sync {
    fn check_capability(&self) -> Capability;
}

/// Gate for the compile-time host platform.
///
/// Desktop and mobile targets carry a BLE stack and prompt for runtime
/// permissions on first radio use, so the static answer is `Capable`; every
/// other target is `Unsupported` with the platform named for remediation
/// guidance.
#[derive(Debug, Default)]
pub struct HostCapabilityGate;

impl CapabilityGate for HostCapabilityGate {
    fn check_capability(&self) -> Capability {
        if cfg!(any(
            target_os = "macos",
            target_os = "windows",
            target_os = "linux",
            target_os = "ios",
            target_os = "android",
        )) {
            Capability::Capable
        } else {
            Capability::Unsupported {
                platform: std::env::consts::OS.to_string(),
            }
        }
    }
}
