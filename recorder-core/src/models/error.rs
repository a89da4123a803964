use std::io;

use thiserror::Error;

use super::media::Capability;

/// Errors that can occur while recording, encoding, or finalizing output.
///
/// `DeviceUnavailable`, `PermissionDenied` and `StorageExhausted` are
/// detected before any thread is spawned and returned from `start`.
/// `MuxerSequence` is a programming invariant violation and should not
/// occur under correct usage.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RecorderError {
    #[error("device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("permission denied: {0:?}")]
    PermissionDenied(Capability),

    #[error("storage exhausted: {0}")]
    StorageExhausted(String),

    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),

    #[error("muxer sequence error: {0}")]
    MuxerSequence(String),

    #[error("i/o error: {0}")]
    Io(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("timed out: {0}")]
    Timeout(String),
}

impl RecorderError {
    /// Map an I/O error with context. A full disk surfaces as `StorageExhausted`.
    pub fn io(context: &str, err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::StorageFull => Self::StorageExhausted(format!("{}: {}", context, err)),
            _ => Self::Io(format!("{}: {}", context, err)),
        }
    }

    /// Whether this error was caused by a missing grant or full disk rather
    /// than a device or codec fault.
    pub fn is_preflight(&self) -> bool {
        matches!(self, Self::PermissionDenied(_) | Self::StorageExhausted(_))
    }
}
