//! Error types for the read-ahead engine

use thiserror::Error;

use crate::types::DeviceId;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the read-ahead engine
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid engine configuration
    #[error("Invalid engine configuration: {0}")]
    InvalidConfig(String),

    /// No eligible mirror could be resolved for a logical address
    #[error("No eligible mirror for logical address {logical:#x}")]
    Unresolvable { logical: u64 },

    /// Device is not registered with the engine
    #[error("Unknown device: {0}")]
    UnknownDevice(DeviceId),

    /// Device still has queued or in-flight work
    #[error("Device {device} is busy: {in_flight} reads in flight, {queued} extents queued")]
    DeviceBusy {
        device: DeviceId,
        in_flight: usize,
        queued: usize,
    },

    /// A block read failed (I/O error or structurally invalid block)
    #[error("Read failed on {device} at {logical:#x}: {reason}")]
    ReadFailed {
        device: DeviceId,
        logical: u64,
        reason: String,
    },
}
