//! Device error types.

use thiserror::Error;

use crate::types::KeySlot;

/// Errors returned by a co-processor command.
#[derive(Debug, Error)]
pub enum DeviceError {
    /// The command channel has not been opened.
    #[error("device channel not open")]
    NotOpen,

    /// No key is resident in the addressed slot.
    #[error("slot {0} is empty")]
    EmptySlot(KeySlot),

    /// The addressed slot already holds a key.
    #[error("slot {0} is occupied")]
    SlotOccupied(KeySlot),

    /// Authentication was rejected.
    #[error("authentication failed for user {0}")]
    AuthenticationFailed(u8),

    /// A parameter was rejected by the device.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// The device answered with something the caller cannot use.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// The chip is in a state that forbids use.
    #[error("unusable device state: {0}")]
    InvalidState(String),

    /// The command completed with a non-success status word.
    #[error("{command} failed with status {status:#06x}")]
    Status {
        /// Command name.
        command: &'static str,
        /// Raw status word.
        status: u16,
    },
}
