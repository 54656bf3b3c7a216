//! Adapter error types.

use thiserror::Error;

use vaultbridge_device::DeviceError;

/// Errors returned by the adapter.
#[derive(Debug, Error)]
pub enum AdapterError {
    /// The context was never set up, or was cleaned up.
    #[error("adapter not initialized")]
    NotInitialized,

    /// No adapter handles the requested operation.
    #[error("operation not handled by the co-processor")]
    Unavailable,

    /// Growing the message buffer failed.
    #[error("out of memory")]
    OutOfMemory,

    /// The operation is recognized but its parameters are not supported.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// Malformed lengths or undersized output buffers.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Configuration rejected by validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A co-processor command failed.
    #[error("hardware error: {0}")]
    Hardware(#[from] DeviceError),
}
