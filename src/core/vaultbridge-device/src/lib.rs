//! # Vaultbridge Device
//!
//! Command interface of a slot-based cryptographic co-processor.
//!
//! The co-processor only understands one-shot commands:
//! - Provision a key into a numbered slot
//! - Run one algorithm (digest, block cipher, public-key transform) in a single exchange
//! - Delete a slot
//!
//! plus the session commands needed to open the channel and authenticate.
//! [`SoftCoprocessor`] implements the same command set in software and records
//! every exchange, which is what the adapter tests are written against.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod command;
pub mod error;
pub mod soft;
pub mod types;

pub use command::Coprocessor;
pub use error::DeviceError;
pub use soft::{CommandKind, CommandRecord, SoftCoprocessor};
pub use types::{
    ChipInfo, ChipState, CipherDirection, CommsParams, Credential, DigestAlgorithm, KeyObject,
    KeyPrivileges, KeySlot, Role, AES_128_KEY_SIZE, AES_BLOCK_SIZE,
};
