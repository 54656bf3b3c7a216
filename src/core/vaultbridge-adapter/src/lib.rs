//! # Vaultbridge Adapter
//!
//! Gives a streaming crypto host (init, update*, finalize) a co-processor
//! that only runs one-shot, slot-based commands.
//!
//! - **Hash**: fragments are buffered and digested with one command at finalize
//! - **AES-CBC**: the last provisioned key is cached so only a new key costs a provisioning
//! - **RSA public**: the key is provisioned into a scratch slot and deleted right after use
//!
//! [`dispatch`] routes host descriptors to the right adapter over a shared
//! [`OperationContext`].

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod auth;
pub mod cipher;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod hash;
pub mod public_key;
pub mod slots;

pub use auth::{derive_scp03_keys, Scp03Keys};
pub use config::{AdapterConfig, AuthConfig, AuthMethod, RoleName};
pub use context::OperationContext;
pub use dispatch::{
    dispatch, CipherRequest, CipherType, Command, DigestRequest, HashType, Operation,
    PublicKeyRequest, PublicKeyType, RsaOperation,
};
pub use error::AdapterError;
pub use hash::MessageBuffer;
pub use public_key::PublicKeyMaterial;
pub use slots::{ADAPTER_GROUP_ID, EPHEMERAL_KEY_SLOT, SYMMETRIC_KEY_SLOT};
