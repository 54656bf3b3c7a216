//! Co-processor command trait definition.

use crate::error::DeviceError;
use crate::types::{
    ChipInfo, CipherDirection, CommsParams, Credential, DigestAlgorithm, KeyObject,
    KeyPrivileges, KeySlot, Role, AES_BLOCK_SIZE,
};

/// Command set of a slot-based co-processor.
///
/// Every method is one synchronous exchange over the command channel. The
/// channel cannot service two commands at once, so the trait takes `&mut self`.
pub trait Coprocessor {
    /// Opens the command channel.
    fn open(&mut self, params: &CommsParams) -> Result<(), DeviceError>;

    /// Closes the command channel.
    fn close(&mut self) -> Result<(), DeviceError>;

    /// Reads the chip's identity and status.
    fn info(&mut self) -> Result<ChipInfo, DeviceError>;

    /// Opens an authenticated session as `user` with `role`.
    fn authenticate(
        &mut self,
        user: u8,
        role: Role,
        credential: Credential<'_>,
    ) -> Result<(), DeviceError>;

    /// Closes any authenticated session.
    fn end_authentication(&mut self) -> Result<(), DeviceError>;

    /// Runs the chip's internal self test.
    fn self_test(&mut self) -> Result<(), DeviceError>;

    /// Deletes the key held in `slot`.
    fn delete_key(&mut self, slot: KeySlot) -> Result<(), DeviceError>;

    /// Stores `key` into `slot` with the given privileges.
    fn provision_key(
        &mut self,
        slot: KeySlot,
        privileges: KeyPrivileges,
        key: KeyObject<'_>,
    ) -> Result<(), DeviceError>;

    /// Computes the digest of `input` in one exchange.
    fn run_digest(
        &mut self,
        algorithm: DigestAlgorithm,
        input: &[u8],
    ) -> Result<Vec<u8>, DeviceError>;

    /// Runs AES-CBC without padding over `input` with the key in `slot`.
    fn run_cipher(
        &mut self,
        slot: KeySlot,
        direction: CipherDirection,
        iv: &[u8; AES_BLOCK_SIZE],
        input: &[u8],
    ) -> Result<Vec<u8>, DeviceError>;

    /// Runs the raw public-key transform with the key in `slot`.
    fn run_public_key_transform(
        &mut self,
        slot: KeySlot,
        direction: CipherDirection,
        input: &[u8],
    ) -> Result<Vec<u8>, DeviceError>;
}
