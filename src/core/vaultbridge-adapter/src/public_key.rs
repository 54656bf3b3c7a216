//! Ephemeral-slot adapter for raw RSA public-key operations.
//!
//! The key lives in the co-processor only for the duration of one call:
//! provision, transform, delete. The delete runs on every exit path once the
//! slot has been touched.

use tracing::debug;

use vaultbridge_device::{CipherDirection, Coprocessor, DeviceError, KeyObject, KeyPrivileges};

use crate::context::{discard_key, release_slot, timed, OperationContext};
use crate::error::AdapterError;
use crate::slots::EPHEMERAL_KEY_SLOT;

/// Width of the exponent field the co-processor expects.
pub const EXPONENT_SIZE: usize = 4;

/// RSA public key presented by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKeyMaterial<'a> {
    modulus: &'a [u8],
    exponent: [u8; EXPONENT_SIZE],
}

impl<'a> PublicKeyMaterial<'a> {
    /// Validates a big-endian modulus and exponent.
    ///
    /// Leading zero bytes are ignored. The exponent is left-padded to four
    /// bytes; anything wider is unsupported.
    pub fn new(modulus: &'a [u8], exponent: &[u8]) -> Result<Self, AdapterError> {
        let modulus = strip_leading_zeros(modulus);
        if modulus.is_empty() {
            return Err(AdapterError::InvalidInput("RSA modulus is zero".into()));
        }

        let exponent = strip_leading_zeros(exponent);
        if exponent.is_empty() {
            return Err(AdapterError::InvalidInput("RSA exponent is zero".into()));
        }
        if exponent.len() > EXPONENT_SIZE {
            return Err(AdapterError::Unsupported(format!(
                "RSA exponent of {} bytes",
                exponent.len()
            )));
        }

        let mut padded = [0u8; EXPONENT_SIZE];
        padded[EXPONENT_SIZE - exponent.len()..].copy_from_slice(exponent);

        Ok(Self {
            modulus,
            exponent: padded,
        })
    }

    /// Modulus without leading zero bytes.
    pub fn modulus(&self) -> &[u8] {
        self.modulus
    }

    /// Exponent left-padded to four bytes.
    pub fn padded_exponent(&self) -> [u8; EXPONENT_SIZE] {
        self.exponent
    }

    /// Size of the modulus, and of every transform output, in bytes.
    pub fn size(&self) -> usize {
        self.modulus.len()
    }
}

fn strip_leading_zeros(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|&b| b != 0).unwrap_or(bytes.len());
    &bytes[start..]
}

/// Runs one raw public-key transform through the ephemeral slot.
///
/// Returns the number of bytes written to `output`.
pub fn public_key_op<D: Coprocessor>(
    ctx: &mut OperationContext<D>,
    key: &PublicKeyMaterial<'_>,
    input: &[u8],
    output: &mut [u8],
) -> Result<usize, AdapterError> {
    ctx.ensure_initialized()?;
    if input.is_empty() || input.len() > key.size() {
        return Err(AdapterError::InvalidInput(format!(
            "input of {} bytes for a {}-byte modulus",
            input.len(),
            key.size()
        )));
    }
    if output.len() < key.size() {
        return Err(AdapterError::InvalidInput(format!(
            "output of {} bytes for a {}-byte modulus",
            output.len(),
            key.size()
        )));
    }

    discard_key(&mut ctx.device, EPHEMERAL_KEY_SLOT);
    let result = provision_and_transform(&mut ctx.device, key, input);
    release_slot(&mut ctx.device, EPHEMERAL_KEY_SLOT);

    let produced = result?;
    if produced.len() > output.len() {
        return Err(DeviceError::MalformedResponse(format!(
            "transform returned {} bytes for a {}-byte modulus",
            produced.len(),
            key.size()
        ))
        .into());
    }
    output[..produced.len()].copy_from_slice(&produced);

    debug!(len = produced.len(), "Public key operation completed");
    Ok(produced.len())
}

fn provision_and_transform<D: Coprocessor>(
    device: &mut D,
    key: &PublicKeyMaterial<'_>,
    input: &[u8],
) -> Result<Vec<u8>, DeviceError> {
    let exponent = key.padded_exponent();
    timed("provision_key", || {
        device.provision_key(
            EPHEMERAL_KEY_SLOT,
            KeyPrivileges::ALL,
            KeyObject::RsaPublic {
                modulus: key.modulus(),
                exponent: &exponent,
            },
        )
    })?;

    timed("public_key_transform", || {
        device.run_public_key_transform(EPHEMERAL_KEY_SLOT, CipherDirection::Encrypt, input)
    })
}
