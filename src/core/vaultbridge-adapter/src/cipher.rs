//! AES-CBC adapter with a single cached key slot.
//!
//! The host presents the key on every call. Provisioning is the expensive
//! step, so the last key written to the slot is remembered and only a
//! different key triggers delete + provision.

use tracing::debug;
use zeroize::Zeroizing;

use vaultbridge_device::{
    CipherDirection, Coprocessor, DeviceError, KeyObject, KeyPrivileges, AES_128_KEY_SIZE,
    AES_BLOCK_SIZE,
};

use crate::context::{discard_key, timed, OperationContext};
use crate::error::AdapterError;
use crate::slots::SYMMETRIC_KEY_SLOT;

/// Copy of the key resident in the symmetric slot.
pub(crate) struct CachedKey(Zeroizing<[u8; AES_128_KEY_SIZE]>);

impl CachedKey {
    fn new(key: &[u8]) -> Option<Self> {
        let bytes: [u8; AES_128_KEY_SIZE] = key.try_into().ok()?;
        Some(Self(Zeroizing::new(bytes)))
    }

    fn matches(&self, key: &[u8]) -> bool {
        self.0.as_slice() == key
    }
}

/// Runs AES-128-CBC over `input` into `output`, chaining through `chaining_value`.
///
/// `input` must be block aligned and `output` at least as long. On success
/// `chaining_value` holds the last ciphertext block; on failure it is left
/// untouched.
pub fn cipher<D: Coprocessor>(
    ctx: &mut OperationContext<D>,
    key: &[u8],
    chaining_value: &mut [u8; AES_BLOCK_SIZE],
    input: &[u8],
    output: &mut [u8],
    direction: CipherDirection,
) -> Result<(), AdapterError> {
    ctx.ensure_initialized()?;
    if key.len() != AES_128_KEY_SIZE {
        return Err(AdapterError::Unsupported(format!(
            "AES key of {} bytes",
            key.len()
        )));
    }
    if input.len() % AES_BLOCK_SIZE != 0 {
        return Err(AdapterError::InvalidInput(format!(
            "input length {} is not a multiple of {AES_BLOCK_SIZE}",
            input.len()
        )));
    }
    if output.len() < input.len() {
        return Err(AdapterError::InvalidInput(format!(
            "output of {} bytes for {} bytes of input",
            output.len(),
            input.len()
        )));
    }
    if input.is_empty() {
        return Ok(());
    }

    ensure_key_resident(ctx, key)?;

    let device = &mut ctx.device;
    let iv = *chaining_value;
    let produced = Zeroizing::new(timed("cipher", || {
        device.run_cipher(SYMMETRIC_KEY_SLOT, direction, &iv, input)
    })?);
    if produced.len() != input.len() {
        return Err(DeviceError::MalformedResponse(format!(
            "cipher returned {} bytes for {}",
            produced.len(),
            input.len()
        ))
        .into());
    }

    output[..input.len()].copy_from_slice(&produced);
    let last_block = match direction {
        CipherDirection::Encrypt => &produced[produced.len() - AES_BLOCK_SIZE..],
        CipherDirection::Decrypt => &input[input.len() - AES_BLOCK_SIZE..],
    };
    chaining_value.copy_from_slice(last_block);
    Ok(())
}

/// Makes sure `key` is the key provisioned in the symmetric slot.
fn ensure_key_resident<D: Coprocessor>(
    ctx: &mut OperationContext<D>,
    key: &[u8],
) -> Result<(), AdapterError> {
    if ctx.cached_key.as_ref().is_some_and(|cached| cached.matches(key)) {
        debug!(slot = %SYMMETRIC_KEY_SLOT, "Key cache hit");
        return Ok(());
    }

    debug!(
        slot = %SYMMETRIC_KEY_SLOT,
        cached = ctx.cached_key.is_some(),
        "Key cache miss, provisioning"
    );
    ctx.cached_key = None;
    discard_key(&mut ctx.device, SYMMETRIC_KEY_SLOT);

    let device = &mut ctx.device;
    timed("provision_key", || {
        device.provision_key(
            SYMMETRIC_KEY_SLOT,
            KeyPrivileges::ALL,
            KeyObject::Aes128 { key },
        )
    })?;

    ctx.cached_key = CachedKey::new(key);
    Ok(())
}
