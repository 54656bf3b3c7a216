//! Session authentication performed at init.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::{debug, info};
use zeroize::{Zeroize, Zeroizing};

use vaultbridge_device::{ChipInfo, Coprocessor, Credential, Role};

use crate::config::{AuthConfig, AuthMethod, SCP03_KEY_SIZE};
use crate::context::timed;
use crate::error::AdapterError;

type HmacSha256 = Hmac<Sha256>;

/// Secure channel keys derived from a chip identity.
pub struct Scp03Keys {
    /// MAC key.
    pub mac: Zeroizing<[u8; SCP03_KEY_SIZE]>,
    /// Encryption key.
    pub enc: Zeroizing<[u8; SCP03_KEY_SIZE]>,
}

impl std::fmt::Debug for Scp03Keys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scp03Keys")
            .field("mac", &"[REDACTED]")
            .field("enc", &"[REDACTED]")
            .finish()
    }
}

/// Derives SCP03 keys as HMAC-SHA256(key, label || serial || firmware).
///
/// The first half of the output is the MAC key, the second half the
/// encryption key.
pub fn derive_scp03_keys(
    key: &[u8],
    label: &[u8],
    serial: &[u8],
    firmware: &[u8],
) -> Result<Scp03Keys, AdapterError> {
    let mut hmac = HmacSha256::new_from_slice(key)
        .map_err(|_| AdapterError::InvalidConfig("invalid kdf key".into()))?;
    hmac.update(label);
    hmac.update(serial);
    hmac.update(firmware);
    let mut output = hmac.finalize().into_bytes();

    let mut mac = Zeroizing::new([0u8; SCP03_KEY_SIZE]);
    let mut enc = Zeroizing::new([0u8; SCP03_KEY_SIZE]);
    mac.copy_from_slice(&output[..SCP03_KEY_SIZE]);
    enc.copy_from_slice(&output[SCP03_KEY_SIZE..2 * SCP03_KEY_SIZE]);
    output.as_mut_slice().zeroize();

    Ok(Scp03Keys { mac, enc })
}

/// Opens the configured session on an open device.
pub(crate) fn authenticate<D: Coprocessor>(
    device: &mut D,
    auth: &AuthConfig,
    chip: &ChipInfo,
) -> Result<(), AdapterError> {
    let role = Role::from(auth.role);
    let user = auth.user_id;

    match &auth.method {
        AuthMethod::None => {
            debug!("No authentication configured");
            return Ok(());
        }
        AuthMethod::Pin { pin } => {
            timed("authenticate", || {
                device.authenticate(user, role, Credential::Pin(pin.as_slice()))
            })?;
        }
        AuthMethod::Scp03 { mac, enc } => {
            timed("authenticate", || {
                device.authenticate(
                    user,
                    role,
                    Credential::Scp03 {
                        mac: mac.as_slice(),
                        enc: enc.as_slice(),
                    },
                )
            })?;
        }
        AuthMethod::Kdf { key, label } => {
            let keys = derive_scp03_keys(
                key,
                label.as_bytes(),
                &chip.serial,
                chip.firmware.as_bytes(),
            )?;
            timed("authenticate", || {
                device.authenticate(
                    user,
                    role,
                    Credential::Scp03 {
                        mac: &keys.mac[..],
                        enc: &keys.enc[..],
                    },
                )
            })?;
        }
    }

    info!(
        user = user,
        role = ?role,
        method = auth.method.name(),
        "Authenticated"
    );
    Ok(())
}
