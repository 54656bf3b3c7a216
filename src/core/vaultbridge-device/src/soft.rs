//! Software co-processor.
//!
//! Implements the command set with RustCrypto primitives, keeps the slot table
//! in memory and records every exchange in a journal. Faults can be injected
//! per command kind to exercise error paths in callers.

use std::collections::{HashMap, HashSet};

use aes::cipher::{block_padding::NoPadding, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::rngs::OsRng;
use rand::RngCore;
use rsa::hazmat::rsa_encrypt;
use rsa::traits::PublicKeyParts;
use rsa::{BigUint, RsaPublicKey};
use sha2::{Digest, Sha256, Sha384, Sha512};
use tracing::{debug, trace};
use zeroize::Zeroizing;

use crate::command::Coprocessor;
use crate::error::DeviceError;
use crate::types::{
    ChipInfo, ChipState, CipherDirection, CommsParams, Credential, DigestAlgorithm, KeyObject,
    KeyPrivileges, KeySlot, Role, AES_128_KEY_SIZE, AES_BLOCK_SIZE,
};

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;

/// Status word reported for injected faults.
const INJECTED_FAULT_STATUS: u16 = 0x6F00;

/// Status word reported when the chip refuses a command in its current state.
const CONDITIONS_NOT_SATISFIED: u16 = 0x6985;

const FIRMWARE_VERSION: &str = "soft-1.0.0";
const FREE_SPACE: u32 = 32 * 1024;

/// Kind of command sent to the co-processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    /// Open the channel.
    Open,
    /// Close the channel.
    Close,
    /// Read chip information.
    Info,
    /// Open an authenticated session.
    Authenticate,
    /// Close the authenticated session.
    EndAuthentication,
    /// Run the internal self test.
    SelfTest,
    /// Delete a key slot.
    DeleteKey,
    /// Provision a key slot.
    ProvisionKey,
    /// One-shot digest.
    Digest,
    /// One-shot block cipher.
    Cipher,
    /// One-shot public-key transform.
    PublicKeyTransform,
}

impl CommandKind {
    /// Command name used in status errors and logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Close => "close",
            Self::Info => "get_info",
            Self::Authenticate => "authenticate",
            Self::EndAuthentication => "end_authentication",
            Self::SelfTest => "self_test",
            Self::DeleteKey => "delete_key",
            Self::ProvisionKey => "provision_key",
            Self::Digest => "digest",
            Self::Cipher => "cipher",
            Self::PublicKeyTransform => "public_key_transform",
        }
    }

    /// Commands a terminated chip still answers.
    fn allowed_when_terminated(&self) -> bool {
        matches!(
            self,
            Self::Open | Self::Close | Self::Info | Self::EndAuthentication
        )
    }
}

/// One journal entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandRecord {
    /// Command kind.
    pub kind: CommandKind,
    /// Slot addressed by the command, if any.
    pub slot: Option<KeySlot>,
    /// Whether the command succeeded.
    pub ok: bool,
}

enum StoredKey {
    Aes128(Zeroizing<[u8; AES_128_KEY_SIZE]>),
    RsaPublic(RsaPublicKey),
}

enum Enrollment {
    Pin {
        role: Role,
        pin: Zeroizing<Vec<u8>>,
    },
    Scp03 {
        role: Role,
        mac: Zeroizing<Vec<u8>>,
        enc: Zeroizing<Vec<u8>>,
    },
}

impl Enrollment {
    fn accepts(&self, role: Role, credential: &Credential<'_>) -> bool {
        match (self, credential) {
            (Self::Pin { role: r, pin }, Credential::Pin(given)) => {
                *r == role && pin.as_slice() == *given
            }
            (Self::Scp03 { role: r, mac, enc }, Credential::Scp03 { mac: m, enc: e }) => {
                *r == role && mac.as_slice() == *m && enc.as_slice() == *e
            }
            _ => false,
        }
    }
}

/// In-memory co-processor.
pub struct SoftCoprocessor {
    open: bool,
    params: Option<CommsParams>,
    serial: [u8; 8],
    state: ChipState,
    session: Option<Role>,
    users: HashMap<u8, Enrollment>,
    slots: HashMap<KeySlot, StoredKey>,
    journal: Vec<CommandRecord>,
    pending_faults: HashSet<CommandKind>,
    sticky_faults: HashSet<CommandKind>,
}

impl Default for SoftCoprocessor {
    fn default() -> Self {
        Self::new()
    }
}

impl SoftCoprocessor {
    /// Creates an activated chip with a random serial number and no users.
    pub fn new() -> Self {
        let mut serial = [0u8; 8];
        OsRng.fill_bytes(&mut serial);

        Self {
            open: false,
            params: None,
            serial,
            state: ChipState::Activated,
            session: None,
            users: HashMap::new(),
            slots: HashMap::new(),
            journal: Vec::new(),
            pending_faults: HashSet::new(),
            sticky_faults: HashSet::new(),
        }
    }

    /// Replaces the serial number.
    pub fn with_serial(mut self, serial: [u8; 8]) -> Self {
        self.serial = serial;
        self
    }

    /// Sets the lifecycle state.
    pub fn set_state(&mut self, state: ChipState) {
        self.state = state;
    }

    /// Enrolls a password user.
    pub fn enroll_pin(&mut self, user: u8, role: Role, pin: &[u8]) {
        self.users.insert(
            user,
            Enrollment::Pin {
                role,
                pin: Zeroizing::new(pin.to_vec()),
            },
        );
    }

    /// Enrolls a secure channel user.
    pub fn enroll_scp03(&mut self, user: u8, role: Role, mac: &[u8], enc: &[u8]) {
        self.users.insert(
            user,
            Enrollment::Scp03 {
                role,
                mac: Zeroizing::new(mac.to_vec()),
                enc: Zeroizing::new(enc.to_vec()),
            },
        );
    }

    /// Makes the next command of `kind` fail with a status error.
    pub fn fail_next(&mut self, kind: CommandKind) {
        self.pending_faults.insert(kind);
    }

    /// Makes every command of `kind` fail until [`clear_faults`](Self::clear_faults).
    pub fn fail_always(&mut self, kind: CommandKind) {
        self.sticky_faults.insert(kind);
    }

    /// Removes every injected fault.
    pub fn clear_faults(&mut self) {
        self.pending_faults.clear();
        self.sticky_faults.clear();
    }

    /// Every command received so far, oldest first.
    pub fn journal(&self) -> &[CommandRecord] {
        &self.journal
    }

    /// Number of journal entries of `kind`.
    pub fn count(&self, kind: CommandKind) -> usize {
        self.journal.iter().filter(|r| r.kind == kind).count()
    }

    /// Empties the journal.
    pub fn clear_journal(&mut self) {
        self.journal.clear();
    }

    /// Whether `slot` currently holds a key.
    pub fn slot_occupied(&self, slot: KeySlot) -> bool {
        self.slots.contains_key(&slot)
    }

    /// Whether the channel is open.
    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Parameters of the last successful open.
    pub fn comms_params(&self) -> Option<&CommsParams> {
        self.params.as_ref()
    }

    /// Role of the current session, if authenticated.
    pub fn session_role(&self) -> Option<Role> {
        self.session
    }

    fn admit(&mut self, kind: CommandKind) -> Result<(), DeviceError> {
        if self.pending_faults.remove(&kind) || self.sticky_faults.contains(&kind) {
            return Err(DeviceError::Status {
                command: kind.name(),
                status: INJECTED_FAULT_STATUS,
            });
        }
        if kind != CommandKind::Open && !self.open {
            return Err(DeviceError::NotOpen);
        }
        if self.state == ChipState::Terminated && !kind.allowed_when_terminated() {
            return Err(DeviceError::Status {
                command: kind.name(),
                status: CONDITIONS_NOT_SATISFIED,
            });
        }
        Ok(())
    }

    fn exchange<T>(
        &mut self,
        kind: CommandKind,
        slot: Option<KeySlot>,
        command: impl FnOnce(&mut Self) -> Result<T, DeviceError>,
    ) -> Result<T, DeviceError> {
        let result = self.admit(kind).and_then(|()| command(self));

        match &result {
            Ok(_) => trace!(command = kind.name(), "Command completed"),
            Err(e) => debug!(command = kind.name(), error = %e, "Command failed"),
        }
        self.journal.push(CommandRecord {
            kind,
            slot,
            ok: result.is_ok(),
        });

        result
    }

    fn stored(&self, slot: KeySlot) -> Result<&StoredKey, DeviceError> {
        self.slots.get(&slot).ok_or(DeviceError::EmptySlot(slot))
    }
}

fn import_key(key: KeyObject<'_>) -> Result<StoredKey, DeviceError> {
    match key {
        KeyObject::Aes128 { key } => {
            let bytes: [u8; AES_128_KEY_SIZE] = key.try_into().map_err(|_| {
                DeviceError::InvalidParameter(format!("AES-128 key must be 16 bytes, got {}", key.len()))
            })?;
            Ok(StoredKey::Aes128(Zeroizing::new(bytes)))
        }
        KeyObject::RsaPublic { modulus, exponent } => {
            let n = BigUint::from_bytes_be(modulus);
            let e = BigUint::from_bytes_be(exponent);
            RsaPublicKey::new(n, e)
                .map(StoredKey::RsaPublic)
                .map_err(|e| DeviceError::InvalidParameter(format!("RSA public key: {e}")))
        }
    }
}

impl Coprocessor for SoftCoprocessor {
    fn open(&mut self, params: &CommsParams) -> Result<(), DeviceError> {
        let params = *params;
        self.exchange(CommandKind::Open, None, |dev| {
            dev.open = true;
            dev.params = Some(params);
            Ok(())
        })
    }

    fn close(&mut self) -> Result<(), DeviceError> {
        self.exchange(CommandKind::Close, None, |dev| {
            dev.open = false;
            dev.session = None;
            Ok(())
        })
    }

    fn info(&mut self) -> Result<ChipInfo, DeviceError> {
        self.exchange(CommandKind::Info, None, |dev| {
            Ok(ChipInfo {
                serial: dev.serial,
                firmware: FIRMWARE_VERSION.to_string(),
                state: dev.state,
                mode: 0,
                role: dev.session.unwrap_or(Role::Everyone),
                self_tests: 0,
                free_space: FREE_SPACE,
            })
        })
    }

    fn authenticate(
        &mut self,
        user: u8,
        role: Role,
        credential: Credential<'_>,
    ) -> Result<(), DeviceError> {
        self.exchange(CommandKind::Authenticate, None, |dev| {
            let accepted = dev
                .users
                .get(&user)
                .is_some_and(|enrollment| enrollment.accepts(role, &credential));
            if !accepted {
                return Err(DeviceError::AuthenticationFailed(user));
            }
            dev.session = Some(role);
            Ok(())
        })
    }

    fn end_authentication(&mut self) -> Result<(), DeviceError> {
        self.exchange(CommandKind::EndAuthentication, None, |dev| {
            dev.session = None;
            Ok(())
        })
    }

    fn self_test(&mut self) -> Result<(), DeviceError> {
        self.exchange(CommandKind::SelfTest, None, |_| Ok(()))
    }

    fn delete_key(&mut self, slot: KeySlot) -> Result<(), DeviceError> {
        self.exchange(CommandKind::DeleteKey, Some(slot), |dev| {
            dev.slots
                .remove(&slot)
                .map(|_| ())
                .ok_or(DeviceError::EmptySlot(slot))
        })
    }

    fn provision_key(
        &mut self,
        slot: KeySlot,
        _privileges: KeyPrivileges,
        key: KeyObject<'_>,
    ) -> Result<(), DeviceError> {
        self.exchange(CommandKind::ProvisionKey, Some(slot), |dev| {
            if dev.slots.contains_key(&slot) {
                return Err(DeviceError::SlotOccupied(slot));
            }
            let stored = import_key(key)?;
            dev.slots.insert(slot, stored);
            Ok(())
        })
    }

    fn run_digest(
        &mut self,
        algorithm: DigestAlgorithm,
        input: &[u8],
    ) -> Result<Vec<u8>, DeviceError> {
        self.exchange(CommandKind::Digest, None, |_| {
            Ok(match algorithm {
                DigestAlgorithm::Sha256 => Sha256::digest(input).to_vec(),
                DigestAlgorithm::Sha384 => Sha384::digest(input).to_vec(),
                DigestAlgorithm::Sha512 => Sha512::digest(input).to_vec(),
            })
        })
    }

    fn run_cipher(
        &mut self,
        slot: KeySlot,
        direction: CipherDirection,
        iv: &[u8; AES_BLOCK_SIZE],
        input: &[u8],
    ) -> Result<Vec<u8>, DeviceError> {
        self.exchange(CommandKind::Cipher, Some(slot), |dev| {
            let StoredKey::Aes128(key) = dev.stored(slot)? else {
                return Err(DeviceError::InvalidParameter(format!(
                    "slot {slot} does not hold an AES key"
                )));
            };
            if input.len() % AES_BLOCK_SIZE != 0 {
                return Err(DeviceError::InvalidParameter(format!(
                    "input length {} is not a multiple of the block size",
                    input.len()
                )));
            }

            let invalid_length =
                |_| DeviceError::InvalidParameter("invalid key or IV length".into());
            match direction {
                CipherDirection::Encrypt => Ok(Aes128CbcEnc::new_from_slices(&key[..], iv)
                    .map_err(invalid_length)?
                    .encrypt_padded_vec_mut::<NoPadding>(input)),
                CipherDirection::Decrypt => Aes128CbcDec::new_from_slices(&key[..], iv)
                    .map_err(invalid_length)?
                    .decrypt_padded_vec_mut::<NoPadding>(input)
                    .map_err(|_| DeviceError::InvalidParameter("unpadding failed".into())),
            }
        })
    }

    fn run_public_key_transform(
        &mut self,
        slot: KeySlot,
        direction: CipherDirection,
        input: &[u8],
    ) -> Result<Vec<u8>, DeviceError> {
        self.exchange(CommandKind::PublicKeyTransform, Some(slot), |dev| {
            let StoredKey::RsaPublic(key) = dev.stored(slot)? else {
                return Err(DeviceError::InvalidParameter(format!(
                    "slot {slot} does not hold an RSA public key"
                )));
            };
            if direction == CipherDirection::Decrypt {
                return Err(DeviceError::InvalidParameter(
                    "public key cannot decrypt".into(),
                ));
            }

            let m = BigUint::from_bytes_be(input);
            if &m >= key.n() {
                return Err(DeviceError::InvalidParameter(
                    "message representative out of range".into(),
                ));
            }
            let c = rsa_encrypt(key, &m)
                .map_err(|e| DeviceError::InvalidParameter(format!("RSA transform: {e}")))?;

            // Left-pad to the modulus size
            let size = key.size();
            let raw = c.to_bytes_be();
            let mut out = vec![0u8; size - raw.len()];
            out.extend_from_slice(&raw);
            Ok(out)
        })
    }
}
