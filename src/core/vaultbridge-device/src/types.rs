//! Types exchanged with the co-processor.

use std::fmt;
use std::time::Duration;

/// Size of an AES block in bytes.
pub const AES_BLOCK_SIZE: usize = 16;

/// Size of an AES-128 key in bytes.
pub const AES_128_KEY_SIZE: usize = 16;

/// Address of a key slot inside the co-processor.
///
/// Slots are grouped; a key lives at `(group, id)` and holds at most one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeySlot {
    /// Key group identifier.
    pub group: u8,
    /// Key identifier inside the group.
    pub id: u8,
}

impl KeySlot {
    /// Creates a slot address.
    pub const fn new(group: u8, id: u8) -> Self {
        Self { group, id }
    }
}

impl fmt::Display for KeySlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02x}/{:02x}", self.group, self.id)
    }
}

/// Per-operation user masks attached to a provisioned key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyPrivileges {
    /// Users allowed to read the key back.
    pub read: u8,
    /// Users allowed to overwrite the key.
    pub write: u8,
    /// Users allowed to delete the key.
    pub delete: u8,
    /// Users allowed to run algorithms with the key.
    pub execute: u8,
}

impl KeyPrivileges {
    /// Every user gets every privilege.
    pub const ALL: Self = Self {
        read: 0xFF,
        write: 0xFF,
        delete: 0xFF,
        execute: 0xFF,
    };
}

/// Key material handed to `provision_key`.
#[derive(Clone, Copy)]
pub enum KeyObject<'a> {
    /// AES-128 secret key.
    Aes128 {
        /// Raw key bytes.
        key: &'a [u8],
    },
    /// RSA public key for raw (unpadded) encryption.
    RsaPublic {
        /// Big-endian modulus.
        modulus: &'a [u8],
        /// Big-endian public exponent.
        exponent: &'a [u8],
    },
}

impl fmt::Debug for KeyObject<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Aes128 { key } => f
                .debug_struct("Aes128")
                .field("len", &key.len())
                .field("key", &"[REDACTED]")
                .finish(),
            Self::RsaPublic { modulus, exponent } => f
                .debug_struct("RsaPublic")
                .field("modulus_len", &modulus.len())
                .field("exponent_len", &exponent.len())
                .finish(),
        }
    }
}

/// Digest algorithms the co-processor computes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DigestAlgorithm {
    /// SHA-256.
    Sha256,
    /// SHA-384.
    Sha384,
    /// SHA-512.
    Sha512,
}

impl DigestAlgorithm {
    /// Returns the digest size in bytes.
    pub fn digest_size(&self) -> usize {
        match self {
            Self::Sha256 => 32,
            Self::Sha384 => 48,
            Self::Sha512 => 64,
        }
    }
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sha256 => write!(f, "sha256"),
            Self::Sha384 => write!(f, "sha384"),
            Self::Sha512 => write!(f, "sha512"),
        }
    }
}

/// Direction of a cipher or public-key command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherDirection {
    /// Encrypt (or raw public-key transform).
    Encrypt,
    /// Decrypt.
    Decrypt,
}

/// Lifecycle state reported by the chip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChipState {
    /// Personalization state; users and files can be created.
    Creation,
    /// Normal operating state.
    Activated,
    /// Temporarily disabled.
    Deactivated,
    /// Permanently locked; no command will succeed.
    Terminated,
}

impl ChipState {
    /// Raw state code.
    pub fn code(&self) -> u8 {
        match self {
            Self::Creation => 0x01,
            Self::Activated => 0x07,
            Self::Deactivated => 0x08,
            Self::Terminated => 0xFF,
        }
    }
}

/// Role attached to an authenticated user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Nobody authenticated.
    Everyone,
    /// Approved (FIPS) user.
    ApprovedUser,
    /// Non-approved user.
    NonApprovedUser,
    /// Manufacturer.
    Manufacturer,
}

impl Role {
    /// Raw role code.
    pub fn code(&self) -> u8 {
        match self {
            Self::Everyone => 0xFF,
            Self::ApprovedUser => 0x01,
            Self::NonApprovedUser => 0x02,
            Self::Manufacturer => 0x07,
        }
    }
}

/// Snapshot of the chip's identity and status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChipInfo {
    /// Chip serial number.
    pub serial: [u8; 8],
    /// Firmware version string.
    pub firmware: String,
    /// Lifecycle state.
    pub state: ChipState,
    /// Operating mode code.
    pub mode: u8,
    /// Role of the currently authenticated user.
    pub role: Role,
    /// Self-test configuration code.
    pub self_tests: u8,
    /// Free file system space in bytes.
    pub free_space: u32,
}

/// Parameters used when opening the command channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommsParams {
    /// Delay granted to the chip's power-on self test.
    pub startup_delay: Duration,
    /// Per-command timeout enforced by the transport.
    pub timeout: Duration,
    /// SPI clock rate in kHz.
    pub spi_rate_khz: u16,
}

/// Credential presented when opening an authenticated session.
#[derive(Clone, Copy)]
pub enum Credential<'a> {
    /// Password authentication.
    Pin(&'a [u8]),
    /// Secure channel keys.
    Scp03 {
        /// MAC key.
        mac: &'a [u8],
        /// Encryption key.
        enc: &'a [u8],
    },
}

impl fmt::Debug for Credential<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pin(_) => f.debug_tuple("Pin").field(&"[REDACTED]").finish(),
            Self::Scp03 { .. } => f
                .debug_struct("Scp03")
                .field("mac", &"[REDACTED]")
                .field("enc", &"[REDACTED]")
                .finish(),
        }
    }
}
