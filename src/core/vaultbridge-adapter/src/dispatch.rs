//! Routes host operation descriptors to the adapters.

use tracing::{debug, trace, warn};

use vaultbridge_device::{CipherDirection, Coprocessor, DigestAlgorithm, AES_BLOCK_SIZE};

use crate::cipher;
use crate::context::OperationContext;
use crate::error::AdapterError;
use crate::hash;
use crate::public_key::{self, PublicKeyMaterial};

// ============================================================================
// Descriptors
// ============================================================================

/// Hash algorithms known to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashType {
    /// SHA-1.
    Sha1,
    /// SHA-224.
    Sha224,
    /// SHA-256.
    Sha256,
    /// SHA-384.
    Sha384,
    /// SHA-512.
    Sha512,
    /// SHA3-256.
    Sha3_256,
}

impl HashType {
    /// Co-processor algorithm for this hash, if it has one.
    pub fn offloaded(&self) -> Option<DigestAlgorithm> {
        match self {
            Self::Sha256 => Some(DigestAlgorithm::Sha256),
            Self::Sha384 => Some(DigestAlgorithm::Sha384),
            Self::Sha512 => Some(DigestAlgorithm::Sha512),
            Self::Sha1 | Self::Sha224 | Self::Sha3_256 => None,
        }
    }
}

/// Block cipher modes known to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherType {
    /// Raw AES block.
    Aes,
    /// AES-CBC.
    AesCbc,
    /// AES-ECB.
    AesEcb,
    /// AES-CTR.
    AesCtr,
    /// AES-GCM.
    AesGcm,
    /// AES-CCM.
    AesCcm,
    /// AES-CFB.
    AesCfb,
    /// AES-XTS.
    AesXts,
}

/// RSA operations known to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RsaOperation {
    /// Public-key encryption.
    PublicEncrypt,
    /// Public-key decryption (signature verification).
    PublicDecrypt,
    /// Private-key encryption (signing).
    PrivateEncrypt,
    /// Private-key decryption.
    PrivateDecrypt,
}

/// Public-key algorithms known to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublicKeyType {
    /// RSA.
    Rsa(RsaOperation),
    /// RSA key generation.
    RsaKeyGen,
    /// Finite-field Diffie-Hellman.
    Dh,
    /// Elliptic-curve Diffie-Hellman.
    Ecdh,
    /// ECDSA signing.
    EcdsaSign,
    /// ECDSA verification.
    EcdsaVerify,
    /// Ed25519 signing or verification.
    Ed25519,
    /// X25519 key agreement.
    Curve25519,
    /// Elliptic-curve key generation.
    EccKeyGen,
}

/// Adapter lifecycle commands.
#[derive(Debug)]
pub enum Command<'a> {
    /// Set up (or re-use) the adapter.
    Register,
    /// Release one use of the adapter.
    Unregister,
    /// Render chip information into the string.
    Info(&'a mut String),
    /// Run the device self test.
    SelfTest,
}

/// Digest step.
#[derive(Debug)]
pub struct DigestRequest<'a> {
    /// Hash algorithm.
    pub hash: HashType,
    /// Message fragment to buffer.
    pub input: Option<&'a [u8]>,
    /// Digest destination; present on finalize.
    pub output: Option<&'a mut [u8]>,
    /// Whether the host state is an independent copy of another.
    pub is_independent_copy: bool,
}

/// Block cipher step.
pub struct CipherRequest<'a> {
    /// Cipher mode.
    pub cipher: CipherType,
    /// Raw key.
    pub key: &'a [u8],
    /// Chaining value, updated on success.
    pub chaining_value: &'a mut [u8; AES_BLOCK_SIZE],
    /// Input blocks.
    pub input: &'a [u8],
    /// Output blocks.
    pub output: &'a mut [u8],
    /// Encrypt when true, decrypt otherwise.
    pub encrypt: bool,
}

impl std::fmt::Debug for CipherRequest<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CipherRequest")
            .field("cipher", &self.cipher)
            .field("key", &"[REDACTED]")
            .field("input_len", &self.input.len())
            .field("output_len", &self.output.len())
            .field("encrypt", &self.encrypt)
            .finish()
    }
}

/// Public-key operation.
#[derive(Debug)]
pub struct PublicKeyRequest<'a> {
    /// Algorithm and operation.
    pub algorithm: PublicKeyType,
    /// Big-endian modulus.
    pub modulus: &'a [u8],
    /// Big-endian public exponent.
    pub exponent: &'a [u8],
    /// Input bytes.
    pub input: &'a [u8],
    /// Output bytes.
    pub output: &'a mut [u8],
    /// Set to the number of output bytes written.
    pub output_len: &'a mut usize,
}

/// Operation descriptor from the host, tagged by family.
#[derive(Debug)]
pub enum Operation<'a> {
    /// Adapter command.
    Command(Command<'a>),
    /// Hash.
    Digest(DigestRequest<'a>),
    /// Block cipher.
    Cipher(CipherRequest<'a>),
    /// Public-key.
    PublicKey(PublicKeyRequest<'a>),
    /// Random bytes.
    Random(&'a mut [u8]),
    /// Seed bytes.
    Seed(&'a mut [u8]),
    /// HMAC.
    Hmac,
    /// CMAC.
    Cmac,
}

impl Operation<'_> {
    /// Family name, for logs.
    pub fn family(&self) -> &'static str {
        match self {
            Self::Command(_) => "command",
            Self::Digest(_) => "digest",
            Self::Cipher(_) => "cipher",
            Self::PublicKey(_) => "public_key",
            Self::Random(_) => "random",
            Self::Seed(_) => "seed",
            Self::Hmac => "hmac",
            Self::Cmac => "cmac",
        }
    }
}

// ============================================================================
// Dispatch
// ============================================================================

/// Routes `operation` to the adapter handling its family.
///
/// Commands are accepted on an uninitialized context; everything else fails
/// with `NotInitialized` until the adapter is registered, then with
/// `Unavailable` when the co-processor cannot run it.
pub fn dispatch<D: Coprocessor>(
    ctx: &mut OperationContext<D>,
    operation: Operation<'_>,
) -> Result<(), AdapterError> {
    trace!(family = operation.family(), "Dispatching operation");

    if let Operation::Command(command) = operation {
        return run_command(ctx, command);
    }
    ctx.ensure_initialized()?;

    let family = operation.family();
    let result = match operation {
        Operation::Digest(request) => run_digest(ctx, request),
        Operation::Cipher(request) => run_cipher(ctx, request),
        Operation::PublicKey(request) => run_public_key(ctx, request),
        Operation::Command(_)
        | Operation::Random(_)
        | Operation::Seed(_)
        | Operation::Hmac
        | Operation::Cmac => Err(AdapterError::Unavailable),
    };

    match &result {
        Err(AdapterError::Unavailable) => debug!("Operation not offloaded"),
        Err(AdapterError::Hardware(e)) => {
            warn!(family = family, error = %e, "Co-processor command failed")
        }
        _ => {}
    }
    result
}

fn run_command<D: Coprocessor>(
    ctx: &mut OperationContext<D>,
    command: Command<'_>,
) -> Result<(), AdapterError> {
    match command {
        Command::Register => ctx.init(),
        Command::Unregister => {
            ctx.cleanup();
            Ok(())
        }
        Command::Info(text) => {
            *text = ctx.info_text()?;
            Ok(())
        }
        Command::SelfTest => ctx.self_test(),
    }
}

fn run_digest<D: Coprocessor>(
    ctx: &mut OperationContext<D>,
    request: DigestRequest<'_>,
) -> Result<(), AdapterError> {
    let algorithm = request.hash.offloaded().ok_or(AdapterError::Unavailable)?;
    hash::process(
        ctx,
        algorithm,
        request.input,
        request.output,
        request.is_independent_copy,
    )
}

fn run_cipher<D: Coprocessor>(
    ctx: &mut OperationContext<D>,
    request: CipherRequest<'_>,
) -> Result<(), AdapterError> {
    if request.cipher != CipherType::AesCbc {
        return Err(AdapterError::Unavailable);
    }
    let direction = if request.encrypt {
        CipherDirection::Encrypt
    } else {
        CipherDirection::Decrypt
    };
    cipher::cipher(
        ctx,
        request.key,
        request.chaining_value,
        request.input,
        request.output,
        direction,
    )
}

fn run_public_key<D: Coprocessor>(
    ctx: &mut OperationContext<D>,
    request: PublicKeyRequest<'_>,
) -> Result<(), AdapterError> {
    match request.algorithm {
        PublicKeyType::Rsa(RsaOperation::PublicEncrypt | RsaOperation::PublicDecrypt) => {
            let key = PublicKeyMaterial::new(request.modulus, request.exponent)?;
            *request.output_len =
                public_key::public_key_op(ctx, &key, request.input, request.output)?;
            Ok(())
        }
        _ => Err(AdapterError::Unavailable),
    }
}
