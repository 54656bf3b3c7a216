//! Vaultbridge CLI - Drive the adapter against the software co-processor.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use anyhow::{bail, ensure, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use zeroize::Zeroizing;

use vaultbridge_adapter::{
    derive_scp03_keys, dispatch, AdapterConfig, AuthMethod, CipherRequest, CipherType, Command,
    DigestRequest, HashType, Operation, OperationContext,
};
use vaultbridge_device::{Coprocessor, Role, SoftCoprocessor, AES_BLOCK_SIZE};

/// Bytes fed to the cipher per dispatch.
const CBC_CHUNK_SIZE: usize = 64 * AES_BLOCK_SIZE;

// ============================================================================
// CLI Structure
// ============================================================================

#[derive(Parser)]
#[command(name = "vaultbridge")]
#[command(about = "Vaultbridge - Streaming crypto offload to slot-based co-processors")]
#[command(version)]
struct Cli {
    /// Adapter configuration file (TOML)
    #[arg(long, env = "VAULTBRIDGE_CONFIG")]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show chip information
    Info {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Hash a file through the co-processor
    Digest {
        /// Hash algorithm
        #[arg(long, value_enum, default_value = "sha256")]
        algorithm: Algorithm,
        /// Bytes per update call
        #[arg(long, default_value = "4096")]
        chunk_size: usize,
        /// File to hash
        file: PathBuf,
    },
    /// AES-128-CBC over a block-aligned file
    Cbc {
        /// Key (hex, 16 bytes)
        #[arg(long)]
        key: String,
        /// Initialization vector (hex, 16 bytes)
        #[arg(long)]
        iv: String,
        /// Decrypt instead of encrypt
        #[arg(long)]
        decrypt: bool,
        /// Input file
        input: PathBuf,
        /// Output file
        output: PathBuf,
    },
    /// Run the device self test and known-answer checks
    SelfTest,
}

#[derive(Clone, Copy, ValueEnum)]
enum Algorithm {
    Sha256,
    Sha384,
    Sha512,
}

impl Algorithm {
    fn hash_type(self) -> HashType {
        match self {
            Self::Sha256 => HashType::Sha256,
            Self::Sha384 => HashType::Sha384,
            Self::Sha512 => HashType::Sha512,
        }
    }

    fn digest_size(self) -> usize {
        match self {
            Self::Sha256 => 32,
            Self::Sha384 => 48,
            Self::Sha512 => 64,
        }
    }
}

// ============================================================================
// Setup
// ============================================================================

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn load_config(path: Option<&Path>) -> Result<AdapterConfig> {
    match path {
        Some(path) => AdapterConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => Ok(AdapterConfig::default()),
    }
}

/// Enrolls the configured credentials so the simulated chip accepts them.
fn provision_credentials(device: &mut SoftCoprocessor, config: &AdapterConfig) -> Result<()> {
    let user = config.auth.user_id;
    let role = Role::from(config.auth.role);

    match &config.auth.method {
        AuthMethod::None => {}
        AuthMethod::Pin { pin } => device.enroll_pin(user, role, pin),
        AuthMethod::Scp03 { mac, enc } => device.enroll_scp03(user, role, mac, enc),
        AuthMethod::Kdf { key, label } => {
            device
                .open(&config.comms_params())
                .context("Failed to open device")?;
            let chip = device.info().context("Failed to read chip identity")?;
            device.close().context("Failed to close device")?;

            let keys = derive_scp03_keys(
                key,
                label.as_bytes(),
                &chip.serial,
                chip.firmware.as_bytes(),
            )?;
            device.enroll_scp03(user, role, &keys.mac[..], &keys.enc[..]);
        }
    }

    Ok(())
}

fn open_adapter(config: AdapterConfig) -> Result<OperationContext<SoftCoprocessor>> {
    let mut device = SoftCoprocessor::new();
    provision_credentials(&mut device, &config)?;

    let mut ctx = OperationContext::new(device, config);
    dispatch(&mut ctx, Operation::Command(Command::Register))
        .context("Failed to register adapter")?;
    Ok(ctx)
}

fn parse_hex_block(name: &str, text: &str) -> Result<Zeroizing<[u8; AES_BLOCK_SIZE]>> {
    let bytes = Zeroizing::new(hex::decode(text).with_context(|| format!("Invalid {name} hex"))?);
    ensure!(
        bytes.len() == AES_BLOCK_SIZE,
        "{name} must be {AES_BLOCK_SIZE} bytes, got {}",
        bytes.len()
    );

    let mut block = Zeroizing::new([0u8; AES_BLOCK_SIZE]);
    block.copy_from_slice(&bytes);
    Ok(block)
}

// ============================================================================
// Operations
// ============================================================================

fn digest_reader(
    ctx: &mut OperationContext<SoftCoprocessor>,
    algorithm: Algorithm,
    mut reader: impl Read,
    chunk_size: usize,
) -> Result<Vec<u8>> {
    let mut chunk = vec![0u8; chunk_size];
    loop {
        let n = reader.read(&mut chunk).context("Failed to read input")?;
        if n == 0 {
            break;
        }
        dispatch(
            ctx,
            Operation::Digest(DigestRequest {
                hash: algorithm.hash_type(),
                input: Some(&chunk[..n]),
                output: None,
                is_independent_copy: false,
            }),
        )?;
    }

    let mut digest = vec![0u8; algorithm.digest_size()];
    dispatch(
        ctx,
        Operation::Digest(DigestRequest {
            hash: algorithm.hash_type(),
            input: None,
            output: Some(digest.as_mut_slice()),
            is_independent_copy: false,
        }),
    )?;
    Ok(digest)
}

fn cbc_chunks(
    ctx: &mut OperationContext<SoftCoprocessor>,
    key: &[u8],
    iv: &[u8; AES_BLOCK_SIZE],
    input: &[u8],
    encrypt: bool,
) -> Result<Vec<u8>> {
    ensure!(
        input.len() % AES_BLOCK_SIZE == 0,
        "Input length {} is not a multiple of {AES_BLOCK_SIZE}",
        input.len()
    );

    let mut chaining_value = *iv;
    let mut output = vec![0u8; input.len()];
    for (src, dst) in input
        .chunks(CBC_CHUNK_SIZE)
        .zip(output.chunks_mut(CBC_CHUNK_SIZE))
    {
        dispatch(
            ctx,
            Operation::Cipher(CipherRequest {
                cipher: CipherType::AesCbc,
                key,
                chaining_value: &mut chaining_value,
                input: src,
                output: dst,
                encrypt,
            }),
        )?;
    }
    Ok(output)
}

// ============================================================================
// Commands
// ============================================================================

fn cmd_info(ctx: &mut OperationContext<SoftCoprocessor>, json: bool) -> Result<()> {
    let mut text = String::new();
    dispatch(ctx, Operation::Command(Command::Info(&mut text)))?;

    if json {
        let mut fields = serde_json::Map::new();
        for line in text.lines() {
            if let Some((key, value)) = line.split_once(':') {
                fields.insert(key.to_lowercase(), value.into());
            }
        }
        println!("{}", serde_json::to_string_pretty(&fields)?);
    } else {
        print!("{text}");
    }

    Ok(())
}

fn cmd_digest(
    ctx: &mut OperationContext<SoftCoprocessor>,
    algorithm: Algorithm,
    chunk_size: usize,
    file: &Path,
) -> Result<()> {
    if chunk_size == 0 {
        bail!("Chunk size must be > 0");
    }

    let reader = BufReader::new(
        File::open(file).with_context(|| format!("Failed to open {}", file.display()))?,
    );
    let digest = digest_reader(ctx, algorithm, reader, chunk_size)?;

    println!("{}  {}", hex::encode(digest), file.display());
    Ok(())
}

fn cmd_cbc(
    ctx: &mut OperationContext<SoftCoprocessor>,
    key: &str,
    iv: &str,
    decrypt: bool,
    input: &Path,
    output: &Path,
) -> Result<()> {
    let key = parse_hex_block("key", key)?;
    let iv = parse_hex_block("iv", iv)?;

    let data = Zeroizing::new(
        std::fs::read(input).with_context(|| format!("Failed to read {}", input.display()))?,
    );
    let result = Zeroizing::new(cbc_chunks(ctx, &key[..], &iv, &data, !decrypt)?);
    std::fs::write(output, &*result)
        .with_context(|| format!("Failed to write {}", output.display()))?;

    println!(
        "{} {} bytes to {}",
        if decrypt { "Decrypted" } else { "Encrypted" },
        result.len(),
        output.display()
    );
    Ok(())
}

fn cmd_self_test(ctx: &mut OperationContext<SoftCoprocessor>) -> Result<()> {
    dispatch(ctx, Operation::Command(Command::SelfTest)).context("Device self test failed")?;
    println!("Device self test:  ok");

    // FIPS 180-2 SHA-256 "abc"
    let digest = digest_reader(ctx, Algorithm::Sha256, &b"abc"[..], 1)?;
    ensure!(
        hex::encode(&digest) == "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad",
        "SHA-256 known-answer test failed"
    );
    println!("SHA-256 KAT:       ok");

    // NIST SP 800-38A F.2.1 CBC-AES128.Encrypt, first two blocks
    let key = hex::decode("2b7e151628aed2a6abf7158809cf4f3c")?;
    let iv: [u8; AES_BLOCK_SIZE] = hex::decode("000102030405060708090a0b0c0d0e0f")?
        .try_into()
        .map_err(|_| anyhow::anyhow!("Bad IV vector"))?;
    let plaintext =
        hex::decode("6bc1bee22e409f96e93d7e117393172aae2d8a571e03ac9c9eb76fac45af8e51")?;
    let ciphertext = cbc_chunks(ctx, &key, &iv, &plaintext, true)?;
    ensure!(
        hex::encode(&ciphertext)
            == "7649abac8119b246cee98e9b12e9197d5086cb9b507219ee95db113a917678b2",
        "AES-CBC encrypt known-answer test failed"
    );
    let roundtrip = cbc_chunks(ctx, &key, &iv, &ciphertext, false)?;
    ensure!(roundtrip == plaintext, "AES-CBC decrypt known-answer test failed");
    println!("AES-128-CBC KAT:   ok");

    Ok(())
}

// ============================================================================
// Main
// ============================================================================

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = load_config(cli.config.as_deref())?;
    let mut ctx = open_adapter(config)?;

    let result = match &cli.command {
        Commands::Info { json } => cmd_info(&mut ctx, *json),
        Commands::Digest {
            algorithm,
            chunk_size,
            file,
        } => cmd_digest(&mut ctx, *algorithm, *chunk_size, file),
        Commands::Cbc {
            key,
            iv,
            decrypt,
            input,
            output,
        } => cmd_cbc(&mut ctx, key, iv, *decrypt, input, output),
        Commands::SelfTest => cmd_self_test(&mut ctx),
    };

    dispatch(&mut ctx, Operation::Command(Command::Unregister))?;
    result
}
