//! Adapter configuration.
//!
//! Loaded from TOML:
//!
//! ```toml
//! startup_delay_ms = 10
//! timeout_ms = 5000
//! spi_rate_khz = 5000
//!
//! [auth]
//! user_id = 1
//! role = "approved"
//! method = "kdf"
//! key = "00112233445566778899aabbccddeeff"
//! label = "vaultbridge"
//! ```

use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Deserializer};
use zeroize::Zeroizing;

use vaultbridge_device::{CommsParams, Role};

use crate::error::AdapterError;

/// Highest user id the co-processor accepts.
pub const MAX_USER_ID: u8 = 7;

/// Accepted password length range in bytes.
pub const PIN_LENGTH: std::ops::RangeInclusive<usize> = 4..=32;

/// Size of each SCP03 key in bytes.
pub const SCP03_KEY_SIZE: usize = 16;

fn default_startup_delay_ms() -> u16 {
    10
}

fn default_timeout_ms() -> u32 {
    5000
}

fn default_spi_rate_khz() -> u16 {
    5000
}

/// Top-level adapter configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AdapterConfig {
    /// Delay granted to the chip after power-on, in milliseconds.
    #[serde(default = "default_startup_delay_ms")]
    pub startup_delay_ms: u16,

    /// Per-command timeout, in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u32,

    /// SPI clock rate in kHz.
    #[serde(default = "default_spi_rate_khz")]
    pub spi_rate_khz: u16,

    /// Authentication performed at init.
    #[serde(default)]
    pub auth: AuthConfig,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            startup_delay_ms: default_startup_delay_ms(),
            timeout_ms: default_timeout_ms(),
            spi_rate_khz: default_spi_rate_khz(),
            auth: AuthConfig::default(),
        }
    }
}

impl AdapterConfig {
    /// Parses and validates a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self, AdapterError> {
        let config: Self =
            toml::from_str(text).map_err(|e| AdapterError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, AdapterError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| AdapterError::InvalidConfig(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    /// Checks value ranges and secret lengths.
    pub fn validate(&self) -> Result<(), AdapterError> {
        if self.timeout_ms == 0 {
            return Err(AdapterError::InvalidConfig("timeout_ms must be > 0".into()));
        }
        if self.spi_rate_khz == 0 {
            return Err(AdapterError::InvalidConfig(
                "spi_rate_khz must be > 0".into(),
            ));
        }
        self.auth.validate()
    }

    /// Channel parameters handed to the co-processor at open.
    pub fn comms_params(&self) -> CommsParams {
        CommsParams {
            startup_delay: Duration::from_millis(u64::from(self.startup_delay_ms)),
            timeout: Duration::from_millis(u64::from(self.timeout_ms)),
            spi_rate_khz: self.spi_rate_khz,
        }
    }
}

/// Role names accepted in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleName {
    /// Unauthenticated role.
    Everyone,
    /// Approved user.
    #[default]
    Approved,
    /// Non-approved user.
    Unapproved,
    /// Manufacturer.
    Manufacturer,
}

impl From<RoleName> for Role {
    fn from(name: RoleName) -> Self {
        match name {
            RoleName::Everyone => Role::Everyone,
            RoleName::Approved => Role::ApprovedUser,
            RoleName::Unapproved => Role::NonApprovedUser,
            RoleName::Manufacturer => Role::Manufacturer,
        }
    }
}

/// Authentication settings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthConfig {
    /// User id to authenticate as.
    #[serde(default)]
    pub user_id: u8,

    /// Role requested for the session.
    #[serde(default)]
    pub role: RoleName,

    /// Authentication method and its secrets.
    #[serde(flatten)]
    pub method: AuthMethod,
}

impl AuthConfig {
    fn validate(&self) -> Result<(), AdapterError> {
        if self.user_id > MAX_USER_ID {
            return Err(AdapterError::InvalidConfig(format!(
                "user_id must be <= {MAX_USER_ID}, got {}",
                self.user_id
            )));
        }

        match &self.method {
            AuthMethod::None => Ok(()),
            AuthMethod::Pin { pin } => {
                if !PIN_LENGTH.contains(&pin.len()) {
                    return Err(AdapterError::InvalidConfig(format!(
                        "pin must be {} to {} bytes, got {}",
                        PIN_LENGTH.start(),
                        PIN_LENGTH.end(),
                        pin.len()
                    )));
                }
                Ok(())
            }
            AuthMethod::Scp03 { mac, enc } => {
                for (name, key) in [("mac", mac), ("enc", enc)] {
                    if key.len() != SCP03_KEY_SIZE {
                        return Err(AdapterError::InvalidConfig(format!(
                            "{name} must be {SCP03_KEY_SIZE} bytes, got {}",
                            key.len()
                        )));
                    }
                }
                Ok(())
            }
            AuthMethod::Kdf { key, .. } => {
                if key.is_empty() {
                    return Err(AdapterError::InvalidConfig("kdf key is empty".into()));
                }
                Ok(())
            }
        }
    }
}

/// How the adapter authenticates at init.
#[derive(Clone, Default, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum AuthMethod {
    /// Stay unauthenticated.
    #[default]
    None,

    /// Password.
    Pin {
        /// Password bytes, hex in configuration.
        #[serde(deserialize_with = "hex_secret")]
        pin: Zeroizing<Vec<u8>>,
    },

    /// Secure channel with fixed keys.
    Scp03 {
        /// MAC key, hex in configuration.
        #[serde(deserialize_with = "hex_secret")]
        mac: Zeroizing<Vec<u8>>,
        /// Encryption key, hex in configuration.
        #[serde(deserialize_with = "hex_secret")]
        enc: Zeroizing<Vec<u8>>,
    },

    /// Secure channel with keys derived from the chip identity.
    Kdf {
        /// Derivation key, hex in configuration.
        #[serde(deserialize_with = "hex_secret")]
        key: Zeroizing<Vec<u8>>,
        /// Label mixed into the derivation.
        #[serde(default)]
        label: String,
    },
}

impl AuthMethod {
    /// Method name as written in configuration.
    pub fn name(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Pin { .. } => "pin",
            Self::Scp03 { .. } => "scp03",
            Self::Kdf { .. } => "kdf",
        }
    }
}

impl fmt::Debug for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Pin { .. } => f.debug_struct("Pin").field("pin", &"[REDACTED]").finish(),
            Self::Scp03 { .. } => f
                .debug_struct("Scp03")
                .field("mac", &"[REDACTED]")
                .field("enc", &"[REDACTED]")
                .finish(),
            Self::Kdf { label, .. } => f
                .debug_struct("Kdf")
                .field("key", &"[REDACTED]")
                .field("label", label)
                .finish(),
        }
    }
}

fn hex_secret<'de, D>(deserializer: D) -> Result<Zeroizing<Vec<u8>>, D::Error>
where
    D: Deserializer<'de>,
{
    let text = Zeroizing::new(String::deserialize(deserializer)?);
    hex::decode(text.as_str())
        .map(Zeroizing::new)
        .map_err(serde::de::Error::custom)
}
