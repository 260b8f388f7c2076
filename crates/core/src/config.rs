//! Configuration management for the recovery signing tools.
//!
//! The whole tool is driven by one TOML file. Every field has a default so a
//! partial file is valid; [`Config::validate`] rejects values that would only
//! fail later in the run (short keys, missing account IDs, a server URL
//! without an API key).

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::{Error, Result};

/// Smallest RSA modulus accepted for any generated key.
pub const MIN_KEY_BITS: usize = 2048;

/// Modulus size used when the configuration does not name one.
pub const DEFAULT_KEY_BITS: usize = 4096;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub keystore: KeystoreConfig,
    pub authority: AuthorityConfig,
    pub chain: ChainConfig,
    pub signing: SigningConfig,
    pub output: OutputConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeystoreConfig {
    /// Directory holding the assertion database and imported private keys
    pub dir: PathBuf,
    /// Armored key of the local root authority (mock path only)
    pub root_key_file: PathBuf,
    /// Armored key delegated to the brand account
    pub account_key_file: PathBuf,
    /// Armored key identifying the device
    pub device_key_file: PathBuf,
    /// Modulus size for newly generated keys
    pub key_bits: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthorityConfig {
    /// Account ID of the local root authority
    pub root_account_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    pub account_id: String,
    pub model: String,
    pub serial: String,
    pub revision: u32,
    pub series: String,
    pub architecture: String,
    pub core: String,
    pub class: String,
    pub gadget: String,
    pub kernel: String,
    pub store: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SigningConfig {
    /// Base URL of the remote signing server. Empty disables remote signing.
    pub server_url: String,
    pub api_key: String,
    pub timeout_secs: u64,
    /// Model assertion the device is requesting a serial for
    pub model_assertion_file: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub account_assertion: PathBuf,
    pub account_key_assertion: PathBuf,
    pub model_assertion: PathBuf,
    pub serial_assertion: PathBuf,
    pub serial_request: PathBuf,
    pub keypair_json: PathBuf,
    pub model_json: PathBuf,
    pub trusted_roots: PathBuf,
}

impl Default for KeystoreConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./keystore"),
            root_key_file: PathBuf::from("root-key.pem"),
            account_key_file: PathBuf::from("account-key.pem"),
            device_key_file: PathBuf::from("device-key.pem"),
            key_bits: DEFAULT_KEY_BITS,
        }
    }
}

impl Default for AuthorityConfig {
    fn default() -> Self {
        Self {
            root_account_id: "testrootorg".to_string(),
        }
    }
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            account_id: "system".to_string(),
            model: "router-3400".to_string(),
            serial: "A1228ML".to_string(),
            revision: 1,
            series: "16".to_string(),
            architecture: "amd64".to_string(),
            core: "ubuntu-core".to_string(),
            class: "fixed".to_string(),
            gadget: "pc".to_string(),
            kernel: "pc-kernel".to_string(),
            store: "brand-store".to_string(),
        }
    }
}

impl Default for SigningConfig {
    fn default() -> Self {
        Self {
            server_url: String::new(),
            api_key: String::new(),
            timeout_secs: 30,
            model_assertion_file: PathBuf::from("model.assertion"),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            account_assertion: PathBuf::from("account.assertion"),
            account_key_assertion: PathBuf::from("account-key.assertion"),
            model_assertion: PathBuf::from("model.assertion"),
            serial_assertion: PathBuf::from("serial.assertion"),
            serial_request: PathBuf::from("serial.request"),
            keypair_json: PathBuf::from("keypair.json"),
            model_json: PathBuf::from("model.json"),
            trusted_roots: PathBuf::from("trusted-roots.assertion"),
        }
    }
}

impl KeystoreConfig {
    pub fn root_key_path(&self) -> PathBuf {
        self.dir.join(&self.root_key_file)
    }

    pub fn account_key_path(&self) -> PathBuf {
        self.dir.join(&self.account_key_file)
    }

    pub fn device_key_path(&self) -> PathBuf {
        self.dir.join(&self.device_key_file)
    }
}

impl SigningConfig {
    /// Whether a remote signing server is configured.
    pub fn remote_enabled(&self) -> bool {
        !self.server_url.trim().is_empty()
    }
}

impl Config {
    /// Load and validate a TOML configuration file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config = Self::from_toml_str(&content)?;
        tracing::debug!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Parse and validate configuration from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)
            .map_err(|e| Error::Config(format!("invalid TOML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Fully defaulted configuration, printed for operators as a template.
    pub fn example() -> Self {
        Self::default()
    }

    /// Render the configuration as TOML.
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }

    /// Check cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.keystore.key_bits < MIN_KEY_BITS {
            return Err(Error::Config(format!(
                "keystore.key_bits must be at least {}, got {}",
                MIN_KEY_BITS, self.keystore.key_bits
            )));
        }

        for (field, value) in [
            ("authority.root_account_id", &self.authority.root_account_id),
            ("chain.account_id", &self.chain.account_id),
            ("chain.model", &self.chain.model),
            ("chain.serial", &self.chain.serial),
            ("chain.series", &self.chain.series),
        ] {
            if value.trim().is_empty() {
                return Err(Error::Config(format!("{} must not be empty", field)));
            }
        }

        if self.chain.revision == 0 {
            return Err(Error::Config("chain.revision must be positive".to_string()));
        }

        if self.signing.remote_enabled() {
            if !self.signing.server_url.starts_with("http://")
                && !self.signing.server_url.starts_with("https://")
            {
                return Err(Error::Config(format!(
                    "signing.server_url must be an http(s) URL, got {}",
                    self.signing.server_url
                )));
            }
            if self.signing.api_key.is_empty() {
                return Err(Error::Config(
                    "signing.api_key is required when signing.server_url is set".to_string(),
                ));
            }
            if self.signing.timeout_secs == 0 {
                return Err(Error::Config(
                    "signing.timeout_secs must be positive".to_string(),
                ));
            }
        }

        Ok(())
    }
}
