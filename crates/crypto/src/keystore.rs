//! Local key storage: generation, ASCII armor, and on-disk persistence.
//!
//! Private keys are armored as PKCS#8 PEM. Loading also accepts the older
//! PKCS#1 `RSA PRIVATE KEY` armor so keys produced by other tooling can be
//! reused. Saved files are written atomically with owner-only permissions.

use rand::rngs::OsRng;
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::{DecodePrivateKey, EncodePrivateKey, LineEnding};
use rsa::RsaPrivateKey;
use std::path::Path;
use tracing::{debug, info};
use zeroize::Zeroizing;

use crate::keys::{KeyId, Keypair};
use crate::{secure_file, KeyStoreError, Result};

/// Smallest accepted modulus.
pub const MIN_KEY_BITS: usize = 2048;

/// Recommended modulus for account, device, and authority keys.
pub const RECOMMENDED_KEY_BITS: usize = 4096;

/// Generate a new RSA keypair.
///
/// Blocks while the OS gathers entropy. Fails with
/// [`KeyStoreError::Generation`] for moduli below [`MIN_KEY_BITS`] or sizes
/// that are not a multiple of 8.
pub fn generate(bits: usize) -> Result<Keypair> {
    if bits < MIN_KEY_BITS || bits % 8 != 0 {
        return Err(KeyStoreError::Generation(format!(
            "invalid key size {} (must be a multiple of 8 and at least {})",
            bits, MIN_KEY_BITS
        )));
    }

    debug!(bits, "Generating RSA keypair");
    let private = RsaPrivateKey::new(&mut OsRng, bits)
        .map_err(|e| KeyStoreError::Generation(e.to_string()))?;
    let keypair = Keypair::from_private_key(private)?;
    info!(key_id = %keypair.id(), bits, "Generated keypair");
    Ok(keypair)
}

/// Armor a private key as PKCS#8 PEM.
pub fn armor(keypair: &Keypair) -> Result<Zeroizing<String>> {
    keypair
        .private_key()
        .to_pkcs8_pem(LineEnding::LF)
        .map_err(|e| KeyStoreError::Format(format!("cannot armor private key: {}", e)))
}

/// Parse an armored private key.
pub fn parse_armored(armored: &str) -> Result<Keypair> {
    let private = RsaPrivateKey::from_pkcs8_pem(armored)
        .or_else(|_| RsaPrivateKey::from_pkcs1_pem(armored))
        .map_err(|e| KeyStoreError::Format(format!("unrecognized private key armor: {}", e)))?;
    Keypair::from_private_key(private)
}

/// Load an armored private key from disk.
pub fn load(path: &Path) -> Result<Keypair> {
    let armored = Zeroizing::new(std::fs::read_to_string(path)?);
    secure_file::check_permissions(path)?;
    let keypair = parse_armored(&armored).map_err(|e| match e {
        KeyStoreError::Format(reason) => {
            KeyStoreError::Format(format!("{}: {}", path.display(), reason))
        }
        other => other,
    })?;
    debug!(path = %path.display(), key_id = %keypair.id(), "Loaded keypair");
    Ok(keypair)
}

/// Persist a private key atomically with owner-only permissions.
pub fn save(path: &Path, keypair: &Keypair) -> Result<()> {
    let armored = armor(keypair)?;
    secure_file::write_atomic(path, armored.as_bytes())?;
    info!(path = %path.display(), key_id = %keypair.id(), "Saved keypair");
    Ok(())
}

/// Content-derived identifier of a keypair's public half.
pub fn id(keypair: &Keypair) -> &KeyId {
    keypair.id()
}

/// A key obtained by [`load_or_generate`].
#[derive(Debug)]
pub struct ProvisionedKey {
    pub keypair: Keypair,
    /// Whether the key was generated during this call
    pub generated: bool,
}

/// Reuse the key at `path` if present, otherwise generate and save one.
///
/// A file that exists but cannot be parsed is an error; it is never
/// silently replaced.
pub fn load_or_generate(path: &Path, bits: usize) -> Result<ProvisionedKey> {
    if path.exists() {
        let keypair = load(path)?;
        info!(path = %path.display(), key_id = %keypair.id(), "Reusing existing key");
        return Ok(ProvisionedKey {
            keypair,
            generated: false,
        });
    }

    let keypair = generate(bits)?;
    save(path, &keypair)?;
    Ok(ProvisionedKey {
        keypair,
        generated: true,
    })
}
