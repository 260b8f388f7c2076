//! Key management for the recovery image trust chain.
//!
//! This crate is the local keystore: it generates RSA signing keys, armors and
//! persists them with owner-only permissions, derives the content-based key
//! IDs used to name signers in assertions, and produces/checks the detached
//! signatures those assertions carry.
//!
//! # Algorithms
//!
//! - **Keys**: RSA, 4096 bits recommended, 2048 minimum
//! - **Signatures**: RSASSA-PKCS1-v1_5 over SHA-512
//! - **Key IDs**: SHA3-384 of the DER public key, URL-safe base64
//! - **Armor**: PKCS#8 PEM
//!
//! # Security Principles
//!
//! - Private keys are only written through [`secure_file::write_atomic`]
//! - Armored key text is held in zeroizing buffers
//! - Keys and API secrets are never logged

pub mod error;
pub mod keys;
pub mod keystore;
pub mod secure_file;
pub mod signing;

pub use error::{KeyStoreError, Result};
pub use keys::{
    decode_public_key, decode_wrapped_base64, encode_public_key, public_key_der, wrap_base64,
    KeyId, Keypair, BASE64_LINE_WIDTH,
};
pub use keystore::{
    armor, generate, load, load_or_generate, parse_armored, save, ProvisionedKey, MIN_KEY_BITS,
    RECOMMENDED_KEY_BITS,
};
pub use signing::{sign_message, verify_message};

pub use rsa::RsaPublicKey;
