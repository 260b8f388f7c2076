//! Error types for key handling.

use thiserror::Error;

/// Errors that can occur while generating, armoring, or using keys.
#[derive(Debug, Error)]
pub enum KeyStoreError {
    /// Key generation failed (bad modulus size, RNG failure)
    #[error("Key generation failed: {0}")]
    Generation(String),

    /// An armored or encoded key could not be parsed
    #[error("Malformed key: {0}")]
    Format(String),

    /// Signing failed
    #[error("Cryptographic error: {0}")]
    Crypto(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for key operations.
pub type Result<T> = std::result::Result<T, KeyStoreError>;
