//! Core error types

use thiserror::Error;

/// Core error type shared by the recovery tooling
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration could not be read or failed validation
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, Error>;
