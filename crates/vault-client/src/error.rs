//! Error types for the remote signing protocol.

use recovery_identity::AssertionError;
use thiserror::Error;

/// Errors from talking to a signing server.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Transport failure or timeout. Never retried internally.
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The server answered with something other than the expected payload
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The server refused the request
    #[error("Signing server rejected the request (HTTP {status}): {body}")]
    Rejected { status: u16, body: String },

    /// A protocol step was attempted out of order
    #[error("Invalid session state: {0}")]
    InvalidState(String),

    /// The client cannot be set up from the given settings
    #[error("Configuration error: {0}")]
    Config(String),

    /// Building or decoding an assertion failed
    #[error("Assertion error: {0}")]
    Assertion(#[from] AssertionError),
}

/// Result type for signing-server operations.
pub type Result<T> = std::result::Result<T, ClientError>;
