//! Error types for assertion handling.
//!
//! Every variant that concerns a specific assertion carries its type and
//! primary-key values so a failed run can be diagnosed from the log alone.

use thiserror::Error;

use recovery_crypto::KeyStoreError;

/// Errors that can occur while encoding, storing, or building assertions.
#[derive(Debug, Error)]
pub enum AssertionError {
    /// Wire form could not be parsed
    #[error("Decode error: {0}")]
    Decode(String),

    /// A header name or value cannot be encoded
    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    /// The signer cannot be traced to a trusted root, or the signature is bad
    #[error("Untrusted signer for {assertion_type} {primary_key} (key {key_id}): {reason}")]
    UntrustedSigner {
        assertion_type: String,
        primary_key: String,
        key_id: String,
        reason: String,
    },

    /// An assertion with the same primary key and an equal or newer revision exists
    #[error("Duplicate {assertion_type} {primary_key}: revision {existing_revision} already stored")]
    Duplicate {
        assertion_type: String,
        primary_key: String,
        existing_revision: u32,
    },

    /// No assertion matches the query
    #[error("{assertion_type} not found for {query}")]
    NotFound {
        assertion_type: String,
        query: String,
    },

    /// More than one assertion matches a partial query
    #[error("{count} {assertion_type} assertions match {query}")]
    Ambiguous {
        assertion_type: String,
        query: String,
        count: usize,
    },

    /// Query uses headers that are not part of the type's primary key
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// The account an operation depends on has no account assertion
    #[error("Unknown account: {account_id}")]
    UnknownAccount { account_id: String },

    /// The account has no account-key for the signing key in use
    #[error("Account {account_id} has no account-key {key_id}")]
    UnknownAccountKey { account_id: String, key_id: String },

    /// No imported private key for the account
    #[error("No private key {key_id} imported for account {account_id}")]
    KeyNotFound { account_id: String, key_id: String },

    /// Operation not supported for this assertion type
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Backing storage is inaccessible
    #[error("Storage error: {0}")]
    Storage(String),

    /// SQLite failure
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Key handling failure
    #[error("Key error: {0}")]
    Key(#[from] KeyStoreError),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AssertionError {
    /// Whether this is a plain "nothing stored" result.
    pub fn is_not_found(&self) -> bool {
        matches!(self, AssertionError::NotFound { .. })
    }
}

/// Result type for assertion operations.
pub type Result<T> = std::result::Result<T, AssertionError>;
