//! Assertions and the trust chain for recovery images.
//!
//! An assertion is a signed, typed document stating one fact of the chain:
//!
//! - **account**: an organization, signed by the root authority
//! - **account-key**: a delegated signing key of an account, signed by the root authority
//! - **model**: a device class of a brand, signed by the brand's delegated key
//! - **serial**: one device's public key, signed by the brand's delegated key
//! - **serial-request**: a device-signed request for a serial, never stored
//!
//! [`codec`] defines the canonical wire form, [`Database`] stores assertions
//! only after tracing their signer back to a trusted root, and
//! [`TrustChainBuilder`] materializes the chain with find-or-create semantics.

pub mod assertion;
pub mod builder;
pub mod codec;
pub mod database;
pub mod error;
pub mod export;
pub mod trusted;

pub use assertion::{Assertion, AssertionType};
pub use builder::{ModelFields, SerialFields, TrustChainBuilder};
pub use database::{Database, DatabaseMetrics, DATABASE_FILE, PRIVATE_KEYS_DIR};
pub use error::{AssertionError, Result};
pub use export::{KeypairSummary, ModelSummary};
pub use trusted::{RootAuthority, ROOT_ASSERTION_TIMESTAMP};
