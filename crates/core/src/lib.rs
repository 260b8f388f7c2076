//! Shared plumbing for the recovery image signing tools.
//!
//! This crate holds what every other crate in the workspace needs and nothing
//! more: the typed configuration file, logging setup, the build stamp, and
//! the core error type.

pub mod build_info;
pub mod config;
pub mod error;
pub mod logging;

pub use build_info::BuildInfo;
pub use config::{
    AuthorityConfig, ChainConfig, Config, KeystoreConfig, OutputConfig, SigningConfig,
    DEFAULT_KEY_BITS, MIN_KEY_BITS,
};
pub use error::{Error, Result};
