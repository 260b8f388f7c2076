//! Commands of the recovery-signer tool.
//!
//! - [`mock`]: build the whole chain locally, with this tool as root authority
//! - [`remote`]: obtain a serial for a real device from a signing server
//! - [`verify`]: check assertion files against the local trust database

pub mod mock;
pub mod remote;
pub mod verify;
