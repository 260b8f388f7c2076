//! End-to-end tests for the recovery signing tools
//!
//! This suite validates:
//! - The mock chain: root → account → account-key → model → serial, with artifacts
//! - Remote serial signing against an in-process signing server
//! - Nonce anti-replay as seen from the client
//! - Offline verification of produced assertion files

pub mod test_utils;

#[cfg(test)]
mod mock_chain_tests;

#[cfg(test)]
mod remote_signing_tests;
