//! Root of trust for offline and test environments.
//!
//! Production devices ship the authority's root `account` and `account-key`
//! assertions out of band. For mock and test setups this module plays that
//! authority: it holds the root keypair and produces the self-signed root
//! assertions that seed a [`crate::Database`].

use recovery_crypto::{encode_public_key, Keypair};
use std::collections::BTreeMap;

use crate::assertion::{Assertion, AssertionType};
use crate::{codec, Result};

/// Timestamp stamped on root assertions so they are reproducible across runs.
pub const ROOT_ASSERTION_TIMESTAMP: &str = "2016-08-11T16:30:57Z";

/// The root signing authority: signs account and account-key assertions.
#[derive(Debug, Clone)]
pub struct RootAuthority {
    account_id: String,
    keypair: Keypair,
}

impl RootAuthority {
    pub fn new(account_id: impl Into<String>, keypair: Keypair) -> Self {
        Self {
            account_id: account_id.into(),
            keypair,
        }
    }

    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    pub fn keypair(&self) -> &Keypair {
        &self.keypair
    }

    /// Self-signed root `account` assertion.
    pub fn root_account(&self) -> Result<Assertion> {
        let headers: BTreeMap<String, String> = [
            ("authority-id", self.account_id.as_str()),
            ("account-id", self.account_id.as_str()),
            ("display-name", self.account_id.as_str()),
            ("timestamp", ROOT_ASSERTION_TIMESTAMP),
            ("username", self.account_id.as_str()),
            ("validation", "certified"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        codec::sign(AssertionType::Account, headers, None, &self.keypair)
    }

    /// Self-signed root `account-key` assertion binding the root key.
    pub fn root_account_key(&self) -> Result<Assertion> {
        let key_id = self.keypair.id().to_string();
        let headers: BTreeMap<String, String> = [
            ("authority-id", self.account_id.as_str()),
            ("public-key-sha3-384", key_id.as_str()),
            ("account-id", self.account_id.as_str()),
            ("since", ROOT_ASSERTION_TIMESTAMP),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        let body = encode_public_key(self.keypair.public_key())?.into_bytes();
        codec::sign(AssertionType::AccountKey, headers, Some(body), &self.keypair)
    }

    /// Both root assertions, in the order a database expects them.
    pub fn trusted_assertions(&self) -> Result<Vec<Assertion>> {
        Ok(vec![self.root_account()?, self.root_account_key()?])
    }
}
