//! Find-or-create construction of the account → account-key → model → serial
//! chain.
//!
//! The chain is built strictly bottom-up. A step whose parent is missing
//! fails immediately and produces nothing; the caller fixes the missing
//! prerequisite and re-runs.

use chrono::{SecondsFormat, Utc};
use recovery_core::ChainConfig;
use recovery_crypto::{encode_public_key, KeyId, Keypair, RsaPublicKey};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info};

use crate::assertion::{Assertion, AssertionType};
use crate::database::Database;
use crate::trusted::RootAuthority;
use crate::{codec, AssertionError, Result};

/// Device-class metadata of a model assertion. The brand is also the
/// signing authority.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelFields {
    pub series: String,
    pub brand_id: String,
    pub model: String,
    pub revision: u32,
    pub core: String,
    pub architecture: String,
    pub class: String,
    pub gadget: String,
    pub kernel: String,
    pub store: String,
}

impl From<&ChainConfig> for ModelFields {
    fn from(chain: &ChainConfig) -> Self {
        Self {
            series: chain.series.clone(),
            brand_id: chain.account_id.clone(),
            model: chain.model.clone(),
            revision: chain.revision,
            core: chain.core.clone(),
            architecture: chain.architecture.clone(),
            class: chain.class.clone(),
            gadget: chain.gadget.clone(),
            kernel: chain.kernel.clone(),
            store: chain.store.clone(),
        }
    }
}

/// Identity of one device of a model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialFields {
    pub series: String,
    pub brand_id: String,
    pub model: String,
    pub serial: String,
    pub revision: u32,
}

impl From<&ChainConfig> for SerialFields {
    fn from(chain: &ChainConfig) -> Self {
        Self {
            series: chain.series.clone(),
            brand_id: chain.account_id.clone(),
            model: chain.model.clone(),
            serial: chain.serial.clone(),
            revision: chain.revision,
        }
    }
}

/// Builds and stores trust-chain assertions over one database.
pub struct TrustChainBuilder {
    db: Database,
    root: RootAuthority,
}

impl TrustChainBuilder {
    /// Wrap an open database. The root authority's key must be one of the
    /// database's trusted roots.
    pub fn new(db: Database, root: RootAuthority) -> Result<Self> {
        let query = [
            ("account-id", root.account_id()),
            ("public-key-sha3-384", root.keypair().id().as_str()),
        ];
        let trusted = db
            .trusted()
            .iter()
            .any(|t| t.assertion_type() == AssertionType::AccountKey && t.matches(&query));
        if !trusted {
            return Err(AssertionError::UntrustedSigner {
                assertion_type: AssertionType::AccountKey.to_string(),
                primary_key: format!("[{:?},{:?}]", root.account_id(), root.keypair().id().as_str()),
                key_id: root.keypair().id().to_string(),
                reason: "root authority key is not a trusted root of this database".to_string(),
            });
        }
        Ok(Self { db, root })
    }

    /// Open the database at `storage_path` trusting `root`'s own assertions.
    pub fn open(storage_path: impl AsRef<Path>, root: RootAuthority) -> Result<Self> {
        let db = Database::open(storage_path, root.trusted_assertions()?)?;
        Self::new(db, root)
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn database_mut(&mut self) -> &mut Database {
        &mut self.db
    }

    pub fn root(&self) -> &RootAuthority {
        &self.root
    }

    pub fn into_database(self) -> Database {
        self.db
    }

    /// Existing account assertion for `account_id`, or a new one signed by
    /// the root authority.
    pub fn ensure_account(&mut self, account_id: &str) -> Result<Assertion> {
        match self.db.find(AssertionType::Account, &[("account-id", account_id)]) {
            Ok(existing) => {
                debug!(account_id = %account_id, "Reusing account assertion");
                return Ok(existing);
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }

        let timestamp = now();
        let headers = header_map(&[
            ("authority-id", self.root.account_id()),
            ("account-id", account_id),
            ("display-name", account_id),
            ("timestamp", timestamp.as_str()),
            ("username", account_id),
            ("validation", "certified"),
        ]);
        let account = codec::sign(AssertionType::Account, headers, None, self.root.keypair())?;
        self.db.add(&account)?;

        info!(account_id = %account_id, "Created account assertion");
        Ok(account)
    }

    /// Existing account-key binding `keypair` to `account_id`, or a new one
    /// signed by the root authority. The private key is imported so the
    /// database can sign for the account.
    pub fn ensure_account_key(&mut self, account_id: &str, keypair: &Keypair) -> Result<Assertion> {
        let key_id = keypair.id();
        let account_key = match self.db.find(
            AssertionType::AccountKey,
            &[("account-id", account_id), ("public-key-sha3-384", key_id.as_str())],
        ) {
            Ok(existing) => {
                debug!(account_id = %account_id, key_id = %key_id, "Reusing account-key assertion");
                existing
            }
            Err(e) if e.is_not_found() => {
                let since = now();
                let headers = header_map(&[
                    ("authority-id", self.root.account_id()),
                    ("public-key-sha3-384", key_id.as_str()),
                    ("account-id", account_id),
                    ("since", since.as_str()),
                ]);
                let body = encode_public_key(keypair.public_key())?.into_bytes();
                let created = codec::sign(
                    AssertionType::AccountKey,
                    headers,
                    Some(body),
                    self.root.keypair(),
                )?;
                self.db.add(&created)?;
                info!(account_id = %account_id, key_id = %key_id, "Created account-key assertion");
                created
            }
            Err(e) => return Err(e),
        };

        match self.db.signing_key(account_id, key_id) {
            Ok(_) => {}
            Err(AssertionError::KeyNotFound { .. }) => self.db.import_key(account_id, keypair)?,
            Err(e) => return Err(e),
        }
        Ok(account_key)
    }

    /// Model assertion for `fields`, signed by the brand's delegated key.
    ///
    /// Rebuilding an already stored model with the same fields and key
    /// returns the stored assertion.
    pub fn build_model(&mut self, signing_key: &Keypair, fields: &ModelFields) -> Result<Assertion> {
        self.require_delegation(&fields.brand_id, signing_key.id())?;

        let revision = fields.revision.to_string();
        let headers = header_map(&[
            ("series", fields.series.as_str()),
            ("authority-id", fields.brand_id.as_str()),
            ("brand-id", fields.brand_id.as_str()),
            ("model", fields.model.as_str()),
            ("revision", revision.as_str()),
            ("core", fields.core.as_str()),
            ("architecture", fields.architecture.as_str()),
            ("class", fields.class.as_str()),
            ("gadget", fields.gadget.as_str()),
            ("kernel", fields.kernel.as_str()),
            ("store", fields.store.as_str()),
        ]);
        let model = codec::sign(AssertionType::Model, headers, None, signing_key)?;
        self.store(model)
    }

    /// Serial assertion binding `device_key` to `fields`, signed by the
    /// brand's delegated key. Used where this tool is the signing authority.
    pub fn build_serial(
        &mut self,
        signing_key: &Keypair,
        device_key: &RsaPublicKey,
        fields: &SerialFields,
    ) -> Result<Assertion> {
        self.require_delegation(&fields.brand_id, signing_key.id())?;

        let device_key_id = KeyId::of(device_key)?;
        let revision = fields.revision.to_string();
        let headers = header_map(&[
            ("series", fields.series.as_str()),
            ("authority-id", fields.brand_id.as_str()),
            ("brand-id", fields.brand_id.as_str()),
            ("model", fields.model.as_str()),
            ("serial", fields.serial.as_str()),
            ("revision", revision.as_str()),
            ("device-key-sha3-384", device_key_id.as_str()),
        ]);
        let body = encode_public_key(device_key)?.into_bytes();
        let serial = codec::sign(AssertionType::Serial, headers, Some(body), signing_key)?;
        self.store(serial)
    }

    fn require_delegation(&self, account_id: &str, key_id: &KeyId) -> Result<()> {
        match self.db.find(AssertionType::Account, &[("account-id", account_id)]) {
            Ok(_) => {}
            Err(e) if e.is_not_found() => {
                return Err(AssertionError::UnknownAccount {
                    account_id: account_id.to_string(),
                })
            }
            Err(e) => return Err(e),
        }
        match self.db.find(
            AssertionType::AccountKey,
            &[("account-id", account_id), ("public-key-sha3-384", key_id.as_str())],
        ) {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => Err(AssertionError::UnknownAccountKey {
                account_id: account_id.to_string(),
                key_id: key_id.to_string(),
            }),
            Err(e) => Err(e),
        }
    }

    fn store(&mut self, assertion: Assertion) -> Result<Assertion> {
        let assertion_type = assertion.assertion_type();
        match self.db.find(assertion_type, &assertion.primary_key_query()) {
            Ok(existing) if existing == assertion => {
                debug!(
                    assertion_type = %assertion_type,
                    primary_key = %assertion.primary_key_string(),
                    "Assertion already stored"
                );
                return Ok(existing);
            }
            Ok(_) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }

        self.db.add(&assertion)?;
        info!(
            assertion_type = %assertion_type,
            primary_key = %assertion.primary_key_string(),
            revision = assertion.revision(),
            "Built assertion"
        );
        Ok(assertion)
    }
}

fn header_map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}
