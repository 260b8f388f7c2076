//! Assertion database
//!
//! Persistent, trust-checked store of assertions plus the private keys
//! imported for signing on behalf of accounts.
//!
//! # Layout
//!
//! ```text
//! <storage>/assertions.db           SQLite (WAL), one row per primary key
//! <storage>/private-keys-v1/<id>    imported private keys, mode 0600
//! ```
//!
//! # Trust
//!
//! An assertion is accepted only when its signer resolves to an
//! `account-key` whose `account-id` equals the assertion's `authority-id` and
//! whose key ID equals `sign-key-sha3-384`, and that account-key itself
//! chains back to a trusted root. `account` and `account-key` assertions must
//! be signed directly by a trusted root key. Assertions read back from disk
//! are re-verified; rows that no longer verify are skipped.

use recovery_crypto::{keystore, secure_file, KeyId, Keypair, RsaPublicKey};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::assertion::{render_primary_key, Assertion, AssertionType, AUTHORITY_ID};
use crate::{codec, AssertionError, Result};

/// SQLite file inside the storage directory.
pub const DATABASE_FILE: &str = "assertions.db";

/// Directory of imported private keys inside the storage directory.
pub const PRIVATE_KEYS_DIR: &str = "private-keys-v1";

/// Longest signer chain followed when verifying.
const MAX_CHAIN_DEPTH: usize = 8;

/// Counters for database activity
#[derive(Debug, Default, Clone)]
pub struct DatabaseMetrics {
    /// Assertions stored by `add`
    pub assertions_added_total: u64,
    /// Assertions refused by `add`
    pub assertions_rejected_total: u64,
    /// Stored rows skipped on read because they no longer verify
    pub assertions_unverifiable_total: u64,
}

/// Trust-checked assertion store.
pub struct Database {
    conn: Connection,
    storage_path: PathBuf,
    trusted: Vec<Assertion>,
    metrics: DatabaseMetrics,
}

impl Database {
    /// Open or create a database under `storage_path`.
    ///
    /// # Arguments
    /// * `storage_path` - Directory holding the database and imported keys
    /// * `trusted_roots` - Root `account` and `account-key` assertions
    ///
    /// # Returns
    /// * `Err(AssertionError::Storage)` - The directory or database is inaccessible
    /// * `Err(AssertionError::Unsupported)` - A trusted root is not an account or account-key
    pub fn open(storage_path: impl AsRef<Path>, trusted_roots: Vec<Assertion>) -> Result<Self> {
        let storage_path = storage_path.as_ref().to_path_buf();

        info!(
            path = %storage_path.display(),
            trusted_roots = trusted_roots.len(),
            "Opening assertion database"
        );

        for root in &trusted_roots {
            match root.assertion_type() {
                AssertionType::Account | AssertionType::AccountKey => {}
                other => {
                    return Err(AssertionError::Unsupported(format!(
                        "{} assertions cannot be trusted roots",
                        other
                    )))
                }
            }
        }

        secure_file::create_secure_dir(&storage_path).map_err(|e| {
            AssertionError::Storage(format!("cannot create {}: {}", storage_path.display(), e))
        })?;
        secure_file::create_secure_dir(&storage_path.join(PRIVATE_KEYS_DIR)).map_err(|e| {
            AssertionError::Storage(format!(
                "cannot create key directory in {}: {}",
                storage_path.display(),
                e
            ))
        })?;

        let db_path = storage_path.join(DATABASE_FILE);
        let conn = Connection::open_with_flags(
            &db_path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| AssertionError::Storage(format!("cannot open {}: {}", db_path.display(), e)))?;

        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        Self::init_schema(&conn)?;

        Ok(Self {
            conn,
            storage_path,
            trusted: trusted_roots,
            metrics: DatabaseMetrics::default(),
        })
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS assertions (
                assertion_type TEXT NOT NULL,
                primary_key TEXT NOT NULL,
                revision INTEGER NOT NULL,
                encoded BLOB NOT NULL,
                stored_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now') * 1000),
                PRIMARY KEY (assertion_type, primary_key)
            );

            CREATE TABLE IF NOT EXISTS private_keys (
                key_id TEXT PRIMARY KEY,
                account_id TEXT NOT NULL,
                imported_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now') * 1000)
            );

            CREATE INDEX IF NOT EXISTS idx_assertion_type ON assertions(assertion_type);
            "#,
        )?;
        Ok(())
    }

    /// Trusted root assertions this database was opened with.
    pub fn trusted(&self) -> &[Assertion] {
        &self.trusted
    }

    pub fn storage_path(&self) -> &Path {
        &self.storage_path
    }

    pub fn metrics(&self) -> &DatabaseMetrics {
        &self.metrics
    }

    /// Check that `assertion` could be added: its prerequisites are present
    /// and its signer chains to a trusted root. Nothing is stored.
    pub fn check(&self, assertion: &Assertion) -> Result<()> {
        let assertion_type = assertion.assertion_type();
        if !assertion_type.is_storable() {
            return Err(AssertionError::Unsupported(format!(
                "{} assertions are not stored",
                assertion_type
            )));
        }

        match assertion_type {
            AssertionType::AccountKey => {
                let declared = assertion.declared_key_id().unwrap_or_default();
                let actual = KeyId::of(&assertion.body_public_key()?)?;
                if declared != actual {
                    return Err(AssertionError::InvalidHeader(format!(
                        "public-key-sha3-384 {} does not match body key {}",
                        declared, actual
                    )));
                }
                let account_id = assertion.header("account-id").unwrap_or_default();
                self.require_account(account_id)?;
            }
            AssertionType::Model | AssertionType::Serial => {
                let brand = assertion.header("brand-id").unwrap_or_default();
                if brand != assertion.authority_id() {
                    return Err(AssertionError::InvalidHeader(format!(
                        "{} brand-id {} differs from authority-id {}",
                        assertion_type,
                        brand,
                        assertion.authority_id()
                    )));
                }
            }
            _ => {}
        }

        self.verify_chain(assertion, 0)
            .map_err(|reason| AssertionError::UntrustedSigner {
                assertion_type: assertion_type.to_string(),
                primary_key: assertion.primary_key_string(),
                key_id: assertion.sign_key_id().to_string(),
                reason,
            })
    }

    /// Verify and store `assertion`.
    ///
    /// A stored assertion with the same primary key is replaced only by a
    /// strictly higher revision; otherwise `Duplicate` is returned.
    pub fn add(&mut self, assertion: &Assertion) -> Result<()> {
        match self.add_internal(assertion) {
            Ok(()) => {
                self.metrics.assertions_added_total += 1;
                Ok(())
            }
            Err(e) => {
                self.metrics.assertions_rejected_total += 1;
                warn!(
                    assertion_type = %assertion.assertion_type(),
                    primary_key = %assertion.primary_key_string(),
                    error = %e,
                    "Rejected assertion"
                );
                Err(e)
            }
        }
    }

    fn add_internal(&mut self, assertion: &Assertion) -> Result<()> {
        self.check(assertion)?;

        let assertion_type = assertion.assertion_type();
        let primary_key = assertion.primary_key_string();
        let revision = assertion.revision();

        if let Some(root) = self
            .trusted
            .iter()
            .find(|t| t.assertion_type() == assertion_type && t.primary_key() == assertion.primary_key())
        {
            return Err(AssertionError::Duplicate {
                assertion_type: assertion_type.to_string(),
                primary_key,
                existing_revision: root.revision(),
            });
        }

        let tx = self.conn.transaction()?;
        let existing: Option<u32> = tx
            .query_row(
                "SELECT revision FROM assertions WHERE assertion_type = ?1 AND primary_key = ?2",
                params![assertion_type.as_str(), primary_key],
                |row| row.get(0),
            )
            .optional()?;

        if let Some(existing_revision) = existing {
            if existing_revision >= revision {
                return Err(AssertionError::Duplicate {
                    assertion_type: assertion_type.to_string(),
                    primary_key,
                    existing_revision,
                });
            }
        }

        tx.execute(
            "INSERT OR REPLACE INTO assertions (assertion_type, primary_key, revision, encoded)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                assertion_type.as_str(),
                primary_key,
                revision,
                codec::encode(assertion)
            ],
        )?;
        tx.commit()?;

        info!(
            assertion_type = %assertion_type,
            primary_key = %primary_key,
            revision,
            replaced = existing.is_some(),
            "Stored assertion"
        );
        Ok(())
    }

    /// Every trusted or stored assertion of `assertion_type` matching `query`.
    ///
    /// `query` names a non-empty subset of the type's primary-key headers.
    pub fn find_many(
        &self,
        assertion_type: AssertionType,
        query: &[(&str, &str)],
    ) -> Result<Vec<Assertion>> {
        if query.is_empty() {
            return Err(AssertionError::InvalidQuery(format!(
                "{} query needs at least one of {:?}",
                assertion_type,
                assertion_type.primary_key()
            )));
        }
        for (name, _) in query {
            if !assertion_type.primary_key().contains(name) {
                return Err(AssertionError::InvalidQuery(format!(
                    "{} is not a primary-key header of {}",
                    name, assertion_type
                )));
            }
        }

        let mut found: Vec<Assertion> = self
            .trusted
            .iter()
            .filter(|t| t.assertion_type() == assertion_type && t.matches(query))
            .cloned()
            .collect();

        let candidates: Vec<Assertion> = match full_primary_key(assertion_type, query) {
            Some(primary_key) => self
                .stored_by_key(assertion_type, &primary_key)?
                .into_iter()
                .collect(),
            None => self.stored(assertion_type)?,
        };
        for assertion in candidates {
            if !assertion.matches(query) {
                continue;
            }
            match self.verify_chain(&assertion, 0) {
                Ok(()) => found.push(assertion),
                Err(reason) => warn!(
                    assertion_type = %assertion_type,
                    primary_key = %assertion.primary_key_string(),
                    reason = %reason,
                    "Skipping stored assertion that no longer verifies"
                ),
            }
        }

        debug!(
            assertion_type = %assertion_type,
            query = %format_query(query),
            matches = found.len(),
            "Assertion lookup"
        );
        Ok(found)
    }

    /// The single assertion of `assertion_type` matching `query`.
    pub fn find(&self, assertion_type: AssertionType, query: &[(&str, &str)]) -> Result<Assertion> {
        let mut found = self.find_many(assertion_type, query)?;
        match found.len() {
            0 => Err(AssertionError::NotFound {
                assertion_type: assertion_type.to_string(),
                query: format_query(query),
            }),
            1 => Ok(found.remove(0)),
            count => Err(AssertionError::Ambiguous {
                assertion_type: assertion_type.to_string(),
                query: format_query(query),
                count,
            }),
        }
    }

    /// Persist `keypair` as a signing key of `account_id`.
    ///
    /// The account must already be known.
    pub fn import_key(&mut self, account_id: &str, keypair: &Keypair) -> Result<()> {
        self.require_account(account_id)?;

        let path = self.key_path(keypair.id());
        keystore::save(&path, keypair)?;
        self.conn.execute(
            "INSERT OR REPLACE INTO private_keys (key_id, account_id) VALUES (?1, ?2)",
            params![keypair.id().as_str(), account_id],
        )?;

        info!(account_id = %account_id, key_id = %keypair.id(), "Imported signing key");
        Ok(())
    }

    /// Load the imported private key `key_id` of `account_id`.
    pub fn signing_key(&self, account_id: &str, key_id: &KeyId) -> Result<Keypair> {
        let owner: Option<String> = self
            .conn
            .query_row(
                "SELECT account_id FROM private_keys WHERE key_id = ?1",
                params![key_id.as_str()],
                |row| row.get(0),
            )
            .optional()?;

        match owner {
            Some(owner) if owner == account_id => {
                let keypair = keystore::load(&self.key_path(key_id))?;
                if keypair.id() != key_id {
                    return Err(AssertionError::Storage(format!(
                        "key file for {} holds key {}",
                        key_id,
                        keypair.id()
                    )));
                }
                Ok(keypair)
            }
            _ => Err(AssertionError::KeyNotFound {
                account_id: account_id.to_string(),
                key_id: key_id.to_string(),
            }),
        }
    }

    /// Sign with an imported key. The signing account is the `authority-id`
    /// header.
    pub fn sign(
        &self,
        assertion_type: AssertionType,
        headers: BTreeMap<String, String>,
        body: Option<Vec<u8>>,
        key_id: &KeyId,
    ) -> Result<Assertion> {
        let authority = headers
            .get(AUTHORITY_ID)
            .cloned()
            .ok_or_else(|| AssertionError::InvalidHeader("missing authority-id".to_string()))?;
        let keypair = self.signing_key(&authority, key_id)?;
        codec::sign(assertion_type, headers, body, &keypair)
    }

    fn key_path(&self, key_id: &KeyId) -> PathBuf {
        self.storage_path.join(PRIVATE_KEYS_DIR).join(key_id.as_str())
    }

    fn require_account(&self, account_id: &str) -> Result<()> {
        match self.find(AssertionType::Account, &[("account-id", account_id)]) {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => Err(AssertionError::UnknownAccount {
                account_id: account_id.to_string(),
            }),
            Err(e) => Err(e),
        }
    }

    /// Decoded rows of one type. Rows that fail to decode are skipped.
    fn stored(&self, assertion_type: AssertionType) -> Result<Vec<Assertion>> {
        let mut stmt = self
            .conn
            .prepare("SELECT primary_key, encoded FROM assertions WHERE assertion_type = ?1")?;
        let rows = stmt.query_map(params![assertion_type.as_str()], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, Vec<u8>>(1)?))
        })?;

        let mut assertions = Vec::new();
        for row in rows {
            let (primary_key, encoded) = row?;
            match codec::decode(&encoded) {
                Ok(assertion) => assertions.push(assertion),
                Err(e) => warn!(
                    assertion_type = %assertion_type,
                    primary_key = %primary_key,
                    error = %e,
                    "Skipping undecodable stored assertion"
                ),
            }
        }
        Ok(assertions)
    }

    /// The stored row with exactly this primary key, if it decodes.
    fn stored_by_key(
        &self,
        assertion_type: AssertionType,
        primary_key: &str,
    ) -> Result<Option<Assertion>> {
        let encoded: Option<Vec<u8>> = self
            .conn
            .query_row(
                "SELECT encoded FROM assertions WHERE assertion_type = ?1 AND primary_key = ?2",
                params![assertion_type.as_str(), primary_key],
                |row| row.get(0),
            )
            .optional()?;

        Ok(encoded.and_then(|encoded| match codec::decode(&encoded) {
            Ok(assertion) => Some(assertion),
            Err(e) => {
                warn!(
                    assertion_type = %assertion_type,
                    primary_key = %primary_key,
                    error = %e,
                    "Skipping undecodable stored assertion"
                );
                None
            }
        }))
    }

    fn verify_chain(&self, assertion: &Assertion, depth: usize) -> std::result::Result<(), String> {
        let signer = self.resolve_signer(assertion, depth)?;
        let public_key = signer_public_key(&signer)?;
        if codec::verify(assertion, &public_key) {
            Ok(())
        } else {
            Err("signature does not verify".to_string())
        }
    }

    fn resolve_signer(&self, assertion: &Assertion, depth: usize) -> std::result::Result<Assertion, String> {
        if depth > MAX_CHAIN_DEPTH {
            return Err("trust chain too deep".to_string());
        }

        let key_id = assertion.sign_key_id();
        let query = [
            ("account-id", assertion.authority_id()),
            ("public-key-sha3-384", key_id.as_str()),
        ];

        if let Some(root) = self
            .trusted
            .iter()
            .find(|t| t.assertion_type() == AssertionType::AccountKey && t.matches(&query))
        {
            return Ok(root.clone());
        }

        if matches!(
            assertion.assertion_type(),
            AssertionType::Account | AssertionType::AccountKey
        ) {
            return Err(format!(
                "{} assertions must be signed by a trusted root key",
                assertion.assertion_type()
            ));
        }

        let primary_key = render_primary_key(&[assertion.authority_id(), key_id.as_str()]);
        let candidate = self
            .stored_by_key(AssertionType::AccountKey, &primary_key)
            .map_err(|e| e.to_string())?
            .filter(|k| k.matches(&query))
            .ok_or_else(|| {
                format!(
                    "no account-key {} for account {}",
                    key_id,
                    assertion.authority_id()
                )
            })?;
        self.verify_chain(&candidate, depth + 1)?;
        Ok(candidate)
    }
}

fn signer_public_key(account_key: &Assertion) -> std::result::Result<RsaPublicKey, String> {
    let public_key = account_key
        .body_public_key()
        .map_err(|e| format!("unusable signer key: {}", e))?;
    let actual = KeyId::of(&public_key).map_err(|e| format!("unusable signer key: {}", e))?;
    if account_key.declared_key_id() != Some(actual) {
        return Err("signer account-key body does not match its key ID".to_string());
    }
    Ok(public_key)
}

/// Storage key for `query` when it names every primary-key header.
fn full_primary_key(assertion_type: AssertionType, query: &[(&str, &str)]) -> Option<String> {
    let values = assertion_type
        .primary_key()
        .iter()
        .map(|name| {
            query
                .iter()
                .find(|(queried, _)| queried == name)
                .map(|(_, value)| *value)
        })
        .collect::<Option<Vec<&str>>>()?;
    Some(render_primary_key(&values))
}

fn format_query(query: &[(&str, &str)]) -> String {
    query
        .iter()
        .map(|(name, value)| format!("{}={}", name, value))
        .collect::<Vec<_>>()
        .join(",")
}
