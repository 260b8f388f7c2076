//! Artifact files for the recovery-image builder and downstream tooling.
//!
//! Every artifact is written atomically with owner-only permissions.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use recovery_crypto::{armor, secure_file, Keypair};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

use crate::assertion::{Assertion, AssertionType};
use crate::{codec, AssertionError, Result};

/// Index of the signing keypair in the keypair summary consumed downstream.
pub const DEFAULT_KEYPAIR_INDEX: u32 = 1;

/// `keypair.json`: the armored signing key and the account it signs for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeypairSummary {
    /// Base64 of the armored private key
    #[serde(rename = "privateKey")]
    pub private_key: String,
    #[serde(rename = "authorityID")]
    pub authority_id: String,
}

impl KeypairSummary {
    pub fn new(authority_id: &str, keypair: &Keypair) -> Result<Self> {
        let armored = armor(keypair)?;
        Ok(Self {
            private_key: STANDARD.encode(armored.as_bytes()),
            authority_id: authority_id.to_string(),
        })
    }

    /// Recover the keypair carried by this summary.
    pub fn keypair(&self) -> Result<Keypair> {
        let armored = STANDARD
            .decode(&self.private_key)
            .map_err(|e| AssertionError::Decode(format!("privateKey is not base64: {}", e)))?;
        let armored = String::from_utf8(armored)
            .map_err(|_| AssertionError::Decode("privateKey is not armored text".to_string()))?;
        Ok(recovery_crypto::parse_armored(&armored)?)
    }
}

/// `model.json`: which brand and model the keypair signs for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSummary {
    #[serde(rename = "brandID")]
    pub brand_id: String,
    pub name: String,
    #[serde(rename = "keypairID")]
    pub keypair_id: u32,
}

impl ModelSummary {
    /// Summary of a model assertion.
    pub fn of(model: &Assertion) -> Result<Self> {
        if model.assertion_type() != AssertionType::Model {
            return Err(AssertionError::Unsupported(format!(
                "model summary of a {} assertion",
                model.assertion_type()
            )));
        }
        Ok(Self {
            brand_id: model.header("brand-id").unwrap_or_default().to_string(),
            name: model.header("model").unwrap_or_default().to_string(),
            keypair_id: DEFAULT_KEYPAIR_INDEX,
        })
    }
}

/// Write one assertion in wire form.
pub fn write_assertion(path: &Path, assertion: &Assertion) -> Result<()> {
    secure_file::write_atomic(path, &codec::encode(assertion))?;
    info!(
        path = %path.display(),
        assertion_type = %assertion.assertion_type(),
        primary_key = %assertion.primary_key_string(),
        "Wrote assertion"
    );
    Ok(())
}

/// Read one assertion in wire form.
pub fn read_assertion(path: &Path) -> Result<Assertion> {
    let bytes = std::fs::read(path)?;
    codec::decode(&bytes).map_err(|e| match e {
        AssertionError::Decode(reason) => {
            AssertionError::Decode(format!("{}: {}", path.display(), reason))
        }
        other => other,
    })
}

pub fn write_keypair_summary(path: &Path, summary: &KeypairSummary) -> Result<()> {
    write_json(path, summary)
}

pub fn write_model_summary(path: &Path, summary: &ModelSummary) -> Result<()> {
    write_json(path, summary)
}

/// Write the trusted root assertions as one stream for out-of-band
/// distribution.
pub fn write_trusted_roots(path: &Path, roots: &[Assertion]) -> Result<()> {
    secure_file::write_atomic(path, &codec::encode_all(roots))?;
    info!(path = %path.display(), count = roots.len(), "Wrote trusted roots");
    Ok(())
}

pub fn read_trusted_roots(path: &Path) -> Result<Vec<Assertion>> {
    let bytes = std::fs::read(path)?;
    codec::decode_all(&bytes)
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_vec_pretty(value)?;
    secure_file::write_atomic(path, &json)?;
    info!(path = %path.display(), "Wrote summary");
    Ok(())
}
