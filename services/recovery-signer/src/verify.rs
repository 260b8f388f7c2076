//! Offline checking of assertion files.

use anyhow::Context;
use recovery_core::Config;
use recovery_identity::{codec, export, Assertion, AssertionType, Database};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Verdict for one assertion found in a file.
#[derive(Debug, Clone, Serialize)]
pub struct VerifyReport {
    pub path: PathBuf,
    pub assertion_type: String,
    pub primary_key: String,
    pub trusted: bool,
    pub detail: Option<String>,
}

/// Check every assertion in `files` against the keystore database seeded
/// with the exported trusted roots.
///
/// Serial-requests are never stored, so only their device self-signature is
/// checked.
pub fn run(config: &Config, files: &[PathBuf]) -> anyhow::Result<Vec<VerifyReport>> {
    let roots_path = &config.output.trusted_roots;
    let roots = export::read_trusted_roots(roots_path)
        .with_context(|| format!("could not read trusted roots {}", roots_path.display()))?;
    let db = Database::open(&config.keystore.dir, roots)?;

    let mut reports = Vec::new();
    for path in files {
        let bytes =
            std::fs::read(path).with_context(|| format!("could not read {}", path.display()))?;
        let assertions = codec::decode_all(&bytes)
            .with_context(|| format!("could not decode {}", path.display()))?;
        for assertion in assertions {
            reports.push(check_one(&db, path, &assertion));
        }
    }
    Ok(reports)
}

fn check_one(db: &Database, path: &Path, assertion: &Assertion) -> VerifyReport {
    let result = if assertion.assertion_type() == AssertionType::SerialRequest {
        match assertion.body_public_key() {
            Ok(device_key) if codec::verify(assertion, &device_key) => Ok(()),
            Ok(_) => Err("device signature does not verify".to_string()),
            Err(e) => Err(e.to_string()),
        }
    } else if db.trusted().contains(assertion) {
        Ok(())
    } else {
        db.check(assertion).map_err(|e| e.to_string())
    };

    if let Err(reason) = &result {
        warn!(
            path = %path.display(),
            assertion_type = %assertion.assertion_type(),
            reason = %reason,
            "Assertion failed verification"
        );
    }

    VerifyReport {
        path: path.to_path_buf(),
        assertion_type: assertion.assertion_type().to_string(),
        primary_key: assertion.primary_key_string(),
        trusted: result.is_ok(),
        detail: result.err(),
    }
}
