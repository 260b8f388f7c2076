//! Version stamp reported at startup and by `--version-json`.

use serde::{Deserialize, Serialize};

/// Version information baked in at compile time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildInfo {
    pub version: String,
    pub commit: String,
    pub build_date: String,
}

impl BuildInfo {
    /// Build info of the calling binary.
    ///
    /// The commit and build date come from `RECOVERY_GIT_COMMIT` and
    /// `RECOVERY_BUILD_DATE` at compile time.
    pub fn current() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            commit: option_env!("RECOVERY_GIT_COMMIT")
                .unwrap_or("unknown")
                .to_string(),
            build_date: option_env!("RECOVERY_BUILD_DATE")
                .unwrap_or("unknown")
                .to_string(),
        }
    }

    /// Log the stamp and the entropy notice operators need before key generation.
    pub fn log_startup(&self) {
        tracing::info!(
            version = %self.version,
            commit = %self.commit,
            build_date = %self.build_date,
            "Starting recovery signer"
        );
        tracing::info!(
            "Key generation blocks until enough entropy is available; on test rigs it can be fed with `rngd -r /dev/urandom`"
        );
    }
}

impl std::fmt::Display for BuildInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Version: {}, Commit: {}, Build date: {}",
            self.version, self.commit, self.build_date
        )
    }
}
