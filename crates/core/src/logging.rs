//! Structured logging setup for the recovery tools.
//!
//! Log level comes from `RUST_LOG` and falls back to `info`.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn default_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the human-readable subscriber.
///
/// # Example
/// ```no_run
/// use recovery_core::logging;
///
/// logging::init();
/// tracing::info!("signing tool started");
/// ```
pub fn init() {
    tracing_subscriber::registry()
        .with(default_filter())
        .with(fmt::layer().with_target(true))
        .init();
}

/// Install a JSON subscriber, for build farms that ship logs to an aggregator.
///
/// # Example
/// ```no_run
/// use recovery_core::logging;
///
/// logging::init_json();
/// tracing::info!(account_id = "acme", "Account ready");
/// ```
pub fn init_json() {
    tracing_subscriber::registry()
        .with(default_filter())
        .with(fmt::layer().json().with_target(true))
        .init();
}

/// Pick the output format at runtime.
pub fn init_with(json: bool) {
    if json {
        init_json();
    } else {
        init();
    }
}

/// Render a secret for logs without revealing it.
pub fn redact(secret: &str) -> String {
    if secret.is_empty() {
        "<empty>".to_string()
    } else {
        format!("<redacted, {} bytes>", secret.len())
    }
}
