//! Security-alert triage engine
//!
//! Keeps polled snapshots of events, threat-pattern groups and incident
//! reports in sync with a triage API, and drives the analyst's decisions on
//! those groups through a single-flight commit lifecycle.

pub mod backend;
pub mod config;
pub mod engine;
pub mod errors;
pub mod types;

// Re-export commonly used types
pub use errors::{Error, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize logging for the triage engine
pub fn init() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "alert_triage=info".into()),
        )
        .init();

    tracing::info!("🛡️  Alert triage engine v{} initialized", VERSION);
    Ok(())
}

/// Initialize logging from loaded configuration
///
/// `format = "json"` emits one JSON object per line; anything else uses the
/// human-readable formatter. `RUST_LOG` still takes precedence over `level`.
pub fn init_with(logging: &config::LoggingConfig) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("alert_triage={}", logging.level).into());
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    let installed = if logging.format.eq_ignore_ascii_case("json") {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| Error::config(format!("Logging already initialized: {e}")))?;

    tracing::info!("🛡️  Alert triage engine v{} initialized", VERSION);
    Ok(())
}
