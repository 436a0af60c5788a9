//! Logging initialization helpers.
//!
//! The listener core only emits `tracing` events; where they end up is
//! decided by the embedding application. This module offers the usual setup
//! for binaries and tests: a global `tracing_subscriber` registry with an
//! `EnvFilter` and either human-readable or JSON output.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogConfig {
    /// Log level for this crate: trace|debug|info|warn|error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format: text|json
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Whether to write logs to stdout; when false events are discarded
    #[serde(default = "default_console")]
    pub console: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

fn default_console() -> bool {
    true
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            console: default_console(),
        }
    }
}

/// Compute the filter spec handed to `EnvFilter`.
///
/// A non-empty `RUST_LOG` wins. Otherwise this crate logs at the configured
/// level and everything else at `warn`.
pub(crate) fn effective_log_spec(cfg: &LogConfig, rust_log: Option<&str>) -> String {
    match rust_log {
        Some(spec) if !spec.is_empty() => spec.to_string(),
        _ => format!("warn,dnslisten={}", cfg.level),
    }
}

/// Initialize global logging according to the provided `LogConfig`.
///
/// Installing a subscriber twice is not an error: the first one stays in
/// place, which keeps repeated calls from tests harmless.
///
/// # Errors
///
/// Fails on an unknown `format` or a level the filter cannot parse.
pub fn init_logging(cfg: &LogConfig) -> Result<()> {
    let rust_log = std::env::var("RUST_LOG").ok();
    let filter = EnvFilter::try_new(effective_log_spec(cfg, rust_log.as_deref()))?;
    let registry = tracing_subscriber::registry().with(filter);

    match (cfg.format.as_str(), cfg.console) {
        ("json", true) => {
            let _ = registry.with(tracing_subscriber::fmt::layer().json()).try_init();
        }
        ("json", false) => {
            let layer = tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::sink);
            let _ = registry.with(layer).try_init();
        }
        ("text", true) => {
            let _ = registry.with(tracing_subscriber::fmt::layer()).try_init();
        }
        ("text", false) => {
            let layer = tracing_subscriber::fmt::layer().with_writer(std::io::sink);
            let _ = registry.with(layer).try_init();
        }
        (other, _) => anyhow::bail!("unsupported log format: {}", other),
    }

    Ok(())
}
