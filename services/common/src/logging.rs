//! Tracing subscriber setup shared by binaries and tests

use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

static INIT: OnceLock<()> = OnceLock::new();

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is not set
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
    /// Include thread ids and names
    pub thread_ids: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            thread_ids: true,
        }
    }
}

/// Install the global tracing subscriber
///
/// `RUST_LOG` takes precedence over `config.level`. Calling this more than once
/// is a no-op, so tests can call it freely.
pub fn init_tracing(config: &LoggingConfig) -> anyhow::Result<()> {
    if INIT.get().is_some() {
        return Ok(());
    }

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(filter);
    let result = if config.json {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_line_number(true)
                    .with_thread_ids(config.thread_ids)
                    .with_thread_names(config.thread_ids),
            )
            .try_init()
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_line_number(true)
                    .with_thread_ids(config.thread_ids)
                    .with_thread_names(config.thread_ids),
            )
            .try_init()
    };

    // Another subscriber may already be installed (e.g. by a test harness)
    if let Err(e) = result {
        tracing::debug!(error = %e, "Tracing subscriber already installed");
    }
    let _ = INIT.set(());
    Ok(())
}
