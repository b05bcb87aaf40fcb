//! Runtime configuration
//!
//! One JSON document with a section per component. Missing sections and
//! fields take their defaults. Environment variables prefixed with
//! `SIGNAL_PIPELINE_` override single fields, with `__` separating path
//! segments: `SIGNAL_PIPELINE_BUS__BUFFER_SIZE=512`,
//! `SIGNAL_PIPELINE_ANALYSIS__ANALYZERS__MOMENTUM__ENABLED=false`.

use crate::error::ConfigError;
use analysis_engine::{AnalysisConfig, SignalPipelineConfig};
use data_aggregator::CandleConfig;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use services_common::constants::DEFAULT_SHUTDOWN_TIMEOUT_MS;
use services_common::{EventBusConfig, LoggingConfig};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Environment override prefix
pub const ENV_PREFIX: &str = "SIGNAL_PIPELINE_";

const PATH_SEPARATOR: &str = "__";

/// Orchestrator supervision settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Health loop interval in milliseconds
    pub health_check_interval_ms: u64,
    /// Restart services whose start fails or whose health check turns bad
    pub restart_on_failure: bool,
    /// Restart attempts per service before giving up; reset on a successful start
    pub max_restart_attempts: u32,
    /// Delay before each restart attempt in milliseconds
    pub restart_delay_ms: u64,
    /// Upper bound on joining the health loop in `stop`
    pub shutdown_timeout_ms: u64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            health_check_interval_ms: 30_000,
            restart_on_failure: true,
            max_restart_attempts: 3,
            restart_delay_ms: 5_000,
            shutdown_timeout_ms: DEFAULT_SHUTDOWN_TIMEOUT_MS,
        }
    }
}

impl LifecycleConfig {
    /// Health loop interval
    #[must_use]
    pub fn health_check_interval(&self) -> Duration {
        Duration::from_millis(self.health_check_interval_ms.max(1))
    }

    /// Delay before a restart attempt
    #[must_use]
    pub const fn restart_delay(&self) -> Duration {
        Duration::from_millis(self.restart_delay_ms)
    }

    /// Shutdown join timeout
    #[must_use]
    pub const fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    /// Describe every invalid setting
    #[must_use]
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.health_check_interval_ms == 0 {
            problems.push("lifecycle.health_check_interval_ms must be positive".to_string());
        }
        problems
    }
}

/// Configuration for the whole runtime
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub logging: LoggingConfig,
    pub bus: EventBusConfig,
    pub candles: CandleConfig,
    pub analysis: AnalysisConfig,
    pub pipeline: SignalPipelineConfig,
    pub lifecycle: LifecycleConfig,
}

impl RuntimeConfig {
    /// Load from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&content)
    }

    /// Parse from a JSON document
    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(content)?)
    }

    /// Apply `SIGNAL_PIPELINE_*` variables from the process environment
    pub fn apply_env(self) -> Result<Self, ConfigError> {
        self.apply_overrides(std::env::vars())
    }

    /// Apply overrides from `(name, value)` pairs; names without the prefix are ignored
    ///
    /// Values are read as JSON when they parse, otherwise as plain strings.
    pub fn apply_overrides<I>(self, vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut tree = serde_json::to_value(&self)?;
        let mut applied = 0usize;

        for (key, raw) in vars {
            let Some(path) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let segments: Vec<String> = path
                .split(PATH_SEPARATOR)
                .map(str::to_ascii_lowercase)
                .collect();
            let value = serde_json::from_str(&raw).unwrap_or_else(|_| Value::String(raw.clone()));

            set_path(&mut tree, &segments, value).map_err(|reason| ConfigError::Override {
                key: key.clone(),
                value: raw.clone(),
                reason,
            })?;
            debug!(key = %key, "Config override applied");
            applied += 1;
        }

        if applied == 0 {
            return Ok(self);
        }
        Ok(serde_json::from_value(tree)?)
    }

    /// Check every section; lists all problems at once
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut problems = Vec::new();
        if self.bus.buffer_size == 0 {
            problems.push("bus.buffer_size must be positive".to_string());
        }
        if self.bus.worker_count == 0 {
            problems.push("bus.worker_count must be positive".to_string());
        }
        if self.bus.enable_dead_letter_queue && self.bus.dead_letter_capacity == 0 {
            problems.push("bus.dead_letter_capacity must be positive when enabled".to_string());
        }
        problems.extend(self.candles.validate());
        problems.extend(self.analysis.validate());
        problems.extend(self.pipeline.validate());
        problems.extend(self.lifecycle.validate());

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(problems))
        }
    }
}

/// Replace the value at `segments`, which must name an existing field
fn set_path(tree: &mut Value, segments: &[String], value: Value) -> Result<(), String> {
    let Some((last, parents)) = segments.split_last() else {
        return Err("empty path".to_string());
    };

    let mut node = tree;
    for segment in parents {
        node = node
            .get_mut(segment.as_str())
            .ok_or_else(|| format!("unknown section '{segment}'"))?;
    }
    let Some(object) = node.as_object_mut() else {
        return Err(format!("'{last}' is not inside a section"));
    };
    let Some(slot) = object.get_mut(last.as_str()) else {
        return Err(format!("unknown field '{last}'"));
    };
    *slot = value;
    Ok(())
}
