//! Candle engine configuration

use serde::{Deserialize, Serialize};
use services_common::Period;
use services_common::constants::{DEFAULT_CANDLE_HISTORY_DEPTH, DEFAULT_SHUTDOWN_TIMEOUT_MS, SECS_PER_HOUR};
use std::time::Duration;

/// Candle engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CandleConfig {
    /// Periods aggregated for every symbol
    pub periods: Vec<Period>,

    /// Ingest queue capacity; ticks beyond it are dropped
    pub queue_capacity: usize,

    /// Cleanup pass interval in seconds
    pub cleanup_interval_secs: u64,

    /// Statistics log interval in seconds
    pub stats_interval_secs: u64,

    /// Closed candles older than this are removed
    pub retention_hours: u64,

    /// Default history depth returned to readers
    pub history_depth: usize,

    /// Upper bound on joining the processing task in `stop`
    pub shutdown_timeout_ms: u64,
}

impl Default for CandleConfig {
    fn default() -> Self {
        Self {
            periods: Period::ALL.to_vec(),
            queue_capacity: 10_000,
            cleanup_interval_secs: 300,
            stats_interval_secs: 60,
            retention_hours: 24,
            history_depth: DEFAULT_CANDLE_HISTORY_DEPTH,
            shutdown_timeout_ms: DEFAULT_SHUTDOWN_TIMEOUT_MS,
        }
    }
}

impl CandleConfig {
    /// Cleanup interval
    #[must_use]
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs.max(1))
    }

    /// Statistics log interval
    #[must_use]
    pub fn stats_interval(&self) -> Duration {
        Duration::from_secs(self.stats_interval_secs.max(1))
    }

    /// History retention
    #[must_use]
    pub fn retention(&self) -> chrono::Duration {
        // SAFETY: u64 to i64 - retention hours are small
        chrono::Duration::seconds((self.retention_hours * SECS_PER_HOUR) as i64)
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
        if self.periods.is_empty() {
            problems.push("candles.periods must not be empty".to_string());
        }
        if self.queue_capacity == 0 {
            problems.push("candles.queue_capacity must be positive".to_string());
        }
        if self.cleanup_interval_secs == 0 {
            problems.push("candles.cleanup_interval_secs must be positive".to_string());
        }
        if self.stats_interval_secs == 0 {
            problems.push("candles.stats_interval_secs must be positive".to_string());
        }
        if self.retention_hours == 0 {
            problems.push("candles.retention_hours must be positive".to_string());
        }
        problems
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(CandleConfig::default().validate().is_empty());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: CandleConfig =
            serde_json::from_str(r#"{"periods": ["1m", "1h"], "queue_capacity": 0}"#).unwrap();
        assert_eq!(config.periods, vec![Period::M1, Period::H1]);
        assert_eq!(config.cleanup_interval_secs, 300);
        assert_eq!(config.validate().len(), 1);
    }
}
