//! Analysis engine and signal pipeline configuration

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use services_common::Period;
use services_common::constants::DEFAULT_SHUTDOWN_TIMEOUT_MS;
use std::time::Duration;

/// Analyzer names understood by [`crate::AnalyzerFactory`]
pub const PRICE_CHANGE: &str = "price_change";
pub const VOLUME_SPIKE: &str = "volume_spike";
pub const MOMENTUM: &str = "momentum";

/// Free-form analyzer setting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SettingValue {
    /// Boolean toggle
    Flag(bool),
    /// Numeric threshold or window
    Number(f64),
    /// Anything else
    Text(String),
}

/// Per-analyzer tunables, immutable once the engine is built
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    /// Disabled analyzers are never registered
    pub enabled: bool,
    /// Confidence multiplier applied to every produced signal
    pub weight: f64,
    /// Signals below this confidence (after weighting) are discarded
    pub min_confidence: f64,
    /// Analyzer-specific settings
    pub custom: FxHashMap<String, SettingValue>,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            weight: 1.0,
            min_confidence: 0.0,
            custom: FxHashMap::default(),
        }
    }
}

impl AnalyzerConfig {
    /// Add a numeric setting
    #[must_use]
    pub fn with_number(mut self, key: impl Into<String>, value: f64) -> Self {
        self.custom.insert(key.into(), SettingValue::Number(value));
        self
    }

    /// Add a boolean setting
    #[must_use]
    pub fn with_flag(mut self, key: impl Into<String>, value: bool) -> Self {
        self.custom.insert(key.into(), SettingValue::Flag(value));
        self
    }

    /// Numeric setting or `default` when absent or not a number
    #[must_use]
    pub fn number(&self, key: &str, default: f64) -> f64 {
        match self.custom.get(key) {
            Some(SettingValue::Number(n)) if n.is_finite() => *n,
            Some(SettingValue::Text(s)) => s.trim().parse().unwrap_or(default),
            _ => default,
        }
    }

    /// Window length setting, at least one
    #[must_use]
    pub fn count(&self, key: &str, default: usize) -> usize {
        // SAFETY: usize to f64 and back - window sizes are small positive integers
        let value = self.number(key, default as f64);
        if value >= 1.0 { value as usize } else { default.max(1) }
    }

    /// Boolean setting or `default`
    #[must_use]
    pub fn flag(&self, key: &str, default: bool) -> bool {
        match self.custom.get(key) {
            Some(SettingValue::Flag(b)) => *b,
            Some(SettingValue::Text(s)) => s.trim().parse().unwrap_or(default),
            _ => default,
        }
    }

    /// Default settings for a known analyzer name
    #[must_use]
    pub fn defaults_for(name: &str) -> Self {
        match name {
            PRICE_CHANGE => Self::default()
                .with_number("threshold_percent", 5.0)
                .with_number("lookback", 3.0),
            VOLUME_SPIKE => Self::default()
                .with_number("multiplier", 3.0)
                .with_number("lookback", 20.0)
                .with_number("min_volume_usd", 0.0),
            MOMENTUM => Self::default()
                .with_number("short_window", 5.0)
                .with_number("long_window", 20.0)
                .with_number("min_divergence_percent", 0.5),
            _ => Self::default(),
        }
    }
}

/// Filter chain tunables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Confidence floor
    pub min_confidence: f64,
    /// Floor on the `volume_usd` indicator; zero disables the filter
    pub min_volume_usd: f64,
    /// Minimum seconds between two signals for the same symbol and direction; zero disables
    pub rate_limit_secs: u64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.5,
            min_volume_usd: 0.0,
            rate_limit_secs: 300,
        }
    }
}

/// Analysis engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Scheduled `analyze_all` interval in milliseconds
    pub update_interval_ms: u64,
    /// Periods analyzed for every symbol
    pub periods: Vec<Period>,
    /// Candidate cap per run
    pub max_symbols: usize,
    /// Candidates need at least this much quote volume in their latest tick
    pub min_volume_usd: f64,
    /// Analyze candidates concurrently
    pub parallel: bool,
    /// Concurrency bound in parallel mode
    pub max_workers: usize,
    /// Closed candles fetched per symbol and period
    pub history_depth: usize,
    /// Analyzer settings keyed by analyzer name
    pub analyzers: FxHashMap<String, AnalyzerConfig>,
    /// Filter chain settings
    pub filters: FilterConfig,
    /// Upper bound on joining the scheduler in `stop`
    pub shutdown_timeout_ms: u64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        let analyzers = [PRICE_CHANGE, VOLUME_SPIKE, MOMENTUM]
            .into_iter()
            .map(|name| (name.to_string(), AnalyzerConfig::defaults_for(name)))
            .collect();

        Self {
            update_interval_ms: 60_000,
            periods: vec![Period::M5, Period::M15, Period::H1],
            max_symbols: 100,
            min_volume_usd: 0.0,
            parallel: true,
            max_workers: 4,
            history_depth: 100,
            analyzers,
            filters: FilterConfig::default(),
            shutdown_timeout_ms: DEFAULT_SHUTDOWN_TIMEOUT_MS,
        }
    }
}

impl AnalysisConfig {
    /// Scheduler interval
    #[must_use]
    pub fn update_interval(&self) -> Duration {
        Duration::from_millis(self.update_interval_ms.max(1))
    }

    /// Shutdown join timeout
    #[must_use]
    pub const fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    /// Settings for one analyzer, falling back to its defaults
    #[must_use]
    pub fn analyzer(&self, name: &str) -> AnalyzerConfig {
        self.analyzers
            .get(name)
            .cloned()
            .unwrap_or_else(|| AnalyzerConfig::defaults_for(name))
    }

    /// Describe every invalid setting
    #[must_use]
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.update_interval_ms == 0 {
            problems.push("analysis.update_interval_ms must be positive".to_string());
        }
        if self.periods.is_empty() {
            problems.push("analysis.periods must not be empty".to_string());
        }
        if self.max_symbols == 0 {
            problems.push("analysis.max_symbols must be positive".to_string());
        }
        if self.parallel && self.max_workers == 0 {
            problems.push("analysis.max_workers must be positive in parallel mode".to_string());
        }
        if self.history_depth == 0 {
            problems.push("analysis.history_depth must be positive".to_string());
        }
        if !(0.0..=1.0).contains(&self.filters.min_confidence) {
            problems.push("analysis.filters.min_confidence must be within [0, 1]".to_string());
        }
        for (name, analyzer) in &self.analyzers {
            if analyzer.weight < 0.0 || !analyzer.weight.is_finite() {
                problems.push(format!("analysis.analyzers.{name}.weight must be non-negative"));
            }
            if !(0.0..=1.0).contains(&analyzer.min_confidence) {
                problems.push(format!(
                    "analysis.analyzers.{name}.min_confidence must be within [0, 1]"
                ));
            }
        }
        problems
    }
}

/// Signal pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalPipelineConfig {
    /// Signals allowed per symbol within one window
    pub max_signals_per_window: usize,
    /// Sliding window length in seconds
    pub window_secs: u64,
    /// Decimal places kept in `change_percent` by enrichment
    pub change_precision: u32,
}

impl Default for SignalPipelineConfig {
    fn default() -> Self {
        Self {
            max_signals_per_window: 5,
            window_secs: 60,
            change_precision: 2,
        }
    }
}

impl SignalPipelineConfig {
    /// Rate limiter window
    #[must_use]
    pub fn window(&self) -> chrono::Duration {
        // SAFETY: u64 to i64 - window lengths are small
        chrono::Duration::seconds(self.window_secs as i64)
    }

    /// Describe every invalid setting
    #[must_use]
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.max_signals_per_window == 0 {
            problems.push("pipeline.max_signals_per_window must be positive".to_string());
        }
        if self.window_secs == 0 {
            problems.push("pipeline.window_secs must be positive".to_string());
        }
        problems
    }
}
