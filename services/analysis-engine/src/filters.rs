//! Signal filter chain
//!
//! Filters run in registration order after all analyzers for a symbol have
//! produced their signals. A signal must pass every filter to be published.

use crate::config::FilterConfig;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use services_common::{Signal, SignalDirection};
use std::sync::Arc;
use tracing::debug;

/// Predicate over produced signals
pub trait SignalFilter: Send + Sync {
    /// Filter name used in logs
    fn name(&self) -> &str;

    /// Whether `signal` survives this filter
    fn allow(&self, signal: &Signal) -> bool;
}

/// Drops signals below a confidence floor
#[derive(Debug, Clone)]
pub struct ConfidenceFilter {
    min_confidence: f64,
}

impl ConfidenceFilter {
    /// Create with a floor in `[0, 1]`
    #[must_use]
    pub const fn new(min_confidence: f64) -> Self {
        Self { min_confidence }
    }
}

impl SignalFilter for ConfidenceFilter {
    fn name(&self) -> &str {
        "confidence"
    }

    fn allow(&self, signal: &Signal) -> bool {
        signal.confidence >= self.min_confidence
    }
}

/// Drops signals whose `volume_usd` indicator is missing or below a floor
#[derive(Debug, Clone)]
pub struct VolumeFilter {
    min_volume_usd: f64,
}

impl VolumeFilter {
    /// Create with a quote volume floor
    #[must_use]
    pub const fn new(min_volume_usd: f64) -> Self {
        Self { min_volume_usd }
    }
}

impl SignalFilter for VolumeFilter {
    fn name(&self) -> &str {
        "volume"
    }

    fn allow(&self, signal: &Signal) -> bool {
        signal
            .indicator("volume_usd")
            .is_some_and(|volume| volume >= self.min_volume_usd)
    }
}

/// Allows at most one signal per symbol and direction within `min_interval`,
/// measured on signal timestamps
#[derive(Debug)]
pub struct RateLimitFilter {
    min_interval: Duration,
    last_allowed: Mutex<FxHashMap<(String, SignalDirection), DateTime<Utc>>>,
}

impl RateLimitFilter {
    /// Create with the minimum spacing between signals of one symbol and direction
    #[must_use]
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_allowed: Mutex::new(FxHashMap::default()),
        }
    }

    /// Forget all recorded signals
    pub fn reset(&self) {
        self.last_allowed.lock().clear();
    }
}

impl SignalFilter for RateLimitFilter {
    fn name(&self) -> &str {
        "rate_limit"
    }

    fn allow(&self, signal: &Signal) -> bool {
        let key = (signal.symbol.clone(), signal.direction);
        let mut last_allowed = self.last_allowed.lock();

        let limited = last_allowed
            .get(&key)
            .is_some_and(|last| signal.timestamp - *last < self.min_interval);
        if limited {
            debug!(
                symbol = %signal.symbol,
                direction = signal.direction.as_str(),
                "Signal rate limited"
            );
            return false;
        }
        last_allowed.insert(key, signal.timestamp);
        true
    }
}

/// Standard chain built from configuration: confidence, then volume, then rate limit
#[must_use]
pub fn default_filters(config: &FilterConfig) -> Vec<Arc<dyn SignalFilter>> {
    let mut filters: Vec<Arc<dyn SignalFilter>> =
        vec![Arc::new(ConfidenceFilter::new(config.min_confidence))];
    if config.min_volume_usd > 0.0 {
        filters.push(Arc::new(VolumeFilter::new(config.min_volume_usd)));
    }
    if config.rate_limit_secs > 0 {
        // SAFETY: u64 to i64 - rate limit intervals are small
        let interval = Duration::seconds(config.rate_limit_secs as i64);
        filters.push(Arc::new(RateLimitFilter::new(interval)));
    }
    filters
}

#[cfg(test)]
mod tests {
    use super::*;
    use services_common::{Period, SignalType};

    fn signal(direction: SignalDirection, confidence: f64, at: DateTime<Utc>) -> Signal {
        let mut signal = Signal::new("BTCUSDT", Period::M5, SignalType::Pump, direction, 6.0, confidence);
        signal.timestamp = at;
        signal
    }

    #[test]
    fn test_confidence_floor() {
        let filter = ConfidenceFilter::new(0.6);
        let now = Utc::now();
        assert!(filter.allow(&signal(SignalDirection::Up, 0.6, now)));
        assert!(!filter.allow(&signal(SignalDirection::Up, 0.59, now)));
    }

    #[test]
    fn test_volume_requires_indicator() {
        let filter = VolumeFilter::new(1_000.0);
        let now = Utc::now();
        let bare = signal(SignalDirection::Up, 0.9, now);
        assert!(!filter.allow(&bare));
        assert!(filter.allow(&bare.clone().with_indicator("volume_usd", 5_000.0)));
        assert!(!filter.allow(&bare.with_indicator("volume_usd", 10.0)));
    }

    #[test]
    fn test_rate_limit_per_direction() {
        let filter = RateLimitFilter::new(Duration::minutes(5));
        let now = Utc::now();

        assert!(filter.allow(&signal(SignalDirection::Up, 0.9, now)));
        assert!(!filter.allow(&signal(SignalDirection::Up, 0.9, now + Duration::minutes(1))));
        assert!(filter.allow(&signal(SignalDirection::Down, 0.9, now + Duration::minutes(1))));
        assert!(filter.allow(&signal(SignalDirection::Up, 0.9, now + Duration::minutes(5))));

        filter.reset();
        assert!(filter.allow(&signal(SignalDirection::Up, 0.9, now + Duration::minutes(6))));
    }

    #[test]
    fn test_default_chain_composition() {
        let names: Vec<String> = default_filters(&FilterConfig {
            min_confidence: 0.5,
            min_volume_usd: 100.0,
            rate_limit_secs: 0,
        })
        .iter()
        .map(|f| f.name().to_string())
        .collect();
        assert_eq!(names, vec!["confidence", "volume"]);
    }
}
