//! Pluggable candle analyzers
//!
//! Every analyzer is a named trait object. The engine keeps them in a registry
//! keyed by name and runs each one over the candle series of every
//! (symbol, period) pair it supports.

pub mod momentum;
pub mod price_change;
pub mod volume_spike;

pub use momentum::MomentumAnalyzer;
pub use price_change::PriceChangeAnalyzer;
pub use volume_spike::VolumeSpikeAnalyzer;

use crate::config::{AnalysisConfig, AnalyzerConfig, MOMENTUM, PRICE_CHANGE, VOLUME_SPIKE};
use services_common::{Candle, Period, Signal};
use std::sync::Arc;
use tracing::{debug, warn};

/// Candle series analyzer
pub trait Analyzer: Send + Sync {
    /// Unique analyzer name
    fn name(&self) -> &str;

    /// Settings the analyzer was built with
    fn config(&self) -> &AnalyzerConfig;

    /// Whether this analyzer handles `symbol`
    fn supports(&self, _symbol: &str) -> bool {
        true
    }

    /// Produce signals from a series ordered oldest first; the last candle may be open
    fn analyze(&self, symbol: &str, period: Period, candles: &[Candle]) -> anyhow::Result<Vec<Signal>>;
}

/// Builds the shipped analyzers from configuration
#[derive(Debug, Default, Clone, Copy)]
pub struct AnalyzerFactory;

impl AnalyzerFactory {
    /// Names of the analyzers this factory can build
    pub const KNOWN: [&'static str; 3] = [PRICE_CHANGE, VOLUME_SPIKE, MOMENTUM];

    /// Build one analyzer by name
    #[must_use]
    pub fn create(name: &str, config: AnalyzerConfig) -> Option<Arc<dyn Analyzer>> {
        let analyzer: Arc<dyn Analyzer> = match name {
            PRICE_CHANGE => Arc::new(PriceChangeAnalyzer::new(config)),
            VOLUME_SPIKE => Arc::new(VolumeSpikeAnalyzer::new(config)),
            MOMENTUM => Arc::new(MomentumAnalyzer::new(config)),
            _ => return None,
        };
        Some(analyzer)
    }

    /// Build every enabled analyzer; disabled ones are left out of the registry
    #[must_use]
    pub fn create_enabled(config: &AnalysisConfig) -> Vec<Arc<dyn Analyzer>> {
        for name in config.analyzers.keys() {
            if !Self::KNOWN.contains(&name.as_str()) {
                warn!(analyzer = %name, "Ignoring settings for unknown analyzer");
            }
        }

        Self::KNOWN
            .iter()
            .filter_map(|&name| {
                let settings = config.analyzer(name);
                if !settings.enabled {
                    debug!(analyzer = name, "Analyzer disabled");
                    return None;
                }
                Self::create(name, settings)
            })
            .collect()
    }
}

/// Confidence grows linearly from 0.5 at `threshold` to 1.0 at twice the threshold
pub(crate) fn scaled_confidence(magnitude: f64, threshold: f64) -> f64 {
    if threshold <= 0.0 {
        return 1.0;
    }
    (0.5 + 0.5 * ((magnitude - threshold) / threshold)).clamp(0.5, 1.0)
}
