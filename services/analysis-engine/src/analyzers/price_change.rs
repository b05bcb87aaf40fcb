//! Pump/dump detection on percentage change over a short window

use super::{Analyzer, scaled_confidence};
use crate::config::{AnalyzerConfig, PRICE_CHANGE};
use services_common::{Candle, Period, Signal, SignalDirection, SignalType};

/// Flags moves larger than `threshold_percent` between the open of the first
/// and the close of the last of the most recent `lookback` candles
#[derive(Debug, Clone)]
pub struct PriceChangeAnalyzer {
    config: AnalyzerConfig,
    threshold_percent: f64,
    lookback: usize,
}

impl PriceChangeAnalyzer {
    /// Create from settings (`threshold_percent`, `lookback`)
    #[must_use]
    pub fn new(config: AnalyzerConfig) -> Self {
        let threshold_percent = config.number("threshold_percent", 5.0).abs();
        let lookback = config.count("lookback", 3);
        Self {
            config,
            threshold_percent,
            lookback,
        }
    }
}

impl Analyzer for PriceChangeAnalyzer {
    fn name(&self) -> &str {
        PRICE_CHANGE
    }

    fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    fn analyze(&self, symbol: &str, period: Period, candles: &[Candle]) -> anyhow::Result<Vec<Signal>> {
        let window = &candles[candles.len().saturating_sub(self.lookback)..];
        let (Some(first), Some(last)) = (window.first(), window.last()) else {
            return Ok(Vec::new());
        };
        if first.open <= 0.0 {
            anyhow::bail!("non-positive open price {} for {symbol}", first.open);
        }

        let change = (last.close - first.open) / first.open * 100.0;
        if change.abs() < self.threshold_percent {
            return Ok(Vec::new());
        }

        let signal_type = if change > 0.0 {
            SignalType::Pump
        } else {
            SignalType::Dump
        };
        // SAFETY: usize to f64 - window lengths are small
        let window_len = window.len() as f64;
        let signal = Signal::new(
            symbol,
            period,
            signal_type,
            SignalDirection::from_change(change),
            change,
            scaled_confidence(change.abs(), self.threshold_percent),
        )
        .with_indicator("window_open", first.open)
        .with_indicator("window_close", last.close)
        .with_indicator("window_candles", window_len);

        Ok(vec![signal])
    }
}
