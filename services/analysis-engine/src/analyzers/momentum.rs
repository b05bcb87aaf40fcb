//! Moving-average crossover detection

use super::Analyzer;
use crate::config::{AnalyzerConfig, MOMENTUM};
use services_common::{Candle, Period, Signal, SignalDirection, SignalType};

/// Emits a momentum shift when the short moving average of closes crosses the
/// long one and the gap is at least `min_divergence_percent`
#[derive(Debug, Clone)]
pub struct MomentumAnalyzer {
    config: AnalyzerConfig,
    short_window: usize,
    long_window: usize,
    min_divergence_percent: f64,
}

fn sma(closes: &[f64]) -> f64 {
    // SAFETY: usize to f64 - window lengths are small
    closes.iter().sum::<f64>() / closes.len() as f64
}

impl MomentumAnalyzer {
    /// Create from settings (`short_window`, `long_window`, `min_divergence_percent`)
    #[must_use]
    pub fn new(config: AnalyzerConfig) -> Self {
        let short_window = config.count("short_window", 5);
        let long_window = config.count("long_window", 20).max(short_window + 1);
        let min_divergence_percent = config.number("min_divergence_percent", 0.5).abs();
        Self {
            config,
            short_window,
            long_window,
            min_divergence_percent,
        }
    }

    /// Short and long averages ending at `end` (exclusive)
    fn averages(&self, closes: &[f64], end: usize) -> (f64, f64) {
        (
            sma(&closes[end - self.short_window..end]),
            sma(&closes[end - self.long_window..end]),
        )
    }
}

impl Analyzer for MomentumAnalyzer {
    fn name(&self) -> &str {
        MOMENTUM
    }

    fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    fn analyze(&self, symbol: &str, period: Period, candles: &[Candle]) -> anyhow::Result<Vec<Signal>> {
        // One extra candle to compare against the previous crossover state
        if candles.len() < self.long_window + 1 {
            return Ok(Vec::new());
        }
        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();

        let (prev_short, prev_long) = self.averages(&closes, closes.len() - 1);
        let (short, long) = self.averages(&closes, closes.len());
        if long <= 0.0 {
            return Ok(Vec::new());
        }

        let crossed_up = prev_short <= prev_long && short > long;
        let crossed_down = prev_short >= prev_long && short < long;
        if !crossed_up && !crossed_down {
            return Ok(Vec::new());
        }

        let divergence = (short - long) / long * 100.0;
        if divergence.abs() < self.min_divergence_percent {
            return Ok(Vec::new());
        }

        let confidence = if self.min_divergence_percent > 0.0 {
            (0.5 + divergence.abs() / (self.min_divergence_percent * 8.0)).min(1.0)
        } else {
            1.0
        };
        let direction = if crossed_up {
            SignalDirection::Up
        } else {
            SignalDirection::Down
        };

        let signal = Signal::new(
            symbol,
            period,
            SignalType::MomentumShift,
            direction,
            divergence,
            confidence,
        )
        .with_indicator("ma_short", short)
        .with_indicator("ma_long", long);

        Ok(vec![signal])
    }
}
