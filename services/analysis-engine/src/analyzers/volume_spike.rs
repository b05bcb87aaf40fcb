//! Volume spike detection

use super::{Analyzer, scaled_confidence};
use crate::config::{AnalyzerConfig, VOLUME_SPIKE};
use services_common::{Candle, Period, Signal, SignalDirection, SignalType};

/// Compares the quote volume of the latest candle against the average of the
/// `lookback` candles before it
#[derive(Debug, Clone)]
pub struct VolumeSpikeAnalyzer {
    config: AnalyzerConfig,
    multiplier: f64,
    lookback: usize,
    min_volume_usd: f64,
}

impl VolumeSpikeAnalyzer {
    /// Create from settings (`multiplier`, `lookback`, `min_volume_usd`)
    #[must_use]
    pub fn new(config: AnalyzerConfig) -> Self {
        let multiplier = config.number("multiplier", 3.0).max(1.0);
        let lookback = config.count("lookback", 20);
        let min_volume_usd = config.number("min_volume_usd", 0.0);
        Self {
            config,
            multiplier,
            lookback,
            min_volume_usd,
        }
    }
}

impl Analyzer for VolumeSpikeAnalyzer {
    fn name(&self) -> &str {
        VOLUME_SPIKE
    }

    fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    fn analyze(&self, symbol: &str, period: Period, candles: &[Candle]) -> anyhow::Result<Vec<Signal>> {
        let Some((last, previous)) = candles.split_last() else {
            return Ok(Vec::new());
        };
        let trailing = &previous[previous.len().saturating_sub(self.lookback)..];
        if trailing.is_empty() || last.volume_usd < self.min_volume_usd {
            return Ok(Vec::new());
        }

        // SAFETY: usize to f64 - window lengths are small
        let average = trailing.iter().map(|c| c.volume_usd).sum::<f64>() / trailing.len() as f64;
        if average <= 0.0 {
            return Ok(Vec::new());
        }

        let ratio = last.volume_usd / average;
        if ratio < self.multiplier {
            return Ok(Vec::new());
        }

        let change = last.change_percent();
        let signal = Signal::new(
            symbol,
            period,
            SignalType::VolumeSpike,
            SignalDirection::from_change(change),
            change,
            scaled_confidence(ratio, self.multiplier),
        )
        .with_indicator("volume_ratio", ratio)
        .with_indicator("average_volume_usd", average)
        .with_indicator("candle_volume_usd", last.volume_usd);

        Ok(vec![signal])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use services_common::PriceTick;

    fn series(volumes: &[f64]) -> Vec<Candle> {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        volumes
            .iter()
            .enumerate()
            .map(|(i, &volume)| {
                let at = start + Duration::minutes(i as i64);
                let mut candle =
                    Candle::open_with(&PriceTick::new("DOGEUSDT", 1.0, volume, at), Period::M1, at);
                candle.apply_tick(&PriceTick::new("DOGEUSDT", 1.1, 0.0, at));
                candle
            })
            .collect()
    }

    #[test]
    fn test_spike_detected() {
        let analyzer = VolumeSpikeAnalyzer::new(AnalyzerConfig::defaults_for(VOLUME_SPIKE));
        let signals = analyzer
            .analyze("DOGEUSDT", Period::M1, &series(&[100.0, 100.0, 100.0, 450.0]))
            .unwrap();

        assert_eq!(signals.len(), 1);
        let signal = &signals[0];
        assert_eq!(signal.signal_type, SignalType::VolumeSpike);
        assert_eq!(signal.direction, SignalDirection::Up);
        assert!((signal.indicator("volume_ratio").unwrap() - 4.5).abs() < 1e-9);
        assert!((signal.confidence - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_no_spike_without_history() {
        let analyzer = VolumeSpikeAnalyzer::new(AnalyzerConfig::defaults_for(VOLUME_SPIKE));
        assert!(analyzer.analyze("DOGEUSDT", Period::M1, &series(&[900.0])).unwrap().is_empty());
        assert!(analyzer
            .analyze("DOGEUSDT", Period::M1, &series(&[100.0, 200.0]))
            .unwrap()
            .is_empty());
    }
}
