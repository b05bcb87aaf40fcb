//! Signals produced by analyzers

use crate::types::market::Period;
use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of market observation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalType {
    /// Sharp price rise
    Pump,
    /// Sharp price drop
    Dump,
    /// Volume far above its trailing average
    VolumeSpike,
    /// Moving-average crossover
    MomentumShift,
    /// Analyzer-defined kind
    Custom(String),
}

impl fmt::Display for SignalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pump => f.write_str("pump"),
            Self::Dump => f.write_str("dump"),
            Self::VolumeSpike => f.write_str("volume_spike"),
            Self::MomentumShift => f.write_str("momentum_shift"),
            Self::Custom(name) => f.write_str(name),
        }
    }
}

/// Direction of a signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalDirection {
    /// Bullish
    Up,
    /// Bearish
    Down,
    /// No directional bias
    Neutral,
}

impl SignalDirection {
    /// Direction implied by the sign of a change
    #[must_use]
    pub fn from_change(change: f64) -> Self {
        if change > 0.0 {
            Self::Up
        } else if change < 0.0 {
            Self::Down
        } else {
            Self::Neutral
        }
    }

    /// Lowercase name
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Up => "up",
            Self::Down => "down",
            Self::Neutral => "neutral",
        }
    }
}

impl fmt::Display for SignalDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse strength bucket used for tagging
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalStrength {
    /// Below 3% move or low confidence
    Weak,
    /// 3% to 10% move
    Moderate,
    /// Above 10% move with high confidence
    Strong,
}

impl SignalStrength {
    /// Lowercase name
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Weak => "weak",
            Self::Moderate => "moderate",
            Self::Strong => "strong",
        }
    }
}

/// Free-form signal annotations
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SignalMetadata {
    /// Tags attached by analyzers and pipeline stages
    pub tags: Vec<String>,
    /// Numeric indicators, e.g. `volume_usd`, `ma_short`
    pub indicators: FxHashMap<String, f64>,
}

/// Directional observation produced by an analyzer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    /// Unique id assigned by the analysis engine
    pub id: String,
    /// Symbol
    pub symbol: String,
    /// Kind
    pub signal_type: SignalType,
    /// Direction
    pub direction: SignalDirection,
    /// Percentage change that triggered the signal
    pub change_percent: f64,
    /// Confidence in `[0, 1]`
    pub confidence: f64,
    /// Period of the series the signal was computed on
    pub period: Period,
    /// Detection time
    pub timestamp: DateTime<Utc>,
    /// Tags and indicators
    pub metadata: SignalMetadata,
    /// Name of the producing analyzer
    pub source_analyzer: String,
}

impl Signal {
    /// Create an untagged signal; the engine fills in id, timestamp and source
    pub fn new(
        symbol: impl Into<String>,
        period: Period,
        signal_type: SignalType,
        direction: SignalDirection,
        change_percent: f64,
        confidence: f64,
    ) -> Self {
        Self {
            id: String::new(),
            symbol: symbol.into(),
            signal_type,
            direction,
            change_percent,
            confidence,
            period,
            timestamp: Utc::now(),
            metadata: SignalMetadata::default(),
            source_analyzer: String::new(),
        }
    }

    /// Attach a numeric indicator
    #[must_use]
    pub fn with_indicator(mut self, name: impl Into<String>, value: f64) -> Self {
        self.metadata.indicators.insert(name.into(), value);
        self
    }

    /// Attach a tag, ignoring duplicates
    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.add_tag(tag);
        self
    }

    /// Attach a tag in place, ignoring duplicates
    pub fn add_tag(&mut self, tag: impl Into<String>) {
        let tag = tag.into();
        if !self.metadata.tags.contains(&tag) {
            self.metadata.tags.push(tag);
        }
    }

    /// Indicator lookup
    #[must_use]
    pub fn indicator(&self, name: &str) -> Option<f64> {
        self.metadata.indicators.get(name).copied()
    }

    /// Strength bucket derived from change magnitude and confidence
    #[must_use]
    pub fn strength(&self) -> SignalStrength {
        let magnitude = self.change_percent.abs();
        if magnitude >= 10.0 && self.confidence >= 0.7 {
            SignalStrength::Strong
        } else if magnitude >= 3.0 {
            SignalStrength::Moderate
        } else {
            SignalStrength::Weak
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_strength() {
        let strong = Signal::new("BTC", Period::M5, SignalType::Pump, SignalDirection::Up, 12.0, 0.9);
        let moderate =
            Signal::new("BTC", Period::M5, SignalType::Dump, SignalDirection::Down, -5.0, 0.9);
        let weak = Signal::new("BTC", Period::M5, SignalType::Pump, SignalDirection::Up, 12.0, 0.2);

        assert_eq!(strong.strength(), SignalStrength::Strong);
        assert_eq!(moderate.strength(), SignalStrength::Moderate);
        assert_eq!(weak.strength(), SignalStrength::Moderate);
    }

    #[test]
    fn test_tags_are_deduplicated() {
        let signal = Signal::new("ETH", Period::M1, SignalType::VolumeSpike, SignalDirection::Neutral, 0.0, 0.5)
            .with_tag("volume")
            .with_tag("volume")
            .with_indicator("volume_usd", 1_000.0);

        assert_eq!(signal.metadata.tags, vec!["volume".to_string()]);
        assert_eq!(signal.indicator("volume_usd"), Some(1_000.0));
    }

    #[test]
    fn test_direction_from_change() {
        assert_eq!(SignalDirection::from_change(1.5), SignalDirection::Up);
        assert_eq!(SignalDirection::from_change(-0.1), SignalDirection::Down);
        assert_eq!(SignalDirection::from_change(0.0), SignalDirection::Neutral);
    }
}
