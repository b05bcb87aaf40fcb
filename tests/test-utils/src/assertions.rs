//! Custom assertions for testing

use services_common::{Candle, Signal};
use std::fmt::Debug;

/// Assert that a value is within a range
pub fn assert_in_range<T: PartialOrd + Debug>(value: T, min: T, max: T) {
    assert!(
        value >= min && value <= max,
        "Value {:?} not in range [{:?}, {:?}]",
        value,
        min,
        max
    );
}

/// Assert the OHLC ordering and bucket alignment of a candle
pub fn assert_candle_invariants(candle: &Candle) {
    assert!(
        candle.low <= candle.open.min(candle.close),
        "low {} above open {} / close {}",
        candle.low,
        candle.open,
        candle.close
    );
    assert!(
        candle.high >= candle.open.max(candle.close),
        "high {} below open {} / close {}",
        candle.high,
        candle.open,
        candle.close
    );
    assert!(candle.volume >= 0.0, "negative volume {}", candle.volume);
    assert_eq!(
        candle.end_time - candle.start_time,
        candle.period.to_duration(),
        "candle span does not match period {}",
        candle.period
    );
}

/// Assert archived candles of one key are ordered and non-overlapping
pub fn assert_candle_sequence(candles: &[Candle]) {
    for window in candles.windows(2) {
        assert!(
            window[0].end_time <= window[1].start_time,
            "candles overlap: {} ends {} but next starts {}",
            window[0].symbol,
            window[0].end_time,
            window[1].start_time
        );
    }
}

/// Assert a signal passed through the pipeline's validation and enrichment
pub fn assert_signal_enriched(signal: &Signal) {
    assert!(!signal.id.is_empty(), "signal has no id");
    assert_in_range(signal.confidence, 0.0, 1.0);
    assert!(
        signal.metadata.tags.iter().any(|t| t.starts_with("strength:")),
        "signal missing strength tag: {:?}",
        signal.metadata.tags
    );
}

/// Assert that an error's message contains `expected`
pub fn assert_error_contains<E: std::fmt::Display>(error: &E, expected: &str) {
    let error_str = error.to_string();
    assert!(
        error_str.contains(expected),
        "Error message '{}' does not contain '{}'",
        error_str,
        expected
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factories::CandleFactory;
    use services_common::Period;

    #[test]
    fn test_factory_candles_hold_invariants() {
        let candles = CandleFactory::new(Period::M5).closes(&[100.0, 103.0, 99.0], 10.0);
        for candle in &candles {
            assert_candle_invariants(candle);
        }
        assert_candle_sequence(&candles);
    }
}
