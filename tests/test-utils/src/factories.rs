//! Factory patterns for generating test data

use chrono::{DateTime, Duration, TimeZone, Utc};
use fake::{Fake, Faker};
use services_common::{
    Candle, Period, PriceTick, Signal, SignalDirection, SignalType,
};

/// Fixed reference time used across tests: 2024-01-01 12:00:00 UTC
pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0)
        .single()
        .unwrap_or_else(Utc::now)
}

/// Factory for creating test ticks with customization
#[derive(Debug, Clone)]
pub struct TickFactory {
    symbol: String,
    start: DateTime<Utc>,
    volume: f64,
}

impl TickFactory {
    pub fn new() -> Self {
        Self {
            symbol: "BTCUSDT".to_string(),
            start: base_time(),
            volume: 1.0,
        }
    }

    pub fn with_symbol(mut self, symbol: impl Into<String>) -> Self {
        self.symbol = symbol.into();
        self
    }

    pub fn with_start(mut self, start: DateTime<Utc>) -> Self {
        self.start = start;
        self
    }

    pub fn with_volume(mut self, volume: f64) -> Self {
        self.volume = volume;
        self
    }

    /// Tick at `offset_secs` after the factory start
    pub fn at(&self, price: f64, offset_secs: i64) -> PriceTick {
        PriceTick::new(
            self.symbol.clone(),
            price,
            self.volume,
            self.start + Duration::seconds(offset_secs),
        )
    }

    /// One tick per `(price, offset_secs)` pair
    pub fn series(&self, points: &[(f64, i64)]) -> Vec<PriceTick> {
        points.iter().map(|&(p, o)| self.at(p, o)).collect()
    }

    /// Random walk of `count` ticks spaced `step_secs` apart
    pub fn random_walk(&self, count: usize, start_price: f64, step_secs: i64) -> Vec<PriceTick> {
        let mut price = start_price;
        (0..count)
            .map(|i| {
                let drift: f64 = (-0.5..0.5).fake();
                price = (price * (1.0 + drift / 100.0)).max(0.0001);
                // SAFETY: usize to i64 - test series are small
                self.at(price, i as i64 * step_secs)
            })
            .collect()
    }
}

impl Default for TickFactory {
    fn default() -> Self {
        Self::new()
    }
}

/// Factory for closed candle series
#[derive(Debug, Clone)]
pub struct CandleFactory {
    symbol: String,
    period: Period,
    start: DateTime<Utc>,
}

impl CandleFactory {
    pub fn new(period: Period) -> Self {
        Self {
            symbol: "BTCUSDT".to_string(),
            period,
            start: period.bucket_start(base_time()),
        }
    }

    pub fn with_symbol(mut self, symbol: impl Into<String>) -> Self {
        self.symbol = symbol.into();
        self
    }

    /// Closed, real candle `index` periods after the start
    pub fn candle(&self, index: usize, open: f64, close: f64, volume: f64) -> Candle {
        // SAFETY: usize to i32 - candle indices in tests are small
        let start = self.start + self.period.to_duration() * index as i32;
        let end = start + self.period.to_duration();
        let mut candle = Candle::open_with(
            &PriceTick::new(self.symbol.clone(), open, volume, start),
            self.period,
            start,
        );
        candle.apply_tick(&PriceTick::new(
            self.symbol.clone(),
            close,
            0.0,
            end - Duration::seconds(1),
        ));
        candle.volume = volume;
        candle.volume_usd = volume * close;
        candle.close();
        candle
    }

    /// Consecutive candles from `(close, volume)` pairs; each opens at the previous close
    pub fn series(&self, first_open: f64, points: &[(f64, f64)]) -> Vec<Candle> {
        let mut open = first_open;
        points
            .iter()
            .enumerate()
            .map(|(i, &(close, volume))| {
                let candle = self.candle(i, open, close, volume);
                open = close;
                candle
            })
            .collect()
    }

    /// Flat series with the given closes and constant volume
    pub fn closes(&self, closes: &[f64], volume: f64) -> Vec<Candle> {
        let Some(&first) = closes.first() else {
            return Vec::new();
        };
        let points: Vec<(f64, f64)> = closes.iter().map(|&c| (c, volume)).collect();
        self.series(first, &points)
    }
}

/// Factory for signals
#[derive(Debug, Clone)]
pub struct SignalFactory {
    symbol: String,
    period: Period,
}

impl SignalFactory {
    pub fn new() -> Self {
        Self {
            symbol: "BTCUSDT".to_string(),
            period: Period::M5,
        }
    }

    pub fn with_symbol(mut self, symbol: impl Into<String>) -> Self {
        self.symbol = symbol.into();
        self
    }

    /// Pump/dump signal from a change percentage
    pub fn price_change(&self, change_percent: f64, confidence: f64) -> Signal {
        let signal_type = if change_percent >= 0.0 {
            SignalType::Pump
        } else {
            SignalType::Dump
        };
        let mut signal = Signal::new(
            self.symbol.clone(),
            self.period,
            signal_type,
            SignalDirection::from_change(change_percent),
            change_percent,
            confidence,
        );
        signal.id = format!("sig-{}", Faker.fake::<u32>());
        signal.source_analyzer = "test".to_string();
        signal
    }

    /// Signal carrying a `volume_usd` indicator
    pub fn with_volume(&self, change_percent: f64, confidence: f64, volume_usd: f64) -> Signal {
        self.price_change(change_percent, confidence)
            .with_indicator("volume_usd", volume_usd)
    }
}

impl Default for SignalFactory {
    fn default() -> Self {
        Self::new()
    }
}
