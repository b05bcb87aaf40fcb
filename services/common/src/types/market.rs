//! Market data types: ticks, aggregation periods and OHLCV candles

use crate::constants::REAL_CANDLE_COVERAGE;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Single price/volume observation for a symbol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceTick {
    /// Trading symbol, e.g. `BTCUSDT`
    pub symbol: String,
    /// Last traded price
    pub price: f64,
    /// Base-asset volume carried by this tick
    pub volume: f64,
    /// Quote (USD) volume carried by this tick, 0 when the producer does not report it
    pub volume_usd: f64,
    /// Exchange timestamp
    pub timestamp: DateTime<Utc>,
}

impl PriceTick {
    /// Create a tick with USD volume derived from price and volume
    pub fn new(symbol: impl Into<String>, price: f64, volume: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            symbol: symbol.into(),
            price,
            volume,
            volume_usd: price * volume,
            timestamp,
        }
    }

    /// USD volume, falling back to `price * volume` when not reported
    #[must_use]
    pub fn notional(&self) -> f64 {
        if self.volume_usd > 0.0 {
            self.volume_usd
        } else {
            self.price * self.volume
        }
    }

    /// Basic sanity check applied before aggregation
    #[must_use]
    pub fn is_valid(&self) -> bool {
        !self.symbol.is_empty()
            && self.price.is_finite()
            && self.price > 0.0
            && self.volume.is_finite()
            && self.volume >= 0.0
    }
}

/// Candle aggregation period
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Period {
    /// 1 minute bars
    #[serde(rename = "1m")]
    M1,
    /// 5 minute bars
    #[serde(rename = "5m")]
    M5,
    /// 15 minute bars
    #[serde(rename = "15m")]
    M15,
    /// 30 minute bars
    #[serde(rename = "30m")]
    M30,
    /// 1 hour bars
    #[serde(rename = "1h")]
    H1,
    /// 4 hour bars
    #[serde(rename = "4h")]
    H4,
    /// Daily bars
    #[serde(rename = "1d")]
    D1,
}

impl Period {
    /// All supported periods, shortest first
    pub const ALL: [Self; 7] = [
        Self::M1,
        Self::M5,
        Self::M15,
        Self::M30,
        Self::H1,
        Self::H4,
        Self::D1,
    ];

    /// Get duration in seconds
    #[must_use]
    pub const fn duration_seconds(&self) -> i64 {
        match self {
            Self::M1 => 60,
            Self::M5 => 300,
            Self::M15 => 900,
            Self::M30 => 1800,
            Self::H1 => 3600,
            Self::H4 => 14_400,
            Self::D1 => 86_400,
        }
    }

    /// Get chrono duration
    #[must_use]
    pub fn to_duration(&self) -> Duration {
        Duration::seconds(self.duration_seconds())
    }

    /// Canonical short name
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::M1 => "1m",
            Self::M5 => "5m",
            Self::M15 => "15m",
            Self::M30 => "30m",
            Self::H1 => "1h",
            Self::H4 => "4h",
            Self::D1 => "1d",
        }
    }

    /// Start of the wall-clock bucket containing `ts`
    ///
    /// Buckets are aligned to the UNIX epoch, so 5m bars start at minute-mod-5
    /// boundaries regardless of when the first tick arrived.
    #[must_use]
    pub fn bucket_start(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        let duration_secs = self.duration_seconds();
        let start_secs = ts.timestamp().div_euclid(duration_secs) * duration_secs;
        DateTime::from_timestamp(start_secs, 0).unwrap_or(ts)
    }

    /// End of the wall-clock bucket containing `ts`
    #[must_use]
    pub fn bucket_end(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        self.bucket_start(ts) + self.to_duration()
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Period {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "1m" => Ok(Self::M1),
            "5m" => Ok(Self::M5),
            "15m" => Ok(Self::M15),
            "30m" => Ok(Self::M30),
            "1h" => Ok(Self::H1),
            "4h" => Ok(Self::H4),
            "1d" => Ok(Self::D1),
            other => Err(format!("unsupported period: {other}")),
        }
    }
}

/// Key of one candle series
pub type CandleKey = (String, Period);

/// OHLCV candle data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    /// Symbol
    pub symbol: String,
    /// Period
    pub period: Period,
    /// Open price
    pub open: f64,
    /// High price
    pub high: f64,
    /// Low price
    pub low: f64,
    /// Close price
    pub close: f64,
    /// Base volume
    pub volume: f64,
    /// Quote volume in USD
    pub volume_usd: f64,
    /// Number of ticks folded into this bar
    pub trades: u64,
    /// Bucket start (inclusive)
    pub start_time: DateTime<Utc>,
    /// Bucket end (exclusive), always `start_time + period`
    pub end_time: DateTime<Utc>,
    /// Closed bars are immutable and live in history
    pub is_closed: bool,
    /// Backed by real ticks covering enough of the period
    pub is_real: bool,
    /// Timestamp of the first tick
    pub first_tick_at: DateTime<Utc>,
    /// Timestamp of the most recent tick
    pub last_tick_at: DateTime<Utc>,
}

impl Candle {
    /// Open a new bar at `start_time` seeded by `tick`
    ///
    /// A tick older than `start_time` (a bar reopened after an early close) is
    /// recorded as seen at `start_time`.
    #[must_use]
    pub fn open_with(tick: &PriceTick, period: Period, start_time: DateTime<Utc>) -> Self {
        let seen_at = tick.timestamp.max(start_time);
        Self {
            symbol: tick.symbol.clone(),
            period,
            open: tick.price,
            high: tick.price,
            low: tick.price,
            close: tick.price,
            volume: tick.volume,
            volume_usd: tick.notional(),
            trades: 1,
            start_time,
            end_time: start_time + period.to_duration(),
            is_closed: false,
            is_real: false,
            first_tick_at: seen_at,
            last_tick_at: seen_at,
        }
    }

    /// Fold a tick into an open bar; closed bars are left untouched
    pub fn apply_tick(&mut self, tick: &PriceTick) {
        if self.is_closed {
            return;
        }

        if tick.price > self.high {
            self.high = tick.price;
        }
        if tick.price < self.low {
            self.low = tick.price;
        }
        self.close = tick.price;
        self.volume += tick.volume;
        self.volume_usd += tick.notional();
        self.trades += 1;

        if tick.timestamp < self.first_tick_at {
            self.first_tick_at = tick.timestamp;
        }
        if tick.timestamp > self.last_tick_at {
            self.last_tick_at = tick.timestamp;
        }
        self.is_real = self.coverage_ratio() >= REAL_CANDLE_COVERAGE;
    }

    /// Mark the bar closed
    pub fn close(&mut self) {
        self.is_real = self.coverage_ratio() >= REAL_CANDLE_COVERAGE;
        self.is_closed = true;
    }

    /// Share of the period spanned by real ticks
    #[must_use]
    pub fn coverage_ratio(&self) -> f64 {
        let span = (self.last_tick_at - self.first_tick_at).num_milliseconds().max(0);
        // SAFETY: i64 to f64 - millisecond spans are far below f64 precision limits
        span as f64 / (self.period.duration_seconds() * 1000) as f64
    }

    /// Time since the bar opened
    #[must_use]
    pub fn elapsed(&self, now: DateTime<Utc>) -> Duration {
        now - self.start_time
    }

    /// Whether `ts` falls inside this bar's bucket
    #[must_use]
    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.start_time && ts < self.end_time
    }

    /// Percentage change from open to close
    #[must_use]
    pub fn change_percent(&self) -> f64 {
        if self.open == 0.0 {
            0.0
        } else {
            (self.close - self.open) / self.open * 100.0
        }
    }

    /// Series key
    #[must_use]
    pub fn key(&self) -> CandleKey {
        (self.symbol.clone(), self.period)
    }
}
