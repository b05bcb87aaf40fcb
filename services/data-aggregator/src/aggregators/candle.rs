//! Candle aggregator implementation
//!
//! Per (symbol, period) state machine turning ticks into OHLCV bars. Holds only
//! the active bars; closed bars are handed back to the caller for archiving.

use chrono::{DateTime, Duration, Utc};
use rustc_hash::FxHashMap;
use services_common::constants::{EARLY_CLOSE_RATIO, STALE_CANDLE_MULTIPLIER, SYNTHETIC_IDLE_SECS};
use services_common::{Candle, CandleKey, Period, PriceTick};
use std::fmt;
use tracing::warn;

/// Why an active bar was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloseReason {
    /// Wall clock passed the bar's end
    Expired,
    /// Bar stayed open for more than twice its period
    Stale,
    /// Synthetic bar received no ticks for too long
    SyntheticIdle,
    /// Most of the period has elapsed
    NearEnd,
    /// Tick belongs to a later bucket
    Rollover,
    /// Closed by the periodic cleanup pass
    Forced,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Expired => "expired",
            Self::Stale => "stale",
            Self::SyntheticIdle => "synthetic_idle",
            Self::NearEnd => "near_end",
            Self::Rollover => "rollover",
            Self::Forced => "forced",
        };
        f.write_str(name)
    }
}

/// A bar that was closed while applying a tick
#[derive(Debug, Clone, PartialEq)]
pub struct ClosedCandle {
    /// The closed bar
    pub candle: Candle,
    /// Close trigger
    pub reason: CloseReason,
}

/// Result of applying one tick across all periods
#[derive(Debug, Default)]
pub struct TickOutcome {
    /// Active bars after the tick, one per period the tick was applied to
    pub active: Vec<Candle>,
    /// Bars closed by this tick
    pub closed: Vec<ClosedCandle>,
    /// Number of bars opened
    pub created: usize,
    /// Periods for which the tick was older than the active bar
    pub stale_periods: usize,
}

/// Decide whether `candle` must close before a tick in `bucket_start` is applied
#[must_use]
pub fn close_reason(
    candle: &Candle,
    bucket_start: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Option<CloseReason> {
    let duration_secs = candle.period.duration_seconds();
    let elapsed = candle.elapsed(now);

    if elapsed > Duration::seconds(duration_secs * STALE_CANDLE_MULTIPLIER) {
        return Some(CloseReason::Stale);
    }
    if now > candle.end_time {
        return Some(CloseReason::Expired);
    }
    let idle_since = candle.last_tick_at.max(candle.start_time);
    if !candle.is_real && now - idle_since > Duration::seconds(SYNTHETIC_IDLE_SECS) {
        return Some(CloseReason::SyntheticIdle);
    }
    // SAFETY: i64 to f64 - period lengths in milliseconds are exact in f64
    if elapsed.num_milliseconds() as f64 >= (duration_secs * 1000) as f64 * EARLY_CLOSE_RATIO {
        return Some(CloseReason::NearEnd);
    }
    if bucket_start >= candle.end_time {
        return Some(CloseReason::Rollover);
    }
    None
}

/// Aggregator for candle data processing
#[derive(Debug)]
pub struct CandleAggregator {
    periods: Vec<Period>,
    active: FxHashMap<CandleKey, Candle>,
    /// End of the last force-closed bar for keys with no active bar
    floors: FxHashMap<CandleKey, DateTime<Utc>>,
}

impl CandleAggregator {
    /// Create a new candle aggregator for the given periods
    #[must_use]
    pub fn new(periods: Vec<Period>) -> Self {
        let mut periods = periods;
        periods.sort();
        periods.dedup();
        Self {
            periods,
            active: FxHashMap::default(),
            floors: FxHashMap::default(),
        }
    }

    /// Configured periods, shortest first
    #[must_use]
    pub fn periods(&self) -> &[Period] {
        &self.periods
    }

    /// Number of open bars
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Active bar for a key
    #[must_use]
    pub fn active(&self, symbol: &str, period: Period) -> Option<&Candle> {
        self.active.get(&(symbol.to_string(), period))
    }

    /// Seed an active bar, e.g. restored from storage
    pub fn restore(&mut self, candle: Candle) {
        if !candle.is_closed {
            self.floors.remove(&candle.key());
            self.active.insert(candle.key(), candle);
        }
    }

    /// Apply a tick to every configured period
    pub fn apply(&mut self, tick: &PriceTick, now: DateTime<Utc>) -> TickOutcome {
        let mut outcome = TickOutcome::default();

        for &period in &self.periods {
            let key = (tick.symbol.clone(), period);
            let bucket_start = period.bucket_start(tick.timestamp);

            let Some(candle) = self.active.get_mut(&key) else {
                let floor = self.floors.get(&key).copied();
                if floor.is_some_and(|floor| tick.timestamp < floor) {
                    outcome.stale_periods += 1;
                    continue;
                }
                self.floors.remove(&key);
                let start_time = floor.map_or(bucket_start, |floor| bucket_start.max(floor));
                let candle = Candle::open_with(tick, period, start_time);
                outcome.active.push(candle.clone());
                outcome.created += 1;
                self.active.insert(key, candle);
                continue;
            };

            if tick.timestamp < candle.start_time {
                outcome.stale_periods += 1;
                continue;
            }

            match close_reason(candle, bucket_start, now) {
                Some(reason) => {
                    if reason == CloseReason::Stale {
                        warn!(
                            symbol = %candle.symbol,
                            period = %period,
                            start = %candle.start_time,
                            "Candle open for more than twice its period, closing"
                        );
                    }
                    candle.close();
                    let start_time = bucket_start.max(candle.end_time);
                    let next = Candle::open_with(tick, period, start_time);
                    let closed = std::mem::replace(candle, next);
                    outcome.closed.push(ClosedCandle {
                        candle: closed,
                        reason,
                    });
                    outcome.active.push(candle.clone());
                    outcome.created += 1;
                }
                None => {
                    candle.apply_tick(tick);
                    outcome.active.push(candle.clone());
                }
            }
        }

        outcome
    }

    /// Close and remove bars open longer than twice their period
    ///
    /// Later ticks for a closed key never reopen before the closed bar's end.
    pub fn force_close_stale(&mut self, now: DateTime<Utc>) -> Vec<ClosedCandle> {
        let stale_keys: Vec<CandleKey> = self
            .active
            .iter()
            .filter(|(_, c)| {
                c.elapsed(now) > Duration::seconds(c.period.duration_seconds() * STALE_CANDLE_MULTIPLIER)
            })
            .map(|(k, _)| k.clone())
            .collect();

        let mut closed = Vec::with_capacity(stale_keys.len());
        for key in stale_keys {
            let Some(mut candle) = self.active.remove(&key) else {
                continue;
            };
            candle.close();
            self.floors.insert(key, candle.end_time);
            closed.push(ClosedCandle {
                candle,
                reason: CloseReason::Forced,
            });
        }
        closed
    }
}

impl Default for CandleAggregator {
    fn default() -> Self {
        Self::new(Period::ALL.to_vec())
    }
}
