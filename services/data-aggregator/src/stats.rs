//! Candle engine statistics

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters updated by the ingest path and the processing task
#[derive(Debug, Default)]
pub struct CandleStatsCollector {
    pub(crate) ticks_received: AtomicU64,
    pub(crate) ticks_processed: AtomicU64,
    pub(crate) ticks_dropped: AtomicU64,
    pub(crate) ticks_stale: AtomicU64,
    pub(crate) candles_created: AtomicU64,
    pub(crate) candles_closed: AtomicU64,
    pub(crate) forced_closes: AtomicU64,
    pub(crate) storage_errors: AtomicU64,
    pub(crate) active_candles: AtomicU64,
}

impl CandleStatsCollector {
    pub(crate) fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    /// Point-in-time copy
    #[must_use]
    pub fn snapshot(&self) -> CandleStats {
        CandleStats {
            ticks_received: self.ticks_received.load(Ordering::Relaxed),
            ticks_processed: self.ticks_processed.load(Ordering::Relaxed),
            ticks_dropped: self.ticks_dropped.load(Ordering::Relaxed),
            ticks_stale: self.ticks_stale.load(Ordering::Relaxed),
            candles_created: self.candles_created.load(Ordering::Relaxed),
            candles_closed: self.candles_closed.load(Ordering::Relaxed),
            forced_closes: self.forced_closes.load(Ordering::Relaxed),
            storage_errors: self.storage_errors.load(Ordering::Relaxed),
            active_candles: self.active_candles.load(Ordering::Relaxed),
        }
    }
}

/// Candle engine statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandleStats {
    /// Ticks offered to the engine
    pub ticks_received: u64,
    /// Ticks applied by the processing task
    pub ticks_processed: u64,
    /// Ticks rejected (full queue or invalid)
    pub ticks_dropped: u64,
    /// Ticks older than the active bar for at least one period
    pub ticks_stale: u64,
    /// Bars opened
    pub candles_created: u64,
    /// Bars closed, including forced closes
    pub candles_closed: u64,
    /// Bars closed by the cleanup pass
    pub forced_closes: u64,
    /// Storage calls that failed
    pub storage_errors: u64,
    /// Bars currently open
    pub active_candles: u64,
}

impl CandleStats {
    /// Share of received ticks that were processed
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        if self.ticks_received == 0 {
            return 0.0;
        }
        // SAFETY: u64 to f64 for rate calculation
        self.ticks_processed as f64 / self.ticks_received as f64
    }
}
