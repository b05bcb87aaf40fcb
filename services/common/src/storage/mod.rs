//! Storage contracts for ticks and candles
//!
//! Only in-memory implementations ship here; persistent backends implement the
//! same traits.

pub mod memory;

use crate::errors::StorageError;
use crate::types::{Candle, Period, PriceTick};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub use memory::{MemoryCandleStorage, MemoryPriceStorage};

/// Result alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Tick storage
#[async_trait]
pub trait PriceStorage: Send + Sync {
    /// Append a tick to the symbol's series
    async fn append_tick(&self, tick: &PriceTick) -> StorageResult<()>;

    /// Most recent tick for a symbol
    async fn get_latest(&self, symbol: &str) -> StorageResult<Option<PriceTick>>;

    /// Ticks with `start <= timestamp < end`, oldest first
    async fn get_range(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StorageResult<Vec<PriceTick>>;

    /// All symbols with at least one tick, sorted
    async fn get_symbols(&self) -> StorageResult<Vec<String>>;
}

/// Candle storage: one active snapshot plus closed history per (symbol, period)
#[async_trait]
pub trait CandleStorage: Send + Sync {
    /// Replace the active snapshot
    async fn save_active(&self, candle: &Candle) -> StorageResult<()>;

    /// Current active snapshot
    async fn get_active(&self, symbol: &str, period: Period) -> StorageResult<Option<Candle>>;

    /// Append a closed candle to history and clear the matching active snapshot
    async fn archive(&self, candle: &Candle) -> StorageResult<()>;

    /// Up to `limit` most recent closed candles, oldest first
    async fn get_history(
        &self,
        symbol: &str,
        period: Period,
        limit: usize,
    ) -> StorageResult<Vec<Candle>>;

    /// Drop closed candles that ended before `cutoff`; returns the number removed
    async fn cleanup_older_than(&self, cutoff: DateTime<Utc>) -> StorageResult<usize>;
}
