//! In-memory storage implementations

use super::{CandleStorage, PriceStorage, StorageResult};
use crate::constants::{DEFAULT_CANDLE_HISTORY_DEPTH, DEFAULT_PRICE_HISTORY_PER_SYMBOL};
use crate::errors::StorageError;
use crate::types::{Candle, CandleKey, Period, PriceTick};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::collections::VecDeque;
use tracing::debug;

/// Bounded tick ring per symbol
#[derive(Debug)]
pub struct MemoryPriceStorage {
    ticks: RwLock<FxHashMap<String, VecDeque<PriceTick>>>,
    capacity_per_symbol: usize,
}

impl MemoryPriceStorage {
    /// Create with default per-symbol capacity
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_PRICE_HISTORY_PER_SYMBOL)
    }

    /// Create with an explicit per-symbol capacity
    #[must_use]
    pub fn with_capacity(capacity_per_symbol: usize) -> Self {
        Self {
            ticks: RwLock::new(FxHashMap::default()),
            capacity_per_symbol: capacity_per_symbol.max(1),
        }
    }

    /// Number of ticks held for a symbol
    #[must_use]
    pub fn len(&self, symbol: &str) -> usize {
        self.ticks.read().get(symbol).map_or(0, VecDeque::len)
    }
}

impl Default for MemoryPriceStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PriceStorage for MemoryPriceStorage {
    async fn append_tick(&self, tick: &PriceTick) -> StorageResult<()> {
        if !tick.is_valid() {
            return Err(StorageError::InvalidData(format!(
                "rejected tick for '{}' at {}",
                tick.symbol, tick.price
            )));
        }

        let mut ticks = self.ticks.write();
        let series = ticks.entry(tick.symbol.clone()).or_default();
        series.push_back(tick.clone());
        while series.len() > self.capacity_per_symbol {
            series.pop_front();
        }
        Ok(())
    }

    async fn get_latest(&self, symbol: &str) -> StorageResult<Option<PriceTick>> {
        Ok(self
            .ticks
            .read()
            .get(symbol)
            .and_then(|series| series.back().cloned()))
    }

    async fn get_range(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StorageResult<Vec<PriceTick>> {
        let ticks = self.ticks.read();
        let series = ticks
            .get(symbol)
            .ok_or_else(|| StorageError::SymbolNotFound(symbol.to_string()))?;

        Ok(series
            .iter()
            .filter(|t| t.timestamp >= start && t.timestamp < end)
            .cloned()
            .collect())
    }

    async fn get_symbols(&self) -> StorageResult<Vec<String>> {
        let mut symbols: Vec<String> = self.ticks.read().keys().cloned().collect();
        symbols.sort();
        Ok(symbols)
    }
}

/// Active snapshots plus bounded closed history per (symbol, period)
#[derive(Debug)]
pub struct MemoryCandleStorage {
    active: RwLock<FxHashMap<CandleKey, Candle>>,
    history: RwLock<FxHashMap<CandleKey, VecDeque<Candle>>>,
    max_history: usize,
}

impl MemoryCandleStorage {
    /// Create with default history depth
    #[must_use]
    pub fn new() -> Self {
        Self::with_history_depth(DEFAULT_CANDLE_HISTORY_DEPTH)
    }

    /// Create with an explicit history depth per key
    #[must_use]
    pub fn with_history_depth(max_history: usize) -> Self {
        Self {
            active: RwLock::new(FxHashMap::default()),
            history: RwLock::new(FxHashMap::default()),
            max_history: max_history.max(1),
        }
    }

    /// Number of closed candles held for a key
    #[must_use]
    pub fn history_len(&self, symbol: &str, period: Period) -> usize {
        self.history
            .read()
            .get(&(symbol.to_string(), period))
            .map_or(0, VecDeque::len)
    }
}

impl Default for MemoryCandleStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CandleStorage for MemoryCandleStorage {
    async fn save_active(&self, candle: &Candle) -> StorageResult<()> {
        if candle.is_closed {
            return Err(StorageError::InvalidData(format!(
                "closed candle {} {} cannot be active",
                candle.symbol, candle.period
            )));
        }
        self.active.write().insert(candle.key(), candle.clone());
        Ok(())
    }

    async fn get_active(&self, symbol: &str, period: Period) -> StorageResult<Option<Candle>> {
        Ok(self
            .active
            .read()
            .get(&(symbol.to_string(), period))
            .cloned())
    }

    async fn archive(&self, candle: &Candle) -> StorageResult<()> {
        if !candle.is_closed {
            return Err(StorageError::InvalidData(format!(
                "open candle {} {} cannot be archived",
                candle.symbol, candle.period
            )));
        }

        let key = candle.key();
        {
            let mut history = self.history.write();
            let series = history.entry(key.clone()).or_default();
            if let Some(last) = series.back() {
                if candle.start_time < last.end_time {
                    return Err(StorageError::InvalidData(format!(
                        "candle {} {} starting {} overlaps history ending {}",
                        candle.symbol, candle.period, candle.start_time, last.end_time
                    )));
                }
            }
            series.push_back(candle.clone());
            while series.len() > self.max_history {
                series.pop_front();
            }
        }

        let mut active = self.active.write();
        if active
            .get(&key)
            .is_some_and(|a| a.start_time == candle.start_time)
        {
            active.remove(&key);
        }
        Ok(())
    }

    async fn get_history(
        &self,
        symbol: &str,
        period: Period,
        limit: usize,
    ) -> StorageResult<Vec<Candle>> {
        let history = self.history.read();
        let Some(series) = history.get(&(symbol.to_string(), period)) else {
            return Ok(Vec::new());
        };
        let skip = series.len().saturating_sub(limit);
        Ok(series.iter().skip(skip).cloned().collect())
    }

    async fn cleanup_older_than(&self, cutoff: DateTime<Utc>) -> StorageResult<usize> {
        let mut removed = 0;
        let mut history = self.history.write();
        for series in history.values_mut() {
            while series.front().is_some_and(|c| c.end_time < cutoff) {
                series.pop_front();
                removed += 1;
            }
        }
        history.retain(|_, series| !series.is_empty());

        if removed > 0 {
            debug!(removed, cutoff = %cutoff, "Removed expired candles");
        }
        Ok(removed)
    }
}
