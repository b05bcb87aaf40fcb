//! Candle Aggregation Service
//!
//! Aggregates price ticks into OHLCV candles for every configured period:
//! - Epoch-aligned buckets (1m, 5m, 15m, 30m, 1h, 4h, 1d)
//! - Early, stale and idle close rules
//! - Active snapshots and closed history persisted through `CandleStorage`
//! - Periodic cleanup and statistics

pub mod aggregators;
pub mod config;
pub mod engine;
pub mod stats;

pub use aggregators::{CandleAggregator, CloseReason, ClosedCandle, TickOutcome};
pub use config::CandleConfig;
pub use engine::{AggregatorError, CandleEngine};
pub use stats::CandleStats;
