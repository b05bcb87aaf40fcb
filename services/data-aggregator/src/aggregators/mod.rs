//! Aggregator implementations

pub mod candle;

pub use candle::{CandleAggregator, CloseReason, ClosedCandle, TickOutcome, close_reason};
