//! Common test fixtures using rstest

use crate::factories::{CandleFactory, SignalFactory, TickFactory, base_time};
use chrono::{DateTime, Utc};
use rstest::*;
use services_common::{
    EventBusConfig, ManualClock, MemoryCandleStorage, MemoryPriceStorage, Period,
};
use std::sync::Arc;

/// Reference start time
#[fixture]
pub fn start_time() -> DateTime<Utc> {
    base_time()
}

/// Manual clock frozen at the reference time
#[fixture]
pub fn manual_clock(start_time: DateTime<Utc>) -> Arc<ManualClock> {
    Arc::new(ManualClock::new(start_time))
}

/// Fresh in-memory tick store
#[fixture]
pub fn price_storage() -> Arc<MemoryPriceStorage> {
    Arc::new(MemoryPriceStorage::new())
}

/// Fresh in-memory candle store
#[fixture]
pub fn candle_storage() -> Arc<MemoryCandleStorage> {
    Arc::new(MemoryCandleStorage::new())
}

/// Small bus suitable for tests: two workers, short shutdown, dead letters on
#[fixture]
pub fn bus_config() -> EventBusConfig {
    EventBusConfig {
        buffer_size: 256,
        worker_count: 2,
        enable_logging: false,
        metrics_interval_ms: 0,
        enable_dead_letter_queue: true,
        dead_letter_capacity: 16,
        shutdown_timeout_ms: 1000,
    }
}

/// Tick factory for BTCUSDT starting at the reference time
#[fixture]
pub fn tick_factory() -> TickFactory {
    TickFactory::new()
}

/// Five-minute candle factory
#[fixture]
pub fn candle_factory() -> CandleFactory {
    CandleFactory::new(Period::M5)
}

/// Signal factory
#[fixture]
pub fn signal_factory() -> SignalFactory {
    SignalFactory::new()
}
