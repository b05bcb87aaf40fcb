//! Engine lifecycle, back-pressure and maintenance behaviour

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use data_aggregator::{AggregatorError, CandleConfig, CandleEngine};
use rstest::*;
use services_common::{
    Candle, CandleStorage, ManagedService, ManualClock, MemoryCandleStorage, MemoryPriceStorage,
    Period, PriceTick, StorageError, StorageResult,
};
use std::sync::Arc;
use test_utils::{TickFactory, base_time, manual_clock, wait_until};

fn engine_with(
    config: CandleConfig,
    candles: Arc<dyn CandleStorage>,
    clock: Arc<ManualClock>,
) -> CandleEngine {
    CandleEngine::new(config, candles, Arc::new(MemoryPriceStorage::new()), clock)
}

fn m1_config() -> CandleConfig {
    CandleConfig {
        periods: vec![Period::M1],
        ..CandleConfig::default()
    }
}

/// Candle store whose writes always fail
struct BrokenCandleStorage;

#[async_trait]
impl CandleStorage for BrokenCandleStorage {
    async fn save_active(&self, _candle: &Candle) -> StorageResult<()> {
        Err(StorageError::Backend("disk unavailable".to_string()))
    }

    async fn get_active(&self, _symbol: &str, _period: Period) -> StorageResult<Option<Candle>> {
        Ok(None)
    }

    async fn archive(&self, _candle: &Candle) -> StorageResult<()> {
        Err(StorageError::Backend("disk unavailable".to_string()))
    }

    async fn get_history(
        &self,
        _symbol: &str,
        _period: Period,
        _limit: usize,
    ) -> StorageResult<Vec<Candle>> {
        Ok(Vec::new())
    }

    async fn cleanup_older_than(&self, _cutoff: DateTime<Utc>) -> StorageResult<usize> {
        Ok(0)
    }
}

#[rstest]
#[tokio::test]
async fn test_queue_full_drops_ticks(manual_clock: Arc<ManualClock>) {
    let engine = engine_with(
        CandleConfig {
            queue_capacity: 2,
            ..m1_config()
        },
        Arc::new(MemoryCandleStorage::new()),
        manual_clock,
    );
    let ticks = TickFactory::new();

    // Not started, nothing drains the queue
    assert!(engine.process_tick(ticks.at(1.0, 0)).is_ok());
    assert!(engine.process_tick(ticks.at(2.0, 1)).is_ok());
    assert!(matches!(
        engine.process_tick(ticks.at(3.0, 2)),
        Err(AggregatorError::QueueFull)
    ));

    let stats = engine.get_stats();
    assert_eq!(stats.ticks_received, 3);
    assert_eq!(stats.ticks_dropped, 1);
}

#[rstest]
#[tokio::test]
async fn test_invalid_tick_rejected(manual_clock: Arc<ManualClock>) {
    let engine = engine_with(m1_config(), Arc::new(MemoryCandleStorage::new()), manual_clock);

    let result = engine.process_tick(PriceTick::new("BTCUSDT", -5.0, 1.0, base_time()));
    assert!(matches!(result, Err(AggregatorError::InvalidTick(symbol)) if symbol == "BTCUSDT"));
    assert_eq!(engine.get_stats().ticks_dropped, 1);
}

#[rstest]
#[tokio::test]
async fn test_start_twice_and_stop_twice(manual_clock: Arc<ManualClock>) {
    let engine = engine_with(m1_config(), Arc::new(MemoryCandleStorage::new()), manual_clock);

    engine.start().unwrap();
    assert!(matches!(engine.start(), Err(AggregatorError::AlreadyRunning)));
    assert!(ManagedService::health_check(&engine).await);

    engine.stop().await.unwrap();
    assert!(matches!(engine.stop().await, Err(AggregatorError::NotRunning)));
    assert!(!ManagedService::health_check(&engine).await);

    // The service contract treats repeated calls as no-ops
    ManagedService::stop(&engine).await.unwrap();
}

#[rstest]
#[tokio::test]
async fn test_restart_keeps_active_bars(manual_clock: Arc<ManualClock>) {
    let engine = engine_with(
        m1_config(),
        Arc::new(MemoryCandleStorage::new()),
        manual_clock.clone(),
    );
    let ticks = TickFactory::new();

    engine.start().unwrap();
    engine.process_tick(ticks.at(100.0, 5)).unwrap();
    wait_until(|| engine.get_stats().ticks_processed == 1)
        .await
        .unwrap();
    engine.stop().await.unwrap();

    manual_clock.set(base_time() + Duration::seconds(20));
    engine.start().unwrap();
    engine.process_tick(ticks.at(90.0, 20)).unwrap();
    wait_until(|| engine.get_stats().ticks_processed == 2)
        .await
        .unwrap();

    let active = engine.get_active("BTCUSDT", Period::M1).await.unwrap().unwrap();
    assert_eq!(active.trades, 2);
    assert_eq!(active.low, 90.0);
    assert_eq!(engine.get_stats().candles_created, 1);

    engine.stop().await.unwrap();
}

#[rstest]
#[tokio::test]
async fn test_cleanup_force_closes_and_expires_history(manual_clock: Arc<ManualClock>) {
    let candles = Arc::new(MemoryCandleStorage::new());

    // Closed two days before the reference time, beyond a one hour retention
    let old_start = base_time() - Duration::days(2);
    let mut old = Candle::open_with(
        &PriceTick::new("ETHUSDT", 2000.0, 1.0, old_start),
        Period::M1,
        old_start,
    );
    old.close();
    candles.archive(&old).await.unwrap();

    let engine = engine_with(
        CandleConfig {
            cleanup_interval_secs: 1,
            retention_hours: 1,
            ..m1_config()
        },
        candles.clone(),
        manual_clock.clone(),
    );
    engine.start().unwrap();
    engine
        .process_tick(TickFactory::new().at(100.0, 0))
        .unwrap();
    wait_until(|| engine.get_stats().ticks_processed == 1)
        .await
        .unwrap();

    // Open for three minutes on a one minute period
    manual_clock.advance(Duration::minutes(3));
    test_utils::wait_for(
        || async {
            let stats = engine.get_stats();
            stats.forced_closes == 1 && stats.active_candles == 0
        },
        std::time::Duration::from_secs(5),
        std::time::Duration::from_millis(20),
    )
    .await
    .unwrap();

    assert_eq!(candles.history_len("ETHUSDT", Period::M1), 0);
    assert_eq!(candles.history_len("BTCUSDT", Period::M1), 1);
    let stats = engine.get_stats();
    assert_eq!(stats.active_candles, 0);
    assert_eq!(stats.candles_closed, 1);

    engine.stop().await.unwrap();
}

#[rstest]
#[tokio::test]
async fn test_storage_errors_are_counted_not_fatal(manual_clock: Arc<ManualClock>) {
    let engine = engine_with(m1_config(), Arc::new(BrokenCandleStorage), manual_clock);
    let ticks = TickFactory::new();

    engine.start().unwrap();
    engine.process_tick(ticks.at(100.0, 1)).unwrap();
    engine.process_tick(ticks.at(101.0, 2)).unwrap();
    wait_until(|| engine.get_stats().ticks_processed == 2)
        .await
        .unwrap();

    let stats = engine.get_stats();
    assert_eq!(stats.storage_errors, 2);
    assert!(engine.is_running());
    assert!(ManagedService::health_check(&engine).await);

    engine.stop().await.unwrap();
}
