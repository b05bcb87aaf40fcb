//! End-to-end scenarios: ticks published on the bus end up as candles in storage

use chrono::Duration;
use data_aggregator::{CandleConfig, CandleEngine};
use rstest::*;
use services_common::{
    CandleStorage, Event, EventBus, EventBusConfig, EventSubscriber, ManualClock,
    MemoryCandleStorage, MemoryPriceStorage, Period, PriceStorage,
};
use std::sync::Arc;
use test_utils::{
    TickFactory, assert_candle_invariants, base_time, bus_config, manual_clock, wait_until,
};

struct Harness {
    bus: EventBus,
    engine: Arc<CandleEngine>,
    candles: Arc<MemoryCandleStorage>,
    prices: Arc<MemoryPriceStorage>,
    clock: Arc<ManualClock>,
}

#[fixture]
fn harness(bus_config: EventBusConfig, manual_clock: Arc<ManualClock>) -> Harness {
    let candles = Arc::new(MemoryCandleStorage::new());
    let prices = Arc::new(MemoryPriceStorage::new());
    let engine = Arc::new(CandleEngine::new(
        CandleConfig {
            periods: vec![Period::M5],
            ..CandleConfig::default()
        },
        candles.clone(),
        prices.clone(),
        manual_clock.clone(),
    ));

    let bus = EventBus::new(bus_config);
    let subscriber: Arc<dyn EventSubscriber> = engine.clone();
    assert_eq!(bus.subscribe_all(&subscriber), 1);

    Harness {
        bus,
        engine,
        candles,
        prices,
        clock: manual_clock,
    }
}

#[rstest]
#[tokio::test]
async fn test_bus_ticks_build_candle_and_roll_over(harness: Harness) {
    let Harness {
        bus,
        engine,
        candles,
        prices,
        clock,
    } = harness;
    bus.start().unwrap();
    engine.start().unwrap();

    let ticks = TickFactory::new();
    clock.set(base_time() + Duration::seconds(150));
    bus.publish(Event::price_update(
        "feed",
        ticks.series(&[(100.0, 10), (105.0, 60), (98.0, 120)]),
    ))
    .unwrap();
    wait_until(|| engine.get_stats().ticks_processed == 3)
        .await
        .unwrap();

    let active = engine.get_active("BTCUSDT", Period::M5).await.unwrap().unwrap();
    assert_eq!(
        (active.open, active.high, active.low, active.close, active.trades),
        (100.0, 105.0, 98.0, 98.0, 3)
    );
    assert_eq!(prices.len("BTCUSDT"), 3);

    clock.set(base_time() + Duration::seconds(330));
    bus.publish(Event::price_update("feed", vec![ticks.at(101.0, 330)]))
        .unwrap();
    wait_until(|| engine.get_stats().ticks_processed == 4)
        .await
        .unwrap();

    let history = candles.get_history("BTCUSDT", Period::M5, 10).await.unwrap();
    assert_eq!(history.len(), 1);
    assert!(history[0].is_closed);
    assert_eq!(history[0].close, 98.0);
    assert_candle_invariants(&history[0]);

    let next = candles
        .get_active("BTCUSDT", Period::M5)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(next.open, 101.0);
    assert_eq!(next.start_time, history[0].end_time);

    let stats = engine.get_stats();
    assert_eq!(stats.candles_created, 2);
    assert_eq!(stats.candles_closed, 1);
    assert_eq!(stats.active_candles, 1);

    engine.stop().await.unwrap();
    bus.stop().await.unwrap();
}

#[rstest]
#[tokio::test]
async fn test_latest_prices_feed_price_storage(harness: Harness) {
    let Harness {
        bus, engine, prices, ..
    } = harness;
    bus.start().unwrap();
    engine.start().unwrap();

    let btc = TickFactory::new();
    let eth = TickFactory::new().with_symbol("ETHUSDT");
    bus.publish(Event::price_update(
        "feed",
        vec![btc.at(100.0, 1), eth.at(2000.0, 2), btc.at(101.0, 3)],
    ))
    .unwrap();
    wait_until(|| engine.get_stats().ticks_processed == 3)
        .await
        .unwrap();

    assert_eq!(prices.get_symbols().await.unwrap(), vec!["BTCUSDT", "ETHUSDT"]);
    let latest = prices.get_latest("BTCUSDT").await.unwrap().unwrap();
    assert_eq!(latest.price, 101.0);

    engine.stop().await.unwrap();
    bus.stop().await.unwrap();
}

#[rstest]
#[tokio::test]
async fn test_event_without_ticks_is_ignored(harness: Harness) {
    let engine = harness.engine;
    let event = Event::price_update("feed", Vec::new());

    engine.handle_event(&event).await.unwrap();
    assert_eq!(engine.get_stats().ticks_received, 0);
}
