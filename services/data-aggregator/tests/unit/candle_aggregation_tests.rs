//! Candle aggregation rules exercised directly on the aggregator state machine

use chrono::{DateTime, Duration, Utc};
use data_aggregator::{CandleAggregator, CloseReason};
use rstest::*;
use services_common::{Period, PriceTick};
use test_utils::{TickFactory, assert_candle_invariants, assert_candle_sequence, base_time};

#[fixture]
fn ticks() -> TickFactory {
    TickFactory::new()
}

fn m5() -> CandleAggregator {
    CandleAggregator::new(vec![Period::M5])
}

fn apply_all(aggregator: &mut CandleAggregator, ticks: &[PriceTick]) {
    for tick in ticks {
        aggregator.apply(tick, tick.timestamp);
    }
}

#[rstest]
fn test_three_ticks_in_one_bucket(ticks: TickFactory) {
    let mut aggregator = m5();
    apply_all(
        &mut aggregator,
        &ticks.series(&[(100.0, 10), (105.0, 60), (98.0, 120)]),
    );

    let candle = aggregator.active("BTCUSDT", Period::M5).unwrap();
    assert_eq!(candle.open, 100.0);
    assert_eq!(candle.high, 105.0);
    assert_eq!(candle.low, 98.0);
    assert_eq!(candle.close, 98.0);
    assert_eq!(candle.trades, 3);
    assert_eq!(candle.start_time, base_time());
    assert!(!candle.is_closed);
}

#[rstest]
fn test_rollover_archives_and_opens_next(ticks: TickFactory) {
    let mut aggregator = m5();
    apply_all(
        &mut aggregator,
        &ticks.series(&[(100.0, 10), (105.0, 60), (98.0, 120)]),
    );

    let next = ticks.at(101.0, 330);
    let outcome = aggregator.apply(&next, next.timestamp);

    assert_eq!(outcome.closed.len(), 1);
    let closed = &outcome.closed[0].candle;
    assert!(closed.is_closed);
    assert_eq!((closed.open, closed.high, closed.low, closed.close), (100.0, 105.0, 98.0, 98.0));
    assert_eq!(closed.trades, 3);

    let active = aggregator.active("BTCUSDT", Period::M5).unwrap();
    assert_eq!(active.open, 101.0);
    assert_eq!(active.trades, 1);
    assert_eq!(active.start_time, base_time() + Duration::minutes(5));
    assert!(active.start_time >= closed.end_time);
}

#[rstest]
fn test_rollover_when_clock_lags_tick(ticks: TickFactory) {
    let mut aggregator = m5();
    let first = ticks.at(100.0, 0);
    aggregator.apply(&first, first.timestamp);

    // Tick already in the next bucket while the wall clock is still in the first
    let next = ticks.at(102.0, 301);
    let outcome = aggregator.apply(&next, base_time() + Duration::seconds(30));

    assert_eq!(outcome.closed.len(), 1);
    assert_eq!(outcome.closed[0].reason, CloseReason::Rollover);
}

#[rstest]
#[case(Period::M1)]
#[case(Period::M5)]
#[case(Period::M15)]
#[case(Period::H1)]
fn test_ohlc_invariants_hold_over_random_walk(#[case] period: Period, ticks: TickFactory) {
    let mut aggregator = CandleAggregator::new(vec![period]);
    let mut closed = Vec::new();

    for tick in ticks.random_walk(500, 100.0, 7) {
        let outcome = aggregator.apply(&tick, tick.timestamp);
        for candle in &outcome.active {
            assert_candle_invariants(candle);
        }
        closed.extend(outcome.closed.into_iter().map(|c| c.candle));
    }

    for candle in &closed {
        assert_candle_invariants(candle);
        assert!(candle.is_closed);
    }
    assert_candle_sequence(&closed);
}

#[rstest]
fn test_near_end_close_keeps_boundaries(ticks: TickFactory) {
    let mut aggregator = m5();
    apply_all(
        &mut aggregator,
        &ticks.series(&[(100.0, 0), (104.0, 100), (102.0, 200)]),
    );

    // 290s into a 300s bar is past the early close threshold
    let late = ticks.at(110.0, 290);
    let outcome = aggregator.apply(&late, late.timestamp);

    assert_eq!(outcome.closed.len(), 1);
    assert_eq!(outcome.closed[0].reason, CloseReason::NearEnd);
    let closed = &outcome.closed[0].candle;
    assert_eq!(closed.close, 102.0);
    assert_eq!(closed.high, 104.0);

    let next = aggregator.active("BTCUSDT", Period::M5).unwrap();
    assert_eq!(next.start_time, closed.end_time);
    assert_eq!(next.end_time - next.start_time, Period::M5.to_duration());
    assert_eq!(next.open, 110.0);
}

#[rstest]
fn test_closed_candle_is_immutable(ticks: TickFactory) {
    let mut aggregator = m5();
    apply_all(&mut aggregator, &ticks.series(&[(100.0, 0), (101.0, 30)]));
    let rollover = ticks.at(90.0, 400);
    let outcome = aggregator.apply(&rollover, rollover.timestamp);

    let mut closed = outcome.closed[0].candle.clone();
    let before = closed.clone();
    closed.apply_tick(&ticks.at(500.0, 60));
    assert_eq!(closed, before);
}

#[rstest]
fn test_stale_tick_does_not_touch_active_bar(ticks: TickFactory) {
    let mut aggregator = m5();
    let now = ticks.at(100.0, 600);
    aggregator.apply(&now, now.timestamp);

    let late = ticks.at(1.0, 10);
    let outcome = aggregator.apply(&late, now.timestamp);

    assert_eq!(outcome.stale_periods, 1);
    assert!(outcome.closed.is_empty());
    let active = aggregator.active("BTCUSDT", Period::M5).unwrap();
    assert_eq!(active.low, 100.0);
    assert_eq!(active.trades, 1);
}

#[rstest]
fn test_symbols_are_independent(ticks: TickFactory) {
    let eth = ticks.clone().with_symbol("ETHUSDT");
    let mut aggregator = m5();

    apply_all(&mut aggregator, &ticks.series(&[(100.0, 0), (110.0, 30)]));
    apply_all(&mut aggregator, &eth.series(&[(2000.0, 5)]));

    assert_eq!(aggregator.active_count(), 2);
    assert_eq!(aggregator.active("BTCUSDT", Period::M5).unwrap().trades, 2);
    assert_eq!(aggregator.active("ETHUSDT", Period::M5).unwrap().trades, 1);
}

#[rstest]
fn test_every_period_gets_a_bar(ticks: TickFactory) {
    let mut aggregator = CandleAggregator::default();
    let tick = ticks.at(100.0, 0);
    let outcome = aggregator.apply(&tick, tick.timestamp);

    assert_eq!(outcome.created, Period::ALL.len());
    for period in Period::ALL {
        let candle = aggregator.active("BTCUSDT", period).unwrap();
        assert_eq!(candle.start_time, period.bucket_start(tick.timestamp));
    }
}

#[rstest]
fn test_long_gap_closes_stale_bar(ticks: TickFactory) {
    let mut aggregator = CandleAggregator::new(vec![Period::M1]);
    let first = ticks.at(100.0, 0);
    aggregator.apply(&first, first.timestamp);

    let later: DateTime<Utc> = base_time() + Duration::minutes(10);
    let tick = PriceTick::new("BTCUSDT", 120.0, 1.0, later);
    let outcome = aggregator.apply(&tick, later);

    assert_eq!(outcome.closed[0].reason, CloseReason::Stale);
    let active = aggregator.active("BTCUSDT", Period::M1).unwrap();
    assert_eq!(active.start_time, later);
}

#[rstest]
fn test_steady_ticks_after_idle_close_fill_later_bars(ticks: TickFactory) {
    let mut aggregator = m5();
    let first = ticks.at(100.0, 0);
    aggregator.apply(&first, first.timestamp);

    // One 150s gap closes the synthetic bar, then a tick every 10s for half an hour
    let mut closed = Vec::new();
    let mut stale = 0;
    for offset in (150..=1800).step_by(10) {
        let tick = ticks.at(100.0, offset);
        let outcome = aggregator.apply(&tick, tick.timestamp);
        stale += outcome.stale_periods;
        closed.extend(outcome.closed);
    }

    assert_eq!(closed[0].reason, CloseReason::SyntheticIdle);
    assert_eq!(closed[0].candle.start_time, base_time());
    // Ticks between the idle close and the next boundary predate the reopened bar
    assert_eq!(stale, 14);

    assert_eq!(closed.len(), 6);
    for bar in &closed[1..] {
        assert_eq!(bar.reason, CloseReason::NearEnd);
        assert_eq!(bar.candle.trades, 30, "bar at {}", bar.candle.start_time);
    }
    let bars: Vec<_> = closed.iter().map(|c| c.candle.clone()).collect();
    assert_candle_sequence(&bars);

    let active = aggregator.active("BTCUSDT", Period::M5).unwrap();
    assert_eq!(active.start_time, base_time() + Duration::minutes(30));
    assert!(active.last_tick_at >= active.start_time);
}
