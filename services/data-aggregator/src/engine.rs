//! Candle aggregation engine
//!
//! Ticks arrive through the event bus (or [`CandleEngine::process_tick`]) and are
//! queued into a bounded channel. A single processing task owns the
//! [`CandleAggregator`], applies ticks in arrival order, persists active and
//! closed bars, and runs periodic cleanup and statistics logging.

use crate::aggregators::{CandleAggregator, ClosedCandle};
use crate::config::CandleConfig;
use crate::stats::{CandleStats, CandleStatsCollector};
use async_trait::async_trait;
use parking_lot::Mutex;
use services_common::{
    Candle, CandleStorage, Clock, Event, EventSubscriber, EventType, ManagedService, Period,
    PriceStorage, PriceTick, StorageResult,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Candle engine errors
#[derive(Debug, Error)]
pub enum AggregatorError {
    /// Ingest queue is full, tick dropped
    #[error("Tick queue full")]
    QueueFull,

    /// Tick failed validation
    #[error("Invalid tick for '{0}'")]
    InvalidTick(String),

    /// `start` called on a running engine
    #[error("Candle engine already running")]
    AlreadyRunning,

    /// `stop` called on a stopped engine
    #[error("Candle engine not running")]
    NotRunning,
}

/// Everything the processing task needs
struct Processor {
    config: CandleConfig,
    aggregator: CandleAggregator,
    candles: Arc<dyn CandleStorage>,
    prices: Arc<dyn PriceStorage>,
    clock: Arc<dyn Clock>,
    stats: Arc<CandleStatsCollector>,
}

impl Processor {
    async fn run(
        mut self,
        receiver: Arc<tokio::sync::Mutex<mpsc::Receiver<PriceTick>>>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> CandleAggregator {
        let mut rx = receiver.lock_owned().await;
        let mut cleanup = tokio::time::interval(self.config.cleanup_interval());
        let mut stats = tokio::time::interval(self.config.stats_interval());
        // First tick of an interval fires immediately
        cleanup.tick().await;
        stats.tick().await;

        info!(periods = ?self.aggregator.periods(), "Candle processing task started");
        loop {
            tokio::select! {
                biased;
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
                tick = rx.recv() => match tick {
                    Some(tick) => self.handle_tick(tick).await,
                    None => break,
                },
                _ = cleanup.tick() => self.cleanup().await,
                _ = stats.tick() => self.log_stats(),
            }
        }
        info!("Candle processing task stopped");
        self.aggregator
    }

    async fn handle_tick(&mut self, tick: PriceTick) {
        let now = self.clock.now();

        if let Err(e) = self.prices.append_tick(&tick).await {
            self.storage_error("append_tick", &tick.symbol, &e);
        }

        let outcome = self.aggregator.apply(&tick, now);
        if outcome.stale_periods > 0 {
            CandleStatsCollector::add(&self.stats.ticks_stale, 1);
            debug!(
                symbol = %tick.symbol,
                timestamp = %tick.timestamp,
                periods = outcome.stale_periods,
                "Ignoring tick older than active candle"
            );
        }

        for closed in &outcome.closed {
            self.archive(closed).await;
        }
        for candle in &outcome.active {
            if let Err(e) = self.candles.save_active(candle).await {
                self.storage_error("save_active", &candle.symbol, &e);
            }
        }

        CandleStatsCollector::add(&self.stats.candles_created, outcome.created as u64);
        CandleStatsCollector::add(&self.stats.ticks_processed, 1);
        self.update_active_gauge();
    }

    async fn archive(&self, closed: &ClosedCandle) {
        let candle = &closed.candle;
        debug!(
            symbol = %candle.symbol,
            period = %candle.period,
            start = %candle.start_time,
            reason = %closed.reason,
            is_real = candle.is_real,
            trades = candle.trades,
            "Candle closed"
        );
        CandleStatsCollector::add(&self.stats.candles_closed, 1);
        if let Err(e) = self.candles.archive(candle).await {
            self.storage_error("archive", &candle.symbol, &e);
        }
    }

    async fn cleanup(&mut self) {
        let now = self.clock.now();

        let forced = self.aggregator.force_close_stale(now);
        if !forced.is_empty() {
            warn!(count = forced.len(), "Force-closing stale candles");
        }
        for closed in &forced {
            CandleStatsCollector::add(&self.stats.forced_closes, 1);
            self.archive(closed).await;
        }

        match self
            .candles
            .cleanup_older_than(now - self.config.retention())
            .await
        {
            Ok(removed) if removed > 0 => debug!(removed, "Expired candle history removed"),
            Ok(_) => {}
            Err(e) => self.storage_error("cleanup_older_than", "*", &e),
        }
        self.update_active_gauge();
    }

    fn log_stats(&self) {
        let stats = self.stats.snapshot();
        info!(
            ticks_received = stats.ticks_received,
            ticks_processed = stats.ticks_processed,
            ticks_dropped = stats.ticks_dropped,
            ticks_stale = stats.ticks_stale,
            candles_created = stats.candles_created,
            candles_closed = stats.candles_closed,
            forced_closes = stats.forced_closes,
            storage_errors = stats.storage_errors,
            active_candles = stats.active_candles,
            success_rate = stats.success_rate(),
            "Candle engine statistics"
        );
    }

    fn update_active_gauge(&self) {
        self.stats
            .active_candles
            .store(self.aggregator.active_count() as u64, Ordering::Relaxed);
    }

    fn storage_error(&self, operation: &str, symbol: &str, error: &dyn std::error::Error) {
        CandleStatsCollector::add(&self.stats.storage_errors, 1);
        error!(operation, symbol, error = %error, "Candle storage operation failed");
    }
}

/// Candle aggregation engine
pub struct CandleEngine {
    config: CandleConfig,
    candles: Arc<dyn CandleStorage>,
    prices: Arc<dyn PriceStorage>,
    clock: Arc<dyn Clock>,
    stats: Arc<CandleStatsCollector>,
    sender: mpsc::Sender<PriceTick>,
    receiver: Arc<tokio::sync::Mutex<mpsc::Receiver<PriceTick>>>,
    aggregator: Mutex<Option<CandleAggregator>>,
    running: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<CandleAggregator>>>,
}

impl CandleEngine {
    /// Create a new engine over the given storages and clock
    pub fn new(
        config: CandleConfig,
        candles: Arc<dyn CandleStorage>,
        prices: Arc<dyn PriceStorage>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
        let (shutdown_tx, _) = watch::channel(false);
        let aggregator = CandleAggregator::new(config.periods.clone());

        Self {
            config,
            candles,
            prices,
            clock,
            stats: Arc::new(CandleStatsCollector::default()),
            sender,
            receiver: Arc::new(tokio::sync::Mutex::new(receiver)),
            aggregator: Mutex::new(Some(aggregator)),
            running: AtomicBool::new(false),
            shutdown_tx,
            task: Mutex::new(None),
        }
    }

    /// Engine configuration
    #[must_use]
    pub const fn config(&self) -> &CandleConfig {
        &self.config
    }

    /// Spawn the processing task
    pub fn start(&self) -> Result<(), AggregatorError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(AggregatorError::AlreadyRunning);
        }
        self.shutdown_tx.send_replace(false);

        // An aborted task loses its aggregator; active bars are rebuilt from new ticks
        let aggregator = self
            .aggregator
            .lock()
            .take()
            .unwrap_or_else(|| CandleAggregator::new(self.config.periods.clone()));

        let processor = Processor {
            config: self.config.clone(),
            aggregator,
            candles: Arc::clone(&self.candles),
            prices: Arc::clone(&self.prices),
            clock: Arc::clone(&self.clock),
            stats: Arc::clone(&self.stats),
        };
        let handle = tokio::spawn(processor.run(
            Arc::clone(&self.receiver),
            self.shutdown_tx.subscribe(),
        ));
        *self.task.lock() = Some(handle);

        info!(
            queue_capacity = self.config.queue_capacity,
            periods = self.config.periods.len(),
            "Candle engine started"
        );
        Ok(())
    }

    /// Signal the processing task and join it within the shutdown timeout
    pub async fn stop(&self) -> Result<(), AggregatorError> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Err(AggregatorError::NotRunning);
        }
        self.shutdown_tx.send_replace(true);

        let Some(mut handle) = self.task.lock().take() else {
            return Ok(());
        };
        match tokio::time::timeout(self.config.shutdown_timeout(), &mut handle).await {
            Ok(Ok(aggregator)) => {
                *self.aggregator.lock() = Some(aggregator);
            }
            Ok(Err(e)) => {
                error!(error = %e, "Candle processing task failed");
            }
            Err(_) => {
                warn!("Candle processing task did not stop in time, aborting");
                handle.abort();
            }
        }
        info!("Candle engine stopped");
        Ok(())
    }

    /// Whether the processing task is running
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Enqueue a tick without blocking
    pub fn process_tick(&self, tick: PriceTick) -> Result<(), AggregatorError> {
        CandleStatsCollector::add(&self.stats.ticks_received, 1);

        if !tick.is_valid() {
            CandleStatsCollector::add(&self.stats.ticks_dropped, 1);
            return Err(AggregatorError::InvalidTick(tick.symbol));
        }

        self.sender.try_send(tick).map_err(|_| {
            CandleStatsCollector::add(&self.stats.ticks_dropped, 1);
            AggregatorError::QueueFull
        })
    }

    /// Current statistics
    #[must_use]
    pub fn get_stats(&self) -> CandleStats {
        self.stats.snapshot()
    }

    /// Active bar from storage
    pub async fn get_active(&self, symbol: &str, period: Period) -> StorageResult<Option<Candle>> {
        self.candles.get_active(symbol, period).await
    }

    /// Closed bars from storage, oldest first
    pub async fn get_history(
        &self,
        symbol: &str,
        period: Period,
        limit: usize,
    ) -> StorageResult<Vec<Candle>> {
        self.candles.get_history(symbol, period, limit).await
    }
}

#[async_trait]
impl EventSubscriber for CandleEngine {
    fn name(&self) -> &str {
        "candle-engine"
    }

    fn subscribed_events(&self) -> Vec<EventType> {
        vec![EventType::PriceUpdated]
    }

    async fn handle_event(&self, event: &Event) -> anyhow::Result<()> {
        let Some(ticks) = event.ticks() else {
            debug!(event_id = %event.id, "price_updated event without ticks");
            return Ok(());
        };

        let mut rejected = 0usize;
        for tick in ticks {
            if self.process_tick(tick.clone()).is_err() {
                rejected += 1;
            }
        }
        if rejected > 0 {
            warn!(
                event_id = %event.id,
                rejected,
                total = ticks.len(),
                "Ticks rejected by candle engine"
            );
        }
        Ok(())
    }
}

#[async_trait]
impl ManagedService for CandleEngine {
    fn name(&self) -> &str {
        "candle-engine"
    }

    async fn start(&self) -> anyhow::Result<()> {
        match CandleEngine::start(self) {
            Ok(()) | Err(AggregatorError::AlreadyRunning) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn stop(&self) -> anyhow::Result<()> {
        match CandleEngine::stop(self).await {
            Ok(()) | Err(AggregatorError::NotRunning) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn health_check(&self) -> bool {
        self.is_running()
            && self
                .task
                .lock()
                .as_ref()
                .is_some_and(|task| !task.is_finished())
    }
}
