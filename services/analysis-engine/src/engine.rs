//! Analysis engine
//!
//! Runs the registered analyzers over candle history for a set of symbols,
//! tags and filters the produced signals, and publishes survivors as
//! `signal_detected` events. Runs are triggered by a fixed-interval scheduler,
//! by `price_updated` events (only the symbols in the payload) and by
//! `analysis_request` events.

use crate::analyzers::{Analyzer, AnalyzerFactory};
use crate::config::AnalysisConfig;
use crate::error::{AnalysisError, EngineResult};
use crate::filters::{SignalFilter, default_filters};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use serde::Serialize;
use services_common::{
    ANALYSIS_COMPLETE, ANALYSIS_REQUEST, AnalysisSummary, Candle, CandleStorage, Clock, Event,
    EventBus, EventPayload, EventSubscriber, EventType, ManagedService, Period, PriceStorage,
    Signal, StorageResult,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const ENGINE_NAME: &str = "analysis-engine";

/// Outcome of analyzing one symbol
#[derive(Debug, Clone, Default, Serialize)]
pub struct AnalysisResult {
    /// Symbol
    pub symbol: String,
    /// Periods that had candle data
    pub periods: Vec<Period>,
    /// Signals that survived the filter chain
    pub signals: Vec<Signal>,
    /// Signals produced before filtering
    pub generated: usize,
    /// Analyzer or storage failures skipped during the run
    pub errors: usize,
    /// Wall time spent on this symbol
    pub duration_ms: u64,
}

/// Point-in-time engine statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AnalysisStats {
    pub runs: u64,
    pub symbols_analyzed: u64,
    pub signals_generated: u64,
    pub signals_filtered: u64,
    pub signals_published: u64,
    pub analyzer_errors: u64,
    pub last_run_duration_ms: u64,
}

#[derive(Debug, Default)]
struct StatsCollector {
    runs: AtomicU64,
    symbols_analyzed: AtomicU64,
    signals_generated: AtomicU64,
    signals_filtered: AtomicU64,
    signals_published: AtomicU64,
    analyzer_errors: AtomicU64,
    last_run_duration_ms: AtomicU64,
}

impl StatsCollector {
    fn add(counter: &AtomicU64, n: usize) {
        counter.fetch_add(n as u64, Ordering::Relaxed);
    }

    fn snapshot(&self) -> AnalysisStats {
        AnalysisStats {
            runs: self.runs.load(Ordering::Relaxed),
            symbols_analyzed: self.symbols_analyzed.load(Ordering::Relaxed),
            signals_generated: self.signals_generated.load(Ordering::Relaxed),
            signals_filtered: self.signals_filtered.load(Ordering::Relaxed),
            signals_published: self.signals_published.load(Ordering::Relaxed),
            analyzer_errors: self.analyzer_errors.load(Ordering::Relaxed),
            last_run_duration_ms: self.last_run_duration_ms.load(Ordering::Relaxed),
        }
    }
}

/// State shared between the engine handle and its scheduler task
struct EngineCore {
    config: AnalysisConfig,
    candles: Arc<dyn CandleStorage>,
    prices: Arc<dyn PriceStorage>,
    bus: Option<Arc<EventBus>>,
    clock: Arc<dyn Clock>,
    analyzers: RwLock<Vec<Arc<dyn Analyzer>>>,
    filters: RwLock<Vec<Arc<dyn SignalFilter>>>,
    stats: StatsCollector,
}

impl EngineCore {
    async fn analyze_symbol(&self, symbol: &str, periods: &[Period]) -> EngineResult<AnalysisResult> {
        if symbol.trim().is_empty() {
            return Err(AnalysisError::InvalidSymbol(symbol.to_string()));
        }

        let started = Instant::now();
        let mut result = AnalysisResult {
            symbol: symbol.to_string(),
            ..AnalysisResult::default()
        };

        let analyzers: Vec<Arc<dyn Analyzer>> = self
            .analyzers
            .read()
            .iter()
            .filter(|a| a.config().enabled && a.supports(symbol))
            .cloned()
            .collect();
        if analyzers.is_empty() {
            debug!(symbol, "No analyzers apply, skipping");
            return Ok(result);
        }

        let volume_usd = match self.prices.get_latest(symbol).await {
            Ok(latest) => latest.map(|tick| tick.notional()),
            Err(e) => {
                debug!(symbol, error = %e, "No price snapshot for symbol");
                None
            }
        };

        let mut produced = Vec::new();
        for &period in periods {
            let series = match self.series(symbol, period).await {
                Ok(series) => series,
                Err(e) => {
                    warn!(symbol, period = %period, error = %e, "Failed to load candle series");
                    result.errors += 1;
                    continue;
                }
            };
            if series.is_empty() {
                continue;
            }
            result.periods.push(period);

            let now = self.clock.now();
            for analyzer in &analyzers {
                match analyzer.analyze(symbol, period, &series) {
                    Ok(signals) => produced.extend(signals.into_iter().filter_map(|signal| {
                        tag_signal(signal, analyzer.as_ref(), symbol, period, now, volume_usd)
                    })),
                    Err(e) => {
                        warn!(
                            analyzer = analyzer.name(),
                            symbol,
                            period = %period,
                            error = %e,
                            "Analyzer failed, skipping"
                        );
                        result.errors += 1;
                        StatsCollector::add(&self.stats.analyzer_errors, 1);
                    }
                }
            }
        }

        result.generated = produced.len();
        result.signals = self.apply_filters(produced);
        StatsCollector::add(&self.stats.signals_generated, result.generated);
        StatsCollector::add(
            &self.stats.signals_filtered,
            result.generated - result.signals.len(),
        );
        StatsCollector::add(&self.stats.symbols_analyzed, 1);

        for signal in &result.signals {
            let event = Event::signal(EventType::SignalDetected, ENGINE_NAME, signal.clone());
            if self.publish(event) {
                StatsCollector::add(&self.stats.signals_published, 1);
            }
        }

        // SAFETY: u128 to u64 - per-symbol durations fit in u64 milliseconds
        result.duration_ms = started.elapsed().as_millis() as u64;
        Ok(result)
    }

    /// Closed history followed by the active bar, oldest first
    async fn series(&self, symbol: &str, period: Period) -> StorageResult<Vec<Candle>> {
        let mut series = self
            .candles
            .get_history(symbol, period, self.config.history_depth)
            .await?;
        if let Some(active) = self.candles.get_active(symbol, period).await? {
            series.push(active);
        }
        Ok(series)
    }

    fn apply_filters(&self, mut signals: Vec<Signal>) -> Vec<Signal> {
        let filters = self.filters.read().clone();
        for filter in &filters {
            let before = signals.len();
            signals.retain(|s| filter.allow(s));
            let dropped = before - signals.len();
            if dropped > 0 {
                debug!(filter = filter.name(), dropped, "Signals filtered");
            }
        }
        signals
    }

    /// Symbols with enough volume, capped by volume, then alphabetized
    async fn candidates(&self) -> EngineResult<Vec<String>> {
        let mut ranked = Vec::new();
        for symbol in self.prices.get_symbols().await? {
            let volume = match self.prices.get_latest(&symbol).await {
                Ok(Some(tick)) => tick.notional(),
                Ok(None) => continue,
                Err(e) => {
                    debug!(symbol = %symbol, error = %e, "Skipping candidate without snapshot");
                    continue;
                }
            };
            if volume >= self.config.min_volume_usd {
                ranked.push((symbol, volume));
            }
        }

        if ranked.len() > self.config.max_symbols {
            ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
            ranked.truncate(self.config.max_symbols);
        }
        let mut symbols: Vec<String> = ranked.into_iter().map(|(s, _)| s).collect();
        symbols.sort();
        Ok(symbols)
    }

    /// Analyze `symbols` and publish one `analysis_complete` summary
    async fn run(&self, symbols: Vec<String>) -> FxHashMap<String, AnalysisResult> {
        let started = Instant::now();
        let periods = self.config.periods.as_slice();

        let outcomes: Vec<(String, EngineResult<AnalysisResult>)> = if self.config.parallel {
            stream::iter(symbols)
                .map(|symbol| async move {
                    let result = self.analyze_symbol(&symbol, periods).await;
                    (symbol, result)
                })
                .buffer_unordered(self.config.max_workers.max(1))
                .collect()
                .await
        } else {
            let mut outcomes = Vec::with_capacity(symbols.len());
            for symbol in symbols {
                let result = self.analyze_symbol(&symbol, periods).await;
                outcomes.push((symbol, result));
            }
            outcomes
        };

        let mut results = FxHashMap::default();
        for (symbol, outcome) in outcomes {
            match outcome {
                Ok(result) => {
                    results.insert(symbol, result);
                }
                Err(e) => warn!(symbol = %symbol, error = %e, "Symbol analysis failed"),
            }
        }

        // SAFETY: u128 to u64 - run durations fit in u64 milliseconds
        let duration_ms = started.elapsed().as_millis() as u64;
        let signals = results.values().map(|r| r.signals.len()).sum();
        StatsCollector::add(&self.stats.runs, 1);
        self.stats
            .last_run_duration_ms
            .store(duration_ms, Ordering::Relaxed);

        info!(symbols = results.len(), signals, duration_ms, "Analysis run complete");
        self.publish(Event::new(
            EventType::custom(ANALYSIS_COMPLETE),
            ENGINE_NAME,
            EventPayload::AnalysisSummary(AnalysisSummary {
                symbols: results.len(),
                signals,
                duration_ms,
            }),
        ));
        results
    }

    async fn analyze_all(&self) -> EngineResult<FxHashMap<String, AnalysisResult>> {
        let symbols = self.candidates().await?;
        Ok(self.run(symbols).await)
    }

    fn publish(&self, event: Event) -> bool {
        let Some(bus) = &self.bus else {
            return false;
        };
        match bus.publish(event) {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Failed to publish analysis event");
                false
            }
        }
    }
}

/// Stamp engine-owned fields onto an analyzer's signal and apply its weight and floor
fn tag_signal(
    mut signal: Signal,
    analyzer: &dyn Analyzer,
    symbol: &str,
    period: Period,
    now: DateTime<Utc>,
    volume_usd: Option<f64>,
) -> Option<Signal> {
    let config = analyzer.config();
    signal.confidence = (signal.confidence * config.weight).clamp(0.0, 1.0);
    if signal.confidence < config.min_confidence {
        return None;
    }

    signal.id = Uuid::new_v4().to_string();
    signal.symbol = symbol.to_string();
    signal.period = period;
    signal.timestamp = now;
    signal.source_analyzer = analyzer.name().to_string();
    if let Some(volume) = volume_usd {
        signal.metadata.indicators.insert("volume_usd".to_string(), volume);
    }
    Some(signal)
}

async fn scheduler_loop(core: Arc<EngineCore>, mut shutdown_rx: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(core.config.update_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // First tick of an interval fires immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            biased;
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                if let Err(e) = core.analyze_all().await {
                    error!(error = %e, "Scheduled analysis failed");
                }
            }
        }
    }
    debug!("Analysis scheduler stopped");
}

/// Analysis engine
pub struct AnalysisEngine {
    core: Arc<EngineCore>,
    running: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl AnalysisEngine {
    /// Create an engine with no analyzers or filters registered
    pub fn new(
        config: AnalysisConfig,
        candles: Arc<dyn CandleStorage>,
        prices: Arc<dyn PriceStorage>,
        bus: Option<Arc<EventBus>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            core: Arc::new(EngineCore {
                config,
                candles,
                prices,
                bus,
                clock,
                analyzers: RwLock::new(Vec::new()),
                filters: RwLock::new(Vec::new()),
                stats: StatsCollector::default(),
            }),
            running: AtomicBool::new(false),
            shutdown_tx,
            task: Mutex::new(None),
        }
    }

    /// Create an engine with the enabled shipped analyzers and the configured filter chain
    pub fn with_defaults(
        config: AnalysisConfig,
        candles: Arc<dyn CandleStorage>,
        prices: Arc<dyn PriceStorage>,
        bus: Option<Arc<EventBus>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let analyzers = AnalyzerFactory::create_enabled(&config);
        let filters = default_filters(&config.filters);
        let engine = Self::new(config, candles, prices, bus, clock);

        for analyzer in analyzers {
            if let Err(e) = engine.register_analyzer(analyzer) {
                warn!(error = %e, "Skipping analyzer");
            }
        }
        for filter in filters {
            engine.add_filter(filter);
        }
        engine
    }

    /// Engine configuration
    #[must_use]
    pub fn config(&self) -> &AnalysisConfig {
        &self.core.config
    }

    /// Add an analyzer; names must be unique
    pub fn register_analyzer(&self, analyzer: Arc<dyn Analyzer>) -> EngineResult<()> {
        let mut analyzers = self.core.analyzers.write();
        if analyzers.iter().any(|a| a.name() == analyzer.name()) {
            return Err(AnalysisError::DuplicateAnalyzer(analyzer.name().to_string()));
        }
        info!(analyzer = analyzer.name(), "Analyzer registered");
        analyzers.push(analyzer);
        Ok(())
    }

    /// Remove an analyzer by name
    pub fn unregister_analyzer(&self, name: &str) -> EngineResult<()> {
        let mut analyzers = self.core.analyzers.write();
        let Some(index) = analyzers.iter().position(|a| a.name() == name) else {
            return Err(AnalysisError::AnalyzerNotFound(name.to_string()));
        };
        analyzers.remove(index);
        info!(analyzer = name, "Analyzer unregistered");
        Ok(())
    }

    /// Append a filter to the end of the chain
    pub fn add_filter(&self, filter: Arc<dyn SignalFilter>) {
        debug!(filter = filter.name(), "Filter added");
        self.core.filters.write().push(filter);
    }

    /// Registered analyzer names in registration order
    #[must_use]
    pub fn analyzer_names(&self) -> Vec<String> {
        self.core
            .analyzers
            .read()
            .iter()
            .map(|a| a.name().to_string())
            .collect()
    }

    /// Analyze one symbol over `periods` and publish its surviving signals
    pub async fn analyze_symbol(
        &self,
        symbol: &str,
        periods: &[Period],
    ) -> EngineResult<AnalysisResult> {
        self.core.analyze_symbol(symbol, periods).await
    }

    /// Analyze every candidate symbol and publish an `analysis_complete` summary
    pub async fn analyze_all(&self) -> EngineResult<FxHashMap<String, AnalysisResult>> {
        self.core.analyze_all().await
    }

    /// Current statistics
    #[must_use]
    pub fn get_stats(&self) -> AnalysisStats {
        self.core.stats.snapshot()
    }

    /// Spawn the scheduler
    pub fn start(&self) -> EngineResult<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(AnalysisError::AlreadyRunning);
        }
        self.shutdown_tx.send_replace(false);

        let handle = tokio::spawn(scheduler_loop(
            Arc::clone(&self.core),
            self.shutdown_tx.subscribe(),
        ));
        *self.task.lock() = Some(handle);

        info!(
            analyzers = self.core.analyzers.read().len(),
            interval_ms = self.core.config.update_interval_ms,
            parallel = self.core.config.parallel,
            "Analysis engine started"
        );
        Ok(())
    }

    /// Stop the scheduler, joining it within the shutdown timeout
    pub async fn stop(&self) -> EngineResult<()> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Err(AnalysisError::NotRunning);
        }
        self.shutdown_tx.send_replace(true);

        let handle = self.task.lock().take();
        if let Some(mut handle) = handle {
            if tokio::time::timeout(self.core.config.shutdown_timeout(), &mut handle)
                .await
                .is_err()
            {
                warn!("Analysis scheduler did not stop in time, aborting");
                handle.abort();
            }
        }
        info!("Analysis engine stopped");
        Ok(())
    }

    /// Whether the scheduler is running
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EventSubscriber for AnalysisEngine {
    fn name(&self) -> &str {
        ENGINE_NAME
    }

    fn subscribed_events(&self) -> Vec<EventType> {
        vec![EventType::PriceUpdated, EventType::custom(ANALYSIS_REQUEST)]
    }

    async fn handle_event(&self, event: &Event) -> anyhow::Result<()> {
        if !self.is_running() {
            debug!(event_type = %event.event_type, "Analysis engine stopped, ignoring event");
            return Ok(());
        }

        match (&event.event_type, &event.payload) {
            (EventType::PriceUpdated, EventPayload::PriceUpdate(ticks)) => {
                let mut symbols: Vec<String> = ticks.iter().map(|t| t.symbol.clone()).collect();
                symbols.sort();
                symbols.dedup();
                if !symbols.is_empty() {
                    self.core.run(symbols).await;
                }
            }
            (EventType::Custom(name), payload) if name == ANALYSIS_REQUEST => match payload {
                EventPayload::AnalysisRequest(request) if !request.symbols.is_empty() => {
                    info!(symbols = request.symbols.len(), "Analysis requested");
                    self.core.run(request.symbols.clone()).await;
                }
                _ => {
                    info!("Full analysis requested");
                    self.core.analyze_all().await?;
                }
            },
            _ => debug!(event_type = %event.event_type, "Unhandled event"),
        }
        Ok(())
    }
}

#[async_trait]
impl ManagedService for AnalysisEngine {
    fn name(&self) -> &str {
        ENGINE_NAME
    }

    async fn start(&self) -> anyhow::Result<()> {
        match AnalysisEngine::start(self) {
            Ok(()) | Err(AnalysisError::AlreadyRunning) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn stop(&self) -> anyhow::Result<()> {
        match AnalysisEngine::stop(self).await {
            Ok(()) | Err(AnalysisError::NotRunning) => Ok(()),
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
