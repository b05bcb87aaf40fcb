//! Signal pipeline
//!
//! Consumes `signal_detected` events, rate limits them per symbol, runs the
//! ordered processing stages and republishes survivors as `signal_filtered`
//! events for delivery.

pub mod limiter;
pub mod stages;

pub use limiter::SlidingWindowLimiter;
pub use stages::{EnrichmentStage, SignalStage, ValidationStage};

use crate::config::SignalPipelineConfig;
use crate::error::{PipelineError, PipelineResult};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Serialize;
use services_common::{
    Clock, Event, EventBus, EventSubscriber, EventType, ManagedService, Signal,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::{debug, error, info, warn};

const PIPELINE_NAME: &str = "signal-pipeline";

/// Point-in-time pipeline statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    pub received: u64,
    pub rate_limited: u64,
    pub dropped_by_stage: u64,
    pub stage_errors: u64,
    pub forwarded: u64,
}

#[derive(Debug, Default)]
struct StatsCollector {
    received: AtomicU64,
    rate_limited: AtomicU64,
    dropped_by_stage: AtomicU64,
    stage_errors: AtomicU64,
    forwarded: AtomicU64,
}

impl StatsCollector {
    fn snapshot(&self) -> PipelineStats {
        PipelineStats {
            received: self.received.load(Ordering::Relaxed),
            rate_limited: self.rate_limited.load(Ordering::Relaxed),
            dropped_by_stage: self.dropped_by_stage.load(Ordering::Relaxed),
            stage_errors: self.stage_errors.load(Ordering::Relaxed),
            forwarded: self.forwarded.load(Ordering::Relaxed),
        }
    }
}

/// Rate limiter plus ordered stages between detection and delivery
pub struct SignalPipeline {
    config: SignalPipelineConfig,
    bus: Option<Arc<EventBus>>,
    clock: Arc<dyn Clock>,
    limiter: SlidingWindowLimiter,
    stages: RwLock<Vec<Arc<dyn SignalStage>>>,
    stats: StatsCollector,
    running: AtomicBool,
}

impl SignalPipeline {
    /// Create a pipeline without stages
    pub fn new(
        config: SignalPipelineConfig,
        bus: Option<Arc<EventBus>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let limiter = SlidingWindowLimiter::new(config.max_signals_per_window, config.window());
        Self {
            config,
            bus,
            clock,
            limiter,
            stages: RwLock::new(Vec::new()),
            stats: StatsCollector::default(),
            running: AtomicBool::new(false),
        }
    }

    /// Create a pipeline with validation followed by enrichment
    pub fn with_default_stages(
        config: SignalPipelineConfig,
        bus: Option<Arc<EventBus>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let enrichment = EnrichmentStage::new(Arc::clone(&clock), config.change_precision);
        let pipeline = Self::new(config, bus, clock);
        pipeline.add_stage(Arc::new(ValidationStage));
        pipeline.add_stage(Arc::new(enrichment));
        pipeline
    }

    /// Pipeline configuration
    #[must_use]
    pub fn config(&self) -> &SignalPipelineConfig {
        &self.config
    }

    /// Append a stage to the end of the chain
    pub fn add_stage(&self, stage: Arc<dyn SignalStage>) {
        debug!(stage = stage.name(), "Stage added");
        self.stages.write().push(stage);
    }

    /// Stage names in execution order
    #[must_use]
    pub fn stage_names(&self) -> Vec<String> {
        self.stages.read().iter().map(|s| s.name().to_string()).collect()
    }

    /// Rate limit and run every stage over one signal
    ///
    /// `Ok(None)` means the signal was rate limited or dropped by a stage.
    pub async fn process(&self, signal: Signal) -> PipelineResult<Option<Signal>> {
        self.stats.received.fetch_add(1, Ordering::Relaxed);

        if !self.limiter.check(&signal.symbol, self.clock.now()) {
            self.stats.rate_limited.fetch_add(1, Ordering::Relaxed);
            info!(
                symbol = %signal.symbol,
                max = self.config.max_signals_per_window,
                window_secs = self.config.window_secs,
                "Signal rate limited"
            );
            return Ok(None);
        }

        let stages = self.stages.read().clone();
        let mut current = signal;
        for stage in &stages {
            match stage.process(current).await {
                Ok(Some(next)) => current = next,
                Ok(None) => {
                    self.stats.dropped_by_stage.fetch_add(1, Ordering::Relaxed);
                    debug!(stage = stage.name(), "Signal dropped by stage");
                    return Ok(None);
                }
                Err(source) => {
                    self.stats.stage_errors.fetch_add(1, Ordering::Relaxed);
                    return Err(PipelineError::Stage {
                        stage: stage.name().to_string(),
                        source,
                    });
                }
            }
        }

        self.stats.forwarded.fetch_add(1, Ordering::Relaxed);
        Ok(Some(current))
    }

    /// Current statistics
    #[must_use]
    pub fn get_stats(&self) -> PipelineStats {
        self.stats.snapshot()
    }

    /// Accept events from the bus
    pub fn start(&self) -> PipelineResult<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(PipelineError::AlreadyRunning);
        }
        info!(stages = self.stages.read().len(), "Signal pipeline started");
        Ok(())
    }

    /// Stop accepting events and drop idle rate limiter state
    pub fn stop(&self) -> PipelineResult<()> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Err(PipelineError::NotRunning);
        }
        let pruned = self.limiter.prune(self.clock.now());
        info!(pruned, "Signal pipeline stopped");
        Ok(())
    }

    /// Whether events are being accepted
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EventSubscriber for SignalPipeline {
    fn name(&self) -> &str {
        PIPELINE_NAME
    }

    fn subscribed_events(&self) -> Vec<EventType> {
        vec![EventType::SignalDetected]
    }

    async fn handle_event(&self, event: &Event) -> anyhow::Result<()> {
        if !self.is_running() {
            debug!(event_id = %event.id, "Signal pipeline stopped, ignoring event");
            return Ok(());
        }
        let Some(signal) = event.signal_payload() else {
            debug!(event_id = %event.id, "Event without signal payload");
            return Ok(());
        };

        match self.process(signal.clone()).await {
            Ok(Some(processed)) => {
                let Some(bus) = &self.bus else {
                    debug!(id = %processed.id, "No bus, processed signal not forwarded");
                    return Ok(());
                };
                let filtered = Event::signal(EventType::SignalFiltered, PIPELINE_NAME, processed)
                    .with_correlation_id(event.id.clone());
                if let Err(e) = bus.publish(filtered) {
                    warn!(error = %e, "Failed to forward filtered signal");
                }
            }
            Ok(None) => {}
            Err(e) => error!(event_id = %event.id, error = %e, "Signal processing failed"),
        }
        Ok(())
    }
}

#[async_trait]
impl ManagedService for SignalPipeline {
    fn name(&self) -> &str {
        PIPELINE_NAME
    }

    async fn start(&self) -> anyhow::Result<()> {
        match SignalPipeline::start(self) {
            Ok(()) | Err(PipelineError::AlreadyRunning) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn stop(&self) -> anyhow::Result<()> {
        match SignalPipeline::stop(self) {
            Ok(()) | Err(PipelineError::NotRunning) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn health_check(&self) -> bool {
        self.is_running()
    }
}
