//! Metrics collection for the event bus

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Bus metrics collector
pub struct BusMetrics {
    events_published: AtomicU64,
    events_processed: AtomicU64,
    events_failed: AtomicU64,
    events_dropped: AtomicU64,
    dead_lettered: AtomicU64,
    /// Total dispatch time in microseconds
    processing_time_us: AtomicU64,
    /// Published events by type name
    published_by_type: RwLock<FxHashMap<String, AtomicU64>>,
    /// Failed dispatches by type name
    failed_by_type: RwLock<FxHashMap<String, AtomicU64>>,
    /// Start time for uptime calculation
    start_time: Instant,
}

impl BusMetrics {
    /// Create new metrics collector
    #[must_use]
    pub fn new() -> Self {
        Self {
            events_published: AtomicU64::new(0),
            events_processed: AtomicU64::new(0),
            events_failed: AtomicU64::new(0),
            events_dropped: AtomicU64::new(0),
            dead_lettered: AtomicU64::new(0),
            processing_time_us: AtomicU64::new(0),
            published_by_type: RwLock::new(FxHashMap::default()),
            failed_by_type: RwLock::new(FxHashMap::default()),
            start_time: Instant::now(),
        }
    }

    fn bump(map: &RwLock<FxHashMap<String, AtomicU64>>, key: &str) {
        let counters = map.read();
        if let Some(counter) = counters.get(key) {
            counter.fetch_add(1, Ordering::Relaxed);
        } else {
            drop(counters);
            map.write()
                .entry(key.to_string())
                .or_insert_with(|| AtomicU64::new(0))
                .fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record an accepted publish
    pub fn record_published(&self, event_type: &str) {
        self.events_published.fetch_add(1, Ordering::Relaxed);
        Self::bump(&self.published_by_type, event_type);
    }

    /// Record an event rejected because the buffer was full
    pub fn record_dropped(&self) {
        self.events_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one completed dispatch
    pub fn record_processed(&self, elapsed: Duration) {
        self.events_processed.fetch_add(1, Ordering::Relaxed);
        // SAFETY: u128 to u64 - a single dispatch never approaches u64::MAX microseconds
        self.processing_time_us
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
    }

    /// Record one failed subscriber invocation
    pub fn record_failed(&self, event_type: &str) {
        self.events_failed.fetch_add(1, Ordering::Relaxed);
        Self::bump(&self.failed_by_type, event_type);
    }

    /// Record an event moved to the dead-letter ring
    pub fn record_dead_letter(&self) {
        self.dead_lettered.fetch_add(1, Ordering::Relaxed);
    }

    /// Events accepted by `publish`
    pub fn events_published(&self) -> u64 {
        self.events_published.load(Ordering::Relaxed)
    }

    /// Events fully dispatched
    pub fn events_processed(&self) -> u64 {
        self.events_processed.load(Ordering::Relaxed)
    }

    /// Failed subscriber invocations
    pub fn events_failed(&self) -> u64 {
        self.events_failed.load(Ordering::Relaxed)
    }

    /// Events dropped on a full buffer
    pub fn events_dropped(&self) -> u64 {
        self.events_dropped.load(Ordering::Relaxed)
    }

    /// Build a snapshot; subscriber counts come from the bus
    pub fn snapshot(&self, subscribers_count: FxHashMap<String, usize>) -> BusMetricsSnapshot {
        let processed = self.events_processed();
        let total_us = self.processing_time_us.load(Ordering::Relaxed);
        let avg_processing_time_ms = if processed > 0 {
            // SAFETY: u64 to f64 for average calculation
            total_us as f64 / processed as f64 / 1000.0
        } else {
            0.0
        };

        let collect = |map: &RwLock<FxHashMap<String, AtomicU64>>| {
            map.read()
                .iter()
                .map(|(k, v)| (k.clone(), v.load(Ordering::Relaxed)))
                .collect::<FxHashMap<_, _>>()
        };

        BusMetricsSnapshot {
            uptime_seconds: self.start_time.elapsed().as_secs(),
            events_published: self.events_published(),
            events_processed: processed,
            events_failed: self.events_failed(),
            events_dropped: self.events_dropped(),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
            total_processing_time_ms: total_us / 1000,
            avg_processing_time_ms,
            subscribers_count,
            published_by_type: collect(&self.published_by_type),
            failed_by_type: collect(&self.failed_by_type),
        }
    }
}

impl Default for BusMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of bus metrics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BusMetricsSnapshot {
    /// Bus uptime in seconds
    pub uptime_seconds: u64,
    /// Events accepted by `publish`
    pub events_published: u64,
    /// Events fully dispatched
    pub events_processed: u64,
    /// Failed subscriber invocations
    pub events_failed: u64,
    /// Events dropped on a full buffer
    pub events_dropped: u64,
    /// Events moved to the dead-letter ring
    pub dead_lettered: u64,
    /// Total dispatch time
    pub total_processing_time_ms: u64,
    /// Average dispatch time
    pub avg_processing_time_ms: f64,
    /// Subscribers per event type
    pub subscribers_count: FxHashMap<String, usize>,
    /// Published events per event type
    pub published_by_type: FxHashMap<String, u64>,
    /// Failed invocations per event type
    pub failed_by_type: FxHashMap<String, u64>,
}

impl BusMetricsSnapshot {
    /// Share of processed events without a failed invocation
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        if self.events_processed == 0 {
            return 0.0;
        }
        let ok = self.events_processed.saturating_sub(self.events_failed);
        // SAFETY: u64 to f64 for rate calculation
        ok as f64 / self.events_processed as f64
    }

    /// Event types sorted by publish count, busiest first
    #[must_use]
    pub fn busiest_types(&self) -> Vec<(String, u64)> {
        let mut types: Vec<_> = self
            .published_by_type
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect();
        types.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        types
    }
}
