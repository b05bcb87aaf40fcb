//! Core Event Bus Implementation
//!
//! Bounded buffer drained by a worker pool; every event runs through the
//! middleware chain and is fanned out to the subscribers of its type.

use super::middleware::{Dispatch, EventMiddleware, Next, panic_message};
use super::{BusMetrics, BusMetricsSnapshot, BusResult, Event, EventBusError, EventSubscriber, EventType};
use crate::constants::{
    DEFAULT_BUS_BUFFER_SIZE, DEFAULT_BUS_WORKERS, DEFAULT_DEAD_LETTER_CAPACITY,
    DEFAULT_SHUTDOWN_TIMEOUT_MS,
};
use crate::lifecycle::ManagedService;
use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

/// Event bus configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventBusConfig {
    /// Buffer capacity
    pub buffer_size: usize,
    /// Worker tasks draining the buffer
    pub worker_count: usize,
    /// Periodically log a metrics snapshot
    pub enable_logging: bool,
    /// Metrics log interval, 0 disables
    pub metrics_interval_ms: u64,
    /// Keep finally-failed events in a bounded ring
    pub enable_dead_letter_queue: bool,
    /// Dead-letter ring capacity
    pub dead_letter_capacity: usize,
    /// Upper bound on joining workers in `stop`
    pub shutdown_timeout_ms: u64,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUS_BUFFER_SIZE,
            worker_count: DEFAULT_BUS_WORKERS,
            enable_logging: true,
            metrics_interval_ms: 60_000,
            enable_dead_letter_queue: false,
            dead_letter_capacity: DEFAULT_DEAD_LETTER_CAPACITY,
            shutdown_timeout_ms: DEFAULT_SHUTDOWN_TIMEOUT_MS,
        }
    }
}

impl EventBusConfig {
    /// Metrics log interval, `None` when disabled
    #[must_use]
    pub fn metrics_interval(&self) -> Option<Duration> {
        (self.enable_logging && self.metrics_interval_ms > 0)
            .then(|| Duration::from_millis(self.metrics_interval_ms))
    }

    /// Shutdown join timeout
    #[must_use]
    pub const fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

type SubscriberMap = FxHashMap<EventType, Vec<Arc<dyn EventSubscriber>>>;

/// State shared between the bus handle and its workers
struct BusInner {
    config: EventBusConfig,
    subscribers: RwLock<SubscriberMap>,
    middlewares: RwLock<Vec<Arc<dyn EventMiddleware>>>,
    metrics: BusMetrics,
    dead_letters: Mutex<VecDeque<Arc<Event>>>,
}

impl BusInner {
    /// Run one event through middleware and fan-out
    async fn process(&self, event: Arc<Event>) -> BusResult<()> {
        let middlewares = self.middlewares.read().clone();
        let start = Instant::now();
        let result = Next::new(&middlewares, self).run(&event).await;
        self.metrics.record_processed(start.elapsed());

        if let Err(ref e) = result {
            if self.config.enable_dead_letter_queue {
                self.push_dead_letter(Arc::clone(&event), e);
            }
        }
        result
    }

    fn push_dead_letter(&self, event: Arc<Event>, error: &EventBusError) {
        error!(
            event_id = %event.id,
            event_type = %event.event_type,
            error = %error,
            "Event sent to dead letter queue"
        );
        let mut ring = self.dead_letters.lock();
        ring.push_back(event);
        while ring.len() > self.config.dead_letter_capacity.max(1) {
            ring.pop_front();
        }
        self.metrics.record_dead_letter();
    }

    fn subscriber_counts(&self) -> FxHashMap<String, usize> {
        self.subscribers
            .read()
            .iter()
            .map(|(t, subs)| (t.to_string(), subs.len()))
            .collect()
    }
}

#[async_trait]
impl Dispatch for BusInner {
    async fn dispatch(&self, event: &Event) -> BusResult<()> {
        let subscribers = self
            .subscribers
            .read()
            .get(&event.event_type)
            .cloned()
            .unwrap_or_default();

        if subscribers.is_empty() {
            trace!(event_type = %event.event_type, "No subscribers for event type");
            return Ok(());
        }

        let mut last_error = None;
        for subscriber in &subscribers {
            match subscriber.handle_event(event).await {
                Ok(()) => {
                    trace!(
                        event_id = %event.id,
                        subscriber = subscriber.name(),
                        "Event handled"
                    );
                }
                Err(e) => {
                    error!(
                        event_id = %event.id,
                        event_type = %event.event_type,
                        subscriber = subscriber.name(),
                        error = %e,
                        "Subscriber failed to handle event"
                    );
                    self.metrics.record_failed(event.event_type.as_str());
                    last_error = Some(EventBusError::Handler {
                        subscriber: subscriber.name().to_string(),
                        source: e,
                    });
                }
            }
        }

        last_error.map_or(Ok(()), Err)
    }
}

/// Main event bus implementation
pub struct EventBus {
    inner: Arc<BusInner>,
    sender: mpsc::Sender<Event>,
    receiver: Arc<tokio::sync::Mutex<mpsc::Receiver<Event>>>,
    running: AtomicBool,
    closed: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl EventBus {
    /// Create a new event bus with configuration
    #[must_use]
    pub fn new(config: EventBusConfig) -> Self {
        let (sender, receiver) = mpsc::channel(config.buffer_size.max(1));
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            inner: Arc::new(BusInner {
                config,
                subscribers: RwLock::new(FxHashMap::default()),
                middlewares: RwLock::new(Vec::new()),
                metrics: BusMetrics::new(),
                dead_letters: Mutex::new(VecDeque::new()),
            }),
            sender,
            receiver: Arc::new(tokio::sync::Mutex::new(receiver)),
            running: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Bus configuration
    #[must_use]
    pub fn config(&self) -> &EventBusConfig {
        &self.inner.config
    }

    /// Spawn the worker pool
    pub fn start(&self) -> BusResult<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(EventBusError::AlreadyRunning);
        }
        self.closed.store(false, Ordering::SeqCst);
        self.shutdown_tx.send_replace(false);

        let worker_count = self.inner.config.worker_count.max(1);
        let mut tasks = self.tasks.lock();
        for worker_id in 0..worker_count {
            let inner = Arc::clone(&self.inner);
            let receiver = Arc::clone(&self.receiver);
            let shutdown_rx = self.shutdown_tx.subscribe();
            tasks.push(tokio::spawn(worker_loop(
                worker_id,
                inner,
                receiver,
                shutdown_rx,
            )));
        }

        if let Some(interval) = self.inner.config.metrics_interval() {
            let inner = Arc::clone(&self.inner);
            let shutdown_rx = self.shutdown_tx.subscribe();
            tasks.push(tokio::spawn(metrics_loop(inner, interval, shutdown_rx)));
        }

        info!(
            workers = worker_count,
            buffer_size = self.inner.config.buffer_size,
            "Event bus started"
        );
        Ok(())
    }

    /// Signal workers and join them within the shutdown timeout
    ///
    /// Workers still running after the timeout are aborted. Events left in the
    /// buffer stay there.
    pub async fn stop(&self) -> BusResult<()> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Err(EventBusError::NotRunning);
        }
        self.closed.store(true, Ordering::SeqCst);
        self.shutdown_tx.send_replace(true);

        let tasks = std::mem::take(&mut *self.tasks.lock());
        let deadline = tokio::time::Instant::now() + self.inner.config.shutdown_timeout();
        let mut aborted = 0usize;
        for mut task in tasks {
            if tokio::time::timeout_at(deadline, &mut task).await.is_err() {
                task.abort();
                aborted += 1;
            }
        }

        if aborted > 0 {
            warn!(aborted, "Event bus workers did not stop in time and were aborted");
        }
        info!(pending = self.pending(), "Event bus stopped");
        Ok(())
    }

    /// Whether the worker pool is running
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Events waiting in the buffer
    #[must_use]
    pub fn pending(&self) -> usize {
        self.sender.max_capacity() - self.sender.capacity()
    }

    /// Register `subscriber` for `event_type`
    ///
    /// Returns `false` (with a warning) when the subscriber does not declare the
    /// type or is already registered for it under the same name.
    pub fn subscribe(&self, event_type: EventType, subscriber: Arc<dyn EventSubscriber>) -> bool {
        if !subscriber.subscribed_events().contains(&event_type) {
            warn!(
                subscriber = subscriber.name(),
                event_type = %event_type,
                "Subscriber does not declare event type, ignoring subscription"
            );
            return false;
        }

        let mut subscribers = self.inner.subscribers.write();
        let list = subscribers.entry(event_type.clone()).or_default();
        if list.iter().any(|s| s.name() == subscriber.name()) {
            warn!(
                subscriber = subscriber.name(),
                event_type = %event_type,
                "Subscriber already registered for event type"
            );
            return false;
        }

        debug!(
            subscriber = subscriber.name(),
            event_type = %event_type,
            subscriber_count = list.len() + 1,
            "Subscriber registered"
        );
        list.push(subscriber);
        true
    }

    /// Register `subscriber` for every type it declares; returns how many succeeded
    pub fn subscribe_all(&self, subscriber: &Arc<dyn EventSubscriber>) -> usize {
        subscriber
            .subscribed_events()
            .into_iter()
            .filter(|event_type| self.subscribe(event_type.clone(), Arc::clone(subscriber)))
            .count()
    }

    /// Remove the subscriber named `name` from `event_type`
    pub fn unsubscribe(&self, event_type: &EventType, name: &str) -> BusResult<()> {
        let mut subscribers = self.inner.subscribers.write();
        let not_found = || EventBusError::SubscriberNotFound {
            name: name.to_string(),
            event_type: event_type.to_string(),
        };

        let list = subscribers.get_mut(event_type).ok_or_else(not_found)?;
        let before = list.len();
        list.retain(|s| s.name() != name);
        if list.len() == before {
            return Err(not_found());
        }
        if list.is_empty() {
            subscribers.remove(event_type);
        }

        debug!(subscriber = name, event_type = %event_type, "Subscriber removed");
        Ok(())
    }

    /// Number of subscribers for `event_type`
    #[must_use]
    pub fn subscriber_count(&self, event_type: &EventType) -> usize {
        self.inner
            .subscribers
            .read()
            .get(event_type)
            .map_or(0, Vec::len)
    }

    /// Append a middleware; the first added runs outermost
    pub fn add_middleware(&self, middleware: Arc<dyn EventMiddleware>) {
        debug!(middleware = middleware.name(), "Middleware added");
        self.inner.middlewares.write().push(middleware);
    }

    /// Enqueue an event without blocking
    ///
    /// Assigns id and timestamp when absent. A full buffer drops the event and
    /// returns [`EventBusError::BufferFull`].
    pub fn publish(&self, mut event: Event) -> BusResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(EventBusError::Closed);
        }
        event.stamp();

        let event_type = event.event_type.to_string();
        match self.sender.try_send(event) {
            Ok(()) => {
                self.inner.metrics.record_published(&event_type);
                trace!(event_type = %event_type, "Event published");
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(event)) => {
                self.inner.metrics.record_dropped();
                warn!(
                    event_id = %event.id,
                    event_type = %event_type,
                    "Event buffer full, dropping event"
                );
                Err(EventBusError::BufferFull)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(EventBusError::Closed),
        }
    }

    /// Dispatch in the caller's task, bypassing the buffer
    pub async fn publish_sync(&self, mut event: Event) -> BusResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(EventBusError::Closed);
        }
        event.stamp();
        self.inner
            .metrics
            .record_published(event.event_type.as_str());
        self.inner.process(Arc::new(event)).await
    }

    /// Current metrics
    #[must_use]
    pub fn get_metrics(&self) -> BusMetricsSnapshot {
        self.inner.metrics.snapshot(self.inner.subscriber_counts())
    }

    /// Events retained in the dead-letter ring, oldest first
    #[must_use]
    pub fn dead_letters(&self) -> Vec<Arc<Event>> {
        self.inner.dead_letters.lock().iter().cloned().collect()
    }
}

async fn worker_loop(
    worker_id: usize,
    inner: Arc<BusInner>,
    receiver: Arc<tokio::sync::Mutex<mpsc::Receiver<Event>>>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    debug!(worker_id, "Event bus worker started");
    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        let event = tokio::select! {
            biased;
            changed = shutdown_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
            event = async { receiver.lock().await.recv().await } => event,
        };

        let Some(event) = event else {
            break;
        };

        let event_id = event.id.clone();
        // A panicking subscriber must not take the worker down with it
        match AssertUnwindSafe(inner.process(Arc::new(event)))
            .catch_unwind()
            .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!(worker_id, event_id = %event_id, error = %e, "Event dispatch returned error");
            }
            Err(panic) => {
                error!(
                    worker_id,
                    event_id = %event_id,
                    panic = %panic_message(panic.as_ref()),
                    "Event dispatch panicked"
                );
            }
        }
    }
    debug!(worker_id, "Event bus worker stopped");
}

async fn metrics_loop(
    inner: Arc<BusInner>,
    interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let snapshot = inner.metrics.snapshot(inner.subscriber_counts());
                info!(
                    published = snapshot.events_published,
                    processed = snapshot.events_processed,
                    failed = snapshot.events_failed,
                    dropped = snapshot.events_dropped,
                    dead_lettered = snapshot.dead_lettered,
                    avg_processing_ms = snapshot.avg_processing_time_ms,
                    "Event bus metrics"
                );
            }
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl ManagedService for EventBus {
    fn name(&self) -> &str {
        "event-bus"
    }

    async fn start(&self) -> anyhow::Result<()> {
        match EventBus::start(self) {
            Ok(()) | Err(EventBusError::AlreadyRunning) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn stop(&self) -> anyhow::Result<()> {
        match EventBus::stop(self).await {
            Ok(()) | Err(EventBusError::NotRunning) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn health_check(&self) -> bool {
        self.is_running() && self.tasks.lock().iter().all(|t| !t.is_finished())
    }
}
