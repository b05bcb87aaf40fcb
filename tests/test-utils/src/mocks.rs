//! Mock services and components for testing

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use services_common::{Event, EventSubscriber, EventType, ManagedService, Signal};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

/// Shared log of lifecycle calls, e.g. `["start:a", "start:b", "stop:b"]`
pub type CallLog = Arc<Mutex<Vec<String>>>;

/// Create an empty call log
pub fn call_log() -> CallLog {
    Arc::new(Mutex::new(Vec::new()))
}

/// Mock managed service for orchestrator tests
///
/// Records every start/stop into a shared [`CallLog`], can be told to fail the
/// next N starts, and exposes a switchable health flag.
pub struct MockService {
    name: String,
    log: CallLog,
    failing_starts: AtomicU32,
    failing_stop: AtomicBool,
    healthy: AtomicBool,
    running: AtomicBool,
    start_calls: AtomicU32,
    stop_calls: AtomicU32,
    start_delay: Option<Duration>,
}

impl std::fmt::Debug for MockService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockService")
            .field("name", &self.name)
            .field("running", &self.running.load(Ordering::SeqCst))
            .field("start_calls", &self.start_calls.load(Ordering::SeqCst))
            .finish()
    }
}

impl MockService {
    /// Creates a healthy service that always starts
    pub fn new(name: impl Into<String>, log: CallLog) -> Self {
        Self {
            name: name.into(),
            log,
            failing_starts: AtomicU32::new(0),
            failing_stop: AtomicBool::new(false),
            healthy: AtomicBool::new(true),
            running: AtomicBool::new(false),
            start_calls: AtomicU32::new(0),
            stop_calls: AtomicU32::new(0),
            start_delay: None,
        }
    }

    /// Fail the next `count` start attempts
    pub fn failing_starts(self, count: u32) -> Self {
        self.failing_starts.store(count, Ordering::SeqCst);
        self
    }

    /// Fail every stop attempt
    pub fn failing_stop(self) -> Self {
        self.failing_stop.store(true, Ordering::SeqCst);
        self
    }

    /// Sleep inside `start` before succeeding
    pub fn with_start_delay(mut self, delay: Duration) -> Self {
        self.start_delay = Some(delay);
        self
    }

    /// Flip the value reported by `health_check`
    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    /// Number of `start` invocations, failed ones included
    pub fn start_calls(&self) -> u32 {
        self.start_calls.load(Ordering::SeqCst)
    }

    /// Number of `stop` invocations
    pub fn stop_calls(&self) -> u32 {
        self.stop_calls.load(Ordering::SeqCst)
    }

    /// Whether the last start succeeded and no stop followed
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ManagedService for MockService {
    fn name(&self) -> &str {
        &self.name
    }

    async fn start(&self) -> Result<()> {
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.start_delay {
            tokio::time::sleep(delay).await;
        }

        let remaining = self.failing_starts.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failing_starts.store(remaining - 1, Ordering::SeqCst);
            self.log.lock().push(format!("fail:{}", self.name));
            anyhow::bail!("{} refused to start", self.name);
        }

        self.running.store(true, Ordering::SeqCst);
        self.log.lock().push(format!("start:{}", self.name));
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing_stop.load(Ordering::SeqCst) {
            anyhow::bail!("{} refused to stop", self.name);
        }
        self.running.store(false, Ordering::SeqCst);
        self.log.lock().push(format!("stop:{}", self.name));
        Ok(())
    }

    async fn health_check(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }
}

/// Subscriber that records every event it receives
pub struct RecordingSubscriber {
    name: String,
    event_types: Vec<EventType>,
    events: Mutex<Vec<Event>>,
}

impl std::fmt::Debug for RecordingSubscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordingSubscriber")
            .field("name", &self.name)
            .field("received", &self.events.lock().len())
            .finish()
    }
}

impl RecordingSubscriber {
    /// Record events of the given types
    pub fn new(name: impl Into<String>, event_types: Vec<EventType>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            event_types,
            events: Mutex::new(Vec::new()),
        })
    }

    /// Snapshot of received events
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    /// Received events of one type
    pub fn events_of(&self, event_type: &EventType) -> Vec<Event> {
        self.events
            .lock()
            .iter()
            .filter(|e| &e.event_type == event_type)
            .cloned()
            .collect()
    }

    /// Signals carried by received events
    pub fn signals(&self) -> Vec<Signal> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| e.signal_payload().cloned())
            .collect()
    }

    /// Number of received events
    pub fn count(&self) -> usize {
        self.events.lock().len()
    }
}

#[async_trait]
impl EventSubscriber for RecordingSubscriber {
    fn name(&self) -> &str {
        &self.name
    }

    fn subscribed_events(&self) -> Vec<EventType> {
        self.event_types.clone()
    }

    async fn handle_event(&self, event: &Event) -> Result<()> {
        self.events.lock().push(event.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_service_fails_then_starts() {
        let log = call_log();
        let service = MockService::new("db", Arc::clone(&log)).failing_starts(1);

        assert!(service.start().await.is_err());
        assert!(service.start().await.is_ok());
        service.stop().await.unwrap();

        assert_eq!(*log.lock(), vec!["fail:db", "start:db", "stop:db"]);
        assert_eq!(service.start_calls(), 2);
        assert!(!service.is_running());
    }
}
