//! In-process event bus
//!
//! Publish/subscribe bus connecting the pipeline services:
//! - Bounded buffer with non-blocking publish (back-pressure via `BufferFull`)
//! - Worker pool draining the buffer
//! - Middleware chain around subscriber fan-out
//! - Metrics collection
//! - Optional dead-letter ring
//!
//! Delivery is at-most-once per dispatch attempt and lossy under load. Events
//! are not persisted and never replayed.

pub mod bus;
pub mod message;
pub mod metrics;
pub mod middleware;

use async_trait::async_trait;

// Re-export main types
pub use bus::{EventBus, EventBusConfig};
pub use message::{
    ANALYSIS_COMPLETE, ANALYSIS_REQUEST, AnalysisRequest, AnalysisSummary, Event, EventMetadata,
    EventPayload, EventPriority, EventType, HealthReport, ServiceEventData,
};
pub use metrics::{BusMetrics, BusMetricsSnapshot};
pub use middleware::{
    Dispatch, EventMiddleware, LoggingMiddleware, MetricsMiddleware, Next, RecoveryMiddleware,
    RetryMiddleware,
};

/// Named handler bound to one or more event types
#[async_trait]
pub trait EventSubscriber: Send + Sync {
    /// Subscriber name, unique per event type
    fn name(&self) -> &str;

    /// Event types this subscriber accepts
    fn subscribed_events(&self) -> Vec<EventType>;

    /// Handle one event
    async fn handle_event(&self, event: &Event) -> anyhow::Result<()>;
}

/// Error types for event bus operations
#[derive(Debug, thiserror::Error)]
pub enum EventBusError {
    /// Buffer is full, event dropped
    #[error("Event buffer full")]
    BufferFull,

    /// Bus has been stopped
    #[error("Event bus is closed")]
    Closed,

    /// `start` called on a running bus
    #[error("Event bus already running")]
    AlreadyRunning,

    /// `stop` called on a stopped bus
    #[error("Event bus not running")]
    NotRunning,

    /// No subscriber with that name for the event type
    #[error("Subscriber '{name}' not found for event type {event_type}")]
    SubscriberNotFound {
        /// Subscriber name
        name: String,
        /// Event type
        event_type: String,
    },

    /// Subscriber returned an error
    #[error("Handler '{subscriber}' failed: {source}")]
    Handler {
        /// Subscriber name
        subscriber: String,
        /// Source error
        source: anyhow::Error,
    },

    /// Subscriber panicked
    #[error("Handler panicked: {0}")]
    Panicked(String),
}

/// Result type for event bus operations
pub type BusResult<T> = std::result::Result<T, EventBusError>;
