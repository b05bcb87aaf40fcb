//! Event envelope and payload types carried by the bus

use crate::types::{PriceTick, Signal};
use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Name of the custom event emitted once per analysis run
pub const ANALYSIS_COMPLETE: &str = "analysis_complete";
/// Name of the custom event that requests an analysis run
pub const ANALYSIS_REQUEST: &str = "analysis_request";

/// Event type taxonomy used for routing
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// New price ticks
    PriceUpdated,
    /// Analyzer produced a signal that passed engine filters
    SignalDetected,
    /// Signal passed the pipeline and is ready for delivery
    SignalFiltered,
    /// Managed service started
    ServiceStarted,
    /// Managed service stopped
    ServiceStopped,
    /// Managed service failed
    ServiceError,
    /// Periodic health report
    HealthCheck,
    /// All services started
    SystemStarted,
    /// All services stopped
    SystemStopped,
    /// Generic error report
    Error,
    /// Application-defined type
    Custom(String),
}

impl EventType {
    /// Routing name
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::PriceUpdated => "price_updated",
            Self::SignalDetected => "signal_detected",
            Self::SignalFiltered => "signal_filtered",
            Self::ServiceStarted => "service_started",
            Self::ServiceStopped => "service_stopped",
            Self::ServiceError => "service_error",
            Self::HealthCheck => "health_check",
            Self::SystemStarted => "system_started",
            Self::SystemStopped => "system_stopped",
            Self::Error => "error",
            Self::Custom(name) => name,
        }
    }

    /// Shorthand for a custom type
    pub fn custom(name: impl Into<String>) -> Self {
        Self::Custom(name.into())
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "price_updated" => Self::PriceUpdated,
            "signal_detected" => Self::SignalDetected,
            "signal_filtered" => Self::SignalFiltered,
            "service_started" => Self::ServiceStarted,
            "service_stopped" => Self::ServiceStopped,
            "service_error" => Self::ServiceError,
            "health_check" => Self::HealthCheck,
            "system_started" => Self::SystemStarted,
            "system_stopped" => Self::SystemStopped,
            "error" => Self::Error,
            other => Self::Custom(other.to_string()),
        })
    }
}

/// Event priority, `Critical` sorts first
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventPriority {
    /// Must be handled first
    Critical,
    /// Above normal
    High,
    /// Default
    #[default]
    Normal,
    /// Background
    Low,
}

/// Lifecycle event data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceEventData {
    /// Service name
    pub service: String,
    /// New state name
    pub state: String,
    /// Failure description, if any
    pub error: Option<String>,
    /// Restart attempts made so far
    pub restart_attempts: u32,
}

/// Health report data
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    /// Health per service name
    pub services: FxHashMap<String, bool>,
}

impl HealthReport {
    /// Names of unhealthy services, sorted
    #[must_use]
    pub fn unhealthy(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .services
            .iter()
            .filter(|(_, healthy)| !**healthy)
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }
}

/// Summary of one analysis run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisSummary {
    /// Symbols analyzed
    pub symbols: usize,
    /// Signals published
    pub signals: usize,
    /// Wall time of the run
    pub duration_ms: u64,
}

/// Request for an on-demand analysis run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRequest {
    /// Symbols to analyze; empty means all candidates
    pub symbols: Vec<String>,
}

/// Typed event payload
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum EventPayload {
    /// Price ticks
    PriceUpdate(Vec<PriceTick>),
    /// Signal
    Signal(Box<Signal>),
    /// Lifecycle change
    Service(ServiceEventData),
    /// Health report
    Health(HealthReport),
    /// Analysis run summary
    AnalysisSummary(AnalysisSummary),
    /// Analysis request
    AnalysisRequest(AnalysisRequest),
    /// Free-form data
    Json(serde_json::Value),
    /// No payload
    #[default]
    Empty,
}

/// Event metadata
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventMetadata {
    /// Correlation id for tracing a flow across services
    pub correlation_id: Option<String>,
    /// Priority
    pub priority: EventPriority,
    /// Free-form tags
    pub tags: Vec<String>,
    /// Free-form key/value properties
    pub properties: FxHashMap<String, String>,
}

/// Event published on the bus
///
/// Immutable once published; subscribers receive it behind an `Arc`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Unique id; empty until the bus assigns one
    pub id: String,
    /// Routing type
    pub event_type: EventType,
    /// Publishing component
    pub source: String,
    /// Payload
    pub payload: EventPayload,
    /// Publish time; `None` until the bus assigns one
    pub timestamp: Option<DateTime<Utc>>,
    /// Metadata
    pub metadata: EventMetadata,
}

impl Event {
    /// Create an event without id or timestamp
    pub fn new(event_type: EventType, source: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            id: String::new(),
            event_type,
            source: source.into(),
            payload,
            timestamp: None,
            metadata: EventMetadata::default(),
        }
    }

    /// `price_updated` event
    pub fn price_update(source: impl Into<String>, ticks: Vec<PriceTick>) -> Self {
        Self::new(EventType::PriceUpdated, source, EventPayload::PriceUpdate(ticks))
    }

    /// Signal event of the given type
    pub fn signal(event_type: EventType, source: impl Into<String>, signal: Signal) -> Self {
        Self::new(event_type, source, EventPayload::Signal(Box::new(signal)))
    }

    /// Set priority
    #[must_use]
    pub fn with_priority(mut self, priority: EventPriority) -> Self {
        self.metadata.priority = priority;
        self
    }

    /// Set correlation id
    #[must_use]
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.metadata.correlation_id = Some(correlation_id.into());
        self
    }

    /// Add a tag
    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.metadata.tags.push(tag.into());
        self
    }

    /// Fill in id and timestamp if absent
    pub fn stamp(&mut self) {
        if self.id.is_empty() {
            self.id = uuid::Uuid::new_v4().to_string();
        }
        if self.timestamp.is_none() {
            self.timestamp = Some(Utc::now());
        }
    }

    /// Price ticks carried by a `price_updated` event
    #[must_use]
    pub fn ticks(&self) -> Option<&[PriceTick]> {
        match &self.payload {
            EventPayload::PriceUpdate(ticks) => Some(ticks),
            _ => None,
        }
    }

    /// Signal carried by a signal event
    #[must_use]
    pub fn signal_payload(&self) -> Option<&Signal> {
        match &self.payload {
            EventPayload::Signal(signal) => Some(signal),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_names() {
        assert_eq!(EventType::PriceUpdated.to_string(), "price_updated");
        assert_eq!(EventType::custom(ANALYSIS_COMPLETE).as_str(), "analysis_complete");
        assert_eq!(
            "signal_detected".parse::<EventType>().unwrap(),
            EventType::SignalDetected
        );
        assert_eq!(
            "something_else".parse::<EventType>().unwrap(),
            EventType::Custom("something_else".to_string())
        );
    }

    #[test]
    fn test_priority_ordering() {
        assert!(EventPriority::Critical < EventPriority::High);
        assert!(EventPriority::High < EventPriority::Normal);
        assert!(EventPriority::Normal < EventPriority::Low);
    }

    #[test]
    fn test_stamp_preserves_existing_id() {
        let mut event = Event::new(EventType::HealthCheck, "test", EventPayload::Empty);
        event.stamp();
        let id = event.id.clone();
        let ts = event.timestamp;
        assert!(!id.is_empty());
        assert!(ts.is_some());

        event.stamp();
        assert_eq!(event.id, id);
        assert_eq!(event.timestamp, ts);
    }

    #[test]
    fn test_health_report_unhealthy() {
        let mut report = HealthReport::default();
        report.services.insert("b".to_string(), false);
        report.services.insert("a".to_string(), false);
        report.services.insert("c".to_string(), true);
        assert_eq!(report.unhealthy(), vec!["a".to_string(), "b".to_string()]);
    }
}
