//! Middleware chain wrapped around event dispatch
//!
//! Middlewares run outermost-to-innermost in registration order. Each receives
//! the event and a [`Next`] continuation for the rest of the chain; the
//! innermost continuation is the subscriber fan-out.

use super::{BusResult, Event, EventBusError};
use crate::constants::{DEFAULT_MAX_RETRIES, DEFAULT_RETRY_DELAY_MS, SLOW_DISPATCH_WARN_MS};
use async_trait::async_trait;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// Final stage of the chain
#[async_trait]
pub trait Dispatch: Send + Sync {
    /// Deliver the event to its subscribers
    async fn dispatch(&self, event: &Event) -> BusResult<()>;
}

/// Interceptor around dispatch
#[async_trait]
pub trait EventMiddleware: Send + Sync {
    /// Middleware name for logs
    fn name(&self) -> &str;

    /// Process the event; call `next.run(event)` to continue the chain
    async fn handle(&self, event: &Event, next: Next<'_>) -> BusResult<()>;
}

/// Continuation for the remaining middlewares plus the dispatcher
#[derive(Clone, Copy)]
pub struct Next<'a> {
    middlewares: &'a [Arc<dyn EventMiddleware>],
    dispatcher: &'a dyn Dispatch,
}

impl<'a> Next<'a> {
    /// Build a chain over `middlewares` ending in `dispatcher`
    #[must_use]
    pub fn new(middlewares: &'a [Arc<dyn EventMiddleware>], dispatcher: &'a dyn Dispatch) -> Self {
        Self {
            middlewares,
            dispatcher,
        }
    }

    /// Run the rest of the chain
    pub async fn run(self, event: &Event) -> BusResult<()> {
        match self.middlewares.split_first() {
            Some((first, rest)) => {
                first
                    .handle(
                        event,
                        Next {
                            middlewares: rest,
                            dispatcher: self.dispatcher,
                        },
                    )
                    .await
            }
            None => self.dispatcher.dispatch(event).await,
        }
    }
}

/// Logs every dispatch and its outcome
#[derive(Debug, Default)]
pub struct LoggingMiddleware;

#[async_trait]
impl EventMiddleware for LoggingMiddleware {
    fn name(&self) -> &str {
        "logging"
    }

    async fn handle(&self, event: &Event, next: Next<'_>) -> BusResult<()> {
        debug!(
            event_id = %event.id,
            event_type = %event.event_type,
            source = %event.source,
            "Dispatching event"
        );
        let result = next.run(event).await;
        if let Err(ref e) = result {
            warn!(
                event_id = %event.id,
                event_type = %event.event_type,
                error = %e,
                "Event dispatch failed"
            );
        }
        result
    }
}

/// Times dispatch and warns when it is slow
#[derive(Debug)]
pub struct MetricsMiddleware {
    slow_threshold: Duration,
    dispatches: AtomicU64,
    slow_dispatches: AtomicU64,
}

impl MetricsMiddleware {
    /// Create with the given slow-dispatch threshold
    #[must_use]
    pub const fn new(slow_threshold: Duration) -> Self {
        Self {
            slow_threshold,
            dispatches: AtomicU64::new(0),
            slow_dispatches: AtomicU64::new(0),
        }
    }

    /// Dispatches observed
    pub fn dispatches(&self) -> u64 {
        self.dispatches.load(Ordering::Relaxed)
    }

    /// Dispatches slower than the threshold
    pub fn slow_dispatches(&self) -> u64 {
        self.slow_dispatches.load(Ordering::Relaxed)
    }
}

impl Default for MetricsMiddleware {
    fn default() -> Self {
        Self::new(Duration::from_millis(SLOW_DISPATCH_WARN_MS))
    }
}

#[async_trait]
impl EventMiddleware for MetricsMiddleware {
    fn name(&self) -> &str {
        "metrics"
    }

    async fn handle(&self, event: &Event, next: Next<'_>) -> BusResult<()> {
        let start = Instant::now();
        let result = next.run(event).await;
        let elapsed = start.elapsed();

        self.dispatches.fetch_add(1, Ordering::Relaxed);
        if elapsed > self.slow_threshold {
            self.slow_dispatches.fetch_add(1, Ordering::Relaxed);
            warn!(
                event_id = %event.id,
                event_type = %event.event_type,
                // SAFETY: u128 to u64 - dispatch durations are far below u64::MAX ms
                elapsed_ms = elapsed.as_millis() as u64,
                "Slow event dispatch"
            );
        }
        result
    }
}

/// Converts a panic anywhere below it into [`EventBusError::Panicked`]
#[derive(Debug, Default)]
pub struct RecoveryMiddleware;

#[async_trait]
impl EventMiddleware for RecoveryMiddleware {
    fn name(&self) -> &str {
        "recovery"
    }

    async fn handle(&self, event: &Event, next: Next<'_>) -> BusResult<()> {
        match AssertUnwindSafe(next.run(event)).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(
                    event_id = %event.id,
                    event_type = %event.event_type,
                    panic = %message,
                    "Recovered from panic during dispatch"
                );
                Err(EventBusError::Panicked(message))
            }
        }
    }
}

/// Extract a readable message from a panic payload
pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Re-runs the downstream chain on failure
///
/// Turns at-most-once delivery into at-least-once for everything below it:
/// subscribers that already succeeded see the event again on each retry.
#[derive(Debug, Clone)]
pub struct RetryMiddleware {
    max_retries: u32,
    retry_delay: Duration,
}

impl RetryMiddleware {
    /// Create with explicit retry bound and delay
    #[must_use]
    pub const fn new(max_retries: u32, retry_delay: Duration) -> Self {
        Self {
            max_retries,
            retry_delay,
        }
    }
}

impl Default for RetryMiddleware {
    fn default() -> Self {
        Self::new(
            DEFAULT_MAX_RETRIES,
            Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
        )
    }
}

#[async_trait]
impl EventMiddleware for RetryMiddleware {
    fn name(&self) -> &str {
        "retry"
    }

    async fn handle(&self, event: &Event, next: Next<'_>) -> BusResult<()> {
        let mut attempt = 0;
        loop {
            match next.run(event).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt < self.max_retries => {
                    attempt += 1;
                    warn!(
                        event_id = %event.id,
                        event_type = %event.event_type,
                        attempt,
                        max_retries = self.max_retries,
                        error = %e,
                        "Retrying event dispatch"
                    );
                    tokio::time::sleep(self.retry_delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
