//! Symbol-scoped sliding-window rate limiting

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::collections::VecDeque;
use tracing::debug;

/// Admits at most `max_events` per symbol within any `window`
#[derive(Debug)]
pub struct SlidingWindowLimiter {
    max_events: usize,
    window: Duration,
    admitted: Mutex<FxHashMap<String, VecDeque<DateTime<Utc>>>>,
}

impl SlidingWindowLimiter {
    /// Create a limiter
    #[must_use]
    pub fn new(max_events: usize, window: Duration) -> Self {
        Self {
            max_events,
            window,
            admitted: Mutex::new(FxHashMap::default()),
        }
    }

    /// Record an event for `symbol` at `now` if the window has room
    pub fn check(&self, symbol: &str, now: DateTime<Utc>) -> bool {
        let mut admitted = self.admitted.lock();
        let times = admitted.entry(symbol.to_string()).or_default();

        while times.front().is_some_and(|t| now - *t >= self.window) {
            times.pop_front();
        }
        if times.len() >= self.max_events {
            debug!(symbol, in_window = times.len(), "Window full");
            return false;
        }
        times.push_back(now);
        true
    }

    /// Events currently counted against `symbol`
    #[must_use]
    pub fn in_window(&self, symbol: &str, now: DateTime<Utc>) -> usize {
        self.admitted
            .lock()
            .get(symbol)
            .map_or(0, |times| times.iter().filter(|t| now - **t < self.window).count())
    }

    /// Drop symbols with no events inside the window; returns how many were dropped
    pub fn prune(&self, now: DateTime<Utc>) -> usize {
        let mut admitted = self.admitted.lock();
        let before = admitted.len();
        admitted.retain(|_, times| times.back().is_some_and(|t| now - *t < self.window));
        before - admitted.len()
    }

    /// Forget everything
    pub fn reset(&self) {
        self.admitted.lock().clear();
    }
}
