//! Processing stages applied to every admitted signal

use async_trait::async_trait;
use services_common::{Clock, Signal};
use std::sync::Arc;
use tracing::debug;

/// One step of the signal pipeline
///
/// Returning `Ok(None)` drops the signal; an error drops it too and is
/// reported by the pipeline.
#[async_trait]
pub trait SignalStage: Send + Sync {
    /// Stage name used in logs and errors
    fn name(&self) -> &str;

    /// Transform or drop one signal
    async fn process(&self, signal: Signal) -> anyhow::Result<Option<Signal>>;
}

/// Drops malformed signals
#[derive(Debug, Clone, Copy, Default)]
pub struct ValidationStage;

impl ValidationStage {
    /// Reason `signal` is malformed, if it is
    #[must_use]
    pub fn problem(signal: &Signal) -> Option<&'static str> {
        if signal.symbol.trim().is_empty() {
            Some("empty symbol")
        } else if !signal.change_percent.is_finite() {
            Some("non-finite change")
        } else if !(0.0..=1.0).contains(&signal.confidence) {
            Some("confidence out of range")
        } else {
            None
        }
    }
}

#[async_trait]
impl SignalStage for ValidationStage {
    fn name(&self) -> &str {
        "validation"
    }

    async fn process(&self, signal: Signal) -> anyhow::Result<Option<Signal>> {
        if let Some(problem) = Self::problem(&signal) {
            debug!(id = %signal.id, symbol = %signal.symbol, problem, "Invalid signal dropped");
            return Ok(None);
        }
        Ok(Some(signal))
    }
}

/// Adds strength and direction tags, rounds the change and stamps processing time
pub struct EnrichmentStage {
    clock: Arc<dyn Clock>,
    precision: u32,
}

impl EnrichmentStage {
    /// Create with the number of decimals kept in `change_percent`
    pub fn new(clock: Arc<dyn Clock>, precision: u32) -> Self {
        Self { clock, precision }
    }

    fn round(&self, value: f64) -> f64 {
        // SAFETY: u32 to i32 - precision is a handful of decimals
        let factor = 10f64.powi(self.precision.min(12) as i32);
        (value * factor).round() / factor
    }
}

#[async_trait]
impl SignalStage for EnrichmentStage {
    fn name(&self) -> &str {
        "enrichment"
    }

    async fn process(&self, mut signal: Signal) -> anyhow::Result<Option<Signal>> {
        signal.add_tag(format!("strength:{}", signal.strength().as_str()));
        signal.add_tag(format!("direction:{}", signal.direction.as_str()));
        signal.change_percent = self.round(signal.change_percent);

        // SAFETY: i64 to f64 - epoch milliseconds stay well inside f64's exact range
        let processed_at = self.clock.now().timestamp_millis() as f64;
        signal
            .metadata
            .indicators
            .insert("pipeline_processed_at".to_string(), processed_at);
        Ok(Some(signal))
    }
}
