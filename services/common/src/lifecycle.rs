//! Service lifecycle contract shared by every orchestrated component

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a managed service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ServiceState {
    /// Not running
    Stopped,
    /// `start` in progress
    Starting,
    /// Started successfully
    Running,
    /// `stop` in progress
    Stopping,
    /// Last start or stop failed
    Error,
}

impl ServiceState {
    /// Whether the service can serve dependents
    #[must_use]
    pub const fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Error => "error",
        };
        f.write_str(name)
    }
}

/// A start/stop-capable component managed by the orchestrator
#[async_trait]
pub trait ManagedService: Send + Sync {
    /// Unique service name
    fn name(&self) -> &str;

    /// Start background work; must return once the service is ready
    async fn start(&self) -> anyhow::Result<()>;

    /// Stop background work and release resources
    async fn stop(&self) -> anyhow::Result<()>;

    /// Liveness probe
    async fn health_check(&self) -> bool {
        true
    }
}
