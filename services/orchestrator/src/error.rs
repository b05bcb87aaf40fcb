//! Error types for the orchestrator and runtime configuration

use thiserror::Error;

/// Lifecycle orchestration errors
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// No service registered under this name
    #[error("Service not found: {0}")]
    ServiceNotFound(String),

    /// A service with this name is already registered
    #[error("Service already registered: {0}")]
    ServiceAlreadyRegistered(String),

    /// A dependency is registered but not running
    #[error("Service '{service}' depends on '{dependency}', which is not running")]
    DependencyNotReady {
        /// Service being started
        service: String,
        /// Dependency that is not running
        dependency: String,
    },

    /// The service's `start` failed
    #[error("Service '{service}' failed to start: {reason}")]
    StartFailed {
        /// Service name
        service: String,
        /// Failure description
        reason: String,
    },

    /// The service's `stop` failed
    #[error("Service '{service}' failed to stop: {reason}")]
    StopFailed {
        /// Service name
        service: String,
        /// Failure description
        reason: String,
    },

    /// `start` called on a running orchestrator
    #[error("Orchestrator already running")]
    AlreadyRunning,
}

/// Result type for orchestrator operations
pub type OrchestratorResult<T> = std::result::Result<T, OrchestratorError>;

/// Runtime configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("Failed to read config file {path}: {source}")]
    Io {
        /// File path
        path: String,
        /// Source error
        source: std::io::Error,
    },

    /// Config content is not valid JSON for the expected shape
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    /// An environment override could not be applied
    #[error("Invalid override {key}={value}: {reason}")]
    Override {
        /// Environment variable name
        key: String,
        /// Raw value
        value: String,
        /// Why it was rejected
        reason: String,
    },

    /// One or more settings are invalid
    #[error("Invalid configuration: {}", .0.join("; "))]
    Validation(Vec<String>),
}
