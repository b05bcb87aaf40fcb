//! Service Lifecycle Orchestrator
//!
//! Runs the pipeline services as one supervised runtime:
//! - Registry of managed services with per-service state
//! - Dependency-ordered start and reverse-order stop
//! - Bounded restarts after failed starts or failed health checks
//! - Periodic health reports published on the event bus
//! - Layered runtime configuration (JSON file, then environment)

pub mod config;
pub mod error;
pub mod graph;
pub mod orchestrator;
pub mod registry;

pub use config::{ENV_PREFIX, LifecycleConfig, RuntimeConfig};
pub use error::{ConfigError, OrchestratorError, OrchestratorResult};
pub use graph::DependencyGraph;
pub use orchestrator::ServiceOrchestrator;
pub use registry::{ServiceEntry, ServiceInfo, ServiceRegistry};
