//! Service registry

use crate::error::{OrchestratorError, OrchestratorResult};
use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use serde::Serialize;
use services_common::{ManagedService, ServiceState};
use std::sync::Arc;
use tracing::info;

/// Lifecycle bookkeeping for one registered service
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceInfo {
    pub name: String,
    pub state: ServiceState,
    pub started_at: Option<DateTime<Utc>>,
    pub stopped_at: Option<DateTime<Utc>>,
    /// Last start or stop failure
    pub error: Option<String>,
    /// Restart attempts since the last successful start
    pub restart_attempts: u32,
}

impl ServiceInfo {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: ServiceState::Stopped,
            started_at: None,
            stopped_at: None,
            error: None,
            restart_attempts: 0,
        }
    }
}

/// Registered service and its state
pub struct ServiceEntry {
    service: Arc<dyn ManagedService>,
    info: ServiceInfo,
}

impl ServiceEntry {
    /// The managed service
    #[must_use]
    pub fn service(&self) -> &Arc<dyn ManagedService> {
        &self.service
    }

    /// Current bookkeeping
    #[must_use]
    pub fn info(&self) -> &ServiceInfo {
        &self.info
    }

    pub(crate) fn info_mut(&mut self) -> &mut ServiceInfo {
        &mut self.info
    }
}

/// Services keyed by name, remembering registration order
#[derive(Default)]
pub struct ServiceRegistry {
    entries: FxHashMap<String, ServiceEntry>,
    order: Vec<String>,
}

impl ServiceRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a service under its own name
    pub fn register(&mut self, service: Arc<dyn ManagedService>) -> OrchestratorResult<()> {
        let name = service.name().to_string();
        if self.entries.contains_key(&name) {
            return Err(OrchestratorError::ServiceAlreadyRegistered(name));
        }

        info!(service = %name, "Service registered");
        self.entries.insert(
            name.clone(),
            ServiceEntry {
                service,
                info: ServiceInfo::new(name.clone()),
            },
        );
        self.order.push(name);
        Ok(())
    }

    /// Entry for `name`
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ServiceEntry> {
        self.entries.get(name)
    }

    pub(crate) fn get_mut(&mut self, name: &str) -> Option<&mut ServiceEntry> {
        self.entries.get_mut(name)
    }

    /// Names in registration order
    #[must_use]
    pub fn names(&self) -> &[String] {
        &self.order
    }

    /// Whether `name` is registered
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Number of registered services
    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Whether nothing is registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Entries in registration order
    pub fn iter(&self) -> impl Iterator<Item = &ServiceEntry> {
        self.order.iter().filter_map(|name| self.entries.get(name))
    }
}
