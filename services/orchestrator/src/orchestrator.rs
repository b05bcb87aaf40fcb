//! Service lifecycle orchestrator
//!
//! Starts and stops registered services in dependency order, tracks their
//! state, restarts failed services with a bounded number of attempts and runs
//! a periodic health loop. Every transition is published on the bus when one
//! is attached.

use crate::config::LifecycleConfig;
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::graph::DependencyGraph;
use crate::registry::{ServiceInfo, ServiceRegistry};
use chrono::Utc;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use services_common::{
    Event, EventBus, EventPayload, EventPriority, EventType, HealthReport, ManagedService,
    ServiceEventData, ServiceState,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{RwLock, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

const ORCHESTRATOR_NAME: &str = "orchestrator";

/// Registry and graph, locked together
#[derive(Default)]
struct Catalog {
    registry: ServiceRegistry,
    graph: DependencyGraph,
}

/// State shared with the health loop and scheduled restarts
struct Supervisor {
    config: LifecycleConfig,
    bus: Option<Arc<EventBus>>,
    catalog: RwLock<Catalog>,
    restarts: Mutex<FxHashMap<String, JoinHandle<()>>>,
    shutdown_tx: watch::Sender<bool>,
}

impl Supervisor {
    async fn start_service(self: &Arc<Self>, name: &str) -> OrchestratorResult<()> {
        let mut catalog = self.catalog.write().await;
        let Catalog { registry, graph } = &mut *catalog;

        let entry = registry
            .get(name)
            .ok_or_else(|| OrchestratorError::ServiceNotFound(name.to_string()))?;
        if entry.info().state == ServiceState::Running {
            debug!(service = name, "Service already running");
            return Ok(());
        }

        for dependency in graph.dependencies(name) {
            let ready = registry
                .get(&dependency)
                .ok_or_else(|| OrchestratorError::ServiceNotFound(dependency.clone()))?
                .info()
                .state
                .is_running();
            if !ready {
                return Err(OrchestratorError::DependencyNotReady {
                    service: name.to_string(),
                    dependency,
                });
            }
        }

        let service = Arc::clone(entry.service());
        self.transition(registry, name, ServiceState::Starting, None);
        info!(service = name, "Starting service");

        match service.start().await {
            Ok(()) => {
                if let Some(entry) = registry.get_mut(name) {
                    let info = entry.info_mut();
                    info.state = ServiceState::Running;
                    info.started_at = Some(Utc::now());
                    info.error = None;
                    info.restart_attempts = 0;
                }
                info!(service = name, "Service started");
                self.publish_service(registry, name, EventType::ServiceStarted);
                Ok(())
            }
            Err(e) => {
                let reason = e.to_string();
                error!(service = name, error = %reason, "Service failed to start");
                self.transition(registry, name, ServiceState::Error, Some(reason.clone()));
                self.publish_service(registry, name, EventType::ServiceError);
                self.schedule_restart(registry, name);
                Err(OrchestratorError::StartFailed {
                    service: name.to_string(),
                    reason,
                })
            }
        }
    }

    async fn stop_service(&self, name: &str) -> OrchestratorResult<()> {
        let mut catalog = self.catalog.write().await;
        let registry = &mut catalog.registry;

        let entry = registry
            .get(name)
            .ok_or_else(|| OrchestratorError::ServiceNotFound(name.to_string()))?;
        if entry.info().state == ServiceState::Stopped {
            debug!(service = name, "Service already stopped");
            return Ok(());
        }
        if let Some(pending) = self.restarts.lock().remove(name) {
            pending.abort();
            debug!(service = name, "Pending restart cancelled");
        }

        let service = Arc::clone(entry.service());
        self.transition(registry, name, ServiceState::Stopping, None);
        info!(service = name, "Stopping service");

        match service.stop().await {
            Ok(()) => {
                if let Some(entry) = registry.get_mut(name) {
                    let info = entry.info_mut();
                    info.state = ServiceState::Stopped;
                    info.stopped_at = Some(Utc::now());
                }
                info!(service = name, "Service stopped");
                self.publish_service(registry, name, EventType::ServiceStopped);
                Ok(())
            }
            Err(e) => {
                let reason = e.to_string();
                error!(service = name, error = %reason, "Service failed to stop");
                self.transition(registry, name, ServiceState::Error, Some(reason.clone()));
                self.publish_service(registry, name, EventType::ServiceError);
                Err(OrchestratorError::StopFailed {
                    service: name.to_string(),
                    reason,
                })
            }
        }
    }

    async fn restart_service(self: &Arc<Self>, name: &str) -> OrchestratorResult<()> {
        info!(service = name, "Restarting service");
        self.stop_service(name).await?;
        self.start_service(name).await
    }

    fn transition(
        &self,
        registry: &mut ServiceRegistry,
        name: &str,
        state: ServiceState,
        error: Option<String>,
    ) {
        if let Some(entry) = registry.get_mut(name) {
            let info = entry.info_mut();
            debug!(service = name, from = %info.state, to = %state, "Service state change");
            info.state = state;
            if error.is_some() {
                info.error = error;
            }
        }
    }

    /// Schedule a restart after the configured delay, bounded per service
    ///
    /// Once the bound is reached a terminal `service_error` is published and
    /// no further attempts are made.
    fn schedule_restart(self: &Arc<Self>, registry: &mut ServiceRegistry, name: &str) {
        if !self.config.restart_on_failure {
            return;
        }
        if self
            .restarts
            .lock()
            .get(name)
            .is_some_and(|pending| !pending.is_finished())
        {
            debug!(service = name, "Restart already pending");
            return;
        }
        let Some(entry) = registry.get_mut(name) else {
            return;
        };

        let info = entry.info_mut();
        if info.restart_attempts >= self.config.max_restart_attempts {
            error!(
                service = name,
                attempts = info.restart_attempts,
                "Restart attempts exhausted, giving up"
            );
            let data = ServiceEventData {
                service: name.to_string(),
                state: info.state.to_string(),
                error: Some(format!(
                    "restart attempts exhausted after {}",
                    info.restart_attempts
                )),
                restart_attempts: info.restart_attempts,
            };
            self.publish(
                Event::new(EventType::ServiceError, ORCHESTRATOR_NAME, EventPayload::Service(data))
                    .with_priority(EventPriority::Critical),
            );
            return;
        }

        info.restart_attempts += 1;
        let attempt = info.restart_attempts;
        warn!(
            service = name,
            attempt,
            max = self.config.max_restart_attempts,
            delay_ms = self.config.restart_delay_ms,
            "Scheduling restart"
        );

        let handle = tokio::spawn(Self::delayed_restart(Arc::clone(self), name.to_string()));
        self.restarts.lock().insert(name.to_string(), handle);
    }

    fn delayed_restart(self: Arc<Self>, name: String) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            let mut shutdown_rx = self.shutdown_tx.subscribe();
            let delay = tokio::time::sleep(self.config.restart_delay());
            tokio::pin!(delay);
            loop {
                tokio::select! {
                    () = &mut delay => break,
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            debug!(service = %name, "Restart cancelled by shutdown");
                            return;
                        }
                    }
                }
            }
            self.restarts.lock().remove(&name);

            let running = self
                .catalog
                .read()
                .await
                .registry
                .get(&name)
                .is_some_and(|entry| entry.info().state.is_running());
            let result = if running {
                self.restart_service(&name).await
            } else {
                self.start_service(&name).await
            };
            if let Err(e) = result {
                warn!(service = %name, error = %e, "Restart attempt failed");
            }
        })
    }

    async fn health_report(&self) -> HealthReport {
        let targets: Vec<(String, ServiceState, Arc<dyn ManagedService>)> = {
            let catalog = self.catalog.read().await;
            catalog
                .registry
                .iter()
                .map(|entry| {
                    (
                        entry.info().name.clone(),
                        entry.info().state,
                        Arc::clone(entry.service()),
                    )
                })
                .collect()
        };

        let mut report = HealthReport::default();
        for (name, state, service) in targets {
            let healthy = state.is_running() && service.health_check().await;
            report.services.insert(name, healthy);
        }
        report
    }

    async fn check_health(self: &Arc<Self>) {
        let report = self.health_report().await;
        let unhealthy = report.unhealthy();
        if unhealthy.is_empty() {
            debug!(services = report.services.len(), "All services healthy");
        } else {
            warn!(unhealthy = ?unhealthy, "Unhealthy services");
        }
        self.publish(Event::new(
            EventType::HealthCheck,
            ORCHESTRATOR_NAME,
            EventPayload::Health(report),
        ));

        if !self.config.restart_on_failure {
            return;
        }
        let mut catalog = self.catalog.write().await;
        for name in unhealthy {
            // Stopped or failed services are not restarted by the health loop
            let running = catalog
                .registry
                .get(&name)
                .is_some_and(|entry| entry.info().state.is_running());
            if running {
                self.schedule_restart(&mut catalog.registry, &name);
            }
        }
    }

    fn publish_service(&self, registry: &ServiceRegistry, name: &str, event_type: EventType) {
        let Some(entry) = registry.get(name) else {
            return;
        };
        let info = entry.info();
        let data = ServiceEventData {
            service: name.to_string(),
            state: info.state.to_string(),
            error: info.error.clone(),
            restart_attempts: info.restart_attempts,
        };
        self.publish(Event::new(event_type, ORCHESTRATOR_NAME, EventPayload::Service(data)));
    }

    fn publish(&self, event: Event) {
        let Some(bus) = &self.bus else {
            info!(event_type = %event.event_type, "Lifecycle event");
            return;
        };
        let event_type = event.event_type.clone();
        if let Err(e) = bus.publish(event) {
            debug!(event_type = %event_type, error = %e, "Lifecycle event not published");
        }
    }
}

async fn health_loop(supervisor: Arc<Supervisor>, mut shutdown_rx: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(supervisor.config.health_check_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker.tick().await;

    loop {
        tokio::select! {
            biased;
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => supervisor.check_health().await,
        }
    }
    debug!("Health loop stopped");
}

/// Service lifecycle orchestrator
pub struct ServiceOrchestrator {
    supervisor: Arc<Supervisor>,
    running: AtomicBool,
    health_task: Mutex<Option<JoinHandle<()>>>,
}

impl ServiceOrchestrator {
    /// Create an orchestrator; lifecycle events go to `bus` when given
    #[must_use]
    pub fn new(config: LifecycleConfig, bus: Option<Arc<EventBus>>) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            supervisor: Arc::new(Supervisor {
                config,
                bus,
                catalog: RwLock::new(Catalog::default()),
                restarts: Mutex::new(FxHashMap::default()),
                shutdown_tx,
            }),
            running: AtomicBool::new(false),
            health_task: Mutex::new(None),
        }
    }

    /// Supervision settings
    #[must_use]
    pub fn config(&self) -> &LifecycleConfig {
        &self.supervisor.config
    }

    /// Register a service under its own name
    pub async fn register(&self, service: Arc<dyn ManagedService>) -> OrchestratorResult<()> {
        self.supervisor.catalog.write().await.registry.register(service)
    }

    /// Record that `service` needs `dependency` running before it starts
    pub async fn add_dependency(&self, service: &str, dependency: &str) {
        let added = self
            .supervisor
            .catalog
            .write()
            .await
            .graph
            .add_dependency(service, dependency);
        if added {
            debug!(service, dependency, "Dependency added");
        }
    }

    /// Direct dependencies of `service`
    pub async fn get_dependencies(&self, service: &str) -> Vec<String> {
        self.supervisor.catalog.read().await.graph.dependencies(service)
    }

    /// Registered service names in registration order
    pub async fn service_names(&self) -> Vec<String> {
        self.supervisor.catalog.read().await.registry.names().to_vec()
    }

    /// Bookkeeping for one service
    pub async fn service_info(&self, name: &str) -> Option<ServiceInfo> {
        self.supervisor
            .catalog
            .read()
            .await
            .registry
            .get(name)
            .map(|entry| entry.info().clone())
    }

    /// Start one service once all its dependencies run; no-op when already running
    pub async fn start_service(&self, name: &str) -> OrchestratorResult<()> {
        self.supervisor.start_service(name).await
    }

    /// Stop one service and cancel any pending restart for it
    pub async fn stop_service(&self, name: &str) -> OrchestratorResult<()> {
        self.supervisor.stop_service(name).await
    }

    /// Stop then start one service
    pub async fn restart_service(&self, name: &str) -> OrchestratorResult<()> {
        self.supervisor.restart_service(name).await
    }

    /// Current dependency-respecting start order
    pub async fn start_order(&self) -> Vec<String> {
        let catalog = self.supervisor.catalog.read().await;
        catalog.graph.start_order(catalog.registry.names())
    }

    /// Start every service in dependency order, collecting failures
    pub async fn start_all(&self) -> FxHashMap<String, OrchestratorError> {
        let order = self.start_order().await;
        info!(services = order.len(), "Starting all services");

        let mut errors = FxHashMap::default();
        for name in &order {
            if let Err(e) = self.supervisor.start_service(name).await {
                warn!(service = %name, error = %e, "Service not started");
                errors.insert(name.clone(), e);
            }
        }

        info!(
            started = order.len() - errors.len(),
            failed = errors.len(),
            "Startup complete"
        );
        self.supervisor.publish(Event::new(
            EventType::SystemStarted,
            ORCHESTRATOR_NAME,
            EventPayload::Json(serde_json::json!({
                "services": order,
                "failed": errors.keys().collect::<Vec<_>>(),
            })),
        ));
        errors
    }

    /// Stop every service in reverse start order, collecting failures
    pub async fn stop_all(&self) -> FxHashMap<String, OrchestratorError> {
        let mut order = self.start_order().await;
        order.reverse();
        info!(services = order.len(), "Stopping all services");

        let mut errors = FxHashMap::default();
        for name in &order {
            if let Err(e) = self.supervisor.stop_service(name).await {
                warn!(service = %name, error = %e, "Service not stopped cleanly");
                errors.insert(name.clone(), e);
            }
        }

        info!(failed = errors.len(), "Shutdown complete");
        self.supervisor.publish(Event::new(
            EventType::SystemStopped,
            ORCHESTRATOR_NAME,
            EventPayload::Json(serde_json::json!({
                "services": order,
                "failed": errors.keys().collect::<Vec<_>>(),
            })),
        ));
        errors
    }

    /// Health of every registered service; services that are not running report unhealthy
    pub async fn health_report(&self) -> HealthReport {
        self.supervisor.health_report().await
    }

    /// Spawn the health loop
    pub fn start(&self) -> OrchestratorResult<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(OrchestratorError::AlreadyRunning);
        }
        self.supervisor.shutdown_tx.send_replace(false);

        let handle = tokio::spawn(health_loop(
            Arc::clone(&self.supervisor),
            self.supervisor.shutdown_tx.subscribe(),
        ));
        *self.health_task.lock() = Some(handle);

        info!(
            interval_ms = self.supervisor.config.health_check_interval_ms,
            restart_on_failure = self.supervisor.config.restart_on_failure,
            "Orchestrator started"
        );
        Ok(())
    }

    /// Cancel pending restarts and join the health loop within the shutdown timeout
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            debug!("Orchestrator not running");
            return;
        }
        self.supervisor.shutdown_tx.send_replace(true);

        let pending: Vec<JoinHandle<()>> = self
            .supervisor
            .restarts
            .lock()
            .drain()
            .map(|(_, handle)| handle)
            .collect();
        for handle in &pending {
            handle.abort();
        }

        let task = self.health_task.lock().take();
        if let Some(mut task) = task {
            if tokio::time::timeout(self.supervisor.config.shutdown_timeout(), &mut task)
                .await
                .is_err()
            {
                warn!("Health loop did not stop in time, aborting");
                task.abort();
            }
        }
        info!(cancelled_restarts = pending.len(), "Orchestrator stopped");
    }

    /// Whether the health loop is running
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}
