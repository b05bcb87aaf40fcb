//! Service dependency graph

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::warn;

/// Service name to the names it depends on
#[derive(Debug, Default, Clone)]
pub struct DependencyGraph {
    edges: FxHashMap<String, Vec<String>>,
}

impl DependencyGraph {
    /// Create an empty graph
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `service` needs `dependency` running first
    ///
    /// Returns `false` for self edges and edges already present.
    pub fn add_dependency(&mut self, service: &str, dependency: &str) -> bool {
        if service == dependency {
            warn!(service, "Ignoring self dependency");
            return false;
        }
        let deps = self.edges.entry(service.to_string()).or_default();
        if deps.iter().any(|d| d == dependency) {
            return false;
        }
        deps.push(dependency.to_string());
        true
    }

    /// Direct dependencies of `service` in insertion order
    #[must_use]
    pub fn dependencies(&self, service: &str) -> Vec<String> {
        self.edges.get(service).cloned().unwrap_or_default()
    }

    /// Services that directly depend on `service`, sorted
    #[must_use]
    pub fn dependents(&self, service: &str) -> Vec<String> {
        let mut dependents: Vec<String> = self
            .edges
            .iter()
            .filter(|(_, deps)| deps.iter().any(|d| d == service))
            .map(|(name, _)| name.clone())
            .collect();
        dependents.sort();
        dependents
    }

    /// Start order over `services`: dependencies before dependents, otherwise
    /// the given order
    ///
    /// Dependencies outside `services` are skipped. A cycle is broken at the
    /// edge that closes it, with a warning.
    #[must_use]
    pub fn start_order(&self, services: &[String]) -> Vec<String> {
        let known: FxHashSet<&str> = services.iter().map(String::as_str).collect();
        let mut visit = Visit {
            graph: self,
            known: &known,
            done: FxHashSet::default(),
            in_progress: FxHashSet::default(),
            order: Vec::with_capacity(services.len()),
        };
        for service in services {
            visit.visit(service);
        }
        visit.order
    }
}

struct Visit<'a> {
    graph: &'a DependencyGraph,
    known: &'a FxHashSet<&'a str>,
    done: FxHashSet<String>,
    in_progress: FxHashSet<String>,
    order: Vec<String>,
}

impl Visit<'_> {
    fn visit(&mut self, service: &str) {
        if self.done.contains(service) {
            return;
        }
        if self.in_progress.contains(service) {
            warn!(service, "Dependency cycle detected, ignoring back edge");
            return;
        }

        self.in_progress.insert(service.to_string());
        let graph = self.graph;
        if let Some(deps) = graph.edges.get(service) {
            for dep in deps {
                if self.known.contains(dep.as_str()) {
                    self.visit(dep);
                }
            }
        }
        self.in_progress.remove(service);
        self.done.insert(service.to_string());
        self.order.push(service.to_string());
    }
}
