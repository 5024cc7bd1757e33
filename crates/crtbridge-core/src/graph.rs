//! Keep-alive edges between managed resources.
//!
//! [`ReferenceGraph`] records which resources a dependent holds strong
//! references to. Edges are added while the dependent is being constructed
//! and are dropped in bulk when the dependent is fully released; there is no
//! way to remove a single edge.
//!
//! A dependency must have been created before its dependent. Resource ids are
//! monotonic, so the check is a simple id comparison and the graph can never
//! contain a cycle.

use std::sync::{Arc, OnceLock};

use dashmap::DashMap;
use tracing::trace;

use crate::error::{CrtError, CrtResult};
use crate::handle::ResourceId;
use crate::lifecycle::CrtResource;

static GLOBAL_GRAPH: OnceLock<Arc<ReferenceGraph>> = OnceLock::new();

/// Runtime-wide set of strong-reference edges.
///
/// Safe to mutate from any thread; independent resources may add and release
/// their edges concurrently.
pub struct ReferenceGraph {
    /// Dependent id to the dependencies it keeps alive, in insertion order.
    edges: DashMap<ResourceId, Vec<Arc<dyn CrtResource>>>,
}

impl std::fmt::Debug for ReferenceGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReferenceGraph")
            .field("dependent_count", &self.edges.len())
            .finish_non_exhaustive()
    }
}

impl Default for ReferenceGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl ReferenceGraph {
    /// Create an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self {
            edges: DashMap::new(),
        }
    }

    /// The process-wide graph used by resources that are not given one
    /// explicitly.
    #[must_use]
    pub fn global() -> Arc<Self> {
        Arc::clone(GLOBAL_GRAPH.get_or_init(|| Arc::new(Self::new())))
    }

    /// Record that `dependent` keeps `dependency` alive.
    ///
    /// # Errors
    ///
    /// Returns [`CrtError::InvalidState`] if the dependency was not created
    /// strictly before the dependent.
    pub(crate) fn add_edge(
        &self,
        dependent: ResourceId,
        dependency: Arc<dyn CrtResource>,
    ) -> CrtResult<()> {
        let dependency_id = dependency.lifecycle().id();
        if dependency_id >= dependent {
            return Err(CrtError::InvalidState(format!(
                "{} {dependency_id} cannot be a dependency of {dependent}: dependencies must be created first",
                dependency.lifecycle().kind()
            )));
        }

        trace!(%dependent, dependency = %dependency_id, "adding strong reference");
        self.edges.entry(dependent).or_default().push(dependency);
        Ok(())
    }

    /// Drop every edge out of `dependent`, returning how many were removed.
    ///
    /// The dependencies are dropped after the map entry is gone, so a
    /// dependency whose last reference this was can release its own edges
    /// without contending on the same shard.
    pub(crate) fn release_edges(&self, dependent: ResourceId) -> usize {
        let removed = self.edges.remove(&dependent).map(|(_, deps)| deps);
        let count = removed.as_ref().map_or(0, Vec::len);
        drop(removed);
        count
    }

    /// Ids of the resources `dependent` currently keeps alive.
    #[must_use]
    pub fn dependencies_of(&self, dependent: ResourceId) -> Vec<ResourceId> {
        self.edges
            .get(&dependent)
            .map(|deps| deps.iter().map(|d| d.lifecycle().id()).collect())
            .unwrap_or_default()
    }

    /// Ids of every resource that keeps `dependency` alive, sorted.
    #[must_use]
    pub fn dependents_of(&self, dependency: ResourceId) -> Vec<ResourceId> {
        let mut dependents: Vec<ResourceId> = self
            .edges
            .iter()
            .filter(|entry| entry.value().iter().any(|d| d.lifecycle().id() == dependency))
            .map(|entry| *entry.key())
            .collect();
        dependents.sort();
        dependents
    }

    /// Whether `dependent` holds an edge to `dependency`.
    #[must_use]
    pub fn holds(&self, dependent: ResourceId, dependency: ResourceId) -> bool {
        self.edges
            .get(&dependent)
            .is_some_and(|deps| deps.iter().any(|d| d.lifecycle().id() == dependency))
    }

    /// Total number of edges.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.edges.iter().map(|entry| entry.value().len()).sum()
    }
}
