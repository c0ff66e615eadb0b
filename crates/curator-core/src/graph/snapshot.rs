//! Atomic publication of immutable graph snapshots.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::graph::DependencyGraph;

struct Published {
    graph: Arc<DependencyGraph>,
    generation: u64,
}

/// Holds the current snapshot. Readers clone the `Arc` and keep using it
/// after a newer snapshot is published; a graph is never mutated once it
/// is behind the handle.
pub struct SnapshotHandle {
    current: RwLock<Published>,
}

impl Default for SnapshotHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotHandle {
    pub fn new() -> Self {
        Self {
            current: RwLock::new(Published {
                graph: Arc::new(DependencyGraph::new()),
                generation: 0,
            }),
        }
    }

    pub fn load(&self) -> Arc<DependencyGraph> {
        Arc::clone(&self.current.read().graph)
    }

    /// Generation of the current snapshot; 0 until the first publish.
    pub fn generation(&self) -> u64 {
        self.current.read().generation
    }

    /// Swap in a fully built graph, returning the snapshot it replaced.
    pub fn publish(&self, graph: DependencyGraph) -> Arc<DependencyGraph> {
        let mut current = self.current.write();
        let previous = std::mem::replace(&mut current.graph, Arc::new(graph));
        current.generation += 1;
        previous
    }
}
