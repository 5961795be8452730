//! What a running vertex program is allowed to see and touch.
//!
//! A [`Scope`] owns the scope locks for one task and mediates every data
//! access. Data cells are only locked for the duration of a single accessor
//! call; the scope locks are what keep overlapping updates apart.

mod locks;

use std::sync::Arc;

use tessera_core::{Consistency, EngineError, Priority, Result, VertexId};
use tessera_graph::{GraphStore, VertexIndex};

use crate::globals::Globals;
use crate::program::SharedProgram;
use crate::scheduler::Task;

pub use self::locks::{LockMode, LockTable, ScopeLocks};

pub struct Scope<'g, V, E> {
    graph: &'g GraphStore<V, E>,
    globals: &'g Globals,
    center: VertexIndex,
    consistency: Consistency,
    program: SharedProgram<V, E>,
    spawned: Vec<Task<V, E>>,
    locks: ScopeLocks<'g>,
}

impl<'g, V, E> Scope<'g, V, E> {
    /// Block until the lock set for `center` at `consistency` is held.
    pub(crate) fn acquire(
        graph: &'g GraphStore<V, E>,
        table: &'g LockTable,
        globals: &'g Globals,
        center: VertexIndex,
        consistency: Consistency,
        program: SharedProgram<V, E>,
    ) -> Self {
        let locks = table.acquire(graph, center, consistency);
        Self {
            graph,
            globals,
            center,
            consistency,
            program,
            spawned: Vec::new(),
            locks,
        }
    }

    /// Release every lock and hand back the tasks the program requested.
    pub(crate) fn release(self) -> Vec<Task<V, E>> {
        let Scope { spawned, locks, .. } = self;
        drop(locks);
        spawned
    }

    fn violation(&self, reason: impl Into<String>) -> EngineError {
        EngineError::ScopeViolation {
            vertex: self.vertex(),
            reason: reason.into(),
        }
    }

    /// Index of `id` if it is the centre or one of its neighbours.
    fn in_scope(&self, id: VertexId) -> Result<VertexIndex> {
        let idx = self.graph.require(id)?;
        if idx == self.center || self.graph.adjacent(self.center).binary_search(&idx).is_ok() {
            Ok(idx)
        } else {
            Err(self.violation(format!("vertex {id} is not adjacent")))
        }
    }

    fn neighbor(&self, id: VertexId) -> Result<VertexIndex> {
        let idx = self.in_scope(id)?;
        if idx == self.center {
            return Err(self.violation("use the centre accessors for the scope's own vertex"));
        }
        Ok(idx)
    }

    fn incident_edge(&self, source: VertexId, target: VertexId) -> Result<usize> {
        let s = self.graph.require(source)?;
        let t = self.graph.require(target)?;
        if s != self.center && t != self.center {
            return Err(self.violation(format!("edge {source} -> {target} is not incident")));
        }
        self.graph
            .edge_between(s, t)
            .ok_or(EngineError::UnknownEdge(source, target))
    }

    /// The centre vertex.
    pub fn vertex(&self) -> VertexId {
        self.graph.id_at(self.center)
    }

    pub fn consistency(&self) -> Consistency {
        self.consistency
    }

    /// Number of scope locks this task holds.
    pub fn lock_count(&self) -> usize {
        self.locks.len()
    }

    pub fn globals(&self) -> &'g Globals {
        self.globals
    }

    /// Total vertices in the graph.
    pub fn num_vertices(&self) -> usize {
        self.graph.vertex_count()
    }

    /// Neighbours in either direction, deduplicated.
    pub fn neighbors(&self) -> Vec<VertexId> {
        self.graph
            .adjacent(self.center)
            .iter()
            .map(|&n| self.graph.id_at(n))
            .collect()
    }

    /// Sources of the centre's incoming edges.
    pub fn in_edges(&self) -> Vec<VertexId> {
        self.graph
            .in_edge_ids(self.center)
            .iter()
            .map(|&e| self.graph.id_at(self.graph.endpoints(e).0))
            .collect()
    }

    /// Targets of the centre's outgoing edges.
    pub fn out_edges(&self) -> Vec<VertexId> {
        self.graph
            .out_edge_ids(self.center)
            .iter()
            .map(|&e| self.graph.id_at(self.graph.endpoints(e).1))
            .collect()
    }

    /// Out-degree of the centre or a neighbour.
    pub fn out_degree(&self, id: VertexId) -> Result<usize> {
        Ok(self.graph.out_edge_ids(self.in_scope(id)?).len())
    }

    /// In-degree of the centre or a neighbour.
    pub fn in_degree(&self, id: VertexId) -> Result<usize> {
        Ok(self.graph.in_edge_ids(self.in_scope(id)?).len())
    }

    pub fn with_data<R>(&self, f: impl FnOnce(&V) -> R) -> R {
        f(&*self.graph.vertex_cell(self.center).read())
    }

    pub fn with_data_mut<R>(&mut self, f: impl FnOnce(&mut V) -> R) -> R {
        f(&mut *self.graph.vertex_cell(self.center).write())
    }

    pub fn set_data(&mut self, value: V) {
        *self.graph.vertex_cell(self.center).write() = value;
    }

    /// Read a neighbour's data. At vertex consistency the neighbour may be
    /// changing concurrently; the read is still atomic per vertex.
    pub fn with_neighbor<R>(&self, id: VertexId, f: impl FnOnce(&V) -> R) -> Result<R> {
        let idx = self.neighbor(id)?;
        Ok(f(&*self.graph.vertex_cell(idx).read()))
    }

    /// Write a neighbour's data. Requires full consistency.
    pub fn with_neighbor_mut<R>(&mut self, id: VertexId, f: impl FnOnce(&mut V) -> R) -> Result<R> {
        let idx = self.neighbor(id)?;
        if self.consistency != Consistency::Full {
            return Err(self.violation(format!(
                "writing neighbour {id} needs full consistency, scope is {}",
                self.consistency
            )));
        }
        Ok(f(&mut *self.graph.vertex_cell(idx).write()))
    }

    pub fn with_edge<R>(&self, source: VertexId, target: VertexId, f: impl FnOnce(&E) -> R) -> Result<R> {
        let edge = self.incident_edge(source, target)?;
        Ok(f(&*self.graph.edge_cell(edge).read()))
    }

    /// Write an incident edge. Requires edge or full consistency.
    pub fn with_edge_mut<R>(
        &mut self,
        source: VertexId,
        target: VertexId,
        f: impl FnOnce(&mut E) -> R,
    ) -> Result<R> {
        let edge = self.incident_edge(source, target)?;
        if self.consistency == Consistency::Vertex {
            return Err(self.violation("edges are read-only at vertex consistency"));
        }
        Ok(f(&mut *self.graph.edge_cell(edge).write()))
    }

    /// Request another run of the current program on `id`.
    pub fn schedule(&mut self, id: VertexId, priority: impl Into<Priority>) -> Result<()> {
        let program = Arc::clone(&self.program);
        self.schedule_with(id, program, priority)
    }

    /// Request a run of `program` on `id`. Published once this scope is released.
    pub fn schedule_with(
        &mut self,
        id: VertexId,
        program: SharedProgram<V, E>,
        priority: impl Into<Priority>,
    ) -> Result<()> {
        let idx = self.graph.require(id)?;
        self.spawned.push(Task::new(idx, program, priority.into()));
        Ok(())
    }

    /// Reschedule the current program on every neighbour.
    pub fn schedule_neighbors(&mut self, priority: impl Into<Priority>) {
        let priority = priority.into();
        for &n in self.graph.adjacent(self.center) {
            self.spawned
                .push(Task::new(n, Arc::clone(&self.program), priority));
        }
    }

    /// Tasks requested so far by this update.
    pub fn scheduled(&self) -> usize {
        self.spawned.len()
    }
}

impl<V: Clone, E> Scope<'_, V, E> {
    pub fn data(&self) -> V {
        self.with_data(V::clone)
    }

    pub fn neighbor_data(&self, id: VertexId) -> Result<V> {
        self.with_neighbor(id, V::clone)
    }
}

impl<V, E: Clone> Scope<'_, V, E> {
    pub fn edge_data(&self, source: VertexId, target: VertexId) -> Result<E> {
        self.with_edge(source, target, E::clone)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::VertexProgram;

    struct Noop;

    impl VertexProgram<i64, i64> for Noop {
        fn name(&self) -> &str {
            "noop"
        }

        fn update(&self, _scope: &mut Scope<'_, i64, i64>) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn path() -> GraphStore<i64, i64> {
        // 0 -> 1 -> 2, 3 isolated
        let mut g = GraphStore::new();
        for id in 0..4 {
            g.add_vertex(id, id as i64 * 10).unwrap();
        }
        g.add_edge(0, 1, 100).unwrap();
        g.add_edge(1, 2, 200).unwrap();
        g
    }

    fn with_scope<R>(
        consistency: Consistency,
        center: VertexId,
        f: impl FnOnce(&mut Scope<'_, i64, i64>) -> R,
    ) -> (R, usize) {
        let g = path();
        let table = LockTable::new(g.vertex_count());
        let globals = Globals::new();
        let program: SharedProgram<i64, i64> = Arc::new(Noop);
        let idx = g.require(center).unwrap();
        let mut scope = Scope::acquire(&g, &table, &globals, idx, consistency, program);
        let out = f(&mut scope);
        let spawned = scope.release().len();
        (out, spawned)
    }

    #[test]
    fn centre_access_and_structure() {
        let (_, _) = with_scope(Consistency::Edge, 1, |scope| {
            assert_eq!(scope.vertex(), 1);
            assert_eq!(scope.data(), 10);
            scope.set_data(11);
            assert_eq!(scope.with_data(|v| *v), 11);
            assert_eq!(scope.neighbors(), vec![0, 2]);
            assert_eq!(scope.in_edges(), vec![0]);
            assert_eq!(scope.out_edges(), vec![2]);
            assert_eq!(scope.out_degree(0).unwrap(), 1);
            assert_eq!(scope.lock_count(), 3);
            assert_eq!(scope.neighbor_data(2).unwrap(), 20);
            assert_eq!(scope.edge_data(0, 1).unwrap(), 100);
        });
    }

    #[test]
    fn vertex_level_is_read_only_outside_centre() {
        let (_, _) = with_scope(Consistency::Vertex, 1, |scope| {
            assert_eq!(scope.lock_count(), 1);
            assert_eq!(scope.neighbor_data(0).unwrap(), 0);
            assert!(matches!(
                scope.with_edge_mut(0, 1, |e| *e += 1),
                Err(EngineError::ScopeViolation { vertex: 1, .. })
            ));
            assert!(matches!(
                scope.with_neighbor_mut(0, |v| *v += 1),
                Err(EngineError::ScopeViolation { .. })
            ));
        });
    }

    #[test]
    fn edge_level_writes_incident_edges_only() {
        let (_, _) = with_scope(Consistency::Edge, 1, |scope| {
            scope.with_edge_mut(1, 2, |e| *e += 1).unwrap();
            assert_eq!(scope.edge_data(1, 2).unwrap(), 201);
            assert!(scope.with_neighbor_mut(2, |v| *v = 0).is_err());
        });
        let (_, _) = with_scope(Consistency::Edge, 0, |scope| {
            assert!(matches!(
                scope.edge_data(1, 2),
                Err(EngineError::ScopeViolation { .. })
            ));
            assert_eq!(scope.edge_data(1, 0), Err(EngineError::UnknownEdge(1, 0)));
        });
    }

    #[test]
    fn full_level_writes_neighbours() {
        let (_, _) = with_scope(Consistency::Full, 1, |scope| {
            scope.with_neighbor_mut(2, |v| *v += 5).unwrap();
            assert_eq!(scope.neighbor_data(2).unwrap(), 25);
            assert!(matches!(
                scope.neighbor_data(3),
                Err(EngineError::ScopeViolation { .. })
            ));
            assert_eq!(scope.neighbor_data(9), Err(EngineError::UnknownVertex(9)));
        });
    }

    #[test]
    fn scheduling_is_collected_until_release() {
        let ((), spawned) = with_scope(Consistency::Edge, 1, |scope| {
            scope.schedule(3, 1.0).unwrap();
            scope.schedule_neighbors(0.5);
            assert_eq!(scope.schedule(42, 0.0), Err(EngineError::UnknownVertex(42)));
            assert_eq!(scope.scheduled(), 3);
        });
        assert_eq!(spawned, 3);
    }
}
