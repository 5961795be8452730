use std::collections::HashMap;

use parking_lot::RwLock;
use serde::Serialize;
use tessera_core::{EdgeId, EngineError, Result, VertexId};
use tracing::debug;

/// Dense position of a vertex inside the store, assigned in insertion order.
///
/// Scope locks are taken in ascending index order.
pub type VertexIndex = usize;

struct Edge<E> {
    source: VertexIndex,
    target: VertexIndex,
    data: RwLock<E>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphStats {
    pub vertex_count: usize,
    pub edge_count: usize,
    pub max_degree: usize,
    pub isolated_vertices: usize,
    pub frozen: bool,
}

/// Vertices, directed edges and their user data.
///
/// Every data cell sits behind its own lock. The engine's scope manager decides
/// who may take those locks while a run is in progress; the store itself only
/// guarantees memory safety.
pub struct GraphStore<V, E> {
    ids: Vec<VertexId>,
    index: HashMap<VertexId, VertexIndex>,
    vertex_data: Vec<RwLock<V>>,
    edges: Vec<Edge<E>>,
    edge_index: HashMap<(VertexIndex, VertexIndex), EdgeId>,
    outgoing: Vec<Vec<EdgeId>>,
    incoming: Vec<Vec<EdgeId>>,
    /// Sorted, deduplicated, self excluded.
    adjacent: Vec<Vec<VertexIndex>>,
    frozen: bool,
}

impl<V, E> Default for GraphStore<V, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V, E> GraphStore<V, E> {
    pub fn new() -> Self {
        Self {
            ids: Vec::new(),
            index: HashMap::new(),
            vertex_data: Vec::new(),
            edges: Vec::new(),
            edge_index: HashMap::new(),
            outgoing: Vec::new(),
            incoming: Vec::new(),
            adjacent: Vec::new(),
            frozen: false,
        }
    }

    fn ensure_mutable(&self, operation: &'static str) -> Result<()> {
        if self.frozen {
            return Err(EngineError::state(operation, "frozen"));
        }
        Ok(())
    }

    /// Pre-allocate room for at least `n` vertices. Shrinking is rejected.
    pub fn resize(&mut self, n: usize) -> Result<()> {
        self.ensure_mutable("resize")?;
        let current = self.ids.len();
        if n < current {
            return Err(EngineError::InvalidResize { requested: n, current });
        }
        let extra = n - current;
        self.ids.reserve(extra);
        self.index.reserve(extra);
        self.vertex_data.reserve(extra);
        self.outgoing.reserve(extra);
        self.incoming.reserve(extra);
        self.adjacent.reserve(extra);
        Ok(())
    }

    pub fn add_vertex(&mut self, id: VertexId, data: V) -> Result<VertexIndex> {
        self.ensure_mutable("add_vertex")?;
        if self.index.contains_key(&id) {
            return Err(EngineError::DuplicateVertex(id));
        }
        let idx = self.ids.len();
        self.ids.push(id);
        self.index.insert(id, idx);
        self.vertex_data.push(RwLock::new(data));
        self.outgoing.push(Vec::new());
        self.incoming.push(Vec::new());
        self.adjacent.push(Vec::new());
        Ok(idx)
    }

    pub fn add_edge(&mut self, source: VertexId, target: VertexId, data: E) -> Result<EdgeId> {
        self.ensure_mutable("add_edge")?;
        let s = self.require(source)?;
        let t = self.require(target)?;
        if self.edge_index.contains_key(&(s, t)) {
            return Err(EngineError::DuplicateEdge(source, target));
        }

        let id = self.edges.len();
        self.edges.push(Edge {
            source: s,
            target: t,
            data: RwLock::new(data),
        });
        self.edge_index.insert((s, t), id);
        self.outgoing[s].push(id);
        self.incoming[t].push(id);
        if s != t {
            insert_sorted(&mut self.adjacent[s], t);
            insert_sorted(&mut self.adjacent[t], s);
        }
        Ok(id)
    }

    /// Reject structural changes from now on.
    pub fn freeze(&mut self) {
        if !self.frozen {
            debug!(
                vertices = self.ids.len(),
                edges = self.edges.len(),
                "Graph frozen"
            );
        }
        self.frozen = true;
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn vertex_count(&self) -> usize {
        self.ids.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn contains_vertex(&self, id: VertexId) -> bool {
        self.index.contains_key(&id)
    }

    /// Vertex ids in insertion order.
    pub fn vertex_ids(&self) -> &[VertexId] {
        &self.ids
    }

    pub fn index_of(&self, id: VertexId) -> Option<VertexIndex> {
        self.index.get(&id).copied()
    }

    /// Like [`index_of`](Self::index_of) but fails with `UnknownVertex`.
    pub fn require(&self, id: VertexId) -> Result<VertexIndex> {
        self.index_of(id).ok_or(EngineError::UnknownVertex(id))
    }

    pub fn id_at(&self, idx: VertexIndex) -> VertexId {
        self.ids[idx]
    }

    pub fn find_edge(&self, source: VertexId, target: VertexId) -> Option<EdgeId> {
        let s = self.index_of(source)?;
        let t = self.index_of(target)?;
        self.edge_index.get(&(s, t)).copied()
    }

    /// Edge lookup by dense endpoint indices.
    pub fn edge_between(&self, source: VertexIndex, target: VertexIndex) -> Option<EdgeId> {
        self.edge_index.get(&(source, target)).copied()
    }

    /// `(source, target)` as dense indices.
    pub fn endpoints(&self, edge: EdgeId) -> (VertexIndex, VertexIndex) {
        let e = &self.edges[edge];
        (e.source, e.target)
    }

    pub fn out_edge_ids(&self, idx: VertexIndex) -> &[EdgeId] {
        &self.outgoing[idx]
    }

    pub fn in_edge_ids(&self, idx: VertexIndex) -> &[EdgeId] {
        &self.incoming[idx]
    }

    /// Adjacent vertex indices (either direction), sorted, without `idx` itself.
    pub fn adjacent(&self, idx: VertexIndex) -> &[VertexIndex] {
        &self.adjacent[idx]
    }

    pub fn vertex_cell(&self, idx: VertexIndex) -> &RwLock<V> {
        &self.vertex_data[idx]
    }

    pub fn edge_cell(&self, edge: EdgeId) -> &RwLock<E> {
        &self.edges[edge].data
    }

    pub fn out_neighbors(&self, id: VertexId) -> Result<Vec<VertexId>> {
        let idx = self.require(id)?;
        Ok(self.outgoing[idx]
            .iter()
            .map(|&e| self.ids[self.edges[e].target])
            .collect())
    }

    pub fn in_neighbors(&self, id: VertexId) -> Result<Vec<VertexId>> {
        let idx = self.require(id)?;
        Ok(self.incoming[idx]
            .iter()
            .map(|&e| self.ids[self.edges[e].source])
            .collect())
    }

    /// Neighbours in either direction, deduplicated, self excluded.
    pub fn neighbors(&self, id: VertexId) -> Result<Vec<VertexId>> {
        let idx = self.require(id)?;
        Ok(self.adjacent[idx].iter().map(|&n| self.ids[n]).collect())
    }

    pub fn stats(&self) -> GraphStats {
        let degree = |idx: usize| self.outgoing[idx].len() + self.incoming[idx].len();
        GraphStats {
            vertex_count: self.ids.len(),
            edge_count: self.edges.len(),
            max_degree: (0..self.ids.len()).map(degree).max().unwrap_or(0),
            isolated_vertices: (0..self.ids.len()).filter(|&i| degree(i) == 0).count(),
            frozen: self.frozen,
        }
    }
}

impl<V: Clone, E> GraphStore<V, E> {
    /// Snapshot of a vertex's data.
    pub fn vertex_data(&self, id: VertexId) -> Result<V> {
        let idx = self.require(id)?;
        Ok(self.vertex_data[idx].read().clone())
    }
}

impl<V, E: Clone> GraphStore<V, E> {
    /// Snapshot of an edge's data.
    pub fn edge_data(&self, source: VertexId, target: VertexId) -> Result<E> {
        let edge = self
            .find_edge(source, target)
            .ok_or(EngineError::UnknownEdge(source, target))?;
        Ok(self.edges[edge].data.read().clone())
    }
}

fn insert_sorted(list: &mut Vec<VertexIndex>, value: VertexIndex) {
    if let Err(pos) = list.binary_search(&value) {
        list.insert(pos, value);
    }
}
