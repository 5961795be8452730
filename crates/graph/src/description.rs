use std::collections::HashSet;
use std::time::Instant;

use tessera_core::{vertex_id, EngineError, Result, VertexId};
use tracing::info;

use crate::store::GraphStore;

/// A finished graph handed over by a caller in one piece.
///
/// Ids are raw integers as they arrive from outside; they are checked when the
/// description is loaded.
#[derive(Debug, Clone)]
pub struct GraphDescription<V, E> {
    pub vertices: Vec<(i64, V)>,
    pub edges: Vec<(i64, i64, E)>,
}

impl<V, E> Default for GraphDescription<V, E> {
    fn default() -> Self {
        Self {
            vertices: Vec::new(),
            edges: Vec::new(),
        }
    }
}

impl<V, E> GraphDescription<V, E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn vertex(mut self, id: i64, data: V) -> Self {
        self.vertices.push((id, data));
        self
    }

    pub fn edge(mut self, source: i64, target: i64, data: E) -> Self {
        self.edges.push((source, target, data));
        self
    }
}

impl<V, E> GraphStore<V, E> {
    /// Load a whole description. Everything is validated before the first
    /// insertion, so a rejected description leaves the store as it was.
    pub fn load(&mut self, description: GraphDescription<V, E>) -> Result<()> {
        if self.is_frozen() {
            return Err(EngineError::state("set_graph", "frozen"));
        }
        if description.vertices.is_empty() {
            return Err(EngineError::EmptyGraph);
        }

        let start = Instant::now();
        let mut seen: HashSet<VertexId> = HashSet::with_capacity(description.vertices.len());
        for (raw, _) in &description.vertices {
            let id = vertex_id(*raw)?;
            if self.contains_vertex(id) || !seen.insert(id) {
                return Err(EngineError::DuplicateVertex(id));
            }
        }

        let mut edges: HashSet<(VertexId, VertexId)> =
            HashSet::with_capacity(description.edges.len());
        for (raw_source, raw_target, _) in &description.edges {
            let source = vertex_id(*raw_source)?;
            let target = vertex_id(*raw_target)?;
            for id in [source, target] {
                if !self.contains_vertex(id) && !seen.contains(&id) {
                    return Err(EngineError::UnknownVertex(id));
                }
            }
            if self.find_edge(source, target).is_some() || !edges.insert((source, target)) {
                return Err(EngineError::DuplicateEdge(source, target));
            }
        }

        let vertex_count = description.vertices.len();
        let edge_count = description.edges.len();
        self.resize(self.vertex_count() + vertex_count)?;
        for (raw, data) in description.vertices {
            self.add_vertex(vertex_id(raw)?, data)?;
        }
        for (raw_source, raw_target, data) in description.edges {
            self.add_edge(vertex_id(raw_source)?, vertex_id(raw_target)?, data)?;
        }

        info!(
            vertices = vertex_count,
            edges = edge_count,
            "Graph transfer took {} ms",
            start.elapsed().as_millis()
        );
        Ok(())
    }
}
