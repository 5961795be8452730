use std::fmt;
use std::sync::Arc;

use tessera_core::Priority;
use tessera_graph::VertexIndex;

use crate::program::SharedProgram;

/// A pending request to run `program` on `vertex`.
pub struct Task<V, E> {
    pub vertex: VertexIndex,
    pub priority: Priority,
    pub program: SharedProgram<V, E>,
}

impl<V, E> Task<V, E> {
    pub fn new(vertex: VertexIndex, program: SharedProgram<V, E>, priority: Priority) -> Self {
        Self {
            vertex,
            priority,
            program,
        }
    }
}

impl<V, E> Clone for Task<V, E> {
    fn clone(&self) -> Self {
        Self {
            vertex: self.vertex,
            priority: self.priority,
            program: Arc::clone(&self.program),
        }
    }
}

impl<V, E> fmt::Debug for Task<V, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("vertex", &self.vertex)
            .field("priority", &self.priority)
            .field("program", &self.program.name())
            .finish()
    }
}
