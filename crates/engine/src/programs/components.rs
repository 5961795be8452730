use tessera_core::Consistency;

use crate::program::VertexProgram;
use crate::scope::Scope;

/// Weakly connected components by minimum-label propagation.
///
/// Vertex data is the current label; start every vertex with its own id. A
/// vertex adopts the smallest label in its neighbourhood and wakes its
/// neighbours whenever its label drops. At quiescence every vertex holds the
/// smallest id of its component.
#[derive(Debug, Clone, Copy, Default)]
pub struct MinLabelComponents;

impl<E: Send + Sync> VertexProgram<u32, E> for MinLabelComponents {
    fn name(&self) -> &str {
        "components"
    }

    fn consistency(&self) -> Option<Consistency> {
        Some(Consistency::Edge)
    }

    fn update(&self, scope: &mut Scope<'_, u32, E>) -> anyhow::Result<()> {
        let current = scope.with_data(|l| *l);
        let mut smallest = current;
        for n in scope.neighbors() {
            smallest = smallest.min(scope.with_neighbor(n, |l| *l)?);
        }
        if smallest < current {
            scope.set_data(smallest);
            // Smaller labels first under the priority scheduler.
            scope.schedule_neighbors(-f64::from(smallest));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::engine::Engine;
    use tessera_core::EngineConfig;

    #[test]
    fn labels_follow_components() {
        let mut engine: Engine<u32, ()> = Engine::new(EngineConfig {
            worker_threads: 4,
            ..EngineConfig::default()
        })
        .unwrap();
        // {0,1,2,3} as a directed chain, {10,11} and the singleton {7}.
        for id in [3, 2, 1, 0, 10, 11, 7] {
            engine.add_vertex(id, id as u32).unwrap();
        }
        for (s, t) in [(3, 2), (1, 2), (1, 0), (11, 10)] {
            engine.add_edge(s, t, ()).unwrap();
        }
        engine
            .schedule_all(Arc::new(MinLabelComponents), 0.0)
            .unwrap();
        engine.start().unwrap();

        let graph = engine.graph().unwrap();
        for id in [0, 1, 2, 3] {
            assert_eq!(graph.vertex_data(id).unwrap(), 0, "vertex {id}");
        }
        assert_eq!(graph.vertex_data(11).unwrap(), 10);
        assert_eq!(graph.vertex_data(7).unwrap(), 7);
        assert!(engine.last_failures().unwrap().is_empty());
    }
}
