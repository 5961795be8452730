//! Helpers shared by the engine integration tests.
#![allow(dead_code)]

use std::sync::Arc;

use tessera_engine::scope::Scope;
use tessera_engine::{Consistency, Engine, EngineConfig, SharedProgram, VertexProgram};

/// A vertex program backed by a closure.
pub struct FnProgram<F> {
    name: &'static str,
    consistency: Option<Consistency>,
    f: F,
}

impl<V, E, F> VertexProgram<V, E> for FnProgram<F>
where
    F: Fn(&mut Scope<'_, V, E>) -> anyhow::Result<()> + Send + Sync,
{
    fn name(&self) -> &str {
        self.name
    }

    fn consistency(&self) -> Option<Consistency> {
        self.consistency
    }

    fn update(&self, scope: &mut Scope<'_, V, E>) -> anyhow::Result<()> {
        (self.f)(scope)
    }
}

/// Program using the engine's default consistency.
pub fn program<V, E, F>(name: &'static str, f: F) -> SharedProgram<V, E>
where
    V: 'static,
    E: 'static,
    F: Fn(&mut Scope<'_, V, E>) -> anyhow::Result<()> + Send + Sync + 'static,
{
    Arc::new(FnProgram {
        name,
        consistency: None,
        f,
    })
}

/// Program that declares its own consistency level.
pub fn program_at<V, E, F>(name: &'static str, consistency: Consistency, f: F) -> SharedProgram<V, E>
where
    V: 'static,
    E: 'static,
    F: Fn(&mut Scope<'_, V, E>) -> anyhow::Result<()> + Send + Sync + 'static,
{
    Arc::new(FnProgram {
        name,
        consistency: Some(consistency),
        f,
    })
}

pub fn engine<V, E>(workers: usize) -> Engine<V, E>
where
    V: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    Engine::new(EngineConfig {
        worker_threads: workers,
        ..EngineConfig::default()
    })
    .expect("engine")
}

/// Ring `0 -> 1 -> ... -> n-1 -> 0` with the given vertex and edge data.
pub fn ring<V, E>(workers: usize, n: i64, vertex: V, edge: E) -> Engine<V, E>
where
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    let mut e = engine(workers);
    for id in 0..n {
        e.add_vertex(id, vertex.clone()).unwrap();
    }
    for id in 0..n {
        e.add_edge(id, (id + 1) % n, edge.clone()).unwrap();
    }
    e
}

/// Star with hub 0 and leaves `1..=leaves`, edges pointing at the hub.
pub fn star<V, E>(workers: usize, leaves: i64, vertex: V, edge: E) -> Engine<V, E>
where
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    let mut e = engine(workers);
    for id in 0..=leaves {
        e.add_vertex(id, vertex.clone()).unwrap();
    }
    for id in 1..=leaves {
        e.add_edge(id, 0, edge.clone()).unwrap();
    }
    e
}
