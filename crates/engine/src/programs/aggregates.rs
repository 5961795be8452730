use tessera_core::{VertexId, Value};

use crate::aggregator::Aggregator;
use crate::globals::Globals;

type Projection<V> = Box<dyn Fn(&V) -> f64 + Send + Sync>;
type Predicate<V> = Box<dyn Fn(&V) -> bool + Send + Sync>;

/// Write `value` into `key`, registering the global on first use.
fn publish(globals: &Globals, key: &str, value: Value) -> anyhow::Result<()> {
    if globals.contains(key) {
        globals.set(key, value)?;
    } else {
        globals.add(key, value)?;
    }
    Ok(())
}

/// Sum of a numeric projection of every vertex, stored as a `Float` global.
pub struct VertexSum<V> {
    target: String,
    project: Projection<V>,
}

impl<V> VertexSum<V> {
    pub fn new(target: &str, project: impl Fn(&V) -> f64 + Send + Sync + 'static) -> Self {
        Self {
            target: target.to_string(),
            project: Box::new(project),
        }
    }
}

impl<V: Send + Sync, E> Aggregator<V, E> for VertexSum<V> {
    type Partial = f64;

    fn identity(&self) -> f64 {
        0.0
    }

    fn map_vertex(&self, _vertex: VertexId, data: &V) -> f64 {
        (self.project)(data)
    }

    fn combine(&self, a: f64, b: f64) -> f64 {
        a + b
    }

    fn finalize(&self, total: f64, globals: &Globals) -> anyhow::Result<()> {
        publish(globals, &self.target, Value::Float(total))
    }
}

/// Number of vertices matching a predicate, stored as an `Integer` global.
pub struct VertexCount<V> {
    target: String,
    predicate: Predicate<V>,
}

impl<V> VertexCount<V> {
    pub fn new(target: &str, predicate: impl Fn(&V) -> bool + Send + Sync + 'static) -> Self {
        Self {
            target: target.to_string(),
            predicate: Box::new(predicate),
        }
    }
}

impl<V: Send + Sync, E> Aggregator<V, E> for VertexCount<V> {
    type Partial = i64;

    fn identity(&self) -> i64 {
        0
    }

    fn map_vertex(&self, _vertex: VertexId, data: &V) -> i64 {
        i64::from((self.predicate)(data))
    }

    fn combine(&self, a: i64, b: i64) -> i64 {
        a + b
    }

    fn finalize(&self, total: i64, globals: &Globals) -> anyhow::Result<()> {
        publish(globals, &self.target, Value::Integer(total))
    }
}
