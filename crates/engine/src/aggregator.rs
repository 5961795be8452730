//! Map-reduce passes over the whole graph that write into [`Globals`].
//!
//! An aggregator with interval `n > 0` runs whenever the run's update counter
//! reaches a multiple of `n`; interval 0 means manual triggering only.
//! Aggregators due on the same update run in registration order.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use indexmap::IndexMap;
use parking_lot::Mutex;
use rayon::prelude::*;
use tessera_core::{EngineError, Result, VertexId};
use tessera_graph::GraphStore;
use tracing::{debug, info, warn};

use crate::globals::Globals;
use crate::program::panic_message;

/// A user-supplied aggregation.
///
/// `combine` must be associative and commutative with `identity` as its
/// neutral element: partials are folded on many threads in no fixed order.
pub trait Aggregator<V, E>: Send + Sync {
    type Partial: Send;

    fn identity(&self) -> Self::Partial;

    fn map_vertex(&self, vertex: VertexId, data: &V) -> Self::Partial;

    /// Contribution of one edge. Edges are skipped by default.
    fn map_edge(&self, _source: VertexId, _target: VertexId, _data: &E) -> Option<Self::Partial> {
        None
    }

    fn combine(&self, a: Self::Partial, b: Self::Partial) -> Self::Partial;

    /// Write the combined result into the global table.
    fn finalize(&self, total: Self::Partial, globals: &Globals) -> anyhow::Result<()>;
}

/// Everything a pass needs to read.
pub(crate) struct SyncContext<'a, V, E> {
    pub graph: &'a GraphStore<V, E>,
    pub globals: &'a Globals,
    pub pool: &'a rayon::ThreadPool,
}

/// Object-safe view of an [`Aggregator`] with its partial type erased.
trait ErasedAggregator<V, E>: Send + Sync {
    fn run(&self, ctx: &SyncContext<'_, V, E>) -> anyhow::Result<()>;
}

impl<A, V, E> ErasedAggregator<V, E> for A
where
    A: Aggregator<V, E>,
    V: Send + Sync,
    E: Send + Sync,
{
    fn run(&self, ctx: &SyncContext<'_, V, E>) -> anyhow::Result<()> {
        let graph = ctx.graph;
        let total = ctx.pool.install(|| {
            let vertices = (0..graph.vertex_count())
                .into_par_iter()
                .map(|idx| self.map_vertex(graph.id_at(idx), &graph.vertex_cell(idx).read()))
                .reduce(|| self.identity(), |a, b| self.combine(a, b));
            let edges = (0..graph.edge_count())
                .into_par_iter()
                .filter_map(|edge| {
                    let (s, t) = graph.endpoints(edge);
                    self.map_edge(graph.id_at(s), graph.id_at(t), &graph.edge_cell(edge).read())
                })
                .reduce(|| self.identity(), |a, b| self.combine(a, b));
            self.combine(vertices, edges)
        });
        self.finalize(total, ctx.globals)
    }
}

struct Registration<V, E> {
    aggregator: Arc<dyn ErasedAggregator<V, E>>,
    interval: u64,
    runs: AtomicU64,
    /// Serializes passes of the same aggregator.
    running: Mutex<()>,
}

impl<V, E> Registration<V, E> {
    fn execute(&self, key: &str, ctx: &SyncContext<'_, V, E>) -> std::result::Result<(), String> {
        let _running = self.running.lock();
        let start = Instant::now();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.aggregator.run(ctx)));
        self.runs.fetch_add(1, Ordering::Relaxed);
        match outcome {
            Ok(Ok(())) => {
                debug!(key, elapsed_ms = start.elapsed().as_millis() as u64, "Aggregator finished");
                Ok(())
            }
            Ok(Err(e)) => Err(format!("{e:#}")),
            Err(payload) => Err(panic_message(payload)),
        }
    }
}

/// Aggregators keyed by name, kept in registration order.
pub struct AggregatorRegistry<V, E> {
    entries: IndexMap<String, Registration<V, E>>,
}

impl<V, E> Default for AggregatorRegistry<V, E> {
    fn default() -> Self {
        Self {
            entries: IndexMap::new(),
        }
    }
}

impl<V, E> AggregatorRegistry<V, E>
where
    V: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace the aggregator under `key`. A replaced key keeps
    /// its position in the run order.
    pub fn register<A>(&mut self, key: &str, aggregator: A, interval: u64) -> Result<()>
    where
        A: Aggregator<V, E> + 'static,
    {
        if key.is_empty() {
            return Err(EngineError::InvalidArgument(
                "aggregator key must have length of at least 1".into(),
            ));
        }
        let registration = Registration {
            aggregator: Arc::new(aggregator),
            interval,
            runs: AtomicU64::new(0),
            running: Mutex::new(()),
        };
        if self.entries.insert(key.to_string(), registration).is_some() {
            info!(key, interval, "Replaced aggregator");
        } else {
            info!(key, interval, "Registered aggregator");
        }
        Ok(())
    }
}

impl<V, E> AggregatorRegistry<V, E> {
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keys in run order.
    pub fn keys(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).collect()
    }

    pub fn interval(&self, key: &str) -> Option<u64> {
        self.entries.get(key).map(|r| r.interval)
    }

    /// Completed passes of `key`, manual and automatic.
    pub fn runs(&self, key: &str) -> Option<u64> {
        self.entries.get(key).map(|r| r.runs.load(Ordering::Relaxed))
    }

    /// Keys whose interval divides `count`, in run order.
    pub fn due(&self, count: u64) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|(_, r)| r.interval > 0 && count > 0 && count % r.interval == 0)
            .map(|(k, _)| k.as_str())
            .collect()
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }

    /// Run `key` now, regardless of its interval.
    pub(crate) fn trigger(&self, key: &str, ctx: &SyncContext<'_, V, E>) -> Result<()> {
        let registration = self
            .entries
            .get(key)
            .ok_or_else(|| EngineError::UnknownAggregator(key.to_string()))?;
        registration
            .execute(key, ctx)
            .map_err(|message| EngineError::Execution(format!("aggregator {key}: {message}")))
    }

    /// Run whatever is due at update `count`. Every count is handed to exactly
    /// one worker, so each boundary is seen once and always fires.
    /// Returns the keys that ran, with their outcome.
    pub(crate) fn on_update(
        &self,
        count: u64,
        ctx: &SyncContext<'_, V, E>,
    ) -> Vec<(String, std::result::Result<(), String>)> {
        let mut ran = Vec::new();
        for (key, registration) in &self.entries {
            if registration.interval == 0 || count == 0 || count % registration.interval != 0 {
                continue;
            }
            debug!(key = key.as_str(), count, "Aggregator due");
            let outcome = registration.execute(key, ctx);
            if let Err(message) = &outcome {
                warn!(key = key.as_str(), count, error = %message, "Aggregator failed");
            }
            ran.push((key.clone(), outcome));
        }
        ran
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Sum;

    impl Aggregator<i64, i64> for Sum {
        type Partial = i64;

        fn identity(&self) -> i64 {
            0
        }

        fn map_vertex(&self, _vertex: VertexId, data: &i64) -> i64 {
            *data
        }

        fn map_edge(&self, _s: VertexId, _t: VertexId, data: &i64) -> Option<i64> {
            Some(*data)
        }

        fn combine(&self, a: i64, b: i64) -> i64 {
            a + b
        }

        fn finalize(&self, total: i64, globals: &Globals) -> anyhow::Result<()> {
            globals.set("sum", total)?;
            Ok(())
        }
    }

    struct Broken;

    impl Aggregator<i64, i64> for Broken {
        type Partial = ();

        fn identity(&self) {}

        fn map_vertex(&self, _vertex: VertexId, _data: &i64) {}

        fn combine(&self, _a: (), _b: ()) {}

        fn finalize(&self, _total: (), _globals: &Globals) -> anyhow::Result<()> {
            anyhow::bail!("cannot finalize")
        }
    }

    fn fixture() -> (GraphStore<i64, i64>, Globals, rayon::ThreadPool) {
        let mut g = GraphStore::new();
        for id in 0..10 {
            g.add_vertex(id, id as i64).unwrap();
        }
        g.add_edge(0, 1, 100).unwrap();
        let globals = Globals::new();
        globals.add("sum", 0_i64).unwrap();
        let pool = rayon::ThreadPoolBuilder::new().num_threads(2).build().unwrap();
        (g, globals, pool)
    }

    #[test]
    fn manual_trigger_folds_vertices_and_edges() {
        let (g, globals, pool) = fixture();
        let ctx = SyncContext { graph: &g, globals: &globals, pool: &pool };
        let mut registry = AggregatorRegistry::new();
        registry.register("sum", Sum, 0).unwrap();

        registry.trigger("sum", &ctx).unwrap();
        assert_eq!(globals.get::<i64>("sum").unwrap(), 45 + 100);
        assert_eq!(registry.runs("sum"), Some(1));
        assert_eq!(
            registry.trigger("nope", &ctx),
            Err(EngineError::UnknownAggregator("nope".into()))
        );
    }

    #[test]
    fn interval_fires_on_multiples_only() {
        let (g, globals, pool) = fixture();
        let ctx = SyncContext { graph: &g, globals: &globals, pool: &pool };
        let mut registry = AggregatorRegistry::new();
        registry.register("sum", Sum, 5).unwrap();
        registry.register("manual", Sum, 0).unwrap();

        assert!(registry.on_update(4, &ctx).is_empty());
        assert_eq!(registry.on_update(5, &ctx).len(), 1);
        assert_eq!(registry.on_update(10, &ctx).len(), 1);
        assert_eq!(registry.runs("sum"), Some(2));
        assert_eq!(registry.runs("manual"), Some(0));
    }

    #[test]
    fn boundaries_observed_out_of_order_all_fire() {
        let (g, globals, pool) = fixture();
        let ctx = SyncContext { graph: &g, globals: &globals, pool: &pool };
        let mut registry = AggregatorRegistry::new();
        registry.register("every", Sum, 1).unwrap();

        for count in [3, 1, 4, 2] {
            assert_eq!(registry.on_update(count, &ctx).len(), 1, "count {count}");
        }
        assert_eq!(registry.runs("every"), Some(4));
    }

    #[test]
    fn failures_are_reported_not_raised() {
        let (g, globals, pool) = fixture();
        let ctx = SyncContext { graph: &g, globals: &globals, pool: &pool };
        let mut registry = AggregatorRegistry::new();
        registry.register("broken", Broken, 1).unwrap();

        let ran = registry.on_update(1, &ctx);
        assert_eq!(ran.len(), 1);
        assert_eq!(ran[0].1, Err("cannot finalize".to_string()));
        assert!(matches!(
            registry.trigger("broken", &ctx),
            Err(EngineError::Execution(_))
        ));
    }

    #[test]
    fn registration_order_and_replacement() {
        let mut registry: AggregatorRegistry<i64, i64> = AggregatorRegistry::new();
        registry.register("b", Sum, 2).unwrap();
        registry.register("a", Sum, 4).unwrap();
        registry.register("b", Sum, 4).unwrap();
        assert_eq!(registry.keys(), vec!["b", "a"]);
        assert_eq!(registry.interval("b"), Some(4));
        assert_eq!(registry.due(8), vec!["b", "a"]);
        assert!(registry.due(0).is_empty());
        assert!(matches!(
            registry.register("", Sum, 1),
            Err(EngineError::InvalidArgument(_))
        ));
    }
}
