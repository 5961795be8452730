use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tessera_core::{
    vertex_id, Consistency, EngineConfig, EngineError, FromValue, Priority, Result,
    SchedulerPolicy, Value,
};
use tessera_graph::{GraphDescription, GraphStore};
use tracing::{debug, info};

use crate::aggregator::{Aggregator, AggregatorRegistry, SyncContext};
use crate::globals::Globals;
use crate::metrics::EngineMetrics;
use crate::program::{SharedProgram, TaskFailure};
use crate::scheduler::{task_for, Scheduler};
use crate::scope::LockTable;

use super::EngineState;

/// A single graph-parallel engine instance.
///
/// Owns exactly one graph, one global table, one scheduler, one lock table and
/// any number of aggregators. Populate it, schedule work, then call
/// [`start`](Engine::start).
pub struct Engine<V, E> {
    pub(super) config: EngineConfig,
    pub(super) state: EngineState,
    pub(super) graph: GraphStore<V, E>,
    /// Scope locks, rebuilt from the frozen graph at the start of every run.
    pub(super) locks: LockTable,
    pub(super) globals: Globals,
    pub(super) scheduler: Scheduler<V, E>,
    pub(super) aggregators: AggregatorRegistry<V, E>,
    /// Thread pool used for aggregation passes.
    pub(super) sync_pool: Option<rayon::ThreadPool>,
    /// Updates executed by the current or most recent run.
    pub(super) update_count: AtomicU64,
    pub(super) failures: Vec<TaskFailure>,
    pub(super) metrics: EngineMetrics,
}

fn build_sync_pool(threads: usize) -> Result<rayon::ThreadPool> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .thread_name(|i| format!("tessera-sync-{i}"))
        .build()
        .map_err(|e| EngineError::Construction(format!("aggregation pool: {e}")))
}

impl<V, E> Engine<V, E>
where
    V: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    /// Create an engine with the given config.
    pub fn new(config: EngineConfig) -> Result<Self> {
        let sync_pool = build_sync_pool(config.resolved_sync_threads())?;
        let workers = config.resolved_worker_threads();
        config.log_summary();
        Ok(Self {
            scheduler: Scheduler::new(config.scheduler, workers),
            config,
            state: EngineState::Created,
            graph: GraphStore::new(),
            locks: LockTable::new(0),
            globals: Globals::new(),
            aggregators: AggregatorRegistry::new(),
            sync_pool: Some(sync_pool),
            update_count: AtomicU64::new(0),
            failures: Vec::new(),
            metrics: EngineMetrics::default(),
        })
    }

    /// Create an engine from a GraphLab-style option string such as
    /// `--ncpus=4 --scheduler=priority --scope=edge`.
    pub fn with_options(options: &str) -> Result<Self> {
        Self::new(EngineConfig::from_args(options)?)
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ── Configuration ──────────────────────────────────────────────

    /// Number of workers for the next run. Must be positive.
    pub fn set_worker_threads(&mut self, n: usize) -> Result<()> {
        self.state.require("set_worker_threads", EngineState::SETUP)?;
        if n == 0 {
            return Err(EngineError::InvalidArgument(
                "number of cpus must be greater than 0".into(),
            ));
        }
        if self.config.sync_threads == 0 {
            self.sync_pool = Some(build_sync_pool(n)?);
        }
        self.config.worker_threads = n;
        self.mark_configured();
        Ok(())
    }

    pub fn set_scheduler_policy(&mut self, policy: SchedulerPolicy) -> Result<()> {
        self.state.require("set_scheduler_policy", EngineState::SETUP)?;
        self.config.scheduler = policy;
        self.mark_configured();
        Ok(())
    }

    /// Consistency level for programs that do not declare their own.
    pub fn set_default_consistency(&mut self, consistency: Consistency) -> Result<()> {
        self.state.require("set_default_consistency", EngineState::SETUP)?;
        self.config.consistency = consistency;
        self.mark_configured();
        Ok(())
    }

    // ── Graph construction ─────────────────────────────────────────

    /// Pre-allocate room for at least `n` vertices. Shrinking fails with
    /// `InvalidResize`.
    pub fn resize(&mut self, n: usize) -> Result<()> {
        self.state.require("resize", EngineState::SETUP)?;
        self.graph.resize(n)?;
        self.mark_configured();
        Ok(())
    }

    /// Add a vertex. Ids must be non-negative and unique.
    pub fn add_vertex(&mut self, id: i64, data: V) -> Result<()> {
        self.state.require("add_vertex", EngineState::SETUP)?;
        self.graph.add_vertex(vertex_id(id)?, data)?;
        self.mark_configured();
        Ok(())
    }

    /// Add a directed edge between two existing vertices.
    pub fn add_edge(&mut self, source: i64, target: i64, data: E) -> Result<()> {
        self.state.require("add_edge", EngineState::SETUP)?;
        self.graph
            .add_edge(vertex_id(source)?, vertex_id(target)?, data)?;
        self.mark_configured();
        Ok(())
    }

    /// Load a whole graph description at once. Rejects empty descriptions.
    pub fn set_graph(&mut self, description: GraphDescription<V, E>) -> Result<()> {
        self.state.require("set_graph", EngineState::SETUP)?;
        self.graph.load(description)?;
        self.mark_configured();
        Ok(())
    }

    /// Read-only view of the graph, e.g. to inspect results after a run.
    pub fn graph(&self) -> Result<&GraphStore<V, E>> {
        self.state.require_live("graph")?;
        Ok(&self.graph)
    }

    // ── Globals ────────────────────────────────────────────────────

    pub fn add_global_const(&mut self, key: &str, value: impl Into<Value>) -> Result<()> {
        self.state.require("add_global_const", EngineState::IDLE)?;
        self.globals.add_const(key, value)?;
        self.mark_configured();
        Ok(())
    }

    pub fn add_global(&mut self, key: &str, value: impl Into<Value>) -> Result<()> {
        self.state.require("add_global", EngineState::IDLE)?;
        self.globals.add(key, value)?;
        self.mark_configured();
        Ok(())
    }

    /// Typed read. Fails with `TypeMismatch` when the stored kind differs.
    pub fn get_global<T: FromValue>(&self, key: &str) -> Result<T> {
        self.state.require_live("get_global")?;
        self.globals.get(key)
    }

    pub fn get_global_value(&self, key: &str) -> Result<Value> {
        self.state.require_live("get_global")?;
        self.globals.get_value(key)
    }

    pub fn set_global(&self, key: &str, value: impl Into<Value>) -> Result<()> {
        self.state.require_live("set_global")?;
        self.globals.set(key, value)
    }

    pub fn globals(&self) -> Result<&Globals> {
        self.state.require_live("globals")?;
        Ok(&self.globals)
    }

    // ── Scheduling ─────────────────────────────────────────────────

    /// Queue `program` on vertex `id`. Coalesces with a task already pending
    /// there.
    pub fn schedule(
        &mut self,
        id: i64,
        program: SharedProgram<V, E>,
        priority: impl Into<Priority>,
    ) -> Result<()> {
        self.state.require("schedule", EngineState::IDLE)?;
        let vertex = self.graph.require(vertex_id(id)?)?;
        self.scheduler.push(task_for(vertex, &program, priority.into()));
        self.mark_configured();
        Ok(())
    }

    /// Queue `program` once on every vertex, in insertion order.
    pub fn schedule_all(
        &mut self,
        program: SharedProgram<V, E>,
        priority: impl Into<Priority>,
    ) -> Result<()> {
        self.state.require("schedule_all", EngineState::IDLE)?;
        if self.graph.vertex_count() == 0 {
            return Err(EngineError::state("schedule_all", "without a graph"));
        }
        let priority = priority.into();
        for vertex in 0..self.graph.vertex_count() {
            self.scheduler.push(task_for(vertex, &program, priority));
        }
        debug!(
            program = program.name(),
            vertices = self.graph.vertex_count(),
            "Scheduled all vertices"
        );
        self.mark_configured();
        Ok(())
    }

    /// Tasks waiting for the next run.
    pub fn pending_tasks(&self) -> Result<usize> {
        self.state.require_live("pending_tasks")?;
        Ok(self.scheduler.len())
    }

    /// Priority of the task pending on `id`, if any.
    pub fn pending_priority(&self, id: i64) -> Result<Option<Priority>> {
        self.state.require_live("pending_priority")?;
        let vertex = self.graph.require(vertex_id(id)?)?;
        Ok(self.scheduler.pending_priority(vertex))
    }

    // ── Aggregators ────────────────────────────────────────────────

    /// Register (or replace) an aggregator. `interval` counts engine-wide
    /// updates; 0 means manual only.
    pub fn add_aggregator<A>(&mut self, key: &str, aggregator: A, interval: u64) -> Result<()>
    where
        A: Aggregator<V, E> + 'static,
    {
        self.state.require("add_aggregator", EngineState::IDLE)?;
        self.aggregators.register(key, aggregator, interval)?;
        self.mark_configured();
        Ok(())
    }

    /// Run the aggregator under `key` now, regardless of its interval.
    pub fn aggregate_now(&mut self, key: &str) -> Result<()> {
        self.state.require_live("aggregate_now")?;
        let pool = self
            .sync_pool
            .as_ref()
            .ok_or_else(|| EngineError::state("aggregate_now", self.state))?;
        let ctx = SyncContext {
            graph: &self.graph,
            globals: &self.globals,
            pool,
        };
        self.aggregators.trigger(key, &ctx)?;
        self.metrics.record_aggregation(key);
        Ok(())
    }

    pub fn aggregators(&self) -> Result<&AggregatorRegistry<V, E>> {
        self.state.require_live("aggregators")?;
        Ok(&self.aggregators)
    }

    // ── Run results ────────────────────────────────────────────────

    /// Updates executed by the most recent (or current) run.
    pub fn last_update_count(&self) -> Result<u64> {
        self.state.require_live("last_update_count")?;
        Ok(self.update_count.load(Ordering::SeqCst))
    }

    /// Program and aggregator failures recorded by the most recent run.
    pub fn last_failures(&self) -> Result<&[TaskFailure]> {
        self.state.require_live("last_failures")?;
        Ok(&self.failures)
    }

    pub fn metrics(&self) -> Result<EngineMetrics> {
        self.state.require_live("metrics")?;
        Ok(self.metrics.clone())
    }

    /// Convenience for wrapping a program for [`schedule`](Self::schedule).
    pub fn program<P>(program: P) -> SharedProgram<V, E>
    where
        P: crate::program::VertexProgram<V, E> + 'static,
    {
        Arc::new(program)
    }
}

impl<V, E> Drop for Engine<V, E> {
    fn drop(&mut self) {
        if self.state != EngineState::Destroyed {
            info!(state = %self.state, "Engine dropped without destroy");
        }
    }
}
