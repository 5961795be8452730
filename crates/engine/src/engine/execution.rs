use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;
use parking_lot::Mutex;
use tessera_core::{Consistency, EngineError, Result};
use tessera_graph::GraphStore;
use tracing::{debug, error, info, warn};

use crate::aggregator::{AggregatorRegistry, SyncContext};
use crate::globals::Globals;
use crate::metrics::EngineMetrics;
use crate::program::{panic_message, FailureSource, TaskFailure};
use crate::scheduler::{Scheduler, Task};
use crate::scope::{LockTable, Scope};

use super::{Engine, EngineState};

/// Shared, read-only view of the engine handed to every worker of a run.
struct RunContext<'a, V, E> {
    graph: &'a GraphStore<V, E>,
    locks: &'a LockTable,
    globals: &'a Globals,
    scheduler: &'a Scheduler<V, E>,
    aggregators: &'a AggregatorRegistry<V, E>,
    pool: &'a rayon::ThreadPool,
    update_count: &'a AtomicU64,
    default_consistency: Consistency,
    abort_on_error: bool,
    failures: Mutex<Vec<TaskFailure>>,
}

impl<V, E> RunContext<'_, V, E>
where
    V: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    fn record_failure(&self, source: FailureSource, message: String, at_update: u64) {
        self.failures.lock().push(TaskFailure {
            source,
            message,
            at_update,
        });
        if self.abort_on_error {
            warn!(at_update, "Aborting run after failure");
            self.scheduler.abort();
        }
    }

    /// Pull tasks until the scheduler reports the run is over.
    fn worker_loop(&self, worker: usize) -> EngineMetrics {
        let mut local = EngineMetrics::default();
        let sync = SyncContext {
            graph: self.graph,
            globals: self.globals,
            pool: self.pool,
        };
        debug!(worker, "Worker started");

        while let Some(task) = self.scheduler.next(worker) {
            let Task {
                vertex, program, ..
            } = task;
            let consistency = program.consistency().unwrap_or(self.default_consistency);
            let mut scope = Scope::acquire(
                self.graph,
                self.locks,
                self.globals,
                vertex,
                consistency,
                Arc::clone(&program),
            );

            let started = Instant::now();
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| program.update(&mut scope)));
            let elapsed = started.elapsed();
            // Locks are released whatever the outcome.
            let spawned = scope.release();

            let failure = match outcome {
                Ok(Ok(())) => {
                    for task in spawned {
                        self.scheduler.push(task);
                    }
                    None
                }
                Ok(Err(e)) => Some(format!("{e:#}")),
                Err(payload) => Some(panic_message(payload)),
            };

            let count = self.update_count.fetch_add(1, Ordering::SeqCst) + 1;
            self.scheduler.complete();
            local.record_update(program.name(), elapsed);

            if let Some(message) = failure {
                let id = self.graph.id_at(vertex);
                warn!(
                    worker,
                    vertex = id,
                    program = program.name(),
                    error = %message,
                    "Update failed"
                );
                local.failures += 1;
                self.record_failure(
                    FailureSource::Update {
                        vertex: id,
                        program: program.name().to_string(),
                    },
                    message,
                    count,
                );
            }

            for (key, outcome) in self.aggregators.on_update(count, &sync) {
                local.record_aggregation(&key);
                if let Err(message) = outcome {
                    local.failures += 1;
                    self.record_failure(FailureSource::Aggregator { key }, message, count);
                }
            }
        }

        debug!(worker, updates = local.total_updates(), "Worker finished");
        local
    }
}

impl<V, E> Engine<V, E>
where
    V: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    /// Run until quiescence: no task pending and no worker inside a scope.
    ///
    /// Freezes the graph, spawns the configured number of workers and blocks
    /// until they have all exited. Returns the elapsed wall-clock time.
    /// Program and aggregator failures are collected in
    /// [`last_failures`](Self::last_failures); with `abort_on_error` the first
    /// one stops the run and is returned as `Execution`.
    pub fn start(&mut self) -> Result<Duration> {
        self.state
            .require("start", &[EngineState::Configured, EngineState::Completed])?;
        if self.graph.vertex_count() == 0 {
            return Err(EngineError::state("start", "without a graph"));
        }

        let workers = self.config.resolved_worker_threads();
        let policy = self.config.scheduler;
        self.graph.freeze();
        self.locks = LockTable::new(self.graph.vertex_count());
        self.scheduler.prepare(policy, workers);
        self.update_count.store(0, Ordering::SeqCst);
        self.failures.clear();
        self.metrics = EngineMetrics::default();

        info!(
            workers,
            scheduler = %policy,
            consistency = %self.config.consistency,
            pending = self.scheduler.len(),
            "Engine starting"
        );
        self.state = EngineState::Running;
        let started_at = Utc::now();
        let start = Instant::now();
        let outcome = self.run_workers(workers);
        let elapsed = start.elapsed();
        self.state = EngineState::Completed;

        let (mut metrics, mut failures) = outcome?;
        failures.sort_by_key(|f| f.at_update);
        let updates = self.update_count.load(Ordering::SeqCst);

        metrics.lock_contention = self.locks.contended();
        metrics.workers = workers;
        metrics.last_run_started = Some(started_at);
        metrics.last_run_elapsed = elapsed;
        metrics.last_update_count = updates;
        self.metrics = metrics;
        self.failures = failures;

        info!(
            updates,
            failures = self.failures.len(),
            lock_contention = self.metrics.lock_contention,
            "Engine run completed in {} ms",
            elapsed.as_millis()
        );

        if self.config.abort_on_error {
            if let Some(first) = self.failures.first() {
                // Tasks pushed by workers that were still finishing.
                self.scheduler.clear();
                return Err(EngineError::Execution(first.to_string()));
            }
        }
        Ok(elapsed)
    }

    fn run_workers(&self, workers: usize) -> Result<(EngineMetrics, Vec<TaskFailure>)> {
        let pool = self
            .sync_pool
            .as_ref()
            .ok_or_else(|| EngineError::state("start", self.state))?;
        let ctx = RunContext {
            graph: &self.graph,
            locks: &self.locks,
            globals: &self.globals,
            scheduler: &self.scheduler,
            aggregators: &self.aggregators,
            pool,
            update_count: &self.update_count,
            default_consistency: self.config.consistency,
            abort_on_error: self.config.abort_on_error,
            failures: Mutex::new(Vec::new()),
        };

        let (metrics, spawn_error) = thread::scope(|s| {
            let mut handles = Vec::with_capacity(workers);
            let mut spawn_error = None;
            for worker in 0..workers {
                let ctx = &ctx;
                let spawned = thread::Builder::new()
                    .name(format!("tessera-worker-{worker}"))
                    .spawn_scoped(s, move || ctx.worker_loop(worker));
                match spawned {
                    Ok(handle) => handles.push(handle),
                    Err(e) => {
                        error!(worker, error = %e, "Failed to spawn worker");
                        ctx.scheduler.abort();
                        spawn_error = Some(e);
                        break;
                    }
                }
            }

            let mut metrics = EngineMetrics::default();
            for handle in handles {
                match handle.join() {
                    Ok(local) => metrics.merge(&local),
                    Err(payload) => {
                        error!(panic = %panic_message(payload), "Worker thread panicked");
                    }
                }
            }
            (metrics, spawn_error)
        });

        if let Some(e) = spawn_error {
            return Err(EngineError::Construction(format!("worker pool: {e}")));
        }
        Ok((metrics, ctx.failures.into_inner()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::VertexProgram;
    use tessera_core::EngineConfig;

    struct Bump;

    impl VertexProgram<u64, ()> for Bump {
        fn name(&self) -> &str {
            "bump"
        }

        fn update(&self, scope: &mut Scope<'_, u64, ()>) -> anyhow::Result<()> {
            scope.with_data_mut(|d| *d += 1);
            Ok(())
        }
    }

    fn engine(workers: usize) -> Engine<u64, ()> {
        let mut e = Engine::new(EngineConfig {
            worker_threads: workers,
            ..EngineConfig::default()
        })
        .unwrap();
        for id in 0..4 {
            e.add_vertex(id, 0).unwrap();
        }
        e
    }

    #[test]
    fn start_requires_graph() {
        let mut e: Engine<u64, ()> = Engine::new(EngineConfig::default()).unwrap();
        assert!(matches!(e.start(), Err(EngineError::State { .. })));
        e.set_worker_threads(1).unwrap();
        assert!(matches!(e.start(), Err(EngineError::State { .. })));
    }

    #[test]
    fn empty_scheduler_finishes_immediately() {
        let mut e = engine(2);
        e.start().unwrap();
        assert_eq!(e.state(), EngineState::Completed);
        assert_eq!(e.last_update_count().unwrap(), 0);
        assert!(e.graph().unwrap().is_frozen());
        assert!(matches!(e.add_vertex(9, 0), Err(EngineError::State { .. })));
    }

    #[test]
    fn counter_resets_per_run() {
        let mut e = engine(2);
        let p = Engine::program(Bump);
        e.schedule_all(p.clone(), 1.0).unwrap();
        e.start().unwrap();
        assert_eq!(e.last_update_count().unwrap(), 4);

        e.schedule(2, p, 1.0).unwrap();
        e.start().unwrap();
        assert_eq!(e.last_update_count().unwrap(), 1);
        assert_eq!(e.graph().unwrap().vertex_data(2).unwrap(), 2);
        let metrics = e.metrics().unwrap();
        assert_eq!(metrics.updates_executed["bump"], 1);
        assert_eq!(metrics.workers, 2);
        assert!(metrics.last_run_started.is_some());
    }
}
