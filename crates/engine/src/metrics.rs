use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Operational metrics of the most recent run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EngineMetrics {
    /// Updates executed by program name.
    pub updates_executed: HashMap<String, u64>,
    /// Average update duration by program name.
    pub avg_update_duration: HashMap<String, Duration>,
    /// Automatic and manual passes by aggregator key.
    pub aggregator_runs: HashMap<String, u64>,
    /// Failed updates and aggregator passes.
    pub failures: usize,
    /// Scope lock acquisitions that had to wait.
    pub lock_contention: u64,
    /// Worker threads used by the last run.
    pub workers: usize,
    pub last_run_started: Option<DateTime<Utc>>,
    pub last_run_elapsed: Duration,
    pub last_update_count: u64,
}

impl EngineMetrics {
    /// Record one update.
    pub fn record_update(&mut self, program: &str, duration: Duration) {
        let count = {
            let count = self.updates_executed.entry(program.to_string()).or_default();
            *count += 1;
            *count
        };

        let prev_avg = self
            .avg_update_duration
            .get(program)
            .copied()
            .unwrap_or_default();

        // Incremental mean: new_avg = prev_avg + (duration - prev_avg) / count
        let new_avg = if count == 1 {
            duration
        } else {
            let prev_nanos = prev_avg.as_nanos() as f64;
            let cur_nanos = duration.as_nanos() as f64;
            let avg_nanos = prev_nanos + (cur_nanos - prev_nanos) / count as f64;
            Duration::from_nanos(avg_nanos as u64)
        };

        self.avg_update_duration.insert(program.to_string(), new_avg);
    }

    pub fn record_aggregation(&mut self, key: &str) {
        *self.aggregator_runs.entry(key.to_string()).or_default() += 1;
    }

    /// Fold a worker's local metrics into the run totals.
    pub fn merge(&mut self, other: &EngineMetrics) {
        for (program, &count) in &other.updates_executed {
            let total = self.updates_executed.entry(program.clone()).or_default();
            let before = *total;
            *total += count;

            let theirs = other.avg_update_duration.get(program).copied().unwrap_or_default();
            let ours = self.avg_update_duration.get(program).copied().unwrap_or_default();
            let weighted = (ours.as_nanos() as f64 * before as f64
                + theirs.as_nanos() as f64 * count as f64)
                / (*total).max(1) as f64;
            self.avg_update_duration
                .insert(program.clone(), Duration::from_nanos(weighted as u64));
        }
        for (key, &runs) in &other.aggregator_runs {
            *self.aggregator_runs.entry(key.clone()).or_default() += runs;
        }
        self.failures += other.failures;
    }

    pub fn total_updates(&self) -> u64 {
        self.updates_executed.values().sum()
    }
}
