use std::env;

use serde::{Deserialize, Serialize};

use crate::entity::{Consistency, SchedulerPolicy};
use crate::error::{EngineError, Result};

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Engine configuration, typically parsed from TOML or the environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Number of worker threads. 0 = available parallelism.
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,
    /// Task hand-out policy.
    #[serde(default = "default_scheduler")]
    pub scheduler: SchedulerPolicy,
    /// Consistency level for programs that do not declare their own.
    #[serde(default = "default_consistency")]
    pub consistency: Consistency,
    /// Stop the whole run at the first failing task.
    #[serde(default)]
    pub abort_on_error: bool,
    /// Threads in the aggregation pool. 0 = same as workers.
    #[serde(default)]
    pub sync_threads: usize,
}

fn default_worker_threads() -> usize { 0 }
fn default_scheduler() -> SchedulerPolicy { SchedulerPolicy::Fifo }
fn default_consistency() -> Consistency { Consistency::Edge }

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_threads: default_worker_threads(),
            scheduler: default_scheduler(),
            consistency: default_consistency(),
            abort_on_error: false,
            sync_threads: 0,
        }
    }
}

impl EngineConfig {
    /// Parse a TOML document. Missing keys take their defaults.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| EngineError::InvalidArgument(format!("config: {e}")))
    }

    /// Build config from `TESSERA_*` environment variables (call `load_dotenv()` first).
    ///
    /// Unset variables fall back to defaults; malformed ones are rejected.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Some(v) = env_opt("TESSERA_WORKER_THREADS") {
            config.apply_option("ncpus", &v)?;
        }
        if let Some(v) = env_opt("TESSERA_SCHEDULER") {
            config.apply_option("scheduler", &v)?;
        }
        if let Some(v) = env_opt("TESSERA_CONSISTENCY") {
            config.apply_option("scope", &v)?;
        }
        if let Some(v) = env_opt("TESSERA_ABORT_ON_ERROR") {
            config.apply_option("abort_on_error", &v)?;
        }
        if let Some(v) = env_opt("TESSERA_SYNC_THREADS") {
            config.apply_option("sync_threads", &v)?;
        }
        Ok(config)
    }

    /// Parse a command-line style option string such as
    /// `--ncpus=4 --scheduler=priority --scope=edge`.
    pub fn from_args(args: &str) -> Result<Self> {
        let mut config = Self::default();
        for token in args.split_whitespace() {
            let option = token.trim_start_matches('-');
            let (key, value) = option.split_once('=').ok_or_else(|| {
                EngineError::InvalidArgument(format!("expected key=value, got {token}"))
            })?;
            config.apply_option(key, value)?;
        }
        Ok(config)
    }

    fn apply_option(&mut self, key: &str, value: &str) -> Result<()> {
        let invalid = || EngineError::InvalidArgument(format!("invalid value for {key}: {value}"));
        match key {
            "ncpus" | "workers" | "worker_threads" => {
                let n: usize = value.parse().map_err(|_| invalid())?;
                if n == 0 {
                    return Err(invalid());
                }
                self.worker_threads = n;
            }
            "scheduler" => self.scheduler = value.parse()?,
            "scope" | "consistency" => self.consistency = value.parse()?,
            "abort_on_error" => self.abort_on_error = value.parse().map_err(|_| invalid())?,
            "sync_threads" => self.sync_threads = value.parse().map_err(|_| invalid())?,
            other => {
                return Err(EngineError::InvalidArgument(format!("unknown option: {other}")));
            }
        }
        Ok(())
    }

    /// Resolve worker thread count (0 means use available parallelism).
    pub fn resolved_worker_threads(&self) -> usize {
        if self.worker_threads == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        } else {
            self.worker_threads
        }
    }

    /// Resolve aggregation pool size (0 means same as workers).
    pub fn resolved_sync_threads(&self) -> usize {
        if self.sync_threads == 0 {
            self.resolved_worker_threads()
        } else {
            self.sync_threads
        }
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!(
            workers = self.resolved_worker_threads(),
            scheduler = %self.scheduler,
            consistency = %self.consistency,
            abort_on_error = self.abort_on_error,
            "Engine config"
        );
    }
}
