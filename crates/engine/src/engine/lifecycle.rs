use std::fmt;

use serde::Serialize;
use tessera_core::{EngineError, Result};
use tessera_graph::GraphStore;
use tracing::{info, warn};

use crate::scope::LockTable;

use super::Engine;

/// Where an engine is in its life.
///
/// ```text
/// Created --configure/build--> Configured --start--> Running --> Completed
///    |                             |                                |
///    +-----------------------------+------------ destroy -----------+--> Destroyed
/// ```
///
/// A completed engine may be started again; destroyed is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum EngineState {
    Created,
    Configured,
    Running,
    Completed,
    Destroyed,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EngineState::Created => "created",
            EngineState::Configured => "configured",
            EngineState::Running => "running",
            EngineState::Completed => "completed",
            EngineState::Destroyed => "destroyed",
        };
        f.write_str(s)
    }
}

impl EngineState {
    /// Fail with a `State` error unless the engine is in one of `allowed`.
    pub(crate) fn require(self, operation: &'static str, allowed: &[EngineState]) -> Result<()> {
        if allowed.contains(&self) {
            Ok(())
        } else {
            Err(EngineError::state(operation, self))
        }
    }

    /// Any state that still owns resources.
    pub(crate) fn require_live(self, operation: &'static str) -> Result<()> {
        if self == EngineState::Destroyed {
            return Err(EngineError::state(operation, self));
        }
        Ok(())
    }

    /// States in which the graph, scheduler and configuration may be changed.
    pub(crate) const SETUP: &'static [EngineState] =
        &[EngineState::Created, EngineState::Configured];

    /// States in which tasks may be queued and globals registered.
    pub(crate) const IDLE: &'static [EngineState] = &[
        EngineState::Created,
        EngineState::Configured,
        EngineState::Completed,
    ];
}

impl<V, E> Engine<V, E>
where
    V: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    /// Release the graph, pending tasks, globals and aggregators.
    ///
    /// Destroying twice only logs a warning. Every other operation on a
    /// destroyed engine fails with a `State` error.
    pub fn destroy(&mut self) {
        if self.state == EngineState::Destroyed {
            warn!("Engine has already been destroyed and may not be destroyed again");
            return;
        }
        let pending = self.scheduler.len();
        self.scheduler.clear();
        self.aggregators.clear();
        self.globals.clear();
        self.graph = GraphStore::new();
        self.locks = LockTable::new(0);
        self.sync_pool = None;
        self.failures.clear();
        self.state = EngineState::Destroyed;
        info!(dropped_tasks = pending, "Engine destroyed");
    }

    pub fn is_destroyed(&self) -> bool {
        self.state == EngineState::Destroyed
    }

    /// Leave `Created` once anything has been set up.
    pub(super) fn mark_configured(&mut self) {
        if self.state == EngineState::Created {
            self.state = EngineState::Configured;
        }
    }
}
