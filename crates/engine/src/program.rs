use std::any::Any;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tessera_core::{Consistency, VertexId};

use crate::scope::Scope;

/// A unit of per-vertex computation the engine can execute.
///
/// The engine hands every invocation a [`Scope`] that exposes exactly the data
/// the declared consistency level allows.
pub trait VertexProgram<V, E>: Send + Sync {
    /// Human-readable name for logging and metrics.
    fn name(&self) -> &str;

    /// Consistency level this program needs. `None` uses the engine default.
    fn consistency(&self) -> Option<Consistency> {
        None
    }

    /// Run once on the scope's centre vertex.
    fn update(&self, scope: &mut Scope<'_, V, E>) -> anyhow::Result<()>;
}

/// Programs are shared between the caller, the scheduler and running tasks.
pub type SharedProgram<V, E> = Arc<dyn VertexProgram<V, E>>;

/// Where a recorded failure came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum FailureSource {
    Update { vertex: VertexId, program: String },
    Aggregator { key: String },
}

/// A user-code failure captured during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskFailure {
    pub source: FailureSource,
    pub message: String,
    /// Update count at the moment the failure was recorded.
    pub at_update: u64,
}

impl fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            FailureSource::Update { vertex, program } => {
                write!(f, "{program} on vertex {vertex}: {}", self.message)
            }
            FailureSource::Aggregator { key } => write!(f, "aggregator {key}: {}", self.message),
        }
    }
}

/// Render a caught panic payload.
pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {s}")
    } else {
        "panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_display() {
        let failure = TaskFailure {
            source: FailureSource::Update {
                vertex: 4,
                program: "pagerank".into(),
            },
            message: "bad rank".into(),
            at_update: 10,
        };
        assert_eq!(failure.to_string(), "pagerank on vertex 4: bad rank");
    }

    #[test]
    fn panic_payloads() {
        assert_eq!(panic_message(Box::new("boom")), "panicked: boom");
        assert_eq!(panic_message(Box::new(String::from("bang"))), "panicked: bang");
        assert_eq!(panic_message(Box::new(7_u8)), "panicked");
    }
}
