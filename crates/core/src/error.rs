use thiserror::Error;

use crate::entity::VertexId;

/// Every failure the engine reports to its caller.
///
/// Validation and state errors are returned synchronously and leave the engine
/// untouched. `Execution` only surfaces after a run that was configured to stop
/// on the first failing task.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("Construction failed: {0}")]
    Construction(String),

    #[error("Invalid state for {operation}: engine is {state}")]
    State {
        operation: &'static str,
        state: String,
    },

    #[error("Invalid vertex id: {0}")]
    InvalidId(i64),

    #[error("Duplicate vertex: {0}")]
    DuplicateVertex(VertexId),

    #[error("Unknown vertex: {0}")]
    UnknownVertex(VertexId),

    #[error("Duplicate edge: {0} -> {1}")]
    DuplicateEdge(VertexId, VertexId),

    #[error("Unknown edge: {0} -> {1}")]
    UnknownEdge(VertexId, VertexId),

    #[error("Invalid resize to {requested}: graph already holds {current} vertices")]
    InvalidResize { requested: usize, current: usize },

    #[error("Graph must not be empty")]
    EmptyGraph,

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Global already registered: {0}")]
    DuplicateGlobal(String),

    #[error("Unknown global: {0}")]
    UnknownGlobal(String),

    #[error("Global is constant: {0}")]
    ConstantGlobal(String),

    #[error("Type mismatch for {key}: expected {expected}, found {found}")]
    TypeMismatch {
        key: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("Unknown aggregator: {0}")]
    UnknownAggregator(String),

    #[error("Scope violation on vertex {vertex}: {reason}")]
    ScopeViolation { vertex: VertexId, reason: String },

    #[error("Execution failed: {0}")]
    Execution(String),
}

impl EngineError {
    /// Shorthand for a lifecycle error.
    pub fn state(operation: &'static str, state: impl std::fmt::Display) -> Self {
        EngineError::State {
            operation,
            state: state.to_string(),
        }
    }

    /// Whether the error was raised before touching any engine state.
    pub fn is_validation(&self) -> bool {
        !matches!(
            self,
            EngineError::Construction(_) | EngineError::State { .. } | EngineError::Execution(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_error_message() {
        let err = EngineError::state("start", "Destroyed");
        assert_eq!(err.to_string(), "Invalid state for start: engine is Destroyed");
        assert!(!err.is_validation());
    }

    #[test]
    fn validation_classification() {
        assert!(EngineError::DuplicateVertex(3).is_validation());
        assert!(EngineError::InvalidResize { requested: 1, current: 2 }.is_validation());
        assert!(!EngineError::Execution("boom".into()).is_validation());
    }
}
