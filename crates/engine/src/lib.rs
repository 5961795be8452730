//! Vertex-centric, graph-parallel execution engine.
//!
//! A fixed pool of workers pulls `(vertex, program)` tasks from the
//! [`Scheduler`], locks the vertex's neighbourhood at the requested
//! [`Consistency`] level, runs the [`VertexProgram`] against a [`Scope`] and
//! publishes whatever the program rescheduled. Registered aggregators fold the
//! whole graph into [`Globals`] every N updates or on demand.

pub mod aggregator;
pub mod engine;
pub mod globals;
pub mod metrics;
pub mod program;
pub mod programs;
pub mod scheduler;
pub mod scope;

pub use aggregator::{Aggregator, AggregatorRegistry};
pub use engine::{Engine, EngineState};
pub use globals::Globals;
pub use metrics::EngineMetrics;
pub use program::{FailureSource, SharedProgram, TaskFailure, VertexProgram};
pub use scheduler::{Scheduler, Task};
pub use scope::{LockTable, Scope};

pub use tessera_core::{
    Consistency, EngineConfig, EngineError, FromValue, Priority, Result, SchedulerPolicy, Value,
    VertexId,
};
pub use tessera_graph::{GraphDescription, GraphStats, GraphStore};
