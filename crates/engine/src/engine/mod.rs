//! The engine facade -- owns the graph, scheduler, globals and aggregators.
//!
//! Split into focused submodules:
//! - `core`: Engine struct, constructor, graph construction, globals and configuration
//! - `lifecycle`: engine states and teardown
//! - `execution`: the worker pool and the run loop

mod core;
mod execution;
mod lifecycle;

pub use self::core::Engine;
pub use self::lifecycle::EngineState;
