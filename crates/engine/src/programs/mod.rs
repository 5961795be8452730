//! Ready-made vertex programs and aggregators.

pub mod aggregates;
pub mod components;
pub mod pagerank;

pub use aggregates::{VertexCount, VertexSum};
pub use components::MinLabelComponents;
pub use pagerank::PageRank;
