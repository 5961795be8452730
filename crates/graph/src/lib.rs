pub mod description;
pub mod store;

pub use description::GraphDescription;
pub use store::{GraphStats, GraphStore, VertexIndex};
