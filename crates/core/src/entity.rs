use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Caller-chosen vertex identifier, unique within a graph.
pub type VertexId = u32;

/// Dense edge index assigned by the graph store in insertion order.
pub type EdgeId = usize;

/// Convert a raw (possibly negative) id from an external graph description.
pub fn vertex_id(raw: i64) -> Result<VertexId, EngineError> {
    VertexId::try_from(raw).map_err(|_| EngineError::InvalidId(raw))
}

/// Task priority. Higher values run first under the priority policy.
///
/// Ordered with `f64::total_cmp`, so NaN is accepted and sorts above every
/// finite value.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Priority(pub f64);

impl Priority {
    pub const ZERO: Priority = Priority(0.0);

    pub fn max(self, other: Priority) -> Priority {
        if other > self { other } else { self }
    }
}

impl PartialEq for Priority {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Priority {}

impl PartialOrd for Priority {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Priority {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl From<f64> for Priority {
    fn from(value: f64) -> Self {
        Priority(value)
    }
}

/// How much of a vertex's neighbourhood a running update locks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Consistency {
    /// Write lock on the centre vertex only.
    Vertex,
    /// Write lock on the centre vertex, read locks on adjacent vertices.
    /// Incident edges become writable.
    Edge,
    /// Write locks on the centre vertex and its whole 1-hop neighbourhood.
    Full,
}

impl fmt::Display for Consistency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Consistency::Vertex => write!(f, "vertex"),
            Consistency::Edge => write!(f, "edge"),
            Consistency::Full => write!(f, "full"),
        }
    }
}

impl FromStr for Consistency {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "vertex" => Ok(Consistency::Vertex),
            "edge" => Ok(Consistency::Edge),
            "full" => Ok(Consistency::Full),
            other => Err(EngineError::InvalidArgument(format!(
                "unknown consistency level: {other}"
            ))),
        }
    }
}

/// Order in which the scheduler hands out pending tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerPolicy {
    /// Insertion order, priorities ignored.
    Fifo,
    /// Highest priority first, FIFO among equal priorities.
    Priority,
    /// Vertices partitioned across workers; idle workers steal round-robin.
    RoundRobin,
}

impl fmt::Display for SchedulerPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedulerPolicy::Fifo => write!(f, "fifo"),
            SchedulerPolicy::Priority => write!(f, "priority"),
            SchedulerPolicy::RoundRobin => write!(f, "round_robin"),
        }
    }
}

impl FromStr for SchedulerPolicy {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fifo" => Ok(SchedulerPolicy::Fifo),
            "priority" => Ok(SchedulerPolicy::Priority),
            "round_robin" | "round-robin" | "roundrobin" => Ok(SchedulerPolicy::RoundRobin),
            other => Err(EngineError::InvalidArgument(format!(
                "unknown scheduler policy: {other}"
            ))),
        }
    }
}
