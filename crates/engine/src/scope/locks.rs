use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tessera_core::Consistency;
use tessera_graph::{GraphStore, VertexIndex};
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Read,
    Write,
}

// Guards are only held, never read.
#[allow(dead_code)]
enum HeldLock<'a> {
    Read(RwLockReadGuard<'a, ()>),
    Write(RwLockWriteGuard<'a, ()>),
}

/// Locks held by one scope. Dropping it releases all of them.
pub struct ScopeLocks<'a> {
    held: Vec<HeldLock<'a>>,
}

impl ScopeLocks<'_> {
    pub fn len(&self) -> usize {
        self.held.len()
    }

    pub fn is_empty(&self) -> bool {
        self.held.is_empty()
    }
}

/// One reader-writer lock per vertex, guarding the right to touch that
/// vertex's data (and, through its endpoints, its edges) for a whole update.
///
/// Scopes always lock in ascending vertex index order, which rules out
/// deadlock between overlapping neighbourhoods.
pub struct LockTable {
    locks: Vec<RwLock<()>>,
    contended: AtomicU64,
}

impl LockTable {
    pub fn new(vertex_count: usize) -> Self {
        Self {
            locks: (0..vertex_count).map(|_| RwLock::new(())).collect(),
            contended: AtomicU64::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }

    /// Acquisitions that had to wait for another scope.
    pub fn contended(&self) -> u64 {
        self.contended.load(Ordering::Relaxed)
    }

    /// Vertices (with mode) a scope on `center` must lock, in acquisition order.
    pub fn lock_set<V, E>(
        graph: &GraphStore<V, E>,
        center: VertexIndex,
        consistency: Consistency,
    ) -> Vec<(VertexIndex, LockMode)> {
        let neighbor_mode = match consistency {
            Consistency::Vertex => return vec![(center, LockMode::Write)],
            Consistency::Edge => LockMode::Read,
            Consistency::Full => LockMode::Write,
        };
        let adjacent = graph.adjacent(center);
        let mut set = Vec::with_capacity(adjacent.len() + 1);
        let split = adjacent.partition_point(|&n| n < center);
        set.extend(adjacent[..split].iter().map(|&n| (n, neighbor_mode)));
        set.push((center, LockMode::Write));
        set.extend(adjacent[split..].iter().map(|&n| (n, neighbor_mode)));
        set
    }

    /// Block until every lock in the scope's lock set is held.
    pub fn acquire<V, E>(
        &self,
        graph: &GraphStore<V, E>,
        center: VertexIndex,
        consistency: Consistency,
    ) -> ScopeLocks<'_> {
        let set = Self::lock_set(graph, center, consistency);
        let mut held = Vec::with_capacity(set.len());
        for (vertex, mode) in set {
            let lock = &self.locks[vertex];
            let guard = match mode {
                LockMode::Read => HeldLock::Read(lock.try_read().unwrap_or_else(|| {
                    self.contended.fetch_add(1, Ordering::Relaxed);
                    trace!(center, vertex, "Waiting for read lock");
                    lock.read()
                })),
                LockMode::Write => HeldLock::Write(lock.try_write().unwrap_or_else(|| {
                    self.contended.fetch_add(1, Ordering::Relaxed);
                    trace!(center, vertex, "Waiting for write lock");
                    lock.write()
                })),
            };
            held.push(guard);
        }
        ScopeLocks { held }
    }
}
