use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, VecDeque};

use tessera_core::{Priority, SchedulerPolicy};
use tessera_graph::VertexIndex;

/// Heap entry; stale entries are skipped on pop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Ranked {
    priority: Priority,
    seq: Reverse<u64>,
    vertex: VertexIndex,
}

impl Ord for Ranked {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then(self.seq.cmp(&other.seq))
    }
}

impl PartialOrd for Ranked {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Ordering structure over pending vertices. Coalescing lives one level up;
/// this only decides who goes next.
#[derive(Debug)]
pub(crate) enum TaskQueue {
    Fifo(VecDeque<VertexIndex>),
    Priority(BinaryHeap<Ranked>),
    RoundRobin(Vec<VecDeque<VertexIndex>>),
}

impl TaskQueue {
    pub(crate) fn new(policy: SchedulerPolicy, partitions: usize) -> Self {
        match policy {
            SchedulerPolicy::Fifo => TaskQueue::Fifo(VecDeque::new()),
            SchedulerPolicy::Priority => TaskQueue::Priority(BinaryHeap::new()),
            SchedulerPolicy::RoundRobin => {
                TaskQueue::RoundRobin((0..partitions.max(1)).map(|_| VecDeque::new()).collect())
            }
        }
    }

    pub(crate) fn push(&mut self, vertex: VertexIndex, priority: Priority, seq: u64) {
        match self {
            TaskQueue::Fifo(queue) => queue.push_back(vertex),
            TaskQueue::Priority(heap) => heap.push(Ranked {
                priority,
                seq: Reverse(seq),
                vertex,
            }),
            TaskQueue::RoundRobin(queues) => {
                let n = queues.len();
                queues[vertex % n].push_back(vertex);
            }
        }
    }

    /// A pending vertex got a higher priority.
    pub(crate) fn raise(&mut self, vertex: VertexIndex, priority: Priority, seq: u64) {
        if let TaskQueue::Priority(heap) = self {
            heap.push(Ranked {
                priority,
                seq: Reverse(seq),
                vertex,
            });
        }
    }

    /// Drop stale heap entries once they outnumber the `live` pending tasks
    /// more than twofold.
    pub(crate) fn compact(
        &mut self,
        live: usize,
        mut is_current: impl FnMut(VertexIndex, Priority, u64) -> bool,
    ) {
        if let TaskQueue::Priority(heap) = self {
            if heap.len() > 2 * live.max(1) {
                heap.retain(|entry| is_current(entry.vertex, entry.priority, entry.seq.0));
            }
        }
    }

    /// Pop the next candidate for `worker`. `is_current` filters stale heap
    /// entries left behind by [`raise`](Self::raise).
    pub(crate) fn pop(
        &mut self,
        worker: usize,
        mut is_current: impl FnMut(VertexIndex, Priority, u64) -> bool,
    ) -> Option<VertexIndex> {
        match self {
            TaskQueue::Fifo(queue) => queue.pop_front(),
            TaskQueue::Priority(heap) => {
                while let Some(entry) = heap.pop() {
                    if is_current(entry.vertex, entry.priority, entry.seq.0) {
                        return Some(entry.vertex);
                    }
                }
                None
            }
            TaskQueue::RoundRobin(queues) => {
                let n = queues.len();
                (0..n).find_map(|offset| queues[(worker + offset) % n].pop_front())
            }
        }
    }

    pub(crate) fn clear(&mut self) {
        match self {
            TaskQueue::Fifo(queue) => queue.clear(),
            TaskQueue::Priority(heap) => heap.clear(),
            TaskQueue::RoundRobin(queues) => queues.iter_mut().for_each(VecDeque::clear),
        }
    }
}
