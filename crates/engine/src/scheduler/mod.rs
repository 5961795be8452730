//! Pending-task set shared by all workers.
//!
//! At most one task per vertex is pending at a time: scheduling a vertex that is
//! already waiting keeps its place and program and raises its priority to the
//! larger of the two requests. Workers block in [`Scheduler::next`] until a task
//! shows up or the run reaches quiescence (nothing pending and no task running).

mod queue;
mod task;

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use tessera_core::{Priority, SchedulerPolicy};
use tessera_graph::VertexIndex;
use tracing::{debug, trace};

use crate::program::SharedProgram;

use self::queue::TaskQueue;
pub use self::task::Task;

struct Pending<V, E> {
    priority: Priority,
    seq: u64,
    program: SharedProgram<V, E>,
}

struct QueueState<V, E> {
    policy: SchedulerPolicy,
    queue: TaskQueue,
    pending: HashMap<VertexIndex, Pending<V, E>>,
    next_seq: u64,
    /// Tasks handed out and not yet completed.
    active: usize,
    aborted: bool,
}

/// Whether a queue entry still describes the task pending for `vertex`.
fn is_current<V, E>(
    pending: &HashMap<VertexIndex, Pending<V, E>>,
    vertex: VertexIndex,
    priority: Priority,
    seq: u64,
) -> bool {
    pending
        .get(&vertex)
        .is_some_and(|p| p.priority == priority && p.seq == seq)
}

impl<V, E> QueueState<V, E> {
    fn pop(&mut self, worker: usize) -> Option<Task<V, E>> {
        let pending = &self.pending;
        let vertex = self
            .queue
            .pop(worker, |vertex, priority, seq| is_current(pending, vertex, priority, seq))?;
        let Pending {
            priority, program, ..
        } = self.pending.remove(&vertex)?;
        Some(Task::new(vertex, program, priority))
    }
}

/// The engine's task scheduler.
pub struct Scheduler<V, E> {
    state: Mutex<QueueState<V, E>>,
    ready: Condvar,
}

impl<V, E> Scheduler<V, E> {
    pub fn new(policy: SchedulerPolicy, partitions: usize) -> Self {
        Self {
            state: Mutex::new(QueueState {
                policy,
                queue: TaskQueue::new(policy, partitions),
                pending: HashMap::new(),
                next_seq: 0,
                active: 0,
                aborted: false,
            }),
            ready: Condvar::new(),
        }
    }

    pub fn policy(&self) -> SchedulerPolicy {
        self.state.lock().policy
    }

    /// Insert a task, or coalesce it into the one already pending for its vertex.
    ///
    /// Returns `true` if a new pending task was created.
    pub fn push(&self, task: Task<V, E>) -> bool {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let created = match state.pending.get_mut(&task.vertex) {
            Some(existing) => {
                if task.priority > existing.priority {
                    existing.priority = task.priority;
                    let seq = existing.seq;
                    state.queue.raise(task.vertex, task.priority, seq);
                    let pending = &state.pending;
                    state.queue.compact(pending.len(), |vertex, priority, seq| {
                        is_current(pending, vertex, priority, seq)
                    });
                }
                false
            }
            None => {
                let seq = state.next_seq;
                state.next_seq += 1;
                state.queue.push(task.vertex, task.priority, seq);
                state.pending.insert(
                    task.vertex,
                    Pending {
                        priority: task.priority,
                        seq,
                        program: task.program,
                    },
                );
                true
            }
        };
        drop(guard);
        if created {
            self.ready.notify_one();
        }
        created
    }

    /// Hand out the next task, blocking while other workers may still produce
    /// work. `None` means the run is over.
    pub fn next(&self, worker: usize) -> Option<Task<V, E>> {
        let mut state = self.state.lock();
        loop {
            if state.aborted {
                return None;
            }
            if let Some(task) = state.pop(worker) {
                state.active += 1;
                trace!(worker, vertex = task.vertex, "Dequeued task");
                return Some(task);
            }
            if state.active == 0 {
                drop(state);
                self.ready.notify_all();
                return None;
            }
            self.ready.wait(&mut state);
        }
    }

    /// Mark a task returned by [`next`](Self::next) as finished. Call after the
    /// task's follow-up work has been pushed.
    pub fn complete(&self) {
        let mut state = self.state.lock();
        state.active = state.active.saturating_sub(1);
        let quiescent = state.active == 0 && state.pending.is_empty();
        drop(state);
        if quiescent {
            self.ready.notify_all();
        }
    }

    /// Drop every pending task and release all waiting workers.
    pub fn abort(&self) {
        let mut state = self.state.lock();
        if !state.aborted {
            debug!(dropped = state.pending.len(), "Scheduler aborted");
        }
        state.aborted = true;
        state.pending.clear();
        state.queue.clear();
        drop(state);
        self.ready.notify_all();
    }

    /// Reset per-run flags and rebuild the queue for `policy` and `partitions`,
    /// keeping pending tasks in their original insertion order.
    pub fn prepare(&self, policy: SchedulerPolicy, partitions: usize) {
        let mut state = self.state.lock();
        state.aborted = false;
        state.active = 0;
        state.policy = policy;
        let mut queue = TaskQueue::new(policy, partitions);
        let mut order: Vec<(u64, VertexIndex, Priority)> = state
            .pending
            .iter()
            .map(|(&vertex, p)| (p.seq, vertex, p.priority))
            .collect();
        order.sort_unstable_by_key(|&(seq, _, _)| seq);
        for (seq, vertex, priority) in order {
            queue.push(vertex, priority, seq);
        }
        state.queue = queue;
    }

    pub fn len(&self) -> usize {
        self.state.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().pending.is_empty()
    }

    /// Priority of the task pending for `vertex`, if any.
    pub fn pending_priority(&self, vertex: VertexIndex) -> Option<Priority> {
        self.state.lock().pending.get(&vertex).map(|p| p.priority)
    }

    /// Name of the program pending for `vertex`, if any.
    pub fn pending_program(&self, vertex: VertexIndex) -> Option<String> {
        self.state
            .lock()
            .pending
            .get(&vertex)
            .map(|p| p.program.name().to_string())
    }

    pub(crate) fn clear(&self) {
        let mut state = self.state.lock();
        state.pending.clear();
        state.queue.clear();
    }
}

impl<V, E> Drop for Scheduler<V, E> {
    fn drop(&mut self) {
        let pending = self.state.get_mut().pending.len();
        if pending > 0 {
            debug!(pending, "Scheduler dropped with pending tasks");
        }
    }
}

/// Convenience for building tasks from a shared program.
pub(crate) fn task_for<V, E>(
    vertex: VertexIndex,
    program: &SharedProgram<V, E>,
    priority: Priority,
) -> Task<V, E> {
    Task::new(vertex, Arc::clone(program), priority)
}
