//! Multi-producer, single-consumer completion queue.
//!
//! # Responsibilities
//! - Accept tasks from any background thread without blocking
//! - Hand the drain loop everything queued so far, exactly once
//!
//! # Design Decisions
//! - Unbounded: producers are never rejected (low volume per connection)
//! - `drain_all` swaps the backing vector out under the lock, so the drain
//!   sees an atomic snapshot and pushes racing with it land in the next tick
//! - Per-producer FIFO follows from appending under one lock

use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::observability::metrics;
use crate::queue::CompletionTask;

/// Pending completion tasks in arrival order.
#[derive(Debug, Default)]
pub struct TaskQueue {
    pending: Mutex<Vec<CompletionTask>>,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<CompletionTask>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a task. Callable from any thread.
    pub fn push(&self, task: impl Into<CompletionTask>) {
        let task = task.into();
        metrics::record_task_enqueued(task.kind());
        self.lock().push(task);
    }

    /// Detach and return every queued task. Single consumer only.
    pub fn drain_all(&self) -> Vec<CompletionTask> {
        let tasks = std::mem::take(&mut *self.lock());
        metrics::record_queue_depth(tasks.len());
        tasks
    }

    /// Drop everything pending without delivering it.
    pub fn discard(&self) -> usize {
        let abandoned = self.drain_all().len();
        if abandoned > 0 {
            metrics::record_tasks_abandoned(abandoned);
        }
        abandoned
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
