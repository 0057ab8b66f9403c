//! Pending-task priority queue.
//!
//! Ordered by priority (higher first), then by admission sequence (earlier
//! first) so equal-priority tasks leave in the order they arrived.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;

use crate::retry::RetryPolicy;
use crate::task::Task;

/// A task with its scheduler defaults resolved.
#[derive(Clone)]
pub(crate) struct QueuedTask {
    pub task: Arc<dyn Task>,
    pub priority: i32,
    pub max_retries: u32,
    pub retry_policy: Arc<dyn RetryPolicy>,
    /// Admission order; unique per scheduler.
    pub seq: u64,
}

impl QueuedTask {
    pub fn id(&self) -> &str {
        self.task.id()
    }
}

impl PartialEq for QueuedTask {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl Eq for QueuedTask {}

impl PartialOrd for QueuedTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedTask {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.priority.cmp(&other.priority) {
            // BinaryHeap is a max heap, so the earlier sequence must compare greater.
            Ordering::Equal => other.seq.cmp(&self.seq),
            other => other,
        }
    }
}

#[derive(Default)]
pub(crate) struct PendingQueue {
    heap: BinaryHeap<QueuedTask>,
}

impl PendingQueue {
    pub fn push(&mut self, task: QueuedTask) {
        self.heap.push(task);
    }

    pub fn pop(&mut self) -> Option<QueuedTask> {
        self.heap.pop()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Drop every pending task, returning how many there were.
    pub fn clear(&mut self) -> usize {
        let n = self.heap.len();
        self.heap.clear();
        n
    }
}
