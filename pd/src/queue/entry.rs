//! Ready-queue ordering and status types

use std::collections::{BTreeMap, BinaryHeap};

use serde::Serialize;
use tokio::time::Instant;

use crate::domain::{Priority, TaskId};

/// A queued task's position in the ready heap
#[derive(Debug, Clone)]
pub(crate) struct QueuedEntry {
    pub id: TaskId,
    pub priority: Priority,
    pub created_at: Instant,
    pub seq: u64,
}

impl Eq for QueuedEntry {}

impl PartialEq for QueuedEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == std::cmp::Ordering::Equal
    }
}

impl Ord for QueuedEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Higher priority first, then earlier creation, then earlier enqueue
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.created_at.cmp(&self.created_at))
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for QueuedEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Max-heap of queued tasks keyed on `(priority, created_at, seq)`
#[derive(Debug, Default)]
pub(crate) struct ReadyQueue {
    heap: BinaryHeap<QueuedEntry>,
}

impl ReadyQueue {
    pub fn push(&mut self, entry: QueuedEntry) {
        self.heap.push(entry);
    }

    pub fn pop(&mut self) -> Option<QueuedEntry> {
        self.heap.pop()
    }

    /// Remove a task, returning whether it was present
    pub fn remove(&mut self, id: &TaskId) -> bool {
        let before = self.heap.len();
        self.heap.retain(|entry| &entry.id != id);
        before != self.heap.len()
    }

    pub fn drain(&mut self) -> Vec<QueuedEntry> {
        self.heap.drain().collect()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn count_by_priority(&self) -> BTreeMap<Priority, usize> {
        let mut counts: BTreeMap<Priority, usize> = Priority::ALL.iter().map(|p| (*p, 0)).collect();
        for entry in self.heap.iter() {
            *counts.entry(entry.priority).or_default() += 1;
        }
        counts
    }
}

/// Lifetime counters for the queue
#[derive(Debug, Default, Clone, Serialize)]
pub struct QueueStats {
    pub total_enqueued: u64,
    pub total_completed: u64,
    pub total_failed: u64,
    pub total_cancelled: u64,
    pub total_retries: u64,
    pub peak_queue_depth: usize,
    pub peak_concurrent: usize,
}

/// Queue state for status display
#[derive(Debug, Clone, Serialize)]
pub struct QueueStatus {
    pub queued: usize,
    pub running: usize,
    pub retry_scheduled: usize,
    pub finished: usize,
    pub by_priority: BTreeMap<Priority, usize>,
    pub max_concurrent: usize,
    pub shutting_down: bool,
    pub stats: QueueStats,
}

/// What happened during shutdown
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct ShutdownReport {
    /// Queued or retry-scheduled tasks cancelled before they could start
    pub cancelled_pending: usize,

    /// Running tasks that finished inside the timeout
    pub drained: usize,

    /// Running tasks aborted after the timeout
    pub abandoned: usize,
}
