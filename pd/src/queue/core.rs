//! Queue manager implementation

use std::collections::{HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use tokio::runtime::Handle;
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::domain::{PlatformError, Priority, TaskId};

use super::config::QueueConfig;
use super::entry::{QueueStats, QueueStatus, QueuedEntry, ReadyQueue, ShutdownReport};
use super::error::QueueError;
use super::task::{Task, TaskContext, TaskOperation, TaskRecord, TaskSnapshot, TaskStatus};

/// How often shutdown checks whether running tasks have drained
const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Internal state protected by mutex
struct QueueInner {
    config: QueueConfig,

    /// Queued tasks, highest priority on top
    ready: ReadyQueue,

    /// Every known task by id, until evicted from the finished list
    tasks: HashMap<TaskId, TaskRecord>,

    /// Worker handles of running tasks
    workers: HashMap<TaskId, JoinHandle<()>>,

    /// Pending re-insertions of failed tasks
    retry_timers: HashMap<TaskId, AbortHandle>,

    /// Terminal tasks in completion order, for eviction
    finished: VecDeque<TaskId>,

    max_concurrent: usize,
    next_seq: u64,
    shutting_down: bool,
    stats: QueueStats,
}

impl QueueInner {
    fn mark_finished(&mut self, id: &TaskId) {
        self.finished.push_back(id.clone());
        while self.finished.len() > self.config.max_retained_results {
            if let Some(old) = self.finished.pop_front() {
                self.tasks.remove(&old);
            }
        }
    }
}

/// State shared between the manager handle, the dispatcher and workers
struct Shared {
    inner: Mutex<QueueInner>,
    slots: Arc<Semaphore>,
    notify: Notify,
    stop_dispatch: CancellationToken,
    runtime: Handle,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, QueueInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Pop the next runnable task and start it on the given slot.
    ///
    /// Pop, the still-queued check and the transition to Running happen in one
    /// critical section, the same one `cancel` uses, so a task can never be
    /// both started and cancelled. Gives the permit back if nothing is queued.
    fn try_start(self: &Arc<Self>, permit: OwnedSemaphorePermit) -> Result<(), OwnedSemaphorePermit> {
        let mut guard = self.lock();
        let inner = &mut *guard;

        if inner.shutting_down {
            return Err(permit);
        }

        while let Some(entry) = inner.ready.pop() {
            let Some(record) = inner.tasks.get_mut(&entry.id) else {
                debug!(task_id = %entry.id, "Shared::try_start: popped unknown task, skipping");
                continue;
            };
            if record.status != TaskStatus::Queued {
                debug!(task_id = %entry.id, status = %record.status, "Shared::try_start: popped stale entry, skipping");
                continue;
            }

            record.attempts += 1;
            record.started_at = Some(Utc::now());
            record.set_status(TaskStatus::Running);

            let ctx = TaskContext::new(entry.id.clone(), record.attempts, record.cancel.clone());
            let operation = record.task.operation();
            debug!(
                task_id = %entry.id,
                label = %record.task.label(),
                priority = %entry.priority,
                attempt = record.attempts,
                "Shared::try_start: starting task"
            );

            let handle = self
                .runtime
                .spawn(run_task(Arc::clone(self), entry.id.clone(), operation, ctx, permit));
            inner.workers.insert(entry.id, handle);
            inner.stats.peak_concurrent = inner.stats.peak_concurrent.max(inner.workers.len());
            return Ok(());
        }

        Err(permit)
    }

    /// Record the outcome of one attempt
    fn finish(self: &Arc<Self>, id: &TaskId, outcome: Result<serde_json::Value, PlatformError>) {
        let mut guard = self.lock();
        let inner = &mut *guard;
        inner.workers.remove(id);

        let Some(record) = inner.tasks.get_mut(id) else {
            debug!(task_id = %id, "Shared::finish: task no longer tracked");
            return;
        };
        if record.status != TaskStatus::Running {
            // Abandoned by shutdown while the operation was still going
            debug!(task_id = %id, status = %record.status, "Shared::finish: task no longer running, ignoring outcome");
            return;
        }

        match outcome {
            Ok(value) => {
                record.result = Some(value);
                record.error = None;
                record.set_status(TaskStatus::Completed);
                inner.stats.total_completed += 1;
                info!(
                    task_id = %id,
                    label = %record.task.label(),
                    attempts = record.attempts,
                    "Task completed"
                );
                inner.mark_finished(id);
            }
            Err(err) if record.retry_count < record.task.max_retries() && !inner.shutting_down => {
                record.retry_count += 1;
                let delay = inner.config.backoff_for(record.retry_count);
                warn!(
                    task_id = %id,
                    label = %record.task.label(),
                    retry = record.retry_count,
                    max_retries = record.task.max_retries(),
                    ?delay,
                    error = %err,
                    "Task failed, retry scheduled"
                );
                record.error = Some(err);
                record.set_status(TaskStatus::RetryScheduled);
                inner.stats.total_retries += 1;

                let timer = self.runtime.spawn(requeue_after(Arc::clone(self), id.clone(), delay));
                inner.retry_timers.insert(id.clone(), timer.abort_handle());
            }
            Err(err) => {
                error!(
                    task_id = %id,
                    label = %record.task.label(),
                    attempts = record.attempts,
                    error = %err,
                    "Task failed"
                );
                record.error = Some(err);
                record.set_status(TaskStatus::Failed);
                inner.stats.total_failed += 1;
                inner.mark_finished(id);
            }
        }
    }

    /// Put a retry-scheduled task back in the ready queue with its original
    /// ordering key, so untouched tasks keep their relative order.
    fn requeue(&self, id: &TaskId) {
        let mut guard = self.lock();
        let inner = &mut *guard;
        inner.retry_timers.remove(id);

        if inner.shutting_down {
            return;
        }
        let Some(record) = inner.tasks.get_mut(id) else {
            return;
        };
        if record.status != TaskStatus::RetryScheduled {
            debug!(task_id = %id, status = %record.status, "Shared::requeue: not awaiting retry, skipping");
            return;
        }

        record.set_status(TaskStatus::Queued);
        inner.ready.push(QueuedEntry {
            id: id.clone(),
            priority: record.task.priority(),
            created_at: record.task.created_at(),
            seq: record.seq,
        });
        inner.stats.peak_queue_depth = inner.stats.peak_queue_depth.max(inner.ready.len());
        debug!(task_id = %id, retry = record.retry_count, "Shared::requeue: task back in queue");

        drop(guard);
        self.notify.notify_one();
    }
}

/// Run one attempt of a task while holding a concurrency slot.
///
/// The permit is owned by this future, so it is released on every exit path:
/// success, failure, panic, or abort.
async fn run_task(
    shared: Arc<Shared>,
    id: TaskId,
    operation: Arc<dyn TaskOperation>,
    ctx: TaskContext,
    permit: OwnedSemaphorePermit,
) {
    let outcome = match AssertUnwindSafe(operation.run(ctx)).catch_unwind().await {
        Ok(outcome) => outcome,
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(PlatformError::Unclassified(format!("operation panicked: {}", message)))
        }
    };

    shared.finish(&id, outcome);
    drop(permit);
}

async fn requeue_after(shared: Arc<Shared>, id: TaskId, delay: Duration) {
    tokio::time::sleep(delay).await;
    shared.requeue(&id);
}

/// Dispatcher: take a slot, then hand it to the best queued task.
///
/// Slots are taken before popping, so a popped task never waits for one and
/// start order is exactly pop order.
async fn dispatch_loop(shared: Arc<Shared>) {
    debug!("dispatch_loop: started");

    'dispatch: loop {
        let mut permit = tokio::select! {
            biased;
            _ = shared.stop_dispatch.cancelled() => break,
            permit = shared.slots.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        loop {
            match shared.try_start(permit) {
                Ok(()) => break,
                Err(returned) => {
                    permit = returned;
                    tokio::select! {
                        biased;
                        _ = shared.stop_dispatch.cancelled() => break 'dispatch,
                        _ = shared.notify.notified() => {}
                    }
                }
            }
        }
    }

    debug!("dispatch_loop: stopped");
}

/// Priority task queue with bounded concurrency and retry/backoff.
///
/// Queue bookkeeping (enqueue, cancel, status) is synchronous and never
/// suspends. Operations run on the tokio runtime the manager was spawned on.
pub struct QueueManager {
    shared: Arc<Shared>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl QueueManager {
    /// Create the manager and start its dispatcher.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(config: QueueConfig) -> Self {
        debug!(?config, "QueueManager::spawn: called");
        let max_concurrent = config.max_concurrent_tasks.max(1);
        let shared = Arc::new(Shared {
            inner: Mutex::new(QueueInner {
                config,
                ready: ReadyQueue::default(),
                tasks: HashMap::new(),
                workers: HashMap::new(),
                retry_timers: HashMap::new(),
                finished: VecDeque::new(),
                max_concurrent,
                next_seq: 0,
                shutting_down: false,
                stats: QueueStats::default(),
            }),
            slots: Arc::new(Semaphore::new(max_concurrent)),
            notify: Notify::new(),
            stop_dispatch: CancellationToken::new(),
            runtime: Handle::current(),
        });

        let dispatcher = shared.runtime.spawn(dispatch_loop(Arc::clone(&shared)));
        info!(max_concurrent, "QueueManager started");

        Self {
            shared,
            dispatcher: Mutex::new(Some(dispatcher)),
        }
    }

    /// Add a task to the queue. Never blocks.
    pub fn enqueue(&self, task: Task) -> Result<TaskId, QueueError> {
        let mut guard = self.shared.lock();
        let inner = &mut *guard;

        if inner.shutting_down {
            warn!(label = %task.label(), "QueueManager::enqueue: rejected, shutting down");
            return Err(QueueError::ShuttingDown);
        }

        let id = task.id().clone();
        let seq = inner.next_seq;
        inner.next_seq += 1;

        debug!(task_id = %id, label = %task.label(), priority = %task.priority(), "QueueManager::enqueue: called");
        inner.ready.push(QueuedEntry {
            id: id.clone(),
            priority: task.priority(),
            created_at: task.created_at(),
            seq,
        });
        inner.tasks.insert(id.clone(), TaskRecord::new(task, seq));
        inner.stats.total_enqueued += 1;
        inner.stats.peak_queue_depth = inner.stats.peak_queue_depth.max(inner.ready.len());

        drop(guard);
        self.shared.notify.notify_one();
        Ok(id)
    }

    /// Build and enqueue a task in one call
    pub fn submit(
        &self,
        priority: Priority,
        operation: impl TaskOperation + 'static,
        max_retries: u32,
    ) -> Result<TaskId, QueueError> {
        self.enqueue(Task::new(priority, operation).with_max_retries(max_retries))
    }

    /// Cancel a queued task.
    ///
    /// Returns true only if the task was still queued; running, retrying,
    /// finished and unknown tasks are left alone.
    pub fn cancel(&self, id: &TaskId) -> bool {
        let mut guard = self.shared.lock();
        let inner = &mut *guard;

        let Some(record) = inner.tasks.get_mut(id) else {
            debug!(task_id = %id, "QueueManager::cancel: unknown task");
            return false;
        };
        if record.status != TaskStatus::Queued {
            debug!(task_id = %id, status = %record.status, "QueueManager::cancel: not queued, cannot cancel");
            return false;
        }

        inner.ready.remove(id);
        record.cancel.cancel();
        record.set_status(TaskStatus::Cancelled);
        inner.stats.total_cancelled += 1;
        info!(task_id = %id, label = %record.task.label(), "Task cancelled before execution");
        inner.mark_finished(id);
        true
    }

    /// Current state of a task, if known
    pub fn get_status(&self, id: &TaskId) -> Option<TaskSnapshot> {
        self.shared.lock().tasks.get(id).map(TaskRecord::snapshot)
    }

    /// Counts for status display
    pub fn get_queue_status(&self) -> QueueStatus {
        let inner = self.shared.lock();
        QueueStatus {
            queued: inner.ready.len(),
            running: inner.workers.len(),
            retry_scheduled: inner.retry_timers.len(),
            finished: inner.finished.len(),
            by_priority: inner.ready.count_by_priority(),
            max_concurrent: inner.max_concurrent,
            shutting_down: inner.shutting_down,
            stats: inner.stats.clone(),
        }
    }

    /// Number of tasks currently running
    pub fn running_count(&self) -> usize {
        self.shared.lock().workers.len()
    }

    /// Wait until a task reaches a terminal state
    pub async fn wait_for(&self, id: &TaskId) -> Result<TaskSnapshot, QueueError> {
        let mut rx = {
            let inner = self.shared.lock();
            inner
                .tasks
                .get(id)
                .map(TaskRecord::subscribe)
                .ok_or_else(|| QueueError::UnknownTask(id.clone()))?
        };

        loop {
            let done = rx.borrow_and_update().is_terminal();
            if done || rx.changed().await.is_err() {
                break;
            }
        }

        self.get_status(id).ok_or_else(|| QueueError::UnknownTask(id.clone()))
    }

    /// Resize the slot pool. Shrinking takes effect as running tasks finish.
    pub fn set_max_concurrent(&self, max_concurrent: usize) {
        let max_concurrent = max_concurrent.max(1);
        let previous = {
            let mut inner = self.shared.lock();
            std::mem::replace(&mut inner.max_concurrent, max_concurrent)
        };
        debug!(previous, max_concurrent, "QueueManager::set_max_concurrent: called");

        if max_concurrent > previous {
            self.shared.slots.add_permits(max_concurrent - previous);
        } else if max_concurrent < previous {
            let slots = Arc::clone(&self.shared.slots);
            let surplus = (previous - max_concurrent) as u32;
            self.shared.runtime.spawn(async move {
                if let Ok(permits) = slots.acquire_many_owned(surplus).await {
                    permits.forget();
                }
            });
        }
    }

    /// Apply a new configuration. Backoff settings affect future retries.
    pub fn reconfigure(&self, config: QueueConfig) {
        let max_concurrent = config.max_concurrent_tasks;
        self.shared.lock().config = config;
        self.set_max_concurrent(max_concurrent);
    }

    pub fn config(&self) -> QueueConfig {
        self.shared.lock().config.clone()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shared.lock().shutting_down
    }

    /// Stop accepting tasks and drain.
    ///
    /// Queued and retry-scheduled tasks are cancelled. Running tasks get
    /// `timeout` to finish; after that their cancellation token fires and
    /// their tokio task is aborted at its next await point. Work an operation
    /// moved onto a blocking thread keeps running after it is abandoned.
    pub async fn shutdown(&self, timeout: Duration) -> ShutdownReport {
        info!(?timeout, "QueueManager shutting down");
        let mut report = ShutdownReport::default();

        let running_at_start = {
            let mut guard = self.shared.lock();
            let inner = &mut *guard;
            inner.shutting_down = true;

            let mut cancelled = Vec::new();
            for entry in inner.ready.drain() {
                cancelled.push(entry.id);
            }
            for (id, timer) in inner.retry_timers.drain() {
                timer.abort();
                cancelled.push(id);
            }
            for id in cancelled {
                if let Some(record) = inner.tasks.get_mut(&id)
                    && matches!(record.status, TaskStatus::Queued | TaskStatus::RetryScheduled)
                {
                    record.cancel.cancel();
                    record.set_status(TaskStatus::Cancelled);
                    inner.stats.total_cancelled += 1;
                    report.cancelled_pending += 1;
                    inner.mark_finished(&id);
                }
            }
            inner.workers.len()
        };

        self.shared.stop_dispatch.cancel();
        let dispatcher = self
            .dispatcher
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handle) = dispatcher {
            let _ = handle.await;
        }

        // Wait for running tasks with timeout
        let deadline = Instant::now() + timeout;
        while self.running_count() > 0 && Instant::now() < deadline {
            tokio::time::sleep(SHUTDOWN_POLL_INTERVAL.min(deadline.saturating_duration_since(Instant::now()))).await;
        }

        // Abandon whatever is still running
        let stragglers: Vec<(TaskId, JoinHandle<()>)> = {
            let mut guard = self.shared.lock();
            let inner = &mut *guard;
            let stragglers: Vec<_> = inner.workers.drain().collect();
            for (id, _) in &stragglers {
                if let Some(record) = inner.tasks.get_mut(id)
                    && record.status == TaskStatus::Running
                {
                    record.cancel.cancel();
                    record.error = Some(PlatformError::Unclassified("abandoned at shutdown".to_string()));
                    record.set_status(TaskStatus::Cancelled);
                    inner.stats.total_cancelled += 1;
                    inner.mark_finished(id);
                }
            }
            stragglers
        };

        if !stragglers.is_empty() {
            warn!("Aborting {} running tasks after shutdown timeout", stragglers.len());
        }
        report.abandoned = stragglers.len();
        for (id, handle) in stragglers {
            handle.abort();
            if let Err(e) = handle.await
                && !e.is_cancelled()
            {
                error!(task_id = %id, error = %e, "Task worker panicked during shutdown");
            }
        }

        report.drained = running_at_start.saturating_sub(report.abandoned);
        info!(
            cancelled_pending = report.cancelled_pending,
            drained = report.drained,
            abandoned = report.abandoned,
            "QueueManager shutdown complete"
        );
        report
    }
}

impl Drop for QueueManager {
    fn drop(&mut self) {
        self.shared.stop_dispatch.cancel();
    }
}
