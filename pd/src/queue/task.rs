//! Task types for the queue

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::domain::{PlatformError, Priority, TaskId};

/// What an operation hands back to the queue
pub type OperationResult = Result<serde_json::Value, PlatformError>;

/// An external asynchronous action the queue runs on behalf of a task.
///
/// The queue treats it as opaque: it may be called once per attempt, so it
/// must be re-runnable. Any closure `Fn(TaskContext) -> impl Future` works.
#[async_trait]
pub trait TaskOperation: Send + Sync {
    async fn run(&self, ctx: TaskContext) -> OperationResult;
}

#[async_trait]
impl<F, Fut> TaskOperation for F
where
    F: Fn(TaskContext) -> Fut + Send + Sync,
    Fut: Future<Output = OperationResult> + Send + 'static,
{
    async fn run(&self, ctx: TaskContext) -> OperationResult {
        (self)(ctx).await
    }
}

/// Pin down a closure's signature so it can be used as a [`TaskOperation`]
/// without annotating its argument and error types.
pub fn operation_fn<F, Fut>(f: F) -> F
where
    F: Fn(TaskContext) -> Fut + Send + Sync,
    Fut: Future<Output = OperationResult> + Send + 'static,
{
    f
}

/// Per-attempt context passed to an operation
#[derive(Debug, Clone)]
pub struct TaskContext {
    task_id: TaskId,
    attempt: u32,
    cancel: CancellationToken,
}

impl TaskContext {
    pub(crate) fn new(task_id: TaskId, attempt: u32, cancel: CancellationToken) -> Self {
        Self {
            task_id,
            attempt,
            cancel,
        }
    }

    pub fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    /// 1-based attempt number
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Token an operation may watch to stop early. Cancellation of running
    /// work is cooperative: the queue never interrupts an operation between
    /// its own await points except when shutdown abandons it.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Task lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Queued,
    Running,
    RetryScheduled,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    /// Completed, Failed and Cancelled are final
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Queued => write!(f, "queued"),
            Self::Running => write!(f, "running"),
            Self::RetryScheduled => write!(f, "retry_scheduled"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// One schedulable, retryable, cancellable unit of work
pub struct Task {
    id: TaskId,
    priority: Priority,
    label: String,
    operation: Arc<dyn TaskOperation>,
    created_at: Instant,
    created_at_utc: DateTime<Utc>,
    max_retries: u32,
}

impl Task {
    /// Default retry ceiling for tasks that don't set one
    pub const DEFAULT_MAX_RETRIES: u32 = 3;

    /// Create a task around an operation
    pub fn new(priority: Priority, operation: impl TaskOperation + 'static) -> Self {
        Self::from_arc(priority, Arc::new(operation))
    }

    /// Create a task around a shared operation
    pub fn from_arc(priority: Priority, operation: Arc<dyn TaskOperation>) -> Self {
        let id = TaskId::new();
        Self {
            label: id.short().to_string(),
            id,
            priority,
            operation,
            created_at: Instant::now(),
            created_at_utc: Utc::now(),
            max_retries: Self::DEFAULT_MAX_RETRIES,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn id(&self) -> &TaskId {
        &self.id
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub(crate) fn operation(&self) -> Arc<dyn TaskOperation> {
        self.operation.clone()
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("priority", &self.priority)
            .field("label", &self.label)
            .field("max_retries", &self.max_retries)
            .finish_non_exhaustive()
    }
}

/// Point-in-time view of a task
#[derive(Debug, Clone, Serialize)]
pub struct TaskSnapshot {
    pub id: TaskId,
    pub label: String,
    pub priority: Priority,
    pub status: TaskStatus,
    pub retry_count: u32,
    pub max_retries: u32,
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<serde_json::Value>,
    pub error: Option<PlatformError>,
}

/// Mutable execution state the queue keeps for each task
pub(crate) struct TaskRecord {
    pub task: Task,
    pub seq: u64,
    pub status: TaskStatus,
    pub retry_count: u32,
    pub attempts: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<serde_json::Value>,
    pub error: Option<PlatformError>,
    pub cancel: CancellationToken,
    status_tx: watch::Sender<TaskStatus>,
}

impl TaskRecord {
    pub fn new(task: Task, seq: u64) -> Self {
        let (status_tx, _) = watch::channel(TaskStatus::Queued);
        Self {
            task,
            seq,
            status: TaskStatus::Queued,
            retry_count: 0,
            attempts: 0,
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
            cancel: CancellationToken::new(),
            status_tx,
        }
    }

    /// Move to a new state and wake anyone waiting on this task
    pub fn set_status(&mut self, status: TaskStatus) {
        self.status = status;
        if status.is_terminal() {
            self.completed_at = Some(Utc::now());
        }
        self.status_tx.send_replace(status);
    }

    pub fn subscribe(&self) -> watch::Receiver<TaskStatus> {
        self.status_tx.subscribe()
    }

    pub fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot {
            id: self.task.id.clone(),
            label: self.task.label.clone(),
            priority: self.task.priority,
            status: self.status,
            retry_count: self.retry_count,
            max_retries: self.task.max_retries,
            attempts: self.attempts,
            created_at: self.task.created_at_utc,
            started_at: self.started_at,
            completed_at: self.completed_at,
            result: self.result.clone(),
            error: self.error.clone(),
        }
    }
}
