//! Queue error types

use thiserror::Error;

use crate::domain::TaskId;

/// Errors returned by the queue's submission API
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("Queue is shutting down, not accepting tasks")]
    ShuttingDown,

    #[error("Unknown task: {0}")]
    UnknownTask(TaskId),
}
