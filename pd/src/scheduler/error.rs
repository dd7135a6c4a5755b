//! Scheduler error types

use thiserror::Error;

use crate::queue::QueueError;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Invalid scheduler config: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Queue(#[from] QueueError),
}
