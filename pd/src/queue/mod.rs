//! Priority task queue
//!
//! Runs tasks highest priority first under a concurrency limit, retrying
//! failures with exponential backoff.

mod config;
mod core;
mod entry;
mod error;
mod task;

pub use config::QueueConfig;
pub use core::QueueManager;
pub use entry::{QueueStats, QueueStatus, ShutdownReport};
pub use error::QueueError;
pub use task::{OperationResult, Task, TaskContext, TaskOperation, TaskSnapshot, TaskStatus, operation_fn};
