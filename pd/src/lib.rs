//! PostDaemon - task orchestration core for automated social posting
//!
//! A priority task queue with bounded concurrency and retry/backoff, a
//! per-platform rate limit tracker, and a scheduler that drives the recurring
//! content, reply and metrics jobs on top of them.
//!
//! # Modules
//!
//! - [`domain`] - Shared identifiers, priorities, platforms and errors
//! - [`ratelimit`] - Per-platform, per-operation-class request accounting
//! - [`queue`] - Priority task queue with concurrency limit and retries
//! - [`scheduler`] - Recurring job loops with adaptive intervals
//! - [`config`] - Configuration types and loading
//! - [`cli`] - Command-line interface

pub mod cli;
pub mod config;
pub mod domain;
pub mod queue;
pub mod ratelimit;
pub mod scheduler;

// Re-export commonly used types
pub use config::{Config, DryRunConfig};
pub use domain::{OperationClass, Platform, PlatformError, Priority, TaskId};
pub use queue::{
    OperationResult, QueueConfig, QueueError, QueueManager, QueueStatus, ShutdownReport, Task, TaskContext,
    TaskOperation, TaskSnapshot, TaskStatus, operation_fn,
};
pub use ratelimit::{BucketStatus, RateLimit, RateLimitDecision, RateLimitTracker};
pub use scheduler::{
    CycleReport, DryRunJobs, Job, JobHandler, PlatformConfig, SchedulerConfig, SchedulerError, TaskKind, TaskScheduler,
};
