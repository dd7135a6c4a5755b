//! Scheduler module for the recurring posting jobs
//!
//! The TaskScheduler runs one loop per job kind, turning each tick into queue
//! tasks per enabled platform. Rate limits stretch a loop's interval and
//! revoked credentials switch a platform off.

mod config;
mod core;
mod error;
mod interval;
mod jobs;

pub use config::{KindPriorities, PlatformConfig, PlatformsConfig, SchedulerConfig};
pub use core::{CycleReport, LoopStatus, PlatformOutcome, TaskScheduler};
pub use error::SchedulerError;
pub use interval::AdaptiveInterval;
pub use jobs::{DryRunJobs, Job, JobHandler, TaskKind};
