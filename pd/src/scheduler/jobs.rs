//! Recurring job kinds and the handler seam for external collaborators

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::domain::{OperationClass, Platform, PlatformError};
use crate::queue::{OperationResult, TaskContext};

/// The three recurring jobs the scheduler drives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    ContentGeneration,
    ReplyCheck,
    MetricsCollection,
}

impl TaskKind {
    pub const ALL: [TaskKind; 3] = [
        TaskKind::ContentGeneration,
        TaskKind::ReplyCheck,
        TaskKind::MetricsCollection,
    ];

    /// Which rate-limit bucket this job draws from
    pub fn operation_class(&self) -> OperationClass {
        match self {
            Self::ContentGeneration => OperationClass::Write,
            Self::ReplyCheck | Self::MetricsCollection => OperationClass::Read,
        }
    }
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ContentGeneration => write!(f, "content_generation"),
            Self::ReplyCheck => write!(f, "reply_check"),
            Self::MetricsCollection => write!(f, "metrics_collection"),
        }
    }
}

impl std::str::FromStr for TaskKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "content_generation" | "content" => Ok(Self::ContentGeneration),
            "reply_check" | "replies" => Ok(Self::ReplyCheck),
            "metrics_collection" | "metrics" => Ok(Self::MetricsCollection),
            _ => Err(format!("Unknown task kind: {}", s)),
        }
    }
}

/// One unit of scheduled work: a job kind aimed at one platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Job {
    pub kind: TaskKind,
    pub platform: Platform,
}

impl std::fmt::Display for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind, self.platform)
    }
}

/// Performs scheduled jobs against the outside world.
///
/// Content generation, platform clients and persistence all live behind this
/// trait. Implementations classify failures into [`PlatformError`] so the
/// scheduler can react to rate limits and revoked credentials.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn run(&self, job: Job, ctx: TaskContext) -> OperationResult;
}

/// Handler that only logs what it would do
#[derive(Debug, Clone, Default)]
pub struct DryRunJobs {
    delay: Duration,
}

impl DryRunJobs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate request latency
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl JobHandler for DryRunJobs {
    async fn run(&self, job: Job, ctx: TaskContext) -> OperationResult {
        debug!(%job, task_id = %ctx.task_id(), attempt = ctx.attempt(), "DryRunJobs::run: called");

        if !self.delay.is_zero() {
            tokio::select! {
                _ = ctx.cancellation().cancelled() => {
                    return Err(PlatformError::unclassified("dry run cancelled"));
                }
                _ = tokio::time::sleep(self.delay) => {}
            }
        }

        info!(%job, "Dry run: would perform {} on {}", job.kind, job.platform);
        Ok(serde_json::json!({
            "kind": job.kind,
            "platform": job.platform,
            "attempt": ctx.attempt(),
            "dry_run": true,
        }))
    }
}
