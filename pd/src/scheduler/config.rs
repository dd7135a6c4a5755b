//! Scheduler configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::domain::{Platform, Priority};
use crate::queue::QueueConfig;
use crate::ratelimit::RateLimit;

use super::error::SchedulerError;
use super::jobs::TaskKind;

/// Per-platform settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformConfig {
    /// Whether the scheduler submits work for this platform
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Retries granted to each task on this platform
    #[serde(default = "default_retry_limit", rename = "retry-limit")]
    pub retry_limit: u32,

    /// Rate limit accounting window in seconds
    #[serde(default = "default_rate_limit_window_secs", rename = "rate-limit-window-secs")]
    pub rate_limit_window_secs: u64,

    /// Requests allowed per operation class per window
    #[serde(default = "default_max_requests_per_window", rename = "max-requests-per-window")]
    pub max_requests_per_window: u32,

    /// Requests per window held back for high priority work
    #[serde(default = "default_high_priority_reserve", rename = "high-priority-reserve")]
    pub high_priority_reserve: u32,
}

fn default_enabled() -> bool {
    true
}

fn default_retry_limit() -> u32 {
    3
}

fn default_rate_limit_window_secs() -> u64 {
    900
}

fn default_max_requests_per_window() -> u32 {
    50
}

fn default_high_priority_reserve() -> u32 {
    5
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            retry_limit: default_retry_limit(),
            rate_limit_window_secs: default_rate_limit_window_secs(),
            max_requests_per_window: default_max_requests_per_window(),
            high_priority_reserve: default_high_priority_reserve(),
        }
    }
}

impl PlatformConfig {
    /// Get the rate limit window as a Duration
    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_secs(self.rate_limit_window_secs)
    }

    /// Tracker limits for this platform
    pub fn rate_limit(&self) -> RateLimit {
        RateLimit {
            window: self.rate_limit_window(),
            max_requests: self.max_requests_per_window,
            high_priority_reserve: self.high_priority_reserve,
        }
    }
}

/// Settings for every supported platform
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformsConfig {
    #[serde(default)]
    pub twitter: PlatformConfig,

    #[serde(default)]
    pub bluesky: PlatformConfig,
}

impl PlatformsConfig {
    pub fn get(&self, platform: Platform) -> &PlatformConfig {
        match platform {
            Platform::Twitter => &self.twitter,
            Platform::Bluesky => &self.bluesky,
        }
    }

    pub fn get_mut(&mut self, platform: Platform) -> &mut PlatformConfig {
        match platform {
            Platform::Twitter => &mut self.twitter,
            Platform::Bluesky => &mut self.bluesky,
        }
    }

    /// Enabled platforms in declaration order
    pub fn enabled(&self) -> Vec<Platform> {
        Platform::ALL.into_iter().filter(|p| self.get(*p).enabled).collect()
    }
}

/// Queue priority for each job kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KindPriorities {
    #[serde(default = "default_medium", rename = "content-generation")]
    pub content_generation: Priority,

    #[serde(default = "default_high", rename = "reply-check")]
    pub reply_check: Priority,

    #[serde(default = "default_medium", rename = "metrics-collection")]
    pub metrics_collection: Priority,
}

fn default_medium() -> Priority {
    Priority::Medium
}

fn default_high() -> Priority {
    Priority::High
}

impl Default for KindPriorities {
    fn default() -> Self {
        Self {
            content_generation: Priority::Medium,
            reply_check: Priority::High,
            metrics_collection: Priority::Medium,
        }
    }
}

impl KindPriorities {
    pub fn get(&self, kind: TaskKind) -> Priority {
        match kind {
            TaskKind::ContentGeneration => self.content_generation,
            TaskKind::ReplyCheck => self.reply_check,
            TaskKind::MetricsCollection => self.metrics_collection,
        }
    }
}

/// Scheduler configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Seconds between content generation cycles
    #[serde(
        default = "default_content_generation_interval_secs",
        rename = "content-generation-interval-secs"
    )]
    pub content_generation_interval_secs: u64,

    /// Seconds between reply check cycles
    #[serde(default = "default_reply_check_interval_secs", rename = "reply-check-interval-secs")]
    pub reply_check_interval_secs: u64,

    /// Seconds between metrics collection cycles
    #[serde(
        default = "default_metrics_collection_interval_secs",
        rename = "metrics-collection-interval-secs"
    )]
    pub metrics_collection_interval_secs: u64,

    /// Ceiling for intervals stretched by rate limits
    #[serde(default = "default_max_interval_secs", rename = "max-interval-secs")]
    pub max_interval_secs: u64,

    /// Divisor applied to a stretched interval after each successful cycle
    #[serde(default = "default_relax_factor", rename = "relax-factor")]
    pub relax_factor: f64,

    #[serde(default)]
    pub priorities: KindPriorities,

    #[serde(default)]
    pub platforms: PlatformsConfig,

    #[serde(default)]
    pub queue: QueueConfig,
}

fn default_content_generation_interval_secs() -> u64 {
    3600
}

fn default_reply_check_interval_secs() -> u64 {
    300
}

fn default_metrics_collection_interval_secs() -> u64 {
    600
}

fn default_max_interval_secs() -> u64 {
    4 * 3600
}

fn default_relax_factor() -> f64 {
    2.0
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            content_generation_interval_secs: default_content_generation_interval_secs(),
            reply_check_interval_secs: default_reply_check_interval_secs(),
            metrics_collection_interval_secs: default_metrics_collection_interval_secs(),
            max_interval_secs: default_max_interval_secs(),
            relax_factor: default_relax_factor(),
            priorities: KindPriorities::default(),
            platforms: PlatformsConfig::default(),
            queue: QueueConfig::default(),
        }
    }
}

impl SchedulerConfig {
    /// Baseline interval for a job kind
    pub fn interval(&self, kind: TaskKind) -> Duration {
        Duration::from_secs(match kind {
            TaskKind::ContentGeneration => self.content_generation_interval_secs,
            TaskKind::ReplyCheck => self.reply_check_interval_secs,
            TaskKind::MetricsCollection => self.metrics_collection_interval_secs,
        })
    }

    /// Set the baseline interval for a job kind, in whole seconds
    pub fn set_interval(&mut self, kind: TaskKind, interval: Duration) {
        let secs = interval.as_secs();
        match kind {
            TaskKind::ContentGeneration => self.content_generation_interval_secs = secs,
            TaskKind::ReplyCheck => self.reply_check_interval_secs = secs,
            TaskKind::MetricsCollection => self.metrics_collection_interval_secs = secs,
        }
    }

    pub fn priority(&self, kind: TaskKind) -> Priority {
        self.priorities.get(kind)
    }

    /// Get the interval ceiling as a Duration
    pub fn max_interval(&self) -> Duration {
        Duration::from_secs(self.max_interval_secs)
    }

    /// Reject settings the scheduler cannot run with
    pub fn validate(&self) -> Result<(), SchedulerError> {
        for kind in TaskKind::ALL {
            if self.interval(kind).is_zero() {
                return Err(SchedulerError::InvalidConfig(format!("{} interval must be at least 1s", kind)));
            }
        }
        if !self.relax_factor.is_finite() || self.relax_factor < 1.0 {
            return Err(SchedulerError::InvalidConfig(format!(
                "relax-factor must be >= 1.0, got {}",
                self.relax_factor
            )));
        }
        if self.queue.max_concurrent_tasks == 0 {
            return Err(SchedulerError::InvalidConfig(
                "max-concurrent-tasks must be at least 1".to_string(),
            ));
        }
        for platform in Platform::ALL {
            let pc = self.platforms.get(platform);
            if pc.rate_limit_window_secs == 0 {
                return Err(SchedulerError::InvalidConfig(format!(
                    "{}: rate-limit-window-secs must be at least 1",
                    platform
                )));
            }
            if pc.max_requests_per_window == 0 {
                return Err(SchedulerError::InvalidConfig(format!(
                    "{}: max-requests-per-window must be at least 1",
                    platform
                )));
            }
            if pc.high_priority_reserve >= pc.max_requests_per_window {
                return Err(SchedulerError::InvalidConfig(format!(
                    "{}: high-priority-reserve ({}) must be below max-requests-per-window ({})",
                    platform, pc.high_priority_reserve, pc.max_requests_per_window
                )));
            }
        }
        Ok(())
    }
}
