//! Queue configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Queue manager configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Max tasks running at once
    #[serde(default = "default_max_concurrent_tasks", rename = "max-concurrent-tasks")]
    pub max_concurrent_tasks: usize,

    /// Base retry delay in milliseconds, doubled per retry
    #[serde(default = "default_retry_base_delay_ms", rename = "retry-base-delay-ms")]
    pub retry_base_delay_ms: u64,

    /// Upper bound on a single retry delay in seconds
    #[serde(default = "default_max_backoff_secs", rename = "max-backoff-secs")]
    pub max_backoff_secs: u64,

    /// How long shutdown waits for running tasks in seconds
    #[serde(default = "default_shutdown_timeout_secs", rename = "shutdown-timeout-secs")]
    pub shutdown_timeout_secs: u64,

    /// Finished task records kept for status queries
    #[serde(default = "default_max_retained_results", rename = "max-retained-results")]
    pub max_retained_results: usize,
}

fn default_max_concurrent_tasks() -> usize {
    5
}

fn default_retry_base_delay_ms() -> u64 {
    1_000
}

fn default_max_backoff_secs() -> u64 {
    300
}

fn default_shutdown_timeout_secs() -> u64 {
    30
}

fn default_max_retained_results() -> usize {
    1_000
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: default_max_concurrent_tasks(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            max_backoff_secs: default_max_backoff_secs(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
            max_retained_results: default_max_retained_results(),
        }
    }
}

impl QueueConfig {
    /// Get the base retry delay as a Duration
    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    /// Get the backoff cap as a Duration
    pub fn max_backoff(&self) -> Duration {
        Duration::from_secs(self.max_backoff_secs)
    }

    /// Get the shutdown timeout as a Duration
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    /// Delay before the retry numbered `retry_count`: `base * 2^retry_count`, capped
    pub fn backoff_for(&self, retry_count: u32) -> Duration {
        let cap = self.max_backoff();
        2u32.checked_pow(retry_count)
            .and_then(|factor| self.retry_base_delay().checked_mul(factor))
            .map_or(cap, |delay| delay.min(cap))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = QueueConfig::default();
        assert_eq!(config.max_concurrent_tasks, 5);
        assert_eq!(config.retry_base_delay_ms, 1_000);
        assert_eq!(config.max_backoff_secs, 300);
        assert_eq!(config.shutdown_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_backoff_doubles() {
        let config = QueueConfig::default();
        assert_eq!(config.backoff_for(1), Duration::from_secs(2));
        assert_eq!(config.backoff_for(2), Duration::from_secs(4));
        assert_eq!(config.backoff_for(3), Duration::from_secs(8));
    }

    #[test]
    fn test_backoff_is_capped() {
        let config = QueueConfig {
            max_backoff_secs: 10,
            ..Default::default()
        };
        assert_eq!(config.backoff_for(4), Duration::from_secs(10));
        assert_eq!(config.backoff_for(40), Duration::from_secs(10));
    }

    #[test]
    fn test_deserialize_partial() {
        let yaml = "max-concurrent-tasks: 2\nretry-base-delay-ms: 50\n";
        let config: QueueConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.max_concurrent_tasks, 2);
        assert_eq!(config.retry_base_delay(), Duration::from_millis(50));
        assert_eq!(config.max_backoff_secs, 300);
    }
}
