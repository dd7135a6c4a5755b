//! Rate limit bucket types

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::domain::{OperationClass, Platform};

/// Capacity rules for one platform, applied to each operation class separately
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimit {
    /// Accounting window length
    pub window: Duration,

    /// Requests allowed per class within one window
    pub max_requests: u32,

    /// Requests per window only `High` priority work may consume
    pub high_priority_reserve: u32,
}

impl Default for RateLimit {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(900),
            max_requests: 50,
            high_priority_reserve: 0,
        }
    }
}

/// Outcome of a reservation attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDecision {
    /// Capacity was reserved
    Allowed { remaining: u32 },

    /// No capacity until `retry_after` has elapsed.
    ///
    /// `reserved` is set when capacity is left but only for `High` work. Such
    /// a denial says nothing about the platform, so the bucket must not be
    /// blocked because of it.
    Denied { retry_after: Duration, reserved: bool },
}

impl RateLimitDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateLimitDecision::Allowed { .. })
    }
}

/// Snapshot of one bucket for status display
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BucketStatus {
    pub platform: Platform,
    pub class: OperationClass,
    pub limit: u32,
    pub used: u32,
    pub remaining: u32,
    pub reset_in: Duration,
    pub successes: u64,
    pub failures: u64,
    pub denied: u64,
}

/// Accounting state for one platform x operation-class pair
#[derive(Debug, Clone)]
pub(crate) struct Bucket {
    pub window_start: Instant,
    pub used: u32,
    /// Set when the platform itself reported a rate limit
    pub blocked_until: Option<Instant>,
    pub successes: u64,
    pub failures: u64,
    pub denied: u64,
}

impl Bucket {
    pub fn new(now: Instant) -> Self {
        Self {
            window_start: now,
            used: 0,
            blocked_until: None,
            successes: 0,
            failures: 0,
            denied: 0,
        }
    }

    /// Reset the window if it has elapsed. Windows roll lazily; there is no timer.
    pub fn roll(&mut self, limit: &RateLimit, now: Instant) {
        if now >= self.window_start + limit.window {
            self.used = 0;
            self.window_start = now;
        }
        if self.blocked_until.is_some_and(|until| now >= until) {
            self.blocked_until = None;
        }
    }

    pub fn remaining(&self, limit: &RateLimit) -> u32 {
        limit.max_requests.saturating_sub(self.used)
    }

    pub fn reset_in(&self, limit: &RateLimit, now: Instant) -> Duration {
        (self.window_start + limit.window).saturating_duration_since(now)
    }

    /// Saturate the window and refuse requests until `until`
    pub fn block(&mut self, limit: &RateLimit, until: Instant) {
        self.used = self.used.max(limit.max_requests);
        self.blocked_until = Some(self.blocked_until.map_or(until, |prev| prev.max(until)));
    }

    /// Time until requests may be attempted again, ignoring capacity
    pub fn blocked_for(&self, now: Instant) -> Option<Duration> {
        self.blocked_until
            .map(|until| until.saturating_duration_since(now))
            .filter(|d| !d.is_zero())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remaining_saturates() {
        let limit = RateLimit {
            max_requests: 2,
            ..Default::default()
        };
        let mut bucket = Bucket::new(Instant::now());
        bucket.used = 5;
        assert_eq!(bucket.remaining(&limit), 0);
    }

    #[test]
    fn test_roll_resets_after_window() {
        let limit = RateLimit {
            window: Duration::from_secs(10),
            max_requests: 3,
            high_priority_reserve: 0,
        };
        let start = Instant::now();
        let mut bucket = Bucket::new(start);
        bucket.used = 3;

        bucket.roll(&limit, start + Duration::from_secs(9));
        assert_eq!(bucket.used, 3);
        assert_eq!(bucket.reset_in(&limit, start + Duration::from_secs(9)), Duration::from_secs(1));

        let later = start + Duration::from_secs(10);
        bucket.roll(&limit, later);
        assert_eq!(bucket.used, 0);
        assert_eq!(bucket.window_start, later);
    }

    #[test]
    fn test_blocked_until_clears() {
        let limit = RateLimit::default();
        let start = Instant::now();
        let mut bucket = Bucket::new(start);
        bucket.blocked_until = Some(start + Duration::from_secs(5));

        assert_eq!(bucket.blocked_for(start), Some(Duration::from_secs(5)));

        bucket.roll(&limit, start + Duration::from_secs(5));
        assert!(bucket.blocked_until.is_none());
        assert_eq!(bucket.blocked_for(start + Duration::from_secs(5)), None);
    }
}
