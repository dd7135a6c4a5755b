//! Rate limit tracker implementation

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use crate::domain::{OperationClass, Platform, PlatformError, Priority};

use super::bucket::{Bucket, BucketStatus, RateLimit, RateLimitDecision};

/// Internal state protected by mutex
#[derive(Default)]
struct TrackerInner {
    limits: HashMap<Platform, RateLimit>,
    buckets: HashMap<(Platform, OperationClass), Bucket>,
}

impl TrackerInner {
    fn limit(&self, platform: Platform) -> RateLimit {
        self.limits.get(&platform).copied().unwrap_or_default()
    }

    fn bucket(&mut self, platform: Platform, class: OperationClass, now: Instant) -> (&mut Bucket, RateLimit) {
        let limit = self.limit(platform);
        let bucket = self
            .buckets
            .entry((platform, class))
            .or_insert_with(|| Bucket::new(now));
        bucket.roll(&limit, now);
        (bucket, limit)
    }
}

/// Tracks request capacity per platform and operation class.
///
/// Capacity is consumed when it is reserved, not when the request succeeds:
/// the remote API may rate-limit us regardless of local bookkeeping, so a
/// reservation counts as an attempt. All methods are synchronous and hold the
/// lock only for the bookkeeping itself.
pub struct RateLimitTracker {
    inner: Mutex<TrackerInner>,
}

impl RateLimitTracker {
    /// Create a tracker with the given per-platform limits
    pub fn new(limits: impl IntoIterator<Item = (Platform, RateLimit)>) -> Self {
        let limits: HashMap<_, _> = limits.into_iter().collect();
        debug!(?limits, "RateLimitTracker::new: called");
        Self {
            inner: Mutex::new(TrackerInner {
                limits,
                buckets: HashMap::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, TrackerInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Replace the limits for one platform. Existing usage is kept.
    pub fn configure(&self, platform: Platform, limit: RateLimit) {
        debug!(%platform, ?limit, "RateLimitTracker::configure: called");
        self.lock().limits.insert(platform, limit);
    }

    /// Current limits for a platform
    pub fn limit(&self, platform: Platform) -> RateLimit {
        self.lock().limit(platform)
    }

    /// Reserve one request against the full window capacity
    pub fn check_and_reserve(&self, platform: Platform, class: OperationClass) -> RateLimitDecision {
        self.check_and_reserve_for(platform, class, Priority::High)
    }

    /// Reserve one request on behalf of work at `priority`.
    ///
    /// Anything below `High` is denied once only the high-priority reserve is
    /// left, so background polling backs off before replies do.
    pub fn check_and_reserve_for(
        &self,
        platform: Platform,
        class: OperationClass,
        priority: Priority,
    ) -> RateLimitDecision {
        let now = Instant::now();
        let mut inner = self.lock();
        let (bucket, limit) = inner.bucket(platform, class, now);

        if let Some(blocked) = bucket.blocked_for(now) {
            bucket.denied += 1;
            debug!(%platform, %class, ?blocked, "RateLimitTracker::check_and_reserve_for: blocked by platform");
            return RateLimitDecision::Denied {
                retry_after: blocked,
                reserved: false,
            };
        }

        let remaining = bucket.remaining(&limit);
        let floor = if priority == Priority::High {
            0
        } else {
            limit.high_priority_reserve
        };

        if remaining <= floor {
            bucket.denied += 1;
            let retry_after = bucket.reset_in(&limit, now);
            debug!(%platform, %class, %priority, remaining, ?retry_after, "RateLimitTracker::check_and_reserve_for: denied");
            return RateLimitDecision::Denied {
                retry_after,
                reserved: remaining > 0,
            };
        }

        bucket.used += 1;
        let remaining = bucket.remaining(&limit);
        debug!(%platform, %class, %priority, remaining, "RateLimitTracker::check_and_reserve_for: allowed");
        RateLimitDecision::Allowed { remaining }
    }

    /// Note a successful request. Capacity was already taken at reservation.
    pub fn record_success(&self, platform: Platform, class: OperationClass) {
        let now = Instant::now();
        let mut inner = self.lock();
        let (bucket, _) = inner.bucket(platform, class, now);
        bucket.successes += 1;
    }

    /// Note a failed request.
    ///
    /// A rate-limit error from the platform saturates the bucket and blocks it
    /// for at least the reported backoff.
    pub fn record_failure(&self, platform: Platform, class: OperationClass, error: &PlatformError) {
        let now = Instant::now();
        let mut inner = self.lock();
        let (bucket, limit) = inner.bucket(platform, class, now);
        bucket.failures += 1;

        if let Some(retry_after) = error.retry_after() {
            warn!(%platform, %class, ?retry_after, "Platform reported rate limit");
            bucket.block(&limit, now + retry_after);
        }
    }

    /// Mark a bucket exhausted until at least `retry_after` from now,
    /// without counting a failure.
    pub fn block(&self, platform: Platform, class: OperationClass, retry_after: Duration) {
        debug!(%platform, %class, ?retry_after, "RateLimitTracker::block: called");
        let now = Instant::now();
        let mut inner = self.lock();
        let (bucket, limit) = inner.bucket(platform, class, now);
        bucket.block(&limit, now + retry_after);
    }

    /// Current state of one bucket
    pub fn status(&self, platform: Platform, class: OperationClass) -> BucketStatus {
        let now = Instant::now();
        let mut inner = self.lock();
        let (bucket, limit) = inner.bucket(platform, class, now);
        let reset_in = bucket
            .blocked_for(now)
            .map_or_else(|| bucket.reset_in(&limit, now), |blocked| blocked.max(bucket.reset_in(&limit, now)));

        BucketStatus {
            platform,
            class,
            limit: limit.max_requests,
            used: bucket.used,
            remaining: bucket.remaining(&limit),
            reset_in,
            successes: bucket.successes,
            failures: bucket.failures,
            denied: bucket.denied,
        }
    }

    /// Status of every bucket touched so far, ordered by platform then class
    pub fn snapshot(&self) -> Vec<BucketStatus> {
        let mut keys: Vec<_> = self.lock().buckets.keys().copied().collect();
        keys.sort();
        keys.into_iter()
            .map(|(platform, class)| self.status(platform, class))
            .collect()
    }
}

impl Default for RateLimitTracker {
    fn default() -> Self {
        Self::new(std::iter::empty())
    }
}
