//! Rate limit accounting
//!
//! Per-platform, per-operation-class request windows. Pure bookkeeping:
//! no I/O and no background timers, windows roll over on the next call.

mod bucket;
mod tracker;

pub use bucket::{BucketStatus, RateLimit, RateLimitDecision};
pub use tracker::RateLimitTracker;
