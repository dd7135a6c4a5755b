//! Domain types for postdaemon
//!
//! Priorities, platforms, operation classes, task IDs and the typed error
//! set that task operations report.

mod error;
mod id;
mod platform;
mod priority;

pub use error::PlatformError;
pub use id::TaskId;
pub use platform::{OperationClass, Platform};
pub use priority::Priority;
