//! Platform operation error types

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::OperationClass;

/// Errors a task operation can report back to the queue.
///
/// This is a closed set: callers classify by variant, never by message text.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum PlatformError {
    #[error("Rate limited on {class} operations, retry after {retry_after:?}")]
    RateLimited { class: OperationClass, retry_after: Duration },

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Unclassified(String),
}

impl PlatformError {
    /// Wrap any displayable error as an unclassified failure
    pub fn unclassified(err: impl std::fmt::Display) -> Self {
        PlatformError::Unclassified(err.to_string())
    }

    /// Check if this is a rate limit error
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, PlatformError::RateLimited { .. })
    }

    /// Get the retry duration if this is a rate limit error
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            PlatformError::RateLimited { retry_after, .. } => Some(*retry_after),
            _ => None,
        }
    }
}

impl From<eyre::Report> for PlatformError {
    fn from(err: eyre::Report) -> Self {
        PlatformError::Unclassified(format!("{:#}", err))
    }
}
