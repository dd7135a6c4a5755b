//! Task identifiers
//!
//! Task IDs are UUIDv7 strings, so they sort by creation time when listed.
//! Example: `01926f3a-8c1e-7b2d-9f00-3c5e2a7d1b40`

use serde::{Deserialize, Serialize};

/// Opaque task identifier assigned at creation
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    /// Generate a fresh, time-ordered ID
    pub fn new() -> Self {
        Self(uuid::Uuid::now_v7().to_string())
    }

    /// Get the full ID string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 8 characters, enough to tell tasks apart in logs
    pub fn short(&self) -> &str {
        &self.0[..8.min(self.0.len())]
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for TaskId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for TaskId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_unique() {
        let a = TaskId::new();
        let b = TaskId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn test_short_prefix() {
        let id = TaskId::from("0192abcd-0000-7000-8000-000000000000");
        assert_eq!(id.short(), "0192abcd");

        let tiny = TaskId::from("abc");
        assert_eq!(tiny.short(), "abc");
    }

    #[test]
    fn test_serde_is_plain_string() {
        let id = TaskId::from("task-1");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"task-1\"");
    }
}
