//! Platforms and rate-limit operation classes

use serde::{Deserialize, Serialize};

/// External social-media target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Twitter,
    Bluesky,
}

impl Platform {
    pub const ALL: [Platform; 2] = [Platform::Twitter, Platform::Bluesky];
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Twitter => write!(f, "twitter"),
            Self::Bluesky => write!(f, "bluesky"),
        }
    }
}

impl std::str::FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "twitter" | "x" => Ok(Self::Twitter),
            "bluesky" | "bsky" => Ok(Self::Bluesky),
            _ => Err(format!("Unknown platform: {}", s)),
        }
    }
}

/// Rate-limit bucket category, independent of task priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationClass {
    Auth,
    Write,
    Read,
}

impl OperationClass {
    pub const ALL: [OperationClass; 3] = [OperationClass::Auth, OperationClass::Write, OperationClass::Read];
}

impl std::fmt::Display for OperationClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Auth => write!(f, "auth"),
            Self::Write => write!(f, "write"),
            Self::Read => write!(f, "read"),
        }
    }
}
