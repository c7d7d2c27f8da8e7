//! Lock keys, holders and status snapshots

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::config::paths::escape_component;

/// A lockable resource: the general ledger or one login's data
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "kind", content = "name")]
pub enum LockKey {
    Gl,
    Login(String),
}

impl LockKey {
    pub fn login(name: impl Into<String>) -> Self {
        Self::Login(name.into())
    }

    /// File stem of the lock record
    ///
    /// Login names are escaped, so any login maps to a single flat file name
    /// that never collides with `@gl`.
    pub fn file_stem(&self) -> String {
        match self {
            Self::Gl => "@gl".to_string(),
            Self::Login(name) => format!("login-{}", escape_component(name)),
        }
    }
}

impl fmt::Display for LockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gl => write!(f, "general ledger"),
            Self::Login(name) => write!(f, "login '{}'", name),
        }
    }
}

/// Contents of a lock record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockHolder {
    pub owner: String,
    pub purpose: String,

    /// Process that wrote the record
    pub pid: u32,

    pub acquired_at: DateTime<Utc>,
}

impl LockHolder {
    pub fn new(owner: impl Into<String>, purpose: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            purpose: purpose.into(),
            pid: std::process::id(),
            acquired_at: Utc::now(),
        }
    }

    /// Whether the record has outlived the given time-to-live
    pub fn is_stale(&self, ttl: chrono::Duration, now: DateTime<Utc>) -> bool {
        now - self.acquired_at > ttl
    }
}

/// Observable state of one key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "state")]
pub enum LockStatus {
    Unlocked,
    Locked { owner: String, purpose: String },
}

impl LockStatus {
    pub fn is_locked(&self) -> bool {
        matches!(self, Self::Locked { .. })
    }

    /// Locked by anyone other than `owner`
    pub fn is_held_by_other(&self, owner: &str) -> bool {
        matches!(self, Self::Locked { owner: holder, .. } if holder != owner)
    }
}

impl From<&LockHolder> for LockStatus {
    fn from(holder: &LockHolder) -> Self {
        Self::Locked {
            owner: holder.owner.clone(),
            purpose: holder.purpose.clone(),
        }
    }
}

impl fmt::Display for LockStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unlocked => write!(f, "unlocked"),
            Self::Locked { owner, purpose } => write!(f, "locked by {} ({})", owner, purpose),
        }
    }
}

/// Advisory view of the GL lock and a set of login locks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockSnapshot {
    pub gl: LockStatus,
    pub logins: BTreeMap<String, LockStatus>,
}

impl LockSnapshot {
    pub fn login(&self, name: &str) -> LockStatus {
        self.logins.get(name).cloned().unwrap_or(LockStatus::Unlocked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_stems_are_flat_and_distinct() {
        assert_eq!(LockKey::Gl.file_stem(), "@gl");
        assert_eq!(LockKey::login("chase").file_stem(), "login-chase");
        assert_eq!(LockKey::login("a/b").file_stem(), "login-a%2Fb");
        assert_eq!(LockKey::login("@gl").file_stem(), "login-%40gl");
    }

    #[test]
    fn test_staleness() {
        let mut holder = LockHolder::new("me", "post");
        let now = holder.acquired_at;
        assert!(!holder.is_stale(chrono::Duration::seconds(60), now));

        holder.acquired_at = now - chrono::Duration::seconds(120);
        assert!(holder.is_stale(chrono::Duration::seconds(60), now));
    }

    #[test]
    fn test_status_ownership() {
        let status = LockStatus::Locked {
            owner: "scraper".into(),
            purpose: "scrape".into(),
        };
        assert!(status.is_held_by_other("poster"));
        assert!(!status.is_held_by_other("scraper"));
        assert!(!LockStatus::Unlocked.is_held_by_other("poster"));
    }
}
