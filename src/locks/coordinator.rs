//! Per-login and GL lock records

use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::config::PostbookPaths;
use crate::error::{PostbookError, PostbookResult};
use crate::models::{LockHolder, LockKey, LockSnapshot, LockStatus};

use super::notifier::{LockNotifier, LockStatusChanged};

/// Owner used for records whose contents cannot be read
const UNKNOWN_HOLDER: &str = "unknown";

/// Result of reading a lock record from disk
enum Record {
    Absent,
    Held(LockHolder),
    /// Present but unreadable, e.g. caught mid-write
    Unreadable { age: Option<Duration> },
}

/// Grants and releases lock records
///
/// A key is held by at most one owner. Acquiring a key you already own
/// succeeds without touching the record; records older than the configured
/// time-to-live are treated as abandoned and broken by the next acquirer.
pub struct LockCoordinator {
    paths: PostbookPaths,
    ttl: Duration,
    notifier: LockNotifier,
}

impl LockCoordinator {
    pub fn new(paths: PostbookPaths, ttl: Duration) -> Self {
        Self {
            paths,
            ttl,
            notifier: LockNotifier::new(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LockStatusChanged> {
        self.notifier.subscribe()
    }

    fn path(&self, key: &LockKey) -> PathBuf {
        self.paths.lock_file(key)
    }

    fn read(&self, key: &LockKey) -> PostbookResult<Record> {
        let path = self.path(key);
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Record::Absent),
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_reader::<_, LockHolder>(BufReader::new(file)) {
            Ok(holder) => Ok(Record::Held(holder)),
            Err(_) => {
                let age = fs::metadata(&path)
                    .and_then(|m| m.modified())
                    .ok()
                    .and_then(|modified| modified.elapsed().ok());
                Ok(Record::Unreadable { age })
            }
        }
    }

    fn is_stale(&self, record: &Record) -> bool {
        let ttl = chrono::Duration::from_std(self.ttl)
            .unwrap_or_else(|_| chrono::Duration::weeks(52 * 100));
        match record {
            Record::Absent => false,
            Record::Held(holder) => holder.is_stale(ttl, Utc::now()),
            Record::Unreadable { age } => age.is_some_and(|age| age > self.ttl),
        }
    }

    /// Current holder of a key, ignoring abandoned records
    pub fn holder(&self, key: &LockKey) -> PostbookResult<Option<LockHolder>> {
        let record = self.read(key)?;
        if self.is_stale(&record) {
            return Ok(None);
        }
        Ok(match record {
            Record::Absent => None,
            Record::Held(holder) => Some(holder),
            Record::Unreadable { .. } => Some(LockHolder::new(UNKNOWN_HOLDER, UNKNOWN_HOLDER)),
        })
    }

    pub fn status(&self, key: &LockKey) -> PostbookResult<LockStatus> {
        Ok(self
            .holder(key)?
            .map(|h| LockStatus::from(&h))
            .unwrap_or(LockStatus::Unlocked))
    }

    /// Advisory view of the GL lock and the given logins' locks
    pub fn snapshot<S: AsRef<str>>(&self, logins: &[S]) -> PostbookResult<LockSnapshot> {
        let mut snapshot = LockSnapshot {
            gl: self.status(&LockKey::Gl)?,
            logins: Default::default(),
        };
        for login in logins {
            let login = login.as_ref();
            snapshot
                .logins
                .insert(login.to_string(), self.status(&LockKey::login(login))?);
        }
        Ok(snapshot)
    }

    /// Take a key for `owner`
    ///
    /// Returns `true` when a new record was written and `false` when `owner`
    /// already held the key. Fails `AlreadyLocked` naming the current holder
    /// otherwise.
    pub fn acquire(&self, key: &LockKey, owner: &str, purpose: &str) -> PostbookResult<bool> {
        if owner.trim().is_empty() {
            return Err(PostbookError::Validation("Lock owner cannot be empty".into()));
        }
        let path = self.path(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        // A second attempt is only needed after breaking an abandoned record
        for _ in 0..2 {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    let holder = LockHolder::new(owner, purpose);
                    let written = serde_json::to_vec(&holder)
                        .map_err(PostbookError::from)
                        .and_then(|bytes| {
                            file.write_all(&bytes)?;
                            file.sync_all()?;
                            Ok(())
                        });
                    if let Err(e) = written {
                        let _ = fs::remove_file(&path);
                        return Err(e);
                    }
                    debug!(key = %key, owner, purpose, "lock acquired");
                    self.notifier.notify();
                    return Ok(true);
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    let record = self.read(key)?;
                    if self.is_stale(&record) {
                        let previous = match &record {
                            Record::Held(h) => h.owner.as_str(),
                            _ => UNKNOWN_HOLDER,
                        };
                        warn!(key = %key, previous_owner = previous, "breaking stale lock");
                        self.remove_record(&path)?;
                        continue;
                    }
                    match record {
                        // Released between our create and our read
                        Record::Absent => continue,
                        Record::Held(holder) if holder.owner == owner => return Ok(false),
                        Record::Held(holder) => {
                            return Err(PostbookError::AlreadyLocked {
                                key: key.to_string(),
                                owner: holder.owner,
                                purpose: holder.purpose,
                            })
                        }
                        Record::Unreadable { .. } => {
                            return Err(PostbookError::AlreadyLocked {
                                key: key.to_string(),
                                owner: UNKNOWN_HOLDER.into(),
                                purpose: UNKNOWN_HOLDER.into(),
                            })
                        }
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(PostbookError::AlreadyLocked {
            key: key.to_string(),
            owner: UNKNOWN_HOLDER.into(),
            purpose: UNKNOWN_HOLDER.into(),
        })
    }

    /// Release a key held by `owner`
    ///
    /// Releasing an unheld key, or one held by somebody else, does nothing.
    pub fn release(&self, key: &LockKey, owner: &str) -> PostbookResult<()> {
        match self.read(key)? {
            Record::Held(holder) if holder.owner == owner => {
                self.remove_record(&self.path(key))?;
                debug!(key = %key, owner, "lock released");
                self.notifier.notify();
            }
            Record::Absent => {}
            _ => debug!(key = %key, owner, "release ignored, not the holder"),
        }
        Ok(())
    }

    /// Remove a key's record whoever holds it, returning the old holder
    pub fn break_lock(&self, key: &LockKey) -> PostbookResult<Option<LockHolder>> {
        let previous = match self.read(key)? {
            Record::Absent => return Ok(None),
            Record::Held(holder) => holder,
            Record::Unreadable { .. } => LockHolder::new(UNKNOWN_HOLDER, UNKNOWN_HOLDER),
        };
        self.remove_record(&self.path(key))?;
        info!(key = %key, previous_owner = %previous.owner, "lock broken");
        self.notifier.notify();
        Ok(Some(previous))
    }

    fn remove_record(&self, path: &Path) -> PostbookResult<()> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Hold a key for the lifetime of the returned guard
    ///
    /// Engine operations use this: a key held by another owner fails
    /// `Locked` with the holder's owner and purpose. The guard releases the
    /// key on drop only if this call was the one that took it.
    pub fn hold(&self, key: LockKey, owner: &str, purpose: &str) -> PostbookResult<LockGuard<'_>> {
        match self.acquire(&key, owner, purpose) {
            Ok(acquired) => Ok(LockGuard {
                coordinator: self,
                key,
                owner: owner.to_string(),
                acquired,
            }),
            Err(PostbookError::AlreadyLocked {
                key,
                owner,
                purpose,
            }) => Err(PostbookError::Locked {
                key,
                owner: Some(owner),
                purpose: Some(purpose),
            }),
            Err(e) => Err(e),
        }
    }
}

/// Scoped ownership of one lock key
pub struct LockGuard<'a> {
    coordinator: &'a LockCoordinator,
    key: LockKey,
    owner: String,
    acquired: bool,
}

impl LockGuard<'_> {
    pub fn key(&self) -> &LockKey {
        &self.key
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        if self.acquired {
            if let Err(e) = self.coordinator.release(&self.key, &self.owner) {
                warn!(key = %self.key, error = %e, "failed to release lock");
            }
        }
    }
}
