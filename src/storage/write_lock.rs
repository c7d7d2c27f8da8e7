//! Cross-process write mutex
//!
//! Every storage mutation runs while holding an exclusive OS lock on
//! `data/.write.lock`. Callers re-read state after acquiring it, so two
//! processes can never both see an entry as unposted and both post it.
//!
//! The lock is held per open file, so it is not reentrant: code that already
//! holds a [`WriteGuard`] must not ask for another.

use std::fs::{File, OpenOptions};
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use fs2::FileExt;
use tracing::{debug, warn};

use crate::error::{PostbookError, PostbookResult};

const RETRY_INTERVAL: Duration = Duration::from_millis(10);

pub struct WriteMutex {
    path: PathBuf,
    timeout: Duration,
}

/// Held exclusive lock; released on drop
pub struct WriteGuard {
    file: File,
}

impl WriteMutex {
    pub fn new(path: PathBuf, timeout: Duration) -> Self {
        Self { path, timeout }
    }

    /// Wait up to the configured timeout for the exclusive lock
    pub fn acquire(&self) -> PostbookResult<WriteGuard> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&self.path)
            .map_err(|e| {
                PostbookError::Io(format!("Failed to open {}: {}", self.path.display(), e))
            })?;

        let deadline = Instant::now() + self.timeout;
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => {
                    debug!(path = %self.path.display(), "write lock acquired");
                    return Ok(WriteGuard { file });
                }
                Err(e) if e.kind() == fs2::lock_contended_error().kind() => {
                    if Instant::now() >= deadline {
                        return Err(PostbookError::Timeout(format!(
                            "storage write lock not available after {}ms",
                            self.timeout.as_millis()
                        )));
                    }
                    thread::sleep(RETRY_INTERVAL);
                }
                Err(e) => {
                    return Err(PostbookError::Io(format!(
                        "Failed to lock {}: {}",
                        self.path.display(),
                        e
                    )))
                }
            }
        }
    }
}

impl Drop for WriteGuard {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            warn!(error = %e, "failed to release storage write lock");
        }
    }
}
