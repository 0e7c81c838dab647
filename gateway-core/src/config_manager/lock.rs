//! Exclusive file locking for [`super::ConfigManager`] writers (§4.10).
//!
//! A lock is a small JSON sidecar file created with `O_EXCL` semantics
//! (`OpenOptions::create_new`), so two processes racing to acquire the same
//! lock can never both succeed. A lock older than its timeout is considered
//! abandoned (its owning process crashed mid-write) and is cleared so a
//! later writer isn't wedged forever.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;

use crate::error::{Error, Result};

use super::LockFile;

const RETRY_DELAY: Duration = Duration::from_millis(50);
const MAX_ATTEMPTS: u32 = 20;

/// Held exclusive lock over a [`super::ConfigManager`]'s `.env` file.
/// Released by removing the lock file when dropped.
pub struct LockGuard {
    path: PathBuf,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

/// Acquires a single named lock under `dir`, retrying past stale locks.
pub struct FileLock {
    dir: PathBuf,
    timeout: Duration,
}

impl FileLock {
    pub fn new(dir: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            dir: dir.into(),
            timeout,
        }
    }

    /// Acquire the lock for `operation`, retrying with a short delay while
    /// an existing lock is present but not yet stale. Returns
    /// [`Error::ConfigManager`] if the lock is held past [`MAX_ATTEMPTS`]
    /// retries.
    pub fn acquire(&self, operation: &str) -> Result<LockGuard> {
        let path = self.dir.join("config.lock");
        let contents = LockFile {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            operation: operation.to_string(),
            pid: std::process::id(),
        };
        let serialized =
            serde_json::to_vec_pretty(&contents).map_err(|e| Error::ConfigManager(e.to_string()))?;

        for attempt in 0..MAX_ATTEMPTS {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    file.write_all(&serialized)?;
                    return Ok(LockGuard { path });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if self.clear_if_stale(&path)? {
                        continue;
                    }
                    if attempt + 1 == MAX_ATTEMPTS {
                        return Err(Error::ConfigManager(format!(
                            "timed out waiting for config lock ({operation})"
                        )));
                    }
                    std::thread::sleep(RETRY_DELAY);
                }
                Err(e) => return Err(Error::Io(e)),
            }
        }
        Err(Error::ConfigManager(format!(
            "timed out waiting for config lock ({operation})"
        )))
    }

    /// Returns `Ok(true)` if a stale lock was found and removed.
    fn clear_if_stale(&self, path: &Path) -> Result<bool> {
        let Ok(existing) = fs::read_to_string(path) else {
            return Ok(false);
        };
        let Ok(lock) = serde_json::from_str::<LockFile>(&existing) else {
            return Ok(false);
        };
        if is_stale(&lock, self.timeout) {
            let _ = fs::remove_file(path);
            return Ok(true);
        }
        Ok(false)
    }
}

/// A lock is stale once it has outlived `timeout`, or — on Unix — once its
/// owning PID no longer exists under `/proc`.
pub fn is_stale(lock: &LockFile, timeout: Duration) -> bool {
    let age = Utc::now().signed_duration_since(lock.timestamp);
    if age.to_std().map(|d| d > timeout).unwrap_or(true) {
        return true;
    }
    #[cfg(target_os = "linux")]
    {
        !Path::new(&format!("/proc/{}", lock.pid)).exists()
    }
    #[cfg(not(target_os = "linux"))]
    {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_then_drop_releases_the_lock() {
        let dir = tempfile::tempdir().unwrap();
        let lock = FileLock::new(dir.path(), Duration::from_secs(30));
        {
            let _guard = lock.acquire("test").unwrap();
            assert!(dir.path().join("config.lock").exists());
        }
        assert!(!dir.path().join("config.lock").exists());
    }

    #[test]
    fn second_acquire_waits_for_stale_lock_to_clear() {
        let dir = tempfile::tempdir().unwrap();
        let stale = LockFile {
            id: "stale".to_string(),
            timestamp: Utc::now() - chrono::Duration::seconds(120),
            operation: "old".to_string(),
            pid: std::process::id(),
        };
        fs::write(
            dir.path().join("config.lock"),
            serde_json::to_vec(&stale).unwrap(),
        )
        .unwrap();

        let lock = FileLock::new(dir.path(), Duration::from_secs(5));
        let guard = lock.acquire("new").unwrap();
        drop(guard);
    }

    #[test]
    fn is_stale_true_past_timeout() {
        let lock = LockFile {
            id: "a".to_string(),
            timestamp: Utc::now() - chrono::Duration::seconds(100),
            operation: "op".to_string(),
            pid: std::process::id(),
        };
        assert!(is_stale(&lock, Duration::from_secs(10)));
    }

    #[test]
    fn is_stale_false_within_timeout_for_live_pid() {
        let lock = LockFile {
            id: "a".to_string(),
            timestamp: Utc::now(),
            operation: "op".to_string(),
            pid: std::process::id(),
        };
        assert!(!is_stale(&lock, Duration::from_secs(30)));
    }
}
