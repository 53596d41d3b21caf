//! Lock acquisition over a lock file.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use fs2::FileExt;
use log::{debug, warn};

use crate::LockError;

/// Default delay between two acquisition attempts while the lock is contended.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// An exclusive lock keyed by a lock-file path.
///
/// The struct itself holds no OS resources; every call to one of the
/// `acquire` methods opens the lock file and returns a guard owning the handle.
#[derive(Debug, Clone)]
pub struct FileLock {
    path: PathBuf,
    timeout: Option<Duration>,
    poll_interval: Duration,
}

impl FileLock {
    /// Create a lock for `path`. Waits forever unless a timeout is set.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            timeout: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Give up with [`LockError::Timeout`] after waiting this long.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Delay between attempts while another holder owns the lock.
    #[must_use]
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Path of the lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Take the lock if nobody holds it, without waiting.
    pub fn try_acquire(&self) -> Result<Option<FileLockGuard>, LockError> {
        let file = self.open()?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(self.guard(file))),
            Err(e) if is_contended(&e) => Ok(None),
            Err(e) => Err(LockError::Lock {
                path: self.path.clone(),
                source: e,
            }),
        }
    }

    /// Take the lock, blocking the current thread while it is held elsewhere.
    pub fn acquire(&self) -> Result<FileLockGuard, LockError> {
        let Some(timeout) = self.timeout else {
            let file = self.open()?;
            file.lock_exclusive().map_err(|e| LockError::Lock {
                path: self.path.clone(),
                source: e,
            })?;
            return Ok(self.guard(file));
        };

        let start = Instant::now();
        loop {
            if let Some(guard) = self.try_acquire()? {
                return Ok(guard);
            }
            if start.elapsed() >= timeout {
                return Err(self.timed_out(start));
            }
            std::thread::sleep(self.poll_interval);
        }
    }

    /// Take the lock from async code.
    ///
    /// Polls the lock and sleeps on the tokio timer between attempts, so the
    /// calling task yields instead of blocking a runtime thread. Dropping the
    /// returned future stops waiting; a guard that was already handed out is
    /// released on drop as usual.
    pub async fn acquire_async(&self) -> Result<FileLockGuard, LockError> {
        let start = Instant::now();
        let mut logged = false;
        loop {
            if let Some(guard) = self.try_acquire()? {
                return Ok(guard);
            }
            if let Some(timeout) = self.timeout {
                if start.elapsed() >= timeout {
                    return Err(self.timed_out(start));
                }
            }
            if !logged {
                debug!("Waiting for lock {}", self.path.display());
                logged = true;
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    fn open(&self) -> Result<File, LockError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| LockError::Open {
                path: self.path.clone(),
                source: e,
            })?;
        }

        OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&self.path)
            .map_err(|e| LockError::Open {
                path: self.path.clone(),
                source: e,
            })
    }

    fn guard(&self, file: File) -> FileLockGuard {
        debug!("Acquired lock {}", self.path.display());
        FileLockGuard {
            file,
            path: self.path.clone(),
        }
    }

    fn timed_out(&self, start: Instant) -> LockError {
        LockError::Timeout {
            path: self.path.clone(),
            waited: start.elapsed(),
        }
    }
}

/// Proof of holding a [`FileLock`]. The lock is released when this is dropped.
#[derive(Debug)]
pub struct FileLockGuard {
    file: File,
    path: PathBuf,
}

impl FileLockGuard {
    /// Path of the held lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FileLockGuard {
    fn drop(&mut self) {
        // Closing the handle releases the lock as well; unlocking first makes
        // the release independent of when the handle is actually closed.
        if let Err(e) = FileExt::unlock(&self.file) {
            warn!("Failed to unlock {}: {}", self.path.display(), e);
        } else {
            debug!("Released lock {}", self.path.display());
        }
    }
}

fn is_contended(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::WouldBlock
        || (e.raw_os_error().is_some()
            && e.raw_os_error() == fs2::lock_contended_error().raw_os_error())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn lock_in(dir: &tempfile::TempDir) -> FileLock {
        FileLock::new(dir.path().join("locks").join("asset_1.0.lock"))
            .with_poll_interval(Duration::from_millis(10))
    }

    #[test]
    fn test_acquire_creates_lock_file_and_parents() {
        let dir = tempfile::tempdir().unwrap();
        let lock = lock_in(&dir);

        let guard = lock.acquire().unwrap();
        assert!(lock.path().exists());
        assert_eq!(guard.path(), lock.path());
    }

    #[test]
    fn test_try_acquire_while_held() {
        let dir = tempfile::tempdir().unwrap();
        let lock = lock_in(&dir);

        let guard = lock.acquire().unwrap();
        assert!(lock.try_acquire().unwrap().is_none());

        drop(guard);
        assert!(lock.try_acquire().unwrap().is_some());
    }

    #[test]
    fn test_distinct_paths_do_not_contend() {
        let dir = tempfile::tempdir().unwrap();
        let a = FileLock::new(dir.path().join("a_1.lock"));
        let b = FileLock::new(dir.path().join("b_1.lock"));

        let _a = a.acquire().unwrap();
        assert!(b.try_acquire().unwrap().is_some());
    }

    #[test]
    fn test_blocking_acquire_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let lock = lock_in(&dir);
        let _held = lock.acquire().unwrap();

        let result = lock
            .clone()
            .with_timeout(Duration::from_millis(50))
            .acquire();
        assert!(matches!(result, Err(LockError::Timeout { .. })));
    }

    #[test]
    fn test_blocking_acquire_waits_for_release() {
        let dir = tempfile::tempdir().unwrap();
        let lock = Arc::new(lock_in(&dir));
        let held = lock.acquire().unwrap();

        let waiter = {
            let lock = lock.clone();
            std::thread::spawn(move || lock.acquire().map(|_| ()))
        };

        std::thread::sleep(Duration::from_millis(100));
        assert!(!waiter.is_finished());

        drop(held);
        waiter.join().unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_async_acquire_waits_for_release() {
        let dir = tempfile::tempdir().unwrap();
        let lock = lock_in(&dir);
        let held = lock.acquire().unwrap();

        let waiter = {
            let lock = lock.clone();
            tokio::spawn(async move { lock.acquire_async().await.map(|_| ()) })
        };

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!waiter.is_finished());

        drop(held);
        waiter.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_async_acquire_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let lock = lock_in(&dir);
        let _held = lock.acquire().unwrap();

        let result = lock
            .clone()
            .with_timeout(Duration::from_millis(50))
            .acquire_async()
            .await;
        assert!(matches!(result, Err(LockError::Timeout { .. })));
    }

    #[test]
    fn test_open_error_when_parent_is_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"x").unwrap();

        let lock = FileLock::new(blocker.join("asset.lock"));
        assert!(matches!(lock.acquire(), Err(LockError::Open { .. })));
    }
}
