//! Cross-process advisory file locks.
//!
//! A [`FileLock`] names a lock file on disk. Acquiring it takes an exclusive
//! OS-level lock (`flock` on Unix, `LockFileEx` on Windows) on that file and
//! returns a [`FileLockGuard`]; dropping the guard releases the lock.
//!
//! Each acquisition opens its own file handle, so two acquisitions of the same
//! path conflict whether they come from different processes, different threads
//! or different tasks of one process.
//!
//! # Example
//!
//! ```no_run
//! use openmas_filelock::FileLock;
//!
//! # async fn run() -> Result<(), openmas_filelock::LockError> {
//! let lock = FileLock::new("/tmp/assets/.locks/bert_1.0.lock");
//!
//! // From async code: yields to the runtime while another holder exists.
//! let guard = lock.acquire_async().await?;
//! drop(guard);
//!
//! // From sync code: blocks the current thread.
//! let _guard = lock.acquire()?;
//! # Ok(())
//! # }
//! ```

mod lock;

pub use lock::{FileLock, FileLockGuard};

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while acquiring a file lock.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LockError {
    /// The lock file (or its parent directory) could not be created or opened.
    #[error("Failed to open lock file {path}: {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The OS refused the lock for a reason other than contention.
    #[error("Failed to lock {path}: {source}")]
    Lock {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Another holder kept the lock for longer than the configured timeout.
    #[error("Timed out after {waited:?} waiting for lock {path}")]
    Timeout { path: PathBuf, waited: Duration },
}
