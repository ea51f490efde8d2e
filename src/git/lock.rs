//! Lock-file recovery
//!
//! A git process killed mid-operation leaves `index.lock`, `HEAD.lock` or
//! `config.lock` behind and every later writer fails. Mutating operations run
//! under [`RetryPolicy::LOCK_RECOVERY`]: on lock contention the stale lock files
//! are removed and the operation is attempted once more.

use std::path::Path;

use tracing::{debug, warn};

/// Lock files cleared during recovery, relative to the `.git` directory
pub const LOCK_FILES: [&str; 3] = ["index.lock", "HEAD.lock", "config.lock"];

/// Bounded retry of an operation whose failures may be recoverable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
}

impl RetryPolicy {
    /// One retry after clearing stale locks
    pub const LOCK_RECOVERY: Self = Self { max_attempts: 2 };

    /// Run `op` until it succeeds, fails with a non-recoverable error, or the
    /// attempts are used up. `recover` runs before each retry.
    pub fn run<T, E>(
        &self,
        mut op: impl FnMut() -> Result<T, E>,
        is_recoverable: impl Fn(&E) -> bool,
        mut recover: impl FnMut(&E),
    ) -> Result<T, E> {
        let mut attempt = 1;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.max_attempts && is_recoverable(&e) => {
                    recover(&e);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Delete stale lock files from a `.git` directory
///
/// Missing files and delete failures are ignored. Returns how many files were removed.
pub fn clear_stale_locks(git_dir: &Path) -> usize {
    let mut removed = 0;
    for name in LOCK_FILES {
        let lock = git_dir.join(name);
        if !lock.exists() {
            continue;
        }
        match std::fs::remove_file(&lock) {
            Ok(()) => {
                debug!("Removed stale lock file {:?}", lock);
                removed += 1;
            }
            Err(e) => warn!("Failed to remove lock file {:?}: {}", lock, e),
        }
    }
    removed
}
