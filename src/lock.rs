//! Advisory lock serializing indexing passes
//!
//! Two indexing passes writing the same project index would lose each
//! other's entries, so every pass holds an exclusive lock on a file in
//! the index directory. Searches never take it.

use crate::error::{Result, SgrepError};
use fs4::fs_std::FileExt;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::debug;

const RETRY_INTERVAL: Duration = Duration::from_millis(50);

/// Held for the duration of an indexing pass; released on drop
#[derive(Debug)]
pub struct IndexLock {
    file: File,
    path: PathBuf,
}

impl IndexLock {
    /// Take the lock at `path`, waiting up to `timeout`
    pub fn acquire(path: &Path, timeout: Duration) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = File::options()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let start = Instant::now();
        loop {
            if matches!(FileExt::try_lock_exclusive(&file), Ok(true)) {
                debug!("Acquired index lock {}", path.display());
                return Ok(Self {
                    file,
                    path: path.to_path_buf(),
                });
            }

            if start.elapsed() >= timeout {
                return Err(SgrepError::Locked(format!(
                    "{} is held by another indexing pass",
                    path.display()
                )));
            }

            std::thread::sleep(RETRY_INTERVAL);
        }
    }

    /// Location of the lock file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for IndexLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
        debug!("Released index lock {}", self.path.display());
    }
}
