//! Process-exclusion lock
//!
//! Serializes invocations of the same operation on one host. The lock is
//! an exclusive advisory lock on `<lock_dir>/<name>.lock`; a second
//! acquisition fails immediately instead of queueing.
//!
//! The lock file holds the owner's PID and is removed on release. Removal
//! is best-effort: a concurrent acquirer may still lock the unlinked file,
//! which only affects the file's lifetime, never exclusivity of the
//! running holder's critical section.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;

use crate::error::LockError;

/// Candidate lock directories, probed in order
pub const LOCK_DIR_CANDIDATES: &[&str] = &["/run/lock", "/var/lock", "/run", "/var/run", "/tmp"];

/// Pick the first existing candidate lock directory
pub fn find_lock_dir() -> Result<PathBuf, LockError> {
    LOCK_DIR_CANDIDATES
        .iter()
        .map(PathBuf::from)
        .find(|dir| dir.is_dir())
        .ok_or(LockError::NoLockDir)
}

/// Path of the lock file for `name`
pub fn lock_path(name: &str, lock_dir: Option<&Path>) -> Result<PathBuf, LockError> {
    let dir = match lock_dir {
        Some(dir) => dir.to_path_buf(),
        None => find_lock_dir()?,
    };
    Ok(dir.join(format!("{}.lock", name)))
}

/// Held process-exclusion lock, released on drop
#[derive(Debug)]
pub struct RuntimeLock {
    file: Option<File>,
    path: PathBuf,
}

impl RuntimeLock {
    /// Acquire the lock named `name`, probing for a lock directory if none is given
    pub fn acquire(name: &str, lock_dir: Option<&Path>) -> Result<Self, LockError> {
        Self::acquire_path(lock_path(name, lock_dir)?)
    }

    /// Acquire a lock on an explicit lock file path
    pub fn acquire_path(path: impl Into<PathBuf>) -> Result<Self, LockError> {
        let path = path.into();
        let io_err = |source: io::Error| LockError::Io {
            path: path.clone(),
            source,
        };

        // Not truncated until locked: the current holder's PID stays readable
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(io_err)?;

        if let Err(e) = file.try_lock_exclusive() {
            if e.kind() == io::ErrorKind::WouldBlock
                || e.raw_os_error() == fs2::lock_contended_error().raw_os_error()
            {
                return Err(LockError::Held { path: path.clone() });
            }
            return Err(io_err(e));
        }

        file.set_len(0).map_err(io_err)?;
        writeln!(file, "{:>10}", std::process::id()).map_err(io_err)?;
        file.flush().map_err(io_err)?;

        tracing::debug!("Acquired lock {:?}", path);

        Ok(Self {
            file: Some(file),
            path,
        })
    }

    /// Path of the lock file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Release the lock and remove the lock file
    pub fn close(mut self) {
        self.release();
    }

    fn release(&mut self) {
        let Some(file) = self.file.take() else {
            return;
        };

        // Unlink while still holding the lock, then close the descriptor
        match fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!("Failed to remove lock file {:?}: {}", self.path, e),
        }
        if let Err(e) = file.unlock() {
            tracing::debug!("Failed to unlock {:?}: {}", self.path, e);
        }
        drop(file);

        tracing::debug!("Released lock {:?}", self.path);
    }
}

impl Drop for RuntimeLock {
    fn drop(&mut self) {
        self.release();
    }
}
