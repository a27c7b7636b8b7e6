//! platform::lock
//!
//! Exclusive lock on a local platform state file.
//!
//! # Invariants
//!
//! - The lock is held for the lifetime of the platform handle that owns it
//! - Lock is automatically released on drop (RAII pattern)
//! - Lock acquisition is non-blocking (fails fast if locked)
//!
//! The lock file lives next to the state file as `<state>.lock`.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use thiserror::Error;

/// Errors from locking operations.
#[derive(Debug, Error)]
pub enum LockError {
    /// Another process already holds the lock.
    #[error("platform state '{0}' is locked by another convergence pass")]
    AlreadyLocked(PathBuf),

    /// Failed to create lock file or directory.
    #[error("failed to create lock: {0}")]
    CreateFailed(String),

    /// Failed to acquire the OS lock.
    #[error("failed to acquire lock: {0}")]
    AcquireFailed(String),
}

/// An exclusive lock on a state file.
#[derive(Debug)]
pub struct StateLock {
    path: PathBuf,
    file: Option<File>,
}

impl StateLock {
    /// Path of the lock file guarding `state_path`.
    pub fn lock_path(state_path: &Path) -> PathBuf {
        let mut name = state_path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "state".into());
        name.push(".lock");
        state_path.with_file_name(name)
    }

    /// Attempt to acquire the lock guarding `state_path`.
    ///
    /// # Errors
    ///
    /// - [`LockError::AlreadyLocked`] if another process holds the lock
    /// - [`LockError::CreateFailed`] if the lock file cannot be created
    /// - [`LockError::AcquireFailed`] if the OS lock cannot be acquired
    pub fn acquire(state_path: &Path) -> Result<Self, LockError> {
        if let Some(dir) = state_path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir).map_err(|e| {
                    LockError::CreateFailed(format!("cannot create {}: {}", dir.display(), e))
                })?;
            }
        }

        let path = Self::lock_path(state_path);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| {
                LockError::CreateFailed(format!("cannot open {}: {}", path.display(), e))
            })?;

        match file.try_lock_exclusive() {
            Ok(()) => Ok(Self {
                path,
                file: Some(file),
            }),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                Err(LockError::AlreadyLocked(state_path.to_path_buf()))
            }
            Err(e) => Err(LockError::AcquireFailed(e.to_string())),
        }
    }

    /// Check if the lock is currently held.
    pub fn is_held(&self) -> bool {
        self.file.is_some()
    }

    /// Get the path to the lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StateLock {
    fn drop(&mut self) {
        // Best-effort release on drop
        if let Some(file) = self.file.take() {
            let _ = file.unlock();
        }
    }
}
