//! Cross-process run lock.
//!
//! Two `prodsync sync` processes pointed at the same cache would race on
//! removals and writes. Before a run starts, the binary takes an exclusive
//! advisory lock on `<cache path>.lock`; a second process fails fast with
//! [`SyncError::AlreadyRunning`] instead of waiting.

use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use crate::error::SyncError;

/// Held exclusive lock. Released on drop.
#[derive(Debug)]
pub struct RunLock {
    file: File,
    path: PathBuf,
}

impl RunLock {
    /// Lock file path used for a cache at `cache_path`.
    #[must_use]
    pub fn path_for(cache_path: &Path) -> PathBuf {
        let mut name = cache_path.as_os_str().to_os_string();
        name.push(".lock");
        PathBuf::from(name)
    }

    /// Try to take the lock for the cache at `cache_path` without blocking.
    ///
    /// # Errors
    ///
    /// - [`SyncError::AlreadyRunning`] if another process holds the lock
    /// - [`SyncError::Connectivity`] if the lock file cannot be created
    pub fn acquire(cache_path: &Path) -> Result<Self, SyncError> {
        let path = Self::path_for(cache_path);
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    SyncError::Connectivity(format!(
                        "cannot create lock directory {}: {e}",
                        parent.display()
                    ))
                })?;
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| {
                SyncError::Connectivity(format!("cannot open lock file {}: {e}", path.display()))
            })?;

        match file.try_lock_exclusive() {
            Ok(()) => {}
            Err(e)
                if e.kind() == ErrorKind::WouldBlock
                    || e.raw_os_error().is_some_and(is_contended) =>
            {
                return Err(SyncError::AlreadyRunning(format!(
                    "{} is held by another process",
                    path.display()
                )));
            }
            Err(e) => {
                return Err(SyncError::Connectivity(format!(
                    "cannot lock {}: {e}",
                    path.display()
                )));
            }
        }

        if let Err(e) = record_owner(&mut file) {
            log::debug!("Could not record owner pid in {}: {e}", path.display());
        }
        log::debug!("Acquired run lock {}", path.display());

        Ok(Self { file, path })
    }

    /// Path of the lock file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Replace the lock file's contents with our pid, for whoever finds it held.
fn record_owner(file: &mut File) -> std::io::Result<()> {
    file.set_len(0)?;
    writeln!(file, "{}", std::process::id())?;
    file.flush()
}

/// `fs2` reports contention as the platform's raw error on some targets.
fn is_contended(code: i32) -> bool {
    code == fs2::lock_contended_error().raw_os_error().unwrap_or(-1)
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Err(e) = self.file.unlock() {
            log::warn!("Failed to release run lock {}: {e}", self.path.display());
        } else {
            log::debug!("Released run lock {}", self.path.display());
        }
    }
}
