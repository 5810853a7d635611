// SPDX-FileCopyrightText: 2026 dotsnap contributors
// SPDX-License-Identifier: MIT

//! Cross-process mutual exclusion.
//!
//! At most one installer run may mutate the system at a time. Exclusion is
//! enforced through a single well-known lock file containing the owning
//! process id as plain text. A lock file whose recorded process is no longer
//! alive is stale and gets reclaimed unilaterally.
//!
//! The guard releases the lock on drop, so every normal exit path (including
//! early returns through `?`) releases it without ceremony. Signal-triggered
//! exits go through the cleanup registry in [`crate::orchestrate`], which
//! removes the same file.

use std::{
    fs,
    path::{Path, PathBuf},
};
use tracing::{debug, info, warn};

/// Holds the installer lock for the lifetime of the value.
#[derive(Debug)]
pub struct LockGuard {
    path: PathBuf,
}

impl LockGuard {
    /// Acquire the installer lock.
    ///
    /// Writes the calling process id into the lock file. A stale lock left
    /// behind by a dead process is reclaimed silently-but-logged.
    ///
    /// # Errors
    ///
    /// - Return [`LockError::Contended`] if a live process already holds the
    ///   lock.
    /// - Return [`LockError::Write`] if the lock file cannot be written.
    pub fn acquire(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        if let Some(pid) = read_owner(&path) {
            if pid_is_alive(pid) {
                return Err(LockError::Contended {
                    pid,
                    path: path.clone(),
                });
            }

            warn!("reclaiming stale lock left by dead process {pid}");
            let _ = fs::remove_file(&path);
        }

        fs::write(&path, format!("{}\n", std::process::id())).map_err(|err| {
            LockError::Write {
                source: err,
                path: path.clone(),
            }
        })?;

        debug!("lock acquired at {:?}", path.display());
        Ok(Self { path })
    }

    /// Release the lock.
    ///
    /// Idempotent and infallible from the caller's point of view: a missing
    /// lock file is fine, and a removal failure is logged but swallowed.
    pub fn release(&self) {
        match fs::remove_file(&self.path) {
            Ok(()) => info!("lock released at {:?}", self.path.display()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => warn!("failed to remove lock file: {err}"),
        }
    }

    /// Path of the held lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.release();
    }
}

/// Read the pid recorded in a lock file, if any.
fn read_owner(path: &Path) -> Option<u32> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

/// Liveness probe for a process id.
///
/// Target platform is Linux, so probing procfs is enough. An unreadable
/// `/proc` entry counts as dead, which errs on the side of reclaiming.
fn pid_is_alive(pid: u32) -> bool {
    Path::new("/proc").join(pid.to_string()).exists()
}

/// All possible error types for lock interaction.
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    /// A live process already holds the lock.
    #[error(
        "another installer run (pid {pid}) holds the lock at {path}; \
         if that process is gone, remove the file manually and retry"
    )]
    Contended { pid: u32, path: PathBuf },

    /// Lock file cannot be written.
    #[error("cannot write lock file at {path}")]
    Write {
        source: std::io::Error,
        path: PathBuf,
    },
}

/// Friendly result alias :3
type Result<T, E = LockError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use sealed_test::prelude::*;

    #[sealed_test]
    fn acquire_records_own_pid() -> anyhow::Result<()> {
        let path = std::env::current_dir()?.join("dotsnap.lock");
        let guard = LockGuard::acquire(&path)?;

        let recorded: u32 = fs::read_to_string(&path)?.trim().parse()?;
        assert_eq!(recorded, std::process::id());

        drop(guard);
        assert!(!path.exists());

        Ok(())
    }

    #[sealed_test]
    fn contention_with_live_process_is_fatal() -> anyhow::Result<()> {
        let path = std::env::current_dir()?.join("dotsnap.lock");

        // Our own pid is as live as it gets.
        fs::write(&path, format!("{}", std::process::id()))?;

        let result = LockGuard::acquire(&path);
        assert!(matches!(result, Err(LockError::Contended { .. })));
        assert!(path.exists());

        Ok(())
    }

    #[sealed_test]
    fn stale_lock_is_reclaimed() -> anyhow::Result<()> {
        let path = std::env::current_dir()?.join("dotsnap.lock");

        // Way above pid_max, so no live process can own it.
        fs::write(&path, "999999999")?;

        let guard = LockGuard::acquire(&path)?;
        let recorded: u32 = fs::read_to_string(&path)?.trim().parse()?;
        assert_eq!(recorded, std::process::id());
        drop(guard);

        Ok(())
    }

    #[sealed_test]
    fn release_is_idempotent() -> anyhow::Result<()> {
        let path = std::env::current_dir()?.join("dotsnap.lock");
        let guard = LockGuard::acquire(&path)?;

        guard.release();
        guard.release();
        assert!(!path.exists());

        Ok(())
    }

    #[sealed_test]
    fn garbage_lock_content_is_treated_as_stale() -> anyhow::Result<()> {
        let path = std::env::current_dir()?.join("dotsnap.lock");
        fs::write(&path, "not a pid")?;

        let _guard = LockGuard::acquire(&path)?;

        Ok(())
    }
}
