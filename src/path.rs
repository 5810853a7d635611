// SPDX-FileCopyrightText: 2026 dotsnap contributors
// SPDX-License-Identifier: MIT

//! Path resolution utilities.
//!
//! Determine relevant path information for the persistent directory tree that
//! dotsnap reads and writes: the backup root, the checkpoint store, the
//! operation log directory, and the OS-wide lock file.

use std::path::PathBuf;

/// Determine absolute path to user's home directory.
///
/// Does not check if the path returned actually exists.
///
/// # Errors
///
/// - Return [`NoWayHome`] if home directory path cannot be determined.
pub fn home_dir() -> Result<PathBuf> {
    dirs::home_dir().ok_or(NoWayHome)
}

/// Determine absolute path to the backup root directory.
///
/// Backups of tracked configuration live under `$HOME/.dotfiles-backups`,
/// one timestamped directory per run, next to a `latest.txt` pointer file.
/// Does not check if the path returned actually exists.
///
/// # Errors
///
/// - Return [`NoWayHome`] if home directory path cannot be determined.
pub fn backup_root() -> Result<PathBuf> {
    home_dir().map(|path| path.join(".dotfiles-backups"))
}

/// Determine absolute path to the checkpoint store directory.
///
/// Checkpoints live in a hidden subdirectory of the backup root so that both
/// halves of the safety net travel together.
///
/// # Errors
///
/// - Return [`NoWayHome`] if home directory path cannot be determined.
pub fn checkpoint_root() -> Result<PathBuf> {
    backup_root().map(|path| path.join(".checkpoints"))
}

/// Determine absolute path to the operation log directory.
///
/// # Errors
///
/// - Return [`NoWayHome`] if home directory path cannot be determined.
pub fn log_dir() -> Result<PathBuf> {
    home_dir().map(|path| path.join(".dotfiles-logs"))
}

/// Determine the fixed OS-wide lock file path.
///
/// The lock lives in the shared temp directory rather than under `$HOME` on
/// purpose: only one installer run may mutate the system at a time, even when
/// launched from different checkouts.
pub fn lock_path() -> PathBuf {
    std::env::temp_dir().join("dotsnap.lock")
}

/// No way to determine user's home directory.
///
/// # See Also
///
/// - [`dirs::home_dir`](https://docs.rs/dirs/latest/dirs/fn.home_dir.html)
#[derive(Clone, Debug, thiserror::Error)]
#[error("cannot determine absolute path to user's home directory")]
pub struct NoWayHome;

/// Friendly result alias :3
pub type Result<T, E = NoWayHome> = std::result::Result<T, E>;
