// SPDX-FileCopyrightText: 2026 dotsnap contributors
// SPDX-License-Identifier: MIT

//! Backup store management.
//!
//! A __backup__ is a best-effort full copy of the current content of every
//! tracked entry that exists, taken into a fresh timestamped directory under
//! the backup root. Backups are independent of checkpoints: a checkpoint
//! records *shape* (symlink targets, entry kinds), the paired backup holds
//! the *content* a directory-shaped entry needs for recovery.
//!
//! The most recent backup's path is recorded in a `latest.txt` pointer file,
//! overwritten on every new backup.

use crate::{
    config::{Settings, TRACKED_ENTRIES},
    fsops,
};

use chrono::Local;
use std::{
    fs,
    path::{Path, PathBuf},
};
use tracing::{info, instrument, warn};

/// Name of the pointer file holding the most recent backup's path.
const LATEST_POINTER: &str = "latest.txt";

/// Outcome of one backup run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupReport {
    /// Where the backup landed. `None` when nothing existed to back up or
    /// when running dry.
    pub path: Option<PathBuf>,

    /// Number of tracked entries copied successfully.
    pub copied: usize,

    /// Number of tracked entries that failed to copy.
    pub failed: usize,
}

/// Creates and locates backups of tracked configuration.
#[derive(Debug)]
pub struct BackupStore<'a> {
    settings: &'a Settings,
}

impl<'a> BackupStore<'a> {
    pub fn new(settings: &'a Settings) -> Self {
        Self { settings }
    }

    /// Copy every tracked entry that currently exists into a new timestamped
    /// backup directory.
    ///
    /// Individual copy failures are warnings, counted but never aborting the
    /// loop. A run that found nothing to back up reports `copied == 0` and
    /// creates no directory. After the loop, a sanity check verifies that
    /// recorded successes actually left content in the backup directory.
    ///
    /// # Errors
    ///
    /// - Return [`BackupError::Verification`] if successes were recorded but
    ///   the backup directory is empty.
    /// - Return [`BackupError::CreateDir`] if the backup directory cannot be
    ///   created.
    #[instrument(skip(self), level = "debug")]
    pub fn backup(&self) -> Result<BackupReport> {
        let present: Vec<_> = TRACKED_ENTRIES
            .iter()
            .filter(|entry| {
                fs::symlink_metadata(entry.live_path(self.settings)).is_ok()
            })
            .collect();

        if present.is_empty() {
            info!("nothing to back up");
            return Ok(BackupReport {
                path: None,
                copied: 0,
                failed: 0,
            });
        }

        if self.settings.dry_run {
            for entry in &present {
                info!("dry-run: would back up {}", entry.name);
            }
            return Ok(BackupReport {
                path: None,
                copied: present.len(),
                failed: 0,
            });
        }

        let dir = self.allocate_dir()?;
        let mut copied = 0;
        let mut failed = 0;

        for entry in present {
            let live = entry.live_path(self.settings);
            match fsops::copy_resolved(&live, &dir.join(entry.name)) {
                Ok(()) => {
                    info!("backed up {}", entry.name);
                    copied += 1;
                }
                Err(err) => {
                    warn!("failed to back up {}: {err}", entry.name);
                    failed += 1;
                }
            }
        }

        verify_backup(&dir, copied)?;

        self.point_latest(&dir);
        info!(
            "backup complete at {:?} ({copied} copied, {failed} failed)",
            dir.display()
        );

        Ok(BackupReport {
            path: Some(dir),
            copied,
            failed,
        })
    }

    /// Path of the most recent backup, if the pointer file resolves.
    pub fn latest(&self) -> Option<PathBuf> {
        let pointer = self.settings.backup_root.join(LATEST_POINTER);
        let path = PathBuf::from(fs::read_to_string(pointer).ok()?.trim());
        path.is_dir().then_some(path)
    }

    fn allocate_dir(&self) -> Result<PathBuf> {
        let stamp = Local::now().format("%Y%m%d-%H%M%S");
        let mut dir = self.settings.backup_root.join(format!("backup-{stamp}"));

        // Sequential runs within the same second get a numeric suffix.
        let mut n = 1;
        while dir.exists() {
            dir = self
                .settings
                .backup_root
                .join(format!("backup-{stamp}-{n}"));
            n += 1;
        }

        mkdirp::mkdirp(&dir).map_err(|err| BackupError::CreateDir {
            source: err,
            path: dir.clone(),
        })?;

        Ok(dir)
    }

    fn point_latest(&self, dir: &Path) {
        let pointer = self.settings.backup_root.join(LATEST_POINTER);
        if let Err(err) = fs::write(&pointer, format!("{}\n", dir.display())) {
            warn!("failed to update latest backup pointer: {err}");
        }
    }
}

/// Sanity check after the copy loop: successes recorded into a directory
/// that ended up empty means the backup cannot be trusted.
fn verify_backup(dir: &Path, copied: usize) -> Result<()> {
    if copied > 0 && dir_is_empty(dir) {
        return Err(BackupError::Verification {
            path: dir.to_path_buf(),
        });
    }

    Ok(())
}

fn dir_is_empty(path: &Path) -> bool {
    fs::read_dir(path)
        .map(|mut entries| entries.next().is_none())
        .unwrap_or(true)
}

/// All possible error types for backup store interaction.
#[derive(Debug, thiserror::Error)]
pub enum BackupError {
    /// Backup directory cannot be created.
    #[error("cannot create backup directory at {path}")]
    CreateDir {
        source: std::io::Error,
        path: PathBuf,
    },

    /// Successes were recorded but the backup directory is empty.
    #[error("backup at {path} recorded successes but is empty; not trusting it")]
    Verification { path: PathBuf },
}

/// Friendly result alias :3
type Result<T, E = BackupError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use sealed_test::prelude::*;

    fn sandbox() -> Settings {
        let root = std::env::current_dir().unwrap();
        Settings {
            home: root.join("home"),
            config_dir: root.join("home/.config"),
            backup_root: root.join("home/.dotfiles-backups"),
            checkpoint_root: root.join("home/.dotfiles-backups/.checkpoints"),
            log_dir: root.join("home/.dotfiles-logs"),
            lock_path: root.join("dotsnap.lock"),
            payload_dir: root.join("payload"),
            dry_run: false,
            assume_yes: true,
        }
    }

    #[sealed_test]
    fn empty_home_reports_nothing_to_back_up() -> anyhow::Result<()> {
        let settings = sandbox();
        fs::create_dir_all(&settings.home)?;

        let report = BackupStore::new(&settings).backup()?;

        assert_eq!(report.copied, 0);
        assert_eq!(report.failed, 0);
        assert!(report.path.is_none());
        assert!(!settings.backup_root.join(LATEST_POINTER).exists());

        Ok(())
    }

    #[sealed_test]
    fn backup_copies_entries_and_points_latest() -> anyhow::Result<()> {
        let settings = sandbox();
        fs::create_dir_all(settings.config_dir.join("hypr"))?;
        fs::write(settings.config_dir.join("hypr/hyprland.conf"), "monitor=,auto")?;
        fs::write(settings.home.join(".zshrc"), "export EDITOR=hx")?;

        let store = BackupStore::new(&settings);
        let report = store.backup()?;

        assert_eq!(report.copied, 2);
        assert_eq!(report.failed, 0);

        let dir = report.path.unwrap();
        assert_eq!(
            fs::read_to_string(dir.join("hypr/hyprland.conf"))?,
            "monitor=,auto"
        );
        assert_eq!(fs::read_to_string(dir.join(".zshrc"))?, "export EDITOR=hx");
        assert_eq!(store.latest(), Some(dir));

        Ok(())
    }

    #[sealed_test]
    fn latest_pointer_is_overwritten_by_newer_backup() -> anyhow::Result<()> {
        let settings = sandbox();
        fs::create_dir_all(settings.config_dir.join("kitty"))?;
        fs::write(settings.config_dir.join("kitty/kitty.conf"), "font_size 11")?;

        let store = BackupStore::new(&settings);
        let first = store.backup()?.path.unwrap();
        let second = store.backup()?.path.unwrap();

        assert_ne!(first, second);
        assert_eq!(store.latest(), Some(second));

        Ok(())
    }

    #[sealed_test]
    fn symlinked_entry_is_backed_up_as_content() -> anyhow::Result<()> {
        let settings = sandbox();
        fs::create_dir_all(settings.config_dir.join("hypr-stealthiq"))?;
        fs::write(
            settings.config_dir.join("hypr-stealthiq/hyprland.conf"),
            "variant a",
        )?;
        std::os::unix::fs::symlink(
            "hypr-stealthiq",
            settings.config_dir.join("hypr"),
        )?;

        let report = BackupStore::new(&settings).backup()?;
        let dir = report.path.unwrap();

        let meta = fs::symlink_metadata(dir.join("hypr"))?;
        assert!(meta.is_dir());
        assert_eq!(
            fs::read_to_string(dir.join("hypr/hyprland.conf"))?,
            "variant a"
        );

        Ok(())
    }

    #[sealed_test]
    fn verification_rejects_recorded_successes_into_empty_directory() -> anyhow::Result<()> {
        fs::create_dir_all("backup")?;

        let result = verify_backup(Path::new("backup"), 1);
        assert!(matches!(result, Err(BackupError::Verification { .. })));

        // Zero copies into an empty tree is "nothing to back up", not
        // corruption.
        verify_backup(Path::new("backup"), 0)?;

        fs::write("backup/kitty.conf", "font_size 11")?;
        verify_backup(Path::new("backup"), 1)?;

        Ok(())
    }

    #[sealed_test]
    fn dry_run_writes_nothing() -> anyhow::Result<()> {
        let mut settings = sandbox();
        settings.dry_run = true;
        fs::create_dir_all(settings.config_dir.join("hypr"))?;

        let report = BackupStore::new(&settings).backup()?;

        assert_eq!(report.copied, 1);
        assert!(report.path.is_none());
        assert!(!settings.backup_root.exists());

        Ok(())
    }
}
