// SPDX-FileCopyrightText: 2026 dotsnap contributors
// SPDX-License-Identifier: MIT

//! Checkpoint store management.
//!
//! A __checkpoint__ is an immutable, timestamped record of tracked-entry
//! state taken immediately before a destructive operation. Creation is
//! read-only with respect to live configuration: everything a checkpoint
//! writes lands inside its own directory under the checkpoint root.
//!
//! # Checkpoint Layout
//!
//! Each checkpoint is a directory named `<name>-<epoch>` containing:
//!
//! - `metadata.txt` — key=value lines: name, ISO-8601 creation time, owning
//!   user, kernel and GPU descriptors (informational only), and the path of
//!   the backup this checkpoint is paired with.
//! - `state.txt` — one key=value line per tracked entry that existed at
//!   creation time: `symlink:<target>`, `directory`, or `file`.
//! - `<name>.bak` — byte copies of tracked files recorded as `file`.
//! - `packages.txt` — best-effort diagnostic, never read back by restore.
//!
//! # Pairing With Backups
//!
//! Directory-shaped entries are recorded without content; their recovery
//! copies from the backup the checkpoint is paired with. The pairing is a
//! direct path reference written into `metadata.txt` before any mutation
//! begins, never a name-search over the backup root: with multiple historical
//! backups holding same-named directories, a search could restore content
//! from the wrong era.

use crate::{
    config::{Settings, TRACKED_ENTRIES},
    fsops, system,
};

use chrono::Local;
use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};
use tracing::{info, instrument, warn};

/// Summary of one stored checkpoint, for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointSummary {
    /// Directory name, the sole identifier needed for restore.
    pub id: String,

    /// Human-chosen checkpoint name.
    pub name: String,

    /// ISO-8601 creation time.
    pub created: String,

    /// Kernel version at creation time. Informational only.
    pub kernel: String,
}

/// Outcome of one restore run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RestoreReport {
    /// Entries put back to their recorded state.
    pub restored: usize,

    /// Entries whose recorded state could not be reproduced (no paired
    /// backup content). Logged, not fatal.
    pub skipped: usize,

    /// Entries whose restore step failed outright.
    pub failed: usize,
}

/// Creates, restores, and lists checkpoints.
#[derive(Debug)]
pub struct CheckpointStore<'a> {
    settings: &'a Settings,
}

impl<'a> CheckpointStore<'a> {
    pub fn new(settings: &'a Settings) -> Self {
        Self { settings }
    }

    /// Snapshot tracked-entry state into a fresh checkpoint directory.
    ///
    /// Symlinks are recorded with their target, directories by kind only,
    /// and tracked files by full byte copy. Entries absent from the live
    /// tree are simply not recorded. Diagnostic sub-steps (kernel, GPU,
    /// package list) are best-effort and never abort creation.
    ///
    /// Returns the checkpoint's directory path as its handle.
    ///
    /// # Errors
    ///
    /// - Return [`CheckpointError::CreateDir`] if the checkpoint directory
    ///   cannot be allocated.
    /// - Return [`CheckpointError::Persist`] if metadata, state, or a file
    ///   copy cannot be written.
    #[instrument(skip(self), level = "debug")]
    pub fn create(&self, name: &str) -> Result<PathBuf> {
        let dir = self.allocate_dir(name)?;

        let mut metadata = String::new();
        metadata.push_str(&format!("name={name}\n"));
        metadata.push_str(&format!(
            "created={}\n",
            Local::now().format("%Y-%m-%dT%H:%M:%S%z")
        ));
        metadata.push_str(&format!(
            "user={}\n",
            std::env::var("USER").unwrap_or_else(|_| "unknown".into())
        ));
        if let Some(kernel) = system::kernel_version() {
            metadata.push_str(&format!("kernel={kernel}\n"));
        }
        if let Some(gpu) = system::gpu_descriptor() {
            metadata.push_str(&format!("gpu={gpu}\n"));
        }
        persist(&dir.join("metadata.txt"), &metadata)?;

        let mut state = String::new();
        for entry in TRACKED_ENTRIES {
            let live = entry.live_path(self.settings);
            let meta = match fs::symlink_metadata(&live) {
                Ok(meta) => meta,
                Err(_) => continue,
            };

            if meta.file_type().is_symlink() {
                let target = fs::read_link(&live).map_err(|err| CheckpointError::Persist {
                    source: err,
                    path: live.clone(),
                })?;
                state.push_str(&format!("{}=symlink:{}\n", entry.name, target.display()));
            } else if meta.is_dir() {
                state.push_str(&format!("{}=directory\n", entry.name));
            } else {
                // Tracked files (and the odd config entry that is a plain
                // file) are embedded byte-for-byte.
                let bak = dir.join(format!("{}.bak", entry.name));
                fs::copy(&live, &bak).map_err(|err| CheckpointError::Persist {
                    source: err,
                    path: bak,
                })?;
                state.push_str(&format!("{}=file\n", entry.name));
            }
        }
        persist(&dir.join("state.txt"), &state)?;

        self.record_packages(&dir);
        info!("checkpoint created at {:?}", dir.display());

        Ok(dir)
    }

    /// Record the backup this checkpoint is paired with.
    ///
    /// Called once, before any mutation begins; after that point the
    /// checkpoint is immutable.
    ///
    /// # Errors
    ///
    /// - Return [`CheckpointError::Persist`] if the metadata file cannot be
    ///   appended to.
    pub fn attach_backup(&self, handle: &Path, backup: &Path) -> Result<()> {
        use std::io::Write;

        let path = handle.join("metadata.txt");
        let mut file = fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .map_err(|err| CheckpointError::Persist {
                source: err,
                path: path.clone(),
            })?;

        writeln!(file, "backup={}", backup.display()).map_err(|err| {
            CheckpointError::Persist { source: err, path }
        })
    }

    /// Restore live tracked-entry state from a checkpoint.
    ///
    /// Best-effort per entry: each step unconditionally removes the current
    /// live entry before reapplying the recorded state, which is what makes
    /// restore idempotent. Entries with no record in the checkpoint were
    /// absent when it was taken, so they are removed. A directory-shaped
    /// record whose paired backup holds no matching content is skipped with
    /// a warning. In dry-run mode every per-entry action is reported without
    /// touching live state.
    ///
    /// # Errors
    ///
    /// - Return [`CheckpointError::InvalidHandle`] if the handle does not
    ///   refer to a checkpoint directory with valid metadata.
    #[instrument(skip(self), level = "debug")]
    pub fn restore(&self, handle: &Path) -> Result<RestoreReport> {
        let metadata_path = handle.join("metadata.txt");
        if !handle.is_dir() || !metadata_path.is_file() {
            return Err(CheckpointError::InvalidHandle {
                path: handle.to_path_buf(),
            });
        }

        let metadata = parse_kv(&metadata_path);
        let state = parse_kv(&handle.join("state.txt"));
        let paired_backup = metadata.get("backup").map(PathBuf::from);

        for key in state.keys() {
            if crate::config::tracked_entry(key).is_none() {
                warn!("checkpoint records unknown entry {key}; skipping");
            }
        }

        let dry_run = self.settings.dry_run;
        let mut report = RestoreReport::default();
        for entry in TRACKED_ENTRIES {
            let live = entry.live_path(self.settings);
            let outcome = match state.get(entry.name).map(String::as_str) {
                None => restore_absent(&live, dry_run),
                Some("directory") => {
                    restore_directory(entry.name, &live, paired_backup.as_deref(), dry_run)
                }
                Some("file") => restore_file(entry.name, &live, handle, dry_run),
                Some(value) if value.starts_with("symlink:") => {
                    let target = Path::new(&value["symlink:".len()..]);
                    fsops::safe_symlink(target, &live, dry_run).map(|()| Outcome::Restored)
                }
                Some(value) => {
                    warn!("unrecognized state {value:?} for {}; skipping", entry.name);
                    Ok(Outcome::Skipped)
                }
            };

            match outcome {
                Ok(Outcome::Restored) => {
                    info!("restored {}", entry.name);
                    report.restored += 1;
                }
                Ok(Outcome::Skipped) => report.skipped += 1,
                Ok(Outcome::Untouched) => {}
                Err(err) => {
                    warn!("failed to restore {}: {err}", entry.name);
                    report.failed += 1;
                }
            }
        }

        info!(
            "restore complete ({} restored, {} skipped, {} failed)",
            report.restored, report.skipped, report.failed
        );

        Ok(report)
    }

    /// Enumerate stored checkpoints, newest first.
    ///
    /// Pure read; directories without parseable metadata are skipped with a
    /// warning. Collected eagerly: every metadata file has to be parsed
    /// before the newest-first sort anyway.
    pub fn list(&self) -> Vec<CheckpointSummary> {
        let entries = match fs::read_dir(&self.settings.checkpoint_root) {
            Ok(entries) => entries,
            Err(_) => return Vec::new(),
        };

        let mut summaries: Vec<_> = entries
            .filter_map(|entry| {
                let dir = entry.ok()?.path();
                let metadata_path = dir.join("metadata.txt");
                if !metadata_path.is_file() {
                    warn!("skipping {:?}: no metadata", dir.display());
                    return None;
                }

                let metadata = parse_kv(&metadata_path);
                Some(CheckpointSummary {
                    id: dir.file_name()?.to_string_lossy().into_owned(),
                    name: metadata.get("name").cloned().unwrap_or_default(),
                    created: metadata.get("created").cloned().unwrap_or_default(),
                    kernel: metadata.get("kernel").cloned().unwrap_or_default(),
                })
            })
            .collect();

        summaries.sort_by(|a, b| b.created.cmp(&a.created).then(b.id.cmp(&a.id)));
        summaries
    }

    /// Resolve a user-supplied checkpoint identifier to a handle.
    ///
    /// Accepts either a full path or a bare checkpoint id under the
    /// checkpoint root.
    pub fn resolve(&self, id: &str) -> PathBuf {
        let direct = PathBuf::from(id);
        if direct.is_dir() {
            return direct;
        }

        self.settings.checkpoint_root.join(id)
    }

    fn allocate_dir(&self, name: &str) -> Result<PathBuf> {
        let epoch = Local::now().timestamp();
        let mut dir = self
            .settings
            .checkpoint_root
            .join(format!("{name}-{epoch}"));

        let mut n = 1;
        while dir.exists() {
            dir = self
                .settings
                .checkpoint_root
                .join(format!("{name}-{epoch}-{n}"));
            n += 1;
        }

        mkdirp::mkdirp(&dir).map_err(|err| CheckpointError::CreateDir {
            source: err,
            path: dir.clone(),
        })?;

        Ok(dir)
    }

    fn record_packages(&self, dir: &Path) {
        let Some(listing) = system::installed_packages() else {
            return;
        };

        if let Err(err) = fs::write(dir.join("packages.txt"), listing) {
            warn!("failed to record package list: {err}");
        }
    }
}

enum Outcome {
    Restored,
    Skipped,
    Untouched,
}

fn restore_absent(live: &Path, dry_run: bool) -> std::result::Result<Outcome, fsops::FsError> {
    if fs::symlink_metadata(live).is_err() {
        return Ok(Outcome::Untouched);
    }

    if dry_run {
        info!("dry-run: would remove {:?}", live.display());
        return Ok(Outcome::Restored);
    }

    fsops::remove_entry(live)?;
    Ok(Outcome::Restored)
}

fn restore_directory(
    name: &str,
    live: &Path,
    paired_backup: Option<&Path>,
    dry_run: bool,
) -> std::result::Result<Outcome, fsops::FsError> {
    if !dry_run {
        fsops::remove_entry(live)?;
    }

    let Some(source) = paired_backup.map(|backup| backup.join(name)) else {
        warn!("no backup paired with checkpoint; {name} not restored");
        return Ok(Outcome::Skipped);
    };

    if !source.exists() {
        warn!("paired backup holds no content for {name}; not restored");
        return Ok(Outcome::Skipped);
    }

    fsops::safe_copy(&source, live, dry_run)?;
    Ok(Outcome::Restored)
}

fn restore_file(
    name: &str,
    live: &Path,
    handle: &Path,
    dry_run: bool,
) -> std::result::Result<Outcome, fsops::FsError> {
    let bak = handle.join(format!("{name}.bak"));
    if !bak.is_file() {
        warn!("checkpoint holds no stored copy of {name}; not restored");
        return Ok(Outcome::Skipped);
    }

    fsops::safe_copy(&bak, live, dry_run)?;
    Ok(Outcome::Restored)
}

fn persist(path: &Path, contents: &str) -> Result<()> {
    fs::write(path, contents).map_err(|err| CheckpointError::Persist {
        source: err,
        path: path.to_path_buf(),
    })
}

/// Parse a key=value file into a map. Missing file means empty map.
fn parse_kv(path: &Path) -> HashMap<String, String> {
    let Ok(data) = fs::read_to_string(path) else {
        return HashMap::new();
    };

    data.lines()
        .filter_map(|line| {
            let (key, value) = line.split_once('=')?;
            Some((key.to_string(), value.to_string()))
        })
        .collect()
}

/// All possible error types for checkpoint store interaction.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    /// Checkpoint directory cannot be allocated.
    #[error("cannot create checkpoint directory at {path}")]
    CreateDir {
        source: std::io::Error,
        path: PathBuf,
    },

    /// Checkpoint content cannot be written.
    #[error("cannot persist checkpoint data at {path}")]
    Persist {
        source: std::io::Error,
        path: PathBuf,
    },

    /// Handle does not refer to a checkpoint with valid metadata.
    #[error("{path} is not a checkpoint: missing directory or metadata")]
    InvalidHandle { path: PathBuf },
}

/// Friendly result alias :3
type Result<T, E = CheckpointError> = std::result::Result<T, E>;

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

    /// Snapshot of live tracked-entry state for equality assertions.
    fn live_snapshot(settings: &Settings) -> Vec<(String, String)> {
        TRACKED_ENTRIES
            .iter()
            .filter_map(|entry| {
                let live = entry.live_path(settings);
                let meta = fs::symlink_metadata(&live).ok()?;
                let shape = if meta.file_type().is_symlink() {
                    format!("symlink:{}", fs::read_link(&live).unwrap().display())
                } else if meta.is_dir() {
                    let marker = live.join("hyprland.conf");
                    format!(
                        "dir:{}",
                        fs::read_to_string(marker).unwrap_or_default()
                    )
                } else {
                    format!("file:{}", fs::read_to_string(&live).unwrap())
                };
                Some((entry.name.to_string(), shape))
            })
            .collect()
    }

    #[sealed_test]
    fn fresh_tree_yields_empty_state_list() -> anyhow::Result<()> {
        let settings = sandbox();
        fs::create_dir_all(&settings.home)?;

        let handle = CheckpointStore::new(&settings).create("pre-install")?;

        assert_eq!(fs::read_to_string(handle.join("state.txt"))?, "");
        let metadata = parse_kv(&handle.join("metadata.txt"));
        assert_eq!(metadata.get("name").map(String::as_str), Some("pre-install"));
        assert!(metadata.contains_key("created"));

        Ok(())
    }

    #[sealed_test]
    fn create_never_mutates_live_state() -> anyhow::Result<()> {
        let settings = sandbox();
        fs::create_dir_all(settings.config_dir.join("hypr"))?;
        fs::write(settings.config_dir.join("hypr/hyprland.conf"), "s0")?;
        std::os::unix::fs::symlink("hypr", settings.config_dir.join("waybar"))?;
        fs::write(settings.home.join(".zshrc"), "export A=1")?;

        let before = live_snapshot(&settings);
        CheckpointStore::new(&settings).create("pre-switch")?;
        let after = live_snapshot(&settings);

        assert_eq!(before, after);

        Ok(())
    }

    #[sealed_test]
    fn restore_recreates_symlink_and_file() -> anyhow::Result<()> {
        let settings = sandbox();
        fs::create_dir_all(settings.config_dir.join("hypr-stealthiq"))?;
        std::os::unix::fs::symlink("hypr-stealthiq", settings.config_dir.join("hypr"))?;
        fs::write(settings.home.join(".zshrc"), "original")?;

        let store = CheckpointStore::new(&settings);
        let handle = store.create("pre-switch")?;

        // Wreck the live tree.
        fsops::remove_entry(&settings.config_dir.join("hypr"))?;
        fs::create_dir_all(settings.config_dir.join("hypr"))?;
        fs::write(settings.home.join(".zshrc"), "clobbered")?;

        let report = store.restore(&handle)?;

        assert_eq!(report.failed, 0);
        assert_eq!(
            fs::read_link(settings.config_dir.join("hypr"))?,
            PathBuf::from("hypr-stealthiq")
        );
        assert_eq!(fs::read_to_string(settings.home.join(".zshrc"))?, "original");

        Ok(())
    }

    #[sealed_test]
    fn restore_is_idempotent() -> anyhow::Result<()> {
        let settings = sandbox();
        fs::create_dir_all(settings.config_dir.join("hypr-stealthiq"))?;
        std::os::unix::fs::symlink("hypr-stealthiq", settings.config_dir.join("hypr"))?;
        fs::write(settings.home.join(".zshrc"), "original")?;

        let store = CheckpointStore::new(&settings);
        let handle = store.create("pre-switch")?;

        fs::write(settings.home.join(".zshrc"), "clobbered")?;

        store.restore(&handle)?;
        let once = live_snapshot(&settings);
        store.restore(&handle)?;
        let twice = live_snapshot(&settings);

        assert_eq!(once, twice);

        Ok(())
    }

    #[sealed_test]
    fn restore_directory_content_from_paired_backup() -> anyhow::Result<()> {
        let settings = sandbox();
        fs::create_dir_all(settings.config_dir.join("hypr"))?;
        fs::write(settings.config_dir.join("hypr/hyprland.conf"), "s0")?;

        let store = CheckpointStore::new(&settings);
        let handle = store.create("pre-switch")?;
        let backup = crate::backup::BackupStore::new(&settings)
            .backup()?
            .path
            .unwrap();
        store.attach_backup(&handle, &backup)?;

        // Mutation replaces the real directory with a variant symlink.
        fsops::remove_entry(&settings.config_dir.join("hypr"))?;
        std::os::unix::fs::symlink("hypr-stealthiq", settings.config_dir.join("hypr"))?;

        store.restore(&handle)?;

        let live = settings.config_dir.join("hypr");
        assert!(!fs::symlink_metadata(&live)?.file_type().is_symlink());
        assert_eq!(fs::read_to_string(live.join("hyprland.conf"))?, "s0");

        Ok(())
    }

    #[sealed_test]
    fn restore_without_paired_backup_skips_directory() -> anyhow::Result<()> {
        let settings = sandbox();
        fs::create_dir_all(settings.config_dir.join("hypr"))?;

        let store = CheckpointStore::new(&settings);
        let handle = store.create("pre-switch")?;

        let report = store.restore(&handle)?;

        assert_eq!(report.skipped, 1);
        assert_eq!(report.failed, 0);

        Ok(())
    }

    #[sealed_test]
    fn restore_removes_entries_created_after_checkpoint() -> anyhow::Result<()> {
        let settings = sandbox();
        fs::create_dir_all(&settings.home)?;

        let store = CheckpointStore::new(&settings);
        let handle = store.create("pre-install")?;

        // Fresh install drops new config in; rollback must take it out.
        fs::create_dir_all(settings.config_dir.join("waybar"))?;
        fs::write(settings.home.join(".zshrc"), "new")?;

        store.restore(&handle)?;

        assert!(!settings.config_dir.join("waybar").exists());
        assert!(!settings.home.join(".zshrc").exists());

        Ok(())
    }

    #[sealed_test]
    fn dry_run_restore_mutates_nothing() -> anyhow::Result<()> {
        let mut settings = sandbox();
        fs::create_dir_all(settings.config_dir.join("hypr-stealthiq"))?;
        std::os::unix::fs::symlink("hypr-stealthiq", settings.config_dir.join("hypr"))?;
        fs::write(settings.home.join(".zshrc"), "original")?;

        let handle = CheckpointStore::new(&settings).create("pre-switch")?;

        // Live state drifts after the checkpoint.
        fs::write(settings.home.join(".zshrc"), "current")?;
        fsops::remove_entry(&settings.config_dir.join("hypr"))?;
        fs::create_dir_all(settings.config_dir.join("hypr"))?;
        fs::create_dir_all(settings.config_dir.join("waybar"))?;

        settings.dry_run = true;
        let report = CheckpointStore::new(&settings).restore(&handle)?;

        assert_eq!(report.failed, 0);
        assert_eq!(fs::read_to_string(settings.home.join(".zshrc"))?, "current");
        assert!(settings.config_dir.join("waybar").exists());
        assert!(!fs::symlink_metadata(settings.config_dir.join("hypr"))?
            .file_type()
            .is_symlink());

        Ok(())
    }

    #[sealed_test]
    fn restore_rejects_invalid_handle() -> anyhow::Result<()> {
        let settings = sandbox();
        fs::create_dir_all(&settings.home)?;

        let result =
            CheckpointStore::new(&settings).restore(Path::new("no/such/checkpoint"));

        assert!(matches!(
            result,
            Err(CheckpointError::InvalidHandle { .. })
        ));

        Ok(())
    }

    #[sealed_test]
    fn list_returns_newest_first() -> anyhow::Result<()> {
        let settings = sandbox();
        fs::create_dir_all(&settings.home)?;

        let store = CheckpointStore::new(&settings);
        let first = store.create("pre-install")?;
        let second = store.create("pre-switch")?;

        let summaries = store.list();

        assert_eq!(summaries.len(), 2);
        assert_eq!(
            summaries[0].id,
            second.file_name().unwrap().to_string_lossy()
        );
        assert_eq!(summaries[0].name, "pre-switch");
        assert_eq!(
            summaries[1].id,
            first.file_name().unwrap().to_string_lossy()
        );

        Ok(())
    }

    #[sealed_test]
    fn resolve_accepts_bare_id_and_full_path() -> anyhow::Result<()> {
        let settings = sandbox();
        fs::create_dir_all(&settings.home)?;

        let store = CheckpointStore::new(&settings);
        let handle = store.create("pre-reset")?;
        let id = handle.file_name().unwrap().to_string_lossy();

        assert_eq!(store.resolve(&id), handle);
        assert_eq!(store.resolve(handle.to_str().unwrap()), handle);

        Ok(())
    }
}
