// SPDX-FileCopyrightText: 2026 dotsnap contributors
// SPDX-License-Identifier: MIT

//! Filesystem primitives.
//!
//! The two mutating primitives here are destructive-overwrite rather than
//! atomic rename-swap: each removes whatever sits at the destination, then
//! recreates it. Recoverability comes from the checkpoint and backup layers,
//! which the orchestrator runs before any of these are allowed to touch live
//! state. Dry-run mode reports the operation that would occur and mutates
//! nothing.

use std::{
    fs,
    path::{Path, PathBuf},
};
use tracing::{debug, info};

/// Copy `source` over `destination`, replacing whatever is there.
///
/// Ensures the destination's parent directory exists. An existing
/// destination (file, directory, or symlink) is removed recursively first;
/// the caller is responsible for having backed it up.
///
/// # Errors
///
/// - Return [`FsError::Remove`] if the existing destination cannot be
///   removed.
/// - Return [`FsError::Copy`] if the copy itself fails.
pub fn safe_copy(source: &Path, destination: &Path, dry_run: bool) -> Result<()> {
    if dry_run {
        info!(
            "dry-run: would copy {:?} -> {:?}",
            source.display(),
            destination.display()
        );
        return Ok(());
    }

    if let Some(parent) = destination.parent() {
        mkdirp::mkdirp(parent).map_err(|err| FsError::Copy {
            source: err,
            from: source.to_path_buf(),
            to: destination.to_path_buf(),
        })?;
    }

    remove_entry(destination)?;

    debug!("copy {:?} -> {:?}", source.display(), destination.display());
    copy_any(source, destination).map_err(|err| FsError::Copy {
        source: err,
        from: source.to_path_buf(),
        to: destination.to_path_buf(),
    })
}

/// Create symlink `link_path -> target`, replacing whatever is at
/// `link_path`.
///
/// # Errors
///
/// - Return [`FsError::Remove`] if the existing entry cannot be removed.
/// - Return [`FsError::Symlink`] if link creation fails.
pub fn safe_symlink(target: &Path, link_path: &Path, dry_run: bool) -> Result<()> {
    if dry_run {
        info!(
            "dry-run: would symlink {:?} -> {:?}",
            link_path.display(),
            target.display()
        );
        return Ok(());
    }

    if let Some(parent) = link_path.parent() {
        mkdirp::mkdirp(parent).map_err(|err| FsError::Symlink {
            source: err,
            target: target.to_path_buf(),
            link: link_path.to_path_buf(),
        })?;
    }

    remove_entry(link_path)?;

    debug!(
        "symlink {:?} -> {:?}",
        link_path.display(),
        target.display()
    );
    std::os::unix::fs::symlink(target, link_path).map_err(|err| FsError::Symlink {
        source: err,
        target: target.to_path_buf(),
        link: link_path.to_path_buf(),
    })
}

/// Remove whatever sits at `path`: file, symlink, or directory tree.
///
/// Missing paths are fine. Symlinks are removed without following, so a
/// symlink to a directory never takes the directory's content with it.
///
/// # Errors
///
/// - Return [`FsError::Remove`] if removal fails.
pub fn remove_entry(path: &Path) -> Result<()> {
    let meta = match fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(err) => {
            return Err(FsError::Remove {
                source: err,
                path: path.to_path_buf(),
            })
        }
    };

    let outcome = if meta.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };

    outcome.map_err(|err| FsError::Remove {
        source: err,
        path: path.to_path_buf(),
    })
}

/// Copy a path of any type to a fresh destination.
///
/// Directories are copied recursively. Symlinks inside a directory tree are
/// reproduced as symlinks; a top-level symlink argument is also reproduced,
/// callers wanting content should resolve first.
fn copy_any(source: &Path, destination: &Path) -> std::io::Result<()> {
    let meta = fs::symlink_metadata(source)?;

    if meta.file_type().is_symlink() {
        let target = fs::read_link(source)?;
        std::os::unix::fs::symlink(target, destination)?;
    } else if meta.is_dir() {
        copy_dir_all(source, destination)?;
    } else {
        fs::copy(source, destination)?;
    }

    Ok(())
}

fn copy_dir_all(source: &Path, destination: &Path) -> std::io::Result<()> {
    fs::create_dir_all(destination)?;
    for entry in fs::read_dir(source)? {
        let entry = entry?;
        copy_any(&entry.path(), &destination.join(entry.file_name()))?;
    }

    Ok(())
}

/// Copy the current content of `source` into `destination`, following a
/// top-level symlink.
///
/// Used by the backup store: a symlinked config directory gets backed up as
/// its resolved content so that a later restore-by-copy has real data to work
/// with.
///
/// # Errors
///
/// - Return [`FsError::Copy`] if the copy fails.
pub fn copy_resolved(source: &Path, destination: &Path) -> Result<()> {
    let resolved = source.canonicalize().map_err(|err| FsError::Copy {
        source: err,
        from: source.to_path_buf(),
        to: destination.to_path_buf(),
    })?;

    copy_any(&resolved, destination).map_err(|err| FsError::Copy {
        source: err,
        from: resolved,
        to: destination.to_path_buf(),
    })
}

/// All possible error types for filesystem primitives.
#[derive(Debug, thiserror::Error)]
pub enum FsError {
    /// Existing entry cannot be removed.
    #[error("cannot remove {path}")]
    Remove {
        source: std::io::Error,
        path: PathBuf,
    },

    /// Copy operation failed.
    #[error("cannot copy {from} to {to}")]
    Copy {
        source: std::io::Error,
        from: PathBuf,
        to: PathBuf,
    },

    /// Symlink creation failed.
    #[error("cannot symlink {link} to {target}")]
    Symlink {
        source: std::io::Error,
        target: PathBuf,
        link: PathBuf,
    },
}

/// Friendly result alias :3
type Result<T, E = FsError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use sealed_test::prelude::*;

    #[sealed_test]
    fn safe_copy_replaces_existing_directory() -> anyhow::Result<()> {
        fs::create_dir_all("src/nested")?;
        fs::write("src/nested/a.conf", "new")?;
        fs::create_dir_all("dst")?;
        fs::write("dst/stale.conf", "old")?;

        safe_copy(Path::new("src"), Path::new("dst"), false)?;

        assert_eq!(fs::read_to_string("dst/nested/a.conf")?, "new");
        assert!(!Path::new("dst/stale.conf").exists());

        Ok(())
    }

    #[sealed_test]
    fn safe_copy_creates_missing_parents() -> anyhow::Result<()> {
        fs::write("a.conf", "data")?;

        safe_copy(Path::new("a.conf"), Path::new("deep/tree/a.conf"), false)?;

        assert_eq!(fs::read_to_string("deep/tree/a.conf")?, "data");

        Ok(())
    }

    #[sealed_test]
    fn safe_symlink_replaces_real_directory() -> anyhow::Result<()> {
        fs::create_dir_all("slot-a")?;
        fs::create_dir_all("live")?;
        fs::write("live/old.conf", "old")?;

        safe_symlink(Path::new("slot-a"), Path::new("live"), false)?;

        let target = fs::read_link("live")?;
        assert_eq!(target, PathBuf::from("slot-a"));

        Ok(())
    }

    #[sealed_test]
    fn dry_run_mutates_nothing() -> anyhow::Result<()> {
        fs::write("a.conf", "data")?;

        safe_copy(Path::new("a.conf"), Path::new("b.conf"), true)?;
        safe_symlink(Path::new("a.conf"), Path::new("c.conf"), true)?;

        assert!(!Path::new("b.conf").exists());
        assert!(!Path::new("c.conf").exists());

        Ok(())
    }

    #[sealed_test]
    fn remove_entry_does_not_follow_symlinks() -> anyhow::Result<()> {
        fs::create_dir_all("real")?;
        fs::write("real/keep.conf", "keep")?;
        std::os::unix::fs::symlink("real", "link")?;

        remove_entry(Path::new("link"))?;

        assert!(!Path::new("link").exists());
        assert_eq!(fs::read_to_string("real/keep.conf")?, "keep");

        Ok(())
    }

    #[sealed_test]
    fn copy_resolved_follows_top_level_symlink() -> anyhow::Result<()> {
        fs::create_dir_all("real")?;
        fs::write("real/a.conf", "data")?;
        std::os::unix::fs::symlink("real", "link")?;

        copy_resolved(Path::new("link"), Path::new("out"))?;

        assert!(Path::new("out").is_dir());
        assert!(!fs::symlink_metadata("out")?.file_type().is_symlink());
        assert_eq!(fs::read_to_string("out/a.conf")?, "data");

        Ok(())
    }
}
