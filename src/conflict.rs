// SPDX-FileCopyrightText: 2026 dotsnap contributors
// SPDX-License-Identifier: MIT

//! Pre-flight conflict detection.
//!
//! Before the installer touches anything, it scans which tracked destinations
//! already exist and tells the user what will happen to them. The scan is a
//! stateless pure read; the decision to proceed belongs to the user (or to
//! unattended mode, which answers yes).

use crate::config::{Settings, TRACKED_ENTRIES};

use inquire::Confirm;
use std::{fs, path::PathBuf};
use tracing::{info, warn};

/// One existing destination the install would overwrite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Conflict {
    /// Destination is a symlink; reports its current target.
    Symlink { name: String, target: PathBuf },

    /// Destination is a real file or directory. It will be backed up before
    /// being replaced.
    Existing { name: String },
}

/// Scan tracked destinations for entries that already exist.
pub fn detect(settings: &Settings) -> Vec<Conflict> {
    TRACKED_ENTRIES
        .iter()
        .filter_map(|entry| {
            let live = entry.live_path(settings);
            let meta = fs::symlink_metadata(&live).ok()?;

            if meta.file_type().is_symlink() {
                Some(Conflict::Symlink {
                    name: entry.name.to_string(),
                    target: fs::read_link(&live).unwrap_or_default(),
                })
            } else {
                Some(Conflict::Existing {
                    name: entry.name.to_string(),
                })
            }
        })
        .collect()
}

/// Report detected conflicts and ask the user whether to proceed.
///
/// No conflicts or unattended mode means proceed without prompting. A failed
/// prompt (no tty) counts as a refusal.
pub fn confirm(conflicts: &[Conflict], settings: &Settings) -> bool {
    if conflicts.is_empty() {
        return true;
    }

    for conflict in conflicts {
        match conflict {
            Conflict::Symlink { name, target } => {
                warn!("{name} is currently a symlink to {:?}", target.display());
            }
            Conflict::Existing { name } => {
                warn!("{name} already exists and will be backed up before replacement");
            }
        }
    }

    if settings.assume_yes {
        info!("unattended mode: proceeding past {} conflict(s)", conflicts.len());
        return true;
    }

    Confirm::new("Existing configuration will be replaced. Continue?")
        .with_default(false)
        .prompt()
        .unwrap_or(false)
}
