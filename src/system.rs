// SPDX-FileCopyrightText: 2026 dotsnap contributors
// SPDX-License-Identifier: MIT

//! System probes and prerequisite checks.
//!
//! Everything here is either a hard pre-flight check (required tools, home
//! writability, payload presence, free space) or a best-effort diagnostic
//! probe (kernel version, GPU descriptor, installed package list) whose
//! failure never aborts a run.

use crate::config::{GpuPackages, Settings};

use std::{
    fs,
    path::PathBuf,
    process::Command,
};
use tracing::warn;

/// Minimum free space required on the filesystem hosting `$HOME`.
const MIN_FREE_SPACE_MB: u64 = 500;

/// Locate a tool on `$PATH`.
pub fn which(tool: &str) -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(tool))
        .find(|candidate| candidate.is_file())
}

/// Hard pre-flight checks before any mutating run.
///
/// `needs_payload` is false for flows that never read the payload (reset,
/// rollback). The free-space probe is itself best-effort: an unreadable `df`
/// is a warning, a readable one below the floor is fatal.
///
/// # Errors
///
/// - Return [`PrereqError::MissingTool`] if a required tool is not on
///   `$PATH`.
/// - Return [`PrereqError::HomeNotWritable`] if the home directory rejects
///   writes.
/// - Return [`PrereqError::MissingPayload`] if the payload directory is
///   absent.
/// - Return [`PrereqError::InsufficientSpace`] if free space is below the
///   floor.
pub fn check_prerequisites(
    settings: &Settings,
    tools: &[&str],
    needs_payload: bool,
) -> Result<()> {
    for tool in tools {
        if which(tool).is_none() {
            return Err(PrereqError::MissingTool {
                name: tool.to_string(),
            });
        }
    }

    let probe = settings.home.join(".dotsnap-write-probe");
    fs::write(&probe, b"probe")
        .and_then(|()| fs::remove_file(&probe))
        .map_err(|err| PrereqError::HomeNotWritable {
            source: err,
            path: settings.home.clone(),
        })?;

    if needs_payload && !settings.payload_dir.is_dir() {
        return Err(PrereqError::MissingPayload {
            path: settings.payload_dir.clone(),
        });
    }

    match free_space_mb(&settings.home) {
        Some(available) if available < MIN_FREE_SPACE_MB => {
            return Err(PrereqError::InsufficientSpace {
                needed: MIN_FREE_SPACE_MB,
                available,
            });
        }
        Some(_) => {}
        None => warn!("cannot determine free space; continuing anyway"),
    }

    Ok(())
}

/// Available space in megabytes on the filesystem hosting `path`.
///
/// Parses `df -Pk` output. Best-effort.
pub fn free_space_mb(path: &std::path::Path) -> Option<u64> {
    let output = Command::new("df").arg("-Pk").arg(path).output().ok()?;
    if !output.status.success() {
        return None;
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let avail_kb: u64 = stdout
        .lines()
        .nth(1)?
        .split_whitespace()
        .nth(3)?
        .parse()
        .ok()?;

    Some(avail_kb / 1024)
}

/// Kernel version via `uname -r`. Best-effort, diagnostic only.
pub fn kernel_version() -> Option<String> {
    let output = Command::new("uname").arg("-r").output().ok()?;
    output
        .status
        .success()
        .then(|| String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Raw GPU descriptor from `lspci`. Best-effort, diagnostic only.
pub fn gpu_descriptor() -> Option<String> {
    let output = Command::new("lspci").output().ok()?;
    if !output.status.success() {
        return None;
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    stdout
        .lines()
        .find(|line| line.contains("VGA") || line.contains("3D controller"))
        .map(|line| line.trim().to_string())
}

/// Installed package listing via `pacman -Qqe`. Best-effort, diagnostic
/// only.
pub fn installed_packages() -> Option<String> {
    let output = Command::new("pacman").args(["-Qqe"]).output().ok()?;
    output
        .status
        .success()
        .then(|| String::from_utf8_lossy(&output.stdout).into_owned())
}

/// GPU vendor classification for driver package selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpuKind {
    Amd,
    Nvidia,
    Intel,
    Unknown,
}

impl GpuKind {
    /// Classify a raw descriptor string.
    pub fn classify(descriptor: &str) -> Self {
        let lower = descriptor.to_lowercase();
        if lower.contains("nvidia") {
            Self::Nvidia
        } else if lower.contains("amd") || lower.contains("radeon") || lower.contains("ati ") {
            Self::Amd
        } else if lower.contains("intel") {
            Self::Intel
        } else {
            Self::Unknown
        }
    }

    /// Pick the driver package set for this vendor.
    pub fn driver_packages<'a>(&self, packages: &'a GpuPackages) -> &'a [String] {
        match self {
            Self::Amd => &packages.amd,
            Self::Nvidia => &packages.nvidia,
            Self::Intel => &packages.intel,
            Self::Unknown => &[],
        }
    }
}

/// All possible error types for prerequisite checks.
#[derive(Debug, thiserror::Error)]
pub enum PrereqError {
    /// Required tool is not on `$PATH`.
    #[error("required tool {name} not found on PATH")]
    MissingTool { name: String },

    /// Home directory rejects writes.
    #[error("home directory {path} is not writable")]
    HomeNotWritable {
        source: std::io::Error,
        path: PathBuf,
    },

    /// Dotfiles payload directory is absent.
    #[error("dotfiles payload not found at {path}")]
    MissingPayload { path: PathBuf },

    /// Not enough free space to proceed safely.
    #[error("insufficient free space: need {needed} MB, have {available} MB")]
    InsufficientSpace { needed: u64, available: u64 },
}

/// Friendly result alias :3
type Result<T, E = PrereqError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use sealed_test::prelude::*;
    use simple_test_case::test_case;

    #[test_case("NVIDIA Corporation GA104", GpuKind::Nvidia; "nvidia card")]
    #[test_case("Advanced Micro Devices [AMD/ATI] Navi 33", GpuKind::Amd; "amd card")]
    #[test_case("Intel Corporation Alder Lake-P GT2", GpuKind::Intel; "intel card")]
    #[test_case("Matrox Electronics Systems G200", GpuKind::Unknown; "unclassified card")]
    #[test]
    fn classify_gpu_descriptor(descriptor: &str, expect: GpuKind) {
        assert_eq!(GpuKind::classify(descriptor), expect);
    }

    #[test]
    fn driver_packages_follow_vendor() {
        let packages = GpuPackages {
            amd: vec!["mesa".into()],
            nvidia: vec!["nvidia-dkms".into()],
            intel: vec!["vulkan-intel".into()],
        };

        assert_eq!(GpuKind::Amd.driver_packages(&packages), ["mesa"]);
        assert_eq!(GpuKind::Nvidia.driver_packages(&packages), ["nvidia-dkms"]);
        assert!(GpuKind::Unknown.driver_packages(&packages).is_empty());
    }

    #[test]
    fn which_finds_a_shell() {
        assert!(which("sh").is_some());
        assert!(which("definitely-not-a-real-tool-xyz").is_none());
    }

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
    fn missing_tool_is_fatal() -> anyhow::Result<()> {
        let settings = sandbox();
        fs::create_dir_all(&settings.home)?;

        let result = check_prerequisites(&settings, &["definitely-not-a-real-tool-xyz"], false);

        assert!(matches!(result, Err(PrereqError::MissingTool { .. })));

        Ok(())
    }

    #[sealed_test]
    fn missing_payload_is_fatal_when_required() -> anyhow::Result<()> {
        let settings = sandbox();
        fs::create_dir_all(&settings.home)?;

        let result = check_prerequisites(&settings, &[], true);
        assert!(matches!(result, Err(PrereqError::MissingPayload { .. })));

        // The same tree passes when the flow does not read the payload.
        check_prerequisites(&settings, &[], false)?;

        Ok(())
    }
}
