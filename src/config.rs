// SPDX-FileCopyrightText: 2026 dotsnap contributors
// SPDX-License-Identifier: MIT

//! Configuration layout.
//!
//! Two kinds of configuration live here. [`Settings`] is the immutable
//! per-run configuration constructed once at process start and passed by
//! reference to every component; there are no ambient globals. [`Manifest`]
//! is the TOML document shipped with the dotfiles payload that names the
//! available variants, their package sets, and assorted knobs.
//!
//! The tracked-entry table also lives here. Every component that walks
//! tracked configuration (checkpoint store, backup store, conflict detector)
//! shares this single table, so the set of tracked names cannot drift between
//! them.

use serde::{Deserialize, Serialize};
use std::{
    fmt::{Display, Error as FmtError, Formatter, Result as FmtResult},
    path::{Path, PathBuf},
    str::FromStr,
};

/// Immutable per-run configuration.
///
/// Constructed once in `main` and passed by reference everywhere. Tests build
/// one of these pointing at a sandbox directory instead of the real home.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// User's home directory.
    pub home: PathBuf,

    /// XDG configuration directory, normally `$HOME/.config`.
    pub config_dir: PathBuf,

    /// Root of the backup tree.
    pub backup_root: PathBuf,

    /// Root of the checkpoint store.
    pub checkpoint_root: PathBuf,

    /// Directory holding operation logs.
    pub log_dir: PathBuf,

    /// Fixed OS-wide lock file path.
    pub lock_path: PathBuf,

    /// Directory holding the dotfiles payload to install.
    pub payload_dir: PathBuf,

    /// Report mutations without performing them.
    pub dry_run: bool,

    /// Unattended mode. Skips interactive confirmation prompts.
    pub assume_yes: bool,
}

impl Settings {
    /// Construct settings from the real environment.
    ///
    /// # Errors
    ///
    /// - Return [`crate::path::NoWayHome`] if home directory path cannot be
    ///   determined.
    pub fn from_env(
        payload_dir: PathBuf,
        dry_run: bool,
        assume_yes: bool,
    ) -> crate::path::Result<Self> {
        let home = crate::path::home_dir()?;
        Ok(Self {
            config_dir: home.join(".config"),
            backup_root: crate::path::backup_root()?,
            checkpoint_root: crate::path::checkpoint_root()?,
            log_dir: crate::path::log_dir()?,
            lock_path: crate::path::lock_path(),
            home,
            payload_dir,
            dry_run,
            assume_yes,
        })
    }
}

/// Kind of a tracked configuration entry.
///
/// Determines how the entry is snapshotted and where it lives relative to the
/// home directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// A configuration directory under `$HOME/.config`. May exist on disk as
    /// a real directory or as a symlink into a variant slot.
    ConfigDir,

    /// A shell rc file directly under `$HOME`. Snapshotted by full byte copy.
    RcFile,
}

/// One named configuration target the installer knows how to snapshot,
/// back up, and restore.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackedEntry {
    pub name: &'static str,
    pub kind: EntryKind,
}

impl TrackedEntry {
    /// Resolve where this entry lives in the live configuration tree.
    pub fn live_path(&self, settings: &Settings) -> PathBuf {
        match self.kind {
            EntryKind::ConfigDir => settings.config_dir.join(self.name),
            EntryKind::RcFile => settings.home.join(self.name),
        }
    }
}

/// The fixed set of tracked configuration entries.
///
/// Shared by the checkpoint store, the backup store, and the conflict
/// detector. Extending the installer to cover another config directory means
/// adding exactly one row here.
pub const TRACKED_ENTRIES: &[TrackedEntry] = &[
    TrackedEntry { name: "hypr", kind: EntryKind::ConfigDir },
    TrackedEntry { name: "waybar", kind: EntryKind::ConfigDir },
    TrackedEntry { name: "rofi", kind: EntryKind::ConfigDir },
    TrackedEntry { name: "dunst", kind: EntryKind::ConfigDir },
    TrackedEntry { name: "kitty", kind: EntryKind::ConfigDir },
    TrackedEntry { name: "swaylock", kind: EntryKind::ConfigDir },
    TrackedEntry { name: "wlogout", kind: EntryKind::ConfigDir },
    TrackedEntry { name: ".zshrc", kind: EntryKind::RcFile },
    TrackedEntry { name: ".bashrc", kind: EntryKind::RcFile },
];

/// Look up a tracked entry by name.
pub fn tracked_entry(name: &str) -> Option<&'static TrackedEntry> {
    TRACKED_ENTRIES.iter().find(|entry| entry.name == name)
}

/// Payload manifest layout.
///
/// The dotfiles payload ships a `dotsnap.toml` at its top level describing
/// the installable variants and their package sets. When the file is missing
/// the built-in defaults below apply, which match the stock payload layout.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct Manifest {
    /// Settings for the payload as a whole.
    pub settings: ManifestSettings,

    /// Installable variant listing.
    #[serde(rename = "variant")]
    pub variants: Vec<Variant>,

    /// Package sets shared across variants.
    pub packages: PackageSets,
}

impl Manifest {
    /// Load the manifest from `dotsnap.toml` inside the payload directory,
    /// falling back to built-in defaults when the file does not exist.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::Read`] if the manifest exists but cannot be
    ///   read.
    /// - Return [`ConfigError::Deserialize`] if the manifest cannot be
    ///   parsed.
    pub fn load(payload_dir: &Path) -> Result<Self> {
        let path = payload_dir.join("dotsnap.toml");
        if !path.exists() {
            return Ok(Self::default());
        }

        let data = std::fs::read_to_string(&path).map_err(|err| ConfigError::Read {
            source: err,
            path: path.clone(),
        })?;

        data.parse()
    }

    /// Look up a variant by name.
    pub fn variant(&self, name: &str) -> Option<&Variant> {
        self.variants.iter().find(|variant| variant.name == name)
    }

    /// Pick the slot a displaced real directory should be moved into when
    /// switching to `selected`: the first variant that is not the selected
    /// one.
    pub fn other_variant(&self, selected: &str) -> Option<&Variant> {
        self.variants.iter().find(|variant| variant.name != selected)
    }
}

impl Default for Manifest {
    fn default() -> Self {
        Self {
            settings: ManifestSettings {
                description: "Hyprland desktop dotfiles".into(),
                active_entry: "hypr".into(),
                validate_binary: Some("Hyprland".into()),
                payload_root: None,
            },
            variants: vec![
                Variant {
                    name: "stealthiq".into(),
                    slot: "hypr-stealthiq".into(),
                    packages: vec![
                        "hyprland".into(),
                        "waybar".into(),
                        "rofi-wayland".into(),
                        "dunst".into(),
                        "kitty".into(),
                        "swww".into(),
                    ],
                },
                Variant {
                    name: "jakoolit".into(),
                    slot: "hypr-jakoolit".into(),
                    packages: vec![
                        "hyprland".into(),
                        "waybar".into(),
                        "swaync".into(),
                        "kitty".into(),
                        "swww".into(),
                    ],
                },
            ],
            packages: PackageSets {
                core: vec![
                    "git".into(),
                    "polkit-gnome".into(),
                    "xdg-desktop-portal-hyprland".into(),
                    "qt5-wayland".into(),
                    "qt6-wayland".into(),
                ],
                aur: vec!["wlogout".into(), "swaylock-effects".into()],
                gpu: GpuPackages {
                    amd: vec!["mesa".into(), "vulkan-radeon".into()],
                    nvidia: vec!["nvidia-dkms".into(), "nvidia-utils".into()],
                    intel: vec!["mesa".into(), "vulkan-intel".into()],
                },
            },
        }
    }
}

impl FromStr for Manifest {
    type Err = ConfigError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let mut manifest: Manifest = toml::de::from_str(data).map_err(ConfigError::Deserialize)?;

        // INVARIANT: Perform shell expansion on payload root override.
        if let Some(root) = manifest.settings.payload_root {
            manifest.settings.payload_root = Some(PathBuf::from(
                shellexpand::full(root.to_string_lossy().as_ref())
                    .map_err(ConfigError::ShellExpansion)?
                    .into_owned(),
            ));
        }

        Ok(manifest)
    }
}

impl Display for Manifest {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(
            toml::ser::to_string_pretty(self)
                .map_err(ConfigError::Serialize)?
                .as_str(),
        )
    }
}

/// Payload-wide manifest settings.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct ManifestSettings {
    /// Brief description of what the payload contains.
    pub description: String,

    /// Tracked entry that carries the variant switch symlink.
    pub active_entry: String,

    /// Binary that must resolve on `$PATH` for post-install validation.
    pub validate_binary: Option<String>,

    /// Optional override for where variant payload directories live.
    pub payload_root: Option<PathBuf>,
}

/// One installable desktop configuration variant.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct Variant {
    /// Name the user selects on the command line.
    pub name: String,

    /// Directory name of the variant's payload slot under `$HOME/.config`.
    pub slot: String,

    /// Packages this variant needs on top of the core set.
    pub packages: Vec<String>,
}

/// Package sets shared across variants.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct PackageSets {
    /// Packages every variant needs.
    pub core: Vec<String>,

    /// Packages resolved through the AUR helper.
    pub aur: Vec<String>,

    /// GPU driver packages keyed by detected vendor.
    #[serde(default)]
    pub gpu: GpuPackages,
}

/// GPU driver package listing per vendor.
#[derive(Debug, Default, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct GpuPackages {
    #[serde(default)]
    pub amd: Vec<String>,

    #[serde(default)]
    pub nvidia: Vec<String>,

    #[serde(default)]
    pub intel: Vec<String>,
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read manifest file.
    #[error("cannot read manifest at {path}")]
    Read {
        source: std::io::Error,
        path: PathBuf,
    },

    /// Failed to deserialize configuration.
    #[error(transparent)]
    Deserialize(#[from] toml::de::Error),

    /// Failed to serialize configuration.
    #[error(transparent)]
    Serialize(#[from] toml::ser::Error),

    /// Failed to perform shell expansion on configuration.
    #[error(transparent)]
    ShellExpansion(#[from] shellexpand::LookupError<std::env::VarError>),
}

impl From<ConfigError> for FmtError {
    fn from(_: ConfigError) -> Self {
        FmtError
    }
}

/// Friendly result alias :3
type Result<T, E = ConfigError> = std::result::Result<T, E>;
