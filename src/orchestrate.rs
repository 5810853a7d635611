// SPDX-FileCopyrightText: 2026 dotsnap contributors
// SPDX-License-Identifier: MIT

//! Run orchestration.
//!
//! The orchestrator sequences every mutating flow through a fixed state
//! machine: lock, prerequisite checks, checkpoint, backup, mutation,
//! validation. It is the only component allowed to decide whether an error
//! is fatal, triggers rollback, or is swallowed as a warning; lower layers
//! just report outcomes.
//!
//! # Failure Routing
//!
//! - Anything before mutation aborts without rollback: nothing was touched
//!   yet.
//! - A failure *during* mutation triggers an automatic restore of the run's
//!   checkpoint.
//! - A failed post-mutation validation does **not** roll back automatically:
//!   the mutated state may still be closer to what the user wants than the
//!   old one, so the checkpoint identity is reported and rollback is left to
//!   the operator. This asymmetry is deliberate.
//!
//! External interruption (SIGINT/SIGTERM) runs the same cleanup as a failure
//! exit through the registry at the bottom of this module: release the lock
//! and, if the run had an armed checkpoint and had not reached success, roll
//! back to it.

use crate::{
    backup::{BackupError, BackupStore},
    checkpoint::{CheckpointError, CheckpointStore, RestoreReport},
    config::{EntryKind, Manifest, Settings, Variant, TRACKED_ENTRIES},
    conflict, fsops,
    fsops::FsError,
    lock::{LockError, LockGuard},
    pacman::{PackageBackend, PackageError, RetryPolicy},
    system,
    system::{GpuKind, PrereqError},
};

use chrono::Local;
use std::path::{Path, PathBuf};
use tracing::{info, instrument, warn};

/// States of one orchestrated run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Locked,
    PrerequisitesChecked,
    Checkpointed,
    BackedUp,
    Mutating,
    Validated,
    Success,
    RolledBack,
    Failed,
}

/// The mutating flows the orchestrator can drive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Copy the payload in, install packages, and activate a variant.
    Install { variant: String },

    /// Repoint the active symlink to another variant.
    Switch { variant: String },

    /// Remove installed configuration and variant packages.
    Reset,
}

impl Action {
    fn checkpoint_name(&self) -> &'static str {
        match self {
            Self::Install { .. } => "pre-install",
            Self::Switch { .. } => "pre-switch",
            Self::Reset => "pre-reset",
        }
    }

    fn needs_packages(&self) -> bool {
        matches!(self, Self::Install { .. } | Self::Reset)
    }

    fn needs_payload(&self) -> bool {
        matches!(self, Self::Install { .. })
    }
}

/// Drives one run through the state machine.
#[derive(Debug)]
pub struct Orchestrator<'a, B: PackageBackend> {
    settings: &'a Settings,
    manifest: &'a Manifest,
    backend: B,
    retry: RetryPolicy,
    phase: Phase,
}

impl<'a, B: PackageBackend> Orchestrator<'a, B> {
    pub fn new(settings: &'a Settings, manifest: &'a Manifest, backend: B) -> Self {
        Self {
            settings,
            manifest,
            backend,
            retry: RetryPolicy::default(),
            phase: Phase::Idle,
        }
    }

    /// Current state-machine phase. Terminal after [`Self::run`].
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Drive `action` to a terminal state.
    ///
    /// # Errors
    ///
    /// - Return [`OrchestrateError::MutationFailed`] if the mutation step
    ///   failed and live state was rolled back to the run's checkpoint.
    /// - Return [`OrchestrateError::ValidationFailed`] if a post-condition
    ///   was unmet; live state is left as mutated and the checkpoint is
    ///   reported for manual rollback.
    /// - Return the corresponding error for lock contention, failed
    ///   prerequisites, user abort, or a backup that failed verification;
    ///   none of these mutate live state.
    #[instrument(skip(self), level = "debug")]
    pub fn run(&mut self, action: Action) -> Result<()> {
        let result = self.drive(&action);
        cleanup::clear();

        self.phase = match &result {
            Ok(()) => Phase::Success,
            Err(OrchestrateError::MutationFailed { .. }) => Phase::RolledBack,
            Err(_) => Phase::Failed,
        };

        result
    }

    fn drive(&mut self, action: &Action) -> Result<()> {
        let lock = LockGuard::acquire(&self.settings.lock_path)?;
        cleanup::register(self.settings);
        self.phase = Phase::Locked;

        let tools = if action.needs_packages() {
            self.backend.required_tools()
        } else {
            &[]
        };
        system::check_prerequisites(self.settings, tools, action.needs_payload())?;
        self.phase = Phase::PrerequisitesChecked;

        if let Action::Install { .. } = action {
            let conflicts = conflict::detect(self.settings);
            if !conflict::confirm(&conflicts, self.settings) {
                return Err(OrchestrateError::Aborted);
            }
        }

        let store = CheckpointStore::new(self.settings);
        let checkpoint = if self.settings.dry_run {
            info!("dry-run: would create checkpoint and backup");
            None
        } else {
            let handle = store.create(action.checkpoint_name())?;
            self.phase = Phase::Checkpointed;

            // A backup that fails verification aborts here, before anything
            // was mutated; no rollback needed.
            let report = BackupStore::new(self.settings).backup()?;
            if let Some(backup) = &report.path {
                store.attach_backup(&handle, backup)?;
            }
            self.phase = Phase::BackedUp;

            cleanup::arm_rollback(&handle);
            Some(handle)
        };

        self.phase = Phase::Mutating;
        if let Err(source) = self.mutate(action) {
            let Some(handle) = checkpoint else {
                return Err(OrchestrateError::MutationFailedNoCheckpoint { source });
            };

            warn!("mutation failed; rolling back to {:?}", handle.display());
            match store.restore(&handle) {
                Ok(report) => info!(
                    "rollback restored {} entr(ies), skipped {}",
                    report.restored, report.skipped
                ),
                Err(err) => warn!("rollback itself failed: {err}"),
            }

            return Err(OrchestrateError::MutationFailed {
                checkpoint: handle,
                source,
            });
        }

        if let Err(reason) = self.validate(action) {
            return Err(OrchestrateError::ValidationFailed {
                checkpoint,
                reason,
            });
        }
        self.phase = Phase::Validated;

        drop(lock);
        Ok(())
    }

    fn mutate(&self, action: &Action) -> std::result::Result<(), StepError> {
        match action {
            Action::Install { variant } => self.install(variant),
            Action::Switch { variant } => {
                let variant = self.lookup_variant(variant)?;
                self.switch_active(variant)
            }
            Action::Reset => self.reset(),
        }
    }

    fn install(&self, variant: &str) -> std::result::Result<(), StepError> {
        let variant = self.lookup_variant(variant)?;

        // Shared config directories and rc files first.
        for entry in TRACKED_ENTRIES {
            if entry.name == self.manifest.settings.active_entry {
                continue;
            }

            let source = self.settings.payload_dir.join(entry.name);
            if !source.exists() {
                continue;
            }

            fsops::safe_copy(&source, &entry.live_path(self.settings), self.settings.dry_run)?;
        }

        // Variant payload slot. Some payloads preseed the slot only on first
        // install, so a missing slot directory is a warning here and gets
        // caught by validation if it matters.
        let slot_payload = self.settings.payload_dir.join(&variant.slot);
        if slot_payload.exists() {
            fsops::safe_copy(
                &slot_payload,
                &self.settings.config_dir.join(&variant.slot),
                self.settings.dry_run,
            )?;
        } else {
            warn!("payload ships no slot directory for {}", variant.name);
        }

        self.install_packages(variant)?;
        self.switch_active(variant)
    }

    fn install_packages(&self, variant: &Variant) -> std::result::Result<(), StepError> {
        let packages = &self.manifest.packages;
        let gpu = system::gpu_descriptor()
            .map(|descriptor| GpuKind::classify(&descriptor))
            .unwrap_or(GpuKind::Unknown);

        let mut native = packages.core.clone();
        native.extend(variant.packages.iter().cloned());
        native.extend(gpu.driver_packages(&packages.gpu).iter().cloned());

        if self.settings.dry_run {
            info!("dry-run: would install {} native package(s)", native.len());
            info!("dry-run: would install {} AUR package(s)", packages.aur.len());
            return Ok(());
        }

        self.retry
            .run("package install", || self.backend.install(&native))?;
        self.retry
            .run("AUR package install", || self.backend.install_aur(&packages.aur))?;

        Ok(())
    }

    /// Point the active entry at `variant`'s slot.
    ///
    /// A real (non-symlink) directory sitting at the active path is moved
    /// aside into the other variant's slot first, so that switching back
    /// later is a pure symlink repoint instead of data loss.
    fn switch_active(&self, variant: &Variant) -> std::result::Result<(), StepError> {
        let active = self
            .settings
            .config_dir
            .join(&self.manifest.settings.active_entry);

        if let Ok(meta) = std::fs::symlink_metadata(&active) {
            if !meta.file_type().is_symlink() {
                self.move_aside(&active, variant)?;
            }
        }

        fsops::safe_symlink(
            Path::new(&variant.slot),
            &active,
            self.settings.dry_run,
        )?;

        Ok(())
    }

    fn move_aside(&self, active: &Path, selected: &Variant) -> std::result::Result<(), StepError> {
        let mut dest = match self.manifest.other_variant(&selected.name) {
            Some(other) => self.settings.config_dir.join(&other.slot),
            None => self
                .settings
                .config_dir
                .join(format!("{}-displaced", selected.slot)),
        };

        if dest.exists() {
            let fallback = format!(
                "{}-displaced-{}",
                dest.file_name().unwrap_or_default().to_string_lossy(),
                Local::now().timestamp()
            );
            warn!(
                "slot {:?} already occupied; moving aside to {fallback}",
                dest.display()
            );
            dest = self.settings.config_dir.join(fallback);
        }

        if self.settings.dry_run {
            info!(
                "dry-run: would move {:?} aside to {:?}",
                active.display(),
                dest.display()
            );
            return Ok(());
        }

        info!("moving {:?} aside to {:?}", active.display(), dest.display());
        std::fs::rename(active, &dest).map_err(|err| StepError::MoveAside {
            source: err,
            from: active.to_path_buf(),
            to: dest,
        })
    }

    fn reset(&self) -> std::result::Result<(), StepError> {
        if self.settings.dry_run {
            info!("dry-run: would remove tracked configuration and variant packages");
            return Ok(());
        }

        for entry in TRACKED_ENTRIES {
            fsops::remove_entry(&entry.live_path(self.settings))?;
        }

        for variant in &self.manifest.variants {
            fsops::remove_entry(&self.settings.config_dir.join(&variant.slot))?;
        }

        // Package state is secondary to configuration state: removal gets a
        // single cascading retry, and even persistent failure only warns.
        let mut packages: Vec<String> = self
            .manifest
            .variants
            .iter()
            .flat_map(|variant| variant.packages.iter().cloned())
            .collect();
        packages.sort();
        packages.dedup();

        if let Err(err) = self.backend.remove(&packages, false) {
            warn!("package removal failed ({err}); retrying with cascade");
            if let Err(err) = self.backend.remove(&packages, true) {
                warn!("cascading package removal also failed: {err}");
            }
        }

        Ok(())
    }

    fn validate(&self, action: &Action) -> std::result::Result<(), String> {
        if self.settings.dry_run {
            info!("dry-run: skipping validation");
            return Ok(());
        }

        match action {
            Action::Install { variant } | Action::Switch { variant } => {
                let variant = self
                    .lookup_variant(variant)
                    .map_err(|err| err.to_string())?;
                let active = self
                    .settings
                    .config_dir
                    .join(&self.manifest.settings.active_entry);

                let target = std::fs::read_link(&active).map_err(|_| {
                    format!("{} is not a symlink after activation", active.display())
                })?;
                if target != Path::new(&variant.slot) {
                    return Err(format!(
                        "{} points at {} instead of {}",
                        active.display(),
                        target.display(),
                        variant.slot
                    ));
                }

                let slot = self.settings.config_dir.join(&variant.slot);
                if !slot.is_dir() {
                    return Err(format!("slot directory {} is missing", slot.display()));
                }

                if let (Action::Install { .. }, Some(binary)) =
                    (action, &self.manifest.settings.validate_binary)
                {
                    if system::which(binary).is_none() {
                        return Err(format!("{binary} does not resolve on PATH after install"));
                    }
                }

                Ok(())
            }
            Action::Reset => {
                let active = self
                    .settings
                    .config_dir
                    .join(&self.manifest.settings.active_entry);
                if std::fs::symlink_metadata(&active).is_ok() {
                    return Err(format!("{} still exists after reset", active.display()));
                }

                Ok(())
            }
        }
    }

    fn lookup_variant(&self, name: &str) -> std::result::Result<&Variant, StepError> {
        self.manifest
            .variant(name)
            .ok_or_else(|| StepError::UnknownVariant {
                name: name.to_string(),
            })
    }
}

/// Install the package sets without touching configuration files.
///
/// No checkpoint or backup is taken: package state is outside the safety
/// core's tracked set. The lock is still held since this mutates the system.
///
/// # Errors
///
/// - Return [`OrchestrateError::Lock`] on lock contention.
/// - Return [`OrchestrateError::Prereq`] if required tools are missing.
/// - Return [`OrchestrateError::Package`] once retries are exhausted.
pub fn install_deps(
    settings: &Settings,
    manifest: &Manifest,
    backend: &impl PackageBackend,
) -> Result<()> {
    let _lock = LockGuard::acquire(&settings.lock_path)?;
    system::check_prerequisites(settings, backend.required_tools(), false)?;

    let gpu = system::gpu_descriptor()
        .map(|descriptor| GpuKind::classify(&descriptor))
        .unwrap_or(GpuKind::Unknown);

    let mut native = manifest.packages.core.clone();
    native.extend(gpu.driver_packages(&manifest.packages.gpu).iter().cloned());

    let retry = RetryPolicy::default();
    retry.run("package install", || backend.install(&native))?;
    retry.run("AUR package install", || {
        backend.install_aur(&manifest.packages.aur)
    })?;

    Ok(())
}

/// Take a standalone backup of the current tracked configuration.
///
/// # Errors
///
/// - Return [`OrchestrateError::Lock`] on lock contention.
/// - Return [`OrchestrateError::Backup`] if the backup fails verification.
pub fn run_backup(settings: &Settings) -> Result<crate::backup::BackupReport> {
    let _lock = LockGuard::acquire(&settings.lock_path)?;
    Ok(BackupStore::new(settings).backup()?)
}

/// Restore live state from a stored checkpoint.
///
/// # Errors
///
/// - Return [`OrchestrateError::Lock`] on lock contention.
/// - Return [`OrchestrateError::Checkpoint`] if the identifier does not
///   resolve to a valid checkpoint.
pub fn rollback(settings: &Settings, id: &str) -> Result<RestoreReport> {
    let _lock = LockGuard::acquire(&settings.lock_path)?;
    let store = CheckpointStore::new(settings);
    let handle = store.resolve(id);

    info!("rolling back to {:?}", handle.display());
    Ok(store.restore(&handle)?)
}

/// Export the current live state of all tracked entries into a portable
/// directory, resolving symlinks to content.
///
/// Read-only with respect to tracked entries; no lock required. Returns the
/// number of entries exported.
///
/// # Errors
///
/// - Return [`OrchestrateError::Fs`] if a copy fails.
pub fn export_tree(settings: &Settings, dest: &Path) -> Result<usize> {
    let mut exported = 0;
    for entry in TRACKED_ENTRIES {
        let live = entry.live_path(settings);
        if std::fs::symlink_metadata(&live).is_err() {
            continue;
        }

        let out = match entry.kind {
            EntryKind::ConfigDir => dest.join(".config").join(entry.name),
            EntryKind::RcFile => dest.join(entry.name),
        };

        if let Some(parent) = out.parent() {
            mkdirp::mkdirp(parent).map_err(|err| FsError::Copy {
                source: err,
                from: live.clone(),
                to: out.clone(),
            })?;
        }

        fsops::copy_resolved(&live, &out)?;
        info!("exported {}", entry.name);
        exported += 1;
    }

    Ok(exported)
}

/// Errors in one mutation step. The orchestrator decides what each one
/// means.
#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error(transparent)]
    Fs(#[from] FsError),

    #[error(transparent)]
    Package(#[from] PackageError),

    #[error("cannot move {from} aside to {to}")]
    MoveAside {
        source: std::io::Error,
        from: PathBuf,
        to: PathBuf,
    },

    #[error("manifest defines no variant named {name}")]
    UnknownVariant { name: String },
}

/// All possible error types for orchestrated runs.
#[derive(Debug, thiserror::Error)]
pub enum OrchestrateError {
    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    Prereq(#[from] PrereqError),

    /// User declined to proceed past reported conflicts.
    #[error("aborted: existing configuration left untouched")]
    Aborted,

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    #[error(transparent)]
    Backup(#[from] BackupError),

    #[error(transparent)]
    Package(#[from] PackageError),

    #[error(transparent)]
    Fs(#[from] FsError),

    /// Mutation failed; live state was rolled back to the run's checkpoint.
    #[error(
        "mutation failed and live state was rolled back; checkpoint kept at {}",
        checkpoint.display()
    )]
    MutationFailed {
        checkpoint: PathBuf,
        #[source]
        source: StepError,
    },

    /// Mutation failed during a dry run, where no checkpoint exists.
    #[error("mutation step failed")]
    MutationFailedNoCheckpoint {
        #[source]
        source: StepError,
    },

    /// Post-mutation validation failed. Rollback is left to the operator.
    #[error(
        "validation failed: {reason}; live state left as mutated{}",
        checkpoint
            .as_deref()
            .map(|path| format!("; roll back manually with `dotsnap rollback {}`", path.display()))
            .unwrap_or_default()
    )]
    ValidationFailed {
        checkpoint: Option<PathBuf>,
        reason: String,
    },
}

impl OrchestrateError {
    /// Checkpoint the user should know about for manual recovery, if any.
    pub fn checkpoint(&self) -> Option<&Path> {
        match self {
            Self::MutationFailed { checkpoint, .. } => Some(checkpoint),
            Self::ValidationFailed { checkpoint, .. } => checkpoint.as_deref(),
            _ => None,
        }
    }
}

/// Friendly result alias :3
type Result<T, E = OrchestrateError> = std::result::Result<T, E>;

/// Signal-safe cleanup registry.
///
/// Interruption must behave like a failure exit: release the lock and roll
/// back to the run's checkpoint if one was armed. RAII guards cover normal
/// unwinding; this registry covers the paths where destructors never run.
pub mod cleanup {
    use crate::{checkpoint::CheckpointStore, config::Settings};

    use signal_hook::{
        consts::{SIGINT, SIGTERM},
        iterator::Signals,
    };
    use std::{
        path::{Path, PathBuf},
        sync::Mutex,
    };
    use tracing::warn;

    static CLEANUP: Mutex<Option<State>> = Mutex::new(None);

    #[derive(Debug, Clone)]
    struct State {
        settings: Settings,
        checkpoint: Option<PathBuf>,
    }

    /// Register the current run for signal cleanup. Called right after the
    /// lock is acquired.
    pub fn register(settings: &Settings) {
        *CLEANUP.lock().unwrap() = Some(State {
            settings: settings.clone(),
            checkpoint: None,
        });
    }

    /// Arm rollback to `checkpoint` for the rest of the run.
    pub fn arm_rollback(checkpoint: &Path) {
        if let Some(state) = CLEANUP.lock().unwrap().as_mut() {
            state.checkpoint = Some(checkpoint.to_path_buf());
        }
    }

    /// Disarm cleanup once the run reaches a terminal state normally.
    pub fn clear() {
        CLEANUP.lock().unwrap().take();
    }

    /// Spawn the signal-watching thread.
    ///
    /// # Errors
    ///
    /// - Return [`std::io::Error`] if the signal iterator cannot be
    ///   registered.
    pub fn install_signal_handler() -> std::io::Result<()> {
        let mut signals = Signals::new([SIGINT, SIGTERM])?;
        std::thread::spawn(move || {
            if let Some(signal) = signals.forever().next() {
                warn!("interrupted by signal {signal}; cleaning up");
                if let Some(state) = CLEANUP.lock().unwrap().take() {
                    run_cleanup(&state);
                }
                std::process::exit(130);
            }
        });

        Ok(())
    }

    fn run_cleanup(state: &State) {
        if let Some(checkpoint) = &state.checkpoint {
            warn!("rolling back interrupted run to {:?}", checkpoint.display());
            if let Err(err) = CheckpointStore::new(&state.settings).restore(checkpoint) {
                warn!("rollback on interrupt failed: {err}");
            }
        }

        if let Err(err) = std::fs::remove_file(&state.settings.lock_path) {
            if err.kind() != std::io::ErrorKind::NotFound {
                warn!("failed to remove lock file on interrupt: {err}");
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn simulate_interrupt(settings: &Settings, checkpoint: Option<&Path>) {
        let state = State {
            settings: settings.clone(),
            checkpoint: checkpoint.map(Path::to_path_buf),
        };
        run_cleanup(&state);
    }
}
