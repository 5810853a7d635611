// SPDX-FileCopyrightText: 2026 dotsnap contributors
// SPDX-License-Identifier: MIT

//! Transactional dotfiles installation.
//!
//! Dotsnap installs a Hyprland desktop configuration payload into a user's
//! home directory and keeps that operation recoverable. Before any
//! destructive step it snapshots tracked-entry state into a __checkpoint__
//! and copies current content into a __backup__; a failed mutation rolls the
//! live tree back to the checkpoint, and an interrupted run does the same on
//! its way out.
//!
//! Two mutually exclusive desktop __variants__ ("stealthiq" and "jakoolit")
//! share one active configuration entry, switched by repointing a symlink at
//! the selected variant's payload slot.
//!
//! The library is organised leaf-first: [`path`] and [`config`] feed
//! everything; [`lock`], [`fsops`], [`backup`], [`checkpoint`], and
//! [`conflict`] are the safety components; [`pacman`] and [`system`] wrap
//! external collaborators; [`orchestrate`] sequences a run through its state
//! machine.

pub mod backup;
pub mod checkpoint;
pub mod config;
pub mod conflict;
pub mod fsops;
pub mod lock;
pub mod orchestrate;
pub mod pacman;
pub mod path;
pub mod system;

pub use backup::{BackupReport, BackupStore};
pub use checkpoint::{CheckpointStore, CheckpointSummary, RestoreReport};
pub use config::{Manifest, Settings, TrackedEntry, TRACKED_ENTRIES};
pub use lock::LockGuard;
pub use orchestrate::{Action, Orchestrator, Phase};
pub use pacman::{PackageBackend, Pacman, RetryPolicy};
