// SPDX-FileCopyrightText: 2026 dotsnap contributors
// SPDX-License-Identifier: MIT

use dotsnap::{
    checkpoint::CheckpointStore,
    config::{Manifest, Settings},
    orchestrate,
    orchestrate::{Action, OrchestrateError, Orchestrator},
    pacman::Pacman,
};

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::{path::PathBuf, process::exit, sync::Arc};
use tracing::{error, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Clone, Parser)]
#[command(
    about,
    override_usage = "\n  dotsnap [options] <command>",
    subcommand_help_heading = "Commands",
    version
)]
struct Cli {
    /// Report mutations without performing them.
    #[arg(long, global = true)]
    dry_run: bool,

    /// Unattended mode: answer yes to every confirmation prompt.
    #[arg(short = 'y', long, global = true)]
    yes: bool,

    /// Directory holding the dotfiles payload.
    #[arg(long, value_name = "path", global = true)]
    payload: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Copy configs in, install packages, and activate a variant.
    #[command(override_usage = "dotsnap install [options] [variant]")]
    Install {
        #[arg(value_name = "variant", default_value = "stealthiq")]
        variant: String,
    },

    /// Repoint the active configuration at another variant.
    #[command(override_usage = "dotsnap switch [options] <variant>")]
    Switch {
        #[arg(value_name = "variant")]
        variant: String,
    },

    /// Back up the current tracked configuration.
    Backup,

    /// Install the package sets without touching configuration files.
    Deps,

    /// Restore live state from a stored checkpoint.
    #[command(override_usage = "dotsnap rollback [options] <checkpoint>")]
    Rollback {
        #[arg(value_name = "checkpoint")]
        checkpoint: String,
    },

    /// List stored checkpoints, newest first.
    Checkpoints,

    /// Remove installed configuration and variant packages.
    Reset,

    /// Export live tracked configuration into a portable directory.
    #[command(override_usage = "dotsnap export [options] <dir>")]
    Export {
        #[arg(value_name = "dir")]
        dest: PathBuf,
    },
}

impl Cli {
    fn run(self) -> Result<()> {
        let payload = match self.payload {
            Some(path) => path,
            None => std::env::current_dir()?,
        };
        let settings = Settings::from_env(payload, self.dry_run, self.yes)?;
        let manifest = Manifest::load(&settings.payload_dir)?;

        // The manifest may relocate the payload tree.
        let settings = match &manifest.settings.payload_root {
            Some(root) => Settings {
                payload_dir: root.clone(),
                ..settings
            },
            None => settings,
        };

        match self.command {
            Command::Install { variant } => {
                let backend = Pacman::detect(settings.dry_run);
                Orchestrator::new(&settings, &manifest, backend)
                    .run(Action::Install { variant })?;
                println!("install complete");
            }
            Command::Switch { variant } => {
                let backend = Pacman::detect(settings.dry_run);
                Orchestrator::new(&settings, &manifest, backend)
                    .run(Action::Switch { variant })?;
                println!("switch complete");
            }
            Command::Reset => {
                let backend = Pacman::detect(settings.dry_run);
                Orchestrator::new(&settings, &manifest, backend).run(Action::Reset)?;
                println!("reset complete");
            }
            Command::Backup => {
                let report = orchestrate::run_backup(&settings)?;
                match report.path {
                    Some(path) => println!(
                        "backed up {} item(s) to {} ({} failed)",
                        report.copied,
                        path.display(),
                        report.failed
                    ),
                    None => println!("nothing to back up"),
                }
            }
            Command::Deps => {
                let backend = Pacman::detect(settings.dry_run);
                orchestrate::install_deps(&settings, &manifest, &backend)?;
                println!("package sets installed");
            }
            Command::Rollback { checkpoint } => {
                let report = orchestrate::rollback(&settings, &checkpoint)?;
                println!(
                    "rollback complete: {} restored, {} skipped, {} failed",
                    report.restored, report.skipped, report.failed
                );
            }
            Command::Checkpoints => {
                let summaries = CheckpointStore::new(&settings).list();
                if summaries.is_empty() {
                    println!("no checkpoints stored");
                }
                for summary in summaries {
                    println!(
                        "{}  {}  {}  {}",
                        summary.id, summary.created, summary.name, summary.kernel
                    );
                }
            }
            Command::Export { dest } => {
                let exported = orchestrate::export_tree(&settings, &dest)?;
                println!("exported {exported} entr(ies) to {}", dest.display());
            }
        }

        Ok(())
    }
}

fn main() {
    let log_path = init_tracing();

    if let Err(err) = orchestrate::cleanup::install_signal_handler() {
        warn!("signal handler unavailable: {err}");
    }

    if let Err(error) = run() {
        error!("{error:?}");
        if let Some(err) = error.downcast_ref::<OrchestrateError>() {
            if let Some(checkpoint) = err.checkpoint() {
                eprintln!(
                    "checkpoint for manual recovery: {}",
                    checkpoint.display()
                );
            }
        }
        if let Some(path) = &log_path {
            eprintln!("full log: {}", path.display());
        }
        exit(1);
    }

    exit(0)
}

fn run() -> Result<()> {
    Cli::parse().run()
}

/// Set up the compact stdout layer plus an append-only plain-text file log.
///
/// Returns the log file path when one could be opened; logging falls back to
/// stdout-only otherwise.
fn init_tracing() -> Option<PathBuf> {
    let layer = fmt::layer().compact();
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap();
    let registry = tracing_subscriber::registry().with(layer).with(filter);

    let log_file = (|| {
        let dir = dotsnap::path::log_dir().ok()?;
        mkdirp::mkdirp(&dir).ok()?;
        let path = dir.join(format!(
            "install-{}.log",
            chrono::Local::now().format("%Y%m%d-%H%M%S")
        ));
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .ok()?;
        Some((path, file))
    })();

    match log_file {
        Some((path, file)) => {
            let file_layer = fmt::layer().with_ansi(false).with_writer(Arc::new(file));
            registry.with(file_layer).init();
            Some(path)
        }
        None => {
            registry.init();
            warn!("cannot open log file; logging to stdout only");
            None
        }
    }
}
