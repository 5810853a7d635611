// SPDX-FileCopyrightText: 2026 dotsnap contributors
// SPDX-License-Identifier: MIT

//! Package manager collaboration.
//!
//! Package installation is a black-box external command from the safety
//! core's point of view: it either succeeds or fails, and may be retried.
//! The [`PackageBackend`] trait is the seam; [`Pacman`] is the real
//! implementation shelling out to pacman and, when one is present, an AUR
//! helper. Package state is explicitly secondary to configuration state in
//! this design, which is why retry exhaustion during a reset is a warning
//! rather than a fatal error — that call belongs to the orchestrator.

use indicatif::ProgressBar;
use std::{
    ffi::OsStr,
    process::Command,
    thread,
    time::Duration,
};
use tracing::{debug, info, instrument, warn};

/// Layer of indirection for package manager access.
pub trait PackageBackend {
    /// Tools that must be on `$PATH` for this backend to work.
    fn required_tools(&self) -> &'static [&'static str] {
        &[]
    }

    /// Install native packages.
    fn install(&self, packages: &[String]) -> Result<()>;

    /// Install packages through the AUR helper.
    fn install_aur(&self, packages: &[String]) -> Result<()>;

    /// Remove packages. Cascade mode also removes dependent packages.
    fn remove(&self, packages: &[String], cascade: bool) -> Result<()>;
}

/// Package access through pacman and an optional AUR helper.
#[derive(Debug)]
pub struct Pacman {
    aur_helper: Option<String>,
    dry_run: bool,
}

impl Pacman {
    /// Probe `$PATH` for a known AUR helper and build the backend.
    pub fn detect(dry_run: bool) -> Self {
        let aur_helper = ["paru", "yay"]
            .iter()
            .find(|helper| crate::system::which(helper).is_some())
            .map(ToString::to_string);

        match &aur_helper {
            Some(helper) => info!("using {helper} as AUR helper"),
            None => warn!("no AUR helper found; AUR packages will be skipped"),
        }

        Self {
            aur_helper,
            dry_run,
        }
    }

    /// Run a long package-manager call with a liveness spinner.
    ///
    /// The spinner polls the child at a fixed interval purely for UI
    /// feedback; the child's own output passes through untouched.
    fn syscall(
        &self,
        label: &str,
        cmd: impl AsRef<OsStr>,
        args: impl IntoIterator<Item = impl AsRef<OsStr>>,
    ) -> Result<()> {
        if self.dry_run {
            info!("dry-run: would run {label}");
            return Ok(());
        }

        debug!("running {label}");
        let mut child = Command::new(cmd.as_ref())
            .args(args)
            .spawn()
            .map_err(|err| PackageError::Spawn {
                source: err,
                label: label.to_string(),
            })?;

        let bar = ProgressBar::new_spinner().with_message(label.to_string());
        bar.enable_steady_tick(Duration::from_millis(100));

        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => thread::sleep(Duration::from_millis(200)),
                Err(err) => {
                    bar.finish_and_clear();
                    return Err(PackageError::Spawn {
                        source: err,
                        label: label.to_string(),
                    });
                }
            }
        };
        bar.finish_and_clear();

        if !status.success() {
            return Err(PackageError::Failed {
                label: label.to_string(),
                code: status.code(),
            });
        }

        Ok(())
    }
}

impl PackageBackend for Pacman {
    fn required_tools(&self) -> &'static [&'static str] {
        &["sudo", "pacman"]
    }

    #[instrument(skip(self), level = "debug")]
    fn install(&self, packages: &[String]) -> Result<()> {
        if packages.is_empty() {
            return Ok(());
        }

        let mut args: Vec<&str> = vec!["pacman", "-S", "--needed", "--noconfirm"];
        args.extend(packages.iter().map(String::as_str));
        self.syscall(&format!("install {} package(s)", packages.len()), "sudo", args)
    }

    #[instrument(skip(self), level = "debug")]
    fn install_aur(&self, packages: &[String]) -> Result<()> {
        if packages.is_empty() {
            return Ok(());
        }

        let Some(helper) = &self.aur_helper else {
            warn!("skipping {} AUR package(s): no helper", packages.len());
            return Ok(());
        };

        let mut args: Vec<&str> = vec!["-S", "--needed", "--noconfirm"];
        args.extend(packages.iter().map(String::as_str));
        self.syscall(
            &format!("install {} AUR package(s)", packages.len()),
            helper,
            args,
        )
    }

    #[instrument(skip(self), level = "debug")]
    fn remove(&self, packages: &[String], cascade: bool) -> Result<()> {
        if packages.is_empty() {
            return Ok(());
        }

        let mode = if cascade { "-Rc" } else { "-R" };
        let mut args: Vec<&str> = vec!["pacman", mode, "--noconfirm"];
        args.extend(packages.iter().map(String::as_str));
        self.syscall(&format!("remove {} package(s)", packages.len()), "sudo", args)
    }
}

/// Bounded retry with exponential delay.
///
/// Applies to package-installation calls only, never to filesystem
/// operations.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Run `op` until it succeeds or attempts are exhausted, doubling the
    /// delay between attempts.
    pub fn run<T, E>(
        &self,
        label: &str,
        mut op: impl FnMut() -> std::result::Result<T, E>,
    ) -> std::result::Result<T, E>
    where
        E: std::fmt::Display,
    {
        let mut attempt = 1;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(err) if attempt < self.max_attempts => {
                    let delay = self.base_delay * 2u32.saturating_pow(attempt - 1);
                    warn!(
                        "{label} failed (attempt {attempt}/{}): {err}; retrying in {delay:?}",
                        self.max_attempts
                    );
                    thread::sleep(delay);
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// All possible error types for package manager interaction.
#[derive(Debug, thiserror::Error)]
pub enum PackageError {
    /// Package manager process could not be spawned or waited on.
    #[error("cannot run package manager for {label}")]
    Spawn {
        source: std::io::Error,
        label: String,
    },

    /// Package manager exited unsuccessfully.
    #[error("{label} failed with exit code {code:?}")]
    Failed { label: String, code: Option<i32> },
}

/// Friendly result alias :3
type Result<T, E = PackageError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::cell::Cell;

    fn instant_retry(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::ZERO,
        }
    }

    #[test]
    fn retry_succeeds_after_transient_failures() {
        let calls = Cell::new(0);
        let result = instant_retry(3).run("flaky", || {
            calls.set(calls.get() + 1);
            if calls.get() < 3 {
                Err("mirror timeout")
            } else {
                Ok(calls.get())
            }
        });

        assert_eq!(result, Ok(3));
    }

    #[test]
    fn retry_is_bounded() {
        let calls = Cell::new(0);
        let result: std::result::Result<(), &str> = instant_retry(2).run("doomed", || {
            calls.set(calls.get() + 1);
            Err("404")
        });

        assert_eq!(result, Err("404"));
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn retry_with_one_attempt_never_sleeps() {
        let calls = Cell::new(0);
        let result: std::result::Result<(), &str> = instant_retry(1).run("once", || {
            calls.set(calls.get() + 1);
            Err("no")
        });

        assert!(result.is_err());
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn dry_run_backend_skips_syscalls() {
        let pacman = Pacman {
            aur_helper: None,
            dry_run: true,
        };

        pacman.install(&["hyprland".into()]).unwrap();
        pacman.remove(&["hyprland".into()], true).unwrap();
    }

    #[test]
    fn missing_aur_helper_is_not_fatal() {
        let pacman = Pacman {
            aur_helper: None,
            dry_run: false,
        };

        pacman.install_aur(&["wlogout".into()]).unwrap();
    }
}
