//! Mount orchestration.
//!
//! Single-device mount/unmount with idempotence, alternate-filesystem
//! fallback and mount point confirmation, plus batch variants that collect
//! one outcome per device instead of failing fast.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde::Serialize;
use snafu::ensure;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::drive::{Snapshot, is_whole_disk, parent_disk};
use crate::error::{AuthenticationCancelledSnafu, Error, MountVerificationSnafu, Result};
use crate::executor::{CommandOutput, CommandRunner, shell_quote};
use crate::inventory::{MOUNT_TABLE_COMMAND, device_info_command};
use crate::parse::{parse_device_info, parse_mount_table};

/// `diskutil mount`, or `mountDisk` for whole disks.
pub fn mount_command(identifier: &str) -> String {
    if is_whole_disk(identifier) {
        format!("diskutil mountDisk {identifier}")
    } else {
        format!("diskutil mount {identifier}")
    }
}

/// `diskutil unmount`, or `unmountDisk` for whole disks.
pub fn unmount_command(identifier: &str, force: bool) -> String {
    let verb = if is_whole_disk(identifier) { "unmountDisk" } else { "unmount" };
    if force {
        format!("diskutil {verb} force {identifier}")
    } else {
        format!("diskutil {verb} {identifier}")
    }
}

/// Mounts `/dev/<identifier>` at `target` with an explicit filesystem driver.
pub fn fallback_mount_command(filesystem: &str, identifier: &str, target: &Path) -> String {
    format!(
        "mount -t {filesystem} /dev/{identifier} {}",
        shell_quote(&target.to_string_lossy())
    )
}

fn mkdir_command(target: &Path) -> String {
    format!("mkdir -p {}", shell_quote(&target.to_string_lossy()))
}

/// Mount points the orchestrator refuses to unmount.
fn is_system_volume(mount_point: &Path) -> bool {
    mount_point == Path::new("/") || mount_point.starts_with("/System/Volumes")
}

/// Result of mounting one device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MountOutcome {
    pub identifier: String,
    pub success: bool,
    pub mount_point: Option<PathBuf>,
    pub message: String,
}

/// Result of unmounting one device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnmountOutcome {
    pub identifier: String,
    pub success: bool,
    /// Command error text verbatim on failure.
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    /// Every item succeeded, or there were none.
    Complete,
    Partial,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchItem {
    pub identifier: String,
    pub success: bool,
    pub message: String,
}

/// Aggregate of a batch, items in target order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchResult {
    pub status: BatchStatus,
    pub items: Vec<BatchItem>,
    pub message: String,
}

impl BatchResult {
    pub fn from_items(operation: &str, items: Vec<BatchItem>) -> Self {
        let total = items.len();
        let succeeded = items.iter().filter(|i| i.success).count();

        let (status, message) = if total == 0 {
            (BatchStatus::Complete, format!("nothing to {operation}"))
        } else if succeeded == total {
            (BatchStatus::Complete, format!("{operation}: all {total} succeeded"))
        } else if succeeded > 0 {
            (
                BatchStatus::Partial,
                format!("{operation}: {succeeded} of {total} succeeded"),
            )
        } else {
            (BatchStatus::Failed, format!("{operation}: all {total} failed"))
        };

        Self {
            status,
            items,
            message,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == BatchStatus::Complete
    }

    /// Identifiers whose operation succeeded.
    pub fn succeeded(&self) -> impl Iterator<Item = &str> {
        self.items
            .iter()
            .filter(|i| i.success)
            .map(|i| i.identifier.as_str())
    }
}

/// Performs mount/unmount through the injected runner.
#[derive(Clone)]
pub struct MountOrchestrator {
    runner: Arc<dyn CommandRunner>,
    config: EngineConfig,
}

impl MountOrchestrator {
    pub fn new(runner: Arc<dyn CommandRunner>, config: EngineConfig) -> Self {
        Self { runner, config }
    }

    /// Where `identifier` is mounted right now, asking device info first and
    /// the mount table second. Never elevated.
    pub fn current_mount_point(&self, identifier: &str) -> Option<PathBuf> {
        let info = self.runner.run(&device_info_command(identifier), false);
        if info.success {
            match parse_device_info(&info.stdout) {
                Ok(info) => {
                    if let Some(path) = info.mounted_at() {
                        return Some(path);
                    }
                }
                Err(e) => debug!(identifier, error = %e, "device info unparsable"),
            }
        }

        let table = self.runner.run(MOUNT_TABLE_COMMAND, false);
        if !table.success {
            return None;
        }
        let whole = is_whole_disk(identifier);
        parse_mount_table(&table.stdout)
            .into_iter()
            .find(|r| {
                r.identifier == identifier
                    || (whole && parent_disk(&r.identifier) == Some(identifier))
            })
            .map(|r| r.mount_point)
    }

    /// Polls for a mount point, sleeping `interval * 2^attempt` before each try.
    pub fn confirm_mount_point(
        &self,
        identifier: &str,
        max_attempts: u32,
        interval: Duration,
    ) -> Result<PathBuf> {
        for attempt in 0..max_attempts.max(1) {
            let delay = interval.saturating_mul(2u32.saturating_pow(attempt));
            if !delay.is_zero() {
                thread::sleep(delay);
            }
            if let Some(path) = self.current_mount_point(identifier) {
                debug!(identifier, attempt, path = %path.display(), "mount point confirmed");
                return Ok(path);
            }
        }
        MountVerificationSnafu { identifier }.fail()
    }

    fn confirm(&self, identifier: &str) -> Result<PathBuf> {
        self.confirm_mount_point(identifier, self.config.confirm_attempts, self.config.settle_delay)
    }

    /// Mounts one device. Already-mounted devices succeed without any
    /// elevated command.
    pub fn mount(&self, identifier: &str) -> MountOutcome {
        match self.try_mount(identifier) {
            Ok(path) => {
                info!(identifier, path = %path.display(), "mounted");
                MountOutcome {
                    identifier: identifier.to_string(),
                    success: true,
                    message: format!("{identifier} mounted at {}", path.display()),
                    mount_point: Some(path),
                }
            }
            Err(e) => {
                warn!(identifier, error = %e, "mount failed");
                MountOutcome {
                    identifier: identifier.to_string(),
                    success: false,
                    mount_point: None,
                    message: e.to_string(),
                }
            }
        }
    }

    fn try_mount(&self, identifier: &str) -> Result<PathBuf> {
        if let Some(path) = self.current_mount_point(identifier) {
            debug!(identifier, "already mounted");
            return Ok(path);
        }

        let primary = self.runner.run(&mount_command(identifier), true);
        if primary.success {
            return self.confirm(identifier);
        }
        ensure!(!primary.is_auth_cancelled(), AuthenticationCancelledSnafu);
        warn!(
            identifier,
            error = primary.diagnostic().unwrap_or("no output"),
            "default mount failed, trying alternate filesystems"
        );

        if self.mount_with_fallback_filesystems(identifier)? {
            return self.confirm(identifier);
        }

        Err(Error::Mount {
            identifier: identifier.to_string(),
            message: failure_text(&primary, "diskutil reported an error"),
        })
    }

    /// Tries each configured filesystem in order. Returns whether one worked.
    fn mount_with_fallback_filesystems(&self, identifier: &str) -> Result<bool> {
        let target = self.config.fallback_mount_point(identifier);
        let mkdir = self.runner.run(&mkdir_command(&target), true);
        ensure!(!mkdir.is_auth_cancelled(), AuthenticationCancelledSnafu);
        if !mkdir.success {
            warn!(
                identifier,
                target = %target.display(),
                error = mkdir.diagnostic().unwrap_or("no output"),
                "could not create fallback mount point"
            );
        }

        for filesystem in &self.config.fallback_filesystems {
            let output = self
                .runner
                .run(&fallback_mount_command(filesystem, identifier, &target), true);
            if output.success {
                info!(identifier, filesystem = %filesystem, "mounted with alternate filesystem");
                return Ok(true);
            }
            ensure!(!output.is_auth_cancelled(), AuthenticationCancelledSnafu);
            debug!(
                identifier,
                filesystem = %filesystem,
                error = output.diagnostic().unwrap_or("no output"),
                "alternate filesystem failed"
            );
        }
        Ok(false)
    }

    /// Unmounts one device. On failure the command's error text is reported
    /// verbatim.
    pub fn unmount(&self, identifier: &str) -> UnmountOutcome {
        let outcome = |success: bool, message: String| UnmountOutcome {
            identifier: identifier.to_string(),
            success,
            message,
        };

        if let Some(path) = self.current_mount_point(identifier) {
            if is_system_volume(&path) {
                warn!(identifier, path = %path.display(), "refusing to unmount system volume");
                return outcome(
                    false,
                    format!("refusing to unmount system volume {identifier} at {}", path.display()),
                );
            }
        }

        let first = self.runner.run(&unmount_command(identifier, false), true);
        if first.success {
            info!(identifier, "unmounted");
            return outcome(true, success_text(&first, identifier, "unmounted"));
        }

        let message = failure_text(&first, &format!("unmount of {identifier} failed"));
        if self.config.force_unmount_fallback && !first.is_auth_cancelled() {
            let forced = self.runner.run(&unmount_command(identifier, true), true);
            if forced.success {
                info!(identifier, "unmounted with force");
                return outcome(true, success_text(&forced, identifier, "force unmounted"));
            }
        }

        let err = Error::Unmount {
            identifier: identifier.to_string(),
            message: message.clone(),
        };
        warn!(error = %err, "unmount failed");
        outcome(false, message)
    }

    /// Mounts `targets` in order.
    pub fn mount_selected(&self, targets: &[String]) -> BatchResult {
        let items = targets
            .iter()
            .map(|id| {
                let outcome = self.mount(id);
                BatchItem {
                    identifier: outcome.identifier,
                    success: outcome.success,
                    message: outcome.message,
                }
            })
            .collect();
        BatchResult::from_items("mount", items)
    }

    /// Unmounts `targets` in order.
    pub fn unmount_selected(&self, targets: &[String]) -> BatchResult {
        let items = targets
            .iter()
            .map(|id| {
                let outcome = self.unmount(id);
                BatchItem {
                    identifier: outcome.identifier,
                    success: outcome.success,
                    message: outcome.message,
                }
            })
            .collect();
        BatchResult::from_items("unmount", items)
    }

    /// Mounts every external drive that is not mounted.
    pub fn mount_all_external_unmounted(&self, snapshot: &Snapshot) -> BatchResult {
        let targets: Vec<String> = snapshot
            .drives
            .iter()
            .filter(|d| d.is_external() && !d.is_mounted())
            .map(|d| d.identifier.clone())
            .collect();
        self.mount_selected(&targets)
    }

    /// Unmounts every mounted external drive. Internal drives are never
    /// touched.
    pub fn unmount_all_mounted(&self, snapshot: &Snapshot) -> BatchResult {
        let targets: Vec<String> = snapshot
            .drives
            .iter()
            .filter(|d| d.is_external() && d.is_mounted())
            .map(|d| d.identifier.clone())
            .collect();
        self.unmount_selected(&targets)
    }
}

fn failure_text(output: &CommandOutput, fallback: &str) -> String {
    output.diagnostic().unwrap_or(fallback).to_string()
}

fn success_text(output: &CommandOutput, identifier: &str, verb: &str) -> String {
    let text = output.stdout.trim();
    if text.is_empty() {
        format!("{identifier} {verb}")
    } else {
        text.to_string()
    }
}
