//! EFI System Partition discovery.
//!
//! Two tiers: partitions the inventory flagged as EFI candidates, then a
//! fixed list of conventional slot identifiers (`disk0s1`, `disk1s1`, ...)
//! for disks the listings failed to enumerate.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::drive::{Partition, Snapshot, slot_number};
use crate::executor::{CommandRunner, shell_quote};
use crate::inventory::{MOUNT_TABLE_COMMAND, device_info_command};
use crate::mount::MountOrchestrator;
use crate::parse::{MountRecord, format_size, has_efi_marker, parse_device_info, parse_mount_table};

const FAT_FILESYSTEMS: &[&str] = &["msdos", "vfat", "fat32", "fat"];

/// Result of [`EfiDiscovery::mount_efi_partition`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EfiMountOutcome {
    pub success: bool,
    pub identifier: Option<String>,
    pub path: Option<PathBuf>,
    pub message: String,
}

impl EfiMountOutcome {
    fn mounted(identifier: Option<String>, path: PathBuf, message: String) -> Self {
        Self {
            success: true,
            identifier,
            path: Some(path),
            message,
        }
    }
}

/// Result of [`EfiDiscovery::unmount_efi_partition`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EfiUnmountOutcome {
    pub success: bool,
    /// The mount point that was (or could not be) unmounted.
    pub path: Option<PathBuf>,
    pub message: String,
}

/// One EFI partition known to the system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EfiPartition {
    pub identifier: String,
    pub name: String,
    pub size_description: String,
    pub mount_point: Option<PathBuf>,
    /// Type or name carries the EFI marker. False for first-slot guesses.
    pub confirmed: bool,
}

impl EfiPartition {
    fn from_inventory(partition: &Partition) -> Self {
        Self {
            identifier: partition.identifier.clone(),
            name: partition.name.clone(),
            size_description: partition.size_description.clone(),
            mount_point: partition.mount_point.clone(),
            confirmed: is_marked(partition),
        }
    }
}

#[derive(Clone)]
pub struct EfiDiscovery {
    runner: Arc<dyn CommandRunner>,
    orchestrator: MountOrchestrator,
    config: EngineConfig,
}

impl EfiDiscovery {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        orchestrator: MountOrchestrator,
        config: EngineConfig,
    ) -> Self {
        Self {
            runner,
            orchestrator,
            config,
        }
    }

    /// Path of a mounted EFI volume: an EFI-named mount point first, then a
    /// FAT filesystem on a first partition that holds an `EFI` directory.
    pub fn find_mounted_efi_path(&self) -> Option<PathBuf> {
        let output = self.runner.run(MOUNT_TABLE_COMMAND, false);
        if !output.success {
            debug!("mount table unavailable for EFI lookup");
            return None;
        }
        let records = parse_mount_table(&output.stdout);
        if let Some(record) = records.iter().find(|r| r.volume_name().is_some_and(has_efi_marker)) {
            return Some(record.mount_point.clone());
        }
        records
            .iter()
            .filter(|r| is_fat_on_first_slot(r))
            .find(|r| self.has_efi_directory(&r.mount_point))
            .map(|r| r.mount_point.clone())
    }

    fn has_efi_directory(&self, mount_point: &Path) -> bool {
        let command = format!("test -d {}", shell_quote(&mount_point.join("EFI").to_string_lossy()));
        self.runner.run(&command, false).success
    }

    /// Mounts the EFI partition, returning its path.
    pub fn mount_efi_partition(&self, snapshot: &Snapshot) -> EfiMountOutcome {
        if let Some(path) = self.find_mounted_efi_path() {
            info!(path = %path.display(), "EFI partition already mounted");
            let message = format!("EFI already mounted at {}", path.display());
            return EfiMountOutcome::mounted(None, path, message);
        }

        let mut tried: HashSet<String> = HashSet::new();
        let mut last_error: Option<String> = None;

        for candidate in ranked_candidates(snapshot) {
            tried.insert(candidate.identifier.clone());
            if let Some(path) = &candidate.mount_point {
                if is_marked(candidate) || is_fat_type(&candidate.type_description) {
                    return EfiMountOutcome::mounted(
                        Some(candidate.identifier.clone()),
                        path.clone(),
                        format!("EFI already mounted at {}", path.display()),
                    );
                }
                debug!(
                    identifier = %candidate.identifier,
                    kind = %candidate.type_description,
                    "mounted first-slot partition is not FAT, skipping"
                );
                continue;
            }
            match self.try_identifier(&candidate.identifier) {
                Ok(outcome) => return outcome,
                Err(message) => last_error = Some(message),
            }
        }

        debug!(tried = tried.len(), "no inventory EFI candidate mounted, trying fallback slots");
        for identifier in &self.config.efi_fallback_identifiers {
            // Partitions the inventory knows and did not flag are not ESPs.
            if snapshot.partition(identifier).is_some() || !tried.insert(identifier.clone()) {
                continue;
            }
            match self.try_identifier(identifier) {
                Ok(outcome) => return outcome,
                Err(message) => last_error = Some(message),
            }
        }

        let message = match last_error {
            Some(error) => format!("no EFI partition could be mounted (last error: {error})"),
            None => "no EFI partition candidates found".to_string(),
        };
        warn!(tried = tried.len(), "{message}");
        EfiMountOutcome {
            success: false,
            identifier: None,
            path: None,
            message,
        }
    }

    fn try_identifier(&self, identifier: &str) -> std::result::Result<EfiMountOutcome, String> {
        let outcome = self.orchestrator.mount(identifier);
        match outcome.mount_point {
            Some(path) if outcome.success => {
                info!(identifier, path = %path.display(), "EFI partition mounted");
                Ok(EfiMountOutcome::mounted(
                    Some(outcome.identifier),
                    path,
                    outcome.message,
                ))
            }
            _ => Err(outcome.message),
        }
    }

    /// Unmounts the mounted EFI volume by path (elevated).
    pub fn unmount_efi_partition(&self) -> EfiUnmountOutcome {
        let Some(path) = self.find_mounted_efi_path() else {
            return EfiUnmountOutcome {
                success: false,
                path: None,
                message: "EFI partition is not mounted".to_string(),
            };
        };

        let command = format!("diskutil unmount {}", shell_quote(&path.to_string_lossy()));
        let output = self.runner.run(&command, true);
        if output.success {
            info!(path = %path.display(), "EFI partition unmounted");
            return EfiUnmountOutcome {
                success: true,
                message: format!("EFI partition at {} unmounted", path.display()),
                path: Some(path),
            };
        }

        let message = format!(
            "failed to unmount EFI at {}: {}",
            path.display(),
            output.diagnostic().unwrap_or("diskutil reported an error")
        );
        warn!("{message}");
        EfiUnmountOutcome {
            success: false,
            path: Some(path),
            message,
        }
    }

    /// Every EFI partition the inventory flagged, then conventional slots the
    /// inventory missed whose device info carries the EFI marker.
    pub fn list_efi_partitions(&self, snapshot: &Snapshot) -> Vec<EfiPartition> {
        let mut found: Vec<EfiPartition> = ranked_candidates(snapshot)
            .into_iter()
            .map(EfiPartition::from_inventory)
            .collect();

        for identifier in &self.config.efi_fallback_identifiers {
            if snapshot.partition(identifier).is_some() {
                continue;
            }
            if let Some(partition) = self.probe_efi(identifier) {
                found.push(partition);
            }
        }
        found
    }

    fn probe_efi(&self, identifier: &str) -> Option<EfiPartition> {
        let output = self.runner.run(&device_info_command(identifier), false);
        if !output.success {
            return None;
        }
        let info = match parse_device_info(&output.stdout) {
            Ok(info) => info,
            Err(e) => {
                debug!(identifier, error = %e, "device info unparsable");
                return None;
            }
        };
        let marked = info.content.as_deref().is_some_and(has_efi_marker)
            || info.volume_name.as_deref().is_some_and(has_efi_marker);
        if !marked {
            return None;
        }

        Some(EfiPartition {
            identifier: identifier.to_string(),
            name: info.display_name().unwrap_or_else(|| identifier.to_string()),
            size_description: info.total_size.map(format_size).unwrap_or_default(),
            mount_point: info.mounted_at(),
            confirmed: true,
        })
    }
}

fn is_marked(partition: &Partition) -> bool {
    has_efi_marker(&partition.type_description) || has_efi_marker(&partition.name)
}

fn is_fat_type(type_description: &str) -> bool {
    let lower = type_description.to_ascii_lowercase();
    lower.contains("fat") || lower.contains("msdos") || lower.contains("ms-dos")
}

fn is_fat_on_first_slot(record: &MountRecord) -> bool {
    slot_number(&record.identifier) == Some(1)
        && record
            .filesystem
            .as_deref()
            .is_some_and(|fs| FAT_FILESYSTEMS.contains(&fs.to_ascii_lowercase().as_str()))
}

/// Inventory candidates, marker-backed ones before first-slot guesses.
fn ranked_candidates(snapshot: &Snapshot) -> Vec<&Partition> {
    let (marked, guessed): (Vec<&Partition>, Vec<&Partition>) =
        snapshot.efi_candidates().partition(|p| is_marked(p));
    marked.into_iter().chain(guessed).collect()
}
