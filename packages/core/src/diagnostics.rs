//! Plain-text mount diagnostics for presentation layers.

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

use crate::drive::{MediumClass, Snapshot};
use crate::executor::CommandRunner;
use crate::inventory::LIST_TEXT_COMMAND;
use crate::parse::has_efi_marker;

/// Status of one drive as shown in a [`DiagnosticsReport`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DriveStatus {
    pub identifier: String,
    pub display_name: String,
    pub size_description: String,
    pub medium_class: MediumClass,
    pub mount_point: Option<PathBuf>,
    /// Identifiers of the drive's EFI candidate partitions.
    pub efi_partitions: Vec<String>,
}

/// Counts, per-drive status and the EFI rows of the raw listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiagnosticsReport {
    pub total: usize,
    pub mounted: usize,
    pub unmounted: usize,
    pub efi_partitions: usize,
    pub drives: Vec<DriveStatus>,
    /// Lines of `diskutil list` that mention EFI.
    pub listing_efi_rows: Vec<String>,
    /// Set when `diskutil list` itself failed.
    pub listing_error: Option<String>,
}

impl DiagnosticsReport {
    pub fn collect(snapshot: &Snapshot, runner: &dyn CommandRunner) -> Self {
        let drives: Vec<DriveStatus> = snapshot
            .drives
            .iter()
            .map(|d| DriveStatus {
                identifier: d.identifier.clone(),
                display_name: d.display_name.clone(),
                size_description: d.size_description.clone(),
                medium_class: d.medium_class,
                mount_point: d.mount_point.clone(),
                efi_partitions: d
                    .partitions
                    .iter()
                    .filter(|p| p.is_efi_candidate)
                    .map(|p| p.identifier.clone())
                    .collect(),
            })
            .collect();

        let listing = runner.run(LIST_TEXT_COMMAND, false);
        let (listing_efi_rows, listing_error) = if listing.success {
            let rows = listing
                .stdout
                .lines()
                .filter(|line| has_efi_marker(line))
                .map(|line| line.trim_end().to_string())
                .collect();
            (rows, None)
        } else {
            let error = listing.diagnostic().unwrap_or("diskutil list failed").to_string();
            (Vec::new(), Some(error))
        };

        let mounted = drives.iter().filter(|d| d.mount_point.is_some()).count();
        Self {
            total: drives.len(),
            mounted,
            unmounted: drives.len() - mounted,
            efi_partitions: drives.iter().map(|d| d.efi_partitions.len()).sum(),
            drives,
            listing_efi_rows,
            listing_error,
        }
    }
}

impl fmt::Display for DiagnosticsReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Drives detected: {}", self.total)?;
        writeln!(f, "Mounted: {}", self.mounted)?;
        writeln!(f, "Unmounted: {}", self.unmounted)?;
        writeln!(f, "EFI partitions: {}", self.efi_partitions)?;

        writeln!(f)?;
        for drive in &self.drives {
            let status = match &drive.mount_point {
                Some(path) => format!("mounted at {}", path.display()),
                None => "unmounted".to_string(),
            };
            write!(
                f,
                "- {} ({}) - {} - {:?} - {}",
                drive.display_name, drive.identifier, drive.size_description, drive.medium_class, status
            )?;
            if !drive.efi_partitions.is_empty() {
                write!(f, " [EFI: {}]", drive.efi_partitions.join(", "))?;
            }
            writeln!(f)?;
        }

        writeln!(f)?;
        match &self.listing_error {
            Some(error) => write!(f, "diskutil list unavailable: {error}"),
            None if self.listing_efi_rows.is_empty() => {
                write!(f, "No EFI partitions found in diskutil list")
            }
            None => {
                writeln!(f, "EFI partitions in diskutil list:")?;
                write!(f, "{}", self.listing_efi_rows.join("\n"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drive::{Drive, Partition};
    use crate::executor::CommandOutput;
    use crate::parse::text::fixtures::LIST_TEXT;
    use crate::testing::ScriptedRunner;

    fn snapshot() -> Snapshot {
        Snapshot::new(vec![
            Drive {
                identifier: "disk4".to_string(),
                display_name: "USB STICK".to_string(),
                size_description: "32.0 GB".to_string(),
                medium_class: MediumClass::External,
                mount_point: Some(PathBuf::from("/Volumes/USB STICK")),
                ..Default::default()
            },
            Drive {
                identifier: "disk0".to_string(),
                display_name: "Disk disk0".to_string(),
                size_description: "500.3 GB".to_string(),
                medium_class: MediumClass::Internal,
                partitions: vec![Partition {
                    identifier: "disk0s1".to_string(),
                    type_description: "EFI".to_string(),
                    is_efi_candidate: true,
                    ..Default::default()
                }],
                ..Default::default()
            },
        ])
    }

    #[test]
    fn test_collect_counts_and_listing_rows() {
        let runner = ScriptedRunner::new();
        runner.respond(LIST_TEXT_COMMAND, CommandOutput::ok(LIST_TEXT));

        let report = DiagnosticsReport::collect(&snapshot(), &runner);

        assert_eq!(report.total, 2);
        assert_eq!(report.mounted, 1);
        assert_eq!(report.unmounted, 1);
        assert_eq!(report.efi_partitions, 1);
        assert_eq!(report.drives[1].efi_partitions, vec!["disk0s1"]);
        assert_eq!(report.listing_efi_rows.len(), 1);
        assert!(report.listing_efi_rows[0].ends_with("disk0s1"));
        assert_eq!(report.listing_error, None);

        let text = report.to_string();
        assert!(text.contains("- USB STICK (disk4) - 32.0 GB - External - mounted at /Volumes/USB STICK"));
        assert!(text.contains("- Disk disk0 (disk0) - 500.3 GB - Internal - unmounted [EFI: disk0s1]"));
        assert!(text.contains("EFI partitions in diskutil list:"));
    }

    #[test]
    fn test_collect_when_listing_fails() {
        let runner = ScriptedRunner::new();
        runner.respond(LIST_TEXT_COMMAND, CommandOutput::failed("diskutil: command not found"));

        let report = DiagnosticsReport::collect(&Snapshot::default(), &runner);

        assert_eq!(report.total, 0);
        assert!(report.listing_efi_rows.is_empty());
        assert_eq!(report.listing_error.as_deref(), Some("diskutil: command not found"));
        assert!(report.to_string().ends_with("diskutil list unavailable: diskutil: command not found"));
    }
}
