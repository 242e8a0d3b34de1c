//! Table and JSON output.

use std::path::Path;

use drivemount_core::{
    BatchResult, DiagnosticsReport, Drive, EfiMountOutcome, EfiPartition, EfiUnmountOutcome,
    MediumClass, Selection, Snapshot,
};
use serde::Serialize;

pub struct Output {
    json: bool,
}

impl Output {
    pub fn new(json: bool) -> Self {
        Self { json }
    }

    fn emit_json<T: Serialize>(&self, value: &T) -> serde_json::Result<()> {
        println!("{}", serde_json::to_string_pretty(value)?);
        Ok(())
    }

    pub fn snapshot(&self, snapshot: &Snapshot) -> serde_json::Result<()> {
        if self.json {
            return self.emit_json(snapshot);
        }
        if snapshot.is_empty() {
            println!("No drives found.");
            return Ok(());
        }

        println!(
            "{:<12} {:<24} {:>10}  {:<9} {:<8} MOUNT POINT",
            "IDENTIFIER", "NAME", "SIZE", "CLASS", "PENDING"
        );
        for drive in &snapshot.drives {
            print_drive(drive);
        }
        Ok(())
    }

    pub fn batch(&self, result: &BatchResult) -> serde_json::Result<()> {
        if self.json {
            return self.emit_json(result);
        }
        for item in &result.items {
            let mark = if item.success { "ok" } else { "FAILED" };
            println!("{:<12} {:<6} {}", item.identifier, mark, item.message);
        }
        println!("{}", result.message);
        Ok(())
    }

    pub fn efi(&self, outcome: &EfiMountOutcome) -> serde_json::Result<()> {
        if self.json {
            return self.emit_json(outcome);
        }
        println!("{}", outcome.message);
        Ok(())
    }

    pub fn efi_unmount(&self, outcome: &EfiUnmountOutcome) -> serde_json::Result<()> {
        if self.json {
            return self.emit_json(outcome);
        }
        println!("{}", outcome.message);
        Ok(())
    }

    pub fn efi_list(&self, partitions: &[EfiPartition]) -> serde_json::Result<()> {
        if self.json {
            return self.emit_json(&partitions);
        }
        if partitions.is_empty() {
            println!("No EFI partitions found.");
            return Ok(());
        }
        for partition in partitions {
            let guess = if partition.confirmed { "" } else { " (first-slot guess)" };
            println!(
                "{:<10} {:<16} {:>10}  {}{}",
                partition.identifier,
                truncate(&partition.name, 16),
                dash_if_empty(&partition.size_description),
                mount_text(partition.mount_point.as_deref()),
                guess,
            );
        }
        Ok(())
    }

    pub fn diagnostics(&self, report: &DiagnosticsReport) -> serde_json::Result<()> {
        if self.json {
            return self.emit_json(report);
        }
        println!("{report}");
        Ok(())
    }

    pub fn efi_path(&self, path: Option<&Path>) -> serde_json::Result<()> {
        if self.json {
            return self.emit_json(&serde_json::json!({ "path": path }));
        }
        match path {
            Some(path) => println!("{}", path.display()),
            None => eprintln!("No mounted EFI partition found."),
        }
        Ok(())
    }
}

fn print_drive(drive: &Drive) {
    let class = match drive.medium_class {
        MediumClass::Internal => "internal",
        MediumClass::External => "external",
        MediumClass::Unknown => "unknown",
    };
    let pending = match drive.selection {
        Selection::None => "",
        Selection::PendingMount => "mount",
        Selection::PendingUnmount => "unmount",
    };

    println!(
        "{:<12} {:<24} {:>10}  {:<9} {:<8} {}",
        drive.identifier,
        truncate(&drive.display_name, 24),
        dash_if_empty(&drive.size_description),
        class,
        pending,
        mount_text(drive.mount_point.as_deref()),
    );

    for partition in &drive.partitions {
        let efi = if partition.is_efi_candidate { " [EFI?]" } else { "" };
        println!(
            "  {:<10} {:<24} {:>10}  {:<18} {}{}",
            partition.identifier,
            truncate(&partition.name, 24),
            dash_if_empty(&partition.size_description),
            truncate(&partition.type_description, 18),
            mount_text(partition.mount_point.as_deref()),
            efi,
        );
    }
}

fn mount_text(path: Option<&Path>) -> String {
    path.map(|p| p.display().to_string())
        .unwrap_or_else(|| "-".to_string())
}

fn dash_if_empty(text: &str) -> &str {
    if text.is_empty() { "-" } else { text }
}

fn truncate(text: &str, width: usize) -> String {
    if text.chars().count() <= width {
        text.to_string()
    } else {
        let mut short: String = text.chars().take(width.saturating_sub(1)).collect();
        short.push('~');
        short
    }
}
