//! Free-form `diskutil list` parsing.
//!
//! ```text
//! /dev/disk0 (internal, physical):
//!    #:                       TYPE NAME                    SIZE       IDENTIFIER
//!    0:      GUID_partition_scheme                        *500.3 GB   disk0
//!    1:                        EFI EFI                     209.7 MB   disk0s1
//! ```

use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use super::{
    DriveCandidate, GUID_SCHEME, ListingParser, PartitionCandidate, has_efi_marker, non_empty,
};
use crate::drive::{parent_disk, slot_number};

static DEVICE_HEADER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^/dev/(disk\d+)(?:\s+\(([^)]*)\))?\s*:").expect("valid device header regex")
});

static ROW_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(\d+):\s").expect("valid row index regex"));

static SIZE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[*+]?(\d[\d.,]*\s+[KMGTP]?B)\s+(\S+)\s*$").expect("valid size column regex")
});

/// Parser for plain `diskutil list` output.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextListing;

impl ListingParser for TextListing {
    fn name(&self) -> &'static str {
        "text"
    }

    fn parse(&self, raw: &str) -> Vec<DriveCandidate> {
        let mut drives: Vec<DriveCandidate> = Vec::new();
        let mut name_column: Option<usize> = None;

        for line in raw.lines() {
            if let Some(caps) = DEVICE_HEADER_RE.captures(line) {
                let mut drive = DriveCandidate::new(&caps[1]);
                drive.bus_hint = caps.get(2).and_then(|m| non_empty(m.as_str()));
                drives.push(drive);
                name_column = None;
                continue;
            }

            let Some(drive) = drives.last_mut() else {
                continue;
            };

            if line.trim_start().starts_with("#:") {
                name_column = line.find("NAME");
                continue;
            }

            let Some(row) = parse_row(line, name_column) else {
                continue;
            };

            if row.identifier == drive.identifier {
                drive.size_description = drive.size_description.take().or(row.size);
                drive.content = drive.content.take().or(row.type_description);
                continue;
            }

            let slot = slot_number(&row.identifier);
            let marked = row.type_description.as_deref().is_some_and(has_efi_marker);
            if slot.is_none() && !marked {
                continue;
            }
            if parent_disk(&row.identifier) != Some(drive.identifier.as_str()) {
                debug!(
                    row = %row.identifier,
                    disk = %drive.identifier,
                    "partition listed under a different disk"
                );
            }

            // Slot 1 is only the conventional ESP on GUID-partitioned disks.
            let first_slot = slot == Some(1) && drive.content.as_deref() == Some(GUID_SCHEME);
            drive.upsert_partition(PartitionCandidate {
                name: Some(row.name.unwrap_or_else(|| row.identifier.clone())),
                size_description: row.size,
                is_efi_candidate: marked || first_slot,
                type_description: row.type_description,
                mount_point: None,
                identifier: row.identifier,
            });
        }

        drives
    }
}

#[derive(Debug, PartialEq, Eq)]
struct Row {
    identifier: String,
    type_description: Option<String>,
    name: Option<String>,
    size: Option<String>,
}

/// Splits one `N: TYPE NAME SIZE IDENTIFIER` row.
///
/// `name_column` is the byte offset of the `NAME` header, used to split
/// multi-word types from multi-word names.
fn parse_row(line: &str, name_column: Option<usize>) -> Option<Row> {
    let index = ROW_RE.find(line)?;
    let body_start = index.end();

    let (body_end, size, identifier) = match SIZE_RE.captures(line) {
        Some(caps) if caps.get(0)?.start() >= body_start => {
            let whole = caps.get(0)?;
            (whole.start(), non_empty(&caps[1]), caps[2].to_string())
        }
        _ => {
            let last = line.split_whitespace().last()?;
            let start = line.rfind(last)?;
            (start, None, last.to_string())
        }
    };

    if !identifier.starts_with("disk") {
        return None;
    }

    let body = line.get(body_start..body_end).unwrap_or_default();
    let (type_description, name) = match name_column
        .filter(|col| *col > body_start && *col <= body_end)
        .and_then(|col| Some((line.get(body_start..col)?, line.get(col..body_end)?)))
    {
        Some((ty, name)) => (non_empty(ty), non_empty(name)),
        None => {
            let mut tokens = body.split_whitespace();
            let ty = tokens.next().map(str::to_string);
            let name = non_empty(&tokens.collect::<Vec<_>>().join(" "));
            (ty, name)
        }
    };

    Some(Row {
        identifier,
        type_description,
        name,
        size,
    })
}


#[cfg(test)]
mod tests {
    use super::fixtures::LIST_TEXT;
    use super::*;

    #[test]
    fn test_parse_text_listing() {
        let drives = TextListing.parse(LIST_TEXT);
        assert_eq!(drives.len(), 3);

        let disk0 = &drives[0];
        assert_eq!(disk0.identifier, "disk0");
        assert_eq!(disk0.bus_hint.as_deref(), Some("internal, physical"));
        assert_eq!(disk0.size_description.as_deref(), Some("500.3 GB"));
        assert_eq!(disk0.content.as_deref(), Some("GUID_partition_scheme"));
        assert_eq!(disk0.partitions.len(), 2);

        let efi = &disk0.partitions[0];
        assert_eq!(efi.identifier, "disk0s1");
        assert_eq!(efi.type_description.as_deref(), Some("EFI"));
        assert_eq!(efi.name.as_deref(), Some("EFI"));
        assert_eq!(efi.size_description.as_deref(), Some("209.7 MB"));
        assert!(efi.is_efi_candidate);

        let container = &disk0.partitions[1];
        assert_eq!(container.type_description.as_deref(), Some("Apple_APFS"));
        assert_eq!(container.name.as_deref(), Some("Container disk1"));
        assert!(!container.is_efi_candidate);

        let synthesized = &drives[1];
        assert_eq!(synthesized.content.as_deref(), Some("APFS Container Scheme"));
        assert_eq!(synthesized.size_description.as_deref(), Some("500.1 GB"));
        assert_eq!(synthesized.partitions.len(), 1);
        assert_eq!(
            synthesized.partitions[0].type_description.as_deref(),
            Some("APFS Volume")
        );
        assert_eq!(
            synthesized.partitions[0].name.as_deref(),
            Some("Macintosh HD - Data")
        );

        let usb = &drives[2];
        assert_eq!(usb.bus_hint.as_deref(), Some("external, physical"));
        assert_eq!(usb.partitions[0].name.as_deref(), Some("USB STICK"));
        // FDisk stick: slot 1 alone is not an EFI hint.
        assert!(!usb.partitions[0].is_efi_candidate);

        // APFS volumes on a synthesized container are not either.
        assert!(!synthesized.partitions[0].is_efi_candidate);
    }

    #[test]
    fn test_parse_row_without_header() {
        let row = parse_row("   1:  EFI EFI  209.7 MB   disk2s1", None).unwrap();
        assert_eq!(row.identifier, "disk2s1");
        assert_eq!(row.type_description.as_deref(), Some("EFI"));
        assert_eq!(row.name.as_deref(), Some("EFI"));
        assert_eq!(row.size.as_deref(), Some("209.7 MB"));
    }

    #[test]
    fn test_garbage_is_ignored() {
        assert!(TextListing.parse("").is_empty());
        assert!(TextListing.parse("Unable to run diskutil\n  1: nonsense").is_empty());

        let drives = TextListing.parse("/dev/disk7 (disk image):\n   1: junk row without id\n");
        assert_eq!(drives.len(), 1);
        assert!(drives[0].partitions.is_empty());
    }
}
