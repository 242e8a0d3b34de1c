//! Parsers that turn disk-utility output into drive candidates.
//!
//! Every parser is total: malformed input yields fewer records, never an
//! error. Records without an identifier are dropped.
//!
//! - [`plist`]: `diskutil list -plist` and `diskutil info -plist`
//! - [`text`]: free-form `diskutil list`
//! - [`mounts`]: `mount` and `df -h` tables

pub mod mounts;
pub mod plist;
pub mod text;

use std::path::PathBuf;
use std::sync::LazyLock;

use regex::Regex;

pub use mounts::{MountRecord, parse_mount_table, parse_usage_table};
pub use plist::{DeviceInfo, PlistListing, parse_device_info};
pub use text::TextListing;

const EFI_PARTITION_GUID: &str = "C12A7328-F81F-11D2-BA4B-00A0C93EC93B";

/// Partition scheme whose first slot is conventionally the ESP.
pub(crate) const GUID_SCHEME: &str = "GUID_partition_scheme";

static EFI_MARKER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bEFI\b").expect("valid EFI marker regex"));

/// A listing strategy: raw tool output in, drive candidates out.
pub trait ListingParser {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    fn parse(&self, raw: &str) -> Vec<DriveCandidate>;
}

/// Partial partition record from one strategy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartitionCandidate {
    pub identifier: String,
    pub name: Option<String>,
    pub size_description: Option<String>,
    pub type_description: Option<String>,
    pub mount_point: Option<PathBuf>,
    pub is_efi_candidate: bool,
}

impl PartitionCandidate {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            ..Default::default()
        }
    }

    /// Folds `other` into `self`: non-empty fields fill gaps, a mount point
    /// from `other` always wins.
    pub fn merge(&mut self, other: PartitionCandidate) {
        fill(&mut self.name, other.name);
        fill(&mut self.size_description, other.size_description);
        fill(&mut self.type_description, other.type_description);
        if other.mount_point.is_some() {
            self.mount_point = other.mount_point;
        }
        self.is_efi_candidate |= other.is_efi_candidate;
    }
}

/// Partial drive record from one strategy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DriveCandidate {
    pub identifier: String,
    pub name: Option<String>,
    pub size_description: Option<String>,
    pub size_bytes: Option<u64>,
    pub content: Option<String>,
    pub mount_point: Option<PathBuf>,
    /// Bus/protocol text or listing qualifier (`USB`, `(external, physical)`).
    pub bus_hint: Option<String>,
    pub internal: Option<bool>,
    pub removable: Option<bool>,
    pub partitions: Vec<PartitionCandidate>,
}

impl DriveCandidate {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            ..Default::default()
        }
    }

    /// Folds `other` into `self` by identifier, merging partitions likewise.
    pub fn merge(&mut self, other: DriveCandidate) {
        fill(&mut self.name, other.name);
        fill(&mut self.size_description, other.size_description);
        self.size_bytes = self.size_bytes.or(other.size_bytes);
        fill(&mut self.content, other.content);
        if other.mount_point.is_some() {
            self.mount_point = other.mount_point;
        }
        fill(&mut self.bus_hint, other.bus_hint);
        self.internal = self.internal.or(other.internal);
        self.removable = self.removable.or(other.removable);
        for partition in other.partitions {
            self.upsert_partition(partition);
        }
    }

    /// Merges `partition` into an existing entry or appends it.
    pub fn upsert_partition(&mut self, partition: PartitionCandidate) {
        match self
            .partitions
            .iter_mut()
            .find(|p| p.identifier == partition.identifier)
        {
            Some(existing) => existing.merge(partition),
            None => self.partitions.push(partition),
        }
    }
}

fn fill(slot: &mut Option<String>, incoming: Option<String>) {
    let empty = slot.as_deref().is_none_or(|s| s.trim().is_empty());
    if empty && incoming.as_deref().is_some_and(|s| !s.trim().is_empty()) {
        *slot = incoming;
    }
}

/// Returns `Some(text)` for non-blank text.
pub(crate) fn non_empty(text: &str) -> Option<String> {
    let trimmed = text.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// True when a type or name string marks an EFI System Partition.
pub fn has_efi_marker(text: &str) -> bool {
    EFI_MARKER_RE.is_match(text) || text.to_ascii_uppercase().contains(EFI_PARTITION_GUID)
}

/// Formats a byte count on a 1024-based B/KB/MB/GB/TB ladder.
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", value, UNITS[unit])
}
