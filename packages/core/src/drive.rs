//! Canonical drive/partition model.
//!
//! A [`Snapshot`] is produced fresh by every inventory refresh and never
//! mutated afterwards; consumers hold it behind an `Arc` and swap it out
//! wholesale.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

static IDENTIFIER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(disk(\d+))(?:s(\d+))?").expect("valid identifier regex"));

/// Classification of a drive by bus/protocol signal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MediumClass {
    Internal,
    External,
    #[default]
    Unknown,
}

impl MediumClass {
    /// Sort rank: external first, internal last.
    pub(crate) fn rank(self) -> u8 {
        match self {
            Self::External => 0,
            Self::Unknown => 1,
            Self::Internal => 2,
        }
    }
}

/// Pending user intent recorded against a drive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Selection {
    #[default]
    None,
    PendingMount,
    PendingUnmount,
}

/// A partition (or APFS volume) belonging to a [`Drive`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Partition {
    /// Device identifier, e.g. `disk0s1`.
    pub identifier: String,
    /// Volume name, falling back to the identifier.
    pub name: String,
    pub size_description: String,
    /// Content/type string as reported by the listing (`EFI`, `Apple_HFS`, ...).
    pub type_description: String,
    pub mount_point: Option<PathBuf>,
    /// Heuristic: this partition is probably the EFI System Partition.
    pub is_efi_candidate: bool,
}

impl Partition {
    pub fn is_mounted(&self) -> bool {
        self.mount_point.is_some()
    }
}

/// A physical or logical storage device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Drive {
    /// Stable device identifier, e.g. `disk4`. Unique within a snapshot.
    pub identifier: String,
    pub display_name: String,
    pub size_description: String,
    /// Raw capacity, when a listing reported one.
    pub size_bytes: Option<u64>,
    pub medium_class: MediumClass,
    pub mount_point: Option<PathBuf>,
    /// Ordered by slot number.
    pub partitions: Vec<Partition>,
    pub selection: Selection,
    /// Bus/protocol text that drove classification, if any.
    pub bus_protocol: Option<String>,
}

impl Drive {
    /// True iff the drive reports a mount point.
    pub fn is_mounted(&self) -> bool {
        self.mount_point.is_some()
    }

    pub fn is_external(&self) -> bool {
        self.medium_class == MediumClass::External
    }

    pub fn partition(&self, identifier: &str) -> Option<&Partition> {
        self.partitions.iter().find(|p| p.identifier == identifier)
    }
}

/// Immutable, point-in-time set of drives.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Snapshot {
    pub drives: Vec<Drive>,
}

impl Snapshot {
    pub fn new(drives: Vec<Drive>) -> Self {
        Self { drives }
    }

    pub fn is_empty(&self) -> bool {
        self.drives.is_empty()
    }

    pub fn len(&self) -> usize {
        self.drives.len()
    }

    /// Looks up a drive by identifier.
    pub fn find(&self, identifier: &str) -> Option<&Drive> {
        self.drives.iter().find(|d| d.identifier == identifier)
    }

    /// Every partition flagged as an EFI candidate, in snapshot order.
    pub fn efi_candidates(&self) -> impl Iterator<Item = &Partition> {
        self.drives
            .iter()
            .flat_map(|d| d.partitions.iter())
            .filter(|p| p.is_efi_candidate)
    }

    /// Looks up a partition by identifier across all drives.
    pub fn partition(&self, identifier: &str) -> Option<&Partition> {
        self.drives.iter().find_map(|d| d.partition(identifier))
    }

    /// Mount point of a drive or partition with this identifier.
    pub fn mount_point_of(&self, identifier: &str) -> Option<&Path> {
        self.drives.iter().find_map(|d| {
            if d.identifier == identifier {
                d.mount_point.as_deref()
            } else {
                d.partition(identifier).and_then(|p| p.mount_point.as_deref())
            }
        })
    }
}

/// Strips a leading `/dev/` from a device path.
pub fn normalize_identifier(raw: &str) -> &str {
    raw.trim().trim_start_matches("/dev/")
}

/// Whole-disk identifier owning `identifier` (`disk0s1` -> `disk0`).
pub fn parent_disk(identifier: &str) -> Option<&str> {
    IDENTIFIER_RE
        .captures(identifier)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

/// Numeric disk index (`disk3s2` -> 3).
pub fn disk_index(identifier: &str) -> Option<u32> {
    IDENTIFIER_RE
        .captures(identifier)
        .and_then(|c| c.get(2))
        .and_then(|m| m.as_str().parse().ok())
}

/// Partition slot number (`disk3s2` -> 2). `None` for whole disks.
pub fn slot_number(identifier: &str) -> Option<u32> {
    IDENTIFIER_RE
        .captures(identifier)
        .and_then(|c| c.get(3))
        .and_then(|m| m.as_str().parse().ok())
}

/// True for `diskN` without a slot suffix.
pub fn is_whole_disk(identifier: &str) -> bool {
    parent_disk(identifier) == Some(identifier)
}

/// Natural ordering key for partition identifiers.
pub(crate) fn slot_key(identifier: &str) -> (u32, String) {
    (slot_number(identifier).unwrap_or(u32::MAX), identifier.to_string())
}
