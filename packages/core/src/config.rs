//! Engine tunables.
//!
//! Nothing here is persisted; callers build an [`EngineConfig`] in memory
//! and hand it to [`DriveManager`](crate::manager::DriveManager).

use std::ops::RangeInclusive;
use std::path::PathBuf;
use std::time::Duration;

/// Filesystem drivers tried, in order, when the default mount fails.
pub const DEFAULT_FALLBACK_FILESYSTEMS: &[&str] = &["msdos", "hfs", "apfs", "exfat"];

/// Parent directory for fallback mount points.
pub const DEFAULT_FALLBACK_MOUNT_ROOT: &str = "/Volumes";

/// Number of EFI slot identifiers (`disk0s1`..) tried when inventory has none.
pub const DEFAULT_EFI_FALLBACK_COUNT: u32 = 10;

/// Configuration for inventory, mount and EFI heuristics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub fallback_filesystems: Vec<String>,
    pub fallback_mount_root: PathBuf,
    /// Polls made to confirm a mount point after a successful mount command.
    pub confirm_attempts: u32,
    /// First settle delay; doubled on every further attempt.
    pub settle_delay: Duration,
    pub efi_fallback_identifiers: Vec<String>,
    /// Disk indices assumed internal when no bus signal is available.
    pub internal_disk_indices: RangeInclusive<u32>,
    /// Ask `diskutil info` about drives that listings could not classify.
    pub probe_device_info: bool,
    /// Retry a failed unmount with `force`.
    pub force_unmount_fallback: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            fallback_filesystems: DEFAULT_FALLBACK_FILESYSTEMS
                .iter()
                .map(|fs| fs.to_string())
                .collect(),
            fallback_mount_root: PathBuf::from(DEFAULT_FALLBACK_MOUNT_ROOT),
            confirm_attempts: 4,
            settle_delay: Duration::from_millis(500),
            efi_fallback_identifiers: (0..DEFAULT_EFI_FALLBACK_COUNT)
                .map(|index| format!("disk{index}s1"))
                .collect(),
            internal_disk_indices: 0..=1,
            probe_device_info: true,
            force_unmount_fallback: false,
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fallback_filesystems<I, S>(mut self, filesystems: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fallback_filesystems = filesystems.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_fallback_mount_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.fallback_mount_root = root.into();
        self
    }

    /// Sets the confirmation budget. At least one attempt is always made.
    pub fn with_confirm_attempts(mut self, attempts: u32) -> Self {
        self.confirm_attempts = attempts.max(1);
        self
    }

    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    pub fn with_efi_fallback_identifiers<I, S>(mut self, identifiers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.efi_fallback_identifiers = identifiers.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_internal_disk_indices(mut self, indices: RangeInclusive<u32>) -> Self {
        self.internal_disk_indices = indices;
        self
    }

    pub fn with_probe_device_info(mut self, enabled: bool) -> Self {
        self.probe_device_info = enabled;
        self
    }

    pub fn with_force_unmount_fallback(mut self, enabled: bool) -> Self {
        self.force_unmount_fallback = enabled;
        self
    }

    /// Fallback mount directory for `identifier`.
    pub fn fallback_mount_point(&self, identifier: &str) -> PathBuf {
        self.fallback_mount_root.join(identifier)
    }
}
