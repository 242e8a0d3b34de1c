//! Mount-table (`mount`) and usage-table (`df -h`) parsing.
//!
//! Both yield device -> mount point associations for `/dev/disk*` devices
//! only; pseudo filesystems (`devfs`, `map auto_home`, tmpfs) are skipped.

use std::path::{Path, PathBuf};

use super::non_empty;
use crate::drive::normalize_identifier;

/// One device/mount point association.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountRecord {
    /// Identifier without the `/dev/` prefix.
    pub identifier: String,
    pub mount_point: PathBuf,
    pub filesystem: Option<String>,
    /// Size column from `df -h`.
    pub size_description: Option<String>,
}

impl MountRecord {
    /// Last path component of the mount point (the volume name).
    pub fn volume_name(&self) -> Option<&str> {
        self.mount_point.file_name().and_then(|n| n.to_str())
    }
}

fn disk_device(device: &str) -> Option<String> {
    let device = device.trim();
    if !device.starts_with("/dev/disk") {
        return None;
    }
    non_empty(normalize_identifier(device))
}

/// Parses `mount` output in either layout:
///
/// - `/dev/disk4s1 on /Volumes/USB STICK (msdos, local, nodev)`
/// - `/dev/disk4s1 on /mnt/usb type vfat (rw,relatime)`
pub fn parse_mount_table(raw: &str) -> Vec<MountRecord> {
    raw.lines().filter_map(parse_mount_line).collect()
}

fn parse_mount_line(line: &str) -> Option<MountRecord> {
    let (device, rest) = line.split_once(" on ")?;
    let identifier = disk_device(device)?;

    // Options are the trailing parenthesised group; paths may contain spaces.
    let (target, options) = match rest.rfind(" (") {
        Some(idx) if rest.trim_end().ends_with(')') => (&rest[..idx], Some(&rest[idx + 2..])),
        _ => (rest, None),
    };

    let (path, filesystem) = match target.rsplit_once(" type ") {
        Some((path, fs)) => (path, non_empty(fs)),
        None => {
            let fs = options
                .and_then(|opts| opts.trim_end_matches(')').split(',').next())
                .and_then(non_empty);
            (target, fs)
        }
    };

    let path = path.trim();
    if !path.starts_with('/') {
        return None;
    }

    Some(MountRecord {
        identifier,
        mount_point: PathBuf::from(path),
        filesystem,
        size_description: None,
    })
}

/// Parses `df -h` output. The mount point is everything after the last
/// percentage column, so it may contain spaces.
pub fn parse_usage_table(raw: &str) -> Vec<MountRecord> {
    raw.lines().filter_map(parse_usage_line).collect()
}

fn parse_usage_line(line: &str) -> Option<MountRecord> {
    let mut tokens = line.split_whitespace();
    let identifier = disk_device(tokens.next()?)?;
    let size = tokens.next().and_then(non_empty);

    let mut cursor = 0;
    let mut after_percent = None;
    for token in line.split_whitespace() {
        let start = cursor + line[cursor..].find(token)?;
        cursor = start + token.len();
        if token.ends_with('%') {
            after_percent = Some(cursor);
        }
    }

    let path = line[after_percent?..].trim();
    if !path.starts_with('/') {
        return None;
    }

    Some(MountRecord {
        identifier,
        mount_point: Path::new(path).to_path_buf(),
        filesystem: None,
        size_description: size,
    })
}

#[cfg(test)]
pub(crate) mod fixtures {
    pub const MOUNT_TABLE: &str = "\
/dev/disk3s1s1 on / (apfs, sealed, local, read-only, journaled)
devfs on /dev (devfs, local, nobrowse)
/dev/disk3s5 on /System/Volumes/Data (apfs, local, journaled, nobrowse, protect)
map auto_home on /System/Volumes/Data/home (autofs, automounted, nobrowse)
/dev/disk4s1 on /Volumes/USB STICK (msdos, local, nodev, nosuid, noowners)
";

    pub const USAGE_TABLE: &str = "\
Filesystem        Size    Used   Avail Capacity iused ifree %iused  Mounted on
/dev/disk3s1s1   460Gi   9.6Gi   300Gi     4%    404k  3.1G    0%   /
devfs            200Ki   200Ki     0Bi   100%     692     0  100%   /dev
/dev/disk5s2      29Gi    12Gi    17Gi    42%      1     0  100%   /Volumes/My Backup
";
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn test_parse_mount_table_bsd_layout() {
        let records = parse_mount_table(MOUNT_TABLE);
        assert_eq!(records.len(), 3);

        assert_eq!(records[0].identifier, "disk3s1s1");
        assert_eq!(records[0].mount_point, PathBuf::from("/"));
        assert_eq!(records[0].filesystem.as_deref(), Some("apfs"));

        let usb = &records[2];
        assert_eq!(usb.identifier, "disk4s1");
        assert_eq!(usb.mount_point, PathBuf::from("/Volumes/USB STICK"));
        assert_eq!(usb.filesystem.as_deref(), Some("msdos"));
        assert_eq!(usb.volume_name(), Some("USB STICK"));
    }

    #[test]
    fn test_parse_mount_table_linux_layout() {
        let records = parse_mount_table(
            "/dev/disk2s1 on /mnt/efi type vfat (rw,relatime,fmask=0022)\n\
             tmpfs on /run type tmpfs (rw,nosuid)\n",
        );
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].mount_point, PathBuf::from("/mnt/efi"));
        assert_eq!(records[0].filesystem.as_deref(), Some("vfat"));
    }

    #[test]
    fn test_parse_usage_table() {
        let records = parse_usage_table(USAGE_TABLE);
        assert_eq!(records.len(), 2);

        assert_eq!(records[0].identifier, "disk3s1s1");
        assert_eq!(records[0].mount_point, PathBuf::from("/"));
        assert_eq!(records[0].size_description.as_deref(), Some("460Gi"));

        assert_eq!(records[1].identifier, "disk5s2");
        assert_eq!(records[1].mount_point, PathBuf::from("/Volumes/My Backup"));
    }

    #[test]
    fn test_linux_df_layout() {
        let records = parse_usage_table(
            "Filesystem      Size  Used Avail Use% Mounted on\n\
             /dev/disk1s1     50G   20G   28G  42% /media/usb drive\n",
        );
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].mount_point, PathBuf::from("/media/usb drive"));
    }

    #[test]
    fn test_malformed_lines_are_dropped() {
        assert!(parse_mount_table("garbage\n/dev/disk2 on relative (hfs)").is_empty());
        assert!(parse_usage_table("/dev/disk2 1G").is_empty());
    }
}
