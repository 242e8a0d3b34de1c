//! Structured listing: `diskutil list -plist` and `diskutil info -plist`.

use std::path::PathBuf;

use serde::Deserialize;
use tracing::debug;

use super::{
    DriveCandidate, GUID_SCHEME, ListingParser, PartitionCandidate, format_size, has_efi_marker,
    non_empty,
};
use crate::drive::slot_number;
use crate::error::{Error, Result};

/// Raw plist structure from `diskutil list -plist`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DiskList {
    #[serde(default)]
    all_disks_and_partitions: Vec<PlistDisk>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PlistDisk {
    #[serde(default)]
    device_identifier: Option<String>,
    #[serde(default)]
    volume_name: Option<String>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    size: Option<u64>,
    #[serde(default)]
    mount_point: Option<String>,
    #[serde(default, alias = "Protocol")]
    bus_protocol: Option<String>,
    #[serde(default)]
    internal: Option<bool>,
    #[serde(default)]
    removable_media: Option<bool>,
    #[serde(default)]
    partitions: Vec<PlistVolume>,
    #[serde(default, rename = "APFSVolumes")]
    apfs_volumes: Vec<PlistVolume>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PlistVolume {
    #[serde(default)]
    device_identifier: Option<String>,
    #[serde(default)]
    volume_name: Option<String>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    size: Option<u64>,
    #[serde(default)]
    mount_point: Option<String>,
}

/// Parser for `diskutil list -plist`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlistListing;

impl PlistListing {
    /// Decodes the document, reporting malformed input as an error.
    pub fn try_parse(&self, raw: &str) -> Result<Vec<DriveCandidate>> {
        let list: DiskList = plist::from_bytes(raw.as_bytes()).map_err(|e| Error::ListingParse {
            format: "plist",
            message: e.to_string(),
        })?;

        Ok(list
            .all_disks_and_partitions
            .into_iter()
            .filter_map(convert_disk)
            .collect())
    }
}

impl ListingParser for PlistListing {
    fn name(&self) -> &'static str {
        "plist"
    }

    fn parse(&self, raw: &str) -> Vec<DriveCandidate> {
        match self.try_parse(raw) {
            Ok(drives) => drives,
            Err(e) => {
                debug!(error = %e, "structured listing unusable");
                Vec::new()
            }
        }
    }
}

fn convert_disk(disk: PlistDisk) -> Option<DriveCandidate> {
    let identifier = disk.device_identifier.as_deref().and_then(non_empty)?;
    let guid_scheme = disk.content.as_deref() == Some(GUID_SCHEME);

    let partitions = disk
        .partitions
        .into_iter()
        .chain(disk.apfs_volumes)
        .filter_map(|volume| convert_volume(volume, guid_scheme))
        .collect();

    Some(DriveCandidate {
        name: disk.volume_name.as_deref().and_then(non_empty),
        size_description: disk.size.map(format_size),
        size_bytes: disk.size,
        content: disk.content.as_deref().and_then(non_empty),
        mount_point: mount_path(disk.mount_point),
        bus_hint: disk.bus_protocol.as_deref().and_then(non_empty),
        internal: disk.internal,
        removable: disk.removable_media,
        partitions,
        identifier,
    })
}

fn convert_volume(volume: PlistVolume, guid_scheme: bool) -> Option<PartitionCandidate> {
    let identifier = volume.device_identifier.as_deref().and_then(non_empty)?;
    let content = volume.content.as_deref().and_then(non_empty);
    let name = volume.volume_name.as_deref().and_then(non_empty);

    let marked = content.as_deref().is_some_and(has_efi_marker)
        || name.as_deref().is_some_and(has_efi_marker);
    let first_slot = guid_scheme && slot_number(&identifier) == Some(1);

    Some(PartitionCandidate {
        name: Some(name.unwrap_or_else(|| identifier.clone())),
        size_description: volume.size.map(format_size),
        type_description: content,
        mount_point: mount_path(volume.mount_point),
        is_efi_candidate: marked || first_slot,
        identifier,
    })
}

fn mount_path(raw: Option<String>) -> Option<PathBuf> {
    raw.as_deref().and_then(non_empty).map(PathBuf::from)
}

/// Facts from `diskutil info -plist <identifier>`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeviceInfo {
    #[serde(default)]
    pub device_identifier: Option<String>,
    #[serde(default)]
    pub volume_name: Option<String>,
    #[serde(default)]
    pub media_name: Option<String>,
    #[serde(default)]
    pub mount_point: Option<String>,
    #[serde(default)]
    pub bus_protocol: Option<String>,
    #[serde(default)]
    pub internal: Option<bool>,
    #[serde(default)]
    pub removable_media: Option<bool>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub total_size: Option<u64>,
}

impl DeviceInfo {
    /// Mount point, when the device is mounted.
    pub fn mounted_at(&self) -> Option<PathBuf> {
        mount_path(self.mount_point.clone())
    }

    /// Best display name: volume name, then media name.
    pub fn display_name(&self) -> Option<String> {
        self.volume_name
            .as_deref()
            .and_then(non_empty)
            .or_else(|| self.media_name.as_deref().and_then(non_empty))
    }
}

/// Parses `diskutil info -plist` output.
pub fn parse_device_info(raw: &str) -> Result<DeviceInfo> {
    plist::from_bytes(raw.as_bytes()).map_err(|e| Error::ListingParse {
        format: "device info plist",
        message: e.to_string(),
    })
}

#[cfg(test)]
pub(crate) mod fixtures {
    /// Two disks: internal `disk0` with an EFI partition, external USB `disk4`.
    pub const LIST_PLIST: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<dict>
    <key>AllDisks</key>
    <array>
        <string>disk0</string>
        <string>disk0s1</string>
        <string>disk0s2</string>
        <string>disk4</string>
        <string>disk4s1</string>
    </array>
    <key>AllDisksAndPartitions</key>
    <array>
        <dict>
            <key>Content</key>
            <string>GUID_partition_scheme</string>
            <key>DeviceIdentifier</key>
            <string>disk0</string>
            <key>Internal</key>
            <true/>
            <key>Partitions</key>
            <array>
                <dict>
                    <key>Content</key>
                    <string>EFI</string>
                    <key>DeviceIdentifier</key>
                    <string>disk0s1</string>
                    <key>Size</key>
                    <integer>209715200</integer>
                    <key>VolumeName</key>
                    <string>EFI</string>
                </dict>
                <dict>
                    <key>Content</key>
                    <string>Apple_APFS</string>
                    <key>DeviceIdentifier</key>
                    <string>disk0s2</string>
                    <key>Size</key>
                    <integer>499898105856</integer>
                </dict>
            </array>
            <key>Size</key>
            <integer>500107862016</integer>
        </dict>
        <dict>
            <key>BusProtocol</key>
            <string>USB</string>
            <key>Content</key>
            <string>FDisk_partition_scheme</string>
            <key>DeviceIdentifier</key>
            <string>disk4</string>
            <key>Partitions</key>
            <array>
                <dict>
                    <key>Content</key>
                    <string>DOS_FAT_32</string>
                    <key>DeviceIdentifier</key>
                    <string>disk4s1</string>
                    <key>MountPoint</key>
                    <string>/Volumes/USBSTICK</string>
                    <key>Size</key>
                    <integer>31914983424</integer>
                    <key>VolumeName</key>
                    <string>USBSTICK</string>
                </dict>
            </array>
            <key>Size</key>
            <integer>32015679488</integer>
        </dict>
        <dict>
            <key>Content</key>
            <string>Apple_partition_scheme</string>
        </dict>
    </array>
</dict>
</plist>
"#;

    pub fn info_plist(identifier: &str, mount_point: Option<&str>, protocol: &str) -> String {
        let mount = mount_point
            .map(|m| format!("<key>MountPoint</key><string>{m}</string>"))
            .unwrap_or_default();
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<plist version="1.0">
<dict>
    <key>BusProtocol</key><string>{protocol}</string>
    <key>DeviceIdentifier</key><string>{identifier}</string>
    <key>Internal</key><false/>
    <key>MediaName</key><string>SanDisk Ultra</string>
    {mount}
</dict>
</plist>
"#
        )
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn test_parse_disk_list() {
        let drives = PlistListing.parse(LIST_PLIST);

        // The record without DeviceIdentifier is dropped.
        assert_eq!(drives.len(), 2);

        let disk0 = &drives[0];
        assert_eq!(disk0.identifier, "disk0");
        assert_eq!(disk0.name, None);
        assert_eq!(disk0.size_description.as_deref(), Some("465.8 GB"));
        assert_eq!(disk0.internal, Some(true));
        assert_eq!(disk0.partitions.len(), 2);
        assert!(disk0.partitions[0].is_efi_candidate);
        assert_eq!(disk0.partitions[0].size_description.as_deref(), Some("200.0 MB"));
        assert!(!disk0.partitions[1].is_efi_candidate);
        assert_eq!(disk0.partitions[1].name.as_deref(), Some("disk0s2"));

        let disk4 = &drives[1];
        assert_eq!(disk4.bus_hint.as_deref(), Some("USB"));
        assert_eq!(
            disk4.partitions[0].mount_point,
            Some(PathBuf::from("/Volumes/USBSTICK"))
        );
        // Slot 1 on an MBR disk is not an EFI guess.
        assert!(!disk4.partitions[0].is_efi_candidate);
    }

    #[test]
    fn test_apfs_volumes_become_partitions() {
        let raw = r#"<?xml version="1.0" encoding="UTF-8"?>
<plist version="1.0">
<dict>
    <key>AllDisksAndPartitions</key>
    <array>
        <dict>
            <key>APFSVolumes</key>
            <array>
                <dict>
                    <key>DeviceIdentifier</key><string>disk3s1</string>
                    <key>MountPoint</key><string>/System/Volumes/Data</string>
                    <key>VolumeName</key><string>Macintosh HD - Data</string>
                </dict>
                <dict>
                    <key>DeviceIdentifier</key><string>disk3s5</string>
                    <key>VolumeName</key><string>Macintosh HD</string>
                </dict>
            </array>
            <key>Content</key><string>EF57347C-0000-11AA-AA11-00306543ECAC</string>
            <key>DeviceIdentifier</key><string>disk3</string>
            <key>Size</key><integer>499898105856</integer>
        </dict>
    </array>
</dict>
</plist>"#;

        let drives = PlistListing.parse(raw);
        assert_eq!(drives.len(), 1);
        assert_eq!(drives[0].partitions.len(), 2);
        assert_eq!(
            drives[0].partitions[0].mount_point,
            Some(PathBuf::from("/System/Volumes/Data"))
        );
        assert!(drives[0].partitions.iter().all(|p| !p.is_efi_candidate));
    }

    #[test]
    fn test_malformed_plist_yields_nothing() {
        assert!(PlistListing.parse("not a plist").is_empty());
        assert!(PlistListing.try_parse("").is_err());
    }

    #[test]
    fn test_parse_device_info() {
        let info = parse_device_info(&info_plist("disk9s1", Some("/Volumes/EFI"), "USB")).unwrap();
        assert_eq!(info.device_identifier.as_deref(), Some("disk9s1"));
        assert_eq!(info.mounted_at(), Some(PathBuf::from("/Volumes/EFI")));
        assert_eq!(info.bus_protocol.as_deref(), Some("USB"));
        assert_eq!(info.internal, Some(false));
        assert_eq!(info.display_name().as_deref(), Some("SanDisk Ultra"));

        let unmounted = parse_device_info(&info_plist("disk9s1", None, "USB")).unwrap();
        assert_eq!(unmounted.mounted_at(), None);
    }
}
