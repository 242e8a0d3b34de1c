//! Inventory aggregation.
//!
//! Runs every detection strategy through the injected [`CommandRunner`],
//! merges their candidates by identifier, classifies and sorts the result
//! into a [`Snapshot`]. A failing strategy only loses its own contribution;
//! if everything fails the snapshot is empty.

use std::path::PathBuf;
use std::sync::{Arc, LazyLock};

use regex::Regex;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::drive::{Drive, MediumClass, Partition, Selection, Snapshot, disk_index, parent_disk, slot_key};
use crate::executor::CommandRunner;
use crate::parse::{
    DriveCandidate, ListingParser, MountRecord, PartitionCandidate, PlistListing, TextListing,
    parse_device_info, parse_mount_table, parse_usage_table,
};

pub const LIST_PLIST_COMMAND: &str = "diskutil list -plist";
pub const LIST_TEXT_COMMAND: &str = "diskutil list";
pub const MOUNT_TABLE_COMMAND: &str = "mount";
pub const USAGE_TABLE_COMMAND: &str = "df -h";

/// `diskutil info -plist` for one device.
pub fn device_info_command(identifier: &str) -> String {
    format!("diskutil info -plist {identifier}")
}

static INTERNAL_BUS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(sata|pci|pcie|nvme|apple fabric|internal)\b")
        .expect("valid internal bus regex")
});

static EXTERNAL_BUS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(usb|firewire|thunderbolt|sd|sdxc|secure digital|external|removable)\b")
        .expect("valid external bus regex")
});

/// Classification signals gathered for one drive.
#[derive(Debug, Clone, Copy, Default)]
pub struct BusSignals<'a> {
    pub bus: Option<&'a str>,
    pub internal: Option<bool>,
    pub removable: Option<bool>,
}

/// Classifies a drive: explicit bus signals first, then the reserved
/// internal index range, else `Unknown`.
pub fn classify(identifier: &str, signals: BusSignals<'_>, config: &EngineConfig) -> MediumClass {
    if let Some(bus) = signals.bus {
        if INTERNAL_BUS_RE.is_match(bus) {
            return MediumClass::Internal;
        }
        if EXTERNAL_BUS_RE.is_match(bus) {
            return MediumClass::External;
        }
    }
    if signals.removable == Some(true) {
        return MediumClass::External;
    }
    match signals.internal {
        Some(true) => return MediumClass::Internal,
        Some(false) => return MediumClass::External,
        None => {}
    }
    match disk_index(identifier) {
        Some(index) if config.internal_disk_indices.contains(&index) => MediumClass::Internal,
        _ => MediumClass::Unknown,
    }
}

/// Orders drives: external, unknown, internal; then name; then identifier.
pub fn sort_drives(drives: &mut [Drive]) {
    drives.sort_by_cached_key(|d| {
        (
            d.medium_class.rank(),
            d.display_name.to_lowercase(),
            d.identifier.clone(),
        )
    });
}

/// Builds snapshots from the host's disk utilities.
#[derive(Clone)]
pub struct InventoryAggregator {
    runner: Arc<dyn CommandRunner>,
    config: EngineConfig,
}

impl InventoryAggregator {
    pub fn new(runner: Arc<dyn CommandRunner>, config: EngineConfig) -> Self {
        Self { runner, config }
    }

    /// Produces a fresh snapshot. Never fails; selections are all `None`.
    pub fn refresh(&self) -> Snapshot {
        let mut candidates = self.run_listing(&PlistListing, LIST_PLIST_COMMAND);
        if candidates.is_empty() {
            debug!("structured listing empty, falling back to text listing");
            candidates = self.run_listing(&TextListing, LIST_TEXT_COMMAND);
        }

        let mounts = self.run_table(MOUNT_TABLE_COMMAND, parse_mount_table);
        let usage = self.run_table(USAGE_TABLE_COMMAND, parse_usage_table);
        for record in mounts.into_iter().chain(usage) {
            apply_mount_record(&mut candidates, record);
        }

        let mut drives: Vec<Drive> = candidates
            .into_iter()
            .map(|candidate| self.finalize(candidate))
            .collect();
        sort_drives(&mut drives);

        info!(drives = drives.len(), "inventory refreshed");
        Snapshot::new(drives)
    }

    fn run_listing(&self, parser: &dyn ListingParser, command: &str) -> Vec<DriveCandidate> {
        let output = self.runner.run(command, false);
        if !output.success {
            warn!(
                strategy = parser.name(),
                error = output.diagnostic().unwrap_or("no output"),
                "listing strategy failed"
            );
            return Vec::new();
        }

        let mut merged: Vec<DriveCandidate> = Vec::new();
        for candidate in parser.parse(&output.stdout) {
            merge_candidate(&mut merged, candidate);
        }
        debug!(strategy = parser.name(), drives = merged.len(), "listing parsed");
        merged
    }

    fn run_table(&self, command: &str, parse: fn(&str) -> Vec<MountRecord>) -> Vec<MountRecord> {
        let output = self.runner.run(command, false);
        if !output.success {
            warn!(
                command,
                error = output.diagnostic().unwrap_or("no output"),
                "mount strategy failed"
            );
            return Vec::new();
        }
        let records = parse(&output.stdout);
        debug!(command, records = records.len(), "mount records parsed");
        records
    }

    /// Asks `diskutil info` about a drive the listings could not classify.
    fn probe(&self, candidate: &mut DriveCandidate) {
        let output = self
            .runner
            .run(&device_info_command(&candidate.identifier), false);
        if !output.success {
            debug!(identifier = %candidate.identifier, "device info probe failed");
            return;
        }
        let info = match parse_device_info(&output.stdout) {
            Ok(info) => info,
            Err(e) => {
                debug!(identifier = %candidate.identifier, error = %e, "device info unparsable");
                return;
            }
        };

        let mut probed = DriveCandidate::new(candidate.identifier.clone());
        probed.name = info.display_name();
        probed.bus_hint = info.bus_protocol.clone();
        probed.internal = info.internal;
        probed.removable = info.removable_media;
        probed.mount_point = info.mounted_at();
        candidate.merge(probed);
    }

    fn finalize(&self, mut candidate: DriveCandidate) -> Drive {
        let mut medium_class = classify(&candidate.identifier, signals(&candidate), &self.config);
        if medium_class == MediumClass::Unknown && self.config.probe_device_info {
            self.probe(&mut candidate);
            medium_class = classify(&candidate.identifier, signals(&candidate), &self.config);
        }

        let mut partitions: Vec<Partition> = candidate
            .partitions
            .into_iter()
            .map(|p| Partition {
                name: p.name.unwrap_or_else(|| p.identifier.clone()),
                size_description: p.size_description.unwrap_or_default(),
                type_description: p.type_description.unwrap_or_default(),
                mount_point: p.mount_point,
                is_efi_candidate: p.is_efi_candidate,
                identifier: p.identifier,
            })
            .collect();
        partitions.sort_by_cached_key(|p| slot_key(&p.identifier));

        let mount_point: Option<PathBuf> = candidate
            .mount_point
            .or_else(|| partitions.iter().find_map(|p| p.mount_point.clone()));

        Drive {
            display_name: candidate
                .name
                .unwrap_or_else(|| format!("Disk {}", candidate.identifier)),
            size_description: candidate.size_description.unwrap_or_default(),
            size_bytes: candidate.size_bytes,
            medium_class,
            mount_point,
            partitions,
            selection: Selection::None,
            bus_protocol: candidate.bus_hint,
            identifier: candidate.identifier,
        }
    }
}

fn signals(candidate: &DriveCandidate) -> BusSignals<'_> {
    BusSignals {
        bus: candidate.bus_hint.as_deref(),
        internal: candidate.internal,
        removable: candidate.removable,
    }
}

/// Merges `candidate` into `candidates` by identifier.
pub(crate) fn merge_candidate(candidates: &mut Vec<DriveCandidate>, candidate: DriveCandidate) {
    match candidates
        .iter_mut()
        .find(|c| c.identifier == candidate.identifier)
    {
        Some(existing) => existing.merge(candidate),
        None => candidates.push(candidate),
    }
}

/// Attaches a mount record to its drive or partition, synthesizing the
/// parent drive when no listing reported it.
fn apply_mount_record(candidates: &mut Vec<DriveCandidate>, record: MountRecord) {
    let Some(parent) = parent_disk(&record.identifier).map(str::to_string) else {
        return;
    };

    let mut update = DriveCandidate::new(parent.clone());
    if record.identifier == parent {
        update.mount_point = Some(record.mount_point);
        update.size_description = record.size_description;
    } else {
        update.partitions.push(PartitionCandidate {
            name: record.volume_name().map(str::to_string),
            size_description: record.size_description,
            mount_point: Some(record.mount_point),
            ..PartitionCandidate::new(record.identifier)
        });
    }
    merge_candidate(candidates, update);
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use crate::executor::CommandOutput;
    use crate::parse::mounts::fixtures::{MOUNT_TABLE, USAGE_TABLE};
    use crate::parse::plist::fixtures::{LIST_PLIST, info_plist};
    use crate::parse::text::fixtures::LIST_TEXT;
    use crate::testing::ScriptedRunner;

    fn aggregator(runner: &Arc<ScriptedRunner>) -> InventoryAggregator {
        InventoryAggregator::new(runner.clone(), EngineConfig::default())
    }

    #[test]
    fn test_structured_listing_scenario() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.respond(LIST_PLIST_COMMAND, CommandOutput::ok(LIST_PLIST));

        let snapshot = aggregator(&runner).refresh();

        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.drives[0].identifier, "disk4");
        assert_eq!(snapshot.drives[0].medium_class, MediumClass::External);
        assert_eq!(snapshot.drives[1].identifier, "disk0");
        assert_eq!(snapshot.drives[1].medium_class, MediumClass::Internal);
        assert_eq!(snapshot.drives[1].display_name, "Disk disk0");

        let efi = snapshot.drives[1].partition("disk0s1").unwrap();
        assert!(efi.is_efi_candidate);
        // The mounted partition lends its mount point to the drive.
        assert_eq!(
            snapshot.drives[0].mount_point.as_deref(),
            Some(Path::new("/Volumes/USBSTICK"))
        );
        // Text listing is only consulted when the structured one is empty.
        assert!(!runner.was_called(LIST_TEXT_COMMAND));
    }

    #[test]
    fn test_text_fallback_and_mount_override() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.respond(LIST_PLIST_COMMAND, CommandOutput::failed("plist unsupported"));
        runner.respond(LIST_TEXT_COMMAND, CommandOutput::ok(LIST_TEXT));
        runner.respond(MOUNT_TABLE_COMMAND, CommandOutput::ok(MOUNT_TABLE));
        runner.respond(USAGE_TABLE_COMMAND, CommandOutput::ok(USAGE_TABLE));

        let snapshot = aggregator(&runner).refresh();

        // disk0, disk1, disk4 from the listing; disk3 and disk5 synthesized from mounts.
        let ids: Vec<&str> = snapshot.drives.iter().map(|d| d.identifier.as_str()).collect();
        assert_eq!(ids.len(), 5);
        assert_eq!(ids.iter().filter(|id| **id == "disk4").count(), 1);

        let usb = snapshot.find("disk4").unwrap();
        assert_eq!(usb.medium_class, MediumClass::External);
        let stick = usb.partition("disk4s1").unwrap();
        assert_eq!(stick.name, "USB STICK");
        assert_eq!(stick.mount_point.as_deref(), Some(Path::new("/Volumes/USB STICK")));
        assert!(usb.is_mounted());

        let backup = snapshot.find("disk5").unwrap();
        assert_eq!(backup.display_name, "Disk disk5");
        assert_eq!(backup.partitions[0].size_description, "29Gi");

        // External drives first, internal last.
        assert_eq!(snapshot.drives[0].medium_class, MediumClass::External);
        assert_eq!(
            snapshot.drives.last().map(|d| d.medium_class),
            Some(MediumClass::Internal)
        );
    }

    #[test]
    fn test_probe_classifies_unknown_drive() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.respond(
            MOUNT_TABLE_COMMAND,
            CommandOutput::ok("/dev/disk6s1 on /Volumes/CARD (msdos, local)\n"),
        );
        runner.respond(
            &device_info_command("disk6"),
            CommandOutput::ok(info_plist("disk6", None, "Secure Digital")),
        );

        let snapshot = aggregator(&runner).refresh();

        let card = snapshot.find("disk6").unwrap();
        assert_eq!(card.medium_class, MediumClass::External);
        assert_eq!(card.display_name, "SanDisk Ultra");
        assert_eq!(card.mount_point.as_deref(), Some(Path::new("/Volumes/CARD")));
    }

    #[test]
    fn test_all_strategies_failing_yields_empty_snapshot() {
        let runner = Arc::new(ScriptedRunner::new());
        let snapshot = aggregator(&runner).refresh();
        assert!(snapshot.is_empty());
    }

    #[test]
    fn test_classification_precedence() {
        let config = EngineConfig::default();
        let usb = BusSignals {
            bus: Some("USB"),
            ..Default::default()
        };
        let nvme = BusSignals {
            bus: Some("PCI-Express"),
            ..Default::default()
        };

        assert_eq!(classify("disk0", usb, &config), MediumClass::External);
        assert_eq!(classify("disk7", nvme, &config), MediumClass::Internal);
        assert_eq!(
            classify("disk1", BusSignals::default(), &config),
            MediumClass::Internal
        );
        assert_eq!(
            classify("disk7", BusSignals::default(), &config),
            MediumClass::Unknown
        );
        assert_eq!(
            classify(
                "disk7",
                BusSignals {
                    bus: Some("SSD"),
                    removable: Some(true),
                    ..Default::default()
                },
                &config
            ),
            MediumClass::External
        );
    }

    #[test]
    fn test_sort_order() {
        let drive = |id: &str, name: &str, class| Drive {
            identifier: id.to_string(),
            display_name: name.to_string(),
            medium_class: class,
            ..Default::default()
        };
        let mut drives = vec![
            drive("disk0", "Macintosh HD", MediumClass::Internal),
            drive("disk7", "mystery", MediumClass::Unknown),
            drive("disk5", "zeta", MediumClass::External),
            drive("disk4", "Alpha", MediumClass::External),
        ];

        sort_drives(&mut drives);

        let ids: Vec<&str> = drives.iter().map(|d| d.identifier.as_str()).collect();
        assert_eq!(ids, vec!["disk4", "disk5", "disk7", "disk0"]);
    }
}
