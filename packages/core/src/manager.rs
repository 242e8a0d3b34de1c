//! Presentation-layer façade.
//!
//! [`DriveManager`] owns one aggregator, selection store, orchestrator and
//! EFI discovery, all sharing a single injected [`CommandRunner`]. Every
//! method blocks; call it from a worker thread, not a UI thread.

use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use snafu::{OptionExt, ensure};
use tracing::info;

use crate::config::EngineConfig;
use crate::diagnostics::DiagnosticsReport;
use crate::drive::{Selection, Snapshot};
use crate::efi::{EfiDiscovery, EfiMountOutcome, EfiPartition, EfiUnmountOutcome};
use crate::error::{Result, SelectionRejectedSnafu, UnknownDeviceSnafu};
use crate::executor::{CommandRunner, ExecutionContext};
use crate::inventory::InventoryAggregator;
use crate::mount::{BatchResult, MountOrchestrator, MountOutcome, UnmountOutcome};
use crate::selection::SelectionStore;

pub struct DriveManager {
    runner: Arc<dyn CommandRunner>,
    aggregator: InventoryAggregator,
    selections: SelectionStore,
    orchestrator: MountOrchestrator,
    efi: EfiDiscovery,
    snapshot: RwLock<Arc<Snapshot>>,
}

impl DriveManager {
    /// Builds a manager over `runner`. The initial snapshot is empty until
    /// [`refresh_inventory`](Self::refresh_inventory) runs.
    pub fn new(runner: Arc<dyn CommandRunner>, config: EngineConfig) -> Self {
        let orchestrator = MountOrchestrator::new(runner.clone(), config.clone());
        Self {
            aggregator: InventoryAggregator::new(runner.clone(), config.clone()),
            selections: SelectionStore::new(),
            efi: EfiDiscovery::new(runner.clone(), orchestrator.clone(), config),
            orchestrator,
            runner,
            snapshot: RwLock::new(Arc::new(Snapshot::default())),
        }
    }

    /// Builds a manager that runs real commands through `context`.
    pub fn with_execution_context(context: ExecutionContext, config: EngineConfig) -> Self {
        Self::new(Arc::new(context), config)
    }

    /// Current snapshot, with selections stamped on.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.snapshot
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Reconciles selections onto `fresh`, or onto a copy of the current
    /// snapshot, and stores the result. The write lock is held throughout so
    /// a concurrent refresh cannot be overwritten by an older copy.
    fn publish(&self, fresh: Option<Snapshot>) -> Arc<Snapshot> {
        let mut current = self
            .snapshot
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut snapshot = fresh.unwrap_or_else(|| Snapshot::clone(&current));
        self.selections.reconcile(&mut snapshot);
        let snapshot = Arc::new(snapshot);
        *current = snapshot.clone();
        snapshot
    }

    /// Re-stamps selections onto the current snapshot.
    fn restamp(&self) -> Arc<Snapshot> {
        self.publish(None)
    }

    /// Runs every detection strategy and replaces the snapshot.
    pub fn refresh_inventory(&self) -> Arc<Snapshot> {
        let snapshot = self.aggregator.refresh();
        self.publish(Some(snapshot))
    }

    /// Flips the pending-mount selection of an unmounted drive.
    pub fn toggle_mount_selection(&self, identifier: &str) -> Result<Selection> {
        let snapshot = self.snapshot();
        let drive = snapshot
            .find(identifier)
            .context(UnknownDeviceSnafu { identifier })?;
        let deselecting = self.selections.selection_of(identifier) == Selection::PendingMount;
        ensure!(
            deselecting || !drive.is_mounted(),
            SelectionRejectedSnafu {
                identifier,
                reason: "it is already mounted",
            }
        );

        let selection = self.selections.toggle_mount(identifier);
        self.restamp();
        Ok(selection)
    }

    /// Flips the pending-unmount selection of a mounted drive.
    pub fn toggle_unmount_selection(&self, identifier: &str) -> Result<Selection> {
        let snapshot = self.snapshot();
        let drive = snapshot
            .find(identifier)
            .context(UnknownDeviceSnafu { identifier })?;
        let deselecting = self.selections.selection_of(identifier) == Selection::PendingUnmount;
        ensure!(
            deselecting || drive.is_mounted(),
            SelectionRejectedSnafu {
                identifier,
                reason: "it is not mounted",
            }
        );

        let selection = self.selections.toggle_unmount(identifier);
        self.restamp();
        Ok(selection)
    }

    pub fn select_all_for_mount(&self) -> Arc<Snapshot> {
        self.selections.select_all_for_mount(&self.snapshot());
        self.restamp()
    }

    pub fn select_all_for_unmount(&self) -> Arc<Snapshot> {
        self.selections.select_all_for_unmount(&self.snapshot());
        self.restamp()
    }

    pub fn clear_selections(&self) -> Arc<Snapshot> {
        self.selections.clear();
        self.restamp()
    }

    /// Mounts every pending-mount drive, then refreshes.
    pub fn mount_selected(&self) -> BatchResult {
        let targets = self.selections.pending_mount();
        let result = self.orchestrator.mount_selected(&targets);
        self.finish_batch(result)
    }

    /// Unmounts every pending-unmount drive, then refreshes.
    pub fn unmount_selected(&self) -> BatchResult {
        let targets = self.selections.pending_unmount();
        let result = self.orchestrator.unmount_selected(&targets);
        self.finish_batch(result)
    }

    pub fn mount_all_external(&self) -> BatchResult {
        let result = self
            .orchestrator
            .mount_all_external_unmounted(&self.snapshot());
        self.finish_batch(result)
    }

    pub fn unmount_all_external(&self) -> BatchResult {
        let result = self.orchestrator.unmount_all_mounted(&self.snapshot());
        self.finish_batch(result)
    }

    fn finish_batch(&self, result: BatchResult) -> BatchResult {
        self.selections.remove_succeeded(result.succeeded());
        info!(status = ?result.status, "{}", result.message);
        self.refresh_inventory();
        result
    }

    /// Mounts one device outside the selection flow.
    pub fn mount(&self, identifier: &str) -> MountOutcome {
        let outcome = self.orchestrator.mount(identifier);
        if outcome.success {
            self.selections.remove_succeeded([identifier]);
            self.refresh_inventory();
        }
        outcome
    }

    /// Unmounts one device outside the selection flow.
    pub fn unmount(&self, identifier: &str) -> UnmountOutcome {
        let outcome = self.orchestrator.unmount(identifier);
        if outcome.success {
            self.selections.remove_succeeded([identifier]);
            self.refresh_inventory();
        }
        outcome
    }

    pub fn mount_efi(&self) -> EfiMountOutcome {
        let outcome = self.efi.mount_efi_partition(&self.snapshot());
        if outcome.success {
            self.refresh_inventory();
        }
        outcome
    }

    pub fn efi_path(&self) -> Option<PathBuf> {
        self.efi.find_mounted_efi_path()
    }

    /// Unmounts the mounted EFI volume, then refreshes.
    pub fn unmount_efi(&self) -> EfiUnmountOutcome {
        let outcome = self.efi.unmount_efi_partition();
        if outcome.success {
            self.refresh_inventory();
        }
        outcome
    }

    /// EFI partitions in the current snapshot plus any found by probing the
    /// conventional slots.
    pub fn list_efi_partitions(&self) -> Vec<EfiPartition> {
        self.efi.list_efi_partitions(&self.snapshot())
    }

    /// Diagnostics over the current snapshot and a fresh `diskutil list`.
    pub fn diagnostics(&self) -> DiagnosticsReport {
        DiagnosticsReport::collect(&self.snapshot(), self.runner.as_ref())
    }
}
