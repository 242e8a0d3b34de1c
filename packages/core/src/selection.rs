//! Pending mount/unmount selections carried across snapshots.
//!
//! The two sets are mutually exclusive and guarded by one mutex; every
//! mutation re-establishes that invariant.

use std::collections::BTreeSet;
use std::sync::{Mutex, MutexGuard};

use tracing::{debug, warn};

use crate::drive::{Selection, Snapshot};

#[derive(Debug, Default)]
struct Pending {
    mount: BTreeSet<String>,
    unmount: BTreeSet<String>,
}

/// Keyed store of user intents, reconciled against each new snapshot.
#[derive(Debug, Default)]
pub struct SelectionStore {
    pending: Mutex<Pending>,
}

impl SelectionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Pending> {
        // A poisoned lock still holds consistent sets; every mutation is a
        // single insert/remove pair.
        self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Flips the pending-mount state of `identifier`. Returns the new state.
    pub fn toggle_mount(&self, identifier: &str) -> Selection {
        let mut pending = self.lock();
        pending.unmount.remove(identifier);
        if pending.mount.remove(identifier) {
            Selection::None
        } else {
            pending.mount.insert(identifier.to_string());
            Selection::PendingMount
        }
    }

    /// Flips the pending-unmount state of `identifier`. Returns the new state.
    pub fn toggle_unmount(&self, identifier: &str) -> Selection {
        let mut pending = self.lock();
        pending.mount.remove(identifier);
        if pending.unmount.remove(identifier) {
            Selection::None
        } else {
            pending.unmount.insert(identifier.to_string());
            Selection::PendingUnmount
        }
    }

    /// Replaces the pending-mount set with every unmounted drive.
    pub fn select_all_for_mount(&self, snapshot: &Snapshot) {
        let mut pending = self.lock();
        pending.mount = snapshot
            .drives
            .iter()
            .filter(|d| !d.is_mounted())
            .map(|d| d.identifier.clone())
            .collect();
        pending.unmount.clear();
    }

    /// Replaces the pending-unmount set with every mounted drive.
    pub fn select_all_for_unmount(&self, snapshot: &Snapshot) {
        let mut pending = self.lock();
        pending.unmount = snapshot
            .drives
            .iter()
            .filter(|d| d.is_mounted())
            .map(|d| d.identifier.clone())
            .collect();
        pending.mount.clear();
    }

    pub fn clear(&self) {
        let mut pending = self.lock();
        pending.mount.clear();
        pending.unmount.clear();
    }

    pub fn selection_of(&self, identifier: &str) -> Selection {
        let pending = self.lock();
        if pending.mount.contains(identifier) {
            Selection::PendingMount
        } else if pending.unmount.contains(identifier) {
            Selection::PendingUnmount
        } else {
            Selection::None
        }
    }

    /// Pending-mount identifiers in stable (sorted) order.
    pub fn pending_mount(&self) -> Vec<String> {
        self.lock().mount.iter().cloned().collect()
    }

    /// Pending-unmount identifiers in stable (sorted) order.
    pub fn pending_unmount(&self) -> Vec<String> {
        self.lock().unmount.iter().cloned().collect()
    }

    /// Drops identifiers whose operation succeeded.
    pub fn remove_succeeded<'a>(&self, identifiers: impl IntoIterator<Item = &'a str>) {
        let mut pending = self.lock();
        for identifier in identifiers {
            pending.mount.remove(identifier);
            pending.unmount.remove(identifier);
        }
    }

    /// Stamps selections onto `snapshot`, clearing entries whose drive is
    /// gone or whose mount-state precondition no longer holds.
    pub fn reconcile(&self, snapshot: &mut Snapshot) {
        let mut pending = self.lock();

        let stale_mount: Vec<String> = pending
            .mount
            .iter()
            .filter(|id| snapshot.find(id).is_none_or(|d| d.is_mounted()))
            .cloned()
            .collect();
        let stale_unmount: Vec<String> = pending
            .unmount
            .iter()
            .filter(|id| snapshot.find(id).is_none_or(|d| !d.is_mounted()))
            .cloned()
            .collect();

        for id in &stale_mount {
            pending.mount.remove(id);
        }
        for id in &stale_unmount {
            pending.unmount.remove(id);
        }
        if !stale_mount.is_empty() || !stale_unmount.is_empty() {
            warn!(
                cleared_mount = stale_mount.len(),
                cleared_unmount = stale_unmount.len(),
                "cleared stale selections"
            );
        }

        for drive in &mut snapshot.drives {
            drive.selection = if pending.mount.contains(&drive.identifier) {
                Selection::PendingMount
            } else if pending.unmount.contains(&drive.identifier) {
                Selection::PendingUnmount
            } else {
                Selection::None
            };
        }
        debug!(
            pending_mount = pending.mount.len(),
            pending_unmount = pending.unmount.len(),
            "selections reconciled"
        );
    }
}
