//! drivemount-core: drive inventory and mount orchestration.
//!
//! This library inventories disks and partitions through the host's disk
//! utilities, classifies them as internal or external, tracks pending
//! mount/unmount selections across refreshes, and mounts/unmounts devices
//! with privilege escalation, alternate-filesystem fallback and EFI
//! partition discovery, with a diagnostics report for troubleshooting.
//!
//! # Modules
//!
//! - [`executor`]: Command execution with privilege escalation
//! - [`parse`]: Parsers for `diskutil list`, `diskutil info`, `mount`, `df`
//! - [`inventory`]: Strategy aggregation into a [`Snapshot`]
//! - [`selection`]: Pending selections reconciled against snapshots
//! - [`mount`]: Mount/unmount, single and batch
//! - [`efi`]: EFI System Partition discovery
//! - [`diagnostics`]: Plain-text mount diagnostics
//! - [`manager`]: [`DriveManager`], the façade for presentation layers
//! - [`config`]: Engine tunables
//! - [`drive`]: Data model
//! - [`error`]: Error types
//!
//! # Example
//!
//! ```no_run
//! use drivemount_core::{DriveManager, EngineConfig, ExecutionContext};
//!
//! let manager = DriveManager::with_execution_context(
//!     ExecutionContext::with_sudo(),
//!     EngineConfig::default(),
//! );
//!
//! let snapshot = manager.refresh_inventory();
//! for drive in &snapshot.drives {
//!     println!("{} {} {:?}", drive.identifier, drive.display_name, drive.medium_class);
//! }
//!
//! manager.select_all_for_mount();
//! let result = manager.mount_selected();
//! println!("{}", result.message);
//! ```

pub mod config;
pub mod diagnostics;
pub mod drive;
pub mod efi;
pub mod error;
pub mod executor;
pub mod inventory;
pub mod manager;
pub mod mount;
pub mod parse;
pub mod selection;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used types
pub use config::EngineConfig;
pub use drive::{Drive, MediumClass, Partition, Selection, Snapshot};
pub use diagnostics::{DiagnosticsReport, DriveStatus};
pub use efi::{EfiMountOutcome, EfiPartition, EfiUnmountOutcome};
pub use error::{Error, Result};
pub use executor::{CommandOutput, CommandRunner, ExecutionContext, PrivilegeEscalation};
pub use manager::DriveManager;
pub use mount::{BatchItem, BatchResult, BatchStatus, MountOutcome, UnmountOutcome};
