//! Unified error types for the drivemount-core library.
//!
//! Uses SNAFU for context-rich error handling. Most of these errors never
//! leave the library as `Err`: component boundaries fold them into outcome
//! records and keep the `Display` text as the user-facing explanation.

use std::time::Duration;

use snafu::{ResultExt, Snafu};

/// Result type alias using the library's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for all core library operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// The process could not be started at all (missing binary, sandbox denial).
    #[snafu(display("failed to execute command '{command}': {source}"))]
    CommandSpawn {
        command: String,
        source: std::io::Error,
    },

    /// Command executed but returned a non-zero exit status.
    #[snafu(display("command '{command}' failed: {stderr}"))]
    CommandExit { command: String, stderr: String },

    /// Command did not finish before the configured deadline and was killed.
    #[snafu(display("command '{command}' timed out after {}s", timeout.as_secs_f32()))]
    CommandTimeout { command: String, timeout: Duration },

    /// Tool output did not match the expected format.
    #[snafu(display("failed to parse {format} output: {message}"))]
    ListingParse {
        format: &'static str,
        message: String,
    },

    /// Mount reported success but no mount point could be confirmed afterwards.
    #[snafu(display("{identifier} reported mounted but no mount point could be confirmed"))]
    MountVerification { identifier: String },

    /// Every mount attempt failed.
    #[snafu(display("failed to mount {identifier}: {message}"))]
    Mount { identifier: String, message: String },

    /// Unmount command failed.
    #[snafu(display("failed to unmount {identifier}: {message}"))]
    Unmount { identifier: String, message: String },

    /// User cancelled authentication dialog.
    #[snafu(display("authentication cancelled by user"))]
    AuthenticationCancelled,

    /// Identifier is not part of the current snapshot.
    #[snafu(display("no drive with identifier '{identifier}' in the current inventory"))]
    UnknownDevice { identifier: String },

    /// A selection toggle whose mount-state precondition does not hold.
    #[snafu(display("cannot select {identifier}: {reason}"))]
    SelectionRejected {
        identifier: String,
        reason: &'static str,
    },

    #[snafu(whatever, display("{message}"))]
    Generic {
        message: String,
        #[snafu(source(from(Box<dyn std::error::Error + Send + Sync>, Some)))]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

/// Extension trait for adding context to io::Error results.
pub trait IoResultExt<T> {
    /// Add context for process spawn errors.
    fn command_context(self, command: impl Into<String>) -> Result<T>;
}

impl<T> IoResultExt<T> for std::result::Result<T, std::io::Error> {
    fn command_context(self, command: impl Into<String>) -> Result<T> {
        self.context(CommandSpawnSnafu {
            command: command.into(),
        })
    }
}
