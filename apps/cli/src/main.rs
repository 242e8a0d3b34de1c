//! drivemount CLI - Command line front end for the drive engine.
//!
//! Lists drives and mounts/unmounts them through the same selection and
//! batch flow a graphical front end would use.

mod render;

use std::collections::HashSet;
use std::error::Error;
use std::process::ExitCode;
use std::time::Duration;

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use drivemount_core::{
    BatchItem, BatchResult, DriveManager, EngineConfig, ExecutionContext, PrivilegeEscalation,
    Snapshot,
};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use crate::render::Output;

/// Drive inventory and mount tool.
#[derive(Parser)]
#[command(name = "drivemount-cli")]
#[command(about = "Inventory, mount and unmount drives", long_about = None)]
struct Cli {
    /// Print machine-readable JSON instead of tables.
    #[arg(long, global = true)]
    json: bool,

    /// Increase log verbosity (-v info, -vv debug). `RUST_LOG` wins if set.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Timeout for unprivileged commands in seconds; 0 disables it.
    #[arg(long, global = true, value_name = "SECS")]
    timeout: Option<u64>,

    /// Timeout for privileged commands in seconds, credential prompt
    /// included; 0 disables it.
    #[arg(long, global = true, value_name = "SECS")]
    elevated_timeout: Option<u64>,

    /// How privileged commands are elevated.
    #[arg(long, global = true, value_enum)]
    escalation: Option<Escalation>,

    /// First settle delay before confirming a mount point, in milliseconds.
    #[arg(long, global = true, value_name = "MS")]
    settle_ms: Option<u64>,

    /// Retry failed unmounts with force.
    #[arg(long, global = true)]
    force_unmount: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List drives and partitions.
    List,
    /// Mount the given drives (`disk4`) or partitions (`disk4s1`).
    Mount {
        #[arg(required = true, value_name = "ID")]
        identifiers: Vec<String>,
    },
    /// Unmount the given drives or partitions.
    Unmount {
        #[arg(required = true, value_name = "ID")]
        identifiers: Vec<String>,
    },
    /// Mount every unmounted external drive.
    MountExternal,
    /// Unmount every mounted external drive.
    UnmountExternal,
    /// EFI System Partition helpers.
    Efi {
        #[command(subcommand)]
        action: EfiCommand,
    },
    /// Print drive counts, per-drive status and EFI rows of `diskutil list`.
    Diagnose,
}

#[derive(Subcommand)]
enum EfiCommand {
    /// Find and mount the EFI partition.
    Mount,
    /// Unmount the mounted EFI partition.
    Unmount,
    /// Print the mount point of a mounted EFI partition.
    Path,
    /// List EFI partitions and whether they are mounted.
    List,
}

#[derive(Clone, Copy, ValueEnum)]
enum Escalation {
    None,
    Osascript,
    Pkexec,
    Sudo,
}

impl From<Escalation> for PrivilegeEscalation {
    fn from(value: Escalation) -> Self {
        match value {
            Escalation::None => PrivilegeEscalation::None,
            Escalation::Osascript => PrivilegeEscalation::Osascript,
            Escalation::Pkexec => PrivilegeEscalation::Pkexec,
            Escalation::Sudo => PrivilegeEscalation::Sudo,
        }
    }
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    // stdout carries the command output; logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .ok();
}

fn build_manager(cli: &Cli) -> DriveManager {
    let mut context = match cli.escalation {
        Some(escalation) => ExecutionContext::with_escalation(escalation.into()),
        None => ExecutionContext::new(),
    };
    if let Some(secs) = cli.timeout {
        context = context.with_timeout(seconds(secs));
    }
    if let Some(secs) = cli.elevated_timeout {
        context = context.with_elevated_timeout(seconds(secs));
    }

    let mut config = EngineConfig::default().with_force_unmount_fallback(cli.force_unmount);
    if let Some(ms) = cli.settle_ms {
        config = config.with_settle_delay(Duration::from_millis(ms));
    }

    debug!(
        escalation = ?context.escalation(),
        timeout = ?context.timeout(),
        elevated_timeout = ?context.elevated_timeout(),
        "engine configured"
    );
    DriveManager::with_execution_context(context, config)
}

fn seconds(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(&cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

/// Executes the subcommand. `Ok(false)` means the operation reported failure.
fn run(cli: &Cli) -> Result<bool, Box<dyn Error>> {
    let manager = build_manager(cli);
    let out = Output::new(cli.json);

    match &cli.command {
        Commands::List => {
            let snapshot = manager.refresh_inventory();
            out.snapshot(&snapshot)?;
            Ok(true)
        }
        Commands::Mount { identifiers } => {
            let snapshot = manager.refresh_inventory();
            let plan = plan(&snapshot, identifiers, true);
            for id in &plan.select {
                manager.toggle_mount_selection(id)?;
            }
            let mut items = plan.settled;
            items.extend(manager.mount_selected().items);
            items.extend(plan.direct.into_iter().map(|id| {
                let outcome = manager.mount(id);
                BatchItem {
                    identifier: outcome.identifier,
                    success: outcome.success,
                    message: outcome.message,
                }
            }));
            finish(&out, BatchResult::from_items("mount", items))
        }
        Commands::Unmount { identifiers } => {
            let snapshot = manager.refresh_inventory();
            let plan = plan(&snapshot, identifiers, false);
            for id in &plan.select {
                manager.toggle_unmount_selection(id)?;
            }
            let mut items = plan.settled;
            items.extend(manager.unmount_selected().items);
            items.extend(plan.direct.into_iter().map(|id| {
                let outcome = manager.unmount(id);
                BatchItem {
                    identifier: outcome.identifier,
                    success: outcome.success,
                    message: outcome.message,
                }
            }));
            finish(&out, BatchResult::from_items("unmount", items))
        }
        Commands::MountExternal => {
            manager.refresh_inventory();
            finish(&out, manager.mount_all_external())
        }
        Commands::UnmountExternal => {
            manager.refresh_inventory();
            finish(&out, manager.unmount_all_external())
        }
        Commands::Efi { action } => match action {
            EfiCommand::Mount => {
                manager.refresh_inventory();
                let outcome = manager.mount_efi();
                out.efi(&outcome)?;
                Ok(outcome.success)
            }
            EfiCommand::Unmount => {
                let outcome = manager.unmount_efi();
                out.efi_unmount(&outcome)?;
                Ok(outcome.success)
            }
            EfiCommand::Path => {
                let path = manager.efi_path();
                out.efi_path(path.as_deref())?;
                Ok(path.is_some())
            }
            EfiCommand::List => {
                manager.refresh_inventory();
                out.efi_list(&manager.list_efi_partitions())?;
                Ok(true)
            }
        },
        Commands::Diagnose => {
            manager.refresh_inventory();
            out.diagnostics(&manager.diagnostics())?;
            Ok(true)
        }
    }
}

/// How `mount`/`unmount` handles each requested identifier.
#[derive(Debug, Default, PartialEq)]
struct Plan<'a> {
    /// Drives that go through the selection batch.
    select: Vec<&'a str>,
    /// Partitions and identifiers the inventory does not list.
    direct: Vec<&'a str>,
    /// Drives already in the requested state, reported as successes.
    settled: Vec<BatchItem>,
}

/// Dedupes `identifiers` and sorts them into a [`Plan`] for reaching
/// `want_mounted`.
fn plan<'a>(snapshot: &Snapshot, identifiers: &'a [String], want_mounted: bool) -> Plan<'a> {
    let mut seen = HashSet::new();
    let mut plan = Plan::default();

    for id in identifiers.iter().map(String::as_str) {
        if !seen.insert(id) {
            continue;
        }
        match snapshot.find(id) {
            Some(drive) if drive.is_mounted() == want_mounted => {
                let message = match &drive.mount_point {
                    Some(path) => format!("{id} already mounted at {}", path.display()),
                    None => format!("{id} is not mounted"),
                };
                plan.settled.push(BatchItem {
                    identifier: id.to_string(),
                    success: true,
                    message,
                });
            }
            Some(_) => plan.select.push(id),
            None => plan.direct.push(id),
        }
    }
    plan
}

fn finish(out: &Output, result: BatchResult) -> Result<bool, Box<dyn Error>> {
    out.batch(&result)?;
    Ok(result.is_success())
}
