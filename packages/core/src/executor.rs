//! Command execution abstraction with privilege escalation support.
//!
//! Every disk utility call in this crate goes through the [`CommandRunner`]
//! trait so the engine can be driven by a real shell ([`ExecutionContext`])
//! or by a scripted double in tests. Elevated commands are wrapped with
//! `osascript` (GUI credential prompt on macOS), `pkexec` (polkit) or `sudo`.

use std::io::Read;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::{CommandTimeoutSnafu, Error, IoResultExt, Result};

/// Shell used to interpret command lines.
pub const DEFAULT_SHELL: &str = "/bin/sh";

/// Deadline applied to unelevated commands unless overridden.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(120);

/// Deadline for elevated commands. It includes the time a user spends at the
/// credential prompt.
pub const DEFAULT_ELEVATED_TIMEOUT: Duration = Duration::from_secs(600);

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Captured result of one command line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    /// True iff the process exited with status zero.
    pub success: bool,
}

impl CommandOutput {
    /// Successful output carrying `stdout`.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            success: true,
        }
    }

    /// Failed output carrying `stderr`.
    pub fn failed(stderr: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: stderr.into(),
            success: false,
        }
    }

    /// True when the failure was the user dismissing the credential prompt.
    pub fn is_auth_cancelled(&self) -> bool {
        !self.success && self.stderr == Error::AuthenticationCancelled.to_string()
    }

    /// The most useful diagnostic text: trimmed stderr, else trimmed stdout.
    pub fn diagnostic(&self) -> Option<&str> {
        [self.stderr.trim(), self.stdout.trim()]
            .into_iter()
            .find(|text| !text.is_empty())
    }
}

/// Runs complete shell command lines, optionally with elevated privileges.
///
/// Implementations never fail: a command that could not run is reported as
/// `success == false` with an explanation in `stderr`.
pub trait CommandRunner: Send + Sync {
    fn run(&self, command: &str, elevated: bool) -> CommandOutput;
}

/// Runs `command` and turns a non-zero exit into [`Error::CommandExit`].
pub fn run_checked(
    runner: &dyn CommandRunner,
    command: &str,
    elevated: bool,
) -> Result<CommandOutput> {
    let output = runner.run(command, elevated);
    if output.success {
        return Ok(output);
    }
    Err(Error::CommandExit {
        command: command.to_string(),
        stderr: output.diagnostic().unwrap_or("no output").to_string(),
    })
}

/// Privilege escalation method for executing commands that require root.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PrivilegeEscalation {
    /// Execute directly without privilege escalation.
    #[default]
    None,
    /// Use AppleScript's `do shell script ... with administrator privileges`.
    Osascript,
    /// Use `pkexec` for GUI-based privilege escalation (polkit).
    Pkexec,
    /// Use `sudo` for TTY-based privilege escalation.
    Sudo,
}

impl PrivilegeEscalation {
    /// The interactive escalation method native to the build target.
    pub fn platform_default() -> Self {
        if cfg!(target_os = "macos") {
            Self::Osascript
        } else {
            Self::Pkexec
        }
    }

    fn is_cancellation(self, status: ExitStatus, stderr: &str) -> bool {
        match self {
            Self::Pkexec => status.code() == Some(126),
            Self::Osascript => stderr.contains("(-128)") || stderr.contains("User canceled"),
            Self::None | Self::Sudo => false,
        }
    }
}

/// Execution context for running system commands.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use drivemount_core::executor::{ExecutionContext, PrivilegeEscalation};
///
/// let ctx = ExecutionContext::with_sudo().with_timeout(Some(Duration::from_secs(30)));
/// assert_eq!(ctx.escalation(), PrivilegeEscalation::Sudo);
/// ```
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    escalation: PrivilegeEscalation,
    shell: String,
    timeout: Option<Duration>,
    elevated_timeout: Option<Duration>,
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self {
            escalation: PrivilegeEscalation::platform_default(),
            shell: DEFAULT_SHELL.to_string(),
            timeout: Some(DEFAULT_COMMAND_TIMEOUT),
            elevated_timeout: Some(DEFAULT_ELEVATED_TIMEOUT),
        }
    }
}

impl ExecutionContext {
    /// Creates a context using the platform's interactive escalation method.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a context that elevates through an AppleScript credential prompt.
    pub fn with_osascript() -> Self {
        Self::with_escalation(PrivilegeEscalation::Osascript)
    }

    /// Creates a context that uses `pkexec` for privileged commands.
    pub fn with_pkexec() -> Self {
        Self::with_escalation(PrivilegeEscalation::Pkexec)
    }

    /// Creates a context that uses `sudo` for privileged commands.
    ///
    /// This is suitable for terminal applications.
    pub fn with_sudo() -> Self {
        Self::with_escalation(PrivilegeEscalation::Sudo)
    }

    /// Creates a context with a specific escalation method.
    pub fn with_escalation(escalation: PrivilegeEscalation) -> Self {
        Self {
            escalation,
            ..Self::default()
        }
    }

    /// Overrides the shell used to interpret command lines.
    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }

    /// Sets the deadline for commands that run without escalation. `None`
    /// waits indefinitely.
    ///
    /// Escalated commands use [`with_elevated_timeout`](Self::with_elevated_timeout)
    /// instead, since their clock starts before the credential prompt.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the deadline for escalated commands, prompt time included.
    pub fn with_elevated_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.elevated_timeout = timeout;
        self
    }

    /// Returns the current privilege escalation method.
    pub fn escalation(&self) -> PrivilegeEscalation {
        self.escalation
    }

    /// Returns the deadline for unescalated commands.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Returns the deadline for escalated commands.
    pub fn elevated_timeout(&self) -> Option<Duration> {
        self.elevated_timeout
    }

    fn deadline_for(&self, escalation: PrivilegeEscalation) -> Option<Duration> {
        match escalation {
            PrivilegeEscalation::None => self.timeout,
            _ => self.elevated_timeout,
        }
    }

    /// Executes a command line, surfacing spawn failures and timeouts as errors.
    ///
    /// A non-zero exit is not an error here; it is reported via
    /// [`CommandOutput::success`].
    pub fn execute(&self, command: &str, elevated: bool) -> Result<CommandOutput> {
        let escalation = self.effective_escalation(elevated);
        debug!(command, ?escalation, "executing command");

        let child = self
            .build(command, escalation)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .command_context(command)?;

        let (status, stdout, stderr) = match self.deadline_for(escalation) {
            Some(timeout) => wait_with_deadline(child, command, timeout)?,
            None => {
                let output = child.wait_with_output().command_context(command)?;
                (output.status, output.stdout, output.stderr)
            }
        };

        let output = CommandOutput {
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            success: status.success(),
        };

        if !output.success && escalation.is_cancellation(status, &output.stderr) {
            return Err(Error::AuthenticationCancelled);
        }

        Ok(output)
    }

    fn effective_escalation(&self, elevated: bool) -> PrivilegeEscalation {
        if elevated && !running_as_root() {
            self.escalation
        } else {
            PrivilegeEscalation::None
        }
    }

    fn build(&self, command: &str, escalation: PrivilegeEscalation) -> Command {
        match escalation {
            PrivilegeEscalation::None => {
                let mut cmd = Command::new(&self.shell);
                cmd.args(["-c", command]);
                cmd
            }
            PrivilegeEscalation::Osascript => {
                let mut cmd = Command::new("osascript");
                cmd.arg("-e").arg(administrator_script(command));
                cmd
            }
            PrivilegeEscalation::Pkexec | PrivilegeEscalation::Sudo => {
                let wrapper = if escalation == PrivilegeEscalation::Pkexec {
                    "pkexec"
                } else {
                    "sudo"
                };
                let mut cmd = Command::new(wrapper);
                cmd.arg(&self.shell).args(["-c", command]);
                cmd
            }
        }
    }
}

impl CommandRunner for ExecutionContext {
    fn run(&self, command: &str, elevated: bool) -> CommandOutput {
        match self.execute(command, elevated) {
            Ok(output) => {
                if !output.success {
                    debug!(command, stderr = output.stderr.trim(), "command exited non-zero");
                }
                output
            }
            Err(err) => {
                warn!(command, error = %err, "command could not complete");
                CommandOutput::failed(err.to_string())
            }
        }
    }
}

fn running_as_root() -> bool {
    nix::unistd::geteuid().is_root()
}

/// Quotes `arg` for a POSIX shell command line.
pub fn shell_quote(arg: &str) -> String {
    let plain = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "/._-+:=@,".contains(c));
    if plain {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

/// Wraps a command line in an AppleScript that asks for administrator rights.
pub fn administrator_script(command: &str) -> String {
    let escaped = command.replace('\\', "\\\\").replace('"', "\\\"");
    format!("do shell script \"{}\" with administrator privileges", escaped)
}

/// Waits for `child`, killing it once `timeout` has elapsed.
///
/// Pipes are drained on their own threads so a chatty child cannot block
/// on a full pipe while we poll.
fn wait_with_deadline(
    mut child: Child,
    command: &str,
    timeout: Duration,
) -> Result<(ExitStatus, Vec<u8>, Vec<u8>)> {
    let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
        let _ = child.kill();
        return Err(std::io::Error::other("child output pipes were not captured"))
            .command_context(command);
    };
    let stdout_reader = thread::spawn(move || drain(stdout));
    let stderr_reader = thread::spawn(move || drain(stderr));

    let deadline = Instant::now() + timeout;
    let status = loop {
        if let Some(status) = child.try_wait().command_context(command)? {
            break status;
        }
        if Instant::now() >= deadline {
            // Readers are left detached: a grandchild may still hold the pipes.
            let _ = child.kill();
            let _ = child.wait();
            return CommandTimeoutSnafu {
                command: command.to_string(),
                timeout,
            }
            .fail();
        }
        thread::sleep(POLL_INTERVAL);
    };

    let stdout = stdout_reader.join().unwrap_or_default();
    let stderr = stderr_reader.join().unwrap_or_default();
    Ok((status, stdout, stderr))
}

fn drain(mut pipe: impl Read) -> Vec<u8> {
    let mut buf = Vec::new();
    let _ = pipe.read_to_end(&mut buf);
    buf
}
