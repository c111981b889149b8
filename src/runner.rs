//! Type-Safe Command Execution
//!
//! Every external program (apt-get, systemctl, tar, gpg, ...) is invoked
//! through a `CommandRunner`. Steps build a `SystemCommand` value and hand it
//! to the runner; they never touch `std::process::Command` directly.
//!
//! # Runners
//!
//! - `HostRunner` executes on the real system with process group isolation
//!   and PID registration, so a signal to debprov terminates its children.
//! - `RecordingRunner` executes nothing. It records every command and answers
//!   with scripted results; it backs the test suites.
//! - `PlanningRunner` backs `--dry-run`: commands are recorded, but program
//!   lookups go to the live system so missing dependencies show up in the plan.

use std::cell::RefCell;
use std::fmt;
use std::process::{Command, Stdio};

use tracing::{debug, info};

use crate::process_guard::{ChildRegistry, CommandProcessGroup};

/// A fully specified external command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemCommand {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}

impl SystemCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Program followed by its arguments, without environment.
    pub fn argv(&self) -> Vec<String> {
        std::iter::once(self.program.clone())
            .chain(self.args.iter().cloned())
            .collect()
    }
}

impl fmt::Display for SystemCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (key, value) in &self.env {
            write!(f, "{}={} ", key, value)?;
        }
        write!(f, "{}", self.argv().join(" "))
    }
}

/// Output from a command execution.
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    /// Standard output from the command.
    pub stdout: String,
    /// Standard error from the command.
    pub stderr: String,
    /// Exit code (None if terminated by signal).
    pub exit_code: Option<i32>,
    /// Whether the command exited successfully (exit code 0).
    pub success: bool,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            exit_code: Some(0),
            success: true,
        }
    }

    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: stderr.into(),
            exit_code: Some(code),
            success: false,
        }
    }

    /// Short failure description: exit code plus trimmed stderr.
    pub fn failure_reason(&self) -> String {
        let code = self
            .exit_code
            .map(|c| c.to_string())
            .unwrap_or_else(|| "signal".to_string());
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            format!("exit code {}", code)
        } else {
            format!("exit code {}: {}", code, stderr)
        }
    }
}

/// Seam between provisioning steps and the operating system.
pub trait CommandRunner {
    /// Run a command to completion.
    ///
    /// `Err` means the command could not be spawned at all; a non-zero exit is
    /// reported through `CommandOutput::success`.
    fn run(&self, cmd: &SystemCommand) -> std::io::Result<CommandOutput>;

    /// Whether `name` resolves to an executable on `PATH`.
    fn has_command(&self, name: &str) -> bool;
}

// ============================================================================
// Host Runner
// ============================================================================

/// Executes commands on the live system.
#[derive(Debug, Default)]
pub struct HostRunner;

impl CommandRunner for HostRunner {
    fn run(&self, cmd: &SystemCommand) -> std::io::Result<CommandOutput> {
        info!("Running: {}", cmd);

        let mut command = Command::new(&cmd.program);
        command
            .args(&cmd.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .in_own_process_group();
        for (key, value) in &cmd.env {
            command.env(key, value);
        }

        let child = command.spawn()?;
        let pid = child.id();
        ChildRegistry::with_global(|registry| registry.register(pid));

        let output = child.wait_with_output();
        ChildRegistry::with_global(|registry| registry.unregister(pid));
        let output = output?;

        let result = CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code(),
            success: output.status.success(),
        };
        if !result.success {
            debug!("{} failed: {}", cmd.program, result.failure_reason());
        }
        Ok(result)
    }

    fn has_command(&self, name: &str) -> bool {
        Command::new("which")
            .arg(name)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .in_own_process_group()
            .status()
            .map(|status| status.success())
            .unwrap_or(false)
    }
}

// ============================================================================
// Recording Runner
// ============================================================================

/// Scripted reply for commands whose argv starts with `prefix`.
#[derive(Debug, Clone)]
struct Reply {
    prefix: Vec<String>,
    output: CommandOutput,
}

/// Records commands instead of executing them.
///
/// Without configuration every command succeeds with empty output and every
/// program is considered present. Tests add replies, failures and missing
/// programs.
#[derive(Debug, Default)]
pub struct RecordingRunner {
    calls: RefCell<Vec<SystemCommand>>,
    replies: Vec<Reply>,
    missing: Vec<String>,
}

impl RecordingRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer commands starting with `prefix` with `output`. Later replies win.
    pub fn reply(mut self, prefix: &[&str], output: CommandOutput) -> Self {
        self.replies.push(Reply {
            prefix: prefix.iter().map(|s| s.to_string()).collect(),
            output,
        });
        self
    }

    /// Shorthand for a successful reply with `stdout`.
    pub fn respond(self, prefix: &[&str], stdout: &str) -> Self {
        self.reply(prefix, CommandOutput::ok(stdout))
    }

    /// Shorthand for a failing reply.
    pub fn fail(self, prefix: &[&str], stderr: &str) -> Self {
        self.reply(prefix, CommandOutput::failed(1, stderr))
    }

    /// Report `program` as absent from `PATH`.
    pub fn missing(mut self, program: &str) -> Self {
        self.missing.push(program.to_string());
        self
    }

    /// Commands recorded so far, in execution order.
    pub fn calls(&self) -> Vec<SystemCommand> {
        self.calls.borrow().clone()
    }

    /// Recorded commands rendered as `program arg ...` lines.
    pub fn command_lines(&self) -> Vec<String> {
        self.calls
            .borrow()
            .iter()
            .map(|cmd| cmd.argv().join(" "))
            .collect()
    }

    fn scripted(&self, argv: &[String]) -> Option<CommandOutput> {
        self.replies
            .iter()
            .rev()
            .find(|reply| argv.starts_with(&reply.prefix))
            .map(|reply| reply.output.clone())
    }
}

impl CommandRunner for RecordingRunner {
    fn run(&self, cmd: &SystemCommand) -> std::io::Result<CommandOutput> {
        info!("[recorded] {}", cmd);
        self.calls.borrow_mut().push(cmd.clone());
        Ok(self
            .scripted(&cmd.argv())
            .unwrap_or_else(|| CommandOutput::ok("")))
    }

    fn has_command(&self, name: &str) -> bool {
        !self.missing.iter().any(|m| m == name)
    }
}

// ============================================================================
// Planning Runner
// ============================================================================

/// Records commands like `RecordingRunner` but answers `has_command` from `host`.
pub struct PlanningRunner<'a> {
    recorder: RecordingRunner,
    host: &'a dyn CommandRunner,
}

impl<'a> PlanningRunner<'a> {
    pub fn new(host: &'a dyn CommandRunner) -> Self {
        Self {
            recorder: RecordingRunner::new(),
            host,
        }
    }

    /// Planned commands as `program arg ...` lines.
    pub fn command_lines(&self) -> Vec<String> {
        self.recorder.command_lines()
    }
}

impl CommandRunner for PlanningRunner<'_> {
    fn run(&self, cmd: &SystemCommand) -> std::io::Result<CommandOutput> {
        self.recorder.run(cmd)
    }

    fn has_command(&self, name: &str) -> bool {
        self.host.has_command(name)
    }
}
