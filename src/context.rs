//! Execution context shared by every provisioning step.
//!
//! The context owns the immutable host facts and settings and borrows the
//! collaborators (command runner, HTTP client, confirmation prompt). All
//! filesystem mutation goes through the helpers here so that `--dry-run`
//! and the `--root` prefix apply uniformly.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use crate::fetch::HttpClient;
use crate::host::HostFacts;
use crate::preflight::Confirm;
use crate::runner::{CommandOutput, CommandRunner, SystemCommand};
use crate::settings::Settings;

pub struct Context<'a> {
    pub facts: HostFacts,
    pub settings: Settings,
    pub runner: &'a dyn CommandRunner,
    pub http: &'a dyn HttpClient,
    pub confirm: &'a dyn Confirm,
    /// Filesystem prefix, `/` on a real host
    pub root: PathBuf,
    pub dry_run: bool,
    /// Re-provision targets that look installed already
    pub force: bool,
}

impl Context<'_> {
    /// Map an absolute system path below `root`.
    pub fn path(&self, system_path: &str) -> PathBuf {
        self.root.join(system_path.trim_start_matches('/'))
    }

    /// `path` as a string for command arguments.
    pub fn path_arg(&self, system_path: &str) -> String {
        self.path(system_path).display().to_string()
    }

    pub fn run(&self, cmd: &SystemCommand) -> io::Result<CommandOutput> {
        self.runner.run(cmd)
    }

    pub fn write_file(&self, path: &Path, contents: &[u8]) -> io::Result<()> {
        if self.dry_run {
            tracing::info!("[dry-run] would write {} ({} bytes)", path.display(), contents.len());
            return Ok(());
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, contents)
    }

    pub fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        if self.dry_run {
            tracing::info!("[dry-run] would create {}", path.display());
            return Ok(());
        }
        fs::create_dir_all(path)
    }

    pub fn set_mode(&self, path: &Path, mode: u32) -> io::Result<()> {
        if self.dry_run {
            tracing::info!("[dry-run] would chmod {:o} {}", mode, path.display());
            return Ok(());
        }
        fs::set_permissions(path, fs::Permissions::from_mode(mode))
    }

    /// Copy `src` to `dest` with mode 0755, replacing any previous file.
    pub fn install_executable(&self, src: &Path, dest: &Path) -> io::Result<()> {
        if self.dry_run {
            tracing::info!("[dry-run] would install {} -> {}", src.display(), dest.display());
            return Ok(());
        }
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        // Write next to the destination and rename so a running binary is never truncated
        let staging = dest.with_extension("debprov-new");
        fs::copy(src, &staging)?;
        fs::set_permissions(&staging, fs::Permissions::from_mode(0o755))?;
        fs::rename(&staging, dest)
    }

    /// Copy a data file with mode 0644.
    pub fn install_file(&self, src: &Path, dest: &Path) -> io::Result<()> {
        if self.dry_run {
            tracing::info!("[dry-run] would install {} -> {}", src.display(), dest.display());
            return Ok(());
        }
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(src, dest)?;
        fs::set_permissions(dest, fs::Permissions::from_mode(0o644))
    }

    /// Append `line` to `path`, adding a newline before it when the file does
    /// not end with one.
    pub fn append_line(&self, path: &Path, line: &str) -> io::Result<()> {
        if self.dry_run {
            tracing::info!("[dry-run] would append '{}' to {}", line, path.display());
            return Ok(());
        }
        let existing = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e),
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        if !existing.is_empty() && !existing.ends_with('\n') {
            file.write_all(b"\n")?;
        }
        writeln!(file, "{}", line)
    }

    pub fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        if self.dry_run {
            tracing::info!("[dry-run] would move {} -> {}", from.display(), to.display());
            return Ok(());
        }
        fs::rename(from, to)
    }
}
