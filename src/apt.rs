//! APT package manager operations.
//!
//! Every invocation runs non-interactively (`DEBIAN_FRONTEND=noninteractive`,
//! `-y`) and any failure is fatal: there is no retry and no cleanup. APT's own
//! lock protects the package database against concurrent runs.

use crate::context::Context;
use crate::error::{ProvisionError, Result};
use crate::runner::SystemCommand;

/// A command that must be on `PATH`, and the package providing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dependency {
    pub command: &'static str,
    pub package: &'static str,
}

impl Dependency {
    pub const fn new(command: &'static str, package: &'static str) -> Self {
        Self { command, package }
    }
}

pub const TAR: Dependency = Dependency::new("tar", "tar");
pub const UNZIP: Dependency = Dependency::new("unzip", "unzip");
pub const GPG: Dependency = Dependency::new("gpg", "gnupg");
pub const SYSTEMCTL: Dependency = Dependency::new("systemctl", "systemd");

fn apt_get(args: &[&str]) -> SystemCommand {
    SystemCommand::new("apt-get")
        .args(args.iter().copied())
        .env("DEBIAN_FRONTEND", "noninteractive")
}

fn run_apt(ctx: &Context<'_>, cmd: SystemCommand) -> Result<()> {
    let output = ctx
        .run(&cmd)
        .map_err(|e| ProvisionError::dependency(format!("cannot run apt-get: {}", e)))?;
    if output.success {
        Ok(())
    } else {
        Err(ProvisionError::dependency(format!(
            "`{}` failed ({})",
            cmd.argv().join(" "),
            output.failure_reason()
        )))
    }
}

/// Install the packages of every dependency whose command is absent.
///
/// Runs `apt-get update` once, then a single `apt-get install` with the
/// missing packages in declaration order. Does nothing when all are present.
pub fn ensure_dependencies(ctx: &Context<'_>, deps: &[Dependency]) -> Result<Vec<&'static str>> {
    let mut missing: Vec<&'static str> = Vec::new();
    for dep in deps {
        if ctx.runner.has_command(dep.command) {
            tracing::debug!("Dependency present: {}", dep.command);
        } else if !missing.contains(&dep.package) {
            tracing::info!("Dependency missing: {} (package {})", dep.command, dep.package);
            missing.push(dep.package);
        }
    }

    if missing.is_empty() {
        return Ok(missing);
    }

    update(ctx)?;
    install(ctx, &missing)?;
    Ok(missing)
}

pub fn update(ctx: &Context<'_>) -> Result<()> {
    run_apt(ctx, apt_get(&["update"]))
}

pub fn install(ctx: &Context<'_>, packages: &[&str]) -> Result<()> {
    if packages.is_empty() {
        return Ok(());
    }
    let mut args = vec!["install", "-y"];
    args.extend_from_slice(packages);
    run_apt(ctx, apt_get(&args))
}

/// `apt-get upgrade` without installing new packages (first upgrade phase).
pub fn upgrade_minimal(ctx: &Context<'_>) -> Result<()> {
    run_apt(
        ctx,
        apt_get(&[
            "upgrade",
            "-y",
            "--without-new-pkgs",
            "-o",
            "Dpkg::Options::=--force-confdef",
            "-o",
            "Dpkg::Options::=--force-confold",
        ]),
    )
}

pub fn full_upgrade(ctx: &Context<'_>) -> Result<()> {
    run_apt(
        ctx,
        apt_get(&[
            "full-upgrade",
            "-y",
            "-o",
            "Dpkg::Options::=--force-confdef",
            "-o",
            "Dpkg::Options::=--force-confold",
        ]),
    )
}

pub fn autoremove(ctx: &Context<'_>) -> Result<()> {
    run_apt(ctx, apt_get(&["autoremove", "-y"]))
}

/// Whether dpkg reports `package` as installed.
pub fn is_installed(ctx: &Context<'_>, package: &str) -> bool {
    let cmd = SystemCommand::new("dpkg-query").args(["-W", "-f=${Status}", package]);
    match ctx.run(&cmd) {
        Ok(output) => output.success && output.stdout.contains("install ok installed"),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::tests::context;
    use crate::fetch::tests::StubHttp;
    use crate::runner::RecordingRunner;

    const CURL: Dependency = Dependency::new("curl", "curl");
    const JQ: Dependency = Dependency::new("jq", "jq");

    #[test]
    fn test_nothing_installed_when_all_present() {
        let dir = tempfile::tempdir().unwrap();
        let runner = RecordingRunner::new();
        let http = StubHttp::default();
        let ctx = context(dir.path(), &runner, &http);

        let installed = ensure_dependencies(&ctx, &[CURL, JQ, TAR]).unwrap();
        assert!(installed.is_empty());
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn test_update_then_install_missing_only() {
        let dir = tempfile::tempdir().unwrap();
        let runner = RecordingRunner::new().missing("jq").missing("gpg");
        let http = StubHttp::default();
        let ctx = context(dir.path(), &runner, &http);

        let installed = ensure_dependencies(&ctx, &[CURL, JQ, GPG]).unwrap();
        assert_eq!(installed, vec!["jq", "gnupg"]);
        assert_eq!(
            runner.command_lines(),
            vec!["apt-get update", "apt-get install -y jq gnupg"]
        );
        assert!(
            runner.calls()[1]
                .env
                .contains(&("DEBIAN_FRONTEND".to_string(), "noninteractive".to_string()))
        );
    }

    #[test]
    fn test_duplicate_packages_installed_once() {
        let dir = tempfile::tempdir().unwrap();
        let runner = RecordingRunner::new().missing("gpg").missing("gpgv");
        let http = StubHttp::default();
        let ctx = context(dir.path(), &runner, &http);

        let installed =
            ensure_dependencies(&ctx, &[GPG, Dependency::new("gpgv", "gnupg")]).unwrap();
        assert_eq!(installed, vec!["gnupg"]);
    }

    #[test]
    fn test_update_failure_is_fatal_without_install() {
        let dir = tempfile::tempdir().unwrap();
        let runner = RecordingRunner::new()
            .missing("unzip")
            .fail(&["apt-get", "update"], "Temporary failure resolving 'deb.debian.org'");
        let http = StubHttp::default();
        let ctx = context(dir.path(), &runner, &http);

        let err = ensure_dependencies(&ctx, &[UNZIP]).unwrap_err();
        assert!(matches!(err, ProvisionError::DependencyInstall(_)));
        assert!(err.to_string().contains("Temporary failure"));
        assert_eq!(runner.command_lines(), vec!["apt-get update"]);
    }

    #[test]
    fn test_is_installed_reads_dpkg_status() {
        let dir = tempfile::tempdir().unwrap();
        let runner = RecordingRunner::new()
            .respond(&["dpkg-query", "-W", "-f=${Status}", "nginx"], "install ok installed");
        let http = StubHttp::default();
        let ctx = context(dir.path(), &runner, &http);

        assert!(is_installed(&ctx, "nginx"));
        assert!(!is_installed(&ctx, "gh"));
    }
}
