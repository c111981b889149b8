//! Provisioning targets.
//!
//! One module per subcommand. Each exports a `DESCRIPTOR` and a type
//! implementing `Target`:
//! - `gh`: GitHub CLI from its APT repository
//! - `prometheus`, `node_exporter`, `xray`: GitHub release binaries
//! - `nginx`, `postgres`, `xanmod`: third-party APT repositories
//! - `swapfile`: swap file with fstab and sysctl tuning
//! - `upgrade`: Debian release upgrade
//! - `apt_sources`: distribution mirror switch

pub mod apt_sources;
pub mod gh;
pub mod nginx;
pub mod node_exporter;
pub mod postgres;
pub mod prometheus;
pub mod swapfile;
pub mod upgrade;
pub mod xanmod;
pub mod xray;

use std::path::Path;

use crate::cli::Commands;
use crate::context::Context;
use crate::error::{ProvisionError, Result};
use crate::fetch;
use crate::pipeline::Workspace;
use crate::runner::SystemCommand;
use crate::target::{Target, TargetDescriptor};

/// Every provisioning target, in `list` order.
pub const ALL: &[&TargetDescriptor] = &[
    &gh::DESCRIPTOR,
    &prometheus::DESCRIPTOR,
    &node_exporter::DESCRIPTOR,
    &nginx::DESCRIPTOR,
    &postgres::DESCRIPTOR,
    &xanmod::DESCRIPTOR,
    &xray::DESCRIPTOR,
    &swapfile::DESCRIPTOR,
    &upgrade::DESCRIPTOR,
    &apt_sources::DESCRIPTOR,
];

/// Target behind a provisioning subcommand; `None` for read-only commands.
pub fn for_command(command: &Commands) -> Option<Box<dyn Target>> {
    let target: Box<dyn Target> = match command {
        Commands::Gh => Box::new(gh::GithubCli),
        Commands::Prometheus => Box::new(prometheus::Prometheus),
        Commands::NodeExporter => Box::new(node_exporter::NodeExporter),
        Commands::Nginx => Box::new(nginx::Nginx),
        Commands::PostgresRepo { install } => Box::new(postgres::PostgresRepo {
            install: install.clone(),
        }),
        Commands::Xanmod => Box::new(xanmod::Xanmod),
        Commands::Xray => Box::new(xray::Xray),
        Commands::Swapfile { size_mb } => Box::new(swapfile::Swapfile { size_mb: *size_mb }),
        Commands::UpgradeDebian => Box::new(upgrade::UpgradeDebian),
        Commands::AptSources { mirror } => Box::new(apt_sources::AptSources {
            mirror: mirror.clone(),
        }),
        Commands::List | Commands::Facts => return None,
    };
    Some(target)
}

pub fn find(name: &str) -> Option<&'static TargetDescriptor> {
    ALL.iter().copied().find(|d| d.name == name)
}

/// Create a locked system account without home directory, unless it exists.
pub fn ensure_system_user(ctx: &Context<'_>, name: &str) -> Result<()> {
    let exists = ctx
        .run(&SystemCommand::new("id").args(["-u", name]))
        .map(|output| output.success)
        .unwrap_or(false);
    if exists {
        tracing::debug!("System user {} exists", name);
        return Ok(());
    }

    let cmd = SystemCommand::new("useradd").args([
        "--system",
        "--no-create-home",
        "--shell",
        "/usr/sbin/nologin",
        name,
    ]);
    run_checked(ctx, &cmd)?;
    tracing::info!("Created system user {}", name);
    Ok(())
}

/// `chown -R owner:owner path`.
pub fn chown(ctx: &Context<'_>, owner: &str, path: &Path) -> Result<()> {
    let cmd = SystemCommand::new("chown").args([
        "-R".to_string(),
        format!("{}:{}", owner, owner),
        path.display().to_string(),
    ]);
    run_checked(ctx, &cmd)
}

/// Copy `file_name` from the unpacked archive to `dest` with mode 0755.
pub fn install_binary(ctx: &Context<'_>, work: &Workspace, file_name: &str, dest: &str) -> Result<()> {
    let src = fetch::find_extracted(ctx, work, file_name)?;
    let dest = ctx.path(dest);
    ctx.install_executable(&src, &dest)
        .map_err(|e| ProvisionError::install(format!("{}: {}", dest.display(), e)))?;
    tracing::info!("Installed {}", dest.display());
    Ok(())
}

/// Copy a data file from the unpacked archive to `dest` with mode 0644.
pub fn install_data(ctx: &Context<'_>, work: &Workspace, file_name: &str, dest: &str) -> Result<()> {
    let src = fetch::find_extracted(ctx, work, file_name)?;
    let dest = ctx.path(dest);
    ctx.install_file(&src, &dest)
        .map_err(|e| ProvisionError::install(format!("{}: {}", dest.display(), e)))?;
    tracing::debug!("Installed {}", dest.display());
    Ok(())
}

/// Run a command whose failure aborts the install step.
pub fn run_checked(ctx: &Context<'_>, cmd: &SystemCommand) -> Result<()> {
    let output = ctx
        .run(cmd)
        .map_err(|e| ProvisionError::install(format!("cannot run {}: {}", cmd.program, e)))?;
    if output.success {
        Ok(())
    } else {
        Err(ProvisionError::install(format!(
            "`{}` failed ({})",
            cmd.argv().join(" "),
            output.failure_reason()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::tests::context;
    use crate::fetch::tests::StubHttp;
    use crate::runner::RecordingRunner;
    use std::collections::HashSet;

    #[test]
    fn test_target_names_are_unique() {
        let names: HashSet<_> = ALL.iter().map(|d| d.name).collect();
        assert_eq!(names.len(), ALL.len());
        assert_eq!(find("node-exporter").map(|d| d.service), Some(Some("node_exporter")));
        assert!(find("docker").is_none());
    }

    #[test]
    fn test_every_subcommand_maps_to_its_descriptor() {
        let commands = [
            (Commands::Gh, "gh"),
            (Commands::NodeExporter, "node-exporter"),
            (Commands::PostgresRepo { install: None }, "postgres-repo"),
            (Commands::Swapfile { size_mb: 512 }, "swapfile"),
            (Commands::UpgradeDebian, "upgrade-debian"),
            (
                Commands::AptSources {
                    mirror: "http://m.example/debian".to_string(),
                },
                "apt-sources",
            ),
        ];
        for (command, name) in commands {
            let target = for_command(&command).unwrap();
            assert_eq!(target.descriptor().name, name);
        }
        assert!(for_command(&Commands::List).is_none());
        assert!(for_command(&Commands::Facts).is_none());
    }

    #[test]
    fn test_existing_user_is_not_recreated() {
        let dir = tempfile::tempdir().unwrap();
        let runner = RecordingRunner::new();
        let http = StubHttp::default();
        let ctx = context(dir.path(), &runner, &http);

        ensure_system_user(&ctx, "prometheus").unwrap();
        assert_eq!(runner.command_lines(), vec!["id -u prometheus"]);
    }

    #[test]
    fn test_missing_user_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let runner = RecordingRunner::new().fail(&["id"], "id: 'prometheus': no such user");
        let http = StubHttp::default();
        let ctx = context(dir.path(), &runner, &http);

        ensure_system_user(&ctx, "prometheus").unwrap();
        assert_eq!(
            runner.command_lines()[1],
            "useradd --system --no-create-home --shell /usr/sbin/nologin prometheus"
        );
    }
}
