//! Prometheus Node Exporter from the GitHub release tarball.

use crate::apt;
use crate::context::Context;
use crate::error::Result;
use crate::fetch::{self, ArchStyle, Integrity, ReleaseSpec};
use crate::pipeline::Workspace;
use crate::render::{self, SystemdUnit, WriteMode};
use crate::target::{Platform, Target, TargetDescriptor};
use crate::types::PrivilegeRequirement;
use crate::verify;

pub const DESCRIPTOR: TargetDescriptor = TargetDescriptor {
    name: "node-exporter",
    summary: "Prometheus Node Exporter from the GitHub release tarball",
    privilege: PrivilegeRequirement::Root,
    needs_network: true,
    platform: Platform::DEBIAN_AND_UBUNTU,
    dependencies: &[apt::TAR, apt::SYSTEMCTL],
    service: Some("node_exporter"),
};

pub const RELEASE: ReleaseSpec = ReleaseSpec {
    repo: "prometheus/node_exporter",
    asset_pattern: "linux-{arch}.tar.gz",
    arch_style: ArchStyle::Go,
    integrity: Integrity::Sha256Sums("sha256sums.txt"),
};

pub const BINARY: &str = "/usr/local/bin/node_exporter";
pub const UNIT_FILE: &str = "/etc/systemd/system/node_exporter.service";
const USER: &str = "node_exporter";

pub fn unit() -> SystemdUnit {
    let mut unit = SystemdUnit::simple("Prometheus Node Exporter", BINARY).run_as(USER, USER);
    unit.documentation = Some("https://github.com/prometheus/node_exporter".to_string());
    unit
}

pub struct NodeExporter;

impl Target for NodeExporter {
    fn descriptor(&self) -> &TargetDescriptor {
        &DESCRIPTOR
    }

    fn is_provisioned(&self, ctx: &Context<'_>) -> Result<bool> {
        Ok(ctx.path(BINARY).is_file() && ctx.path(UNIT_FILE).is_file())
    }

    fn fetch(&self, ctx: &Context<'_>, work: &mut Workspace) -> Result<()> {
        fetch::fetch_release(ctx, work, &RELEASE)?;
        fetch::extract(ctx, work)?;
        Ok(())
    }

    fn configure(&self, ctx: &Context<'_>, _work: &mut Workspace) -> Result<()> {
        super::ensure_system_user(ctx, USER)?;
        render::write_config(ctx, &ctx.path(UNIT_FILE), &unit(), WriteMode::Overwrite)?;
        Ok(())
    }

    fn install(&self, ctx: &Context<'_>, work: &mut Workspace) -> Result<()> {
        super::install_binary(ctx, work, "node_exporter", BINARY)
    }

    fn verify(&self, ctx: &Context<'_>, _work: &Workspace) -> Result<Vec<String>> {
        let binary = ctx.path(BINARY);
        verify::binary(&binary)?;
        let version = verify::command_version(ctx, &binary.display().to_string(), &["--version"])?;
        verify::service_active(ctx, "node_exporter")?;
        Ok(vec![
            format!("{} {}", BINARY, version),
            "service node_exporter is active".to_string(),
        ])
    }
}
