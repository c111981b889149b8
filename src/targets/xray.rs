//! Xray proxy from the XTLS/Xray-core release zip.
//!
//! Layout follows the upstream install script: binary in `/usr/local/bin`,
//! geo data in `/usr/local/share/xray`, config in `/usr/local/etc/xray`.
//! The config is only written when absent.

use crate::apt;
use crate::context::Context;
use crate::error::{ProvisionError, Result};
use crate::fetch::{self, ArchStyle, Integrity, ReleaseSpec};
use crate::pipeline::Workspace;
use crate::render::{self, SystemdUnit, WriteMode, XrayConfig};
use crate::target::{Platform, Target, TargetDescriptor};
use crate::types::PrivilegeRequirement;
use crate::verify;

pub const DESCRIPTOR: TargetDescriptor = TargetDescriptor {
    name: "xray",
    summary: "Xray proxy from the GitHub release zip",
    privilege: PrivilegeRequirement::Root,
    needs_network: true,
    platform: Platform::DEBIAN_AND_UBUNTU,
    dependencies: &[apt::UNZIP, apt::SYSTEMCTL],
    service: Some("xray"),
};

pub const RELEASE: ReleaseSpec = ReleaseSpec {
    repo: "XTLS/Xray-core",
    asset_pattern: "Xray-linux-{arch}.zip",
    arch_style: ArchStyle::Xray,
    integrity: Integrity::Dgst,
};

pub const BINARY: &str = "/usr/local/bin/xray";
pub const ASSET_DIR: &str = "/usr/local/share/xray";
pub const CONFIG_DIR: &str = "/usr/local/etc/xray";
pub const CONFIG_FILE: &str = "/usr/local/etc/xray/config.json";
pub const UNIT_FILE: &str = "/etc/systemd/system/xray.service";
const GEO_FILES: &[&str] = &["geoip.dat", "geosite.dat"];

pub fn unit() -> SystemdUnit {
    let exec = format!("{} run -config {}", BINARY, CONFIG_FILE);
    let mut unit = SystemdUnit::simple("Xray Service", &exec);
    unit.documentation = Some("https://github.com/xtls".to_string());
    unit.after = vec!["network.target".to_string(), "nss-lookup.target".to_string()];
    unit.wants = Vec::new();
    unit.user = Some("nobody".to_string());
    unit.extra_service = vec![
        (
            "CapabilityBoundingSet".to_string(),
            "CAP_NET_ADMIN CAP_NET_BIND_SERVICE".to_string(),
        ),
        (
            "AmbientCapabilities".to_string(),
            "CAP_NET_ADMIN CAP_NET_BIND_SERVICE".to_string(),
        ),
        ("NoNewPrivileges".to_string(), "true".to_string()),
        ("RestartPreventExitStatus".to_string(), "23".to_string()),
        ("LimitNPROC".to_string(), "10000".to_string()),
        ("LimitNOFILE".to_string(), "1000000".to_string()),
    ];
    unit
}

pub struct Xray;

impl Target for Xray {
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
        let dir = ctx.path(CONFIG_DIR);
        ctx.create_dir_all(&dir)
            .map_err(|e| ProvisionError::config_write(format!("{}: {}", dir.display(), e)))?;
        render::write_config(
            ctx,
            &ctx.path(CONFIG_FILE),
            &XrayConfig::default(),
            WriteMode::KeepExisting,
        )?;
        render::write_config(ctx, &ctx.path(UNIT_FILE), &unit(), WriteMode::Overwrite)?;
        Ok(())
    }

    fn install(&self, ctx: &Context<'_>, work: &mut Workspace) -> Result<()> {
        super::install_binary(ctx, work, "xray", BINARY)?;
        for file in GEO_FILES {
            super::install_data(ctx, work, file, &format!("{}/{}", ASSET_DIR, file))?;
        }
        Ok(())
    }

    fn verify(&self, ctx: &Context<'_>, _work: &Workspace) -> Result<Vec<String>> {
        let binary = ctx.path(BINARY);
        verify::binary(&binary)?;
        let version = verify::command_version(ctx, &binary.display().to_string(), &["version"])?;
        verify::service_active(ctx, "xray")?;
        Ok(vec![
            format!("{} {}", BINARY, version),
            "service xray is active".to_string(),
        ])
    }
}
