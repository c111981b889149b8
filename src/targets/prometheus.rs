//! Prometheus server from the GitHub release tarball.
//!
//! Installs `prometheus` and `promtool` to `/usr/local/bin`, keeps TSDB data
//! in `/var/lib/prometheus` owned by the `prometheus` system user, and writes
//! a starter `prometheus.yml` that scrapes itself and a local Node Exporter.
//! An existing `prometheus.yml` is never replaced.

use crate::apt;
use crate::context::Context;
use crate::error::{ProvisionError, Result};
use crate::fetch::{self, ArchStyle, Integrity, ReleaseSpec};
use crate::pipeline::Workspace;
use crate::render::{self, PrometheusConfig, ScrapeJob, SystemdUnit, WriteMode};
use crate::target::{Platform, Target, TargetDescriptor};
use crate::types::PrivilegeRequirement;
use crate::verify;

pub const DESCRIPTOR: TargetDescriptor = TargetDescriptor {
    name: "prometheus",
    summary: "Prometheus server from the GitHub release tarball",
    privilege: PrivilegeRequirement::Root,
    needs_network: true,
    platform: Platform::DEBIAN_AND_UBUNTU,
    dependencies: &[apt::TAR, apt::SYSTEMCTL],
    service: Some("prometheus"),
};

pub const RELEASE: ReleaseSpec = ReleaseSpec {
    repo: "prometheus/prometheus",
    asset_pattern: "linux-{arch}.tar.gz",
    arch_style: ArchStyle::Go,
    integrity: Integrity::Sha256Sums("sha256sums.txt"),
};

pub const BINARY: &str = "/usr/local/bin/prometheus";
pub const PROMTOOL: &str = "/usr/local/bin/promtool";
pub const CONFIG_DIR: &str = "/etc/prometheus";
pub const CONFIG_FILE: &str = "/etc/prometheus/prometheus.yml";
pub const DATA_DIR: &str = "/var/lib/prometheus";
pub const UNIT_FILE: &str = "/etc/systemd/system/prometheus.service";
const USER: &str = "prometheus";

pub fn config() -> PrometheusConfig {
    PrometheusConfig {
        scrape_interval: "15s".to_string(),
        evaluation_interval: "15s".to_string(),
        jobs: vec![
            ScrapeJob {
                name: "prometheus".to_string(),
                targets: vec!["localhost:9090".to_string()],
            },
            ScrapeJob {
                name: "node".to_string(),
                targets: vec!["localhost:9100".to_string()],
            },
        ],
    }
}

pub fn unit() -> SystemdUnit {
    let exec = format!(
        "{} --config.file={} --storage.tsdb.path={}/ --web.listen-address=0.0.0.0:9090",
        BINARY, CONFIG_FILE, DATA_DIR
    );
    let mut unit = SystemdUnit::simple("Prometheus", &exec).run_as(USER, USER);
    unit.documentation = Some("https://prometheus.io/docs/introduction/overview/".to_string());
    unit.exec_reload = Some("/bin/kill -HUP $MAINPID".to_string());
    unit
}

pub struct Prometheus;

impl Target for Prometheus {
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

        for dir in [CONFIG_DIR, DATA_DIR] {
            let path = ctx.path(dir);
            ctx.create_dir_all(&path)
                .map_err(|e| ProvisionError::config_write(format!("{}: {}", path.display(), e)))?;
        }

        render::write_config(ctx, &ctx.path(CONFIG_FILE), &config(), WriteMode::KeepExisting)?;
        render::write_config(ctx, &ctx.path(UNIT_FILE), &unit(), WriteMode::Overwrite)?;
        Ok(())
    }

    fn install(&self, ctx: &Context<'_>, work: &mut Workspace) -> Result<()> {
        super::install_binary(ctx, work, "prometheus", BINARY)?;
        super::install_binary(ctx, work, "promtool", PROMTOOL)?;
        super::chown(ctx, USER, &ctx.path(CONFIG_DIR))?;
        super::chown(ctx, USER, &ctx.path(DATA_DIR))?;
        Ok(())
    }

    fn verify(&self, ctx: &Context<'_>, _work: &Workspace) -> Result<Vec<String>> {
        let binary = ctx.path(BINARY);
        verify::binary(&binary)?;
        verify::binary(&ctx.path(PROMTOOL))?;
        let version = verify::command_version(ctx, &binary.display().to_string(), &["--version"])?;
        verify::service_active(ctx, "prometheus")?;
        Ok(vec![
            format!("{} {}", BINARY, version),
            "service prometheus is active".to_string(),
        ])
    }
}
