//! Swap file at `/swapfile`.
//!
//! An existing `/swapfile` aborts the run before anything is touched, so
//! `/etc/fstab` gains at most one entry however often this runs.

use std::fs;
use std::io::ErrorKind;
use std::os::unix::fs::PermissionsExt;

use crate::context::Context;
use crate::error::{ProvisionError, Result};
use crate::pipeline::Workspace;
use crate::render::{self, FstabEntry, SysctlConf, WriteMode};
use crate::runner::SystemCommand;
use crate::target::{Platform, Target, TargetDescriptor};
use crate::types::PrivilegeRequirement;
use crate::verify;

pub const DESCRIPTOR: TargetDescriptor = TargetDescriptor {
    name: "swapfile",
    summary: "Swap file with fstab entry and sysctl tuning",
    privilege: PrivilegeRequirement::Root,
    needs_network: false,
    platform: Platform::DEBIAN_AND_UBUNTU,
    dependencies: &[],
    service: None,
};

pub const SWAPFILE: &str = "/swapfile";
pub const FSTAB: &str = "/etc/fstab";
pub const SYSCTL_FILE: &str = "/etc/sysctl.d/99-swapfile.conf";
const MIB: u64 = 1024 * 1024;

pub fn sysctl_conf(swappiness: u8, vfs_cache_pressure: u32) -> SysctlConf {
    SysctlConf {
        comment: "Swap tuning written by debprov".to_string(),
        params: vec![
            ("vm.swappiness".to_string(), swappiness.to_string()),
            ("vm.vfs_cache_pressure".to_string(), vfs_cache_pressure.to_string()),
        ],
    }
}

pub struct Swapfile {
    pub size_mb: u64,
}

impl Swapfile {
    fn run(&self, ctx: &Context<'_>, cmd: SystemCommand) -> Result<()> {
        super::run_checked(ctx, &cmd)
    }

    /// Add the swap line to fstab unless it is already there.
    fn record_in_fstab(&self, ctx: &Context<'_>) -> Result<()> {
        let entry = FstabEntry::swap(SWAPFILE);
        let fstab = ctx.path(FSTAB);
        let fstab_err =
            |e: std::io::Error| ProvisionError::config_write(format!("{}: {}", fstab.display(), e));
        let current = match fs::read_to_string(&fstab) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => String::new(),
            Err(e) => return Err(fstab_err(e)),
        };
        if entry.present_in(&current) {
            tracing::warn!("{} already lists {}; leaving it alone", FSTAB, SWAPFILE);
            return Ok(());
        }
        ctx.append_line(&fstab, &entry.line()).map_err(fstab_err)?;
        tracing::info!("Added {} to {}", SWAPFILE, FSTAB);
        Ok(())
    }
}

impl Target for Swapfile {
    fn descriptor(&self) -> &TargetDescriptor {
        &DESCRIPTOR
    }

    fn check(&self, ctx: &Context<'_>) -> Result<()> {
        if self.size_mb == 0 {
            return Err(ProvisionError::invalid_argument("swap size must be at least 1 MB"));
        }
        let path = ctx.path(SWAPFILE);
        if path.exists() {
            return Err(ProvisionError::already_provisioned(format!(
                "{} already exists; remove it (swapoff, delete, drop the fstab line) to recreate",
                path.display()
            )));
        }
        Ok(())
    }

    fn configure(&self, ctx: &Context<'_>, _work: &mut Workspace) -> Result<()> {
        let conf = sysctl_conf(ctx.settings.swappiness, ctx.settings.vfs_cache_pressure);
        render::write_config(ctx, &ctx.path(SYSCTL_FILE), &conf, WriteMode::Overwrite)?;
        Ok(())
    }

    fn install(&self, ctx: &Context<'_>, _work: &mut Workspace) -> Result<()> {
        let path = ctx.path(SWAPFILE);
        let arg = path.display().to_string();
        tracing::info!("Allocating {} MB at {}", self.size_mb, arg);

        let size = format!("{}M", self.size_mb);
        self.run(ctx, SystemCommand::new("fallocate").args(["-l", &size, &arg]))?;
        ctx.set_mode(&path, 0o600)
            .map_err(|e| ProvisionError::install(format!("{}: {}", arg, e)))?;
        self.run(ctx, SystemCommand::new("mkswap").arg(arg.as_str()))?;
        // swap is only enabled once it has a boot entry
        self.record_in_fstab(ctx)?;
        self.run(ctx, SystemCommand::new("swapon").arg(arg.as_str()))
    }

    fn activate(&self, ctx: &Context<'_>, _work: &mut Workspace) -> Result<()> {
        self.run(ctx, SystemCommand::new("sysctl").args(["-p", &ctx.path_arg(SYSCTL_FILE)]))
    }

    fn verify(&self, ctx: &Context<'_>, _work: &Workspace) -> Result<Vec<String>> {
        let path = ctx.path(SWAPFILE);
        let meta = fs::metadata(&path)
            .map_err(|e| ProvisionError::verification(format!("{}: {}", path.display(), e)))?;
        let expected = self.size_mb.checked_mul(MIB).ok_or_else(|| {
            ProvisionError::verification(format!("{} MB does not fit in a file size", self.size_mb))
        })?;
        if meta.len() != expected {
            return Err(ProvisionError::verification(format!(
                "{} is {} bytes, expected {}",
                path.display(),
                meta.len(),
                expected
            )));
        }
        if meta.permissions().mode() & 0o777 != 0o600 {
            return Err(ProvisionError::verification(format!(
                "{} has mode {:o}, expected 600",
                path.display(),
                meta.permissions().mode() & 0o777
            )));
        }
        verify::file_contains(&ctx.path(FSTAB), &FstabEntry::swap(SWAPFILE).line())?;

        let output = ctx
            .run(&SystemCommand::new("swapon").args(["--show=NAME", "--noheadings"]))
            .map_err(|e| ProvisionError::verification(format!("cannot run swapon: {}", e)))?;
        let swap = path.display().to_string();
        if !output.stdout.lines().any(|line| line.trim() == swap) {
            return Err(ProvisionError::verification(format!("{} is not an active swap area", swap)));
        }

        Ok(vec![format!("{} MB swap active at {}", self.size_mb, SWAPFILE)])
    }
}
