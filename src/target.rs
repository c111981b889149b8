//! Provisioning target contract.
//!
//! A target is a static `TargetDescriptor` plus a `Target` implementation
//! whose hooks map onto the fixed pipeline steps. Hooks default to doing
//! nothing so a target only implements the steps it needs.
//!
//! # Contract
//!
//! - `check`: target-specific preconditions, after the generic pre-flight
//! - `is_provisioned`: cheap, read-only detection used to skip re-runs
//! - `fetch`: downloads into the workspace, never outside it
//! - `configure`: writes configuration files (sources, units, configs)
//! - `install`: places binaries or installs packages
//! - `activate`: starts services; defaults to the descriptor's unit
//! - `verify`: read-only confirmation, returns report lines
//!
//! # Invariants
//!
//! - Hooks run strictly in the order above; the first error aborts the run.
//! - Nothing before `fetch` mutates the filesystem, apart from dependency
//!   installation.

use crate::apt::Dependency;
use crate::context::Context;
use crate::error::Result;
use crate::pipeline::Workspace;
use crate::systemd;
use crate::types::{Architecture, OsFamily, PrivilegeRequirement};
use crate::verify;

/// Platforms a target runs on.
#[derive(Debug, Clone, Copy)]
pub struct Platform {
    pub families: &'static [OsFamily],
    /// Supported codenames; empty means the family defaults
    pub codenames: &'static [&'static str],
    /// Supported architectures; empty means any
    pub architectures: &'static [Architecture],
}

impl Platform {
    pub const DEBIAN_AND_UBUNTU: Self = Self {
        families: &[OsFamily::Debian, OsFamily::Ubuntu],
        codenames: &[],
        architectures: &[],
    };
}

/// Static description of what a target provisions.
#[derive(Debug, Clone, Copy)]
pub struct TargetDescriptor {
    /// Subcommand name
    pub name: &'static str,
    pub summary: &'static str,
    pub privilege: PrivilegeRequirement,
    pub needs_network: bool,
    pub platform: Platform,
    /// Commands that must exist before fetching
    pub dependencies: &'static [Dependency],
    /// systemd unit started by the default `activate`
    pub service: Option<&'static str>,
}

pub trait Target {
    fn descriptor(&self) -> &TargetDescriptor;

    fn check(&self, _ctx: &Context<'_>) -> Result<()> {
        Ok(())
    }

    fn is_provisioned(&self, _ctx: &Context<'_>) -> Result<bool> {
        Ok(false)
    }

    fn fetch(&self, _ctx: &Context<'_>, _work: &mut Workspace) -> Result<()> {
        Ok(())
    }

    fn configure(&self, _ctx: &Context<'_>, _work: &mut Workspace) -> Result<()> {
        Ok(())
    }

    fn install(&self, _ctx: &Context<'_>, _work: &mut Workspace) -> Result<()> {
        Ok(())
    }

    fn activate(&self, ctx: &Context<'_>, _work: &mut Workspace) -> Result<()> {
        match self.descriptor().service {
            Some(unit) => systemd::activate(ctx, unit),
            None => Ok(()),
        }
    }

    fn verify(&self, ctx: &Context<'_>, _work: &Workspace) -> Result<Vec<String>> {
        match self.descriptor().service {
            Some(unit) => {
                verify::service_active(ctx, unit)?;
                Ok(vec![format!("service {} is active", unit)])
            }
            None => Ok(Vec::new()),
        }
    }
}
