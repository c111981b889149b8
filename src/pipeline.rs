//! Provisioning pipeline
//!
//! Drives a `Target` through the fixed step sequence:
//!
//! ```text
//! preflight → dependencies → fetch → configure → install → activate → verify
//! ```
//!
//! The first error aborts the run. Nothing is rolled back; files already
//! written stay in place and a re-run picks up from the detected state.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::apt;
use crate::context::Context;
use crate::error::{ProvisionError, Result};
use crate::preflight;
use crate::target::Target;

/// A downloaded release asset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub path: PathBuf,
    /// Asset file name as published
    pub name: String,
    /// Release version without a leading `v`
    pub version: String,
}

/// Scratch directory for one run, removed on drop.
pub struct Workspace {
    dir: TempDir,
    pub artifact: Option<Artifact>,
    pub extracted: Option<PathBuf>,
}

impl Workspace {
    pub fn new() -> io::Result<Self> {
        let dir = tempfile::Builder::new().prefix("debprov-").tempdir()?;
        Ok(Self {
            dir,
            artifact: None,
            extracted: None,
        })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Provisioned,
    /// Detected as installed and skipped (no `--force`)
    AlreadyProvisioned,
    /// Dry run: steps logged, nothing verified
    Planned,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Provisioned => "provisioned",
            Self::AlreadyProvisioned => "already provisioned",
            Self::Planned => "planned (dry run)",
        };
        f.write_str(text)
    }
}

/// Result of a successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    pub target: &'static str,
    pub outcome: Outcome,
    /// Lines from the verify step (versions, service states)
    pub details: Vec<String>,
    /// Packages installed to satisfy dependencies
    pub installed_dependencies: Vec<&'static str>,
    pub version: Option<String>,
}

impl Report {
    fn new(target: &'static str, outcome: Outcome) -> Self {
        Self {
            target,
            outcome,
            details: Vec::new(),
            installed_dependencies: Vec::new(),
            version: None,
        }
    }
}

/// Run every step of `target` against the host described by `ctx`.
pub fn provision(target: &dyn Target, ctx: &Context<'_>) -> Result<Report> {
    let descriptor = target.descriptor();
    tracing::info!("Provisioning {} on {}", descriptor.name, ctx.facts);

    preflight::check(descriptor, &ctx.facts, ctx.confirm)?;
    target.check(ctx)?;

    let mut work = Workspace::new()
        .map_err(|e| ProvisionError::download(format!("cannot create scratch directory: {}", e)))?;
    tracing::debug!("Workspace at {}", work.path().display());

    if target.is_provisioned(ctx)? {
        if ctx.force {
            tracing::warn!("{} looks provisioned already; --force given, continuing", descriptor.name);
        } else {
            tracing::info!("{} is already provisioned; use --force to redo", descriptor.name);
            let mut report = Report::new(descriptor.name, Outcome::AlreadyProvisioned);
            if !ctx.dry_run {
                report.details = target.verify(ctx, &work)?;
            }
            return Ok(report);
        }
    }

    let installed_dependencies = apt::ensure_dependencies(ctx, descriptor.dependencies)?;

    tracing::info!("[fetch] {}", descriptor.name);
    target.fetch(ctx, &mut work)?;
    tracing::info!("[configure] {}", descriptor.name);
    target.configure(ctx, &mut work)?;
    tracing::info!("[install] {}", descriptor.name);
    target.install(ctx, &mut work)?;
    tracing::info!("[activate] {}", descriptor.name);
    target.activate(ctx, &mut work)?;

    let mut report = Report::new(descriptor.name, Outcome::Planned);
    report.installed_dependencies = installed_dependencies;
    report.version = work.artifact.as_ref().map(|a| a.version.clone());

    if ctx.dry_run {
        tracing::info!("[dry-run] skipping verification of {}", descriptor.name);
        return Ok(report);
    }

    tracing::info!("[verify] {}", descriptor.name);
    report.details = target.verify(ctx, &work)?;
    report.outcome = Outcome::Provisioned;
    Ok(report)
}
