//! PostgreSQL Global Development Group (PGDG) APT repository.
//!
//! Adds `apt.postgresql.org` for the host codename. With `--install VERSION`
//! the matching `postgresql-VERSION` package is installed and its cluster
//! service activated as well.

use std::path::Path;

use crate::apt;
use crate::context::Context;
use crate::error::{ProvisionError, Result};
use crate::fetch::{self, KeyFormat};
use crate::pipeline::Workspace;
use crate::render::{self, Deb822Source, WriteMode};
use crate::systemd;
use crate::target::{Platform, Target, TargetDescriptor};
use crate::types::PrivilegeRequirement;
use crate::verify;

pub const DESCRIPTOR: TargetDescriptor = TargetDescriptor {
    name: "postgres-repo",
    summary: "PostgreSQL PGDG APT repository, optionally a server version",
    privilege: PrivilegeRequirement::Root,
    needs_network: true,
    platform: Platform::DEBIAN_AND_UBUNTU,
    dependencies: &[apt::GPG],
    service: None,
};

pub const KEY_URL: &str = "https://www.postgresql.org/media/keys/ACCESS_KEY.asc";
pub const KEYRING: &str = "/etc/apt/keyrings/postgresql.gpg";
pub const SOURCE_FILE: &str = "/etc/apt/sources.list.d/pgdg.sources";
const REPO_URI: &str = "https://apt.postgresql.org/pub/repos/apt";
const SERVICE: &str = "postgresql";

pub fn source(codename: &str) -> Deb822Source {
    let suite = format!("{}-pgdg", codename);
    Deb822Source::deb(REPO_URI, &[suite.as_str()], &["main"]).signed_by(Path::new(KEYRING))
}

pub struct PostgresRepo {
    /// Major version to install from the repository
    pub install: Option<String>,
}

impl PostgresRepo {
    fn package(&self) -> Option<String> {
        self.install.as_ref().map(|v| format!("postgresql-{}", v))
    }
}

impl Target for PostgresRepo {
    fn descriptor(&self) -> &TargetDescriptor {
        &DESCRIPTOR
    }

    fn check(&self, _ctx: &Context<'_>) -> Result<()> {
        if let Some(version) = &self.install {
            if version.is_empty() || !version.chars().all(|c| c.is_ascii_digit()) {
                return Err(ProvisionError::invalid_argument(format!(
                    "'{}' is not a PostgreSQL major version (expected e.g. 16)",
                    version
                )));
            }
        }
        Ok(())
    }

    fn is_provisioned(&self, ctx: &Context<'_>) -> Result<bool> {
        let repo = ctx.path(SOURCE_FILE).is_file();
        Ok(match self.package() {
            Some(package) => repo && apt::is_installed(ctx, &package),
            None => repo,
        })
    }

    fn fetch(&self, ctx: &Context<'_>, work: &mut Workspace) -> Result<()> {
        fetch::install_signing_key(ctx, work, KEY_URL, &ctx.path(KEYRING), KeyFormat::Armored)
    }

    fn configure(&self, ctx: &Context<'_>, _work: &mut Workspace) -> Result<()> {
        let codename = ctx.facts.require_suite_codename()?;
        render::write_config(ctx, &ctx.path(SOURCE_FILE), &source(codename), WriteMode::Overwrite)?;
        Ok(())
    }

    fn install(&self, ctx: &Context<'_>, _work: &mut Workspace) -> Result<()> {
        apt::update(ctx)?;
        match self.package() {
            Some(package) => apt::install(ctx, &[package.as_str()]),
            None => Ok(()),
        }
    }

    fn activate(&self, ctx: &Context<'_>, _work: &mut Workspace) -> Result<()> {
        if self.install.is_some() {
            systemd::activate(ctx, SERVICE)?;
        }
        Ok(())
    }

    fn verify(&self, ctx: &Context<'_>, _work: &Workspace) -> Result<Vec<String>> {
        let codename = ctx.facts.require_suite_codename()?;
        let suite = format!("Suites: {}-pgdg", codename);
        verify::file_contains(&ctx.path(SOURCE_FILE), &suite)?;
        let mut details = vec![format!("{} -> {} {}-pgdg", SOURCE_FILE, REPO_URI, codename)];

        if let Some(package) = self.package() {
            if !apt::is_installed(ctx, &package) {
                return Err(ProvisionError::verification(format!("{} is not installed", package)));
            }
            verify::service_active(ctx, SERVICE)?;
            details.push(format!("{} installed, service {} is active", package, SERVICE));
        }
        Ok(details)
    }
}
