//! Nginx from the nginx.org APT repository.
//!
//! The repository is pinned above the distribution archive so that
//! `apt-get install nginx` picks the nginx.org build.

use std::path::Path;

use crate::apt;
use crate::context::Context;
use crate::error::Result;
use crate::fetch::{self, KeyFormat};
use crate::pipeline::Workspace;
use crate::render::{self, AptPreferences, Deb822Source, WriteMode};
use crate::target::{Platform, Target, TargetDescriptor};
use crate::types::{OsFamily, PrivilegeRequirement};
use crate::verify;

pub const DESCRIPTOR: TargetDescriptor = TargetDescriptor {
    name: "nginx",
    summary: "Nginx from the nginx.org APT repository",
    privilege: PrivilegeRequirement::Root,
    needs_network: true,
    platform: Platform::DEBIAN_AND_UBUNTU,
    dependencies: &[apt::GPG],
    service: Some("nginx"),
};

pub const KEY_URL: &str = "https://nginx.org/keys/nginx_signing.key";
pub const KEYRING: &str = "/usr/share/keyrings/nginx-archive-keyring.gpg";
pub const SOURCE_FILE: &str = "/etc/apt/sources.list.d/nginx.sources";
pub const PREFERENCES_FILE: &str = "/etc/apt/preferences.d/99nginx";

pub fn source(family: OsFamily, codename: &str) -> Deb822Source {
    let uri = format!("http://nginx.org/packages/{}", family);
    Deb822Source::deb(&uri, &[codename], &["nginx"]).signed_by(Path::new(KEYRING))
}

pub fn preferences() -> AptPreferences {
    AptPreferences {
        package: "*".to_string(),
        pins: vec!["origin nginx.org".to_string(), "release o=nginx".to_string()],
        priority: 900,
    }
}

pub struct Nginx;

impl Target for Nginx {
    fn descriptor(&self) -> &TargetDescriptor {
        &DESCRIPTOR
    }

    fn is_provisioned(&self, ctx: &Context<'_>) -> Result<bool> {
        Ok(ctx.path(SOURCE_FILE).is_file() && apt::is_installed(ctx, "nginx"))
    }

    fn fetch(&self, ctx: &Context<'_>, work: &mut Workspace) -> Result<()> {
        fetch::install_signing_key(ctx, work, KEY_URL, &ctx.path(KEYRING), KeyFormat::Armored)
    }

    fn configure(&self, ctx: &Context<'_>, _work: &mut Workspace) -> Result<()> {
        let family = ctx.facts.require_family()?;
        let codename = ctx.facts.require_suite_codename()?;
        render::write_config(
            ctx,
            &ctx.path(SOURCE_FILE),
            &source(family, codename),
            WriteMode::Overwrite,
        )?;
        render::write_config(ctx, &ctx.path(PREFERENCES_FILE), &preferences(), WriteMode::Overwrite)?;
        Ok(())
    }

    fn install(&self, ctx: &Context<'_>, _work: &mut Workspace) -> Result<()> {
        apt::update(ctx)?;
        apt::install(ctx, &["nginx"])
    }

    fn verify(&self, ctx: &Context<'_>, _work: &Workspace) -> Result<Vec<String>> {
        let version = verify::command_version(ctx, "nginx", &["-v"])?;
        verify::service_active(ctx, "nginx")?;
        Ok(vec![version, "service nginx is active".to_string()])
    }
}
