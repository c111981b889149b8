//! GitHub CLI from the cli.github.com APT repository.

use crate::apt;
use crate::context::Context;
use crate::error::Result;
use crate::fetch::{self, KeyFormat};
use crate::pipeline::Workspace;
use crate::render::{self, Deb822Source, WriteMode};
use crate::target::{Platform, Target, TargetDescriptor};
use crate::types::{Architecture, PrivilegeRequirement};
use crate::verify;

pub const DESCRIPTOR: TargetDescriptor = TargetDescriptor {
    name: "gh",
    summary: "GitHub CLI from its APT repository",
    privilege: PrivilegeRequirement::Root,
    needs_network: true,
    platform: Platform::DEBIAN_AND_UBUNTU,
    dependencies: &[],
    service: None,
};

pub const KEY_URL: &str = "https://cli.github.com/packages/githubcli-archive-keyring.gpg";
pub const KEYRING: &str = "/etc/apt/keyrings/githubcli-archive-keyring.gpg";
pub const SOURCE_FILE: &str = "/etc/apt/sources.list.d/github-cli.sources";
const REPO_URI: &str = "https://cli.github.com/packages";

pub fn source(arch: Architecture) -> Deb822Source {
    Deb822Source::deb(REPO_URI, &["stable"], &["main"])
        .architecture(&arch.to_string())
        .signed_by(std::path::Path::new(KEYRING))
}

pub struct GithubCli;

impl Target for GithubCli {
    fn descriptor(&self) -> &TargetDescriptor {
        &DESCRIPTOR
    }

    fn is_provisioned(&self, ctx: &Context<'_>) -> Result<bool> {
        Ok(ctx.path(SOURCE_FILE).is_file() && apt::is_installed(ctx, "gh"))
    }

    fn fetch(&self, ctx: &Context<'_>, work: &mut Workspace) -> Result<()> {
        fetch::install_signing_key(ctx, work, KEY_URL, &ctx.path(KEYRING), KeyFormat::Binary)
    }

    fn configure(&self, ctx: &Context<'_>, _work: &mut Workspace) -> Result<()> {
        render::write_config(
            ctx,
            &ctx.path(SOURCE_FILE),
            &source(ctx.facts.arch),
            WriteMode::Overwrite,
        )?;
        Ok(())
    }

    fn install(&self, ctx: &Context<'_>, _work: &mut Workspace) -> Result<()> {
        apt::update(ctx)?;
        apt::install(ctx, &["gh"])
    }

    fn verify(&self, ctx: &Context<'_>, _work: &Workspace) -> Result<Vec<String>> {
        let version = verify::command_version(ctx, "gh", &["--version"])?;
        Ok(vec![version])
    }
}
