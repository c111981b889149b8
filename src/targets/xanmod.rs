//! XanMod kernel from deb.xanmod.org.
//!
//! The package flavour follows the x86-64 psABI level of the CPU, read from
//! the `flags` line of `/proc/cpuinfo`. XanMod publishes x64v2 and x64v3
//! builds; a v4 CPU gets the v3 build and a v1 CPU is rejected.

use std::fs;
use std::path::Path;

use crate::apt;
use crate::context::Context;
use crate::error::{ProvisionError, Result};
use crate::fetch::{self, KeyFormat};
use crate::pipeline::Workspace;
use crate::render::{self, Deb822Source, WriteMode};
use crate::target::{Platform, Target, TargetDescriptor};
use crate::types::{Architecture, OsFamily, PrivilegeRequirement};

pub const DESCRIPTOR: TargetDescriptor = TargetDescriptor {
    name: "xanmod",
    summary: "XanMod kernel matching the CPU's x86-64 psABI level",
    privilege: PrivilegeRequirement::Root,
    needs_network: true,
    platform: Platform {
        families: &[OsFamily::Debian, OsFamily::Ubuntu],
        codenames: &["bookworm", "trixie", "jammy", "noble"],
        architectures: &[Architecture::Amd64],
    },
    dependencies: &[apt::GPG],
    service: None,
};

pub const KEY_URL: &str = "https://dl.xanmod.org/archive.key";
pub const KEYRING: &str = "/etc/apt/keyrings/xanmod-archive-keyring.gpg";
pub const SOURCE_FILE: &str = "/etc/apt/sources.list.d/xanmod-release.sources";
const REPO_URI: &str = "http://deb.xanmod.org";
const CPUINFO: &str = "/proc/cpuinfo";

const V2_FLAGS: &[&str] = &["cx16", "lahf_lm", "popcnt", "sse4_1", "sse4_2", "ssse3"];
const V3_FLAGS: &[&str] = &[
    "avx", "avx2", "bmi1", "bmi2", "f16c", "fma", "abm", "movbe", "xsave",
];
const V4_FLAGS: &[&str] = &["avx512f", "avx512bw", "avx512cd", "avx512dq", "avx512vl"];

/// x86-64 psABI level (1-4) from the contents of `/proc/cpuinfo`.
pub fn psabi_level(cpuinfo: &str) -> u8 {
    let Some(flags) = cpuinfo
        .lines()
        .find(|line| line.starts_with("flags"))
        .and_then(|line| line.split_once(':'))
        .map(|(_, flags)| flags.split_whitespace().collect::<Vec<_>>())
    else {
        return 1;
    };
    let has_all = |wanted: &[&str]| wanted.iter().all(|f| flags.contains(f));

    if !has_all(V2_FLAGS) {
        1
    } else if !has_all(V3_FLAGS) {
        2
    } else if !has_all(V4_FLAGS) {
        3
    } else {
        4
    }
}

/// Kernel meta-package for a psABI level.
pub fn package_for_level(level: u8) -> Result<String> {
    match level {
        0 | 1 => Err(ProvisionError::unsupported(
            "CPU only supports x86-64-v1; XanMod requires x86-64-v2 or later",
        )),
        2 => Ok("linux-xanmod-x64v2".to_string()),
        _ => Ok("linux-xanmod-x64v3".to_string()),
    }
}

pub fn source(codename: &str) -> Deb822Source {
    Deb822Source::deb(REPO_URI, &[codename], &["main"]).signed_by(Path::new(KEYRING))
}

pub struct Xanmod;

impl Xanmod {
    fn package(&self, ctx: &Context<'_>) -> Result<String> {
        let path = ctx.path(CPUINFO);
        let cpuinfo = fs::read_to_string(&path).map_err(|e| {
            ProvisionError::unsupported(format!("cannot read {}: {}", path.display(), e))
        })?;
        let level = psabi_level(&cpuinfo);
        tracing::info!("CPU supports x86-64-v{}", level);
        package_for_level(level)
    }
}

impl Target for Xanmod {
    fn descriptor(&self) -> &TargetDescriptor {
        &DESCRIPTOR
    }

    fn check(&self, ctx: &Context<'_>) -> Result<()> {
        self.package(ctx).map(|_| ())
    }

    fn is_provisioned(&self, ctx: &Context<'_>) -> Result<bool> {
        let package = self.package(ctx)?;
        Ok(ctx.path(SOURCE_FILE).is_file() && apt::is_installed(ctx, &package))
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
        let package = self.package(ctx)?;
        apt::update(ctx)?;
        apt::install(ctx, &[package.as_str()])
    }

    fn verify(&self, ctx: &Context<'_>, _work: &Workspace) -> Result<Vec<String>> {
        let package = self.package(ctx)?;
        if !apt::is_installed(ctx, &package) {
            return Err(ProvisionError::verification(format!("{} is not installed", package)));
        }
        Ok(vec![format!("{} installed; reboot to run the new kernel", package)])
    }
}
