//! In-place Debian release upgrade to the next stable codename.
//!
//! Rewrites every APT source from the current codename to the next one,
//! keeping a `.bak` copy of each rewritten file, then runs the two-phase
//! upgrade (`upgrade --without-new-pkgs`, then `full-upgrade`) and
//! `autoremove`. A reboot is still required afterwards.

use std::fs;
use std::path::{Path, PathBuf};

use crate::apt;
use crate::context::Context;
use crate::error::{ProvisionError, Result};
use crate::host::OsRelease;
use crate::pipeline::Workspace;
use crate::target::{Platform, Target, TargetDescriptor};
use crate::types::{OsFamily, PrivilegeRequirement};

pub const DESCRIPTOR: TargetDescriptor = TargetDescriptor {
    name: "upgrade-debian",
    summary: "In-place Debian release upgrade to the next stable codename",
    privilege: PrivilegeRequirement::Root,
    needs_network: true,
    platform: Platform {
        families: &[OsFamily::Debian],
        codenames: &["buster", "bullseye", "bookworm"],
        architectures: &[],
    },
    dependencies: &[],
    service: None,
};

/// Debian stable releases in order.
const RELEASES: &[&str] = &["buster", "bullseye", "bookworm", "trixie"];

pub const SOURCES_LIST: &str = "/etc/apt/sources.list";
pub const SOURCES_DIR: &str = "/etc/apt/sources.list.d";

pub fn next_codename(current: &str) -> Option<&'static str> {
    let index = RELEASES.iter().position(|r| *r == current)?;
    RELEASES.get(index + 1).copied()
}

/// Replace `from` with `to` wherever it appears as a whole word.
///
/// `bookworm-security` and `bookworm/updates` are rewritten; `bookwormish`
/// is not. The pre-bullseye security suite `<from>/updates` becomes
/// `<to>-security`.
pub fn rewrite_codename(text: &str, from: &str, to: &str) -> String {
    let legacy_security = format!("{}/updates", from);
    let text = text.replace(&legacy_security, &format!("{}-security", to));

    let mut out = String::with_capacity(text.len());
    let mut rest = text.as_str();
    while let Some(pos) = rest.find(from) {
        let before = rest[..pos].chars().next_back();
        let after = rest[pos + from.len()..].chars().next();
        out.push_str(&rest[..pos]);
        if before.is_some_and(is_word_char) || after.is_some_and(is_word_char) {
            out.push_str(from);
        } else {
            out.push_str(to);
        }
        rest = &rest[pos + from.len()..];
    }
    out.push_str(rest);
    out
}

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Whether `codename` appears in `text` as a whole word.
pub fn mentions_codename(text: &str, codename: &str) -> bool {
    text.match_indices(codename).any(|(pos, _)| {
        let before = text[..pos].chars().next_back();
        let after = text[pos + codename.len()..].chars().next();
        !before.is_some_and(is_word_char) && !after.is_some_and(is_word_char)
    })
}

pub struct UpgradeDebian;

impl UpgradeDebian {
    fn releases(&self, ctx: &Context<'_>) -> Result<(String, &'static str)> {
        let current = ctx.facts.require_suite_codename()?;
        let next = next_codename(current).ok_or_else(|| {
            ProvisionError::unsupported(format!(
                "no known Debian release follows {}",
                current
            ))
        })?;
        Ok((current.to_string(), next))
    }

    /// Every APT source file that exists under the root.
    fn source_files(&self, ctx: &Context<'_>) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        let list = ctx.path(SOURCES_LIST);
        if list.is_file() {
            files.push(list);
        }

        let dir = ctx.path(SOURCES_DIR);
        if dir.is_dir() {
            let mut entries: Vec<PathBuf> = fs::read_dir(&dir)
                .map_err(|e| ProvisionError::config_write(format!("{}: {}", dir.display(), e)))?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|path| {
                    path.is_file()
                        && path
                            .extension()
                            .is_some_and(|ext| ext == "list" || ext == "sources")
                })
                .collect();
            entries.sort();
            files.extend(entries);
        }
        Ok(files)
    }

    fn rewrite_file(&self, ctx: &Context<'_>, path: &Path, from: &str, to: &str) -> Result<bool> {
        let write_err =
            |e: std::io::Error| ProvisionError::config_write(format!("{}: {}", path.display(), e));
        let original = fs::read_to_string(path).map_err(write_err)?;
        let rewritten = rewrite_codename(&original, from, to);
        if rewritten == original {
            return Ok(false);
        }

        let mut backup = path.as_os_str().to_owned();
        backup.push(".bak");
        ctx.write_file(Path::new(&backup), original.as_bytes())
            .map_err(write_err)?;
        ctx.write_file(path, rewritten.as_bytes()).map_err(write_err)?;
        tracing::info!("Rewrote {} ({} -> {})", path.display(), from, to);
        Ok(true)
    }
}

impl Target for UpgradeDebian {
    fn descriptor(&self) -> &TargetDescriptor {
        &DESCRIPTOR
    }

    fn check(&self, ctx: &Context<'_>) -> Result<()> {
        let (current, next) = self.releases(ctx)?;
        tracing::info!("Upgrading Debian {} -> {}", current, next);
        Ok(())
    }

    fn configure(&self, ctx: &Context<'_>, _work: &mut Workspace) -> Result<()> {
        let (current, next) = self.releases(ctx)?;
        let files = self.source_files(ctx)?;
        let mut rewritten = 0;
        for file in &files {
            if self.rewrite_file(ctx, file, &current, next)? {
                rewritten += 1;
            }
        }
        if rewritten > 0 {
            return Ok(());
        }

        // An interrupted earlier run may have rewritten the sources already
        let already_next = files.iter().any(|file| {
            fs::read_to_string(file).is_ok_and(|text| mentions_codename(&text, next))
        });
        if already_next {
            tracing::info!("APT sources already name {}; resuming the upgrade", next);
            return Ok(());
        }
        Err(ProvisionError::config_write(format!(
            "no APT source mentions {} or {}; nothing to upgrade",
            current, next
        )))
    }

    fn install(&self, ctx: &Context<'_>, _work: &mut Workspace) -> Result<()> {
        apt::update(ctx)?;
        apt::upgrade_minimal(ctx)?;
        apt::full_upgrade(ctx)?;
        apt::autoremove(ctx)
    }

    fn verify(&self, ctx: &Context<'_>, _work: &Workspace) -> Result<Vec<String>> {
        let (_, next) = self.releases(ctx)?;
        let os = OsRelease::load(&ctx.root)?;
        match os.upstream_codename.as_deref() {
            Some(codename) if codename == next => Ok(vec![format!(
                "{} installed; reboot to finish the upgrade",
                os.display_name()
            )]),
            other => Err(ProvisionError::verification(format!(
                "os-release reports {} after upgrading to {}",
                other.unwrap_or("no codename"),
                next
            ))),
        }
    }
}
