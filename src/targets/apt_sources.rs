//! Switch the distribution's APT sources to a mirror.
//!
//! Writes a deb822 `debian.sources` or `ubuntu.sources` pointing at the
//! mirror and moves a legacy `/etc/apt/sources.list` aside to
//! `sources.list.bak` so the two do not overlap. A differing
//! `<family>.sources` is kept as `<family>.sources.bak`.

use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use crate::apt;
use crate::context::Context;
use crate::error::{ProvisionError, Result};
use crate::pipeline::Workspace;
use crate::render::{self, ConfigFile, Deb822Source, SourcesFile, WriteMode};
use crate::target::{Platform, Target, TargetDescriptor};
use crate::types::{Architecture, OsFamily, PrivilegeRequirement};
use crate::verify;

pub const DESCRIPTOR: TargetDescriptor = TargetDescriptor {
    name: "apt-sources",
    summary: "Switch APT sources to a given mirror",
    privilege: PrivilegeRequirement::Root,
    needs_network: true,
    platform: Platform::DEBIAN_AND_UBUNTU,
    dependencies: &[],
    service: None,
};

pub const SOURCES_LIST: &str = "/etc/apt/sources.list";
const DEBIAN_KEYRING: &str = "/usr/share/keyrings/debian-archive-keyring.gpg";
const UBUNTU_KEYRING: &str = "/usr/share/keyrings/ubuntu-archive-keyring.gpg";
const DEBIAN_SECURITY: &str = "http://security.debian.org/debian-security";

pub fn sources_path(family: OsFamily) -> String {
    format!("/etc/apt/sources.list.d/{}.sources", family)
}

/// Debian archive components for `codename`; `non-free-firmware` exists
/// from bookworm on.
fn debian_components(codename: &str) -> &'static [&'static str] {
    match codename {
        "buster" | "bullseye" => &["main", "contrib", "non-free"],
        _ => &["main", "contrib", "non-free", "non-free-firmware"],
    }
}

/// Render the sources file for `family` on `mirror`.
pub fn sources(family: OsFamily, codename: &str, arch: Architecture, mirror: &str) -> SourcesFile {
    let mirror = mirror.trim_end_matches('/');
    let updates = format!("{}-updates", codename);
    let security = format!("{}-security", codename);

    match family {
        OsFamily::Debian => {
            let components = debian_components(codename);
            let security_uri = match mirror.strip_suffix("/debian") {
                Some(base) => format!("{}/debian-security", base),
                None => DEBIAN_SECURITY.to_string(),
            };
            SourcesFile {
                stanzas: vec![
                    Deb822Source::deb(mirror, &[codename, updates.as_str()], components)
                        .signed_by(Path::new(DEBIAN_KEYRING)),
                    Deb822Source::deb(&security_uri, &[security.as_str()], components)
                        .signed_by(Path::new(DEBIAN_KEYRING)),
                ],
            }
        }
        OsFamily::Ubuntu => {
            // Non-x86 architectures live in the ubuntu-ports archive
            let mirror = match (arch, mirror.strip_suffix("/ubuntu")) {
                (Architecture::Amd64 | Architecture::I386, _) | (_, None) => mirror.to_string(),
                (_, Some(base)) => format!("{}/ubuntu-ports", base),
            };
            let backports = format!("{}-backports", codename);
            let components = &["main", "restricted", "universe", "multiverse"];
            SourcesFile {
                stanzas: vec![
                    Deb822Source::deb(
                        &mirror,
                        &[codename, updates.as_str(), backports.as_str()],
                        components,
                    )
                    .signed_by(Path::new(UBUNTU_KEYRING)),
                    Deb822Source::deb(&mirror, &[security.as_str()], components)
                        .signed_by(Path::new(UBUNTU_KEYRING)),
                ],
            }
        }
    }
}

/// Copy `path` to `<path>.bak` unless it is absent or already holds `rendered`.
fn back_up_if_changed(ctx: &Context<'_>, path: &Path, rendered: &str) -> Result<()> {
    let write_err =
        |e: std::io::Error| ProvisionError::config_write(format!("{}: {}", path.display(), e));
    let current = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(write_err(e)),
    };
    if current == rendered.as_bytes() {
        return Ok(());
    }

    let mut backup = path.as_os_str().to_owned();
    backup.push(".bak");
    ctx.write_file(Path::new(&backup), &current).map_err(write_err)?;
    tracing::info!("Saved previous {} as {}", path.display(), Path::new(&backup).display());
    Ok(())
}

pub struct AptSources {
    pub mirror: String,
}

impl Target for AptSources {
    fn descriptor(&self) -> &TargetDescriptor {
        &DESCRIPTOR
    }

    fn check(&self, _ctx: &Context<'_>) -> Result<()> {
        if !(self.mirror.starts_with("http://") || self.mirror.starts_with("https://")) {
            return Err(ProvisionError::invalid_argument(format!(
                "mirror must be an http(s) URL, got '{}'",
                self.mirror
            )));
        }
        Ok(())
    }

    fn configure(&self, ctx: &Context<'_>, _work: &mut Workspace) -> Result<()> {
        let family = ctx.facts.require_family()?;
        let codename = ctx.facts.require_suite_codename()?;
        let file = sources(family, codename, ctx.facts.arch, &self.mirror);
        let path = ctx.path(&sources_path(family));
        back_up_if_changed(ctx, &path, &file.render())?;
        render::write_config(ctx, &path, &file, WriteMode::Overwrite)?;

        let legacy = ctx.path(SOURCES_LIST);
        let has_entries = fs::read_to_string(&legacy)
            .map(|text| {
                text.lines()
                    .any(|line| !line.trim().is_empty() && !line.trim_start().starts_with('#'))
            })
            .unwrap_or(false);
        if has_entries {
            let mut backup = legacy.as_os_str().to_owned();
            backup.push(".bak");
            ctx.rename(&legacy, Path::new(&backup))
                .map_err(|e| ProvisionError::config_write(format!("{}: {}", legacy.display(), e)))?;
            tracing::info!("Moved {} to {}.bak", SOURCES_LIST, SOURCES_LIST);
        }
        Ok(())
    }

    fn install(&self, ctx: &Context<'_>, _work: &mut Workspace) -> Result<()> {
        apt::update(ctx)
    }

    fn verify(&self, ctx: &Context<'_>, _work: &Workspace) -> Result<Vec<String>> {
        let family = ctx.facts.require_family()?;
        let path = sources_path(family);
        let mirror = self.mirror.trim_end_matches('/');
        let host = mirror
            .split("://")
            .nth(1)
            .and_then(|rest| rest.split('/').next())
            .unwrap_or(mirror);
        verify::file_contains(&ctx.path(&path), host)?;
        Ok(vec![format!("{} -> {}", path, mirror)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::tests::context;
    use crate::fetch::tests::StubHttp;
    use crate::host::OsRelease;
    use crate::runner::RecordingRunner;

    #[test]
    fn test_debian_sources_derive_security_mirror() {
        let text = sources(
            OsFamily::Debian,
            "bookworm",
            Architecture::Amd64,
            "https://mirrors.example.org/debian/",
        )
        .render();
        assert!(text.contains("URIs: https://mirrors.example.org/debian\nSuites: bookworm bookworm-updates\n"));
        assert!(text.contains("URIs: https://mirrors.example.org/debian-security\nSuites: bookworm-security\n"));
        assert!(text.contains("Components: main contrib non-free non-free-firmware\n"));
    }

    #[test]
    fn test_bullseye_has_no_firmware_component() {
        let text = sources(OsFamily::Debian, "bullseye", Architecture::Amd64, "http://m.example/debian")
            .render();
        assert!(!text.contains("non-free-firmware"));
    }

    #[test]
    fn test_ubuntu_ports_on_arm() {
        let text = sources(OsFamily::Ubuntu, "noble", Architecture::Arm64, "http://m.example/ubuntu")
            .render();
        assert!(text.contains("URIs: http://m.example/ubuntu-ports\n"));
        assert!(text.contains("Suites: noble noble-updates noble-backports\n"));
        let amd = sources(OsFamily::Ubuntu, "noble", Architecture::Amd64, "http://m.example/ubuntu")
            .render();
        assert!(amd.contains("URIs: http://m.example/ubuntu\n"));
    }

    #[test]
    fn test_configure_moves_legacy_list_aside() {
        let dir = tempfile::tempdir().unwrap();
        let runner = RecordingRunner::new();
        let http = StubHttp::default();
        let ctx = context(dir.path(), &runner, &http);
        let legacy = ctx.path(SOURCES_LIST);
        fs::create_dir_all(legacy.parent().unwrap()).unwrap();
        fs::write(&legacy, "deb http://deb.debian.org/debian bookworm main\n").unwrap();

        let target = AptSources {
            mirror: "https://mirrors.example.org/debian".to_string(),
        };
        let mut work = Workspace::new().unwrap();
        target.configure(&ctx, &mut work).unwrap();

        assert!(!legacy.exists());
        assert!(ctx.path("/etc/apt/sources.list.bak").is_file());
        let details = target.verify(&ctx, &work).unwrap();
        assert_eq!(
            details,
            vec!["/etc/apt/sources.list.d/debian.sources -> https://mirrors.example.org/debian"]
        );
    }

    #[test]
    fn test_mirror_must_be_url() {
        let dir = tempfile::tempdir().unwrap();
        let runner = RecordingRunner::new();
        let http = StubHttp::default();
        let ctx = context(dir.path(), &runner, &http);
        let target = AptSources {
            mirror: "mirrors.example.org".to_string(),
        };
        let err = target.check(&ctx).unwrap_err();
        assert!(matches!(err, ProvisionError::InvalidArgument(_)));
        assert_eq!(err.step().to_string(), "preflight");
    }

    #[test]
    fn test_existing_family_sources_are_backed_up() {
        let dir = tempfile::tempdir().unwrap();
        let runner = RecordingRunner::new();
        let http = StubHttp::default();
        let ctx = context(dir.path(), &runner, &http);
        let current = ctx.path("/etc/apt/sources.list.d/debian.sources");
        fs::create_dir_all(current.parent().unwrap()).unwrap();
        let original = "Types: deb\nURIs: http://deb.debian.org/debian\nSuites: bookworm\nComponents: main\n";
        fs::write(&current, original).unwrap();

        let target = AptSources {
            mirror: "https://mirrors.example.org/debian".to_string(),
        };
        let mut work = Workspace::new().unwrap();
        target.configure(&ctx, &mut work).unwrap();

        let backup = ctx.path("/etc/apt/sources.list.d/debian.sources.bak");
        assert_eq!(fs::read_to_string(&backup).unwrap(), original);
        assert!(fs::read_to_string(&current).unwrap().contains("mirrors.example.org"));

        // Re-running with the same mirror leaves the backup alone
        target.configure(&ctx, &mut work).unwrap();
        assert_eq!(fs::read_to_string(&backup).unwrap(), original);
    }

    #[test]
    fn test_derivative_writes_upstream_suites() {
        let dir = tempfile::tempdir().unwrap();
        let runner = RecordingRunner::new();
        let http = StubHttp::default();
        let mut ctx = context(dir.path(), &runner, &http);
        ctx.facts.os = OsRelease::parse(
            "ID=linuxmint\nID_LIKE=\"ubuntu debian\"\nVERSION_CODENAME=virginia\nUBUNTU_CODENAME=jammy\n",
        );
        let target = AptSources {
            mirror: "http://m.example/ubuntu".to_string(),
        };
        let mut work = Workspace::new().unwrap();
        target.configure(&ctx, &mut work).unwrap();

        let text = fs::read_to_string(ctx.path("/etc/apt/sources.list.d/ubuntu.sources")).unwrap();
        assert!(text.contains("Suites: jammy jammy-updates jammy-backports\n"));
        assert!(text.contains("Suites: jammy-security\n"));
        assert!(!text.contains("virginia"));
    }
}
