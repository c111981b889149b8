//! Artifact fetching
//!
//! Resolves release assets from the GitHub releases API, downloads them into
//! the run's scratch workspace, checks published checksums and unpacks
//! archives. Also installs APT signing keys.
//!
//! # Error policy
//!
//! - API unreachable → `NetworkUnreachable`
//! - release missing or no asset matches the filter → `ArtifactResolution`
//! - download or unpack failure → `ArtifactDownload`
//! - checksum mismatch → `ArtifactIntegrity`
//!
//! # Asset selection
//!
//! Assets are matched by substring. When several match, the first one in the
//! API's listing order wins and the others are logged. Checksum companions
//! (`sha256sums.txt`, `*.dgst`, `*.sha256`) never count as matches.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::context::Context;
use crate::error::{ProvisionError, Result};
use crate::pipeline::{Artifact, Workspace};
use crate::runner::SystemCommand;
use crate::settings::Settings;
use crate::types::Architecture;

/// Failure of a single HTTP exchange.
#[derive(Debug, Error)]
pub enum HttpError {
    #[error("request to {url} failed: {reason}")]
    Transport { url: String, reason: String },
    #[error("HTTP {status} from {url}")]
    Status { url: String, status: u16 },
    #[error("cannot write download: {0}")]
    Io(#[from] io::Error),
}

/// Seam between the fetcher and the network.
pub trait HttpClient {
    fn get_text(&self, url: &str) -> std::result::Result<String, HttpError>;

    /// Stream `url` into `dest`, returning the byte count.
    fn download(&self, url: &str, dest: &Path) -> std::result::Result<u64, HttpError>;
}

/// Blocking reqwest client.
///
/// No overall timeout is set: large downloads block for as long as the server
/// keeps sending. Only connecting is bounded.
pub struct ReqwestClient {
    client: reqwest::blocking::Client,
    api_base: String,
    token: Option<String>,
}

impl ReqwestClient {
    pub fn new(settings: &Settings) -> anyhow::Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(concat!("debprov/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(30))
            .timeout(None::<Duration>)
            .build()?;
        Ok(Self {
            client,
            api_base: settings.github_api_base().to_string(),
            token: settings.github_token.clone(),
        })
    }

    fn get(&self, url: &str) -> std::result::Result<reqwest::blocking::Response, HttpError> {
        let mut request = self.client.get(url);
        if url.starts_with(&self.api_base) {
            request = request.header("Accept", "application/vnd.github+json");
            if let Some(token) = &self.token {
                request = request.bearer_auth(token);
            }
        }

        let response = request.send().map_err(|e| HttpError::Transport {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        if !response.status().is_success() {
            return Err(HttpError::Status {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }
        Ok(response)
    }
}

impl HttpClient for ReqwestClient {
    fn get_text(&self, url: &str) -> std::result::Result<String, HttpError> {
        self.get(url)?.text().map_err(|e| HttpError::Transport {
            url: url.to_string(),
            reason: e.to_string(),
        })
    }

    fn download(&self, url: &str, dest: &Path) -> std::result::Result<u64, HttpError> {
        let mut response = self.get(url)?;
        let mut file = File::create(dest)?;
        response.copy_to(&mut file).map_err(|e| HttpError::Transport {
            url: url.to_string(),
            reason: e.to_string(),
        })
    }
}

// ============================================================================
// Release resolution
// ============================================================================

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Release {
    pub tag_name: String,
    #[serde(default)]
    pub assets: Vec<Asset>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Asset {
    pub name: String,
    pub browser_download_url: String,
}

impl Release {
    /// Tag without a leading `v`.
    pub fn version(&self) -> &str {
        self.tag_name.strip_prefix('v').unwrap_or(&self.tag_name)
    }

    pub fn asset(&self, name: &str) -> Option<&Asset> {
        self.assets.iter().find(|a| a.name == name)
    }
}

/// How a release publishes checksums for its assets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Integrity {
    None,
    /// One `<hex>  <file>` list covering every asset
    Sha256Sums(&'static str),
    /// A `<asset>.dgst` companion per asset
    Dgst,
}

/// Naming scheme for the `{arch}` placeholder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchStyle {
    Go,
    Xray,
}

/// Where a target's binary release comes from.
#[derive(Debug, Clone, Copy)]
pub struct ReleaseSpec {
    /// GitHub `owner/repo`
    pub repo: &'static str,
    /// Substring filter with an `{arch}` placeholder
    pub asset_pattern: &'static str,
    pub arch_style: ArchStyle,
    pub integrity: Integrity,
}

impl ReleaseSpec {
    pub fn asset_filter(&self, arch: Architecture) -> String {
        let name = match self.arch_style {
            ArchStyle::Go => arch.go_name(),
            ArchStyle::Xray => arch.xray_name(),
        };
        self.asset_pattern.replace("{arch}", name)
    }
}

fn is_checksum_name(name: &str) -> bool {
    let lower = name.to_lowercase();
    lower.ends_with(".dgst")
        || lower.ends_with(".sha256")
        || lower.ends_with(".sha256sum")
        || lower.contains("sha256sums")
        || lower.ends_with(".asc")
        || lower.ends_with(".sig")
}

/// Query the latest release of `repo`.
pub fn latest_release(ctx: &Context<'_>, repo: &str) -> Result<Release> {
    let url = format!("{}/repos/{}/releases/latest", ctx.settings.github_api_base(), repo);
    tracing::info!("Querying latest release of {}", repo);

    let body = ctx.http.get_text(&url).map_err(|e| match e {
        HttpError::Status { status: 404, .. } => {
            ProvisionError::resolution(format!("{} has no published release", repo))
        }
        HttpError::Status { status, .. } => ProvisionError::resolution(format!(
            "release query for {} returned HTTP {}",
            repo, status
        )),
        other => ProvisionError::network(other.to_string()),
    })?;

    serde_json::from_str(&body).map_err(|e| {
        ProvisionError::resolution(format!("unexpected release listing for {}: {}", repo, e))
    })
}

/// Pick the asset whose name contains `filter`; first match wins.
pub fn select_asset<'r>(release: &'r Release, filter: &str) -> Result<&'r Asset> {
    let matches: Vec<&Asset> = release
        .assets
        .iter()
        .filter(|a| a.name.contains(filter) && !is_checksum_name(&a.name))
        .collect();

    match matches.as_slice() {
        [] => Err(ProvisionError::resolution(format!(
            "no asset in release {} matches '{}' (available: {})",
            release.tag_name,
            filter,
            if release.assets.is_empty() {
                "none".to_string()
            } else {
                release
                    .assets
                    .iter()
                    .map(|a| a.name.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            }
        ))),
        [only] => Ok(only),
        [first, rest @ ..] => {
            tracing::warn!(
                "{} assets match '{}'; using {} and ignoring {}",
                matches.len(),
                filter,
                first.name,
                rest.iter().map(|a| a.name.as_str()).collect::<Vec<_>>().join(", ")
            );
            Ok(first)
        }
    }
}

/// Resolve, download and check the asset described by `spec`.
pub fn fetch_release(ctx: &Context<'_>, work: &mut Workspace, spec: &ReleaseSpec) -> Result<()> {
    let release = latest_release(ctx, spec.repo)?;
    let filter = spec.asset_filter(ctx.facts.arch);
    let asset = select_asset(&release, &filter)?;
    tracing::info!("Resolved {} {} -> {}", spec.repo, release.tag_name, asset.name);

    let path = work.path().join(&asset.name);
    if ctx.dry_run {
        tracing::info!("[dry-run] would download {}", asset.browser_download_url);
    } else {
        download(ctx, &asset.browser_download_url, &path)?;
        verify_integrity(ctx, &release, asset, &path, spec.integrity)?;
    }

    work.artifact = Some(Artifact {
        path,
        name: asset.name.clone(),
        version: release.version().to_string(),
    });
    Ok(())
}

/// Download `url` to `dest`.
pub fn download(ctx: &Context<'_>, url: &str, dest: &Path) -> Result<u64> {
    tracing::info!("Downloading {}", url);
    let bytes = ctx
        .http
        .download(url, dest)
        .map_err(|e| ProvisionError::download(e.to_string()))?;
    tracing::debug!("Downloaded {} bytes to {}", bytes, dest.display());
    Ok(bytes)
}

// ============================================================================
// Integrity
// ============================================================================

pub fn sha256_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(format!("{:x}", hasher.finalize()))
}

/// Digest for `file_name` in a `sha256sum` style listing.
pub fn parse_sha256sums(listing: &str, file_name: &str) -> Option<String> {
    listing.lines().find_map(|line| {
        let mut parts = line.split_whitespace();
        let digest = parts.next()?;
        let name = parts.next()?.trim_start_matches('*');
        (name == file_name).then(|| digest.to_lowercase())
    })
}

/// SHA-256 digest from an OpenSSL style `.dgst` file.
pub fn parse_dgst(content: &str) -> Option<String> {
    content.lines().find_map(|line| {
        let line = line.trim();
        if !(line.starts_with("SHA2-256") || line.starts_with("SHA256")) {
            return None;
        }
        let digest = line.rsplit('=').next()?.trim();
        (digest.len() == 64 && digest.chars().all(|c| c.is_ascii_hexdigit()))
            .then(|| digest.to_lowercase())
    })
}

fn verify_integrity(
    ctx: &Context<'_>,
    release: &Release,
    asset: &Asset,
    path: &Path,
    integrity: Integrity,
) -> Result<()> {
    let companion = match integrity {
        Integrity::None => {
            tracing::warn!("{} publishes no checksum; skipping integrity check", asset.name);
            return Ok(());
        }
        Integrity::Sha256Sums(list) => list.to_string(),
        Integrity::Dgst => format!("{}.dgst", asset.name),
    };

    let Some(checksum_asset) = release.asset(&companion) else {
        tracing::warn!(
            "Release {} has no {}; skipping integrity check",
            release.tag_name,
            companion
        );
        return Ok(());
    };

    let text = ctx
        .http
        .get_text(&checksum_asset.browser_download_url)
        .map_err(|e| ProvisionError::download(e.to_string()))?;
    let expected = match integrity {
        Integrity::Sha256Sums(_) => parse_sha256sums(&text, &asset.name),
        _ => parse_dgst(&text),
    }
    .ok_or_else(|| {
        ProvisionError::integrity(format!("{} lists no SHA-256 for {}", companion, asset.name))
    })?;
    let actual = sha256_file(path)
        .map_err(|e| ProvisionError::download(format!("cannot hash {}: {}", path.display(), e)))?;

    if actual != expected {
        return Err(ProvisionError::integrity(format!(
            "{}: expected sha256 {}, got {}",
            asset.name, expected, actual
        )));
    }
    tracing::info!("Checksum verified for {}", asset.name);
    Ok(())
}

// ============================================================================
// Archives
// ============================================================================

/// Unpack the workspace artifact into `<workspace>/extract`.
pub fn extract(ctx: &Context<'_>, work: &mut Workspace) -> Result<PathBuf> {
    let artifact = work
        .artifact
        .as_ref()
        .ok_or_else(|| ProvisionError::download("nothing was downloaded to extract"))?;
    let dest = work.path().join("extract");
    fs::create_dir_all(&dest)
        .map_err(|e| ProvisionError::download(format!("cannot create {}: {}", dest.display(), e)))?;

    let archive = artifact.path.display().to_string();
    let target = dest.display().to_string();
    let cmd = if artifact.name.ends_with(".tar.gz") || artifact.name.ends_with(".tgz") {
        SystemCommand::new("tar").args(["-xzf", &archive, "-C", &target])
    } else if artifact.name.ends_with(".zip") {
        SystemCommand::new("unzip").args(["-o", "-q", &archive, "-d", &target])
    } else {
        return Err(ProvisionError::download(format!(
            "unknown archive format: {}",
            artifact.name
        )));
    };

    let output = ctx
        .run(&cmd)
        .map_err(|e| ProvisionError::download(format!("cannot run {}: {}", cmd.program, e)))?;
    if !output.success {
        return Err(ProvisionError::download(format!(
            "unpacking {} failed ({})",
            artifact.name,
            output.failure_reason()
        )));
    }

    work.extracted = Some(dest.clone());
    Ok(dest)
}

/// Locate `file_name` anywhere below the extraction directory.
pub fn find_extracted(ctx: &Context<'_>, work: &Workspace, file_name: &str) -> Result<PathBuf> {
    let dir = work
        .extracted
        .as_ref()
        .ok_or_else(|| ProvisionError::download("archive was not extracted"))?;
    if ctx.dry_run {
        return Ok(dir.join(file_name));
    }
    find_file(dir, file_name)
        .map_err(|e| ProvisionError::download(format!("cannot search {}: {}", dir.display(), e)))?
        .ok_or_else(|| {
            ProvisionError::download(format!("archive does not contain {}", file_name))
        })
}

fn find_file(dir: &Path, file_name: &str) -> io::Result<Option<PathBuf>> {
    let mut entries = fs::read_dir(dir)?.collect::<io::Result<Vec<_>>>()?;
    entries.sort_by_key(|e| e.file_name());
    for entry in entries {
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            if let Some(found) = find_file(&path, file_name)? {
                return Ok(Some(found));
            }
        } else if entry.file_name() == file_name {
            return Ok(Some(path));
        }
    }
    Ok(None)
}

// ============================================================================
// Signing keys
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyFormat {
    /// Already a binary keyring
    Binary,
    /// ASCII armored, converted with `gpg --dearmor`
    Armored,
}

/// Download a repository signing key and install it at `dest` (mode 0644).
pub fn install_signing_key(
    ctx: &Context<'_>,
    work: &Workspace,
    url: &str,
    dest: &Path,
    format: KeyFormat,
) -> Result<()> {
    let file_name = url.rsplit('/').next().unwrap_or("signing.key");
    let scratch = work.path().join(file_name);
    if ctx.dry_run {
        tracing::info!("[dry-run] would download {}", url);
    } else {
        download(ctx, url, &scratch)?;
    }

    let write_err =
        |e: io::Error| ProvisionError::config_write(format!("cannot install {}: {}", dest.display(), e));

    match format {
        KeyFormat::Binary => ctx.install_file(&scratch, dest).map_err(write_err)?,
        KeyFormat::Armored => {
            if let Some(parent) = dest.parent() {
                ctx.create_dir_all(parent).map_err(write_err)?;
            }
            let cmd = SystemCommand::new("gpg").args([
                "--dearmor".to_string(),
                "--yes".to_string(),
                "-o".to_string(),
                dest.display().to_string(),
                scratch.display().to_string(),
            ]);
            let output = ctx
                .run(&cmd)
                .map_err(|e| ProvisionError::config_write(format!("cannot run gpg: {}", e)))?;
            if !output.success {
                return Err(ProvisionError::config_write(format!(
                    "gpg --dearmor {} failed ({})",
                    file_name,
                    output.failure_reason()
                )));
            }
            ctx.set_mode(dest, 0o644).map_err(write_err)?;
        }
    }

    tracing::info!("Installed signing key {}", dest.display());
    Ok(())
}
