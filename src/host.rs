//! Host environment detection
//!
//! Collects the facts every step needs (architecture, OS release, privilege
//! level, network reachability) exactly once at startup. The result is an
//! immutable `HostFacts` value threaded through the pipeline.
//!
//! # Design
//!
//! - **Read once**: `/etc/os-release` is parsed here and nowhere else
//! - **Bounded check**: network reachability is a single TCP connect with a
//!   timeout, the only bounded wait in the tool
//! - **No `unwrap()`**: detection failures become `ProvisionError`s or safe
//!   defaults (`Offline`, `Unprivileged`)

use std::fmt;
use std::fs;
use std::net::{TcpStream, ToSocketAddrs};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{ProvisionError, Result};
use crate::runner::{CommandRunner, SystemCommand};
use crate::types::{Architecture, OsFamily, Privilege};

/// Network connectivity state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkState {
    /// TCP connection to the connect address succeeded
    Online,
    /// TCP connection failed or timed out
    Offline,
}

impl NetworkState {
    /// Returns true if network connectivity is available.
    pub fn is_online(self) -> bool {
        matches!(self, Self::Online)
    }
}

impl fmt::Display for NetworkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Online => write!(f, "online"),
            Self::Offline => write!(f, "offline"),
        }
    }
}

/// Parsed `/etc/os-release`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OsRelease {
    pub id: String,
    pub id_like: Vec<String>,
    pub version_id: Option<String>,
    /// Distribution codename (`VERSION_CODENAME`), used for display and
    /// platform classification
    pub codename: Option<String>,
    /// Codename of the Debian or Ubuntu release the distribution is built
    /// on; the one upstream APT repositories publish suites for
    pub upstream_codename: Option<String>,
    pub pretty_name: Option<String>,
}

impl OsRelease {
    /// Parse the `KEY=value` format of os-release(5).
    pub fn parse(content: &str) -> Self {
        let mut release = Self::default();
        let mut ubuntu_codename = None;
        let mut debian_codename = None;
        let mut version = None;

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let value = unquote(value);
            match key {
                "ID" => release.id = value.to_lowercase(),
                "ID_LIKE" => {
                    release.id_like = value.split_whitespace().map(str::to_lowercase).collect()
                }
                "VERSION_ID" => release.version_id = Some(value),
                "VERSION_CODENAME" if !value.is_empty() => release.codename = Some(value),
                "UBUNTU_CODENAME" if !value.is_empty() => ubuntu_codename = Some(value),
                "DEBIAN_CODENAME" if !value.is_empty() => debian_codename = Some(value),
                "VERSION" => version = Some(value),
                "PRETTY_NAME" => release.pretty_name = Some(value),
                _ => {}
            }
        }

        // Older Debian releases only carry the codename inside VERSION="10 (buster)"
        if release.codename.is_none() {
            release.codename = ubuntu_codename.clone().or_else(|| {
                version.as_deref().and_then(|v| {
                    let start = v.find('(')?;
                    let end = v[start..].find(')')? + start;
                    let inner = v[start + 1..end].trim();
                    inner.split_whitespace().next().map(str::to_lowercase)
                })
            });
        }

        // Derivatives (Mint, LMDE, ...) name their own releases; repositories
        // only know the Ubuntu or Debian codename underneath
        let derived = match release.family() {
            Some(family) if family.to_string() != release.id => match family {
                OsFamily::Ubuntu => ubuntu_codename,
                OsFamily::Debian => debian_codename,
            },
            _ => None,
        };
        release.upstream_codename = derived.or_else(|| release.codename.clone());

        release
    }

    /// Read and parse `<root>/etc/os-release`.
    pub fn load(root: &Path) -> Result<Self> {
        let path = root.join("etc/os-release");
        let content = fs::read_to_string(&path).map_err(|e| {
            ProvisionError::unsupported(format!("cannot read {}: {}", path.display(), e))
        })?;
        Ok(Self::parse(&content))
    }

    /// Distribution family from `ID`, falling back to `ID_LIKE` in order.
    pub fn family(&self) -> Option<OsFamily> {
        std::iter::once(&self.id)
            .chain(self.id_like.iter())
            .find_map(|id| OsFamily::from_str(id).ok())
    }

    pub fn display_name(&self) -> String {
        self.pretty_name.clone().unwrap_or_else(|| {
            format!(
                "{} {}",
                self.id,
                self.version_id.as_deref().unwrap_or("(unknown version)")
            )
        })
    }
}

fn unquote(value: &str) -> String {
    let value = value.trim();
    let stripped = value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
        .unwrap_or(value);
    stripped.to_string()
}

/// Runtime-discovered environment values, computed once per run.
#[derive(Debug, Clone)]
pub struct HostFacts {
    pub arch: Architecture,
    pub os: OsRelease,
    pub privilege: Privilege,
    pub network: NetworkState,
}

impl HostFacts {
    /// Detect all host facts.
    ///
    /// Fails only when the OS release or architecture cannot be identified;
    /// privilege and network fall back to their restrictive values.
    pub fn detect(
        root: &Path,
        runner: &dyn CommandRunner,
        connect_addr: &str,
        connect_timeout: Duration,
    ) -> Result<Self> {
        let os = OsRelease::load(root)?;
        let arch = Architecture::detect().ok_or_else(|| {
            ProvisionError::unsupported(format!(
                "unsupported CPU architecture: {}",
                std::env::consts::ARCH
            ))
        })?;
        let privilege = detect_privilege(runner);
        let network = detect_network(connect_addr, connect_timeout);

        let facts = Self {
            arch,
            os,
            privilege,
            network,
        };
        tracing::info!("Host facts: {}", facts);
        Ok(facts)
    }

    pub fn codename(&self) -> Option<&str> {
        self.os.codename.as_deref()
    }

    pub fn family(&self) -> Option<OsFamily> {
        self.os.family()
    }

    /// Codename for APT suites: the upstream release on derivatives.
    pub fn suite_codename(&self) -> Option<&str> {
        self.os.upstream_codename.as_deref()
    }

    /// Suite codename or an error naming the missing value.
    pub fn require_suite_codename(&self) -> Result<&str> {
        self.suite_codename().ok_or_else(|| {
            ProvisionError::unsupported(format!(
                "{} does not report the Debian or Ubuntu release it is based on",
                self.os.display_name()
            ))
        })
    }

    /// Family or an error naming the unsupported distribution.
    pub fn require_family(&self) -> Result<OsFamily> {
        self.family().ok_or_else(|| {
            ProvisionError::unsupported(format!(
                "{} is not a Debian or Ubuntu system",
                self.os.display_name()
            ))
        })
    }
}

impl fmt::Display for HostFacts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "os={} codename={} arch={} privilege={} network={}",
            self.os.id,
            self.codename().unwrap_or("-"),
            self.arch,
            self.privilege,
            self.network
        )
    }
}

// ============================================================================
// Detection Functions
// ============================================================================

/// Root when EUID is 0, otherwise ask sudo non-interactively.
pub fn detect_privilege(runner: &dyn CommandRunner) -> Privilege {
    if nix::unistd::geteuid().is_root() {
        return Privilege::Root;
    }

    let check = SystemCommand::new("sudo").args(["-n", "true"]);
    match runner.run(&check) {
        Ok(output) if output.success => Privilege::Sudoer,
        Ok(_) => Privilege::Unprivileged,
        Err(e) => {
            tracing::debug!("sudo -n check failed: {}", e);
            Privilege::Unprivileged
        }
    }
}

/// Detect network connectivity via a TCP connection to `connect_addr`.
///
/// Returns `Offline` if resolution fails, every address refuses or the
/// connect exceeds `timeout`.
pub fn detect_network(connect_addr: &str, timeout: Duration) -> NetworkState {
    let addrs = match connect_addr.to_socket_addrs() {
        Ok(addrs) => addrs,
        Err(e) => {
            tracing::warn!("Cannot resolve connect address {}: {}", connect_addr, e);
            return NetworkState::Offline;
        }
    };

    for addr in addrs {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(_stream) => {
                tracing::debug!("Network connectivity confirmed via {}", addr);
                return NetworkState::Online;
            }
            Err(e) => tracing::debug!("Network check to {} failed: {}", addr, e),
        }
    }

    tracing::warn!("Network check to {} failed", connect_addr);
    NetworkState::Offline
}

// ============================================================================
// Tests
// ============================================================================
