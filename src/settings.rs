//! Settings file handling.
//!
//! Settings are optional: without a file every field has a working default.
//! A file given with `--config` must exist; the system-wide file
//! `/etc/debprov/config.json` is read only when present.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// System-wide settings file, relative to the filesystem root.
pub const SYSTEM_SETTINGS_PATH: &str = "etc/debprov/config.json";

/// Environment variable overriding `github_api`.
pub const GITHUB_API_ENV: &str = "DEBPROV_GITHUB_API";

/// Tunables shared by all targets
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Base URL of the GitHub REST API (release listings)
    pub github_api: String,
    /// Optional token for GitHub API rate limits
    pub github_token: Option<String>,
    /// `host:port` used for the network reachability check
    pub connect_addr: String,
    pub connect_timeout_secs: u64,
    /// How often `systemctl is-active` is polled after activation
    pub service_poll_attempts: u32,
    pub service_poll_interval_ms: u64,
    /// Written to `/etc/sysctl.d/99-swapfile.conf` by the swapfile target
    pub swappiness: u8,
    pub vfs_cache_pressure: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            github_api: "https://api.github.com".to_string(),
            github_token: None,
            connect_addr: "api.github.com:443".to_string(),
            connect_timeout_secs: 5,
            service_poll_attempts: 10,
            service_poll_interval_ms: 500,
            swappiness: 10,
            vfs_cache_pressure: 50,
        }
    }
}

impl Settings {
    /// Load settings from a JSON file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read settings from {:?}", path.as_ref()))?;

        let settings: Self = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse settings JSON in {:?}", path.as_ref()))?;

        Ok(settings)
    }

    /// Resolve the effective settings.
    ///
    /// `explicit` must exist when given. Otherwise the system file under `root`
    /// is used if present. The environment override is applied last.
    pub fn resolve(explicit: Option<&Path>, root: &Path) -> Result<Self> {
        let mut settings = match explicit {
            Some(path) => Self::load_from_file(path)?,
            None => {
                let system = root.join(SYSTEM_SETTINGS_PATH);
                if system.exists() {
                    tracing::debug!("Loading settings from {}", system.display());
                    Self::load_from_file(&system)?
                } else {
                    Self::default()
                }
            }
        };

        if let Ok(api) = std::env::var(GITHUB_API_ENV) {
            if !api.trim().is_empty() {
                settings.github_api = api.trim().to_string();
            }
        }

        settings.validate()?;
        Ok(settings)
    }

    /// Validate the settings
    pub fn validate(&self) -> Result<()> {
        let api = self.github_api.trim();
        if !api.starts_with("http://") && !api.starts_with("https://") {
            anyhow::bail!("github_api must start with http:// or https://");
        }

        match self.connect_addr.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => {}
            _ => anyhow::bail!("connect_addr must be host:port, got '{}'", self.connect_addr),
        }

        if self.connect_timeout_secs == 0 {
            anyhow::bail!("connect_timeout_secs must be greater than zero");
        }
        if self.service_poll_attempts == 0 {
            anyhow::bail!("service_poll_attempts must be greater than zero");
        }
        if self.swappiness > 100 {
            anyhow::bail!("swappiness must be between 0 and 100");
        }

        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn service_poll_interval(&self) -> Duration {
        Duration::from_millis(self.service_poll_interval_ms)
    }

    /// API base without a trailing slash.
    pub fn github_api_base(&self) -> &str {
        self.github_api.trim().trim_end_matches('/')
    }
}
