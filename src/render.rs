//! Typed configuration files and the validating writer.
//!
//! Each file format is a plain struct whose `render` is a pure function of
//! its fields, so the same inputs always produce byte-identical output.
//! `write_config` writes the rendered text, reads it back, and checks that
//! every required field survived.

use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use serde::Serialize;

use crate::context::Context;
use crate::error::{ProvisionError, Result};

/// A configuration file that can render itself.
pub trait ConfigFile {
    fn render(&self) -> String;

    /// Substrings that must be present in the written file.
    fn required_fields(&self) -> Vec<String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Replace the file unless it already has the rendered content
    Overwrite,
    /// Leave an existing file alone (operator-edited configs)
    KeepExisting,
}

/// What `write_config` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Written,
    Unchanged,
    KeptExisting,
}

/// Render `config`, write it to `path`, and validate the result on disk.
pub fn write_config(
    ctx: &Context<'_>,
    path: &Path,
    config: &dyn ConfigFile,
    mode: WriteMode,
) -> Result<WriteOutcome> {
    let rendered = config.render();
    let write_err =
        |e: std::io::Error| ProvisionError::config_write(format!("{}: {}", path.display(), e));

    let existing = fs::read(path).ok();
    let outcome = match (&existing, mode) {
        (Some(_), WriteMode::KeepExisting) => {
            tracing::info!("Keeping existing {}", path.display());
            return Ok(WriteOutcome::KeptExisting);
        }
        (Some(bytes), WriteMode::Overwrite) if bytes == rendered.as_bytes() => {
            tracing::info!("{} is up to date", path.display());
            WriteOutcome::Unchanged
        }
        _ => {
            ctx.write_file(path, rendered.as_bytes()).map_err(write_err)?;
            tracing::info!("Wrote {}", path.display());
            WriteOutcome::Written
        }
    };

    if ctx.dry_run {
        return Ok(outcome);
    }

    let written = fs::read_to_string(path).map_err(write_err)?;
    let missing: Vec<String> = config
        .required_fields()
        .into_iter()
        .filter(|field| !written.contains(field.as_str()))
        .collect();
    if !missing.is_empty() {
        return Err(ProvisionError::config_write(format!(
            "{} is missing required fields: {}",
            path.display(),
            missing.join(", ")
        )));
    }

    Ok(outcome)
}

// ============================================================================
// APT
// ============================================================================

/// One deb822 stanza (sources.list(5), "DEB822-STYLE FORMAT").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deb822Source {
    pub types: Vec<String>,
    pub uris: Vec<String>,
    pub suites: Vec<String>,
    pub components: Vec<String>,
    pub architectures: Vec<String>,
    pub signed_by: Option<String>,
}

impl Deb822Source {
    pub fn deb(uri: &str, suites: &[&str], components: &[&str]) -> Self {
        Self {
            types: vec!["deb".to_string()],
            uris: vec![uri.to_string()],
            suites: suites.iter().map(|s| s.to_string()).collect(),
            components: components.iter().map(|s| s.to_string()).collect(),
            architectures: Vec::new(),
            signed_by: None,
        }
    }

    pub fn signed_by(mut self, keyring: &Path) -> Self {
        self.signed_by = Some(keyring.display().to_string());
        self
    }

    pub fn architecture(mut self, arch: &str) -> Self {
        self.architectures = vec![arch.to_string()];
        self
    }

    fn render_stanza(&self, out: &mut String) {
        let _ = writeln!(out, "Types: {}", self.types.join(" "));
        let _ = writeln!(out, "URIs: {}", self.uris.join(" "));
        let _ = writeln!(out, "Suites: {}", self.suites.join(" "));
        if !self.components.is_empty() {
            let _ = writeln!(out, "Components: {}", self.components.join(" "));
        }
        if !self.architectures.is_empty() {
            let _ = writeln!(out, "Architectures: {}", self.architectures.join(" "));
        }
        if let Some(keyring) = &self.signed_by {
            let _ = writeln!(out, "Signed-By: {}", keyring);
        }
    }

    fn fields(&self) -> Vec<String> {
        let mut fields = vec![
            format!("Types: {}", self.types.join(" ")),
            format!("URIs: {}", self.uris.join(" ")),
            format!("Suites: {}", self.suites.join(" ")),
        ];
        if !self.components.is_empty() {
            fields.push(format!("Components: {}", self.components.join(" ")));
        }
        if let Some(keyring) = &self.signed_by {
            fields.push(format!("Signed-By: {}", keyring));
        }
        fields
    }
}

impl ConfigFile for Deb822Source {
    fn render(&self) -> String {
        let mut out = String::new();
        self.render_stanza(&mut out);
        out
    }

    fn required_fields(&self) -> Vec<String> {
        self.fields()
    }
}

/// A `.sources` file with several stanzas.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourcesFile {
    pub stanzas: Vec<Deb822Source>,
}

impl ConfigFile for SourcesFile {
    fn render(&self) -> String {
        let mut out = String::new();
        for (i, stanza) in self.stanzas.iter().enumerate() {
            if i > 0 {
                out.push('\n');
            }
            stanza.render_stanza(&mut out);
        }
        out
    }

    fn required_fields(&self) -> Vec<String> {
        self.stanzas.iter().flat_map(Deb822Source::fields).collect()
    }
}

/// `/etc/apt/preferences.d` pin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AptPreferences {
    pub package: String,
    pub pins: Vec<String>,
    pub priority: i32,
}

impl ConfigFile for AptPreferences {
    fn render(&self) -> String {
        let mut out = format!("Package: {}\n", self.package);
        for pin in &self.pins {
            let _ = writeln!(out, "Pin: {}", pin);
        }
        let _ = writeln!(out, "Pin-Priority: {}", self.priority);
        out
    }

    fn required_fields(&self) -> Vec<String> {
        vec![
            format!("Package: {}", self.package),
            format!("Pin-Priority: {}", self.priority),
        ]
    }
}

// ============================================================================
// systemd
// ============================================================================

/// A service unit with the handful of keys the targets need.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemdUnit {
    pub description: String,
    pub documentation: Option<String>,
    pub after: Vec<String>,
    pub wants: Vec<String>,
    pub user: Option<String>,
    pub group: Option<String>,
    pub exec_start: String,
    pub exec_reload: Option<String>,
    pub restart: String,
    pub extra_service: Vec<(String, String)>,
    pub wanted_by: String,
}

impl SystemdUnit {
    pub fn simple(description: &str, exec_start: &str) -> Self {
        Self {
            description: description.to_string(),
            documentation: None,
            after: vec!["network-online.target".to_string()],
            wants: vec!["network-online.target".to_string()],
            user: None,
            group: None,
            exec_start: exec_start.to_string(),
            exec_reload: None,
            restart: "on-failure".to_string(),
            extra_service: Vec::new(),
            wanted_by: "multi-user.target".to_string(),
        }
    }

    pub fn run_as(mut self, user: &str, group: &str) -> Self {
        self.user = Some(user.to_string());
        self.group = Some(group.to_string());
        self
    }
}

impl ConfigFile for SystemdUnit {
    fn render(&self) -> String {
        let mut out = String::from("[Unit]\n");
        let _ = writeln!(out, "Description={}", self.description);
        if let Some(doc) = &self.documentation {
            let _ = writeln!(out, "Documentation={}", doc);
        }
        if !self.wants.is_empty() {
            let _ = writeln!(out, "Wants={}", self.wants.join(" "));
        }
        if !self.after.is_empty() {
            let _ = writeln!(out, "After={}", self.after.join(" "));
        }

        out.push_str("\n[Service]\nType=simple\n");
        if let Some(user) = &self.user {
            let _ = writeln!(out, "User={}", user);
        }
        if let Some(group) = &self.group {
            let _ = writeln!(out, "Group={}", group);
        }
        let _ = writeln!(out, "ExecStart={}", self.exec_start);
        if let Some(reload) = &self.exec_reload {
            let _ = writeln!(out, "ExecReload={}", reload);
        }
        let _ = writeln!(out, "Restart={}", self.restart);
        for (key, value) in &self.extra_service {
            let _ = writeln!(out, "{}={}", key, value);
        }

        out.push_str("\n[Install]\n");
        let _ = writeln!(out, "WantedBy={}", self.wanted_by);
        out
    }

    fn required_fields(&self) -> Vec<String> {
        vec![
            "[Unit]".to_string(),
            "[Service]".to_string(),
            "[Install]".to_string(),
            format!("ExecStart={}", self.exec_start),
            format!("WantedBy={}", self.wanted_by),
        ]
    }
}

// ============================================================================
// Kernel and mounts
// ============================================================================

/// `/etc/sysctl.d/*.conf` parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SysctlConf {
    pub comment: String,
    pub params: Vec<(String, String)>,
}

impl ConfigFile for SysctlConf {
    fn render(&self) -> String {
        let mut out = format!("# {}\n", self.comment);
        for (key, value) in &self.params {
            let _ = writeln!(out, "{} = {}", key, value);
        }
        out
    }

    fn required_fields(&self) -> Vec<String> {
        self.params
            .iter()
            .map(|(key, value)| format!("{} = {}", key, value))
            .collect()
    }
}

/// One fstab(5) line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FstabEntry {
    pub spec: String,
    pub file: String,
    pub vfstype: String,
    pub options: String,
    pub freq: u8,
    pub passno: u8,
}

impl FstabEntry {
    pub fn swap(spec: &str) -> Self {
        Self {
            spec: spec.to_string(),
            file: "none".to_string(),
            vfstype: "swap".to_string(),
            options: "sw".to_string(),
            freq: 0,
            passno: 0,
        }
    }

    pub fn line(&self) -> String {
        format!(
            "{} {} {} {} {} {}",
            self.spec, self.file, self.vfstype, self.options, self.freq, self.passno
        )
    }

    /// Whether `fstab` already has an active entry for the same device.
    pub fn present_in(&self, fstab: &str) -> bool {
        fstab
            .lines()
            .map(str::trim)
            .filter(|line| !line.starts_with('#'))
            .any(|line| line.split_whitespace().next() == Some(self.spec.as_str()))
    }
}

// ============================================================================
// Application configs
// ============================================================================

/// A Prometheus scrape job with static targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrapeJob {
    pub name: String,
    pub targets: Vec<String>,
}

/// Minimal `prometheus.yml`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrometheusConfig {
    pub scrape_interval: String,
    pub evaluation_interval: String,
    pub jobs: Vec<ScrapeJob>,
}

impl ConfigFile for PrometheusConfig {
    fn render(&self) -> String {
        let mut out = String::from("global:\n");
        let _ = writeln!(out, "  scrape_interval: {}", self.scrape_interval);
        let _ = writeln!(out, "  evaluation_interval: {}", self.evaluation_interval);
        out.push_str("\nscrape_configs:\n");
        for job in &self.jobs {
            let _ = writeln!(out, "  - job_name: \"{}\"", job.name);
            out.push_str("    static_configs:\n");
            let targets: Vec<String> = job.targets.iter().map(|t| format!("\"{}\"", t)).collect();
            let _ = writeln!(out, "      - targets: [{}]", targets.join(", "));
        }
        out
    }

    fn required_fields(&self) -> Vec<String> {
        let mut fields = vec!["scrape_configs:".to_string()];
        fields.extend(self.jobs.iter().map(|job| format!("job_name: \"{}\"", job.name)));
        fields
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct XrayLog {
    pub loglevel: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct XrayOutbound {
    pub protocol: String,
    pub tag: String,
}

/// Starting point for `/usr/local/etc/xray/config.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct XrayConfig {
    pub log: XrayLog,
    pub inbounds: Vec<serde_json::Value>,
    pub outbounds: Vec<XrayOutbound>,
}

impl Default for XrayConfig {
    fn default() -> Self {
        Self {
            log: XrayLog {
                loglevel: "warning".to_string(),
            },
            inbounds: Vec::new(),
            outbounds: vec![
                XrayOutbound {
                    protocol: "freedom".to_string(),
                    tag: "direct".to_string(),
                },
                XrayOutbound {
                    protocol: "blackhole".to_string(),
                    tag: "block".to_string(),
                },
            ],
        }
    }
}

impl ConfigFile for XrayConfig {
    fn render(&self) -> String {
        // Serializing plain strings and vectors cannot fail
        let mut json = serde_json::to_string_pretty(self).unwrap_or_default();
        json.push('\n');
        json
    }

    fn required_fields(&self) -> Vec<String> {
        vec!["\"outbounds\"".to_string(), "\"freedom\"".to_string()]
    }
}
