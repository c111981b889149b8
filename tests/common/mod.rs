//! Shared fixtures for the provisioning integration tests.
//!
//! `FakeHost` records every command like `RecordingRunner` and emulates the
//! filesystem effects the pipeline relies on (tar/unzip unpacking, gpg
//! writing a keyring, fallocate creating the swap file, dpkg state after
//! apt-get install). `StubHttp` serves canned release listings and files.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::HashMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};

use debprov::{
    AssumeYes, CommandOutput, CommandRunner, Context, HostFacts, HttpClient, HttpError,
    NetworkState, OsRelease, RecordingRunner, Settings, SystemCommand,
};
use debprov::types::{Architecture, Privilege};
use sha2::{Digest, Sha256};

pub const BOOKWORM: &str = "PRETTY_NAME=\"Debian GNU/Linux 12 (bookworm)\"\n\
    NAME=\"Debian GNU/Linux\"\n\
    VERSION_ID=\"12\"\n\
    VERSION_CODENAME=bookworm\n\
    ID=debian\n";

pub const API: &str = "https://api.github.com";

pub struct FakeHost {
    pub recorder: RecordingRunner,
    /// File names placed in every unpacked archive
    pub archive_contents: Vec<String>,
    /// Reply to `systemctl is-active`
    pub service_state: String,
    /// Replaces /etc/os-release under `root` when `apt-get full-upgrade` runs
    pub os_release_after_upgrade: Option<(PathBuf, String)>,
    swaps: RefCell<Vec<String>>,
    installed: RefCell<Vec<String>>,
}

impl FakeHost {
    pub fn new() -> Self {
        Self::with(RecordingRunner::new())
    }

    pub fn with(recorder: RecordingRunner) -> Self {
        Self {
            recorder,
            archive_contents: Vec::new(),
            service_state: "active".to_string(),
            os_release_after_upgrade: None,
            swaps: RefCell::new(Vec::new()),
            installed: RefCell::new(Vec::new()),
        }
    }

    pub fn archive(mut self, files: &[&str]) -> Self {
        self.archive_contents = files.iter().map(|f| f.to_string()).collect();
        self
    }

    pub fn command_lines(&self) -> Vec<String> {
        self.recorder.command_lines()
    }

    fn unpack(&self, archive: &str, dest: &Path) {
        let name = Path::new(archive)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("archive");
        let stem = name.trim_end_matches(".tar.gz").trim_end_matches(".zip");
        let dir = dest.join(stem);
        fs::create_dir_all(&dir).unwrap();
        for file in &self.archive_contents {
            fs::write(dir.join(file), format!("#!/bin/sh\necho {}\n", file)).unwrap();
        }
    }

    fn apply(&self, cmd: &SystemCommand) -> Option<CommandOutput> {
        let args: Vec<&str> = cmd.args.iter().map(String::as_str).collect();
        match (cmd.program.as_str(), args.as_slice()) {
            ("tar", ["-xzf", archive, "-C", dest]) => self.unpack(archive, Path::new(dest)),
            ("unzip", ["-o", "-q", archive, "-d", dest]) => self.unpack(archive, Path::new(dest)),
            ("gpg", [.., "-o", dest, _scratch]) => fs::write(dest, b"keyring").unwrap(),
            ("fallocate", ["-l", size, path]) => {
                let mb: u64 = size.trim_end_matches('M').parse().unwrap();
                File::create(path).unwrap().set_len(mb * 1024 * 1024).unwrap();
            }
            ("swapon", ["--show=NAME", "--noheadings"]) => {
                return Some(CommandOutput::ok(self.swaps.borrow().join("\n")));
            }
            ("swapon", [path]) => self.swaps.borrow_mut().push(path.to_string()),
            ("systemctl", ["is-active", _unit]) => {
                let state = format!("{}\n", self.service_state);
                return Some(if self.service_state == "active" {
                    CommandOutput::ok(state)
                } else {
                    CommandOutput {
                        stdout: state,
                        ..CommandOutput::failed(3, "")
                    }
                });
            }
            ("apt-get", ["install", "-y", packages @ ..]) => self
                .installed
                .borrow_mut()
                .extend(packages.iter().map(|p| p.to_string())),
            ("apt-get", ["full-upgrade", ..]) => {
                if let Some((path, content)) = &self.os_release_after_upgrade {
                    fs::write(path, content).unwrap();
                }
            }
            ("dpkg-query", [.., package]) => {
                return Some(if self.installed.borrow().iter().any(|p| p == package) {
                    CommandOutput::ok("install ok installed")
                } else {
                    CommandOutput::failed(1, format!("dpkg-query: no packages found matching {}", package))
                });
            }
            _ => {}
        }
        None
    }
}

impl CommandRunner for FakeHost {
    fn run(&self, cmd: &SystemCommand) -> std::io::Result<CommandOutput> {
        let output = self.recorder.run(cmd)?;
        if !output.success {
            return Ok(output);
        }
        Ok(self.apply(cmd).unwrap_or(output))
    }

    fn has_command(&self, name: &str) -> bool {
        self.recorder.has_command(name)
    }
}

/// Serves fixed bodies by URL; unknown URLs answer 404.
#[derive(Default)]
pub struct StubHttp {
    texts: HashMap<String, String>,
    files: HashMap<String, Vec<u8>>,
    pub requests: RefCell<Vec<String>>,
}

impl StubHttp {
    pub fn text(mut self, url: &str, body: &str) -> Self {
        self.texts.insert(url.to_string(), body.to_string());
        self
    }

    pub fn file(mut self, url: &str, body: &[u8]) -> Self {
        self.files.insert(url.to_string(), body.to_vec());
        self
    }

    /// Publish `assets` (name, body) as the latest release of `repo`.
    ///
    /// Each asset is downloadable from `https://dl.invalid/<name>`.
    pub fn release(mut self, repo: &str, tag: &str, assets: &[(&str, &[u8])]) -> Self {
        let listing = serde_json::json!({
            "tag_name": tag,
            "assets": assets
                .iter()
                .map(|(name, _)| serde_json::json!({
                    "name": name,
                    "browser_download_url": format!("https://dl.invalid/{}", name),
                }))
                .collect::<Vec<_>>(),
        });
        self.texts.insert(
            format!("{}/repos/{}/releases/latest", API, repo),
            listing.to_string(),
        );
        for (name, body) in assets {
            let url = format!("https://dl.invalid/{}", name);
            self.files.insert(url.clone(), body.to_vec());
            self.texts
                .insert(url, String::from_utf8_lossy(body).into_owned());
        }
        self
    }

    pub fn downloads(&self) -> usize {
        self.requests
            .borrow()
            .iter()
            .filter(|url| url.starts_with("https://dl.invalid/") && !url.ends_with(".txt"))
            .count()
    }
}

impl HttpClient for StubHttp {
    fn get_text(&self, url: &str) -> Result<String, HttpError> {
        self.requests.borrow_mut().push(url.to_string());
        self.texts.get(url).cloned().ok_or(HttpError::Status {
            url: url.to_string(),
            status: 404,
        })
    }

    fn download(&self, url: &str, dest: &Path) -> Result<u64, HttpError> {
        self.requests.borrow_mut().push(url.to_string());
        let body = self.files.get(url).ok_or(HttpError::Status {
            url: url.to_string(),
            status: 404,
        })?;
        fs::write(dest, body)?;
        Ok(body.len() as u64)
    }
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

pub fn bookworm_facts() -> HostFacts {
    HostFacts {
        arch: Architecture::Amd64,
        os: OsRelease::parse(BOOKWORM),
        privilege: Privilege::Root,
        network: NetworkState::Online,
    }
}

pub fn context<'a>(root: &Path, host: &'a FakeHost, http: &'a StubHttp) -> Context<'a> {
    Context {
        facts: bookworm_facts(),
        settings: Settings {
            service_poll_attempts: 3,
            service_poll_interval_ms: 0,
            ..Settings::default()
        },
        runner: host,
        http,
        confirm: &AssumeYes,
        root: root.to_path_buf(),
        dry_run: false,
        force: false,
    }
}

/// Every regular file below `dir`, relative to it.
pub fn files_under(dir: &Path) -> Vec<PathBuf> {
    let mut found = Vec::new();
    let mut stack = vec![dir.to_path_buf()];
    while let Some(current) = stack.pop() {
        for entry in fs::read_dir(&current).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                stack.push(path);
            } else {
                found.push(path.strip_prefix(dir).unwrap().to_path_buf());
            }
        }
    }
    found.sort();
    found
}
