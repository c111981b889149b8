//! Type-safe host and platform types
//!
//! Architecture names, OS families and privilege levels are enums rather
//! than strings so that descriptors and checks match exhaustively.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

/// CPU architecture in Debian naming (`dpkg --print-architecture`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[strum(serialize_all = "lowercase")]
pub enum Architecture {
    Amd64,
    Arm64,
    Armhf,
    I386,
}

impl Architecture {
    /// Architecture of the running binary.
    ///
    /// debprov is built per target, so the compile-time architecture is the
    /// host architecture.
    pub fn detect() -> Option<Self> {
        Self::from_rust_arch(std::env::consts::ARCH)
    }

    pub fn from_rust_arch(arch: &str) -> Option<Self> {
        match arch {
            "x86_64" => Some(Self::Amd64),
            "aarch64" => Some(Self::Arm64),
            "arm" => Some(Self::Armhf),
            "x86" => Some(Self::I386),
            _ => None,
        }
    }

    /// Name used in Go-style release assets (`linux-amd64`, `linux-armv7`).
    pub fn go_name(self) -> &'static str {
        match self {
            Self::Amd64 => "amd64",
            Self::Arm64 => "arm64",
            Self::Armhf => "armv7",
            Self::I386 => "386",
        }
    }

    /// Name used in Xray release assets (`Xray-linux-64.zip`).
    pub fn xray_name(self) -> &'static str {
        match self {
            Self::Amd64 => "64",
            Self::Arm64 => "arm64-v8a",
            Self::Armhf => "arm32-v7a",
            Self::I386 => "32",
        }
    }
}

/// Supported distribution families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[strum(serialize_all = "lowercase")]
pub enum OsFamily {
    Debian,
    Ubuntu,
}

impl OsFamily {
    /// Codenames accepted without confirmation when a target lists none.
    pub fn default_codenames(self) -> &'static [&'static str] {
        match self {
            Self::Debian => &["bullseye", "bookworm", "trixie"],
            Self::Ubuntu => &["focal", "jammy", "noble"],
        }
    }
}

/// Privilege level of the current process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Privilege {
    /// Effective UID 0
    #[strum(serialize = "root")]
    Root,
    /// Not root, but `sudo -n` works
    #[strum(serialize = "sudoer")]
    Sudoer,
    /// Neither root nor passwordless sudo
    #[strum(serialize = "unprivileged")]
    Unprivileged,
}

/// Privilege a target needs before anything runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrivilegeRequirement {
    /// Read-only commands
    None,
    /// Writes under /etc, installs packages, manages units
    Root,
}
