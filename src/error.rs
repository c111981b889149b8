//! Error handling module for debprov
//!
//! Every provisioning step reports failure through `ProvisionError`. Errors are
//! never recovered locally: the first failing step aborts the run and the single
//! handler in `main` turns the error into a message and an exit code.

use std::fmt;

use thiserror::Error;

/// Pipeline step an error is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Preflight,
    Dependencies,
    Fetch,
    Configure,
    Install,
    Activate,
    Verify,
    Settings,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Preflight => "preflight",
            Self::Dependencies => "dependencies",
            Self::Fetch => "fetch",
            Self::Configure => "configure",
            Self::Install => "install",
            Self::Activate => "activate",
            Self::Verify => "verify",
            Self::Settings => "settings",
        };
        f.write_str(name)
    }
}

/// Main error type for debprov
#[derive(Error, Debug)]
pub enum ProvisionError {
    /// Missing root privileges
    #[error("Privilege error: {0}")]
    Privilege(String),

    /// OS family, codename or architecture not supported by the target
    #[error("Unsupported platform: {0}")]
    UnsupportedPlatform(String),

    /// Network check or API query could not reach the remote side
    #[error("Network unreachable: {0}")]
    NetworkUnreachable(String),

    /// Package manager invocation failed
    #[error("Dependency installation failed: {0}")]
    DependencyInstall(String),

    /// No release asset matched the platform filter
    #[error("Artifact resolution failed: {0}")]
    ArtifactResolution(String),

    /// Asset download or extraction failed
    #[error("Artifact download failed: {0}")]
    ArtifactDownload(String),

    /// Downloaded artifact does not match its published checksum
    #[error("Artifact integrity check failed: {0}")]
    ArtifactIntegrity(String),

    /// Rendering, writing or re-validating a configuration file failed
    #[error("Config write failed: {0}")]
    ConfigWrite(String),

    /// Placing files or creating accounts failed
    #[error("Installation failed: {0}")]
    Install(String),

    /// One of the systemctl stages failed
    #[error("Service activation failed: {stage} {unit}: {reason}")]
    ServiceActivation {
        unit: String,
        stage: &'static str,
        reason: String,
    },

    /// Post-install check did not find the expected binary or service state
    #[error("Verification failed: {0}")]
    Verification(String),

    /// Target exists already and must not be provisioned twice
    #[error("Already provisioned: {0}")]
    AlreadyProvisioned(String),

    /// Settings file could not be loaded or is invalid
    #[error("Settings error: {0}")]
    Settings(String),

    /// A subcommand argument clap accepted but the target rejects
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

/// Exit code of a run whose post-install checks failed. Distinct from clap's
/// usage error code 2.
pub const VERIFICATION_EXIT_CODE: u8 = 3;

/// Result type alias for provisioning operations
pub type Result<T> = std::result::Result<T, ProvisionError>;

impl ProvisionError {
    pub fn privilege(msg: impl Into<String>) -> Self {
        Self::Privilege(msg.into())
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::UnsupportedPlatform(msg.into())
    }

    pub fn network(msg: impl Into<String>) -> Self {
        Self::NetworkUnreachable(msg.into())
    }

    pub fn dependency(msg: impl Into<String>) -> Self {
        Self::DependencyInstall(msg.into())
    }

    pub fn resolution(msg: impl Into<String>) -> Self {
        Self::ArtifactResolution(msg.into())
    }

    pub fn download(msg: impl Into<String>) -> Self {
        Self::ArtifactDownload(msg.into())
    }

    pub fn integrity(msg: impl Into<String>) -> Self {
        Self::ArtifactIntegrity(msg.into())
    }

    pub fn config_write(msg: impl Into<String>) -> Self {
        Self::ConfigWrite(msg.into())
    }

    pub fn install(msg: impl Into<String>) -> Self {
        Self::Install(msg.into())
    }

    pub fn activation(unit: impl Into<String>, stage: &'static str, reason: impl Into<String>) -> Self {
        Self::ServiceActivation {
            unit: unit.into(),
            stage,
            reason: reason.into(),
        }
    }

    pub fn verification(msg: impl Into<String>) -> Self {
        Self::Verification(msg.into())
    }

    pub fn already_provisioned(msg: impl Into<String>) -> Self {
        Self::AlreadyProvisioned(msg.into())
    }

    pub fn settings(msg: impl Into<String>) -> Self {
        Self::Settings(msg.into())
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Step the error is attributed to, used in the final `✗ [step]` line.
    pub fn step(&self) -> Step {
        match self {
            Self::Privilege(_)
            | Self::UnsupportedPlatform(_)
            | Self::NetworkUnreachable(_)
            | Self::AlreadyProvisioned(_)
            | Self::InvalidArgument(_) => Step::Preflight,
            Self::DependencyInstall(_) => Step::Dependencies,
            Self::ArtifactResolution(_) | Self::ArtifactDownload(_) | Self::ArtifactIntegrity(_) => {
                Step::Fetch
            }
            Self::ConfigWrite(_) => Step::Configure,
            Self::Install(_) => Step::Install,
            Self::ServiceActivation { .. } => Step::Activate,
            Self::Verification(_) => Step::Verify,
            Self::Settings(_) => Step::Settings,
        }
    }

    /// Process exit code: `VERIFICATION_EXIT_CODE` when everything ran but the
    /// result is unhealthy, 1 for every aborted run.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Verification(_) => VERIFICATION_EXIT_CODE,
            _ => 1,
        }
    }
}

impl From<anyhow::Error> for ProvisionError {
    fn from(err: anyhow::Error) -> Self {
        Self::Settings(format!("{:#}", err))
    }
}
