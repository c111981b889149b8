//! debprov Library
//!
//! Provisioning pipeline for Debian and Ubuntu hosts: host detection,
//! pre-flight checks, dependency installation, artifact fetching, typed
//! configuration files, systemd activation and verification.

pub mod apt;
pub mod cli;
pub mod context;
pub mod error;
pub mod fetch;
pub mod host;
pub mod pipeline;
pub mod preflight;
pub mod process_guard;
pub mod render;
pub mod runner;
pub mod settings;
pub mod systemd;
pub mod target;
pub mod targets;
pub mod types;
pub mod verify;

// Re-export main types for convenience
pub use context::Context;
pub use error::{ProvisionError, Result, Step};
pub use fetch::{HttpClient, HttpError, ReqwestClient};
pub use host::{HostFacts, NetworkState, OsRelease};
pub use pipeline::{Outcome, Report, Workspace, provision};
pub use preflight::{AssumeYes, Confirm, InteractiveConfirm};
pub use process_guard::{ChildRegistry, CommandProcessGroup};
pub use runner::{
    CommandOutput, CommandRunner, HostRunner, PlanningRunner, RecordingRunner, SystemCommand,
};
pub use settings::Settings;
pub use target::{Target, TargetDescriptor};
pub use types::{Architecture, OsFamily, Privilege, PrivilegeRequirement};
