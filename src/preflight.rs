//! Pre-flight checks run before any provisioning step
//!
//! Verifies, in order:
//! - privilege level
//! - OS family and release codename
//! - CPU architecture
//! - network reachability
//!
//! Each failing condition produces its own message. An unknown codename of a
//! supported family is the one case that asks the operator instead of failing.

use std::io::IsTerminal;

use crate::error::{ProvisionError, Result};
use crate::host::HostFacts;
use crate::target::TargetDescriptor;
use crate::types::{Privilege, PrivilegeRequirement};

/// Operator confirmation prompt.
pub trait Confirm {
    /// Ask `question`; `true` means proceed.
    fn confirm(&self, question: &str) -> bool;
}

/// Always proceeds (`--yes`).
#[derive(Debug, Default, Clone, Copy)]
pub struct AssumeYes;

impl Confirm for AssumeYes {
    fn confirm(&self, question: &str) -> bool {
        tracing::info!("{} -> yes (--yes)", question);
        true
    }
}

/// Prompts on the terminal; declines when stdin is not a terminal.
#[derive(Debug, Default, Clone, Copy)]
pub struct InteractiveConfirm;

impl Confirm for InteractiveConfirm {
    fn confirm(&self, question: &str) -> bool {
        if !std::io::stdin().is_terminal() {
            tracing::warn!("{} -> no (stdin is not a terminal, use --yes)", question);
            return false;
        }
        inquire::Confirm::new(question)
            .with_default(false)
            .prompt()
            .unwrap_or(false)
    }
}

/// How a host codename relates to the codenames a target supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodenameSupport {
    /// Listed as supported
    Supported,
    /// Right family, codename not listed: ask before proceeding
    Plausible,
    /// Wrong family or no codename at all
    Unsupported,
}

impl CodenameSupport {
    pub fn classify(descriptor: &TargetDescriptor, facts: &HostFacts) -> Self {
        let Some(family) = facts.family() else {
            return Self::Unsupported;
        };
        if !descriptor.platform.families.contains(&family) {
            return Self::Unsupported;
        }
        let Some(codename) = facts.codename() else {
            return Self::Unsupported;
        };

        let listed = if descriptor.platform.codenames.is_empty() {
            family.default_codenames()
        } else {
            descriptor.platform.codenames
        };
        if listed.contains(&codename) {
            Self::Supported
        } else {
            Self::Plausible
        }
    }
}

/// Run every pre-flight check for `descriptor`.
pub fn check(descriptor: &TargetDescriptor, facts: &HostFacts, confirm: &dyn Confirm) -> Result<()> {
    tracing::debug!("Running pre-flight checks for {}", descriptor.name);

    check_privilege(descriptor.privilege, facts.privilege)?;
    check_platform(descriptor, facts, confirm)?;

    if !descriptor.platform.architectures.is_empty()
        && !descriptor.platform.architectures.contains(&facts.arch)
    {
        return Err(ProvisionError::unsupported(format!(
            "{} is not available for {} (supported: {})",
            descriptor.name,
            facts.arch,
            descriptor
                .platform
                .architectures
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        )));
    }

    if descriptor.needs_network && !facts.network.is_online() {
        return Err(ProvisionError::network(
            "no network connectivity (connection check failed or timed out)",
        ));
    }

    tracing::info!("Pre-flight checks passed for {}", descriptor.name);
    Ok(())
}

pub fn check_privilege(required: PrivilegeRequirement, actual: Privilege) -> Result<()> {
    match (required, actual) {
        (PrivilegeRequirement::None, _) | (PrivilegeRequirement::Root, Privilege::Root) => Ok(()),
        (PrivilegeRequirement::Root, Privilege::Sudoer) => Err(ProvisionError::privilege(
            "not running as root; re-run with sudo",
        )),
        (PrivilegeRequirement::Root, Privilege::Unprivileged) => Err(ProvisionError::privilege(
            "not running as root and sudo is not available",
        )),
    }
}

fn check_platform(descriptor: &TargetDescriptor, facts: &HostFacts, confirm: &dyn Confirm) -> Result<()> {
    match CodenameSupport::classify(descriptor, facts) {
        CodenameSupport::Supported => Ok(()),
        CodenameSupport::Plausible => {
            let codename = facts.codename().unwrap_or("unknown");
            tracing::warn!(
                "{} has not been tested on {} ({})",
                descriptor.name,
                codename,
                facts.os.display_name()
            );
            let question = format!(
                "Release '{}' is not a supported release for {}. Continue anyway?",
                codename, descriptor.name
            );
            if confirm.confirm(&question) {
                Ok(())
            } else {
                Err(ProvisionError::unsupported(format!(
                    "release '{}' not supported for {}; declined by operator",
                    codename, descriptor.name
                )))
            }
        }
        CodenameSupport::Unsupported => match facts.family() {
            Some(family) if descriptor.platform.families.contains(&family) => {
                Err(ProvisionError::unsupported(format!(
                    "{} does not report a release codename",
                    facts.os.display_name()
                )))
            }
            _ => Err(ProvisionError::unsupported(format!(
                "{} is not supported by {} (requires {})",
                facts.os.display_name(),
                descriptor.name,
                descriptor
                    .platform
                    .families
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(" or ")
            ))),
        },
    }
}
