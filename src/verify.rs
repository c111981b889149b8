//! Post-install checks.
//!
//! All checks are read-only. A failed check is a `Verification` error, which
//! the binary maps to its own exit code.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::thread;

use crate::context::Context;
use crate::error::{ProvisionError, Result};
use crate::runner::SystemCommand;

/// `path` exists and has an execute bit.
pub fn binary(path: &Path) -> Result<()> {
    let meta = fs::metadata(path)
        .map_err(|e| ProvisionError::verification(format!("{}: {}", path.display(), e)))?;
    if !meta.is_file() || meta.permissions().mode() & 0o111 == 0 {
        return Err(ProvisionError::verification(format!(
            "{} is not an executable file",
            path.display()
        )));
    }
    Ok(())
}

/// Run `program args...` and return the first line of its output.
pub fn command_version(ctx: &Context<'_>, program: &str, args: &[&str]) -> Result<String> {
    let cmd = SystemCommand::new(program).args(args.iter().copied());
    let output = ctx
        .run(&cmd)
        .map_err(|e| ProvisionError::verification(format!("cannot run {}: {}", program, e)))?;
    if !output.success {
        return Err(ProvisionError::verification(format!(
            "`{}` failed ({})",
            cmd.argv().join(" "),
            output.failure_reason()
        )));
    }
    // Some tools (promtool, xray) print their version on stderr
    let text = if output.stdout.trim().is_empty() {
        &output.stderr
    } else {
        &output.stdout
    };
    Ok(text.lines().next().unwrap_or_default().trim().to_string())
}

/// Poll `systemctl is-active` until the unit reports `active`.
pub fn service_active(ctx: &Context<'_>, unit: &str) -> Result<()> {
    let attempts = ctx.settings.service_poll_attempts.max(1);
    let cmd = SystemCommand::new("systemctl").args(["is-active", unit]);
    let mut last = String::new();

    for attempt in 1..=attempts {
        let output = ctx
            .run(&cmd)
            .map_err(|e| ProvisionError::verification(format!("cannot run systemctl: {}", e)))?;
        last = output.stdout.trim().to_string();
        if last == "active" {
            tracing::info!("{} is active", unit);
            return Ok(());
        }
        tracing::debug!("{} is '{}' (attempt {}/{})", unit, last, attempt, attempts);
        if attempt < attempts {
            thread::sleep(ctx.settings.service_poll_interval());
        }
    }

    Err(ProvisionError::verification(format!(
        "service {} is not active (state: {})",
        unit,
        if last.is_empty() { "unknown" } else { &last }
    )))
}

/// `path` exists and contains `needle`.
pub fn file_contains(path: &Path, needle: &str) -> Result<()> {
    let content = fs::read_to_string(path)
        .map_err(|e| ProvisionError::verification(format!("{}: {}", path.display(), e)))?;
    if content.contains(needle) {
        Ok(())
    } else {
        Err(ProvisionError::verification(format!(
            "{} does not contain '{}'",
            path.display(),
            needle
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::tests::context;
    use crate::fetch::tests::StubHttp;
    use crate::runner::{CommandOutput, RecordingRunner};

    #[test]
    fn test_binary_requires_execute_bit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gh");
        fs::write(&path, b"").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).unwrap();
        assert!(binary(&path).is_err());
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        assert!(binary(&path).is_ok());
        assert!(binary(&dir.path().join("missing")).is_err());
    }

    #[test]
    fn test_command_version_first_line() {
        let dir = tempfile::tempdir().unwrap();
        let runner = RecordingRunner::new().respond(
            &["gh", "--version"],
            "gh version 2.62.0 (2024-11-14)\nhttps://github.com/cli/cli/releases/tag/v2.62.0\n",
        );
        let http = StubHttp::default();
        let ctx = context(dir.path(), &runner, &http);
        assert_eq!(
            command_version(&ctx, "gh", &["--version"]).unwrap(),
            "gh version 2.62.0 (2024-11-14)"
        );
    }

    #[test]
    fn test_command_version_falls_back_to_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let output = CommandOutput {
            stderr: "promtool, version 2.53.0\n".to_string(),
            ..CommandOutput::ok("")
        };
        let runner = RecordingRunner::new().reply(&["promtool"], output);
        let http = StubHttp::default();
        let ctx = context(dir.path(), &runner, &http);
        assert_eq!(
            command_version(&ctx, "promtool", &["--version"]).unwrap(),
            "promtool, version 2.53.0"
        );
    }

    #[test]
    fn test_service_active() {
        let dir = tempfile::tempdir().unwrap();
        let runner = RecordingRunner::new().respond(&["systemctl", "is-active"], "active\n");
        let http = StubHttp::default();
        let ctx = context(dir.path(), &runner, &http);
        service_active(&ctx, "nginx").unwrap();
        assert_eq!(runner.command_lines(), vec!["systemctl is-active nginx"]);
    }

    #[test]
    fn test_service_inactive_polls_then_fails() {
        let dir = tempfile::tempdir().unwrap();
        let runner = RecordingRunner::new().reply(
            &["systemctl", "is-active"],
            CommandOutput {
                stdout: "activating\n".to_string(),
                ..CommandOutput::failed(3, "")
            },
        );
        let http = StubHttp::default();
        let ctx = context(dir.path(), &runner, &http);

        let err = service_active(&ctx, "xray").unwrap_err();
        assert!(matches!(err, ProvisionError::Verification(_)));
        assert!(err.to_string().contains("activating"));
        assert_eq!(runner.calls().len(), ctx.settings.service_poll_attempts as usize);
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn test_file_contains() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fstab");
        fs::write(&path, "/swapfile none swap sw 0 0\n").unwrap();
        assert!(file_contains(&path, "/swapfile none swap").is_ok());
        assert!(file_contains(&path, "/dev/sdb1").is_err());
    }
}
