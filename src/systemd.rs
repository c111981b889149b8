//! systemd service activation.
//!
//! Activation is three `systemctl` calls in fixed order: `daemon-reload`,
//! `start`, `enable`. The first failing stage aborts; later stages are not
//! attempted.

use crate::context::Context;
use crate::error::{ProvisionError, Result};
use crate::runner::SystemCommand;

fn systemctl(ctx: &Context<'_>, unit: &str, stage: &'static str, args: &[&str]) -> Result<()> {
    let cmd = SystemCommand::new("systemctl").args(args.iter().copied());
    let output = ctx
        .run(&cmd)
        .map_err(|e| ProvisionError::activation(unit, stage, format!("cannot run systemctl: {}", e)))?;
    if output.success {
        Ok(())
    } else {
        Err(ProvisionError::activation(unit, stage, output.failure_reason()))
    }
}

/// Reload unit files, start `unit`, enable it at boot.
pub fn activate(ctx: &Context<'_>, unit: &str) -> Result<()> {
    tracing::info!("Activating {}", unit);
    systemctl(ctx, unit, "daemon-reload", &["daemon-reload"])?;
    systemctl(ctx, unit, "start", &["start", unit])?;
    systemctl(ctx, unit, "enable", &["enable", unit])?;
    tracing::info!("{} started and enabled", unit);
    Ok(())
}

/// Restart a unit whose configuration changed.
pub fn restart(ctx: &Context<'_>, unit: &str) -> Result<()> {
    systemctl(ctx, unit, "daemon-reload", &["daemon-reload"])?;
    systemctl(ctx, unit, "restart", &["restart", unit])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::tests::context;
    use crate::fetch::tests::StubHttp;
    use crate::runner::RecordingRunner;

    #[test]
    fn test_activation_order() {
        let dir = tempfile::tempdir().unwrap();
        let runner = RecordingRunner::new();
        let http = StubHttp::default();
        let ctx = context(dir.path(), &runner, &http);

        activate(&ctx, "node_exporter").unwrap();
        assert_eq!(
            runner.command_lines(),
            vec![
                "systemctl daemon-reload",
                "systemctl start node_exporter",
                "systemctl enable node_exporter",
            ]
        );
    }

    #[test]
    fn test_start_failure_skips_enable() {
        let dir = tempfile::tempdir().unwrap();
        let runner = RecordingRunner::new().fail(
            &["systemctl", "start"],
            "Job for prometheus.service failed because the control process exited with error code.",
        );
        let http = StubHttp::default();
        let ctx = context(dir.path(), &runner, &http);

        let err = activate(&ctx, "prometheus").unwrap_err();
        match &err {
            ProvisionError::ServiceActivation { unit, stage, .. } => {
                assert_eq!(unit, "prometheus");
                assert_eq!(*stage, "start");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(
            runner.command_lines(),
            vec!["systemctl daemon-reload", "systemctl start prometheus"]
        );
    }

    #[test]
    fn test_restart() {
        let dir = tempfile::tempdir().unwrap();
        let runner = RecordingRunner::new();
        let http = StubHttp::default();
        let ctx = context(dir.path(), &runner, &http);

        restart(&ctx, "xray").unwrap();
        assert_eq!(
            runner.command_lines(),
            vec!["systemctl daemon-reload", "systemctl restart xray"]
        );
    }
}
