//! debprov - Main entry point
//!
//! Parses the command line, detects host facts once, and runs the selected
//! target through the provisioning pipeline. This is the single place where
//! errors are turned into a message and an exit code.

use std::process::ExitCode;

use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use debprov::cli::{Cli, Commands};
use debprov::{
    AssumeYes, CommandRunner, Confirm, Context, HostFacts, HostRunner, InteractiveConfirm, Outcome,
    PlanningRunner, ReqwestClient, Report, Result, Settings, pipeline, process_guard, targets,
};

/// Initialize tracing: stderr, `[LEVEL file:line] message`, RUST_LOG overrides
fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_file(true)
        .with_line_number(true)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse_args();
    init_tracing(cli.verbose);
    info!("debprov {} starting up", env!("CARGO_PKG_VERSION"));

    // Children run in their own process groups, so a Ctrl+C must be relayed
    if let Err(e) = process_guard::init_signal_handlers() {
        warn!("Failed to initialize signal handlers: {}", e);
    }
    debug!("Signal handlers initialized");

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            eprintln!("✗ [{}] {}", e.step(), e);
            ExitCode::from(e.exit_code())
        }
    }
}

fn run(cli: &Cli) -> Result<()> {
    if cli.command == Commands::List {
        print_targets();
        return Ok(());
    }

    let settings = Settings::resolve(cli.config.as_deref(), &cli.root)?;

    // Detection only reads the host, so it uses the real runner even in dry-run
    let host_runner = HostRunner;
    let facts = HostFacts::detect(
        &cli.root,
        &host_runner,
        &settings.connect_addr,
        settings.connect_timeout(),
    )?;

    if cli.command == Commands::Facts {
        print_facts(&facts);
        return Ok(());
    }

    let Some(target) = targets::for_command(&cli.command) else {
        return Ok(());
    };

    let planner = PlanningRunner::new(&host_runner);
    let runner: &dyn CommandRunner = if cli.dry_run { &planner } else { &host_runner };
    let http = ReqwestClient::new(&settings)?;
    let confirm: &dyn Confirm = if cli.yes { &AssumeYes } else { &InteractiveConfirm };

    let ctx = Context {
        facts,
        settings,
        runner,
        http: &http,
        confirm,
        root: cli.root.clone(),
        dry_run: cli.dry_run,
        force: cli.force,
    };

    let report = pipeline::provision(target.as_ref(), &ctx)?;
    print_report(&report);

    if cli.dry_run {
        let planned = planner.command_lines();
        if planned.is_empty() {
            println!("  (no commands)");
        }
        for line in planned {
            println!("  $ {}", line);
        }
    }
    Ok(())
}

fn print_report(report: &Report) {
    match &report.version {
        Some(version) => println!("✓ {} {}: {}", report.target, version, report.outcome),
        None => println!("✓ {}: {}", report.target, report.outcome),
    }
    if !report.installed_dependencies.is_empty() {
        println!("  dependencies installed: {}", report.installed_dependencies.join(", "));
    }
    for line in &report.details {
        println!("  {}", line);
    }
    if report.outcome == Outcome::Planned {
        println!("  commands that would run:");
    }
}

fn print_targets() {
    for descriptor in targets::ALL {
        match descriptor.service {
            Some(unit) => println!(
                "{:<16} {} (service: {})",
                descriptor.name, descriptor.summary, unit
            ),
            None => println!("{:<16} {}", descriptor.name, descriptor.summary),
        }
    }
}

fn print_facts(facts: &HostFacts) {
    println!("os:           {}", facts.os.display_name());
    let family = facts
        .family()
        .map(|f| f.to_string())
        .unwrap_or_else(|| "unsupported".to_string());
    println!("family:       {}", family);
    println!("codename:     {}", facts.codename().unwrap_or("-"));
    if facts.suite_codename() != facts.codename() {
        println!("based on:     {}", facts.suite_codename().unwrap_or("-"));
    }
    println!("architecture: {}", facts.arch);
    println!("privilege:    {}", facts.privilege);
    println!("network:      {}", facts.network);
}
