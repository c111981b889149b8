use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// debprov - provision packages and services on Debian and Ubuntu
#[derive(Parser, Debug)]
#[command(name = "debprov")]
#[command(about = "Provision packages and services on Debian and Ubuntu hosts")]
#[command(version)]
pub struct Cli {
    /// Dry-run mode: show what would be executed without making changes.
    ///
    /// Host detection and release lookups still run so the plan is
    /// realistic. Commands are recorded instead of executed, file writes and
    /// downloads are skipped, and verification is not attempted.
    #[arg(long, global = true)]
    pub dry_run: bool,

    /// Answer yes to confirmation prompts (unlisted release codenames)
    #[arg(short, long, global = true)]
    pub yes: bool,

    /// Provision again even when the target looks installed
    #[arg(long, global = true)]
    pub force: bool,

    /// Settings file (JSON); defaults to /etc/debprov/config.json when present
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Filesystem root every system path is resolved against
    #[arg(long, global = true, hide = true, default_value = "/")]
    pub root: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// GitHub CLI from its APT repository
    Gh,
    /// Prometheus server from the GitHub release tarball
    Prometheus,
    /// Prometheus Node Exporter from the GitHub release tarball
    NodeExporter,
    /// Nginx from the nginx.org APT repository
    Nginx,
    /// PostgreSQL PGDG APT repository
    PostgresRepo {
        /// Also install this PostgreSQL major version (e.g. 16)
        #[arg(long, value_name = "VERSION")]
        install: Option<String>,
    },
    /// XanMod kernel matching the CPU's x86-64 psABI level
    Xanmod,
    /// Xray proxy from the GitHub release zip
    Xray,
    /// Swap file at /swapfile with fstab entry and sysctl tuning
    Swapfile {
        /// Size in megabytes
        #[arg(value_name = "MB", value_parser = clap::value_parser!(u64).range(1..))]
        size_mb: u64,
    },
    /// Upgrade Debian in place to the next stable release
    UpgradeDebian,
    /// Switch APT sources to a mirror
    AptSources {
        /// Mirror base URL (e.g. https://mirrors.example.org/debian)
        #[arg(long, value_name = "URL")]
        mirror: String,
    },
    /// List every provisioning target
    List,
    /// Print detected host facts
    Facts,
}

impl Cli {
    pub fn parse_args() -> Self {
        <Self as clap::Parser>::parse()
    }
}
