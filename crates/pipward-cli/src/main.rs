use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod completion;
mod config;
mod dispatch;
mod flows;
mod render;

#[derive(Parser, Debug)]
#[command(name = "pipward")]
#[command(about = "Hash-verified pip upgrades with a JSON audit ledger", long_about = None)]
struct Cli {
    /// Config file; defaults to ./pipward.toml when present.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// State directory for ledgers, reports and downloads.
    #[arg(long, global = true)]
    state_dir: Option<PathBuf>,
    /// Python interpreter whose pip is driven.
    #[arg(long, global = true)]
    python: Option<PathBuf>,
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Upgrade the environment to match a requirements manifest.
    Run {
        manifest: PathBuf,
        #[arg(long, conflicts_with = "force_reinstall")]
        dry_run: bool,
        #[arg(long)]
        force_reinstall: bool,
        /// Also run pip-audit and pipdeptree and record their findings.
        #[arg(long)]
        audit: bool,
        /// Write the ledger here instead of the state directory.
        #[arg(long)]
        ledger: Option<PathBuf>,
        #[arg(long)]
        user: bool,
        /// Hex Ed25519 public key the manifest must be signed with.
        #[arg(long, requires = "manifest_signature")]
        trusted_key: Option<String>,
        #[arg(long, requires = "trusted_key")]
        manifest_signature: Option<PathBuf>,
        #[arg(long)]
        no_retry: bool,
        #[arg(long)]
        keep_downloads: bool,
    },
    /// Show what a run would change.
    Plan {
        manifest: PathBuf,
        #[arg(long)]
        force_reinstall: bool,
    },
    /// Run the external audit tools and print their report as JSON.
    Audit,
    /// Render a ledger; defaults to the most recent one.
    Ledger {
        path: Option<PathBuf>,
        #[arg(long)]
        json: bool,
    },
    /// Orchestrator mode: JSON request on stdin or --input, JSON result on stdout.
    Json {
        #[arg(long)]
        input: Option<PathBuf>,
    },
    Completions {
        shell: Shell,
    },
    Version,
}

/// Fails when a global subscriber is already installed.
fn init_logging(verbose: bool) -> Result<(), TryInitError> {
    let filter = EnvFilter::try_from_env("PIPWARD_LOG").unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("warn")
        }
    });

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .with(filter)
        .try_init()
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(err) = init_logging(cli.verbose) {
        eprintln!("warning: logging disabled: {err}");
    }

    match dispatch::run_cli(cli) {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::from(1)
        }
    }
}
