// Lint configuration for this crate
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

//! QuotaWatch CLI - background quota polling and usage session tracking.
//!
//! # Examples
//!
//! ```bash
//! # Write a starter config
//! quotawatch config init
//!
//! # Poll every enabled provider until Ctrl+C
//! quotawatch run
//!
//! # One-off fetch, JSON output
//! quotawatch check --provider zai --format json
//!
//! # Recent usage sessions
//! quotawatch sessions --limit 10
//!
//! # Store a token in the system keychain
//! echo "$TOKEN" | quotawatch credential set --service zai --account default
//! ```

mod commands;
mod output;
mod setup;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use quotawatch_store::{AgentConfig, StoreError};
use std::path::PathBuf;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use commands::{check, config, credential, run, sessions};

// ============================================================================
// CLI Definition
// ============================================================================

/// QuotaWatch CLI - provider quota polling agent.
#[derive(Parser)]
#[command(name = "quotawatch")]
#[command(about = "Polls provider quota APIs and records usage sessions")]
#[command(long_about = r#"
QuotaWatch polls provider quota endpoints on a fixed interval, stores every
snapshot in a local SQLite database and groups changes in usage into
sessions. Threshold alerts go to the log and, optionally, a webhook.

Examples:
  quotawatch config init          # Write a starter config
  quotawatch run                  # Poll until Ctrl+C
  quotawatch check                # One fetch per enabled provider
  quotawatch sessions             # Session history
"#)]
#[command(version)]
pub struct Cli {
    /// Subcommand to run.
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (defaults to the platform config directory).
    #[arg(long, short, global = true)]
    pub config: Option<PathBuf>,

    /// Output format (text or json).
    #[arg(long, short = 'f', default_value = "text", global = true)]
    pub format: OutputFormat,

    /// Pretty-print JSON output.
    #[arg(long, global = true)]
    pub pretty: bool,

    /// Verbose output (show debug info).
    #[arg(long, short, global = true)]
    pub verbose: bool,

    /// Quiet mode (no logging).
    #[arg(long, short, global = true)]
    pub quiet: bool,
}

impl Cli {
    /// Effective config file path.
    pub fn config_path(&self) -> PathBuf {
        self.config.clone().unwrap_or_else(AgentConfig::default_path)
    }
}

/// CLI commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Run the polling agent until interrupted.
    Run(run::RunArgs),

    /// Fetch each provider once and print the readings.
    Check(check::CheckArgs),

    /// Show usage session history.
    #[command(visible_alias = "s")]
    Sessions(sessions::SessionsArgs),

    /// Manage configuration.
    Config(config::ConfigArgs),

    /// Manage keychain credentials.
    Credential(credential::CredentialArgs),
}

/// Output format options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Default)]
pub enum OutputFormat {
    /// Human-readable text.
    #[default]
    Text,
    /// JSON output for scripting.
    Json,
}

/// CLI exit codes.
#[repr(i32)]
pub enum ExitCode {
    /// General error.
    Error = 1,
    /// Missing or invalid configuration.
    Config = 2,
}

impl ExitCode {
    fn for_error(err: &anyhow::Error) -> Self {
        match err.downcast_ref::<StoreError>() {
            Some(StoreError::Config(_) | StoreError::Serialization(_)) => Self::Config,
            _ => Self::Error,
        }
    }
}

// ============================================================================
// Logging Setup
// ============================================================================

fn setup_logging(cli: &Cli, log_level: &str) {
    if cli.quiet {
        return;
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("quotawatch=debug,info")
        } else {
            EnvFilter::new(format!("quotawatch={log_level},warn"))
        }
    });

    let layer = fmt::layer().with_target(false).with_writer(std::io::stderr);
    let registry = tracing_subscriber::registry().with(filter);
    if matches!(cli.command, Commands::Run(_)) {
        registry.with(layer).init();
    } else {
        registry.with(layer.without_time()).init();
    }
}

/// Log level from the config file, if one can be read.
async fn configured_log_level(cli: &Cli) -> String {
    match AgentConfig::load(&cli.config_path()).await {
        Ok(config) => config.log_level,
        Err(_) => "info".to_string(),
    }
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = configured_log_level(&cli).await;
    setup_logging(&cli, &log_level);

    let result = match &cli.command {
        Commands::Run(args) => run::run(args, &cli).await,
        Commands::Check(args) => check::run(args, &cli).await,
        Commands::Sessions(args) => sessions::run(args, &cli).await,
        Commands::Config(args) => config::run(args, &cli).await,
        Commands::Credential(args) => credential::run(args, &cli).await,
    };

    if let Err(e) = result {
        if !cli.quiet {
            eprintln!("Error: {e:#}");
        }
        std::process::exit(ExitCode::for_error(&e) as i32);
    }

    Ok(())
}
