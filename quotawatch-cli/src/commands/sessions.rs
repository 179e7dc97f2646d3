//! Sessions command - usage session history.

use anyhow::Result;
use chrono::Utc;
use clap::Args;
use quotawatch_store::{AgentConfig, SqliteStore, Store, default_database_path};
use std::io::IsTerminal;
use std::path::PathBuf;

use crate::output::{JsonFormatter, SessionOutput, TextFormatter};
use crate::{Cli, OutputFormat};

/// Arguments for the sessions command.
#[derive(Args)]
pub struct SessionsArgs {
    /// Only show this provider.
    #[arg(long, short)]
    pub provider: Option<String>,

    /// Maximum number of sessions.
    #[arg(long, short = 'n', default_value = "20")]
    pub limit: usize,

    /// Database path (overrides the config).
    #[arg(long)]
    pub database: Option<PathBuf>,
}

/// Runs the sessions command.
pub async fn run(args: &SessionsArgs, cli: &Cli) -> Result<()> {
    let db_path = match &args.database {
        Some(path) => path.clone(),
        None => match AgentConfig::load(&cli.config_path()).await {
            Ok(config) => config.database_path(),
            Err(_) => default_database_path(),
        },
    };
    if !db_path.exists() {
        anyhow::bail!("No database at {}; has `quotawatch run` been started?", db_path.display());
    }

    let store = SqliteStore::open(&db_path).await?;
    let sessions = store
        .session_history(args.provider.as_deref(), args.limit)
        .await?;
    let now = Utc::now();

    match cli.format {
        OutputFormat::Text => {
            let formatter = TextFormatter::new(std::io::stdout().is_terminal());
            println!("{}", formatter.format_sessions(&sessions, now));
        }
        OutputFormat::Json => {
            let output: Vec<_> = sessions.iter().map(|s| SessionOutput::new(s, now)).collect();
            println!("{}", JsonFormatter::new(cli.pretty).format(&output)?);
        }
    }

    Ok(())
}
