//! Check command - one fetch per provider.

use anyhow::Result;
use clap::Args;
use quotawatch_agent::Normalizer;
use quotawatch_fetch::UsageFetcher;
use quotawatch_store::ProviderConfig;
use std::io::IsTerminal;
use tracing::debug;

use crate::output::{JsonFormatter, ProviderOutput, TextFormatter};
use crate::{Cli, OutputFormat, setup};

/// Arguments for the check command.
#[derive(Args)]
pub struct CheckArgs {
    /// Provider to check (any configured one, enabled or not).
    #[arg(long, short)]
    pub provider: Option<String>,
}

/// Runs the check command.
pub async fn run(args: &CheckArgs, cli: &Cli) -> Result<()> {
    let config = setup::load_config(cli).await?;
    let providers = setup::select_providers(&config, args.provider.as_deref())?;

    let checks = providers.iter().map(|provider| check_one(provider));
    let outputs = futures::future::join_all(checks).await;

    match cli.format {
        OutputFormat::Text => {
            let formatter = TextFormatter::new(std::io::stdout().is_terminal());
            let blocks: Vec<String> = outputs
                .iter()
                .map(|(output, text)| match (&output.error, text) {
                    (Some(e), _) => formatter.format_error(&output.provider, e),
                    (None, Some((snapshot, values))) => formatter.format_snapshot(snapshot, values),
                    (None, None) => formatter.format_error(&output.provider, "no data"),
                })
                .collect();
            println!("{}", blocks.join("\n\n"));
        }
        OutputFormat::Json => {
            let formatter = JsonFormatter::new(cli.pretty);
            let outputs: Vec<_> = outputs.into_iter().map(|(output, _)| output).collect();
            if outputs.len() == 1 {
                println!("{}", formatter.format(&outputs[0])?);
            } else {
                println!("{}", formatter.format(&outputs)?);
            }
        }
    }

    Ok(())
}

type Fetched = (quotawatch_core::Snapshot, quotawatch_core::UsageVector);

async fn check_one(provider: &ProviderConfig) -> (ProviderOutput, Option<Fetched>) {
    let mut fetcher = match setup::fetcher(provider) {
        Ok(fetcher) => fetcher,
        Err(e) => return (ProviderOutput::error(&provider.name, format!("{e:#}")), None),
    };
    if let Some(refresher) = setup::refresher(&provider.credential) {
        match refresher.refresh().await {
            Some(credential) => fetcher.apply_credential(&credential),
            None => debug!(provider = %provider.name, source = %refresher.describe(), "No credential found"),
        }
    }

    match fetcher.fetch_usage().await {
        Ok(snapshot) => {
            let values = setup::normalizer(provider).session_values(&snapshot);
            let output = ProviderOutput::snapshot(&snapshot, values.as_slice().to_vec());
            (output, Some((snapshot, values)))
        }
        Err(e) => (ProviderOutput::error(&provider.name, e.to_string()), None),
    }
}
