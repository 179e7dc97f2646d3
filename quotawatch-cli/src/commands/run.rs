//! Run command - the long-running polling agent.

use anyhow::{Context, Result};
use clap::Args;
use quotawatch_agent::{Notifier, Orchestrator, OrchestratorConfig, ThresholdNotifier, shutdown};
use quotawatch_store::{SqliteStore, Store};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

use crate::{Cli, setup};

/// Arguments for the run command.
#[derive(Args)]
pub struct RunArgs {
    /// Only poll this provider.
    #[arg(long, short)]
    pub provider: Option<String>,

    /// Database path (overrides the config).
    #[arg(long)]
    pub database: Option<PathBuf>,
}

/// Runs one orchestrator per provider until Ctrl+C.
pub async fn run(args: &RunArgs, cli: &Cli) -> Result<()> {
    let config = setup::load_config(cli).await?;
    let providers = setup::select_providers(&config, args.provider.as_deref())?;

    let db_path = args.database.clone().unwrap_or_else(|| config.database_path());
    let store: Arc<dyn Store> = Arc::new(
        SqliteStore::open(&db_path)
            .await
            .with_context(|| format!("Failed to open database {}", db_path.display()))?,
    );
    let notifier: Arc<dyn Notifier> =
        Arc::new(ThresholdNotifier::from_config(config.notifications.clone())?);

    let (trigger, signal) = shutdown::channel();
    let mut tasks = Vec::with_capacity(providers.len());

    for provider in providers {
        let orchestrator_config = OrchestratorConfig::new(config.poll_interval_for(provider))
            .with_idle_timeout(config.idle_timeout())
            .with_auth_failure_threshold(config.auth_failure_threshold);

        let mut agent = Orchestrator::new(
            setup::fetcher(provider)?,
            setup::normalizer(provider),
            store.clone(),
            orchestrator_config,
        )?
        .with_notifier(notifier.clone());
        if let Some(refresher) = setup::refresher(&provider.credential) {
            agent = agent.with_refresher(refresher);
        }

        tasks.push(tokio::spawn(agent.run(signal.clone())));
    }
    drop(signal);

    info!(
        providers = tasks.len(),
        database = %db_path.display(),
        "QuotaWatch running; press Ctrl+C to stop"
    );

    let stopper = tokio::spawn(stop_on_signal(tokio::signal::ctrl_c(), trigger));

    let results = futures::future::join_all(tasks).await;
    stopper.abort();

    let mut failed = 0usize;
    for result in results {
        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!(error = %e, "Agent failed");
                failed += 1;
            }
            Err(e) => {
                error!(error = %e, "Agent task panicked");
                failed += 1;
            }
        }
    }

    if failed > 0 {
        anyhow::bail!("{failed} agent(s) failed");
    }
    info!("All agents stopped");
    Ok(())
}

/// Triggers shutdown once `signal` fires.
///
/// If the signal cannot be listened for, the agents keep running and the
/// trigger is held until the task is aborted.
async fn stop_on_signal<S>(signal: S, trigger: shutdown::ShutdownTrigger)
where
    S: Future<Output = std::io::Result<()>>,
{
    if let Err(e) = signal.await {
        error!(error = %e, "Failed to listen for Ctrl+C; stop the process another way");
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
    trigger.trigger();
}
