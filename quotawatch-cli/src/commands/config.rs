//! Config command - manage configuration.

use anyhow::Result;
use clap::{Args, Subcommand};
use quotawatch_store::{AgentConfig, CredentialConfig};
use tracing::info;

use crate::output::JsonFormatter;
use crate::{Cli, OutputFormat, setup};

/// Arguments for the config command.
#[derive(Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

/// Config subcommands.
#[derive(Subcommand)]
pub enum ConfigAction {
    /// Show current configuration.
    Show,

    /// Show configuration and database paths.
    Path,

    /// Write a starter configuration.
    Init {
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
}

/// Runs the config command.
pub async fn run(args: &ConfigArgs, cli: &Cli) -> Result<()> {
    match &args.action {
        ConfigAction::Show => show_config(cli).await,
        ConfigAction::Path => show_paths(cli).await,
        ConfigAction::Init { force } => init_config(*force, cli).await,
    }
}

fn describe_credential(credential: &CredentialConfig) -> String {
    match credential {
        CredentialConfig::None => "none".to_string(),
        CredentialConfig::Env { var } => format!("env {var}"),
        CredentialConfig::File { path, json_pointer } => match json_pointer {
            Some(pointer) => format!("file {} ({pointer})", path.display()),
            None => format!("file {}", path.display()),
        },
        CredentialConfig::Keychain { service, account } => format!("keychain {service}/{account}"),
    }
}

async fn show_config(cli: &Cli) -> Result<()> {
    let config = setup::load_config(cli).await?;

    match cli.format {
        OutputFormat::Text => {
            println!("QuotaWatch Configuration");
            println!("{}", "─".repeat(40));
            println!();
            println!("Poll interval:      {}s", config.poll_interval_secs);
            println!("Idle timeout:       {}s", config.idle_timeout_secs);
            println!("Auth pause after:   {} failures", config.auth_failure_threshold);
            println!("Database:           {}", config.database_path().display());
            println!(
                "Thresholds:         warning {}%, critical {}%",
                config.notifications.warning, config.notifications.critical
            );
            if let Some(url) = &config.notifications.webhook_url {
                println!("Webhook:            {url}");
            }
            println!();
            println!("Providers:");
            for provider in &config.providers {
                let state = if provider.enabled { "enabled" } else { "disabled" };
                println!(
                    "  • {} ({state}, every {}s)",
                    provider.name,
                    config.poll_interval_for(provider).as_secs()
                );
                println!("      url:        {}", provider.url);
                println!("      credential: {}", describe_credential(&provider.credential));
                println!("      session:    {}", provider.session_keys().join(", "));
            }
        }
        OutputFormat::Json => {
            println!("{}", JsonFormatter::new(cli.pretty).format(&config)?);
        }
    }

    Ok(())
}

async fn show_paths(cli: &Cli) -> Result<()> {
    let config_path = cli.config_path();
    let database_path = match AgentConfig::load(&config_path).await {
        Ok(config) => config.database_path(),
        Err(_) => quotawatch_store::default_database_path(),
    };

    match cli.format {
        OutputFormat::Text => {
            println!("Configuration Paths");
            println!("{}", "─".repeat(40));
            println!();
            println!("Config file: {}", config_path.display());
            println!("Database:    {}", database_path.display());
        }
        OutputFormat::Json => {
            let paths = serde_json::json!({
                "config_file": config_path.display().to_string(),
                "database": database_path.display().to_string(),
            });
            println!("{}", JsonFormatter::new(cli.pretty).format(&paths)?);
        }
    }

    Ok(())
}

async fn init_config(force: bool, cli: &Cli) -> Result<()> {
    let path = cli.config_path();
    if path.exists() && !force {
        anyhow::bail!("{} already exists; use --force to overwrite", path.display());
    }

    AgentConfig::example().save(&path).await?;
    info!(path = %path.display(), "Config written");
    println!("Wrote {}", path.display());
    println!("Edit the example provider and set \"enabled\": true to start polling it.");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_credential() {
        assert_eq!(describe_credential(&CredentialConfig::None), "none");
        assert_eq!(
            describe_credential(&CredentialConfig::Keychain {
                service: "zai".into(),
                account: "me".into()
            }),
            "keychain zai/me"
        );
    }
}
