//! Credential command - keychain-stored tokens.

use anyhow::Result;
use clap::{Args, Subcommand};
use quotawatch_fetch::{KeychainApi, SystemKeychain};
use std::io::{BufRead, IsTerminal};
use tracing::info;

use crate::Cli;

/// Arguments for the credential command.
#[derive(Args)]
pub struct CredentialArgs {
    #[command(subcommand)]
    pub action: CredentialAction,
}

/// Credential subcommands.
#[derive(Subcommand)]
pub enum CredentialAction {
    /// Store a credential read from stdin.
    Set(EntryArgs),

    /// Remove a stored credential.
    Delete(EntryArgs),
}

/// Identifies one keychain entry.
#[derive(Args)]
pub struct EntryArgs {
    /// Service name, as used in the provider's `keychain` credential.
    #[arg(long)]
    pub service: String,

    /// Account name.
    #[arg(long, default_value = "default")]
    pub account: String,
}

/// Runs the credential command.
pub async fn run(args: &CredentialArgs, _cli: &Cli) -> Result<()> {
    let keychain = SystemKeychain::new();
    match &args.action {
        CredentialAction::Set(entry) => {
            let secret = read_secret()?;
            keychain.set(&entry.service, &entry.account, &secret).await?;
            info!(service = %entry.service, account = %entry.account, "Credential stored");
            println!("Stored credential for {}/{}", entry.service, entry.account);
        }
        CredentialAction::Delete(entry) => {
            keychain.delete(&entry.service, &entry.account).await?;
            info!(service = %entry.service, account = %entry.account, "Credential deleted");
            println!("Deleted credential for {}/{}", entry.service, entry.account);
        }
    }
    Ok(())
}

fn read_secret() -> Result<String> {
    let stdin = std::io::stdin();
    if stdin.is_terminal() {
        eprint!("Credential: ");
    }
    let mut line = String::new();
    stdin.lock().read_line(&mut line)?;
    parse_secret(&line)
}

fn parse_secret(line: &str) -> Result<String> {
    let secret = line.trim();
    if secret.is_empty() {
        anyhow::bail!("No credential given on stdin");
    }
    Ok(secret.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_secret_trims() {
        assert_eq!(parse_secret("  tok-123\n").unwrap(), "tok-123");
        assert!(parse_secret("\n").is_err());
    }
}
