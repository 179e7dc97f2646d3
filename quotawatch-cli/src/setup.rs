//! Builds agent components from configuration.

use anyhow::{Context, Result};
use quotawatch_agent::KeyedNormalizer;
use quotawatch_fetch::{
    CredentialRefresher, EnvCredential, FileCredential, JsonEndpointFetcher, KeychainCredential,
    MetricSpec, SystemKeychain,
};
use quotawatch_store::{AgentConfig, CredentialConfig, MetricConfig, ProviderConfig};
use std::sync::Arc;

use crate::Cli;

/// Loads and validates the config file named on the command line.
pub async fn load_config(cli: &Cli) -> Result<AgentConfig> {
    let path = cli.config_path();
    if !path.exists() {
        anyhow::bail!(
            "No config file at {}; create one with `quotawatch config init`",
            path.display()
        );
    }
    AgentConfig::load(&path)
        .await
        .with_context(|| format!("Failed to load {}", path.display()))
}

/// Selects providers by name, or every enabled one.
pub fn select_providers<'a>(
    config: &'a AgentConfig,
    name: Option<&str>,
) -> Result<Vec<&'a ProviderConfig>> {
    match name {
        Some(name) => config
            .provider(name)
            .map(|p| vec![p])
            .ok_or_else(|| anyhow::anyhow!("Unknown provider: {name}")),
        None => {
            let providers: Vec<_> = config.enabled_providers().collect();
            if providers.is_empty() {
                anyhow::bail!("No enabled providers in config");
            }
            Ok(providers)
        }
    }
}

fn metric_spec(metric: &MetricConfig) -> MetricSpec {
    let mut spec = MetricSpec::new(&metric.key, &metric.used);
    if let Some(pointer) = &metric.limit {
        spec = spec.with_limit_pointer(pointer);
    } else if let Some(limit) = metric.limit_value {
        spec = spec.with_limit_value(limit);
    }
    if let Some(pointer) = &metric.resets_at {
        spec = spec.with_resets_at(pointer);
    }
    spec
}

/// Builds the HTTP fetcher for a provider.
pub fn fetcher(provider: &ProviderConfig) -> Result<JsonEndpointFetcher> {
    let metrics = provider.metrics.iter().map(metric_spec).collect();
    JsonEndpointFetcher::with_timeout(&provider.name, &provider.url, metrics, provider.timeout())
        .with_context(|| format!("Failed to set up provider {}", provider.name))
}

/// Builds the credential source for a provider, if it has one.
pub fn refresher(credential: &CredentialConfig) -> Option<Arc<dyn CredentialRefresher>> {
    match credential {
        CredentialConfig::None => None,
        CredentialConfig::Env { var } => Some(Arc::new(EnvCredential::new(var))),
        CredentialConfig::File { path, json_pointer } => {
            let mut source = FileCredential::new(path);
            if let Some(pointer) = json_pointer {
                source = source.with_json_pointer(pointer);
            }
            Some(Arc::new(source))
        }
        CredentialConfig::Keychain { service, account } => Some(Arc::new(
            KeychainCredential::new(Arc::new(SystemKeychain::new()), service, account),
        )),
    }
}

/// Session vector layout for a provider.
pub fn normalizer(provider: &ProviderConfig) -> KeyedNormalizer {
    KeyedNormalizer::new(provider.session_keys())
}
