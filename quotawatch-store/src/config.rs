//! Agent configuration.
//!
//! A single JSON file describing the poll cadence, session and breaker
//! tuning, alert thresholds and the provider instances to watch.

use crate::error::StoreError;
use crate::persistence::{default_config_path, default_database_path, load_json, save_json};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

// ============================================================================
// Agent Config
// ============================================================================

/// Top-level configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Seconds between poll cycles.
    pub poll_interval_secs: u64,
    /// Seconds without a usage change after which a session closes.
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
    /// Consecutive post-retry auth failures before polling pauses.
    #[serde(default = "default_auth_threshold")]
    pub auth_failure_threshold: u32,
    /// Database location; defaults to the data directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_path: Option<PathBuf>,
    /// Log filter used when neither `RUST_LOG` nor `--verbose` is set.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Alert thresholds and delivery.
    #[serde(default)]
    pub notifications: NotificationConfig,
    /// Provider instances.
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
}

/// Alert configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationConfig {
    /// Warning threshold in percent.
    #[serde(default = "default_warning")]
    pub warning: f64,
    /// Critical threshold in percent.
    #[serde(default = "default_critical")]
    pub critical: f64,
    /// Send warning alerts.
    #[serde(default = "default_true")]
    pub notify_warning: bool,
    /// Send critical alerts.
    #[serde(default = "default_true")]
    pub notify_critical: bool,
    /// Send an alert when a quota window resets.
    #[serde(default)]
    pub notify_reset: bool,
    /// Per-quota threshold overrides, keyed by quota key.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub overrides: BTreeMap<String, ThresholdOverride>,
    /// Webhook receiving alerts as JSON POSTs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
}

/// Threshold override for one quota.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdOverride {
    /// Warning threshold.
    pub warning: f64,
    /// Critical threshold.
    pub critical: f64,
    /// Thresholds are absolute amounts rather than percentages.
    #[serde(default)]
    pub is_absolute: bool,
}

/// One provider instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Unique instance name (used in logs and records).
    pub name: String,
    /// Whether `run` polls this provider.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Overrides the global poll interval.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poll_interval_secs: Option<u64>,
    /// Quota endpoint.
    pub url: String,
    /// Where the bearer credential comes from.
    #[serde(default)]
    pub credential: CredentialConfig,
    /// Metrics extracted from the response.
    pub metrics: Vec<MetricConfig>,
    /// Metric keys forming the session usage vector, in order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub session_keys: Vec<String>,
    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

/// Credential source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CredentialConfig {
    /// No credential is sent.
    #[default]
    None,
    /// Environment variable.
    Env {
        /// Variable name.
        var: String,
    },
    /// File, optionally a JSON pointer inside it.
    File {
        /// File path.
        path: PathBuf,
        /// JSON pointer to a string inside the file.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        json_pointer: Option<String>,
    },
    /// System keychain entry.
    Keychain {
        /// Service name (prefixed with `quotawatch:` in the keychain).
        service: String,
        /// Account name.
        account: String,
    },
}

/// Extraction rule for one quota.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricConfig {
    /// Quota key.
    pub key: String,
    /// JSON pointer to the used amount.
    pub used: String,
    /// JSON pointer to the limit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<String>,
    /// Fixed limit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit_value: Option<f64>,
    /// JSON pointer to the reset time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resets_at: Option<String>,
}

fn default_idle_timeout() -> u64 {
    600
}

fn default_auth_threshold() -> u32 {
    3
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_warning() -> f64 {
    80.0
}

fn default_critical() -> f64 {
    95.0
}

fn default_true() -> bool {
    true
}

fn default_timeout() -> u64 {
    30
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            warning: default_warning(),
            critical: default_critical(),
            notify_warning: true,
            notify_critical: true,
            notify_reset: false,
            overrides: BTreeMap::new(),
            webhook_url: None,
        }
    }
}

// ============================================================================
// Loading & Validation
// ============================================================================

impl AgentConfig {
    /// Returns the default configuration file path.
    pub fn default_path() -> PathBuf {
        default_config_path()
    }

    /// Loads and validates a config file.
    ///
    /// # Errors
    ///
    /// IO, parse or validation failures.
    pub async fn load(path: &Path) -> Result<Self, StoreError> {
        debug!(path = %path.display(), "Loading config");
        let config: Self = load_json(path).await?;
        config.validate()?;
        Ok(config)
    }

    /// Validates and saves a config file.
    ///
    /// # Errors
    ///
    /// Validation or IO failures.
    pub async fn save(&self, path: &Path) -> Result<(), StoreError> {
        self.validate()?;
        save_json(path, self).await?;
        info!(path = %path.display(), "Config saved");
        Ok(())
    }

    /// A starter configuration with one disabled example provider.
    pub fn example() -> Self {
        Self {
            poll_interval_secs: 60,
            idle_timeout_secs: default_idle_timeout(),
            auth_failure_threshold: default_auth_threshold(),
            database_path: None,
            log_level: default_log_level(),
            notifications: NotificationConfig::default(),
            providers: vec![ProviderConfig {
                name: "example".to_string(),
                enabled: false,
                poll_interval_secs: None,
                url: "https://api.example.com/v1/quotas".to_string(),
                credential: CredentialConfig::Env {
                    var: "EXAMPLE_API_KEY".to_string(),
                },
                metrics: vec![MetricConfig {
                    key: "requests".to_string(),
                    used: "/requests/used".to_string(),
                    limit: Some("/requests/limit".to_string()),
                    limit_value: None,
                    resets_at: Some("/requests/resets_at".to_string()),
                }],
                session_keys: Vec::new(),
                timeout_secs: default_timeout(),
            }],
        }
    }

    /// Checks the invariants the agent relies on.
    ///
    /// # Errors
    ///
    /// `StoreError::Config` describing the first problem found.
    pub fn validate(&self) -> Result<(), StoreError> {
        if self.poll_interval_secs == 0 {
            return Err(invalid("poll_interval_secs must be greater than 0"));
        }
        if self.idle_timeout_secs == 0 {
            return Err(invalid("idle_timeout_secs must be greater than 0"));
        }
        if self.auth_failure_threshold == 0 {
            return Err(invalid("auth_failure_threshold must be at least 1"));
        }
        self.notifications.validate()?;

        let mut names = HashSet::new();
        for provider in &self.providers {
            if !names.insert(provider.name.as_str()) {
                return Err(invalid(format!("duplicate provider name {:?}", provider.name)));
            }
            provider.validate()?;
        }
        Ok(())
    }

    /// Effective database path.
    pub fn database_path(&self) -> PathBuf {
        self.database_path.clone().unwrap_or_else(default_database_path)
    }

    /// Idle timeout as a duration.
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    /// Effective poll interval for a provider.
    pub fn poll_interval_for(&self, provider: &ProviderConfig) -> Duration {
        Duration::from_secs(provider.poll_interval_secs.unwrap_or(self.poll_interval_secs))
    }

    /// Looks up a provider by name.
    pub fn provider(&self, name: &str) -> Option<&ProviderConfig> {
        self.providers.iter().find(|p| p.name == name)
    }

    /// Providers that `run` should poll.
    pub fn enabled_providers(&self) -> impl Iterator<Item = &ProviderConfig> {
        self.providers.iter().filter(|p| p.enabled)
    }
}

impl NotificationConfig {
    fn validate(&self) -> Result<(), StoreError> {
        check_thresholds("notifications", self.warning, self.critical, false)?;
        for (key, o) in &self.overrides {
            check_thresholds(&format!("override {key:?}"), o.warning, o.critical, o.is_absolute)?;
        }
        Ok(())
    }
}

impl ProviderConfig {
    fn validate(&self) -> Result<(), StoreError> {
        let name = &self.name;
        if name.trim().is_empty() {
            return Err(invalid("provider name must not be empty"));
        }
        if self.url.trim().is_empty() {
            return Err(invalid(format!("provider {name:?}: url must not be empty")));
        }
        if self.poll_interval_secs == Some(0) {
            return Err(invalid(format!(
                "provider {name:?}: poll_interval_secs must be greater than 0"
            )));
        }
        if self.timeout_secs == 0 {
            return Err(invalid(format!("provider {name:?}: timeout_secs must be greater than 0")));
        }
        if self.metrics.is_empty() {
            return Err(invalid(format!("provider {name:?}: no metrics configured")));
        }

        let mut keys = HashSet::new();
        for metric in &self.metrics {
            if !keys.insert(metric.key.as_str()) {
                return Err(invalid(format!("provider {name:?}: duplicate metric {:?}", metric.key)));
            }
            if metric.limit.is_some() && metric.limit_value.is_some() {
                return Err(invalid(format!(
                    "provider {name:?}: metric {:?} sets both limit and limit_value",
                    metric.key
                )));
            }
        }
        if let Some(unknown) = self.session_keys.iter().find(|k| !keys.contains(k.as_str())) {
            return Err(invalid(format!(
                "provider {name:?}: session key {unknown:?} is not a configured metric"
            )));
        }
        Ok(())
    }

    /// Metric keys forming the session usage vector, in order.
    ///
    /// Falls back to every metric in declaration order.
    pub fn session_keys(&self) -> Vec<String> {
        if self.session_keys.is_empty() {
            self.metrics.iter().map(|m| m.key.clone()).collect()
        } else {
            self.session_keys.clone()
        }
    }

    /// Request timeout as a duration.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn check_thresholds(
    what: &str,
    warning: f64,
    critical: f64,
    absolute: bool,
) -> Result<(), StoreError> {
    let upper = if absolute { f64::MAX } else { 100.0 };
    if !(warning > 0.0 && warning <= upper) || !(critical > 0.0 && critical <= upper) {
        return Err(invalid(format!("{what}: thresholds out of range")));
    }
    if warning >= critical {
        return Err(invalid(format!("{what}: warning must be below critical")));
    }
    Ok(())
}

fn invalid(message: impl Into<String>) -> StoreError {
    StoreError::Config(message.into())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal() -> AgentConfig {
        serde_json::from_str(
            r#"{
                "poll_interval_secs": 30,
                "providers": [{
                    "name": "zai",
                    "url": "https://api.example.com/quota",
                    "credential": {"type": "env", "var": "ZAI_API_KEY"},
                    "metrics": [
                        {"key": "tokens", "used": "/tokens/used", "limit": "/tokens/limit"},
                        {"key": "time", "used": "/time/used", "limit_value": 100}
                    ]
                }]
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_defaults_applied() {
        let config = minimal();
        assert_eq!(config.idle_timeout_secs, 600);
        assert_eq!(config.auth_failure_threshold, 3);
        assert_eq!(config.log_level, "info");
        assert!((config.notifications.warning - 80.0).abs() < f64::EPSILON);
        assert!((config.notifications.critical - 95.0).abs() < f64::EPSILON);

        let provider = &config.providers[0];
        assert!(provider.enabled);
        assert_eq!(provider.timeout_secs, 30);
        assert_eq!(provider.session_keys(), vec!["tokens", "time"]);
        assert_eq!(
            provider.credential,
            CredentialConfig::Env {
                var: "ZAI_API_KEY".to_string()
            }
        );
        config.validate().unwrap();
    }

    #[test]
    fn test_provider_interval_override() {
        let mut config = minimal();
        assert_eq!(config.poll_interval_for(&config.providers[0]), Duration::from_secs(30));
        config.providers[0].poll_interval_secs = Some(5);
        assert_eq!(config.poll_interval_for(&config.providers[0]), Duration::from_secs(5));
    }

    #[test]
    fn test_rejects_zero_interval() {
        let mut config = minimal();
        config.poll_interval_secs = 0;
        assert!(matches!(config.validate(), Err(StoreError::Config(_))));
    }

    #[test]
    fn test_rejects_zero_threshold() {
        let mut config = minimal();
        config.auth_failure_threshold = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_duplicate_providers() {
        let mut config = minimal();
        config.providers.push(config.providers[0].clone());
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("duplicate provider"));
    }

    #[test]
    fn test_rejects_unknown_session_key() {
        let mut config = minimal();
        config.providers[0].session_keys = vec!["tokens".into(), "nope".into()];
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("nope"));
    }

    #[test]
    fn test_rejects_provider_without_metrics() {
        let mut config = minimal();
        config.providers[0].metrics.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_absolute_override_may_exceed_hundred() {
        let mut config = minimal();
        config.notifications.overrides.insert(
            "tokens".into(),
            ThresholdOverride {
                warning: 800_000.0,
                critical: 950_000.0,
                is_absolute: true,
            },
        );
        config.validate().unwrap();

        config.notifications.overrides.get_mut("tokens").unwrap().is_absolute = false;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_example_is_valid() {
        AgentConfig::example().validate().unwrap();
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let config = minimal();

        config.save(&path).await.unwrap();
        let loaded = AgentConfig::load(&path).await.unwrap();
        assert_eq!(loaded, config);
    }
}
