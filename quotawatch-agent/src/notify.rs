//! Threshold alerts.
//!
//! The [`Notifier`] capability receives one [`QuotaStatus`] per quota per
//! successful poll. [`ThresholdNotifier`] compares utilization against
//! warning and critical thresholds and hands alerts to its [`AlertSink`]s.
//! Each level fires at most once per quota cycle; the log clears when the
//! quota resets or drops back below the warning threshold.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use quotawatch_store::NotificationConfig;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, error, warn};

use crate::error::NotifyError;

// ============================================================================
// Types
// ============================================================================

/// One quota's state after a poll.
#[derive(Debug, Clone, PartialEq)]
pub struct QuotaStatus {
    /// Provider instance name.
    pub provider: String,
    /// Quota key.
    pub quota_key: String,
    /// Percent of the limit consumed.
    pub utilization: f64,
    /// Quota limit, when known.
    pub limit: Option<f64>,
    /// The quota's window reset on this poll.
    pub reset_occurred: bool,
}

/// Receives per-quota status after every successful poll.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Evaluates one quota. Never fails; delivery problems are logged.
    async fn check(&self, status: &QuotaStatus);
}

/// Alert severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    /// Warning threshold crossed.
    Warning,
    /// Critical threshold crossed.
    Critical,
    /// Quota window reset.
    Reset,
}

impl std::fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Warning => "warning",
            Self::Critical => "critical",
            Self::Reset => "reset",
        })
    }
}

/// An alert ready for delivery.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    /// Provider instance name.
    pub provider: String,
    /// Quota key.
    pub quota_key: String,
    /// Severity.
    pub level: AlertLevel,
    /// Utilization in percent.
    pub utilization: f64,
    /// Quota limit, when known.
    pub limit: Option<f64>,
    /// Human-readable summary.
    pub message: String,
    /// When the alert was raised.
    pub raised_at: DateTime<Utc>,
}

impl Alert {
    fn new(status: &QuotaStatus, level: AlertLevel) -> Self {
        let message = match level {
            AlertLevel::Reset => format!("{} {} quota has reset", status.provider, status.quota_key),
            _ => format!(
                "{} {} quota at {:.1}% ({level})",
                status.provider, status.quota_key, status.utilization
            ),
        };
        Self {
            provider: status.provider.clone(),
            quota_key: status.quota_key.clone(),
            level,
            utilization: status.utilization,
            limit: status.limit,
            message,
            raised_at: Utc::now(),
        }
    }
}

// ============================================================================
// Sinks
// ============================================================================

/// Delivers alerts somewhere.
#[async_trait]
pub trait AlertSink: Send + Sync {
    /// Sink name for logs.
    fn name(&self) -> &str;

    /// Delivers one alert.
    async fn deliver(&self, alert: &Alert) -> Result<(), NotifyError>;
}

/// Writes alerts to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

#[async_trait]
impl AlertSink for LogSink {
    fn name(&self) -> &str {
        "log"
    }

    async fn deliver(&self, alert: &Alert) -> Result<(), NotifyError> {
        warn!(
            provider = %alert.provider,
            quota = %alert.quota_key,
            level = %alert.level,
            utilization = alert.utilization,
            "{}",
            alert.message
        );
        Ok(())
    }
}

/// POSTs alerts as JSON to a webhook.
#[derive(Debug, Clone)]
pub struct WebhookSink {
    client: reqwest::Client,
    url: String,
}

impl WebhookSink {
    /// Request timeout for webhook calls.
    pub const TIMEOUT: Duration = Duration::from_secs(10);

    /// Creates a sink for `url`.
    ///
    /// # Errors
    ///
    /// `NotifyError::Http` if the HTTP client cannot be built.
    pub fn new(url: impl Into<String>) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder().timeout(Self::TIMEOUT).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl AlertSink for WebhookSink {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn deliver(&self, alert: &Alert) -> Result<(), NotifyError> {
        let response = self.client.post(&self.url).json(alert).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(NotifyError::Status(status.as_u16()));
        }
        debug!(url = %self.url, "Webhook delivered");
        Ok(())
    }
}

// ============================================================================
// Threshold Notifier
// ============================================================================

type AlertKey = (String, String);

/// Threshold engine with once-per-cycle alert deduplication.
pub struct ThresholdNotifier {
    config: NotificationConfig,
    sinks: Vec<Arc<dyn AlertSink>>,
    sent: Mutex<HashMap<AlertKey, HashSet<AlertLevel>>>,
}

impl ThresholdNotifier {
    /// Creates a notifier that logs alerts.
    pub fn new(config: NotificationConfig) -> Self {
        Self {
            config,
            sinks: vec![Arc::new(LogSink)],
            sent: Mutex::new(HashMap::new()),
        }
    }

    /// Creates a notifier from config, adding a webhook sink when configured.
    ///
    /// # Errors
    ///
    /// `NotifyError::Http` if the webhook client cannot be built.
    pub fn from_config(config: NotificationConfig) -> Result<Self, NotifyError> {
        let webhook = config.webhook_url.clone();
        let mut notifier = Self::new(config);
        if let Some(url) = webhook {
            notifier = notifier.with_sink(Arc::new(WebhookSink::new(url)?));
        }
        Ok(notifier)
    }

    /// Adds a delivery sink.
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn AlertSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Effective (warning, critical) thresholds in percent for a quota.
    pub fn thresholds(&self, quota_key: &str, limit: Option<f64>) -> (f64, f64) {
        let defaults = (self.config.warning, self.config.critical);
        let Some(o) = self.config.overrides.get(quota_key) else {
            return defaults;
        };
        if !o.is_absolute {
            return (o.warning, o.critical);
        }
        match limit {
            Some(limit) if limit > 0.0 => (o.warning / limit * 100.0, o.critical / limit * 100.0),
            _ => defaults,
        }
    }

    fn level_for(&self, status: &QuotaStatus) -> (Option<AlertLevel>, bool) {
        let (warning, critical) = self.thresholds(&status.quota_key, status.limit);
        let level = if status.utilization >= critical && self.config.notify_critical {
            Some(AlertLevel::Critical)
        } else if status.utilization >= warning && self.config.notify_warning {
            Some(AlertLevel::Warning)
        } else {
            None
        };
        (level, status.utilization < warning)
    }

    fn sent(&self) -> std::sync::MutexGuard<'_, HashMap<AlertKey, HashSet<AlertLevel>>> {
        self.sent.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn dispatch(&self, alert: &Alert) -> bool {
        let mut delivered = false;
        for sink in &self.sinks {
            match sink.deliver(alert).await {
                Ok(()) => delivered = true,
                Err(e) => error!(
                    sink = sink.name(),
                    provider = %alert.provider,
                    quota = %alert.quota_key,
                    error = %e,
                    "Alert delivery failed"
                ),
            }
        }
        delivered
    }
}

#[async_trait]
impl Notifier for ThresholdNotifier {
    async fn check(&self, status: &QuotaStatus) {
        let key = (status.provider.clone(), status.quota_key.clone());

        if status.reset_occurred {
            self.sent().remove(&key);
            if self.config.notify_reset {
                self.dispatch(&Alert::new(status, AlertLevel::Reset)).await;
            }
            return;
        }

        let (level, below_warning) = self.level_for(status);
        if below_warning {
            self.sent().remove(&key);
        }
        let Some(level) = level else {
            return;
        };

        if !self.sent().entry(key.clone()).or_default().insert(level) {
            debug!(provider = %status.provider, quota = %status.quota_key, %level, "Alert already sent this cycle");
            return;
        }

        if !self.dispatch(&Alert::new(status, level)).await {
            if let Some(levels) = self.sent().get_mut(&key) {
                levels.remove(&level);
            }
        }
    }
}

impl std::fmt::Debug for ThresholdNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThresholdNotifier")
            .field("config", &self.config)
            .field("sinks", &self.sinks.iter().map(|s| s.name()).collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use quotawatch_store::ThresholdOverride;

    #[derive(Default)]
    struct Recording {
        alerts: Mutex<Vec<Alert>>,
        fail: bool,
    }

    #[async_trait]
    impl AlertSink for Recording {
        fn name(&self) -> &str {
            "recording"
        }

        async fn deliver(&self, alert: &Alert) -> Result<(), NotifyError> {
            if self.fail {
                return Err(NotifyError::Status(500));
            }
            self.alerts.lock().unwrap().push(alert.clone());
            Ok(())
        }
    }

    impl Recording {
        fn levels(&self) -> Vec<AlertLevel> {
            self.alerts.lock().unwrap().iter().map(|a| a.level).collect()
        }
    }

    fn status(utilization: f64) -> QuotaStatus {
        QuotaStatus {
            provider: "zai".into(),
            quota_key: "tokens".into(),
            utilization,
            limit: Some(1000.0),
            reset_occurred: false,
        }
    }

    fn notifier(config: NotificationConfig) -> (ThresholdNotifier, Arc<Recording>) {
        let sink = Arc::new(Recording::default());
        let mut notifier = ThresholdNotifier::new(config);
        notifier.sinks = vec![sink.clone()];
        (notifier, sink)
    }

    #[tokio::test]
    async fn test_each_level_fires_once_per_cycle() {
        let (notifier, sink) = notifier(NotificationConfig::default());

        notifier.check(&status(50.0)).await;
        notifier.check(&status(81.0)).await;
        notifier.check(&status(85.0)).await;
        notifier.check(&status(96.0)).await;
        notifier.check(&status(99.0)).await;

        assert_eq!(sink.levels(), vec![AlertLevel::Warning, AlertLevel::Critical]);
    }

    #[tokio::test]
    async fn test_reset_clears_log() {
        let mut config = NotificationConfig::default();
        config.notify_reset = true;
        let (notifier, sink) = notifier(config);

        notifier.check(&status(90.0)).await;
        notifier.check(&QuotaStatus {
            reset_occurred: true,
            ..status(0.0)
        })
        .await;
        notifier.check(&status(90.0)).await;

        assert_eq!(
            sink.levels(),
            vec![AlertLevel::Warning, AlertLevel::Reset, AlertLevel::Warning]
        );
    }

    #[tokio::test]
    async fn test_dropping_below_warning_rearms() {
        let (notifier, sink) = notifier(NotificationConfig::default());

        notifier.check(&status(82.0)).await;
        notifier.check(&status(40.0)).await;
        notifier.check(&status(82.0)).await;

        assert_eq!(sink.levels(), vec![AlertLevel::Warning, AlertLevel::Warning]);
    }

    #[tokio::test]
    async fn test_disabled_levels_are_silent() {
        let mut config = NotificationConfig::default();
        config.notify_warning = false;
        let (notifier, sink) = notifier(config);

        notifier.check(&status(85.0)).await;
        assert!(sink.levels().is_empty());
        notifier.check(&status(97.0)).await;
        assert_eq!(sink.levels(), vec![AlertLevel::Critical]);
    }

    #[test]
    fn test_absolute_override_converts_via_limit() {
        let mut config = NotificationConfig::default();
        config.overrides.insert(
            "tokens".into(),
            ThresholdOverride {
                warning: 500.0,
                critical: 900.0,
                is_absolute: true,
            },
        );
        config.overrides.insert(
            "search".into(),
            ThresholdOverride {
                warning: 50.0,
                critical: 70.0,
                is_absolute: false,
            },
        );
        let notifier = ThresholdNotifier::new(config);

        assert_eq!(notifier.thresholds("tokens", Some(1000.0)), (50.0, 90.0));
        assert_eq!(notifier.thresholds("tokens", None), (80.0, 95.0));
        assert_eq!(notifier.thresholds("search", None), (50.0, 70.0));
        assert_eq!(notifier.thresholds("other", Some(10.0)), (80.0, 95.0));
    }

    #[tokio::test]
    async fn test_failed_delivery_retries_next_poll() {
        let sink = Arc::new(Recording {
            fail: true,
            ..Recording::default()
        });
        let mut notifier = ThresholdNotifier::new(NotificationConfig::default());
        notifier.sinks = vec![sink.clone()];

        notifier.check(&status(90.0)).await;
        let key = ("zai".to_string(), "tokens".to_string());
        assert!(notifier.sent().get(&key).unwrap().is_empty());
    }
}
