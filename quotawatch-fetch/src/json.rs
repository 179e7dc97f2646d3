//! Generic fetcher for JSON quota endpoints.
//!
//! Many quota APIs answer a bearer-authenticated GET with a JSON document
//! holding "used", "limit" and "renews at" numbers somewhere inside it. This
//! fetcher is configured with one [`MetricSpec`] per quota, each naming the
//! JSON pointers (RFC 6901) to read.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use quotawatch_core::{QuotaReading, Snapshot};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use crate::error::FetchError;
use crate::fetcher::UsageFetcher;
use crate::host::http::HttpClient;

// ============================================================================
// Metric Spec
// ============================================================================

/// Where the limit of a metric comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum LimitSource {
    /// Read from the response.
    Pointer(String),
    /// Fixed value (e.g., 100 for percentage metrics).
    Fixed(f64),
}

/// How to extract one quota from the response.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSpec {
    /// Quota key recorded on the reading.
    pub key: String,
    /// Pointer to the consumed amount.
    pub used: String,
    /// Limit source, if any.
    pub limit: Option<LimitSource>,
    /// Pointer to the window reset time (RFC 3339 string or Unix seconds).
    pub resets_at: Option<String>,
}

impl MetricSpec {
    /// Creates a spec reading only the used amount.
    pub fn new(key: impl Into<String>, used: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            used: used.into(),
            limit: None,
            resets_at: None,
        }
    }

    /// Reads the limit from the response.
    #[must_use]
    pub fn with_limit_pointer(mut self, pointer: impl Into<String>) -> Self {
        self.limit = Some(LimitSource::Pointer(pointer.into()));
        self
    }

    /// Uses a fixed limit.
    #[must_use]
    pub fn with_limit_value(mut self, limit: f64) -> Self {
        self.limit = Some(LimitSource::Fixed(limit));
        self
    }

    /// Reads the reset time from the response.
    #[must_use]
    pub fn with_resets_at(mut self, pointer: impl Into<String>) -> Self {
        self.resets_at = Some(pointer.into());
        self
    }

    fn extract(&self, body: &Value) -> Result<QuotaReading, FetchError> {
        let used = number_at(body, &self.used).ok_or_else(|| {
            FetchError::InvalidResponse(format!("{}: no number at {}", self.key, self.used))
        })?;

        let limit = match self.limit {
            Some(LimitSource::Pointer(ref pointer)) => Some(number_at(body, pointer).ok_or_else(
                || FetchError::InvalidResponse(format!("{}: no limit at {pointer}", self.key)),
            )?),
            Some(LimitSource::Fixed(value)) => Some(value),
            None => None,
        };

        let resets_at = self
            .resets_at
            .as_deref()
            .and_then(|pointer| body.pointer(pointer))
            .and_then(timestamp);

        Ok(QuotaReading {
            key: self.key.clone(),
            used,
            limit,
            resets_at,
        })
    }
}

/// Reads a number, accepting numeric strings.
fn number_at(body: &Value, pointer: &str) -> Option<f64> {
    match body.pointer(pointer)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Reads an RFC 3339 string or Unix seconds.
fn timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        Value::Number(n) => n
            .as_i64()
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single()),
        _ => None,
    }
}

// ============================================================================
// Fetcher
// ============================================================================

/// Fetches a JSON document and extracts configured metrics from it.
#[derive(Clone)]
pub struct JsonEndpointFetcher {
    provider: String,
    url: String,
    client: HttpClient,
    metrics: Vec<MetricSpec>,
    token: Option<String>,
}

impl JsonEndpointFetcher {
    /// Creates a fetcher with the default request timeout.
    ///
    /// # Errors
    ///
    /// `FetchError::Config` if no metrics are given; `FetchError::Http` if
    /// the HTTP client cannot be built.
    pub fn new(
        provider: impl Into<String>,
        url: impl Into<String>,
        metrics: Vec<MetricSpec>,
    ) -> Result<Self, FetchError> {
        Self::with_client(provider, url, metrics, HttpClient::new()?)
    }

    /// Creates a fetcher with a custom request timeout.
    ///
    /// # Errors
    ///
    /// Same as [`JsonEndpointFetcher::new`].
    pub fn with_timeout(
        provider: impl Into<String>,
        url: impl Into<String>,
        metrics: Vec<MetricSpec>,
        timeout: Duration,
    ) -> Result<Self, FetchError> {
        Self::with_client(provider, url, metrics, HttpClient::with_timeout(timeout)?)
    }

    fn with_client(
        provider: impl Into<String>,
        url: impl Into<String>,
        metrics: Vec<MetricSpec>,
        client: HttpClient,
    ) -> Result<Self, FetchError> {
        let provider = provider.into();
        if metrics.is_empty() {
            return Err(FetchError::Config(format!("{provider}: no metrics configured")));
        }
        Ok(Self {
            provider,
            url: url.into(),
            client,
            metrics,
            token: None,
        })
    }

    /// Sets the initial bearer token.
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Converts a response body into a snapshot.
    ///
    /// # Errors
    ///
    /// `FetchError::InvalidResponse` when a metric is missing, or a core
    /// validation error when a value is negative or non-finite.
    pub fn parse(&self, body: &Value) -> Result<Snapshot, FetchError> {
        let quotas = self
            .metrics
            .iter()
            .map(|spec| spec.extract(body))
            .collect::<Result<Vec<_>, _>>()?;
        let snapshot = Snapshot::new(self.provider.clone(), quotas);
        snapshot.validate()?;
        Ok(snapshot)
    }
}

impl std::fmt::Debug for JsonEndpointFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonEndpointFetcher")
            .field("provider", &self.provider)
            .field("url", &self.url)
            .field("metrics", &self.metrics.len())
            .field("has_token", &self.token.is_some())
            .finish()
    }
}

#[async_trait]
impl UsageFetcher for JsonEndpointFetcher {
    fn provider(&self) -> &str {
        &self.provider
    }

    async fn fetch_usage(&self) -> Result<Snapshot, FetchError> {
        let body = self.client.get_json(&self.url, self.token.as_deref()).await?;
        let snapshot = self.parse(&body)?;
        debug!(provider = %self.provider, quotas = snapshot.quotas.len(), "Parsed quota response");
        Ok(snapshot)
    }

    fn apply_credential(&mut self, credential: &str) {
        self.token = Some(credential.to_string());
    }
}

// ============================================================================
// Tests
// ============================================================================
