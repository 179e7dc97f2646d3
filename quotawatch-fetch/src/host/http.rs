//! HTTP client with tracing and status classification.
//!
//! This module wraps `reqwest` so every fetcher gets:
//! - A per-request deadline
//! - Request/response tracing
//! - Non-success statuses mapped onto [`FetchError`] variants the auth
//!   retry policy understands (401 → `Unauthorized`, 403 → `Forbidden`)

use reqwest::{Client, Response, StatusCode, header};
use std::time::Duration;
use tracing::{debug, instrument};
use url::Url;

use crate::error::FetchError;

/// Default request timeout.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Longest response body excerpt kept in errors.
const MAX_ERROR_BODY: usize = 256;

/// User agent string for `QuotaWatch`.
const USER_AGENT: &str = concat!("QuotaWatch/", env!("CARGO_PKG_VERSION"));

// ============================================================================
// HTTP Client
// ============================================================================

/// HTTP client wrapper with tracing and a fixed request deadline.
#[derive(Debug, Clone)]
pub struct HttpClient {
    inner: Client,
    timeout: Duration,
}

impl HttpClient {
    /// Creates a client with the default timeout.
    ///
    /// # Errors
    ///
    /// Returns `FetchError::Http` if the TLS backend cannot be initialized.
    pub fn new() -> Result<Self, FetchError> {
        Self::with_timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    /// Creates a client with a custom timeout.
    ///
    /// # Errors
    ///
    /// Returns `FetchError::Http` if the TLS backend cannot be initialized.
    pub fn with_timeout(timeout: Duration) -> Result<Self, FetchError> {
        let inner = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self { inner, timeout })
    }

    /// The configured request deadline.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Performs a GET and decodes a JSON body.
    ///
    /// When `bearer` is set it is sent as `Authorization: Bearer <token>`.
    ///
    /// # Errors
    ///
    /// Transport failures, non-success statuses and undecodable bodies.
    #[instrument(skip(self, bearer), fields(url = %url))]
    pub async fn get_json(
        &self,
        url: &str,
        bearer: Option<&str>,
    ) -> Result<serde_json::Value, FetchError> {
        Url::parse(url).map_err(|e| FetchError::Config(format!("invalid URL {url}: {e}")))?;
        debug!("GET request");

        let mut request = self.inner.get(url).header(header::ACCEPT, "application/json");
        if let Some(token) = bearer.filter(|t| !t.is_empty()) {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| self.map_transport(e))?;
        debug!(status = %response.status(), "Response received");

        let response = check_status(response).await?;
        let body = response.json().await.map_err(|e| self.map_transport(e))?;
        Ok(body)
    }

    fn map_transport(&self, err: reqwest::Error) -> FetchError {
        if err.is_timeout() {
            FetchError::Timeout(self.timeout.as_secs())
        } else {
            FetchError::Http(err)
        }
    }
}

// ============================================================================
// Status Classification
// ============================================================================

/// Passes successful responses through and turns the rest into errors.
async fn check_status(response: Response) -> Result<Response, FetchError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let retry_after = response
        .headers()
        .get(header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok());
    let body = response.text().await.unwrap_or_default();

    Err(status_error(status, retry_after, body))
}

/// Maps a non-success status onto a fetch error.
pub(crate) fn status_error(
    status: StatusCode,
    retry_after: Option<u64>,
    body: String,
) -> FetchError {
    let body = truncate(body);
    match status {
        StatusCode::UNAUTHORIZED => FetchError::Unauthorized(body),
        StatusCode::FORBIDDEN => FetchError::Forbidden(body),
        StatusCode::TOO_MANY_REQUESTS => FetchError::RateLimited { retry_after },
        _ => FetchError::Status {
            status: status.as_u16(),
            body,
        },
    }
}

fn truncate(mut body: String) -> String {
    if body.len() > MAX_ERROR_BODY {
        let mut cut = MAX_ERROR_BODY;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
        body.push('…');
    }
    body
}

// ============================================================================
// Tests
// ============================================================================
