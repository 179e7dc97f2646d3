//! Usage fetcher capability.
//!
//! A fetcher turns one provider account into a stream of [`Snapshot`]s, one
//! per call. It owns its transport (HTTP client, request deadline) and the
//! credential currently applied to it; scheduling, retries and persistence
//! live with the caller.

use async_trait::async_trait;
use quotawatch_core::Snapshot;

use crate::error::FetchError;

/// Fetches normalized usage for one provider account.
///
/// ## Implementing a Fetcher
///
/// ```ignore
/// struct ZaiFetcher { client: HttpClient, token: String }
///
/// #[async_trait]
/// impl UsageFetcher for ZaiFetcher {
///     fn provider(&self) -> &str {
///         "zai"
///     }
///
///     async fn fetch_usage(&self) -> Result<Snapshot, FetchError> {
///         let body = self.client.get_json(QUOTA_URL, Some(&self.token)).await?;
///         parse_quotas(&body)
///     }
///
///     fn apply_credential(&mut self, credential: &str) {
///         self.token = credential.to_string();
///     }
/// }
/// ```
///
/// The future returned by [`fetch_usage`](UsageFetcher::fetch_usage) may be
/// dropped at any await point when the agent shuts down.
#[async_trait]
pub trait UsageFetcher: Send + Sync {
    /// Provider instance name recorded on snapshots.
    fn provider(&self) -> &str;

    /// Performs one fetch.
    ///
    /// Authentication failures must surface as [`FetchError::Unauthorized`]
    /// or [`FetchError::Forbidden`] so the auth retry policy can see them.
    async fn fetch_usage(&self) -> Result<Snapshot, FetchError>;

    /// Replaces the credential used by subsequent fetches.
    ///
    /// Fetchers without credentials can keep the default no-op.
    fn apply_credential(&mut self, credential: &str) {
        let _ = credential;
    }
}
