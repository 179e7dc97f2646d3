//! Agent error types.

use quotawatch_store::StoreError;
use thiserror::Error;

/// Errors that end an agent run or prevent one from starting.
///
/// Per-poll failures never surface here; they are logged and the next
/// tick proceeds.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Startup bookkeeping against the store failed.
    #[error("Bootstrap failed for {provider}: {source}")]
    Bootstrap {
        /// Provider instance name.
        provider: String,
        /// Underlying store error.
        #[source]
        source: StoreError,
    },

    /// Invalid agent configuration.
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Errors delivering an alert.
#[derive(Debug, Error)]
pub enum NotifyError {
    /// HTTP transport error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The receiver answered with a non-success status.
    #[error("Receiver returned HTTP {0}")]
    Status(u16),
}
