//! Fetch error types.

use thiserror::Error;

// ============================================================================
// Error Kind
// ============================================================================

/// Classification of a fetch failure, used by the poll cycle to pick a policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Network, timeout, rate limit, server or payload problem. Wait for the next tick.
    Transient,
    /// 401/403-equivalent. Handled by the auth retry policy.
    Auth,
    /// The fetch was abandoned because the agent is shutting down.
    Cancelled,
    /// Misconfiguration that will not heal by itself.
    Fatal,
}

// ============================================================================
// Main Fetch Error
// ============================================================================

/// Error type for fetch operations.
#[derive(Debug, Error)]
pub enum FetchError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Request timed out.
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    /// Rate limited by the provider.
    #[error("Rate limited, retry after {retry_after:?} seconds")]
    RateLimited {
        /// Seconds to wait before retrying.
        retry_after: Option<u64>,
    },

    /// Credential rejected (401).
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Credential lacks access (403).
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Any other non-success status.
    #[error("Unexpected status {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Truncated response body.
        body: String,
    },

    /// Invalid response from the provider.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// JSON parsing error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Core error.
    #[error("Core error: {0}")]
    Core(#[from] quotawatch_core::CoreError),

    /// Keychain error.
    #[error("Keychain error: {0}")]
    Keychain(#[from] KeychainError),

    /// Fetcher misconfigured.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Fetch abandoned on shutdown.
    #[error("Fetch cancelled")]
    Cancelled,
}

impl FetchError {
    /// Classifies this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Unauthorized(_) | Self::Forbidden(_) => ErrorKind::Auth,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Config(_) | Self::Core(quotawatch_core::CoreError::InvalidConfig(_)) => {
                ErrorKind::Fatal
            }
            _ => ErrorKind::Transient,
        }
    }

    /// Returns true for 401/403-equivalent failures.
    pub fn is_auth(&self) -> bool {
        self.kind() == ErrorKind::Auth
    }
}

// ============================================================================
// Keychain Error
// ============================================================================

/// Error type for keychain operations.
#[derive(Debug, Error)]
pub enum KeychainError {
    /// Access denied.
    #[error("Access denied to keychain")]
    AccessDenied,

    /// Platform error.
    #[error("Platform error: {0}")]
    Platform(String),

    /// Generic error.
    #[error("Keychain error: {0}")]
    Other(String),
}

impl From<keyring::Error> for KeychainError {
    fn from(err: keyring::Error) -> Self {
        match err {
            keyring::Error::Ambiguous(_) => {
                KeychainError::Other("Ambiguous credential entry".to_string())
            }
            keyring::Error::PlatformFailure(e) => KeychainError::Platform(e.to_string()),
            keyring::Error::NoStorageAccess(_) => KeychainError::AccessDenied,
            _ => KeychainError::Other(err.to_string()),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
