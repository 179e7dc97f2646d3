// Lint configuration for this crate
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

//! # `QuotaWatch` Fetch
//!
//! Fetch capabilities and host APIs for the `QuotaWatch` agent.
//!
//! ## Capabilities
//!
//! - [`fetcher::UsageFetcher`] - Produces one [`Snapshot`](quotawatch_core::Snapshot) per call
//! - [`credentials::CredentialRefresher`] - Re-reads a credential on demand
//!
//! Every failure is a [`FetchError`], classified by [`FetchError::kind`]
//! into transient, auth, cancelled, or fatal.
//!
//! ## Host APIs
//!
//! - [`host::http`] - HTTP client with status classification
//! - [`host::keychain`] - Secure credential storage (system keychain)
//!
//! ## Example
//!
//! ```ignore
//! use quotawatch_fetch::{EnvCredential, JsonEndpointFetcher, MetricSpec, UsageFetcher};
//!
//! let fetcher = JsonEndpointFetcher::new(
//!     "synthetic",
//!     "https://api.example.com/v2/quotas",
//!     vec![MetricSpec::new("sub", "/subscription/requests").with_limit_pointer("/subscription/limit")],
//! )?;
//! let snapshot = fetcher.fetch_usage().await?;
//! ```

pub mod credentials;
pub mod error;
pub mod fetcher;
pub mod host;
pub mod json;

// Errors
pub use error::{ErrorKind, FetchError, KeychainError};

// Capabilities
pub use credentials::{CredentialRefresher, EnvCredential, FileCredential, KeychainCredential};
pub use fetcher::UsageFetcher;

// Host APIs
pub use host::{
    http::HttpClient,
    keychain::{KeychainApi, SystemKeychain},
};

// Generic fetcher
pub use json::{JsonEndpointFetcher, LimitSource, MetricSpec};
