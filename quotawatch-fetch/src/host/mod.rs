//! Host APIs used by fetchers and credential sources.
//!
//! - [`keychain`] - Secure credential storage (system keychain)
//! - [`http`] - HTTP client with tracing and status classification

pub mod http;
pub mod keychain;

// Re-export key types
pub use http::HttpClient;
pub use keychain::{KeychainApi, SystemKeychain};
