//! Credential refresh capability and its built-in sources.
//!
//! A refresher is asked for the current credential before every poll and
//! again after an authentication failure. It must re-read its source every
//! time: other processes rotate tokens on disk or in the keychain, and the
//! agent only learns about it by looking.
//!
//! Read failures are not errors at this level. A refresher that cannot
//! produce a credential returns `None` and the caller keeps whatever it
//! already applied.

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

use crate::host::keychain::KeychainApi;

// ============================================================================
// Refresher Trait
// ============================================================================

/// Produces the freshest available credential.
#[async_trait]
pub trait CredentialRefresher: Send + Sync {
    /// Short description for logs (never the secret itself).
    fn describe(&self) -> String;

    /// Re-reads the credential source. `None` means nothing usable was found.
    async fn refresh(&self) -> Option<String>;
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

// ============================================================================
// Environment Variable
// ============================================================================

/// Reads a credential from an environment variable.
#[derive(Debug, Clone)]
pub struct EnvCredential {
    var: String,
}

impl EnvCredential {
    /// Creates a source for the named variable.
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

#[async_trait]
impl CredentialRefresher for EnvCredential {
    fn describe(&self) -> String {
        format!("env:{}", self.var)
    }

    async fn refresh(&self) -> Option<String> {
        match std::env::var(&self.var) {
            Ok(value) => non_empty(&value),
            Err(e) => {
                debug!(var = %self.var, error = %e, "Credential variable not readable");
                None
            }
        }
    }
}

// ============================================================================
// File
// ============================================================================

/// Reads a credential from a file, optionally from a JSON pointer inside it.
///
/// Useful for tools that keep an OAuth token in a JSON credentials file and
/// rewrite it on rotation.
#[derive(Debug, Clone)]
pub struct FileCredential {
    path: PathBuf,
    json_pointer: Option<String>,
}

impl FileCredential {
    /// Reads the whole (trimmed) file as the credential.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            json_pointer: None,
        }
    }

    /// Reads the string at `pointer` (RFC 6901) inside a JSON file.
    #[must_use]
    pub fn with_json_pointer(mut self, pointer: impl Into<String>) -> Self {
        self.json_pointer = Some(pointer.into());
        self
    }

    fn extract(&self, content: &str) -> Option<String> {
        let Some(ref pointer) = self.json_pointer else {
            return non_empty(content);
        };
        let document: serde_json::Value = match serde_json::from_str(content) {
            Ok(doc) => doc,
            Err(e) => {
                debug!(path = %self.path.display(), error = %e, "Credential file is not valid JSON");
                return None;
            }
        };
        document
            .pointer(pointer)
            .and_then(serde_json::Value::as_str)
            .and_then(non_empty)
    }
}

#[async_trait]
impl CredentialRefresher for FileCredential {
    fn describe(&self) -> String {
        match self.json_pointer {
            Some(ref pointer) => format!("file:{}#{pointer}", self.path.display()),
            None => format!("file:{}", self.path.display()),
        }
    }

    async fn refresh(&self) -> Option<String> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => self.extract(&content),
            Err(e) => {
                debug!(path = %self.path.display(), error = %e, "Credential file not readable");
                None
            }
        }
    }
}

// ============================================================================
// Keychain
// ============================================================================

/// Reads a credential from the system keychain.
#[derive(Clone)]
pub struct KeychainCredential {
    keychain: Arc<dyn KeychainApi>,
    service: String,
    account: String,
}

impl KeychainCredential {
    /// Creates a source for one keychain entry.
    pub fn new(
        keychain: Arc<dyn KeychainApi>,
        service: impl Into<String>,
        account: impl Into<String>,
    ) -> Self {
        Self {
            keychain,
            service: service.into(),
            account: account.into(),
        }
    }
}

impl std::fmt::Debug for KeychainCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeychainCredential")
            .field("service", &self.service)
            .field("account", &self.account)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl CredentialRefresher for KeychainCredential {
    fn describe(&self) -> String {
        format!("keychain:{}/{}", self.service, self.account)
    }

    async fn refresh(&self) -> Option<String> {
        match self.keychain.get(&self.service, &self.account).await {
            Ok(secret) => secret.as_deref().and_then(non_empty),
            Err(e) => {
                debug!(service = %self.service, account = %self.account, error = %e, "Keychain read failed");
                None
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
