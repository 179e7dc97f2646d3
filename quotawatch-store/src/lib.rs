// Lint configuration for this crate
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

//! # `QuotaWatch` Store
//!
//! Persistence and configuration for the `QuotaWatch` agent.
//!
//! This crate provides:
//!
//! - **Store**: the async persistence capability the poll loop writes through
//! - **MemoryStore**: process-local implementation (tests, dry runs)
//! - **SqliteStore**: durable implementation backed by `rusqlite`
//! - **AgentConfig**: the JSON configuration file model
//! - **Persistence**: file I/O helpers and default paths
//!
//! ## Usage
//!
//! ```ignore
//! use quotawatch_store::{SqliteStore, Store, default_database_path};
//!
//! let store = SqliteStore::open(&default_database_path()).await?;
//! let id = store.insert_snapshot(&snapshot).await?;
//! let sessions = store.session_history(Some("zai"), 20).await?;
//! ```

pub mod config;
pub mod error;
pub mod memory;
pub mod persistence;
pub mod sqlite;
pub mod store;

pub use config::{
    AgentConfig, CredentialConfig, MetricConfig, NotificationConfig, ProviderConfig,
    ThresholdOverride,
};
pub use error::StoreError;
pub use memory::MemoryStore;
pub use persistence::{
    default_config_dir, default_config_path, default_data_dir, default_database_path,
    ensure_dir, load_json, save_json,
};
pub use sqlite::SqliteStore;
pub use store::Store;
