// Lint configuration for this crate
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

//! # `QuotaWatch` Core
//!
//! Core types and models shared by every `QuotaWatch` crate.
//!
//! This crate has no I/O. It defines:
//!
//! - Domain models (usage vectors, snapshots, sessions, reset cycles)
//! - The core error type
//!
//! ## Key Types
//!
//! ### Usage Types
//! - [`UsageVector`] - Ordered numeric values compared poll-to-poll
//! - [`QuotaReading`] - One normalized quota measurement
//! - [`Snapshot`] - One successful, timestamped fetch
//!
//! ### Session Types
//! - [`SessionRecord`] - Persisted view of a usage session
//! - [`ResetCycle`] - One quota window between two resets

pub mod error;
pub mod models;

// Re-export error types
pub use error::CoreError;

// Re-export all model types
pub use models::{
    // Usage types
    QuotaReading,
    Snapshot,
    UsageVector,
    // Session types
    ResetCycle,
    SessionRecord,
};
