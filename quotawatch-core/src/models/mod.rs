//! Domain models for `QuotaWatch`.
//!
//! ## Submodules
//!
//! - [`usage`] - Usage types (`UsageVector`, `QuotaReading`, `Snapshot`)
//! - [`session`] - Session and reset-cycle records

mod session;
mod usage;

pub use session::{ResetCycle, SessionRecord};
pub use usage::{QuotaReading, Snapshot, UsageVector};
