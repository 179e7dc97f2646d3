//! CLI command implementations.

pub mod check;
pub mod config;
pub mod credential;
pub mod run;
pub mod sessions;
