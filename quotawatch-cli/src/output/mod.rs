//! Output formatting for CLI.

mod json;
mod text;

pub use json::{JsonFormatter, ProviderOutput, SessionOutput};
pub use text::TextFormatter;
