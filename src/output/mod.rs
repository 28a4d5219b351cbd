//! Output formatters for run summaries and plans.
//!
//! - [`text`]: human-readable, optionally colored
//! - [`json`]: machine-readable for scripting

pub mod json;
pub mod text;

pub use json::{JsonOutputError, JsonPlan, JsonReport};
pub use text::TextOutput;
