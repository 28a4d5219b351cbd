//! JSON output for run summaries and plans.
//!
//! # Output Schema
//!
//! ```json
//! {
//!   "summary": {
//!     "removed": 1,
//!     "added": 4,
//!     "updated": 0,
//!     "unchanged": 120,
//!     "errors": 1,
//!     "skipped": 0,
//!     "bytes_hashed": 7340032,
//!     "failures": [
//!       { "key": "NSN+NRN", "phase": "add", "kind": "file_not_found", "message": "..." }
//!     ],
//!     "elapsed_ms": 812,
//!     "interrupted": false,
//!     "dry_run": false
//!   },
//!   "exit_code": 0,
//!   "exit_code_name": "PS000"
//! }
//! ```

use std::io::Write;

use serde::Serialize;

use crate::error::ExitCode;
use crate::reconcile::{ReconciliationPlan, SyncSummary};

/// JSON document for a completed run.
#[derive(Debug, Serialize)]
pub struct JsonReport<'a> {
    /// Run summary
    pub summary: &'a SyncSummary,
    /// The exit code number
    pub exit_code: i32,
    /// The machine-readable exit code name (e.g., "PS000")
    pub exit_code_name: &'static str,
}

impl<'a> JsonReport<'a> {
    /// Wrap a summary with the exit code the process will return.
    #[must_use]
    pub fn new(summary: &'a SyncSummary, exit_code: ExitCode) -> Self {
        Self {
            summary,
            exit_code: exit_code.as_i32(),
            exit_code_name: exit_code.code_prefix(),
        }
    }

    /// Write the report followed by a newline.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or writing fails.
    pub fn write_to<W: Write>(&self, writer: &mut W, pretty: bool) -> Result<(), JsonOutputError> {
        write_json(self, writer, pretty)
    }
}

/// JSON document for a plan preview.
#[derive(Debug, Serialize)]
pub struct JsonPlan<'a> {
    /// Keys per group
    pub plan: &'a ReconciliationPlan,
    /// Total keys across groups
    pub total: usize,
}

impl<'a> JsonPlan<'a> {
    #[must_use]
    pub fn new(plan: &'a ReconciliationPlan) -> Self {
        Self {
            plan,
            total: plan.total(),
        }
    }

    /// Write the plan followed by a newline.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or writing fails.
    pub fn write_to<W: Write>(&self, writer: &mut W, pretty: bool) -> Result<(), JsonOutputError> {
        write_json(self, writer, pretty)
    }
}

fn write_json<T: Serialize, W: Write>(
    value: &T,
    writer: &mut W,
    pretty: bool,
) -> Result<(), JsonOutputError> {
    let json = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    writer.write_all(json.as_bytes())?;
    writer.write_all(b"\n")?;
    Ok(())
}

/// Errors that can occur during JSON output.
#[derive(thiserror::Error, Debug)]
pub enum JsonOutputError {
    /// JSON serialization error
    #[error("JSON serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error during writing
    #[error("I/O error during JSON output: {0}")]
    Io(#[from] std::io::Error),
}
