//! Error taxonomy, exit codes, and structured error output.
//!
//! Component errors ([`KeyError`], [`FingerprintError`], [`StoreError`])
//! collapse into [`SyncError`]. The driver treats only connectivity failures
//! while listing keys as fatal; every other variant is caught per record and
//! counted in the run summary.

use serde::Serialize;
use std::path::PathBuf;

use crate::fingerprint::FingerprintError;
use crate::key::{KeyError, ProductKey};
use crate::store::StoreError;

/// Unified error type for reconciliation.
#[derive(thiserror::Error, Debug)]
pub enum SyncError {
    /// The datastore or cache could not be reached.
    #[error("Connectivity error: {0}")]
    Connectivity(String),

    /// Identifiers could not form a valid key.
    #[error(transparent)]
    InvalidKey(#[from] KeyError),

    /// The backing file of a record does not exist.
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    /// The backing file of a record could not be read.
    #[error("File access error for {path}: {source}")]
    FileAccess {
        /// Path where the error occurred
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The datastore record (or cache entry) vanished after keys were listed.
    #[error("Record not found: {0}")]
    NotFound(ProductKey),

    /// A cache payload could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Another reconciliation run holds the cache.
    #[error("Another run is already active: {0}")]
    AlreadyRunning(String),

    /// Configuration could not be loaded.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl SyncError {
    /// Short machine-readable category, used in summaries.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connectivity(_) => "connectivity",
            Self::InvalidKey(_) => "invalid_key",
            Self::FileNotFound(_) => "file_not_found",
            Self::FileAccess { .. } => "file_access",
            Self::NotFound(_) => "not_found",
            Self::Serialization(_) => "serialization",
            Self::AlreadyRunning(_) => "already_running",
            Self::Config(_) => "config",
        }
    }

    /// Whether this error ends a run before anything is mutated.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Connectivity(_) | Self::AlreadyRunning(_))
    }
}

impl From<StoreError> for SyncError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Connectivity(msg) => Self::Connectivity(msg),
            StoreError::NotFound(key) => Self::NotFound(key),
            StoreError::Serialization(msg) => Self::Serialization(msg),
        }
    }
}

impl From<FingerprintError> for SyncError {
    fn from(err: FingerprintError) -> Self {
        match err {
            FingerprintError::NotFound(path) => Self::FileNotFound(path),
            FingerprintError::Access { path, source } => Self::FileAccess { path, source },
        }
    }
}

/// Exit codes for the prodsync binary.
///
/// - 0: Run completed (per-record errors are reported, not fatal)
/// - 1: General error (bad configuration, unexpected failure)
/// - 2: Fatal connectivity failure before any mutation
/// - 130: Interrupted by user (Ctrl+C)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExitCode {
    /// Success: the run completed.
    Success = 0,
    /// General error: an unexpected failure outside the run itself.
    GeneralError = 1,
    /// Connectivity failure: datastore/cache unreachable or locked, nothing mutated.
    ConnectivityFailure = 2,
    /// Interrupted: the run was cancelled between records.
    Interrupted = 130,
}

impl ExitCode {
    /// Get the numeric exit code.
    #[must_use]
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Get the machine-readable code prefix.
    #[must_use]
    pub fn code_prefix(self) -> &'static str {
        match self {
            Self::Success => "PS000",
            Self::GeneralError => "PS001",
            Self::ConnectivityFailure => "PS002",
            Self::Interrupted => "PS130",
        }
    }

    /// Exit code for an error that escaped `run_app`.
    #[must_use]
    pub fn for_error(err: &anyhow::Error) -> Self {
        match err.downcast_ref::<SyncError>() {
            Some(e) if e.is_fatal() => Self::ConnectivityFailure,
            _ => Self::GeneralError,
        }
    }
}

/// Structured error information for JSON output.
#[derive(Debug, Serialize)]
pub struct StructuredError {
    /// The error code (e.g., "PS002")
    pub code: String,
    /// The exit code number
    pub exit_code: i32,
    /// Error category, when the error came from the sync engine
    pub kind: Option<&'static str>,
    /// Human-readable error message
    pub message: String,
}

impl StructuredError {
    /// Create a new structured error from an anyhow error and an exit code.
    #[must_use]
    pub fn new(err: &anyhow::Error, exit_code: ExitCode) -> Self {
        Self {
            code: exit_code.code_prefix().to_string(),
            exit_code: exit_code.as_i32(),
            kind: err.downcast_ref::<SyncError>().map(SyncError::kind),
            message: format!("{err:#}"),
        }
    }
}
