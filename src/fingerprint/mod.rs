//! Content fingerprints for the files backing product records.
//!
//! A fingerprint captures what a backing file looked like when its cache
//! entry was written: path, size, modification time, and a BLAKE3 digest of
//! the full content. Comparing a cached fingerprint with a freshly built one
//! tells the reconciler whether the cache entry has drifted from disk.
//!
//! # Architecture
//!
//! - [`builder`]: reads metadata and hashes content ([`FingerprintBuilder`])
//! - this module: the [`ContentFingerprint`] value and [`needs_update`]
//!
//! # Example
//!
//! ```no_run
//! use prodsync::fingerprint::{needs_update, FingerprintBuilder};
//! use std::path::Path;
//!
//! let builder = FingerprintBuilder::new();
//! let before = builder.build(Path::new("/data/products/a.iso")).unwrap();
//! // ... file changes on disk ...
//! let after = builder.build(Path::new("/data/products/a.iso")).unwrap();
//! if needs_update(&before, &after) {
//!     println!("cache entry is stale");
//! }
//! ```

pub mod builder;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub use builder::{FingerprintBuilder, DEFAULT_BUFFER_SIZE, DEFAULT_MMAP_THRESHOLD};

/// Length of a digest rendered as lowercase hex (BLAKE3, 32 bytes).
pub const DIGEST_HEX_LEN: usize = 64;

/// Snapshot of a backing file at the time it was hashed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentFingerprint {
    /// File the fingerprint describes.
    pub path: PathBuf,
    /// Number of bytes hashed.
    pub size_bytes: u64,
    /// Last modification time reported by the filesystem.
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub modified_at: DateTime<Utc>,
    /// Lowercase hex BLAKE3 digest; empty for entries written without one.
    pub digest_hex: String,
}

impl ContentFingerprint {
    /// Whether this fingerprint carries a digest that can be compared.
    #[must_use]
    pub fn has_digest(&self) -> bool {
        !self.digest_hex.trim().is_empty()
    }
}

/// Decide whether a cached fingerprint is stale relative to a fresh one.
///
/// Returns `true` when the path or size changed, when the cached side has no
/// digest to verify against, or when the digests differ. Modification time
/// is informational only; a touched but unchanged file is not drift.
#[must_use]
pub fn needs_update(cached: &ContentFingerprint, fresh: &ContentFingerprint) -> bool {
    if cached.path != fresh.path {
        log::debug!(
            "Backing file moved from {} to {}",
            cached.path.display(),
            fresh.path.display()
        );
        return true;
    }
    if cached.size_bytes != fresh.size_bytes {
        log::debug!(
            "File {} changed size ({} -> {} bytes)",
            fresh.path.display(),
            cached.size_bytes,
            fresh.size_bytes
        );
        return true;
    }
    if !cached.has_digest() {
        log::debug!(
            "Cached entry for {} has no digest, rewriting",
            fresh.path.display()
        );
        return true;
    }
    let changed = !cached.digest_hex.eq_ignore_ascii_case(&fresh.digest_hex);
    if changed {
        log::debug!("File {} changed content at same size", fresh.path.display());
    }
    changed
}

/// Errors that prevent a fingerprint from being built.
#[derive(thiserror::Error, Debug)]
pub enum FingerprintError {
    /// The backing file does not exist (or no path was recorded).
    #[error("File not found: {0}")]
    NotFound(PathBuf),

    /// The backing file exists but could not be read.
    #[error("I/O error for {path}: {source}")]
    Access {
        /// Path where the error occurred
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
    },
}

impl FingerprintError {
    /// Path the error refers to.
    #[must_use]
    pub fn path(&self) -> &std::path::Path {
        match self {
            Self::NotFound(path) | Self::Access { path, .. } => path,
        }
    }
}
