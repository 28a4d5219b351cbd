//! Product records and their cached form.
//!
//! [`Product`] is one row of the authoritative datastore. [`CachedProduct`]
//! is what gets written to the cache: the product plus the fingerprint of
//! its backing file at the time of writing, flattened into one JSON object
//! (`path`, `sizeBytes`, `fileDate`, `digestHex`, ...).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::fingerprint::ContentFingerprint;
use crate::key::{self, KeyError, ProductKey};

/// One product metadata record from the datastore.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    /// Primary business identifier (NRN).
    pub nrn: String,
    /// Secondary business identifier (NSN).
    pub nsn: String,
    #[serde(default)]
    pub product_type: String,
    #[serde(default)]
    pub media_name: String,
    #[serde(default)]
    pub edition: i64,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub load_date: Option<DateTime<Utc>>,
    /// File date as recorded in the datastore (not necessarily the on-disk mtime).
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub recorded_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub classification: String,
    #[serde(default)]
    pub classification_description: String,
    #[serde(default)]
    pub releasability: String,
    #[serde(default)]
    pub releasability_description: String,
    /// Location of the backing file on disk.
    pub path: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub iso3_char: String,
    #[serde(default)]
    pub aor_code: String,
    #[serde(default)]
    pub country_name: String,
    /// Size as recorded in the datastore.
    #[serde(default)]
    pub recorded_size: u64,
}

impl Product {
    /// Minimal product with identifiers and a backing path.
    #[must_use]
    pub fn new(nrn: impl Into<String>, nsn: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            nrn: nrn.into(),
            nsn: nsn.into(),
            path: path.into(),
            ..Default::default()
        }
    }

    /// Cache key for this product.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError`] if either identifier is empty.
    pub fn key(&self) -> Result<ProductKey, KeyError> {
        key::encode(&self.nrn, &self.nsn)
    }

    /// Backing file path.
    #[must_use]
    pub fn backing_path(&self) -> &Path {
        Path::new(&self.path)
    }
}

/// Cache payload: a product plus the fingerprint of its backing file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedProduct {
    #[serde(flatten)]
    pub product: Product,
    /// Bytes hashed when the entry was written.
    pub size_bytes: u64,
    /// On-disk modification time when the entry was written.
    #[serde(default, with = "chrono::serde::ts_milliseconds")]
    pub file_date: DateTime<Utc>,
    /// Lowercase hex digest; older entries may lack it.
    #[serde(default)]
    pub digest_hex: String,
}

impl CachedProduct {
    /// Combine a product with a freshly built fingerprint of its file.
    #[must_use]
    pub fn new(product: Product, fingerprint: ContentFingerprint) -> Self {
        Self {
            product,
            size_bytes: fingerprint.size_bytes,
            file_date: fingerprint.modified_at,
            digest_hex: fingerprint.digest_hex,
        }
    }

    /// Reconstruct the fingerprint embedded in this entry.
    #[must_use]
    pub fn fingerprint(&self) -> ContentFingerprint {
        ContentFingerprint {
            path: PathBuf::from(&self.product.path),
            size_bytes: self.size_bytes,
            modified_at: self.file_date,
            digest_hex: self.digest_hex.clone(),
        }
    }
}
