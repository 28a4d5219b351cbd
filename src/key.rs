//! Composite product keys.
//!
//! Every product is addressed in the cache by a key built from its two
//! business identifiers: the primary identifier (NRN) and the secondary
//! identifier (NSN). The wire format is `"<secondary>+<primary>"` with both
//! sides trimmed and internal spaces replaced by hyphens.
//!
//! # Example
//!
//! ```
//! use prodsync::key::{decode, encode};
//!
//! let key = encode("ABC 123", " 7643-01 ").unwrap();
//! assert_eq!(key.as_str(), "7643-01+ABC-123");
//!
//! let (primary, secondary) = decode(key.as_str()).unwrap();
//! assert_eq!(primary, "ABC-123");
//! assert_eq!(secondary, "7643-01");
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// Separator between the secondary and primary identifiers.
pub const SEPARATOR: char = '+';

/// Errors produced while building or parsing a key.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyError {
    /// The primary identifier was empty after trimming.
    #[error("Invalid key: primary identifier is empty")]
    EmptyPrimary,

    /// The secondary identifier was empty after trimming.
    #[error("Invalid key: secondary identifier is empty")]
    EmptySecondary,

    /// The key did not contain exactly one separator.
    #[error("Invalid key '{0}': expected exactly one '+' separator")]
    Malformed(String),
}

/// Cache lookup key for one product.
///
/// Only constructed through [`encode`] or [`ProductKey::parse`], so a
/// `ProductKey` value is never empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProductKey(String);

impl ProductKey {
    /// Validate a key read back from a store.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::Malformed`] if the key does not split into two
    /// non-empty halves.
    pub fn parse(raw: &str) -> Result<Self, KeyError> {
        decode(raw)?;
        Ok(Self(raw.to_string()))
    }

    /// The key as stored in the cache.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Primary identifier half of the key.
    #[must_use]
    pub fn primary(&self) -> &str {
        self.0
            .split_once(SEPARATOR)
            .map_or("", |(_, primary)| primary)
    }

    /// Secondary identifier half of the key.
    #[must_use]
    pub fn secondary(&self) -> &str {
        self.0
            .split_once(SEPARATOR)
            .map_or("", |(secondary, _)| secondary)
    }

    /// Consume the key and return the owned string.
    #[must_use]
    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for ProductKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ProductKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ProductKey {
    type Error = KeyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        decode(&value)?;
        Ok(Self(value))
    }
}

impl From<ProductKey> for String {
    fn from(key: ProductKey) -> Self {
        key.0
    }
}

/// Normalize one identifier: trim, then replace internal spaces with hyphens.
#[must_use]
pub fn normalize(id: &str) -> String {
    id.trim().replace(' ', "-")
}

/// Build the cache key for a `(primary, secondary)` identifier pair.
///
/// # Errors
///
/// Returns [`KeyError::EmptyPrimary`] or [`KeyError::EmptySecondary`] when
/// either identifier is empty after trimming. Callers must skip the record
/// rather than store it.
pub fn encode(primary: &str, secondary: &str) -> Result<ProductKey, KeyError> {
    let secondary = normalize(secondary);
    if secondary.is_empty() {
        return Err(KeyError::EmptySecondary);
    }
    let primary = normalize(primary);
    if primary.is_empty() {
        return Err(KeyError::EmptyPrimary);
    }
    if secondary.contains(SEPARATOR) || primary.contains(SEPARATOR) {
        return Err(KeyError::Malformed(format!("{secondary}{SEPARATOR}{primary}")));
    }
    Ok(ProductKey(format!("{secondary}{SEPARATOR}{primary}")))
}

/// Split a key back into its `(primary, secondary)` identifiers.
///
/// The result is the normalized form of whatever was encoded; the original
/// whitespace is not recoverable.
///
/// # Errors
///
/// Returns [`KeyError::Malformed`] unless the key contains exactly one `+`
/// with a non-empty identifier on each side.
pub fn decode(key: &str) -> Result<(String, String), KeyError> {
    let mut parts = key.split(SEPARATOR);
    match (parts.next(), parts.next(), parts.next()) {
        (Some(secondary), Some(primary), None) if !secondary.is_empty() && !primary.is_empty() => {
            Ok((primary.to_string(), secondary.to_string()))
        }
        _ => Err(KeyError::Malformed(key.to_string())),
    }
}
