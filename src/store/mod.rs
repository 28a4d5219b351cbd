//! Collaborator interfaces consumed by the reconciliation driver.
//!
//! The driver never talks to a database or cache transport directly. It is
//! handed three trait objects:
//!
//! * [`Datastore`]: the authoritative product records
//! * [`CacheStore`]: the key/value cache being kept in sync
//! * [`Serializer`]: turns [`CachedProduct`] values into payloads and back
//!
//! # Implementations
//!
//! * [`sqlite`]: rusqlite-backed datastore over a `products` table
//! * [`kv`]: rusqlite-backed key/value cache
//! * [`memory`]: in-process datastore and cache for tests and embedding
//! * [`json`]: serde_json serializer

pub mod json;
pub mod kv;
pub mod memory;
pub mod sqlite;

use crate::key::{KeyError, ProductKey};
use crate::model::{CachedProduct, Product};

pub use json::JsonSerializer;
pub use kv::SqliteCache;
pub use memory::{MemoryCache, MemoryDatastore};
pub use sqlite::SqliteDatastore;

/// Errors reported by collaborators.
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    /// The backing service cannot be reached or refused the operation.
    #[error("Connectivity error: {0}")]
    Connectivity(String),

    /// No record exists for the key.
    #[error("Record not found: {0}")]
    NotFound(ProductKey),

    /// A payload could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Connectivity(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Result alias for collaborator calls.
pub type StoreResult<T> = Result<T, StoreError>;

/// A stored identifier that does not form a valid [`ProductKey`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedKey {
    /// The identifier as stored (`"<secondary>+<primary>"` for datastore rows).
    pub raw: String,
    /// Why it was rejected.
    pub error: KeyError,
}

/// Result of listing a collaborator's keys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Listing {
    /// Valid, distinct keys.
    pub keys: Vec<ProductKey>,
    /// Entries whose identifiers could not be turned into a key.
    pub rejected: Vec<RejectedKey>,
}

impl Listing {
    /// A listing with no rejected entries.
    #[must_use]
    pub fn from_keys(keys: Vec<ProductKey>) -> Self {
        Self {
            keys,
            rejected: Vec::new(),
        }
    }
}

/// Authoritative source of product records.
pub trait Datastore: Send + Sync {
    /// Every record's key, plus the records whose identifiers cannot be keyed.
    fn listing(&self) -> StoreResult<Listing>;

    /// All distinct valid product keys currently in the datastore.
    fn list_keys(&self) -> StoreResult<Vec<ProductKey>> {
        Ok(self.listing()?.keys)
    }

    /// Current record for `key`.
    ///
    /// Returns [`StoreError::NotFound`] if the record vanished since the
    /// keys were listed.
    fn get_record(&self, key: &ProductKey) -> StoreResult<Product>;
}

/// Key/value cache holding serialized [`CachedProduct`] payloads.
pub trait CacheStore: Send + Sync {
    /// Every cached key, plus stored keys that no longer parse.
    fn listing(&self) -> StoreResult<Listing>;

    /// All valid keys currently cached.
    fn list_keys(&self) -> StoreResult<Vec<ProductKey>> {
        Ok(self.listing()?.keys)
    }

    /// Payload stored under `key`, if any.
    fn get(&self, key: &ProductKey) -> StoreResult<Option<String>>;

    /// Store `payload` under `key`, replacing any previous value.
    fn put(&self, key: &ProductKey, payload: &str) -> StoreResult<()>;

    /// Delete `key`. Removing an absent key is not an error.
    fn remove(&self, key: &ProductKey) -> StoreResult<()>;

    /// Delete an entry by its stored key, which need not be a valid
    /// [`ProductKey`]. Removing an absent key is not an error.
    fn remove_raw(&self, raw: &str) -> StoreResult<()>;
}

/// Payload codec for cache entries.
pub trait Serializer: Send + Sync {
    /// Encode a cache entry.
    fn serialize(&self, record: &CachedProduct) -> StoreResult<String>;

    /// Decode a cache entry.
    fn deserialize(&self, payload: &str) -> StoreResult<CachedProduct>;
}
