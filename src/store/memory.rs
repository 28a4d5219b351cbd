//! In-process datastore and cache.
//!
//! Both stores keep their contents behind a `Mutex` and can be switched
//! offline to simulate an unreachable backend. Both can also hold entries
//! whose identifiers do not form a key. [`MemoryCache`] also counts writes
//! and can be told to fail for specific keys, which makes it the workhorse
//! of the driver tests.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use super::{CacheStore, Datastore, Listing, RejectedKey, StoreError, StoreResult};
use crate::key::{self, ProductKey};
use crate::model::Product;

fn lock_poisoned() -> StoreError {
    StoreError::Connectivity("in-memory store lock poisoned".to_string())
}

/// Datastore backed by a `BTreeMap` keyed by product key.
#[derive(Debug, Default)]
pub struct MemoryDatastore {
    records: Mutex<BTreeMap<ProductKey, Product>>,
    unkeyed: Mutex<Vec<Product>>,
    offline: AtomicBool,
}

impl MemoryDatastore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a product. Products with invalid identifiers are
    /// rejected.
    ///
    /// # Errors
    ///
    /// Returns [`crate::key::KeyError`] if the product cannot be keyed.
    pub fn insert(&self, product: Product) -> Result<ProductKey, crate::key::KeyError> {
        let key = product.key()?;
        if let Ok(mut records) = self.records.lock() {
            records.insert(key.clone(), product);
        }
        Ok(key)
    }

    /// Store a product whose identifiers do not form a key. It is reported
    /// as rejected by every listing.
    pub fn insert_unkeyed(&self, product: Product) {
        if let Ok(mut unkeyed) = self.unkeyed.lock() {
            unkeyed.push(product);
        }
    }

    /// Remove a product, returning it if present.
    pub fn remove(&self, key: &ProductKey) -> Option<Product> {
        self.records.lock().ok()?.remove(key)
    }

    /// Simulate the datastore becoming unreachable (or coming back).
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn check_online(&self) -> StoreResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            Err(StoreError::Connectivity("datastore offline".to_string()))
        } else {
            Ok(())
        }
    }
}

impl Datastore for MemoryDatastore {
    fn listing(&self) -> StoreResult<Listing> {
        self.check_online()?;
        let records = self.records.lock().map_err(|_| lock_poisoned())?;
        let unkeyed = self.unkeyed.lock().map_err(|_| lock_poisoned())?;
        let rejected = unkeyed
            .iter()
            .filter_map(|p| {
                key::encode(&p.nrn, &p.nsn).err().map(|error| RejectedKey {
                    raw: format!("{}{}{}", p.nsn, key::SEPARATOR, p.nrn),
                    error,
                })
            })
            .collect();
        Ok(Listing {
            keys: records.keys().cloned().collect(),
            rejected,
        })
    }

    fn get_record(&self, key: &ProductKey) -> StoreResult<Product> {
        self.check_online()?;
        let records = self.records.lock().map_err(|_| lock_poisoned())?;
        records
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.clone()))
    }
}

/// Key/value cache backed by a `BTreeMap`.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: Mutex<BTreeMap<ProductKey, String>>,
    malformed: Mutex<BTreeSet<String>>,
    failing: Mutex<HashSet<ProductKey>>,
    offline: AtomicBool,
    writes: AtomicUsize,
}

impl MemoryCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate the cache becoming unreachable (or coming back).
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Make every operation on `key` fail with a connectivity error.
    pub fn fail_key(&self, key: ProductKey) {
        if let Ok(mut failing) = self.failing.lock() {
            failing.insert(key);
        }
    }

    /// Number of successful `put` and `remove` calls so far.
    #[must_use]
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Number of cached entries, including malformed ones.
    #[must_use]
    pub fn len(&self) -> usize {
        let valid = self.entries.lock().map(|e| e.len()).unwrap_or(0);
        valid + self.malformed.lock().map(|m| m.len()).unwrap_or(0)
    }

    /// True when nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Store a raw payload without counting it as a write.
    pub fn seed(&self, key: ProductKey, payload: impl Into<String>) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(key, payload.into());
        }
    }

    /// Store an entry under a raw key that does not parse, without counting
    /// it as a write.
    pub fn seed_malformed(&self, raw: impl Into<String>) {
        if let Ok(mut malformed) = self.malformed.lock() {
            malformed.insert(raw.into());
        }
    }

    fn check(&self, key: Option<&ProductKey>) -> StoreResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Connectivity("cache offline".to_string()));
        }
        if let Some(key) = key {
            let failing = self.failing.lock().map_err(|_| lock_poisoned())?;
            if failing.contains(key) {
                return Err(StoreError::Connectivity(format!("cache refused key {key}")));
            }
        }
        Ok(())
    }
}

impl CacheStore for MemoryCache {
    fn listing(&self) -> StoreResult<Listing> {
        self.check(None)?;
        let entries = self.entries.lock().map_err(|_| lock_poisoned())?;
        let malformed = self.malformed.lock().map_err(|_| lock_poisoned())?;
        let rejected = malformed
            .iter()
            .filter_map(|raw| {
                ProductKey::parse(raw).err().map(|error| RejectedKey {
                    raw: raw.clone(),
                    error,
                })
            })
            .collect();
        Ok(Listing {
            keys: entries.keys().cloned().collect(),
            rejected,
        })
    }

    fn get(&self, key: &ProductKey) -> StoreResult<Option<String>> {
        self.check(Some(key))?;
        let entries = self.entries.lock().map_err(|_| lock_poisoned())?;
        Ok(entries.get(key).cloned())
    }

    fn put(&self, key: &ProductKey, payload: &str) -> StoreResult<()> {
        self.check(Some(key))?;
        let mut entries = self.entries.lock().map_err(|_| lock_poisoned())?;
        entries.insert(key.clone(), payload.to_string());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn remove(&self, key: &ProductKey) -> StoreResult<()> {
        self.check(Some(key))?;
        let mut entries = self.entries.lock().map_err(|_| lock_poisoned())?;
        entries.remove(key);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn remove_raw(&self, raw: &str) -> StoreResult<()> {
        if let Ok(key) = ProductKey::parse(raw) {
            return self.remove(&key);
        }
        self.check(None)?;
        let mut malformed = self.malformed.lock().map_err(|_| lock_poisoned())?;
        malformed.remove(raw);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
