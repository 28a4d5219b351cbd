//! Set arithmetic over product keys.
//!
//! # Overview
//!
//! A reconciliation run starts from two key snapshots: the keys present in
//! the datastore and the keys present in the cache. This module classifies
//! them into three disjoint groups:
//!
//! - **remove**: cached keys with no datastore record (orphans)
//! - **add**: datastore keys that are not cached yet
//! - **update candidates**: keys in both, still to be checked for file drift
//!
//! All operations build a `HashSet` of the right-hand side, so each runs in
//! O(|source| + |target|).
//!
//! # Example
//!
//! ```
//! use prodsync::key::encode;
//! use prodsync::reconcile::build_plan;
//!
//! let k = |s: &str| encode(s, "NSN").unwrap();
//! let cache = vec![k("A"), k("B"), k("C")];
//! let datastore = vec![k("B"), k("C"), k("D")];
//!
//! let plan = build_plan(&datastore, &cache);
//! assert_eq!(plan.to_remove, vec![k("A")]);
//! assert_eq!(plan.to_add, vec![k("D")]);
//! assert_eq!(plan.update_candidates, vec![k("B"), k("C")]);
//! ```

use serde::Serialize;
use std::collections::HashSet;
use std::hash::Hash;

use crate::key::ProductKey;

/// Elements of `source` that are not in `target`.
///
/// Order follows `source`; duplicates in `source` are reported once.
#[must_use]
pub fn difference<T>(source: &[T], target: &[T]) -> Vec<T>
where
    T: Eq + Hash + Clone,
{
    let target: HashSet<&T> = target.iter().collect();
    let mut seen: HashSet<&T> = HashSet::with_capacity(source.len());
    source
        .iter()
        .filter(|item| !target.contains(item) && seen.insert(*item))
        .cloned()
        .collect()
}

/// Elements present in both `source` and `target`.
///
/// Order follows `source`; duplicates in `source` are reported once.
#[must_use]
pub fn intersection<T>(source: &[T], target: &[T]) -> Vec<T>
where
    T: Eq + Hash + Clone,
{
    let target: HashSet<&T> = target.iter().collect();
    let mut seen: HashSet<&T> = HashSet::with_capacity(source.len().min(target.len()));
    source
        .iter()
        .filter(|item| target.contains(item) && seen.insert(*item))
        .cloned()
        .collect()
}

/// Remove/add/update-candidate key sets for one run.
///
/// `update_candidates` is unfiltered: the driver narrows it down by
/// comparing fingerprints, which requires I/O.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconciliationPlan {
    /// Cached keys with no datastore record.
    pub to_remove: Vec<ProductKey>,
    /// Datastore keys missing from the cache.
    pub to_add: Vec<ProductKey>,
    /// Keys present on both sides.
    pub update_candidates: Vec<ProductKey>,
}

impl ReconciliationPlan {
    /// True when there is nothing to remove, add, or check.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.to_remove.is_empty() && self.to_add.is_empty() && self.update_candidates.is_empty()
    }

    /// Total number of keys the run will touch or inspect.
    #[must_use]
    pub fn total(&self) -> usize {
        self.to_remove.len() + self.to_add.len() + self.update_candidates.len()
    }
}

/// Compute the plan from the datastore and cache key snapshots.
#[must_use]
pub fn build_plan(datastore_keys: &[ProductKey], cache_keys: &[ProductKey]) -> ReconciliationPlan {
    let plan = ReconciliationPlan {
        to_remove: difference(cache_keys, datastore_keys),
        to_add: difference(datastore_keys, cache_keys),
        update_candidates: intersection(datastore_keys, cache_keys),
    };
    log::debug!(
        "Plan built from {} datastore and {} cache keys: {} to remove, {} to add, {} update candidates",
        datastore_keys.len(),
        cache_keys.len(),
        plan.to_remove.len(),
        plan.to_add.len(),
        plan.update_candidates.len()
    );
    plan
}
