//! Reconciliation driver.
//!
//! # Overview
//!
//! One call to [`SyncDriver::run`] executes the whole pipeline:
//! 1. **Snapshot** - list keys from the datastore and the cache
//! 2. **Plan** - classify keys with [`build_plan`]
//! 3. **Remove** - delete orphaned and malformed cache entries (sequential)
//! 4. **Add** - fetch, fingerprint, serialize and cache new records (worker pool)
//! 5. **Update** - re-fingerprint cached records and rewrite drifted ones (worker pool)
//! 6. **Summary** - counts, bytes hashed, per-record failures, elapsed time
//!
//! A failure while taking the snapshot aborts the run before anything is
//! mutated. After that point every failure is caught per record, logged with
//! its key and phase, and counted; the run always returns a summary.
//! Datastore records whose identifiers cannot be keyed are counted as
//! `invalid_key` failures of the add phase.
//!
//! # Example
//!
//! ```
//! use prodsync::reconcile::{DriverConfig, SyncDriver};
//! use prodsync::store::{JsonSerializer, MemoryCache, MemoryDatastore};
//! use std::sync::Arc;
//!
//! let datastore = Arc::new(MemoryDatastore::new());
//! let cache = Arc::new(MemoryCache::new());
//! let driver = SyncDriver::new(
//!     datastore.clone(),
//!     cache.clone(),
//!     Arc::new(JsonSerializer::new()),
//!     DriverConfig::default().with_workers(2),
//! );
//!
//! let summary = driver.run().unwrap();
//! assert_eq!(summary.added, 0);
//! assert_eq!(summary.errors, 0);
//! ```

use rayon::prelude::*;
use serde::{Serialize, Serializer as SerdeSerializer};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::plan::{build_plan, ReconciliationPlan};
use crate::error::SyncError;
use crate::fingerprint::{needs_update, FingerprintBuilder};
use crate::key::ProductKey;
use crate::model::CachedProduct;
use crate::progress::ProgressCallback;
use crate::store::{CacheStore, Datastore, Listing, Serializer};

/// Stage of a run a record was processed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Deleting orphaned cache entries.
    Remove,
    /// Caching records new to the datastore.
    Add,
    /// Re-checking cached records for file drift.
    Update,
}

impl Phase {
    /// Name used in logs and progress callbacks.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Remove => "remove",
            Self::Add => "add",
            Self::Update => "update",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration for a [`SyncDriver`].
#[derive(Clone)]
pub struct DriverConfig {
    /// Worker threads for the add and update phases.
    /// Default is 4.
    pub workers: usize,
    /// Evaluate everything but never write to or delete from the cache.
    pub dry_run: bool,
    /// Builder used to fingerprint backing files.
    pub fingerprint: FingerprintBuilder,
    /// Optional cancellation flag, checked before each record.
    pub shutdown_flag: Option<Arc<AtomicBool>>,
    /// Optional progress callback.
    pub progress_callback: Option<Arc<dyn ProgressCallback>>,
}

impl fmt::Debug for DriverConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriverConfig")
            .field("workers", &self.workers)
            .field("dry_run", &self.dry_run)
            .field("fingerprint", &self.fingerprint)
            .field("shutdown_flag", &self.shutdown_flag)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<callback>"),
            )
            .finish()
    }
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            dry_run: false,
            fingerprint: FingerprintBuilder::new(),
            shutdown_flag: None,
            progress_callback: None,
        }
    }
}

impl DriverConfig {
    /// Set the worker count (minimum 1).
    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Enable or disable dry-run mode.
    #[must_use]
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Set the fingerprint builder.
    #[must_use]
    pub fn with_fingerprint_builder(mut self, builder: FingerprintBuilder) -> Self {
        self.fingerprint = builder;
        self
    }

    /// Set the cancellation flag.
    #[must_use]
    pub fn with_shutdown_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.shutdown_flag = Some(flag);
        self
    }

    /// Set the progress callback.
    #[must_use]
    pub fn with_progress_callback(mut self, callback: Arc<dyn ProgressCallback>) -> Self {
        self.progress_callback = Some(callback);
        self
    }

    fn is_shutdown_requested(&self) -> bool {
        self.shutdown_flag
            .as_ref()
            .is_some_and(|f| f.load(Ordering::SeqCst))
    }
}

/// A record that could not be processed.
#[derive(Debug, Clone, Serialize)]
pub struct RecordFailure {
    /// Key of the record, or its raw identifiers if they do not form a key.
    pub key: String,
    /// Phase the failure happened in.
    pub phase: Phase,
    /// Error category (see [`SyncError::kind`]).
    pub kind: &'static str,
    /// Error message.
    pub message: String,
}

fn serialize_millis<S: SerdeSerializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

/// Outcome of one reconciliation run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncSummary {
    /// Orphaned entries deleted from the cache.
    pub removed: usize,
    /// New entries written to the cache.
    pub added: usize,
    /// Entries rewritten because their backing file drifted.
    pub updated: usize,
    /// Update candidates whose fingerprint still matched.
    pub unchanged: usize,
    /// Records that failed; see `failures`.
    pub errors: usize,
    /// Records left for the next run because of cancellation.
    pub skipped: usize,
    /// Bytes read while fingerprinting.
    pub bytes_hashed: u64,
    /// Per-record failures with key, phase and cause.
    pub failures: Vec<RecordFailure>,
    /// Wall-clock duration of the run.
    #[serde(rename = "elapsed_ms", serialize_with = "serialize_millis")]
    pub elapsed: Duration,
    /// Whether the run was cancelled before finishing.
    pub interrupted: bool,
    /// Whether cache writes were suppressed.
    pub dry_run: bool,
}

impl SyncSummary {
    /// True when every record was processed without error.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.errors == 0 && !self.interrupted
    }

    /// Number of cache mutations (or would-be mutations in a dry run).
    #[must_use]
    pub fn changes(&self) -> usize {
        self.removed + self.added + self.updated
    }

    /// Bytes hashed as a human-readable string.
    #[must_use]
    pub fn bytes_hashed_display(&self) -> String {
        bytesize::ByteSize::b(self.bytes_hashed).to_string()
    }
}

/// Cache entry scheduled for deletion.
enum Orphan {
    Keyed(ProductKey),
    /// Stored under a key that no longer parses.
    Malformed(String),
}

impl AsRef<str> for Orphan {
    fn as_ref(&self) -> &str {
        match self {
            Self::Keyed(key) => key.as_str(),
            Self::Malformed(raw) => raw,
        }
    }
}

enum Outcome {
    Applied { bytes: u64 },
    Unchanged { bytes: u64 },
    Skipped,
    Failed(SyncError),
}

/// Clears the running flag when a run ends, however it ends.
struct RunGuard<'a>(&'a AtomicBool);

impl<'a> RunGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Result<Self, SyncError> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| {
                SyncError::AlreadyRunning("a run is already in progress on this driver".into())
            })?;
        Ok(Self(flag))
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Orchestrates reconciliation runs against injected collaborators.
pub struct SyncDriver {
    datastore: Arc<dyn Datastore>,
    cache: Arc<dyn CacheStore>,
    serializer: Arc<dyn Serializer>,
    config: DriverConfig,
    running: AtomicBool,
}

impl SyncDriver {
    /// Create a driver over the given collaborators.
    #[must_use]
    pub fn new(
        datastore: Arc<dyn Datastore>,
        cache: Arc<dyn CacheStore>,
        serializer: Arc<dyn Serializer>,
        config: DriverConfig,
    ) -> Self {
        Self {
            datastore,
            cache,
            serializer,
            config,
            running: AtomicBool::new(false),
        }
    }

    /// Driver configuration.
    #[must_use]
    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// Compute the plan without touching files or the cache.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Connectivity`] if either collaborator cannot
    /// list its keys.
    pub fn preview(&self) -> Result<ReconciliationPlan, SyncError> {
        let (datastore, cache) = self.snapshot()?;
        Ok(build_plan(&datastore.keys, &cache.keys))
    }

    /// Execute one reconciliation run.
    ///
    /// # Errors
    ///
    /// - [`SyncError::AlreadyRunning`] if this driver is already running
    /// - [`SyncError::Connectivity`] if either collaborator cannot list its
    ///   keys; nothing has been mutated in that case
    ///
    /// Per-record failures never surface here; they are counted in the
    /// returned [`SyncSummary`].
    pub fn run(&self) -> Result<SyncSummary, SyncError> {
        let _guard = RunGuard::acquire(&self.running)?;
        let start = Instant::now();

        let (datastore, cache) = self.snapshot()?;
        let plan = build_plan(&datastore.keys, &cache.keys);
        log::info!(
            "Reconciling {} datastore keys against {} cached keys: {} to remove, {} to add, {} to check",
            datastore.keys.len(),
            cache.keys.len(),
            plan.to_remove.len(),
            plan.to_add.len(),
            plan.update_candidates.len()
        );
        if !datastore.rejected.is_empty() || !cache.rejected.is_empty() {
            log::warn!(
                "{} datastore records cannot be keyed; {} cache entries have malformed keys",
                datastore.rejected.len(),
                cache.rejected.len()
            );
        }
        if self.config.dry_run {
            log::info!("Dry run: the cache will not be modified");
        }

        let mut summary = SyncSummary {
            dry_run: self.config.dry_run,
            ..Default::default()
        };

        let orphans: Vec<Orphan> = plan
            .to_remove
            .iter()
            .cloned()
            .map(Orphan::Keyed)
            .chain(cache.rejected.into_iter().map(|r| Orphan::Malformed(r.raw)))
            .collect();
        let removals = self.run_phase(Phase::Remove, &orphans, false, |orphan| {
            self.remove_one(orphan)
        });
        self.tally(Phase::Remove, removals, &mut summary);

        let unkeyed = datastore
            .rejected
            .into_iter()
            .map(|r| (r.raw, Outcome::Failed(SyncError::InvalidKey(r.error))))
            .collect();
        self.tally(Phase::Add, unkeyed, &mut summary);

        let additions = self.run_phase(Phase::Add, &plan.to_add, true, |key| self.add_one(key));
        self.tally(Phase::Add, additions, &mut summary);

        let updates = self.run_phase(Phase::Update, &plan.update_candidates, true, |key| {
            self.update_one(key)
        });
        self.tally(Phase::Update, updates, &mut summary);

        summary.elapsed = start.elapsed();
        log::info!(
            "Run finished in {} ms: {} removed, {} added, {} updated, {} unchanged, {} errors, {} skipped ({} hashed)",
            summary.elapsed.as_millis(),
            summary.removed,
            summary.added,
            summary.updated,
            summary.unchanged,
            summary.errors,
            summary.skipped,
            summary.bytes_hashed_display()
        );
        Ok(summary)
    }

    fn snapshot(&self) -> Result<(Listing, Listing), SyncError> {
        let datastore = self.datastore.listing().map_err(|e| {
            log::error!("Unable to list datastore keys: {e}");
            SyncError::from(e)
        })?;
        let cache = self.cache.listing().map_err(|e| {
            log::error!("Unable to list cache keys: {e}");
            SyncError::from(e)
        })?;
        Ok((datastore, cache))
    }

    fn run_phase<T, F>(
        &self,
        phase: Phase,
        keys: &[T],
        parallel: bool,
        op: F,
    ) -> Vec<(String, Outcome)>
    where
        T: AsRef<str> + Sync,
        F: Fn(&T) -> Result<Outcome, SyncError> + Sync + Send,
    {
        if keys.is_empty() {
            log::debug!("Phase {phase}: nothing to do");
            return Vec::new();
        }
        if let Some(ref callback) = self.config.progress_callback {
            callback.on_phase_start(phase.as_str(), keys.len());
        }
        let started = Instant::now();
        let done = AtomicUsize::new(0);

        let process = |key: &T| -> (String, Outcome) {
            let outcome = if self.config.is_shutdown_requested() {
                Outcome::Skipped
            } else {
                match op(key) {
                    Ok(outcome) => outcome,
                    Err(e) => Outcome::Failed(e),
                }
            };
            let current = done.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some(ref callback) = self.config.progress_callback {
                if let Outcome::Applied { bytes } | Outcome::Unchanged { bytes } = &outcome {
                    callback.on_item_completed(*bytes);
                }
                callback.on_progress(current, key.as_ref());
            }
            (key.as_ref().to_string(), outcome)
        };

        let results: Vec<(String, Outcome)> = if parallel && self.config.workers > 1 {
            match rayon::ThreadPoolBuilder::new()
                .num_threads(self.config.workers)
                .build()
            {
                Ok(pool) => pool.install(|| keys.par_iter().map(process).collect()),
                Err(e) => {
                    log::warn!("Failed to create worker pool ({e}), processing sequentially");
                    keys.iter().map(process).collect()
                }
            }
        } else {
            keys.iter().map(process).collect()
        };

        if let Some(ref callback) = self.config.progress_callback {
            callback.on_phase_end(phase.as_str());
        }
        log::debug!(
            "Phase {phase}: {} keys in {} ms",
            keys.len(),
            started.elapsed().as_millis()
        );
        results
    }

    fn tally(&self, phase: Phase, results: Vec<(String, Outcome)>, summary: &mut SyncSummary) {
        for (key, outcome) in results {
            match outcome {
                Outcome::Applied { bytes } => {
                    summary.bytes_hashed += bytes;
                    match phase {
                        Phase::Remove => summary.removed += 1,
                        Phase::Add => summary.added += 1,
                        Phase::Update => summary.updated += 1,
                    }
                }
                Outcome::Unchanged { bytes } => {
                    summary.bytes_hashed += bytes;
                    summary.unchanged += 1;
                }
                Outcome::Skipped => {
                    summary.skipped += 1;
                    summary.interrupted = true;
                }
                Outcome::Failed(err) => {
                    log::warn!("[{phase}] {key}: {err}");
                    summary.errors += 1;
                    summary.failures.push(RecordFailure {
                        key,
                        phase,
                        kind: err.kind(),
                        message: err.to_string(),
                    });
                }
            }
        }
    }

    fn remove_one(&self, orphan: &Orphan) -> Result<Outcome, SyncError> {
        if !self.config.dry_run {
            match orphan {
                Orphan::Keyed(key) => self.cache.remove(key)?,
                Orphan::Malformed(raw) => self.cache.remove_raw(raw)?,
            }
        }
        log::trace!("Removed orphan {}", orphan.as_ref());
        Ok(Outcome::Applied { bytes: 0 })
    }

    fn add_one(&self, key: &ProductKey) -> Result<Outcome, SyncError> {
        let product = self.datastore.get_record(key)?;
        let fingerprint = self.config.fingerprint.build(product.backing_path())?;
        let bytes = fingerprint.size_bytes;
        let payload = self
            .serializer
            .serialize(&CachedProduct::new(product, fingerprint))?;
        if !self.config.dry_run {
            self.cache.put(key, &payload)?;
        }
        log::trace!("Added {key}");
        Ok(Outcome::Applied { bytes })
    }

    fn update_one(&self, key: &ProductKey) -> Result<Outcome, SyncError> {
        let payload = self
            .cache
            .get(key)?
            .ok_or_else(|| SyncError::NotFound(key.clone()))?;
        let cached = self.serializer.deserialize(&payload)?;
        let product = self.datastore.get_record(key)?;
        let fresh = self.config.fingerprint.build(product.backing_path())?;
        let bytes = fresh.size_bytes;

        if !needs_update(&cached.fingerprint(), &fresh) {
            return Ok(Outcome::Unchanged { bytes });
        }

        let payload = self.serializer.serialize(&CachedProduct::new(product, fresh))?;
        if !self.config.dry_run {
            self.cache.put(key, &payload)?;
        }
        log::debug!("Updated {key}: backing file drifted");
        Ok(Outcome::Applied { bytes })
    }
}
