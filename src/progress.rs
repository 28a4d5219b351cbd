//! Progress reporting utilities using indicatif.
//!
//! The driver reports each reconciliation phase (`remove`, `add`, `update`)
//! through the [`ProgressCallback`] trait. [`Progress`] renders one bar per
//! phase in the terminal; phases run one after another, so only one bar is
//! active at a time.
//!
//! # Plain Mode
//!
//! With `--no-color` the bars use plain ASCII characters and no colors.

use std::sync::Mutex;

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

/// Progress callback for reconciliation phases.
///
/// Implement this trait to receive progress updates from the driver.
/// Methods may be called from worker threads.
pub trait ProgressCallback: Send + Sync {
    /// Called when a phase starts.
    ///
    /// # Arguments
    ///
    /// * `phase` - Name of the phase ("remove", "add", "update")
    /// * `total` - Number of keys the phase will process
    fn on_phase_start(&self, phase: &str, total: usize);

    /// Called after each key is processed.
    ///
    /// # Arguments
    ///
    /// * `current` - Number of keys finished so far in this phase (1-based)
    /// * `key` - Key just processed
    fn on_progress(&self, current: usize, key: &str);

    /// Called with the number of bytes hashed for a key.
    fn on_item_completed(&self, _bytes: u64) {}

    /// Called when a phase completes.
    fn on_phase_end(&self, phase: &str);
}

/// Terminal progress reporter.
pub struct Progress {
    multi: MultiProgress,
    active: Mutex<Option<ProgressBar>>,
    plain: bool,
}

impl Progress {
    /// Create a new progress reporter.
    ///
    /// # Arguments
    ///
    /// * `plain` - Draw ASCII bars without colors.
    ///
    /// # Examples
    ///
    /// ```
    /// use prodsync::progress::Progress;
    ///
    /// let progress = Progress::new(false);
    /// assert!(!progress.is_plain());
    /// ```
    #[must_use]
    pub fn new(plain: bool) -> Self {
        Self {
            multi: MultiProgress::new(),
            active: Mutex::new(None),
            plain,
        }
    }

    /// Check if plain mode is enabled.
    #[must_use]
    pub fn is_plain(&self) -> bool {
        self.plain
    }

    fn bar_style(&self) -> ProgressStyle {
        if self.plain {
            ProgressStyle::with_template(
                "[{elapsed_precise}] [{bar:40}] {pos}/{len} ({percent}%) {msg} (ETA: {eta})",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-")
        } else {
            ProgressStyle::with_template(
                "[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) {msg} (ETA: {eta})",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█>-")
        }
    }
}

fn phase_label(phase: &str) -> &str {
    match phase {
        "remove" => "Removing orphans",
        "add" => "Adding new records",
        "update" => "Checking for drift",
        other => other,
    }
}

impl ProgressCallback for Progress {
    fn on_phase_start(&self, phase: &str, total: usize) {
        let pb = self.multi.add(ProgressBar::new(total as u64));
        pb.set_style(self.bar_style());
        pb.set_message(phase_label(phase).to_string());
        if let Ok(mut active) = self.active.lock() {
            *active = Some(pb);
        }
    }

    fn on_progress(&self, _current: usize, key: &str) {
        if let Ok(active) = self.active.lock() {
            if let Some(ref pb) = *active {
                pb.inc(1);
                pb.set_message(truncate_key(key, 30));
            }
        }
    }

    fn on_phase_end(&self, phase: &str) {
        if let Ok(mut active) = self.active.lock() {
            if let Some(pb) = active.take() {
                pb.finish_with_message(format!("{} complete", phase_label(phase)));
            }
        }
    }
}

/// Truncate a key for display in the progress bar.
fn truncate_key(key: &str, max_len: usize) -> String {
    if key.chars().count() <= max_len {
        return key.to_string();
    }
    let tail: String = key
        .chars()
        .rev()
        .take(max_len.saturating_sub(3))
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    format!("...{tail}")
}
