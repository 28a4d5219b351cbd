//! Human-readable output for run summaries and plans.

use std::io::{self, Write};

use yansi::{Condition, Paint};

use crate::reconcile::{ReconciliationPlan, SyncSummary};

/// Text renderer. Colors are applied only when `color` is set.
#[derive(Debug, Clone, Copy)]
pub struct TextOutput {
    color: bool,
}

impl TextOutput {
    #[must_use]
    pub fn new(color: bool) -> Self {
        Self { color }
    }

    fn condition(self) -> Condition {
        if self.color {
            Condition::ALWAYS
        } else {
            Condition::NEVER
        }
    }

    /// Write a run summary.
    ///
    /// # Errors
    ///
    /// Returns an error if writing fails.
    pub fn write_summary<W: Write>(self, w: &mut W, summary: &SyncSummary) -> io::Result<()> {
        let when = self.condition();
        let title = if summary.dry_run {
            "Dry run complete (cache not modified)"
        } else if summary.interrupted {
            "Run interrupted"
        } else {
            "Run complete"
        };
        writeln!(w, "{}", title.bold().whenever(when))?;
        writeln!(w, "  removed:   {}", summary.removed)?;
        writeln!(w, "  added:     {}", summary.added.green().whenever(when))?;
        writeln!(w, "  updated:   {}", summary.updated.cyan().whenever(when))?;
        writeln!(w, "  unchanged: {}", summary.unchanged)?;
        if summary.skipped > 0 {
            writeln!(w, "  skipped:   {}", summary.skipped.yellow().whenever(when))?;
        }
        if summary.errors > 0 {
            writeln!(w, "  errors:    {}", summary.errors.red().bold().whenever(when))?;
        } else {
            writeln!(w, "  errors:    0")?;
        }
        writeln!(
            w,
            "  hashed:    {} in {} ms",
            summary.bytes_hashed_display(),
            summary.elapsed.as_millis()
        )?;

        for failure in &summary.failures {
            writeln!(
                w,
                "  {} [{}] {}: {}",
                "!".red().whenever(when),
                failure.phase,
                failure.key,
                failure.message
            )?;
        }
        Ok(())
    }

    /// Write a plan, one key per line under each group heading.
    ///
    /// # Errors
    ///
    /// Returns an error if writing fails.
    pub fn write_plan<W: Write>(self, w: &mut W, plan: &ReconciliationPlan) -> io::Result<()> {
        let when = self.condition();
        let groups = [
            ("Remove", &plan.to_remove),
            ("Add", &plan.to_add),
            ("Check for drift", &plan.update_candidates),
        ];
        for (label, keys) in groups {
            writeln!(w, "{} ({})", label.bold().whenever(when), keys.len())?;
            for key in keys {
                writeln!(w, "  {key}")?;
            }
        }
        Ok(())
    }
}
