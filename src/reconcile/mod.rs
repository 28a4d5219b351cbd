//! Reconciliation of the cache against the datastore.
//!
//! - [`plan`]: set arithmetic that classifies keys into remove/add/update
//! - [`driver`]: executes a plan against the collaborators

pub mod driver;
pub mod plan;

pub use driver::{DriverConfig, Phase, RecordFailure, SyncDriver, SyncSummary};
pub use plan::{build_plan, difference, intersection, ReconciliationPlan};
