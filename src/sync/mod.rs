// ABOUTME: Sync engine module - reconciliation and per-binding orchestration
// ABOUTME: Ties the data lake source, control store and target database together

pub mod reconciler;
pub mod runner;
pub mod stats;

pub use reconciler::{ReconcileOutcome, Reconciler, PROTECTED_FIELDS};
pub use runner::{SyncConfig, SyncRunner};
pub use stats::{BindingReport, RecordTally, RunSummary, WatermarkPolicy, WatermarkTracker};
