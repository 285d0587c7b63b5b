// ABOUTME: Library root for datalake-sync
// ABOUTME: Incremental data lake to PostgreSQL sync engine with per-binding watermarks

pub mod auth;
pub mod control;
pub mod datalake;
pub mod error;
pub mod sync;
pub mod target;
pub mod utils;

pub use error::SyncError;
pub use sync::{RunSummary, SyncConfig, SyncRunner, WatermarkPolicy};
