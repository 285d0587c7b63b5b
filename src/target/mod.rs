// ABOUTME: Target database module - where reconciled records are written
// ABOUTME: Defines the TargetStore seam and the PostgreSQL implementation behind it

pub mod connection;
pub mod converter;
pub mod writer;

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::SyncError;

pub use connection::{connect, TargetConnection, TargetPool, DEFAULT_PORT, DEFAULT_SCHEMA};
pub use writer::PgTarget;

/// A target column name (already prefixed) and the value to bind for it.
pub type ColumnValue = (String, serde_json::Value);

/// Row-level operations the reconciler needs from a target table.
///
/// Every operation matches rows by equality on all `keys`. Implementations
/// return the number of rows affected.
#[async_trait]
pub trait TargetStore: Send + Sync {
    async fn count_matching(&self, table: &str, keys: &[ColumnValue]) -> Result<i64, SyncError>;

    async fn insert_row(&self, table: &str, values: &[ColumnValue]) -> Result<u64, SyncError>;

    async fn update_rows(
        &self,
        table: &str,
        set: &[ColumnValue],
        keys: &[ColumnValue],
    ) -> Result<u64, SyncError>;

    async fn delete_rows(&self, table: &str, keys: &[ColumnValue]) -> Result<u64, SyncError>;
}

/// Hands out a target for a binding to write through.
#[async_trait]
pub trait TargetProvider: Send + Sync {
    async fn acquire(&self) -> Result<Arc<dyn TargetStore>, SyncError>;
}
