// ABOUTME: Data structures held in the control store
// ABOUTME: Object definitions, sync bindings, watermarks, run log entries and environments

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::error::SyncError;
use crate::utils::validate_identifier;

/// Page size used when a binding carries no page-size hint.
pub const DEFAULT_PAGE_SIZE: u32 = 50;

/// Schema of one syncable object type in the data lake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceObjectDefinition {
    pub id: i64,
    /// Object name in the data lake; also the target table name
    pub object_name: String,
    /// Prefix prepended to every field name to get the target column name
    pub column_prefix: String,
    /// Ordered key columns used to identify a record in the target
    pub unique_key: Vec<String>,
    /// Fields allowed to be written to the target
    pub columns: BTreeSet<String>,
}

impl SourceObjectDefinition {
    /// Build a definition from the comma-separated lists kept in the control store.
    ///
    /// Fails with `Configuration` when the key set is empty, names a column that
    /// isn't in `columns`, or when any name is not a safe SQL identifier.
    pub fn from_lists(
        id: i64,
        object_name: &str,
        column_prefix: &str,
        unique_key: &str,
        columns: &str,
    ) -> Result<Self, SyncError> {
        let definition = Self {
            id,
            object_name: object_name.trim().to_string(),
            column_prefix: column_prefix.trim().to_string(),
            unique_key: split_list(unique_key),
            columns: split_list(columns).into_iter().collect(),
        };
        definition.validate()?;
        Ok(definition)
    }

    /// Check the definition invariants.
    pub fn validate(&self) -> Result<(), SyncError> {
        let invalid = |msg: String| {
            SyncError::Configuration(format!(
                "Invalid definition for object {} ({}): {}",
                self.id, self.object_name, msg
            ))
        };

        validate_identifier(&self.object_name).map_err(invalid)?;
        if !self.column_prefix.is_empty() {
            validate_identifier(&self.column_prefix).map_err(invalid)?;
        }
        if self.unique_key.is_empty() {
            return Err(invalid("unique key is empty".to_string()));
        }
        for column in &self.columns {
            validate_identifier(&self.target_column(column)).map_err(invalid)?;
        }
        if let Some(missing) = self.unique_key.iter().find(|k| !self.columns.contains(*k)) {
            return Err(invalid(format!(
                "unique key column '{}' is not one of the object's columns",
                missing
            )));
        }
        Ok(())
    }

    /// Target column name for a field.
    pub fn target_column(&self, field: &str) -> String {
        format!("{}{}", self.column_prefix, field)
    }
}

fn split_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// One (object, environment) sync relationship.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncBinding {
    pub id: i64,
    pub object_id: i64,
    pub environment_id: i64,
    pub active: bool,
    pub page_size: Option<u32>,
    pub watermark: Option<DateTime<Utc>>,
}

impl SyncBinding {
    /// Watermark as carried by the binding row itself.
    pub fn watermark(&self) -> Watermark {
        Watermark {
            page_size: self.page_size,
            last_update: self.watermark,
        }
    }
}

/// Sync progress for one binding.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Watermark {
    /// Maximum number of events to fetch per run
    pub page_size: Option<u32>,
    /// Events strictly newer than this are fetched next; `None` = from the beginning
    pub last_update: Option<DateTime<Utc>>,
}

impl Watermark {
    /// Effective page size, falling back to `default` when no hint is stored.
    pub fn page_size_or(&self, default: u32) -> u32 {
        match self.page_size {
            Some(size) if size > 0 => size,
            _ => default,
        }
    }
}

/// Immutable audit record of one binding's run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunLogEntry {
    pub binding_id: i64,
    pub environment_id: i64,
    pub object_id: i64,
    pub run_timestamp: DateTime<Utc>,
    pub duration_ms: u64,
    pub records_read: u64,
    pub records_inserted: u64,
    pub records_updated: u64,
    pub records_deleted: u64,
}

/// Credentials and endpoints of one data lake environment (tenant).
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentRecord {
    pub id: i64,
    /// Tenant identifier, the value passed on the command line
    pub tenant: String,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    /// Base URL of the API gateway
    pub api_url: Option<String>,
    /// Base of the token endpoint path (may be an absolute URL)
    pub token_path_prefix: Option<String>,
    /// Token endpoint path appended to `token_path_prefix`
    pub token_path: Option<String>,
    pub service_account_key: Option<String>,
    pub service_account_secret: Option<String>,
}

impl std::fmt::Debug for EnvironmentRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let redacted = |v: &Option<String>| v.as_ref().map(|_| "***");
        f.debug_struct("EnvironmentRecord")
            .field("id", &self.id)
            .field("tenant", &self.tenant)
            .field("client_id", &self.client_id)
            .field("client_secret", &redacted(&self.client_secret))
            .field("api_url", &self.api_url)
            .field("token_path_prefix", &self.token_path_prefix)
            .field("token_path", &self.token_path)
            .field("service_account_key", &redacted(&self.service_account_key))
            .field(
                "service_account_secret",
                &redacted(&self.service_account_secret),
            )
            .finish()
    }
}
