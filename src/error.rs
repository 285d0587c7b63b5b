// ABOUTME: Error taxonomy for the sync engine
// ABOUTME: Lets the runner tell "no data" apart from "something failed" per binding, event and record

use thiserror::Error;

/// Errors raised by the sync engine.
///
/// Lookups that find nothing return `Ok(None)` instead of an error, so every
/// variant here means something actually went wrong.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Missing credentials, connection fields, or an invalid object definition
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Remote data lake could not be reached, refused the request, or returned garbage
    #[error("Source unavailable: {0}")]
    SourceUnavailable(String),

    /// Event payload could not be decoded into records
    #[error("Failed to resolve event: {0}")]
    Resolution(String),

    /// Target database could not be reached
    #[error("Failed to connect to target database: {0}")]
    TargetConnect(String),

    /// A statement against the target table failed
    #[error("Failed to write to target table {table}: {detail}")]
    TargetWrite { table: String, detail: String },

    /// Control store (definitions, bindings, watermarks, run log) error
    #[error("Control store error: {0}")]
    Store(#[from] rusqlite::Error),
}

impl SyncError {
    pub(crate) fn target_write(table: &str, detail: impl std::fmt::Display) -> Self {
        SyncError::TargetWrite {
            table: table.to_string(),
            detail: detail.to_string(),
        }
    }

    /// Whether this error aborts only the record being reconciled.
    pub fn is_record_level(&self) -> bool {
        matches!(self, SyncError::TargetWrite { .. })
    }
}

pub type Result<T, E = SyncError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_write_message() {
        let err = SyncError::target_write("orders", "duplicate key");
        assert_eq!(
            err.to_string(),
            "Failed to write to target table orders: duplicate key"
        );
        assert!(err.is_record_level());
    }

    #[test]
    fn test_configuration_is_not_record_level() {
        let err = SyncError::Configuration("missing token".to_string());
        assert!(!err.is_record_level());
        assert!(err.to_string().contains("missing token"));
    }
}
