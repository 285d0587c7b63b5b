// ABOUTME: Record reconciler - applies one resolved record to its target table
// ABOUTME: Chooses insert, update, delete or no-op from key existence and the deleted flag

use std::fmt;

use crate::control::SourceObjectDefinition;
use crate::datalake::Record;
use crate::error::SyncError;
use crate::target::{ColumnValue, TargetStore};

/// Record metadata that never becomes a target column on insert.
pub const PROTECTED_FIELDS: [&str; 4] = ["accountingEntity", "variationNumber", "timestamp", "deleted"];

/// What reconciling one record did to the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReconcileOutcome {
    Inserted,
    Updated,
    Deleted,
    Skipped,
}

impl fmt::Display for ReconcileOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReconcileOutcome::Inserted => "inserted",
            ReconcileOutcome::Updated => "updated",
            ReconcileOutcome::Deleted => "deleted",
            ReconcileOutcome::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

/// Reconciler decides and applies the single statement a record needs.
///
/// Existence is tested by equality on the unique-key columns the record
/// actually carries. A record carrying none of them cannot be placed and is
/// skipped rather than inserted.
pub struct Reconciler<'a> {
    target: &'a dyn TargetStore,
}

impl<'a> Reconciler<'a> {
    pub fn new(target: &'a dyn TargetStore) -> Self {
        Self { target }
    }

    /// Reconcile one record against the definition's table.
    ///
    /// # Errors
    ///
    /// Any failed statement is returned as `SyncError::TargetWrite`; the
    /// target is left as the failing statement left it.
    pub async fn reconcile(
        &self,
        definition: &SourceObjectDefinition,
        record: &Record,
    ) -> Result<ReconcileOutcome, SyncError> {
        let table = definition.object_name.as_str();

        let keys = key_values(definition, record);
        if keys.is_empty() {
            tracing::warn!(
                "Skipping {} record without any unique key value ({})",
                table,
                definition.unique_key.join(", ")
            );
            return Ok(ReconcileOutcome::Skipped);
        }

        let exists = self.target.count_matching(table, &keys).await? > 0;
        let deleted = record.is_deleted();

        let outcome = match (exists, deleted) {
            (true, true) => {
                let removed = self.target.delete_rows(table, &keys).await?;
                tracing::debug!("Deleted {} row(s) from {} for {}", removed, table, describe(&keys));
                ReconcileOutcome::Deleted
            }
            (true, false) => {
                let set = update_values(definition, record, &keys);
                if set.is_empty() {
                    tracing::debug!("Nothing to update in {} for {}", table, describe(&keys));
                } else {
                    let changed = self.target.update_rows(table, &set, &keys).await?;
                    tracing::debug!("Updated {} row(s) in {} for {}", changed, table, describe(&keys));
                }
                ReconcileOutcome::Updated
            }
            (false, false) => {
                let values = insert_values(definition, record);
                if values.is_empty() {
                    tracing::warn!("Skipping {} record with no insertable columns", table);
                    ReconcileOutcome::Skipped
                } else {
                    self.target.insert_row(table, &values).await?;
                    tracing::debug!("Inserted into {} for {}", table, describe(&keys));
                    ReconcileOutcome::Inserted
                }
            }
            (false, true) => {
                tracing::debug!(
                    "Delete for {} in {} has no matching row",
                    describe(&keys),
                    table
                );
                ReconcileOutcome::Skipped
            }
        };

        Ok(outcome)
    }
}

/// Key columns the record has a non-null value for, in key order.
pub fn key_values(definition: &SourceObjectDefinition, record: &Record) -> Vec<ColumnValue> {
    definition
        .unique_key
        .iter()
        .filter_map(|field| {
            record
                .value(field)
                .map(|value| (definition.target_column(field), value.clone()))
        })
        .collect()
}

/// Columns written on insert: record fields the definition allows, minus
/// protected metadata fields.
pub fn insert_values(definition: &SourceObjectDefinition, record: &Record) -> Vec<ColumnValue> {
    allowed_values(definition, record, |field| !PROTECTED_FIELDS.contains(&field))
}

/// Columns written on update: record fields the definition allows, minus the
/// key columns already used to match the row.
pub fn update_values(
    definition: &SourceObjectDefinition,
    record: &Record,
    keys: &[ColumnValue],
) -> Vec<ColumnValue> {
    allowed_values(definition, record, |field| {
        let column = definition.target_column(field);
        !keys.iter().any(|(key, _)| *key == column)
    })
}

fn allowed_values(
    definition: &SourceObjectDefinition,
    record: &Record,
    keep: impl Fn(&str) -> bool,
) -> Vec<ColumnValue> {
    definition
        .columns
        .iter()
        .filter(|field| keep(field.as_str()))
        .filter_map(|field| {
            record
                .get(field)
                .map(|value| (definition.target_column(field), value.clone()))
        })
        .collect()
}

fn describe(keys: &[ColumnValue]) -> String {
    keys.iter()
        .map(|(column, value)| format!("{}={}", column, value))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn definition() -> SourceObjectDefinition {
        SourceObjectDefinition::from_lists(
            1,
            "Customer",
            "F_",
            "externalId",
            "externalId,name,deleted,timestamp,accountingEntity",
        )
        .unwrap()
    }

    fn record(value: Value) -> Record {
        Record::from_value(value).unwrap()
    }

    #[test]
    fn test_key_values_ignore_null_and_missing() {
        let def = SourceObjectDefinition::from_lists(1, "OrderLine", "", "order,line", "order,line")
            .unwrap();
        let keys = key_values(&def, &record(json!({"order": "O1", "line": null})));
        assert_eq!(keys, vec![("order".to_string(), json!("O1"))]);
        assert!(key_values(&def, &record(json!({"other": 1}))).is_empty());
    }

    #[test]
    fn test_insert_values_drop_protected_and_unknown_fields() {
        let rec = record(json!({
            "externalId": "X1",
            "name": "Foo",
            "deleted": false,
            "timestamp": "2024-01-01T00:00:00.000Z",
            "accountingEntity": "AE",
            "unmapped": 5
        }));
        let values = insert_values(&definition(), &rec);
        assert_eq!(
            values,
            vec![
                ("F_externalId".to_string(), json!("X1")),
                ("F_name".to_string(), json!("Foo")),
            ]
        );
    }

    #[test]
    fn test_update_values_exclude_where_keys() {
        let rec = record(json!({"externalId": "X1", "name": "Bar"}));
        let keys = key_values(&definition(), &rec);
        let set = update_values(&definition(), &rec, &keys);
        assert_eq!(set, vec![("F_name".to_string(), json!("Bar"))]);
    }

    #[test]
    fn test_outcome_display() {
        assert_eq!(ReconcileOutcome::Inserted.to_string(), "inserted");
        assert_eq!(ReconcileOutcome::Skipped.to_string(), "skipped");
    }
}
