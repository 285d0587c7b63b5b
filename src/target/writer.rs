// ABOUTME: PgTarget - applies reconciled records to target PostgreSQL tables
// ABOUTME: Builds parameterized COUNT/INSERT/UPDATE/DELETE statements keyed by column equality

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio_postgres::types::ToSql;
use tokio_postgres::Client;

use super::converter::json_to_sql;
use super::{ColumnValue, TargetStore};
use crate::error::SyncError;
use crate::utils::quote_ident;

/// Writes records into tables of one target schema.
///
/// Column data types are read from `information_schema.columns` the first time a
/// table is touched and cached, so each value can be bound with the Rust type
/// the column expects.
pub struct PgTarget {
    client: Client,
    schema: String,
    column_types: Mutex<HashMap<String, HashMap<String, String>>>,
}

impl PgTarget {
    pub fn new(client: Client, schema: &str) -> Self {
        Self {
            client,
            schema: schema.to_string(),
            column_types: Mutex::new(HashMap::new()),
        }
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    /// Get a reference to the underlying client.
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Whether the underlying connection has gone away.
    pub fn is_closed(&self) -> bool {
        self.client.is_closed()
    }

    /// Column name → data type for a table, cached after the first lookup.
    async fn column_types(&self, table: &str) -> Result<HashMap<String, String>, SyncError> {
        if let Some(types) = self.cached_column_types(table) {
            return Ok(types);
        }

        let types: HashMap<String, String> = get_table_columns(&self.client, &self.schema, table)
            .await?
            .into_iter()
            .collect();

        if types.is_empty() {
            tracing::warn!(
                "No column metadata found for {}.{}; values will be sent as text",
                self.schema,
                table
            );
        }

        self.column_types
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(table.to_string(), types.clone());
        Ok(types)
    }

    fn cached_column_types(&self, table: &str) -> Option<HashMap<String, String>> {
        self.column_types
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(table)
            .cloned()
    }

    /// Convert column values into boxed parameters, in order.
    async fn bind(
        &self,
        table: &str,
        columns: &[&ColumnValue],
    ) -> Result<Vec<Box<dyn ToSql + Sync + Send>>, SyncError> {
        let types = self.column_types(table).await?;
        columns
            .iter()
            .map(|(column, value)| {
                let data_type = types.get(column).map(String::as_str).unwrap_or("text");
                json_to_sql(value, data_type)
                    .map_err(|e| SyncError::target_write(table, format!("column {}: {}", column, e)))
            })
            .collect()
    }

    async fn execute(
        &self,
        table: &str,
        query: &str,
        values: &[Box<dyn ToSql + Sync + Send>],
    ) -> Result<u64, SyncError> {
        let params: Vec<&(dyn ToSql + Sync)> = values
            .iter()
            .map(|v| v.as_ref() as &(dyn ToSql + Sync))
            .collect();

        tracing::trace!("Executing on {}.{}: {}", self.schema, table, query);

        self.client
            .execute(query, &params)
            .await
            .map_err(|e| SyncError::target_write(table, format_pg_error(&e)))
    }
}

#[async_trait]
impl TargetStore for PgTarget {
    async fn count_matching(&self, table: &str, keys: &[ColumnValue]) -> Result<i64, SyncError> {
        let names: Vec<&str> = keys.iter().map(|(c, _)| c.as_str()).collect();
        let query = build_count_query(&self.schema, table, &names);
        let values = self.bind(table, &keys.iter().collect::<Vec<_>>()).await?;
        let params: Vec<&(dyn ToSql + Sync)> = values
            .iter()
            .map(|v| v.as_ref() as &(dyn ToSql + Sync))
            .collect();

        let row = self
            .client
            .query_one(&query, &params)
            .await
            .map_err(|e| SyncError::target_write(table, format_pg_error(&e)))?;
        Ok(row.get(0))
    }

    async fn insert_row(&self, table: &str, values: &[ColumnValue]) -> Result<u64, SyncError> {
        let names: Vec<&str> = values.iter().map(|(c, _)| c.as_str()).collect();
        let query = build_insert_query(&self.schema, table, &names);
        let params = self.bind(table, &values.iter().collect::<Vec<_>>()).await?;
        self.execute(table, &query, &params).await
    }

    async fn update_rows(
        &self,
        table: &str,
        set: &[ColumnValue],
        keys: &[ColumnValue],
    ) -> Result<u64, SyncError> {
        let set_names: Vec<&str> = set.iter().map(|(c, _)| c.as_str()).collect();
        let key_names: Vec<&str> = keys.iter().map(|(c, _)| c.as_str()).collect();
        let query = build_update_query(&self.schema, table, &set_names, &key_names);
        let params = self
            .bind(table, &set.iter().chain(keys.iter()).collect::<Vec<_>>())
            .await?;
        self.execute(table, &query, &params).await
    }

    async fn delete_rows(&self, table: &str, keys: &[ColumnValue]) -> Result<u64, SyncError> {
        let names: Vec<&str> = keys.iter().map(|(c, _)| c.as_str()).collect();
        let query = build_delete_query(&self.schema, table, &names);
        let params = self.bind(table, &keys.iter().collect::<Vec<_>>()).await?;
        self.execute(table, &query, &params).await
    }
}

/// Show the server's message and detail when the error came from PostgreSQL.
fn format_pg_error(err: &tokio_postgres::Error) -> String {
    match err.as_db_error() {
        Some(db) => match db.detail() {
            Some(detail) => format!("{} ({})", db.message(), detail),
            None => db.message().to_string(),
        },
        None => err.to_string(),
    }
}

fn qualified_table(schema: &str, table: &str) -> String {
    format!("{}.{}", quote_ident(schema), quote_ident(table))
}

/// `"k1" = $n AND "k2" = $n+1 ...`, numbering placeholders from `first_param`.
fn where_clause(key_columns: &[&str], first_param: usize) -> String {
    key_columns
        .iter()
        .enumerate()
        .map(|(i, c)| format!("{} = ${}", quote_ident(c), first_param + i))
        .collect::<Vec<_>>()
        .join(" AND ")
}

/// Build the existence check.
///
/// ```sql
/// SELECT COUNT(*) FROM "schema"."table" WHERE "F_k1" = $1 AND "F_k2" = $2
/// ```
fn build_count_query(schema: &str, table: &str, key_columns: &[&str]) -> String {
    format!(
        "SELECT COUNT(*) FROM {} WHERE {}",
        qualified_table(schema, table),
        where_clause(key_columns, 1)
    )
}

/// Build a single-row insert.
///
/// ```sql
/// INSERT INTO "schema"."table" ("F_c1", "F_c2") VALUES ($1, $2)
/// ```
fn build_insert_query(schema: &str, table: &str, columns: &[&str]) -> String {
    let quoted: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
    let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("${}", i)).collect();

    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        qualified_table(schema, table),
        quoted.join(", "),
        placeholders.join(", ")
    )
}

/// Build an update keyed by column equality. SET parameters come first.
///
/// ```sql
/// UPDATE "schema"."table" SET "F_c1" = $1, "F_c2" = $2 WHERE "F_k1" = $3
/// ```
fn build_update_query(
    schema: &str,
    table: &str,
    set_columns: &[&str],
    key_columns: &[&str],
) -> String {
    let assignments: Vec<String> = set_columns
        .iter()
        .enumerate()
        .map(|(i, c)| format!("{} = ${}", quote_ident(c), i + 1))
        .collect();

    format!(
        "UPDATE {} SET {} WHERE {}",
        qualified_table(schema, table),
        assignments.join(", "),
        where_clause(key_columns, set_columns.len() + 1)
    )
}

/// Build a delete keyed by column equality.
///
/// ```sql
/// DELETE FROM "schema"."table" WHERE "F_k1" = $1
/// ```
fn build_delete_query(schema: &str, table: &str, key_columns: &[&str]) -> String {
    format!(
        "DELETE FROM {} WHERE {}",
        qualified_table(schema, table),
        where_clause(key_columns, 1)
    )
}

/// Extract column metadata from a PostgreSQL table.
///
/// Returns (column_name, data_type) pairs for all columns in the table.
pub async fn get_table_columns(
    client: &Client,
    schema: &str,
    table: &str,
) -> Result<Vec<(String, String)>, SyncError> {
    let rows = client
        .query(
            "SELECT column_name, data_type
             FROM information_schema.columns
             WHERE table_schema = $1 AND table_name = $2
             ORDER BY ordinal_position",
            &[&schema, &table],
        )
        .await
        .map_err(|e| {
            SyncError::target_write(
                table,
                format!("failed to read column metadata: {}", format_pg_error(&e)),
            )
        })?;

    Ok(rows
        .iter()
        .map(|row| {
            let name: String = row.get(0);
            let dtype: String = row.get(1);
            (name, dtype)
        })
        .collect())
}
