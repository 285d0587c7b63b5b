// ABOUTME: SQLite-backed control store for definitions, bindings, watermarks and run logs
// ABOUTME: Lookups that find nothing return None; only real failures are errors

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use super::models::{
    EnvironmentRecord, RunLogEntry, SourceObjectDefinition, SyncBinding, Watermark,
};
use crate::error::SyncError;
use crate::target::TargetConnection;
use crate::utils::{format_timestamp, parse_timestamp};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS environments (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    tenant TEXT NOT NULL UNIQUE,
    client_id TEXT,
    client_secret TEXT,
    api_url TEXT,
    token_path_prefix TEXT,
    token_path TEXT,
    service_account_key TEXT,
    service_account_secret TEXT
);

CREATE TABLE IF NOT EXISTS source_objects (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    object_name TEXT NOT NULL,
    column_prefix TEXT NOT NULL DEFAULT '',
    unique_key TEXT NOT NULL,
    columns TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS sync_bindings (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    object_id INTEGER NOT NULL REFERENCES source_objects(id),
    environment_id INTEGER NOT NULL REFERENCES environments(id),
    active INTEGER NOT NULL DEFAULT 1,
    page_size INTEGER,
    last_update TEXT,
    UNIQUE (object_id, environment_id)
);

CREATE TABLE IF NOT EXISTS sync_run_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    binding_id INTEGER NOT NULL,
    environment_id INTEGER NOT NULL,
    object_id INTEGER NOT NULL,
    run_timestamp TEXT NOT NULL,
    duration_ms INTEGER NOT NULL,
    records_read INTEGER NOT NULL,
    records_inserted INTEGER NOT NULL,
    records_updated INTEGER NOT NULL,
    records_deleted INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS target_databases (
    environment TEXT PRIMARY KEY,
    server TEXT NOT NULL,
    port INTEGER,
    username TEXT,
    password TEXT,
    target_database TEXT,
    target_schema TEXT
);
";

/// Control store holding everything the sync engine needs besides the data itself.
///
/// The SQLite connection sits behind a mutex so the store can be shared with
/// async code; every method is synchronous and releases the lock before
/// returning, so no lock is ever held across an `.await`.
pub struct ControlStore {
    conn: Mutex<Connection>,
}

impl ControlStore {
    /// Open (or create) the control store at `path` and ensure its schema exists.
    pub fn open(path: &Path) -> Result<Self, SyncError> {
        tracing::debug!("Opening control store at {:?}", path);
        let conn = Connection::open(path)?;
        Self::with_connection(conn)
    }

    /// Open a throwaway in-memory control store.
    pub fn open_in_memory() -> Result<Self, SyncError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, SyncError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Look up an environment by its tenant identifier.
    pub fn get_environment(&self, tenant: &str) -> Result<Option<EnvironmentRecord>, SyncError> {
        let conn = self.conn();
        let env = conn
            .query_row(
                "SELECT id, tenant, client_id, client_secret, api_url, token_path_prefix,
                        token_path, service_account_key, service_account_secret
                 FROM environments WHERE tenant = ?1",
                params![tenant],
                |row| {
                    Ok(EnvironmentRecord {
                        id: row.get(0)?,
                        tenant: row.get(1)?,
                        client_id: row.get(2)?,
                        client_secret: row.get(3)?,
                        api_url: row.get(4)?,
                        token_path_prefix: row.get(5)?,
                        token_path: row.get(6)?,
                        service_account_key: row.get(7)?,
                        service_account_secret: row.get(8)?,
                    })
                },
            )
            .optional()?;
        Ok(env)
    }

    /// Register an environment. Returns its id.
    pub fn add_environment(&self, env: &EnvironmentRecord) -> Result<i64, SyncError> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO environments
                (tenant, client_id, client_secret, api_url, token_path_prefix, token_path,
                 service_account_key, service_account_secret)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                env.tenant,
                env.client_id,
                env.client_secret,
                env.api_url,
                env.token_path_prefix,
                env.token_path,
                env.service_account_key,
                env.service_account_secret
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Target database for an environment.
    pub fn get_target_connection(
        &self,
        environment: &str,
    ) -> Result<Option<TargetConnection>, SyncError> {
        let conn = self.conn();
        let target = conn
            .query_row(
                "SELECT server, port, username, password, target_database, target_schema
                 FROM target_databases WHERE environment = ?1",
                params![environment],
                |row| {
                    Ok(TargetConnection {
                        server: row.get(0)?,
                        port: row
                            .get::<_, Option<i64>>(1)?
                            .and_then(|p| u16::try_from(p).ok())
                            .unwrap_or(crate::target::DEFAULT_PORT),
                        username: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                        password: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
                        database: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
                        schema: row
                            .get::<_, Option<String>>(5)?
                            .unwrap_or_else(|| crate::target::DEFAULT_SCHEMA.to_string()),
                    })
                },
            )
            .optional()?;
        Ok(target)
    }

    /// Register (or replace) the target database of an environment.
    pub fn set_target_connection(
        &self,
        environment: &str,
        target: &TargetConnection,
    ) -> Result<(), SyncError> {
        self.conn().execute(
            "INSERT OR REPLACE INTO target_databases
                (environment, server, port, username, password, target_database, target_schema)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                environment,
                target.server,
                target.port,
                target.username,
                target.password,
                target.database,
                target.schema
            ],
        )?;
        Ok(())
    }

    /// Load a source object definition.
    ///
    /// Returns `Ok(None)` when no such object exists and a `Configuration` error
    /// when the stored definition breaks its invariants.
    pub fn get_definition(
        &self,
        object_id: i64,
    ) -> Result<Option<SourceObjectDefinition>, SyncError> {
        let row = {
            let conn = self.conn();
            conn.query_row(
                "SELECT id, object_name, column_prefix, unique_key, columns
                 FROM source_objects WHERE id = ?1",
                params![object_id],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                },
            )
            .optional()?
        };

        row.map(|(id, name, prefix, key, columns)| {
            SourceObjectDefinition::from_lists(id, &name, &prefix, &key, &columns)
        })
        .transpose()
    }

    /// Register a source object from comma-separated key and column lists. Returns its id.
    pub fn add_definition(
        &self,
        object_name: &str,
        column_prefix: &str,
        unique_key: &str,
        columns: &str,
    ) -> Result<i64, SyncError> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO source_objects (object_name, column_prefix, unique_key, columns)
             VALUES (?1, ?2, ?3, ?4)",
            params![object_name, column_prefix, unique_key, columns],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// All active bindings of an environment, in id order.
    ///
    /// A stored watermark that does not parse is listed as `None`.
    pub fn active_bindings(&self, environment_id: i64) -> Result<Vec<SyncBinding>, SyncError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, object_id, environment_id, active, page_size, last_update
             FROM sync_bindings
             WHERE active = 1 AND environment_id = ?1
             ORDER BY id",
        )?;

        let rows = stmt
            .query_map(params![environment_id], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, bool>(3)?,
                    row.get::<_, Option<i64>>(4)?,
                    row.get::<_, Option<String>>(5)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        // A bad stored watermark must not hide the other bindings; it surfaces
        // again from `read_watermark` when that binding is synced.
        Ok(rows
            .into_iter()
            .map(|(id, object_id, environment_id, active, page_size, last_update)| {
                let watermark = decode_watermark(object_id, environment_id, last_update)
                    .unwrap_or_else(|e| {
                        tracing::warn!("Binding {}: {}", id, e);
                        None
                    });
                SyncBinding {
                    id,
                    object_id,
                    environment_id,
                    active,
                    page_size: page_size.and_then(|p| u32::try_from(p).ok()),
                    watermark,
                }
            })
            .collect())
    }

    /// Create a binding between an object and an environment. Returns its id.
    pub fn add_binding(
        &self,
        object_id: i64,
        environment_id: i64,
        page_size: Option<u32>,
        watermark: Option<DateTime<Utc>>,
    ) -> Result<i64, SyncError> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO sync_bindings (object_id, environment_id, active, page_size, last_update)
             VALUES (?1, ?2, 1, ?3, ?4)",
            params![
                object_id,
                environment_id,
                page_size,
                watermark.as_ref().map(format_timestamp)
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Enable or disable a binding.
    pub fn set_binding_active(&self, binding_id: i64, active: bool) -> Result<(), SyncError> {
        self.conn().execute(
            "UPDATE sync_bindings SET active = ?1 WHERE id = ?2",
            params![active, binding_id],
        )?;
        Ok(())
    }

    /// Read the watermark and page-size hint for an (object, environment) pair.
    pub fn read_watermark(
        &self,
        object_id: i64,
        environment_id: i64,
    ) -> Result<Option<Watermark>, SyncError> {
        let row = {
            let conn = self.conn();
            conn.query_row(
                "SELECT page_size, last_update FROM sync_bindings
                 WHERE object_id = ?1 AND environment_id = ?2",
                params![object_id, environment_id],
                |row| {
                    Ok((
                        row.get::<_, Option<i64>>(0)?,
                        row.get::<_, Option<String>>(1)?,
                    ))
                },
            )
            .optional()?
        };

        row.map(|(page_size, last_update)| {
            Ok(Watermark {
                page_size: page_size.and_then(|p| u32::try_from(p).ok()),
                last_update: decode_watermark(object_id, environment_id, last_update)?,
            })
        })
        .transpose()
    }

    /// Store a new watermark for an (object, environment) pair.
    pub fn write_watermark(
        &self,
        object_id: i64,
        environment_id: i64,
        last_update: &DateTime<Utc>,
    ) -> Result<(), SyncError> {
        let updated = self.conn().execute(
            "UPDATE sync_bindings SET last_update = ?1
             WHERE object_id = ?2 AND environment_id = ?3",
            params![format_timestamp(last_update), object_id, environment_id],
        )?;

        if updated == 0 {
            tracing::warn!(
                "No binding found for object {} in environment {}; watermark not stored",
                object_id,
                environment_id
            );
        }
        Ok(())
    }

    /// Append one run log entry. Returns the id assigned to it.
    pub fn append_run_log(&self, entry: &RunLogEntry) -> Result<i64, SyncError> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO sync_run_log
                (binding_id, environment_id, object_id, run_timestamp, duration_ms,
                 records_read, records_inserted, records_updated, records_deleted)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                entry.binding_id,
                entry.environment_id,
                entry.object_id,
                format_timestamp(&entry.run_timestamp),
                entry.duration_ms as i64,
                entry.records_read as i64,
                entry.records_inserted as i64,
                entry.records_updated as i64,
                entry.records_deleted as i64
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Run log entries of a binding, oldest first.
    pub fn run_log(&self, binding_id: i64) -> Result<Vec<RunLogEntry>, SyncError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT binding_id, environment_id, object_id, run_timestamp, duration_ms,
                    records_read, records_inserted, records_updated, records_deleted
             FROM sync_run_log WHERE binding_id = ?1 ORDER BY id",
        )?;

        let entries = stmt
            .query_map(params![binding_id], |row| {
                let run_timestamp: String = row.get(3)?;
                Ok(RunLogEntry {
                    binding_id: row.get(0)?,
                    environment_id: row.get(1)?,
                    object_id: row.get(2)?,
                    run_timestamp: parse_timestamp(&run_timestamp).unwrap_or_default(),
                    duration_ms: row.get::<_, i64>(4)? as u64,
                    records_read: row.get::<_, i64>(5)? as u64,
                    records_inserted: row.get::<_, i64>(6)? as u64,
                    records_updated: row.get::<_, i64>(7)? as u64,
                    records_deleted: row.get::<_, i64>(8)? as u64,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }
}

fn decode_watermark(
    object_id: i64,
    environment_id: i64,
    raw: Option<String>,
) -> Result<Option<DateTime<Utc>>, SyncError> {
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(value) => parse_timestamp(value).map(Some).ok_or_else(|| {
            SyncError::Configuration(format!(
                "Stored watermark '{}' for object {} in environment {} is not a timestamp",
                value, object_id, environment_id
            ))
        }),
    }
}
