// ABOUTME: In-memory fakes of the data lake source and target database for tests
// ABOUTME: Lets the reconciler and runner be exercised without network or PostgreSQL

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use datalake_sync::control::{ControlStore, EnvironmentRecord, SourceObjectDefinition, Watermark};
use datalake_sync::datalake::{EventBatch, EventRef, EventSource, Record};
use datalake_sync::target::{ColumnValue, TargetProvider, TargetStore};
use datalake_sync::SyncError;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};

pub type Row = BTreeMap<String, Value>;

/// Target tables kept in memory. Writes can be made to fail for chosen key values.
#[derive(Default)]
pub struct MemoryTarget {
    tables: Mutex<HashMap<String, Vec<Row>>>,
    statements: Mutex<Vec<String>>,
    failing_values: Mutex<HashSet<String>>,
}

impl MemoryTarget {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make any write whose key carries `value` fail.
    pub fn fail_writes_for(&self, value: &str) {
        self.failing_values.lock().unwrap().insert(value.to_string());
    }

    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.tables
            .lock()
            .unwrap()
            .get(table)
            .cloned()
            .unwrap_or_default()
    }

    pub fn insert_fixture(&self, table: &str, row: Row) {
        self.tables
            .lock()
            .unwrap()
            .entry(table.to_string())
            .or_default()
            .push(row);
    }

    /// Statement kinds executed so far, e.g. "COUNT Customer".
    pub fn statements(&self) -> Vec<String> {
        self.statements.lock().unwrap().clone()
    }

    fn log(&self, kind: &str, table: &str) {
        self.statements
            .lock()
            .unwrap()
            .push(format!("{} {}", kind, table));
    }

    fn check_failure(&self, table: &str, keys: &[ColumnValue]) -> Result<(), SyncError> {
        let failing = self.failing_values.lock().unwrap();
        match keys
            .iter()
            .find(|(_, v)| v.as_str().map(|s| failing.contains(s)).unwrap_or(false))
        {
            Some((column, value)) => Err(SyncError::TargetWrite {
                table: table.to_string(),
                detail: format!("injected failure for {} = {}", column, value),
            }),
            None => Ok(()),
        }
    }
}

fn matches(row: &Row, keys: &[ColumnValue]) -> bool {
    keys.iter().all(|(column, value)| row.get(column) == Some(value))
}

#[async_trait]
impl TargetStore for MemoryTarget {
    async fn count_matching(&self, table: &str, keys: &[ColumnValue]) -> Result<i64, SyncError> {
        self.log("COUNT", table);
        let tables = self.tables.lock().unwrap();
        let count = tables
            .get(table)
            .map(|rows| rows.iter().filter(|row| matches(row, keys)).count())
            .unwrap_or(0);
        Ok(count as i64)
    }

    async fn insert_row(&self, table: &str, values: &[ColumnValue]) -> Result<u64, SyncError> {
        self.log("INSERT", table);
        self.check_failure(table, values)?;
        let row: Row = values.iter().cloned().collect();
        self.tables
            .lock()
            .unwrap()
            .entry(table.to_string())
            .or_default()
            .push(row);
        Ok(1)
    }

    async fn update_rows(
        &self,
        table: &str,
        set: &[ColumnValue],
        keys: &[ColumnValue],
    ) -> Result<u64, SyncError> {
        self.log("UPDATE", table);
        self.check_failure(table, keys)?;
        let mut tables = self.tables.lock().unwrap();
        let mut changed = 0;
        for row in tables.entry(table.to_string()).or_default().iter_mut() {
            if matches(row, keys) {
                for (column, value) in set {
                    row.insert(column.clone(), value.clone());
                }
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn delete_rows(&self, table: &str, keys: &[ColumnValue]) -> Result<u64, SyncError> {
        self.log("DELETE", table);
        self.check_failure(table, keys)?;
        let mut tables = self.tables.lock().unwrap();
        let rows = tables.entry(table.to_string()).or_default();
        let before = rows.len();
        rows.retain(|row| !matches(row, keys));
        Ok((before - rows.len()) as u64)
    }
}

/// Hands out one shared MemoryTarget, or fails to connect.
pub struct FakeTargetProvider {
    pub target: Arc<MemoryTarget>,
    pub fail_connect: bool,
}

impl FakeTargetProvider {
    pub fn new(target: Arc<MemoryTarget>) -> Self {
        Self {
            target,
            fail_connect: false,
        }
    }

    pub fn unreachable() -> Self {
        Self {
            target: Arc::new(MemoryTarget::new()),
            fail_connect: true,
        }
    }
}

#[async_trait]
impl TargetProvider for FakeTargetProvider {
    async fn acquire(&self) -> Result<Arc<dyn TargetStore>, SyncError> {
        if self.fail_connect {
            return Err(SyncError::TargetConnect("connection refused".to_string()));
        }
        Ok(self.target.clone())
    }
}

/// One event of a fake source: its id, date and the records it resolves to
/// (or `None` when resolving it fails).
#[derive(Clone)]
pub struct FakeEvent {
    pub object_name: String,
    pub event_id: String,
    pub event_date: DateTime<Utc>,
    pub records: Option<Vec<Value>>,
}

/// Event source backed by a list of events. Honors the watermark and page size
/// the way the remote list endpoint does.
#[derive(Default)]
pub struct FakeSource {
    events: Vec<FakeEvent>,
    default_page_size: u32,
    fetches: Mutex<Vec<(String, Watermark)>>,
    fail_fetch: bool,
}

impl FakeSource {
    pub fn new() -> Self {
        Self {
            default_page_size: 50,
            ..Self::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail_fetch: true,
            ..Self::new()
        }
    }

    pub fn with_event(
        mut self,
        object_name: &str,
        event_id: &str,
        event_date: DateTime<Utc>,
        records: Vec<Value>,
    ) -> Self {
        self.events.push(FakeEvent {
            object_name: object_name.to_string(),
            event_id: event_id.to_string(),
            event_date,
            records: Some(records),
        });
        self
    }

    pub fn with_broken_event(
        mut self,
        object_name: &str,
        event_id: &str,
        event_date: DateTime<Utc>,
    ) -> Self {
        self.events.push(FakeEvent {
            object_name: object_name.to_string(),
            event_id: event_id.to_string(),
            event_date,
            records: None,
        });
        self
    }

    /// Watermarks the source was asked to fetch from, per object.
    pub fn fetches(&self) -> Vec<(String, Watermark)> {
        self.fetches.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventSource for FakeSource {
    async fn fetch_events(
        &self,
        definition: &SourceObjectDefinition,
        watermark: &Watermark,
    ) -> Result<EventBatch, SyncError> {
        self.fetches
            .lock()
            .unwrap()
            .push((definition.object_name.clone(), watermark.clone()));

        if self.fail_fetch {
            return Err(SyncError::SourceUnavailable("service down".to_string()));
        }

        let mut events: Vec<&FakeEvent> = self
            .events
            .iter()
            .filter(|e| e.object_name == definition.object_name)
            .filter(|e| watermark.last_update.map(|w| e.event_date > w).unwrap_or(true))
            .collect();
        events.sort_by_key(|e| e.event_date);
        events.truncate(watermark.page_size_or(self.default_page_size) as usize);

        Ok(EventBatch {
            events: events
                .into_iter()
                .map(|e| {
                    let date = datalake_sync::utils::format_timestamp(&e.event_date);
                    EventRef::new(e.event_id.clone(), Some(date.as_str()))
                })
                .collect(),
            watermark: watermark.last_update,
        })
    }

    async fn resolve_event(&self, event: &EventRef) -> Result<Vec<Record>, SyncError> {
        let found = self
            .events
            .iter()
            .find(|e| e.event_id == event.event_id)
            .ok_or_else(|| SyncError::SourceUnavailable(format!("no event {}", event.event_id)))?;

        match &found.records {
            Some(records) => Ok(records
                .iter()
                .cloned()
                .filter_map(Record::from_value)
                .collect()),
            None => Err(SyncError::Resolution(format!(
                "payload of {} is not JSON",
                event.event_id
            ))),
        }
    }
}

pub fn ts(day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, day, hour, 0, 0).unwrap()
}

pub fn record(value: Value) -> Record {
    Record::from_value(value).unwrap()
}

pub fn row(pairs: &[(&str, Value)]) -> Row {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

pub fn customer_definition() -> SourceObjectDefinition {
    SourceObjectDefinition::from_lists(1, "Customer", "F_", "externalId", "externalId,name,deleted")
        .unwrap()
}

pub fn environment(tenant: &str) -> EnvironmentRecord {
    EnvironmentRecord {
        tenant: tenant.to_string(),
        client_id: Some("client".to_string()),
        client_secret: Some("secret".to_string()),
        api_url: Some("https://gateway.example.com".to_string()),
        token_path_prefix: Some("https://sso.example.com/as/".to_string()),
        token_path: Some("token.oauth2".to_string()),
        service_account_key: Some("key".to_string()),
        service_account_secret: Some("pass".to_string()),
        ..Default::default()
    }
}

/// Control store with one environment and the Customer object registered.
/// Returns the store, environment id and object id.
pub fn seeded_store() -> (ControlStore, i64, i64) {
    let store = ControlStore::open_in_memory().unwrap();
    let env_id = store.add_environment(&environment("ACME_TST")).unwrap();
    let object_id = store
        .add_definition("Customer", "F_", "externalId", "externalId,name,deleted")
        .unwrap();
    (store, env_id, object_id)
}
