// ABOUTME: Target PostgreSQL connection settings and the per-run connection pool
// ABOUTME: Connects lazily with retry and hands the same client to every binding of a run

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_postgres::Client;

use super::writer::PgTarget;
use super::{TargetProvider, TargetStore};
use crate::error::SyncError;
use crate::utils::retry_with_backoff;

pub const DEFAULT_PORT: u16 = 5432;
pub const DEFAULT_SCHEMA: &str = "public";

/// Location and credentials of the target database.
#[derive(Clone, PartialEq, Eq)]
pub struct TargetConnection {
    pub server: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub database: String,
    /// Schema the synced tables live in
    pub schema: String,
}

impl TargetConnection {
    /// Check that every field needed to connect is present.
    pub fn validate(&self) -> Result<(), SyncError> {
        let missing: Vec<&str> = [
            ("server", &self.server),
            ("username", &self.username),
            ("database", &self.database),
            ("schema", &self.schema),
        ]
        .into_iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| name)
        .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(SyncError::Configuration(format!(
                "Target database is missing: {}",
                missing.join(", ")
            )))
        }
    }

    /// Display form without the password.
    pub fn display_name(&self) -> String {
        format!(
            "{}@{}:{}/{} (schema {})",
            self.username, self.server, self.port, self.database, self.schema
        )
    }
}

impl std::fmt::Debug for TargetConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TargetConnection")
            .field("server", &self.server)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"***")
            .field("database", &self.database)
            .field("schema", &self.schema)
            .finish()
    }
}

/// Open a client to the target database.
///
/// The connection task is spawned onto the runtime and ends when the returned
/// client is dropped.
pub async fn connect(
    target: &TargetConnection,
    accept_invalid_certs: bool,
) -> Result<Client, SyncError> {
    target.validate()?;

    let tls = native_tls::TlsConnector::builder()
        .danger_accept_invalid_certs(accept_invalid_certs)
        .build()
        .map_err(|e| SyncError::TargetConnect(format!("Failed to build TLS connector: {}", e)))?;
    let tls = postgres_native_tls::MakeTlsConnector::new(tls);

    let mut config = tokio_postgres::Config::new();
    config
        .host(&target.server)
        .port(target.port)
        .user(&target.username)
        .password(&target.password)
        .dbname(&target.database)
        .application_name("datalake-sync")
        .connect_timeout(Duration::from_secs(30));

    let (client, connection) = config.connect(tls).await.map_err(|e| {
        SyncError::TargetConnect(format!("{}: {}", target.display_name(), e))
    })?;

    tokio::spawn(async move {
        if let Err(e) = connection.await {
            tracing::error!("Target connection error: {}", e);
        }
    });

    tracing::info!("Connected to target database {}", target.display_name());
    Ok(client)
}

/// Lazily connected target shared by all bindings of a run.
///
/// The first `acquire` connects (with retry); later calls reuse the client
/// unless it has been closed, in which case a new one is opened. A failed
/// connect only fails that `acquire`, so the next binding tries again.
pub struct TargetPool {
    target: TargetConnection,
    accept_invalid_certs: bool,
    max_retries: u32,
    current: Mutex<Option<Arc<PgTarget>>>,
}

impl TargetPool {
    pub fn new(target: TargetConnection, accept_invalid_certs: bool) -> Self {
        Self {
            target,
            accept_invalid_certs,
            max_retries: 2,
            current: Mutex::new(None),
        }
    }

    pub fn target(&self) -> &TargetConnection {
        &self.target
    }
}

#[async_trait]
impl TargetProvider for TargetPool {
    async fn acquire(&self) -> Result<Arc<dyn TargetStore>, SyncError> {
        let mut current = self.current.lock().await;

        if let Some(existing) = current.as_ref() {
            if !existing.is_closed() {
                return Ok(existing.clone());
            }
            tracing::warn!("Target connection was closed, reconnecting");
        }

        self.target.validate()?;
        let client = retry_with_backoff(
            || connect(&self.target, self.accept_invalid_certs),
            self.max_retries,
            Duration::from_secs(1),
        )
        .await?;

        let target = Arc::new(PgTarget::new(client, &self.target.schema));
        *current = Some(target.clone());
        Ok(target)
    }
}
