// ABOUTME: CLI entry point for datalake-sync
// ABOUTME: Parses the environment argument and runs one sync pass over its bindings

use anyhow::Context;
use clap::Parser;
use datalake_sync::auth::OAuthTokenProvider;
use datalake_sync::control::ControlStore;
use datalake_sync::{SyncConfig, SyncRunner, WatermarkPolicy};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "datalake-sync")]
#[command(about = "Incremental data-lake-to-PostgreSQL sync", long_about = None)]
#[command(version)]
struct Cli {
    /// Environment (tenant) to sync
    environment: Option<String>,
    /// Path to the SQLite control store
    #[arg(long = "control-db", env = "DATALAKE_CONTROL_DB", default_value = "datalake.db")]
    control_db: PathBuf,
    /// Set the log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log: String,
    /// Events fetched per binding when the binding has no page size
    #[arg(long = "default-page-size", env = "DATALAKE_PAGE_SIZE", default_value_t = 50)]
    default_page_size: u32,
    /// How failed events limit watermark advancement
    #[arg(long = "watermark-policy", value_enum, default_value_t = WatermarkPolicy::Contiguous)]
    watermark_policy: WatermarkPolicy,
    /// Allow self-signed TLS certificates (insecure - use only for testing)
    #[arg(long = "allow-self-signed-certs", default_value_t = false)]
    allow_self_signed_certs: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // RUST_LOG takes precedence over --log
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(cli.log.clone()));

    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let Some(environment) = cli.environment.clone() else {
        eprintln!("No environment specified. Please provide an environment ID.");
        std::process::exit(1);
    };

    let store = ControlStore::open(&cli.control_db).with_context(|| {
        format!("Failed to open control store {}", cli.control_db.display())
    })?;
    let tokens = OAuthTokenProvider::new().context("Failed to set up authentication")?;

    let config = SyncConfig {
        default_page_size: cli.default_page_size,
        watermark_policy: cli.watermark_policy,
        accept_invalid_certs: cli.allow_self_signed_certs,
    };
    if config.accept_invalid_certs {
        tracing::warn!("Accepting invalid TLS certificates from the target database");
    }

    let runner = SyncRunner::new(store, config);
    let summary = runner
        .run(&environment, &tokens)
        .await
        .with_context(|| format!("Sync failed for environment {}", environment))?;

    tracing::info!(
        "Sync complete for {}: {} binding(s) synced, {} without new events, {} read, {} inserted, {} updated, {} deleted in {}ms",
        environment,
        summary.bindings_synced,
        summary.bindings_idle,
        summary.totals.read,
        summary.totals.inserted,
        summary.totals.updated,
        summary.totals.deleted,
        summary.duration_ms
    );

    if !summary.is_success() {
        for error in &summary.errors {
            tracing::error!("{}", error);
        }
        anyhow::bail!("{} binding(s) failed", summary.errors.len());
    }

    Ok(())
}
