// ABOUTME: SyncRunner - drives fetch, resolve, reconcile, log and watermark per binding
// ABOUTME: Isolates failures per binding and per event so one bad table never stops a run

use chrono::Utc;
use std::fmt;
use std::time::Instant;

use super::reconciler::Reconciler;
use super::stats::{BindingReport, RecordTally, RunSummary, WatermarkPolicy, WatermarkTracker};
use crate::auth::TokenProvider;
use crate::control::{ControlStore, RunLogEntry, SyncBinding, DEFAULT_PAGE_SIZE};
use crate::datalake::{DataLakeClient, EventSource};
use crate::error::SyncError;
use crate::target::{TargetPool, TargetProvider};

/// Configuration for the SyncRunner.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Events fetched per binding when the binding has no page-size hint
    pub default_page_size: u32,
    /// How failures limit watermark advancement
    pub watermark_policy: WatermarkPolicy,
    /// Accept self-signed certificates from the target database
    pub accept_invalid_certs: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            default_page_size: DEFAULT_PAGE_SIZE,
            watermark_policy: WatermarkPolicy::default(),
            accept_invalid_certs: false,
        }
    }
}

/// Where a run currently is; logged on every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SyncPhase {
    FetchingTarget,
    Authenticating,
    ListingBindings,
    Connecting,
    FetchingEvents,
    Resolving,
    Reconciling,
    LoggingRun,
    AdvancingWatermark,
    Idle,
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SyncPhase::FetchingTarget => "fetching target",
            SyncPhase::Authenticating => "authenticating",
            SyncPhase::ListingBindings => "listing bindings",
            SyncPhase::Connecting => "connecting",
            SyncPhase::FetchingEvents => "fetching events",
            SyncPhase::Resolving => "resolving",
            SyncPhase::Reconciling => "reconciling",
            SyncPhase::LoggingRun => "logging run",
            SyncPhase::AdvancingWatermark => "advancing watermark",
            SyncPhase::Idle => "idle",
        };
        f.write_str(s)
    }
}

/// SyncRunner pulls new change events for every active binding of an
/// environment and applies them to the target database.
///
/// Each run:
/// 1. Loads the environment's target database and authenticates
/// 2. For each active binding, fetches events past its watermark
/// 3. Resolves and reconciles every event's records, in event-date order
/// 4. Appends a run log entry and advances the watermark
pub struct SyncRunner {
    store: ControlStore,
    config: SyncConfig,
}

impl SyncRunner {
    pub fn new(store: ControlStore, config: SyncConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &ControlStore {
        &self.store
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Run one sync pass over an environment.
    ///
    /// Fails only when the environment itself cannot be set up (no target
    /// database, unknown tenant, authentication failure). Binding-level
    /// failures are collected in the returned summary.
    pub async fn run(
        &self,
        environment: &str,
        tokens: &dyn TokenProvider,
    ) -> Result<RunSummary, SyncError> {
        tracing::debug!("Run for {}: {}", environment, SyncPhase::FetchingTarget);
        let target = self.store.get_target_connection(environment)?.ok_or_else(|| {
            SyncError::Configuration(format!(
                "No target database configured for environment {}",
                environment
            ))
        })?;
        let record = self.store.get_environment(environment)?.ok_or_else(|| {
            SyncError::Configuration(format!("Unknown environment {}", environment))
        })?;

        tracing::debug!("Run for {}: {}", environment, SyncPhase::Authenticating);
        let session = tokens.authenticate(&record).await?;
        tracing::info!("Authenticated against data lake for {}", session.tenant);

        let source =
            DataLakeClient::new(&session)?.with_default_page_size(self.config.default_page_size);
        let pool = TargetPool::new(target, self.config.accept_invalid_certs);

        self.sync_environment(session.environment_id, &source, &pool)
            .await
    }

    /// Sync every active binding of an environment through the given source
    /// and target.
    pub async fn sync_environment(
        &self,
        environment_id: i64,
        source: &dyn EventSource,
        targets: &dyn TargetProvider,
    ) -> Result<RunSummary, SyncError> {
        let start = Instant::now();
        let mut summary = RunSummary::default();

        tracing::debug!("Environment {}: {}", environment_id, SyncPhase::ListingBindings);
        let bindings = self.store.active_bindings(environment_id)?;
        if bindings.is_empty() {
            tracing::info!("No active bindings for environment {}", environment_id);
        }

        for binding in &bindings {
            match self.sync_binding(binding, source, targets).await {
                Ok(Some(report)) => {
                    tracing::info!(
                        "Synced {}: {} read, {} inserted, {} updated, {} deleted, {} skipped, {} failed in {}ms",
                        report.object_name,
                        report.tally.read,
                        report.tally.inserted,
                        report.tally.updated,
                        report.tally.deleted,
                        report.tally.skipped,
                        report.tally.failed,
                        report.duration_ms
                    );
                    summary.add_report(report);
                }
                Ok(None) => summary.bindings_idle += 1,
                Err(e) => {
                    let error_msg = format!(
                        "Binding {} (object {}): {}",
                        binding.id, binding.object_id, e
                    );
                    tracing::error!("Failed to sync binding {}: {:?}", binding.id, e);
                    summary.errors.push(error_msg);
                }
            }
        }

        tracing::debug!("Environment {}: {}", environment_id, SyncPhase::Idle);
        summary.duration_ms = start.elapsed().as_millis() as u64;
        Ok(summary)
    }

    /// Sync one binding. Returns `None` when there were no new events.
    async fn sync_binding(
        &self,
        binding: &SyncBinding,
        source: &dyn EventSource,
        targets: &dyn TargetProvider,
    ) -> Result<Option<BindingReport>, SyncError> {
        let started_at = Utc::now();
        let start = Instant::now();

        tracing::debug!("Binding {}: {}", binding.id, SyncPhase::Connecting);
        let target = targets.acquire().await?;

        let definition = self.store.get_definition(binding.object_id)?.ok_or_else(|| {
            SyncError::Configuration(format!(
                "Binding {} refers to unknown object {}",
                binding.id, binding.object_id
            ))
        })?;
        let watermark = self
            .store
            .read_watermark(binding.object_id, binding.environment_id)?
            .unwrap_or_else(|| binding.watermark());

        tracing::debug!("Binding {}: {}", binding.id, SyncPhase::FetchingEvents);
        let batch = source.fetch_events(&definition, &watermark).await?;
        if batch.is_empty() {
            tracing::info!("No new events for {}", definition.object_name);
            return Ok(None);
        }
        tracing::info!(
            "Processing {} event(s) for {}",
            batch.len(),
            definition.object_name
        );

        let reconciler = Reconciler::new(target.as_ref());
        let mut tally = RecordTally::default();
        let mut tracker = WatermarkTracker::new(self.config.watermark_policy);
        let mut failed_events = 0;

        for event in &batch.events {
            tracing::trace!("Binding {}: {} event {}", binding.id, SyncPhase::Resolving, event.event_id);
            let records = match source.resolve_event(event).await {
                Ok(records) => records,
                Err(e) => {
                    tracing::warn!(
                        "Skipping event {} of {}: {}",
                        event.event_id,
                        definition.object_name,
                        e
                    );
                    failed_events += 1;
                    tracker.fail();
                    tracker.finish_event(&event.event_id);
                    continue;
                }
            };

            if records.is_empty() {
                tracing::debug!("Event {} carries no records", event.event_id);
            }

            for record in &records {
                tracing::trace!("Binding {}: {}", binding.id, SyncPhase::Reconciling);
                tally.read += 1;
                tracker.observe(record.timestamp());

                match reconciler.reconcile(&definition, record).await {
                    Ok(outcome) => tally.record(outcome),
                    Err(e) if e.is_record_level() => {
                        tracing::warn!(
                            "Failed to apply record of event {} to {}: {}",
                            event.event_id,
                            definition.object_name,
                            e
                        );
                        tally.failed += 1;
                        tracker.fail();
                    }
                    Err(e) => return Err(e),
                }
            }
            tracker.finish_event(&event.event_id);
        }

        let duration_ms = start.elapsed().as_millis() as u64;

        tracing::debug!("Binding {}: {}", binding.id, SyncPhase::LoggingRun);
        self.store.append_run_log(&RunLogEntry {
            binding_id: binding.id,
            environment_id: binding.environment_id,
            object_id: binding.object_id,
            run_timestamp: started_at,
            duration_ms,
            records_read: tally.read,
            records_inserted: tally.inserted,
            records_updated: tally.updated,
            records_deleted: tally.deleted,
        })?;

        tracing::debug!("Binding {}: {}", binding.id, SyncPhase::AdvancingWatermark);
        let new_watermark = tracker.advance(watermark.last_update);
        if let Some(next) = new_watermark.as_ref() {
            self.store
                .write_watermark(binding.object_id, binding.environment_id, next)?;
        }
        if let Some(event_id) = tracker.blocked_by() {
            tracing::warn!(
                "Watermark for {} held back by failed event {}; it will be retried next run",
                definition.object_name,
                event_id
            );
        }

        Ok(Some(BindingReport {
            binding_id: binding.id,
            object_name: definition.object_name.clone(),
            events: batch.len(),
            failed_events,
            tally,
            duration_ms,
            previous_watermark: watermark.last_update,
            new_watermark,
            blocked_by: tracker.blocked_by().map(str::to_string),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SyncConfig::default();
        assert_eq!(config.default_page_size, 50);
        assert_eq!(config.watermark_policy, WatermarkPolicy::Contiguous);
        assert!(!config.accept_invalid_certs);
    }

    #[test]
    fn test_phase_display() {
        assert_eq!(SyncPhase::AdvancingWatermark.to_string(), "advancing watermark");
        assert_eq!(SyncPhase::Idle.to_string(), "idle");
    }
}
