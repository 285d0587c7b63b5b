// ABOUTME: Per-binding tallies, watermark tracking and the per-run summary
// ABOUTME: Decides how far a binding's watermark may move after a batch

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::reconciler::ReconcileOutcome;

/// Running counts for one binding's batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordTally {
    /// Resolved records handed to the reconciler
    pub read: u64,
    pub inserted: u64,
    pub updated: u64,
    pub deleted: u64,
    pub skipped: u64,
    /// Records whose write failed
    pub failed: u64,
}

impl RecordTally {
    pub fn record(&mut self, outcome: ReconcileOutcome) {
        match outcome {
            ReconcileOutcome::Inserted => self.inserted += 1,
            ReconcileOutcome::Updated => self.updated += 1,
            ReconcileOutcome::Deleted => self.deleted += 1,
            ReconcileOutcome::Skipped => self.skipped += 1,
        }
    }

    /// Records that reached a decision, successful or not.
    pub fn accounted(&self) -> u64 {
        self.inserted + self.updated + self.deleted + self.skipped + self.failed
    }

    pub fn add(&mut self, other: &RecordTally) {
        self.read += other.read;
        self.inserted += other.inserted;
        self.updated += other.updated;
        self.deleted += other.deleted;
        self.skipped += other.skipped;
        self.failed += other.failed;
    }
}

/// How failures inside a batch limit watermark advancement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum WatermarkPolicy {
    /// Advance only across the leading run of events that fully succeeded
    #[default]
    Contiguous,
    /// Advance to the newest timestamp seen, even past failed events
    MaxSeen,
}

/// Folds record timestamps into a candidate watermark, event by event.
///
/// Timestamps of the event in progress are held as pending until
/// `finish_event`, which commits them unless the policy says a failure blocks
/// further advancement.
#[derive(Debug, Clone)]
pub struct WatermarkTracker {
    policy: WatermarkPolicy,
    committed: Option<DateTime<Utc>>,
    pending: Option<DateTime<Utc>>,
    event_failed: bool,
    /// First failed event under `Contiguous`; nothing after it commits
    blocked_by: Option<String>,
}

impl WatermarkTracker {
    pub fn new(policy: WatermarkPolicy) -> Self {
        Self {
            policy,
            committed: None,
            pending: None,
            event_failed: false,
            blocked_by: None,
        }
    }

    /// Fold one record timestamp into the current event.
    pub fn observe(&mut self, timestamp: Option<DateTime<Utc>>) {
        self.pending = max_of(self.pending, timestamp);
    }

    /// Mark the current event as not fully applied.
    pub fn fail(&mut self) {
        self.event_failed = true;
    }

    /// Close the current event.
    pub fn finish_event(&mut self, event_id: &str) {
        let pending = self.pending.take();
        let failed = std::mem::take(&mut self.event_failed);

        match self.policy {
            WatermarkPolicy::MaxSeen => self.committed = max_of(self.committed, pending),
            WatermarkPolicy::Contiguous => {
                if failed {
                    if self.blocked_by.is_none() {
                        self.blocked_by = Some(event_id.to_string());
                    }
                } else if self.blocked_by.is_none() {
                    self.committed = max_of(self.committed, pending);
                }
            }
        }
    }

    /// Newest timestamp the watermark may move to, if any was committed.
    pub fn candidate(&self) -> Option<DateTime<Utc>> {
        self.committed
    }

    /// Whether a failure stopped the watermark short of the batch.
    pub fn is_blocked(&self) -> bool {
        self.blocked_by.is_some()
    }

    /// The event the watermark could not move past.
    pub fn blocked_by(&self) -> Option<&str> {
        self.blocked_by.as_deref()
    }

    /// The watermark to store, or `None` when it would not move forward.
    pub fn advance(&self, previous: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
        let candidate = self.committed?;
        match previous {
            Some(previous) if candidate <= previous => None,
            _ => Some(candidate),
        }
    }
}

fn max_of(a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, None) => a,
        (None, b) => b,
    }
}

/// Result of one binding that had events to process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindingReport {
    pub binding_id: i64,
    pub object_name: String,
    pub events: usize,
    pub failed_events: usize,
    pub tally: RecordTally,
    pub duration_ms: u64,
    pub previous_watermark: Option<DateTime<Utc>>,
    /// Watermark written at the end of the batch, if it moved
    pub new_watermark: Option<DateTime<Utc>>,
    /// Failed event that held the watermark back, to be retried next run
    pub blocked_by: Option<String>,
}

/// Statistics from one run over an environment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunSummary {
    pub bindings_synced: usize,
    /// Bindings whose fetch returned no events
    pub bindings_idle: usize,
    pub totals: RecordTally,
    pub reports: Vec<BindingReport>,
    pub errors: Vec<String>,
    pub duration_ms: u64,
}

impl RunSummary {
    /// Check if every binding completed without a binding-level error.
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_report(&mut self, report: BindingReport) {
        self.bindings_synced += 1;
        self.totals.add(&report.tally);
        self.reports.push(report);
    }
}
