// ABOUTME: Data lake source module - event fetching and resolution
// ABOUTME: Defines the EventSource seam the sync runner pulls change events through

pub mod client;
pub mod decoder;
pub mod models;

use async_trait::async_trait;

use crate::control::{SourceObjectDefinition, Watermark};
use crate::error::SyncError;

pub use client::{build_event_url, build_events_url, DataLakeClient};
pub use decoder::LineDelimitedDecoder;
pub use models::{EventBatch, EventRef, Record};

/// Where change events come from.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Fetch the next batch of events for an object, oldest first, strictly
    /// newer than the watermark when it has one.
    async fn fetch_events(
        &self,
        definition: &SourceObjectDefinition,
        watermark: &Watermark,
    ) -> Result<EventBatch, SyncError>;

    /// Materialize the records an event refers to. An empty result means the
    /// event carries no records.
    async fn resolve_event(&self, event: &EventRef) -> Result<Vec<Record>, SyncError>;
}
