// ABOUTME: HTTP client for the data lake dataobjects API
// ABOUTME: Lists change events past a watermark and resolves each event to its records

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use std::time::Duration;
use url::Url;

use super::decoder::LineDelimitedDecoder;
use super::models::{EventBatch, EventListResponse, EventRef, Record};
use super::EventSource;
use crate::auth::Session;
use crate::control::{SourceObjectDefinition, Watermark, DEFAULT_PAGE_SIZE};
use crate::error::SyncError;
use crate::utils::format_timestamp;

/// Field the event list is filtered on to select one object's events.
pub const OBJECT_NAME_FIELD: &str = "dl_document_name";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub struct DataLakeClient {
    client: Client,
    api_base: String,
    token: String,
    default_page_size: u32,
    decoder: LineDelimitedDecoder,
}

impl DataLakeClient {
    /// Create a client for an authenticated session.
    ///
    /// Fails with `Configuration` when the session lacks a base URL or token.
    pub fn new(session: &Session) -> Result<Self, SyncError> {
        if session.api_base.trim().is_empty() {
            return Err(SyncError::Configuration(
                "Data lake API base URL is not configured".to_string(),
            ));
        }
        if session.token.trim().is_empty() {
            return Err(SyncError::Configuration(
                "No bearer token available for the data lake API".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| {
                SyncError::Configuration(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self {
            client,
            api_base: session.api_base.trim_end_matches('/').to_string(),
            token: session.token.clone(),
            default_page_size: DEFAULT_PAGE_SIZE,
            decoder: LineDelimitedDecoder,
        })
    }

    /// Page size used when the watermark carries no hint.
    pub fn with_default_page_size(mut self, page_size: u32) -> Self {
        self.default_page_size = page_size.max(1);
        self
    }

    async fn get(&self, url: Url, what: &str) -> Result<reqwest::Response, SyncError> {
        let response = self
            .client
            .get(url)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| SyncError::SourceUnavailable(format!("Failed to {}: {}", what, e)))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(SyncError::SourceUnavailable(format!(
                "Failed to {}: data lake rejected the bearer token ({})",
                what, status
            )));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SyncError::SourceUnavailable(format!(
                "Failed to {}: data lake returned {}: {}",
                what, status, body
            )));
        }

        Ok(response)
    }
}

#[async_trait]
impl EventSource for DataLakeClient {
    async fn fetch_events(
        &self,
        definition: &SourceObjectDefinition,
        watermark: &Watermark,
    ) -> Result<EventBatch, SyncError> {
        let page_size = watermark.page_size_or(self.default_page_size);
        let url = build_events_url(
            &self.api_base,
            &definition.object_name,
            watermark.last_update.as_ref(),
            page_size,
        )?;

        tracing::debug!("Fetching events for {}: {}", definition.object_name, url);

        let what = format!("list events for {}", definition.object_name);
        let response = self.get(url, &what).await?;
        let body: EventListResponse = response.json().await.map_err(|e| {
            SyncError::SourceUnavailable(format!("Failed to parse event list: {}", e))
        })?;

        Ok(EventBatch {
            events: body.into_events(),
            watermark: watermark.last_update,
        })
    }

    async fn resolve_event(&self, event: &EventRef) -> Result<Vec<Record>, SyncError> {
        let url = build_event_url(&self.api_base, &event.event_id)?;
        let what = format!("resolve event {}", event.event_id);

        let body = self
            .get(url, &what)
            .await?
            .bytes()
            .await
            .map_err(|e| SyncError::SourceUnavailable(format!("Failed to {}: {}", what, e)))?;

        self.decoder.decode(&body)
    }
}

/// Build the event list request for one object.
///
/// Events are sorted ascending by event date, capped at `page_size`, and limited
/// to those strictly newer than `watermark` when one is given.
pub fn build_events_url(
    api_base: &str,
    object_name: &str,
    watermark: Option<&DateTime<Utc>>,
    page_size: u32,
) -> Result<Url, SyncError> {
    let mut url = parse_base(api_base, "dataobjects")?;

    let mut filter = format!("({} eq '{}')", OBJECT_NAME_FIELD, object_name);
    if let Some(watermark) = watermark {
        filter.push_str(&format!(
            " and (event_date gt '{}')",
            format_timestamp(watermark)
        ));
    }

    url.query_pairs_mut()
        .append_pair("sort", "event_date:asc")
        .append_pair("records", &page_size.to_string())
        .append_pair("filter", &filter);

    Ok(url)
}

/// Build the request URL resolving one event.
pub fn build_event_url(api_base: &str, event_id: &str) -> Result<Url, SyncError> {
    let mut url = parse_base(api_base, "dataobjects")?;
    url.path_segments_mut()
        .map_err(|_| {
            SyncError::Configuration(format!("Data lake API base '{}' cannot be a base", api_base))
        })?
        .push(event_id);
    Ok(url)
}

fn parse_base(api_base: &str, endpoint: &str) -> Result<Url, SyncError> {
    let raw = format!("{}/{}", api_base.trim_end_matches('/'), endpoint);
    Url::parse(&raw).map_err(|e| {
        SyncError::Configuration(format!("Invalid data lake API base '{}': {}", api_base, e))
    })
}
