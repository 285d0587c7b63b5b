// ABOUTME: Data structures exchanged with the data lake API
// ABOUTME: Event references from the list endpoint and records from the resolve endpoint

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::utils::parse_timestamp;

/// Pointer to one change event, as returned by the event list endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRef {
    #[serde(rename = "dl_id", deserialize_with = "string_or_number")]
    pub event_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_date: Option<String>,
    /// Any other attributes the endpoint sends along
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl EventRef {
    pub fn new(event_id: impl Into<String>, event_date: Option<&str>) -> Self {
        Self {
            event_id: event_id.into(),
            event_date: event_date.map(str::to_string),
            extra: Map::new(),
        }
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number for dl_id, got {}",
            other
        ))),
    }
}

/// Ordered events newer than a watermark.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventBatch {
    pub events: Vec<EventRef>,
    /// Watermark value the batch was filtered with
    pub watermark: Option<DateTime<Utc>>,
}

impl EventBatch {
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }
}

/// Envelope of the event list endpoint: `{ "data": { "fields": [...] } }`
#[derive(Debug, Deserialize)]
pub(crate) struct EventListResponse {
    #[serde(default)]
    pub data: Option<EventListData>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct EventListData {
    #[serde(default)]
    pub fields: Option<Vec<EventRef>>,
}

impl EventListResponse {
    pub fn into_events(self) -> Vec<EventRef> {
        self.data.and_then(|d| d.fields).unwrap_or_default()
    }
}

/// One materialized record of a data lake object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record {
    fields: Map<String, Value>,
}

impl Record {
    /// Name of the deletion marker field.
    pub const DELETED_FIELD: &'static str = "deleted";
    /// Name of the record timestamp field.
    pub const TIMESTAMP_FIELD: &'static str = "timestamp";

    pub fn new(fields: Map<String, Value>) -> Self {
        Self { fields }
    }

    /// Build a record from a JSON value; `None` unless it's an object.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(fields) => Some(Self { fields }),
            _ => None,
        }
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Value of a field, treating JSON `null` as absent.
    pub fn value(&self, field: &str) -> Option<&Value> {
        self.fields.get(field).filter(|v| !v.is_null())
    }

    /// Whether the record is a deletion marker.
    ///
    /// `true`, a non-zero number, or the strings "true"/"1" count as deleted.
    pub fn is_deleted(&self) -> bool {
        match self.fields.get(Self::DELETED_FIELD) {
            Some(Value::Bool(b)) => *b,
            Some(Value::Number(n)) => n.as_f64().is_some_and(|v| v != 0.0),
            Some(Value::String(s)) => {
                let s = s.trim();
                s.eq_ignore_ascii_case("true") || s == "1"
            }
            _ => false,
        }
    }

    /// Raw timestamp string, if present.
    pub fn raw_timestamp(&self) -> Option<&str> {
        self.fields.get(Self::TIMESTAMP_FIELD).and_then(Value::as_str)
    }

    /// Parsed record timestamp.
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.raw_timestamp().and_then(parse_timestamp)
    }
}
