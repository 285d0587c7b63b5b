// ABOUTME: Decoder for the line-delimited payloads returned by the resolve endpoint
// ABOUTME: Reassembles one-object-per-line bodies into a JSON array before parsing

use serde_json::Value;

use super::models::Record;
use crate::error::SyncError;

/// Decodes event payloads where each line holds one JSON object.
///
/// The body is not a valid JSON document on its own. Non-blank lines are joined
/// with commas and wrapped in brackets, and the result is parsed as a single
/// array. Every element must be an object.
#[derive(Debug, Clone, Copy, Default)]
pub struct LineDelimitedDecoder;

impl LineDelimitedDecoder {
    /// Decode a raw payload into records. An empty payload yields no records.
    pub fn decode(&self, body: &[u8]) -> Result<Vec<Record>, SyncError> {
        let text = std::str::from_utf8(body)
            .map_err(|e| SyncError::Resolution(format!("payload is not valid UTF-8: {}", e)))?;

        let document = self.reassemble(text);
        let values: Vec<Value> = serde_json::from_str(&document)
            .map_err(|e| SyncError::Resolution(format!("payload is not valid JSON: {}", e)))?;

        values
            .into_iter()
            .enumerate()
            .map(|(idx, value)| {
                Record::from_value(value).ok_or_else(|| {
                    SyncError::Resolution(format!("payload line {} is not a JSON object", idx + 1))
                })
            })
            .collect()
    }

    /// Join the payload's lines into one JSON array document.
    fn reassemble(&self, text: &str) -> String {
        let lines: Vec<&str> = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect();

        let mut document = String::with_capacity(text.len() + 2);
        document.push('[');
        document.push_str(&lines.join(","));
        document.push(']');
        document
    }
}
