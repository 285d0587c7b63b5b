// ABOUTME: Utility functions for identifier handling, timestamps and retries
// ABOUTME: Shared by the control store, target writer and data lake client

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use std::time::Duration;

/// Validate an identifier used to build SQL (schema, table, column, prefix)
///
/// Identifiers come from the control store, never from record payloads, but are
/// still checked before being spliced into statements:
/// - Must not be empty or whitespace-only
/// - Must not exceed 63 characters (PostgreSQL limit)
/// - Must start with a letter or underscore
/// - May only contain letters, digits, and underscores
///
/// # Examples
///
/// ```
/// # use datalake_sync::utils::validate_identifier;
/// assert!(validate_identifier("F_externalId").is_ok());
/// assert!(validate_identifier("123abc").is_err());
/// assert!(validate_identifier("name\"; DROP TABLE x; --").is_err());
/// ```
pub fn validate_identifier(identifier: &str) -> Result<(), String> {
    let trimmed = identifier.trim();
    let Some(first_char) = trimmed.chars().next() else {
        return Err("Identifier cannot be empty or whitespace-only".to_string());
    };

    if trimmed.len() > 63 {
        return Err(format!(
            "Identifier '{}' exceeds maximum length of 63 characters (got {})",
            sanitize_identifier(trimmed),
            trimmed.len()
        ));
    }

    if !first_char.is_ascii_alphabetic() && first_char != '_' {
        return Err(format!(
            "Identifier '{}' must start with a letter or underscore, not '{}'",
            sanitize_identifier(trimmed),
            first_char
        ));
    }

    if let Some((i, c)) = trimmed
        .chars()
        .enumerate()
        .find(|(_, c)| !c.is_ascii_alphanumeric() && *c != '_')
    {
        return Err(format!(
            "Identifier '{}' contains invalid character '{}' at position {}",
            sanitize_identifier(trimmed),
            if c.is_control() {
                format!("\\x{:02x}", c as u32)
            } else {
                c.to_string()
            },
            i
        ));
    }

    Ok(())
}

/// Sanitize an identifier for display in logs and error messages.
pub fn sanitize_identifier(identifier: &str) -> String {
    identifier
        .chars()
        .filter(|c| !c.is_control())
        .take(100)
        .collect()
}

/// Quote a PostgreSQL identifier (schema, table, column)
///
/// Escapes embedded quotes and wraps the identifier in double quotes.
pub fn quote_ident(identifier: &str) -> String {
    let mut quoted = String::with_capacity(identifier.len() + 2);
    quoted.push('"');
    for ch in identifier.chars() {
        if ch == '"' {
            quoted.push('"');
        }
        quoted.push(ch);
    }
    quoted.push('"');
    quoted
}

/// Format a timestamp the way the data lake expects it: `2024-01-01T00:00:00.000Z`.
///
/// Sub-millisecond digits are kept when present so a stored watermark is never
/// older than the record it came from.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    let precision = if ts.timestamp_subsec_nanos() % 1_000_000 == 0 {
        SecondsFormat::Millis
    } else {
        SecondsFormat::AutoSi
    };
    ts.to_rfc3339_opts(precision, true)
}

/// Parse an ISO-8601 timestamp.
///
/// Accepts RFC 3339 with any offset, and naive `YYYY-MM-DDTHH:MM:SS[.fff]` /
/// `YYYY-MM-DD HH:MM:SS[.fff]` forms which are taken as UTC.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Some(ts.with_timezone(&Utc));
    }
    parse_naive_timestamp(value).map(|naive| naive.and_utc())
}

/// Parse a timestamp without zone information.
pub fn parse_naive_timestamp(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Some(ts.naive_utc());
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
}

/// Retry an async operation with exponential backoff
///
/// Retries `operation` up to `max_retries` additional times, doubling the delay
/// after each failure. Returns the first success or the last error.
pub async fn retry_with_backoff<F, Fut, T, E>(
    mut operation: F,
    max_retries: u32,
    initial_delay: Duration,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut delay = initial_delay;
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) if attempt < max_retries => {
                tracing::warn!(
                    "Operation failed (attempt {}/{}): {}. Retrying in {:?}...",
                    attempt + 1,
                    max_retries + 1,
                    e,
                    delay
                );
                tokio::time::sleep(delay).await;
                delay *= 2; // Exponential backoff
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
