// ABOUTME: Converts JSON record values into typed PostgreSQL parameters
// ABOUTME: Picks the Rust type from the target column's data type so tokio-postgres accepts it

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use std::str::FromStr;
use tokio_postgres::types::ToSql;

use crate::utils::{parse_naive_timestamp, parse_timestamp};

/// Convert a JSON value to a boxed parameter matching `data_type`.
///
/// `data_type` is the `information_schema.columns.data_type` of the target
/// column. JSON `null` becomes a typed SQL NULL. Unknown types are sent as text.
///
/// # Errors
///
/// Returns a description of the mismatch when the value cannot be represented
/// in the column's type (e.g. `"abc"` for an integer column).
pub fn json_to_sql(
    value: &Value,
    data_type: &str,
) -> Result<Box<dyn ToSql + Sync + Send>, String> {
    let param: Box<dyn ToSql + Sync + Send> = match data_type {
        "integer" | "int4" => Box::new(convert(value, data_type, |v| {
            as_i64(v).and_then(|n| i32::try_from(n).ok())
        })?),
        "bigint" | "int8" => Box::new(convert(value, data_type, as_i64)?),
        "smallint" | "int2" => Box::new(convert(value, data_type, |v| {
            as_i64(v).and_then(|n| i16::try_from(n).ok())
        })?),
        "boolean" | "bool" => Box::new(convert(value, data_type, as_bool)?),
        "real" | "float4" => Box::new(convert(value, data_type, |v| as_f64(v).map(|f| f as f32))?),
        "double precision" | "float8" => Box::new(convert(value, data_type, as_f64)?),
        "numeric" | "decimal" => Box::new(convert(value, data_type, as_decimal)?),
        "uuid" => Box::new(convert(value, data_type, |v| {
            v.as_str().and_then(|s| uuid::Uuid::parse_str(s.trim()).ok())
        })?),
        "timestamp without time zone" | "timestamp" => {
            Box::new(convert(value, data_type, as_naive_timestamp)?)
        }
        "timestamp with time zone" | "timestamptz" => {
            Box::new(convert(value, data_type, as_timestamp)?)
        }
        "date" => Box::new(convert(value, data_type, as_date)?),
        "json" | "jsonb" => Box::new(if value.is_null() {
            None
        } else {
            Some(value.clone())
        }),
        _ => Box::new(as_text(value)),
    };
    Ok(param)
}

fn convert<T>(
    value: &Value,
    data_type: &str,
    f: impl Fn(&Value) -> Option<T>,
) -> Result<Option<T>, String> {
    if value.is_null() {
        return Ok(None);
    }
    f(value)
        .map(Some)
        .ok_or_else(|| format!("cannot convert {} to {}", value, data_type))
}

/// Text representation of a JSON value; objects and arrays become JSON text.
pub fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
                .map(|f| f as i64)
        }),
        Value::String(s) => s.trim().parse().ok(),
        Value::Bool(b) => Some(i64::from(*b)),
        _ => None,
    }
}

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_i64().map(|i| i != 0),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "t" | "1" | "yes" | "y" => Some(true),
            "false" | "f" | "0" | "no" | "n" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn as_decimal(value: &Value) -> Option<Decimal> {
    let text = match value {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.trim().to_string(),
        _ => return None,
    };
    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .ok()
}

fn as_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    value.as_str().and_then(parse_timestamp)
}

fn as_naive_timestamp(value: &Value) -> Option<NaiveDateTime> {
    value.as_str().and_then(parse_naive_timestamp)
}

fn as_date(value: &Value) -> Option<NaiveDate> {
    let s = value.as_str()?.trim();
    NaiveDate::parse_from_str(s.get(..10)?, "%Y-%m-%d").ok()
}
