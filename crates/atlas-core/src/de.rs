//! Lenient field deserializers for loosely-typed source documents.
//!
//! Raw exports mix numeric ids stored as floats or strings, timestamps in
//! several textual forms, and categorical fields that are sometimes not
//! strings at all. These helpers normalize each shape once, at the scan
//! boundary, so the builders only ever see typed values.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::de::{Deserializer, Error as _};
use serde::Deserialize;
use serde_json::Value;

/// Timestamp layouts found in the exports, tried in order.
const TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];

/// Integer identifier: accepts integers, integral floats and numeric strings.
pub(crate) fn opt_id<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    id_from_value(&Value::deserialize(deserializer)?).map_err(D::Error::custom)
}

fn id_from_value(value: &Value) -> Result<Option<i64>, String> {
    match value {
        Value::Null => Ok(None),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                return Ok(Some(i));
            }
            match n.as_f64() {
                Some(f) if f.is_finite() && f.fract() == 0.0 => Ok(Some(f as i64)),
                _ => Err(format!("expected an integer id, got {n}")),
            }
        }
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                return Ok(None);
            }
            if let Ok(i) = s.parse::<i64>() {
                return Ok(Some(i));
            }
            match s.parse::<f64>() {
                Ok(f) if f.is_finite() && f.fract() == 0.0 => Ok(Some(f as i64)),
                _ => Err(format!("expected an integer id, got '{s}'")),
            }
        }
        other => Err(format!("expected an integer id, got {other}")),
    }
}

/// The integer a raw id field deserializes to, or `None` when it is
/// missing, blank or not an integer.
pub fn normalize_id(value: &Value) -> Option<i64> {
    id_from_value(value).ok().flatten()
}

/// Categorical text: anything that is not a non-blank string becomes `None`.
pub(crate) fn opt_str<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) if !s.trim().is_empty() => Some(s),
        _ => None,
    })
}

/// Numeric measurement: numbers and numeric strings, anything else is `None`.
pub(crate) fn opt_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Number(n) => n.as_f64().filter(|f| f.is_finite()),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        _ => None,
    })
}

/// 0/1 flag stored as a number, boolean or string.
pub(crate) fn opt_flag<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Bool(b) => Some(b),
        Value::Number(n) => n.as_f64().map(|f| f != 0.0),
        Value::String(s) => match s.trim() {
            "1" | "true" => Some(true),
            "0" | "false" => Some(false),
            _ => None,
        },
        _ => None,
    })
}

/// Timestamp as text, or as an extended-JSON `{"$date": ...}` wrapper.
pub(crate) fn opt_timestamp<'de, D>(deserializer: D) -> Result<Option<NaiveDateTime>, D::Error>
where
    D: Deserializer<'de>,
{
    timestamp_from_value(&Value::deserialize(deserializer)?).map_err(D::Error::custom)
}

fn timestamp_from_value(value: &Value) -> Result<Option<NaiveDateTime>, String> {
    let value = match value {
        Value::Object(map) => match map.get("$date") {
            Some(inner) => inner,
            None => return Ok(None),
        },
        other => other,
    };

    match value {
        Value::Null => Ok(None),
        Value::String(s) if s.trim().is_empty() => Ok(None),
        Value::String(s) => parse_timestamp(s.trim())
            .map(Some)
            .ok_or_else(|| format!("unrecognized timestamp '{s}'")),
        Value::Number(n) => n
            .as_i64()
            .and_then(DateTime::from_timestamp_millis)
            .map(|dt| Some(dt.naive_utc()))
            .ok_or_else(|| format!("timestamp out of range: {n}")),
        other => Err(format!("expected a timestamp, got {other}")),
    }
}

/// The timestamp a raw time field deserializes to, or `None` when it is
/// missing, blank or unrecognized.
pub fn normalize_timestamp(value: &Value) -> Option<NaiveDateTime> {
    timestamp_from_value(value).ok().flatten()
}

/// Parse the textual timestamp layouts used by the exports.
pub(crate) fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    for format in TIMESTAMP_FORMATS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(s, format) {
            return Some(ts);
        }
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_utc());
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}
