//! Shared storage helper functions.
//!
//! Column encodings used by the SQL backends: decimals and identifiers are
//! stored as text, timestamps as RFC 3339 UTC with fixed microsecond
//! precision so that text comparison matches time order.

use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use super::{Result, StorageError};

/// Encode a timestamp for storage.
pub fn encode_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn decode_timestamp(field: &'static str, value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|_| StorageError::Decode {
            field,
            value: value.to_string(),
        })
}

pub fn decode_optional_timestamp(
    field: &'static str,
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>> {
    value
        .as_deref()
        .map(|value| decode_timestamp(field, value))
        .transpose()
}

pub fn decode_decimal(field: &'static str, value: &str) -> Result<Decimal> {
    Decimal::from_str(value).map_err(|_| StorageError::Decode {
        field,
        value: value.to_string(),
    })
}

pub fn decode_uuid(field: &'static str, value: &str) -> Result<Uuid> {
    Uuid::parse_str(value).map_err(|_| StorageError::Decode {
        field,
        value: value.to_string(),
    })
}

/// Parse a stored enum column with its `parse` function.
pub fn decode_enum<T>(
    field: &'static str,
    value: &str,
    parse: impl FnOnce(&str) -> Option<T>,
) -> Result<T> {
    parse(value).ok_or_else(|| StorageError::Decode {
        field,
        value: value.to_string(),
    })
}

/// Stored versions are SQLite integers.
pub fn decode_version(value: i64) -> Result<u64> {
    u64::try_from(value).map_err(|_| StorageError::Decode {
        field: "version",
        value: value.to_string(),
    })
}
