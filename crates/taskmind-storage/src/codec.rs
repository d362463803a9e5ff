//! Column codecs shared by the entity repositories.
//!
//! Timestamps are stored as fixed-width RFC 3339 text in UTC with nanosecond
//! precision (`2024-05-01T09:30:00.000000000Z`), so lexical comparison in SQL
//! matches chronological order. Structured fields (tags, relationships,
//! actions, metadata) are stored as JSON text. A NULL or empty column decodes
//! to the field's default.

use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use rusqlite::types::{Type, Value};
use rusqlite::Row;
use serde::de::DeserializeOwned;
use serde::Serialize;

use taskmind_core::types::Metadata;

use crate::error::Result;

pub fn encode_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

/// Parse RFC 3339 text, also accepting SQLite's `CURRENT_TIMESTAMP` form.
pub fn decode_datetime(text: &str) -> std::result::Result<DateTime<Utc>, chrono::ParseError> {
    match DateTime::parse_from_rfc3339(text) {
        Ok(dt) => Ok(dt.with_timezone(&Utc)),
        Err(e) => NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S")
            .map(|naive| naive.and_utc())
            .map_err(|_| e),
    }
}

pub fn encode_json<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

// ---------------------------------------------------------------------------
// Bound parameter helpers
// ---------------------------------------------------------------------------

pub fn text(value: impl Into<String>) -> Value {
    Value::Text(value.into())
}

pub fn opt_text(value: Option<impl Into<String>>) -> Value {
    value.map_or(Value::Null, |v| Value::Text(v.into()))
}

pub fn datetime(dt: &DateTime<Utc>) -> Value {
    Value::Text(encode_datetime(dt))
}

pub fn opt_datetime(dt: Option<&DateTime<Utc>>) -> Value {
    dt.map_or(Value::Null, datetime)
}

pub fn opt_int(value: Option<i64>) -> Value {
    value.map_or(Value::Null, Value::Integer)
}

pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<Value> {
    Ok(Value::Text(encode_json(value)?))
}

pub fn metadata(value: &Metadata) -> Result<Value> {
    Ok(Value::Text(value.encode()?))
}

// ---------------------------------------------------------------------------
// Row decoding helpers (usable inside rusqlite row-mapping closures)
// ---------------------------------------------------------------------------

fn conversion_error<E>(row: &Row<'_>, column: &str, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    let index = row.as_ref().column_index(column).unwrap_or(0);
    rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(err))
}

pub fn datetime_column(row: &Row<'_>, column: &str) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(column)?;
    decode_datetime(&raw).map_err(|e| conversion_error(row, column, e))
}

pub fn opt_datetime_column(
    row: &Row<'_>,
    column: &str,
) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(column)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(text) => decode_datetime(text)
            .map(Some)
            .map_err(|e| conversion_error(row, column, e)),
    }
}

/// Decode a JSON column, substituting `T::default()` for NULL or empty text.
pub fn json_column<T>(row: &Row<'_>, column: &str) -> rusqlite::Result<T>
where
    T: DeserializeOwned + Default,
{
    let raw: Option<String> = row.get(column)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") | Some("null") => Ok(T::default()),
        Some(text) => serde_json::from_str(text).map_err(|e| conversion_error(row, column, e)),
    }
}

pub fn metadata_column(row: &Row<'_>, column: &str) -> rusqlite::Result<Metadata> {
    let raw: Option<String> = row.get(column)?;
    Metadata::decode(raw.as_deref().unwrap_or("")).map_err(|e| conversion_error(row, column, e))
}

/// Decode a text enum column, substituting `T::default()` for NULL.
pub fn enum_column<T>(row: &Row<'_>, column: &str) -> rusqlite::Result<T>
where
    T: FromStr + Default,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: Option<String> = row.get(column)?;
    match raw {
        None => Ok(T::default()),
        Some(text) => T::from_str(&text).map_err(|e| conversion_error(row, column, e)),
    }
}
