//! Conversions between SQLite column values and domain values.

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use rusqlite::types::{Type, ValueRef};
use uuid::Uuid;

/// Current time truncated to the stored precision.
pub(crate) fn now() -> DateTime<Utc> {
  Utc::now().trunc_subsecs(6)
}

/// Fixed-width RFC 3339 with microseconds, so text order equals time order.
pub(crate) fn format_timestamp(ts: &DateTime<Utc>) -> String {
  ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn timestamp_at(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
  let raw: String = row.get(idx)?;
  DateTime::parse_from_rfc3339(&raw)
    .map(|d| d.with_timezone(&Utc))
    .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub(crate) fn uuid_at(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
  let raw: String = row.get(idx)?;
  raw
    .parse()
    .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub(crate) fn json_at(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<serde_json::Value> {
  let raw: String = row.get(idx)?;
  serde_json::from_str(&raw)
    .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub(crate) fn parse_enum_at<T>(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<T>
where
  T: std::str::FromStr<Err = String>,
{
  let raw: String = row.get(idx)?;
  raw
    .parse()
    .map_err(|e: String| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.into()))
}

/// Generic column value as JSON, for ad-hoc queries through the registry.
pub(crate) fn value_ref_to_json(value: ValueRef<'_>) -> serde_json::Value {
  match value {
    ValueRef::Null => serde_json::Value::Null,
    ValueRef::Integer(i) => serde_json::Value::from(i),
    ValueRef::Real(f) => serde_json::Number::from_f64(f)
      .map(serde_json::Value::Number)
      .unwrap_or(serde_json::Value::Null),
    ValueRef::Text(t) => serde_json::Value::String(String::from_utf8_lossy(t).into_owned()),
    ValueRef::Blob(b) => serde_json::Value::String(hex::encode(b)),
  }
}
