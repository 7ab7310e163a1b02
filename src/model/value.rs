//! Moving values between the wire, the query builder and JSON output.
//!
//! Filter tokens and payload values are coerced to the column's
//! [`FieldKind`] before they reach SQL; a value that does not fit yields
//! `None` so callers can classify it as invalid instead of failing the
//! statement at the database.

use super::{Field, FieldKind};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::{Decimal, prelude::ToPrimitive};
use sea_orm::{DbErr, QueryResult, TryGetable, Value};
use serde_json::{Value as JsonValue, json};
use std::str::FromStr;
use uuid::Uuid;

/// Typed NULL for a column kind
pub(crate) fn null_of(kind: FieldKind) -> Value {
    match kind {
        FieldKind::Integer => Value::BigInt(None),
        FieldKind::Float => Value::Double(None),
        FieldKind::Decimal => Value::Decimal(None),
        FieldKind::Boolean => Value::Bool(None),
        FieldKind::String => Value::String(None),
        FieldKind::Date => Value::ChronoDate(None),
        FieldKind::Time => Value::ChronoTime(None),
        FieldKind::DateTime => Value::ChronoDateTime(None),
        FieldKind::DateTimeTz => Value::ChronoDateTimeUtc(None),
        FieldKind::Uuid => Value::Uuid(None),
        FieldKind::Json => Value::Json(None),
        FieldKind::Binary => Value::Bytes(None),
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "true" | "t" | "1" | "yes" => Some(true),
        "false" | "f" | "0" | "no" => Some(false),
        _ => None,
    }
}

fn parse_naive_datetime(raw: &str) -> Option<NaiveDateTime> {
    const FORMATS: [&str; 4] = [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M",
    ];
    FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .or_else(|| DateTime::parse_from_rfc3339(raw).ok().map(|dt| dt.naive_utc()))
        .or_else(|| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

/// Coerce a raw query-string token to a bindable value
pub(crate) fn coerce_str(kind: FieldKind, raw: &str) -> Option<Value> {
    match kind {
        FieldKind::Integer => raw.parse::<i64>().ok().map(Value::from),
        FieldKind::Float => raw.parse::<f64>().ok().map(Value::from),
        FieldKind::Decimal => Decimal::from_str(raw)
            .or_else(|_| Decimal::from_scientific(raw))
            .ok()
            .map(Value::from),
        FieldKind::Boolean => parse_bool(raw).map(Value::from),
        FieldKind::String => Some(Value::from(raw.to_string())),
        FieldKind::Date => NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .ok()
            .map(Value::from),
        FieldKind::Time => NaiveTime::parse_from_str(raw, "%H:%M:%S%.f")
            .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M"))
            .ok()
            .map(Value::from),
        FieldKind::DateTime => parse_naive_datetime(raw).map(Value::from),
        FieldKind::DateTimeTz => DateTime::parse_from_rfc3339(raw)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
            .or_else(|| parse_naive_datetime(raw).map(|dt| dt.and_utc()))
            .map(Value::from),
        FieldKind::Uuid => Uuid::parse_str(raw).ok().map(Value::from),
        FieldKind::Json => Some(Value::from(
            serde_json::from_str::<JsonValue>(raw).unwrap_or_else(|_| json!(raw)),
        )),
        FieldKind::Binary => hex::decode(raw).ok().map(Value::from),
    }
}

/// Coerce a JSON payload value to a bindable value; `null` maps to a typed NULL
pub(crate) fn coerce_json(kind: FieldKind, value: &JsonValue) -> Option<Value> {
    match (kind, value) {
        (_, JsonValue::Null) => Some(null_of(kind)),
        (FieldKind::Json, other) => Some(Value::from(other.clone())),
        (FieldKind::Boolean, JsonValue::Bool(b)) => Some(Value::from(*b)),
        (FieldKind::Integer, JsonValue::Number(n)) => n.as_i64().map(Value::from),
        (FieldKind::Float, JsonValue::Number(n)) => n.as_f64().map(Value::from),
        (FieldKind::Decimal, JsonValue::Number(n)) => Decimal::from_str(&n.to_string())
            .or_else(|_| Decimal::from_scientific(&n.to_string()))
            .ok()
            .map(Value::from),
        (FieldKind::Boolean, JsonValue::Number(n)) => match n.as_i64() {
            Some(0) => Some(Value::from(false)),
            Some(1) => Some(Value::from(true)),
            _ => None,
        },
        (FieldKind::String, JsonValue::Number(n)) => Some(Value::from(n.to_string())),
        (FieldKind::String, JsonValue::Bool(b)) => Some(Value::from(b.to_string())),
        (kind, JsonValue::String(s)) => coerce_str(kind, s),
        _ => None,
    }
}

fn try_get<T: TryGetable>(row: &QueryResult, column: &str) -> Option<Option<T>> {
    row.try_get::<Option<T>>("", column).ok()
}

/// Read one column of a result row according to its declared kind.
///
/// Drivers disagree on how loosely typed columns come back (SQLite stores
/// timestamps as text, decimals as reals), so each kind falls back to text
/// and then to plain numbers before giving up.
pub(crate) fn decode(row: &QueryResult, field: &Field) -> Result<Value, DbErr> {
    let column = field.name.as_str();
    let typed = match field.kind {
        FieldKind::Integer => try_get::<i64>(row, column).map(Value::from),
        FieldKind::Float => try_get::<f64>(row, column).map(Value::from),
        FieldKind::Decimal => try_get::<Decimal>(row, column)
            .map(Value::from)
            .or_else(|| try_get::<f64>(row, column).map(Value::from)),
        FieldKind::Boolean => try_get::<bool>(row, column).map(Value::from),
        FieldKind::String => try_get::<String>(row, column).map(Value::from),
        FieldKind::Date => try_get::<NaiveDate>(row, column).map(Value::from),
        FieldKind::Time => try_get::<NaiveTime>(row, column).map(Value::from),
        FieldKind::DateTime => try_get::<NaiveDateTime>(row, column).map(Value::from),
        FieldKind::DateTimeTz => try_get::<DateTime<Utc>>(row, column)
            .map(Value::from)
            .or_else(|| try_get::<NaiveDateTime>(row, column).map(Value::from)),
        FieldKind::Uuid => try_get::<Uuid>(row, column).map(Value::from),
        FieldKind::Json => try_get::<JsonValue>(row, column).map(Value::from),
        FieldKind::Binary => try_get::<Vec<u8>>(row, column).map(Value::from),
    };

    typed
        .or_else(|| try_get::<String>(row, column).map(Value::from))
        .or_else(|| try_get::<i64>(row, column).map(Value::from))
        .or_else(|| try_get::<f64>(row, column).map(Value::from))
        .ok_or_else(|| DbErr::Type(format!("cannot decode column '{column}' as {}", field.kind)))
}

/// Render a stored value as JSON.
///
/// Decimals become floats, naive timestamps ISO-8601 without offset,
/// timezone-aware ones RFC 3339, binary data hex.
#[must_use]
pub fn to_json(value: &Value) -> JsonValue {
    match value {
        Value::Bool(Some(b)) => json!(b),
        Value::TinyInt(Some(n)) => json!(n),
        Value::SmallInt(Some(n)) => json!(n),
        Value::Int(Some(n)) => json!(n),
        Value::BigInt(Some(n)) => json!(n),
        Value::TinyUnsigned(Some(n)) => json!(n),
        Value::SmallUnsigned(Some(n)) => json!(n),
        Value::Unsigned(Some(n)) => json!(n),
        Value::BigUnsigned(Some(n)) => json!(n),
        Value::Float(Some(f)) => json!(f),
        Value::Double(Some(f)) => json!(f),
        Value::String(Some(s)) => JsonValue::String(s.to_string()),
        Value::Char(Some(c)) => JsonValue::String(c.to_string()),
        Value::Bytes(Some(bytes)) => JsonValue::String(hex::encode(bytes.as_slice())),
        Value::Json(Some(j)) => JsonValue::clone(j),
        Value::ChronoDate(Some(d)) => JsonValue::String(d.format("%Y-%m-%d").to_string()),
        Value::ChronoTime(Some(t)) => JsonValue::String(t.format("%H:%M:%S%.f").to_string()),
        Value::ChronoDateTime(Some(dt)) => {
            JsonValue::String(dt.format("%Y-%m-%dT%H:%M:%S%.f").to_string())
        }
        Value::ChronoDateTimeUtc(Some(dt)) => JsonValue::String(dt.to_rfc3339()),
        Value::ChronoDateTimeLocal(Some(dt)) => JsonValue::String(dt.to_rfc3339()),
        Value::ChronoDateTimeWithTimeZone(Some(dt)) => JsonValue::String(dt.to_rfc3339()),
        Value::Uuid(Some(u)) => JsonValue::String(u.to_string()),
        Value::Decimal(Some(d)) => d.to_f64().map_or(JsonValue::Null, |f| json!(f)),
        _ => JsonValue::Null,
    }
}

pub(crate) fn is_null(value: &Value) -> bool {
    to_json(value).is_null()
}

/// Plain-text form of a key value, used to build resource URIs
pub(crate) fn to_key_string(value: &Value) -> Option<String> {
    match to_json(value) {
        JsonValue::Null => None,
        JsonValue::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}
