//! PostgreSQL cells to JSON values.
//!
//! Every decode failure is logged and yields null; a value is never dropped silently.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use conduit_query::{FieldDef, FieldType, Row};
use serde_json::Value;
use sqlx::postgres::types::{Oid, PgInterval, PgMoney, PgTimeTz};
use sqlx::postgres::{PgRow, Postgres};
use sqlx::types::ipnetwork::IpNetwork;
use sqlx::types::Decimal;
use sqlx::{Column, Decode, Row as _, Type, TypeInfo};
use std::fmt::Write as _;
use tracing::warn;

/// Scale of the `money` type under the default lc_monetary
const MONEY_SCALE: u32 = 2;

/// Map PostgreSQL type name to FieldType
pub(crate) fn map_pg_type(pg_type: &str) -> FieldType {
    match pg_type {
        "BOOL" => FieldType::Boolean,
        "INT2" | "INT4" => FieldType::Int32,
        "INT8" | "OID" => FieldType::Int64,
        "FLOAT4" => FieldType::Float32,
        "FLOAT8" => FieldType::Float64,
        "NUMERIC" | "MONEY" => FieldType::Decimal,
        "VARCHAR" | "TEXT" | "CHAR" | "BPCHAR" | "NAME" | "\"CHAR\"" => FieldType::String,
        "BYTEA" => FieldType::Bytes,
        "DATE" => FieldType::Date,
        "TIME" | "TIMETZ" => FieldType::Time,
        "TIMESTAMP" | "TIMESTAMPTZ" => FieldType::Timestamp,
        "JSON" | "JSONB" => FieldType::Json,
        "UUID" => FieldType::Uuid,
        array if array.ends_with("[]") => FieldType::Json,
        _ => FieldType::String,
    }
}

pub(crate) fn schema_of(row: &PgRow) -> Vec<FieldDef> {
    row.columns()
        .iter()
        .map(|col| FieldDef::new(col.name(), map_pg_type(col.type_info().name())))
        .collect()
}

pub(crate) fn extract_row(row: &PgRow) -> Row {
    (0..row.columns().len())
        .map(|idx| extract_value(row, idx))
        .collect()
}

/// Decode one nullable cell, logging (not swallowing) type mismatches
fn cell<'r, T>(row: &'r PgRow, idx: usize) -> Option<T>
where
    T: Decode<'r, Postgres> + Type<Postgres>,
{
    match row.try_get::<Option<T>, _>(idx) {
        Ok(value) => value,
        Err(e) => {
            report(row, idx, &e);
            None
        }
    }
}

fn report(row: &PgRow, idx: usize, e: &sqlx::Error) {
    let column = &row.columns()[idx];
    warn!(
        "Could not decode column '{}' of type {}; returning null: {}",
        column.name(),
        column.type_info().name(),
        e
    );
}

fn float(v: f64) -> Option<Value> {
    serde_json::Number::from_f64(v).map(Value::Number)
}

fn text<T: ToString>(v: T) -> Option<Value> {
    Some(Value::String(v.to_string()))
}

fn array<T, F>(items: Vec<Option<T>>, convert: F) -> Option<Value>
where
    F: Fn(T) -> Option<Value>,
{
    Some(Value::Array(
        items
            .into_iter()
            .map(|item| item.and_then(&convert).unwrap_or(Value::Null))
            .collect(),
    ))
}

/// Exact decimals travel as text so no digit is lost
pub(crate) fn decimal_value(d: Decimal) -> Value {
    Value::String(d.to_string())
}

pub(crate) fn bytes_value(bytes: &[u8]) -> Value {
    Value::String(BASE64.encode(bytes))
}

/// ISO 8601 duration, e.g. `P1Y2M3DT4H5M6.5S`
pub(crate) fn format_interval(interval: &PgInterval) -> String {
    let mut out = String::from("P");
    let years = interval.months / 12;
    let months = interval.months % 12;
    if years != 0 {
        let _ = write!(out, "{}Y", years);
    }
    if months != 0 {
        let _ = write!(out, "{}M", months);
    }
    if interval.days != 0 {
        let _ = write!(out, "{}D", interval.days);
    }

    let micros = interval.microseconds;
    if micros != 0 {
        let sign = if micros < 0 { "-" } else { "" };
        let abs = micros.unsigned_abs();
        let hours = abs / 3_600_000_000;
        let minutes = (abs / 60_000_000) % 60;
        let seconds = (abs / 1_000_000) % 60;
        let fraction = abs % 1_000_000;

        out.push('T');
        if hours != 0 {
            let _ = write!(out, "{}{}H", sign, hours);
        }
        if minutes != 0 {
            let _ = write!(out, "{}{}M", sign, minutes);
        }
        if fraction != 0 {
            let digits = format!("{:06}", fraction);
            let _ = write!(out, "{}{}.{}S", sign, seconds, digits.trim_end_matches('0'));
        } else if seconds != 0 {
            let _ = write!(out, "{}{}S", sign, seconds);
        }
    }

    if out == "P" {
        out.push_str("T0S");
    }
    out
}

/// Extract one cell as JSON; NULL cells and undecodable cells become null
pub(crate) fn extract_value(row: &PgRow, idx: usize) -> Value {
    let type_name = row.columns()[idx].type_info().name();

    let value = match type_name {
        "BOOL" => cell::<bool>(row, idx).map(Value::Bool),
        "INT2" => cell::<i16>(row, idx).map(Value::from),
        "INT4" => cell::<i32>(row, idx).map(Value::from),
        "INT8" => cell::<i64>(row, idx).map(Value::from),
        "OID" => cell::<Oid>(row, idx).map(|oid| Value::from(oid.0)),
        "FLOAT4" => cell::<f32>(row, idx).and_then(|v| float(v as f64)),
        "FLOAT8" => cell::<f64>(row, idx).and_then(float),
        "NUMERIC" => cell::<Decimal>(row, idx).map(decimal_value),
        "MONEY" => {
            cell::<PgMoney>(row, idx).map(|m| decimal_value(Decimal::new(m.0, MONEY_SCALE)))
        }
        "\"CHAR\"" => cell::<i8>(row, idx).and_then(|v| text(char::from(v as u8))),
        "BYTEA" => cell::<Vec<u8>>(row, idx).map(|v| bytes_value(&v)),
        "DATE" => cell::<chrono::NaiveDate>(row, idx).and_then(text),
        "TIME" => cell::<chrono::NaiveTime>(row, idx).and_then(text),
        "TIMETZ" => cell::<PgTimeTz<chrono::NaiveTime, chrono::FixedOffset>>(row, idx)
            .and_then(|v| text(format!("{}{}", v.time, v.offset))),
        "TIMESTAMP" => cell::<chrono::NaiveDateTime>(row, idx).and_then(text),
        "TIMESTAMPTZ" => {
            cell::<chrono::DateTime<chrono::Utc>>(row, idx).and_then(|v| text(v.to_rfc3339()))
        }
        "INTERVAL" => cell::<PgInterval>(row, idx).and_then(|v| text(format_interval(&v))),
        "INET" | "CIDR" => cell::<IpNetwork>(row, idx).and_then(text),
        "JSON" | "JSONB" => cell::<Value>(row, idx),
        "UUID" => cell::<uuid::Uuid>(row, idx).and_then(text),
        "TEXT[]" | "VARCHAR[]" | "BPCHAR[]" | "NAME[]" => {
            cell::<Vec<Option<String>>>(row, idx).and_then(|v| array(v, |s| Some(Value::String(s))))
        }
        "INT2[]" => cell::<Vec<Option<i16>>>(row, idx).and_then(|v| array(v, |n| Some(n.into()))),
        "INT4[]" => cell::<Vec<Option<i32>>>(row, idx).and_then(|v| array(v, |n| Some(n.into()))),
        "INT8[]" => cell::<Vec<Option<i64>>>(row, idx).and_then(|v| array(v, |n| Some(n.into()))),
        "FLOAT8[]" => cell::<Vec<Option<f64>>>(row, idx).and_then(|v| array(v, float)),
        "BOOL[]" => cell::<Vec<Option<bool>>>(row, idx).and_then(|v| array(v, |b| Some(b.into()))),
        "NUMERIC[]" => {
            cell::<Vec<Option<Decimal>>>(row, idx).and_then(|v| array(v, |d| Some(decimal_value(d))))
        }
        "UUID[]" => cell::<Vec<Option<uuid::Uuid>>>(row, idx).and_then(|v| array(v, text)),
        "VARCHAR" | "TEXT" | "CHAR" | "BPCHAR" | "NAME" => cell::<String>(row, idx).map(Value::String),
        // Enums, domains and extension types whose wire form is their text
        _ => match row.try_get_unchecked::<Option<String>, _>(idx) {
            Ok(value) => value.map(Value::String),
            Err(e) => {
                report(row, idx, &e);
                None
            }
        },
    };

    value.unwrap_or(Value::Null)
}
