//! `enforce_dtypes` (§4.1): coerce a raw batch into the pipe's declared
//! dtypes, or fail with a `schema`-tagged error naming the offending
//! column and row.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use super::tz::normalise_to_regime;
use super::{Dtype, DtypeMap, TzRegime};
use crate::error::McError;
use crate::row::{Batch, RawBatch, RawRow, Row, Value};

/// Coerces every row in `batch` to the dtypes declared in `declared`.
/// Columns absent from `declared` pass through as `Dtype::Object`
/// (best-effort json/primitive mapping), matching the "partial;
/// unspecified columns are inferred" note in spec.md §3 -- callers are
/// expected to have already run `infer_dtypes` on new columns and merged
/// the result into `declared` before calling this.
pub fn enforce_dtypes(batch: &RawBatch, declared: &DtypeMap) -> Result<Batch, McError> {
    let mut out = Vec::with_capacity(batch.len());
    for (row_idx, raw_row) in batch.iter().enumerate() {
        out.push(enforce_row(raw_row, declared, row_idx)?);
    }
    Ok(out)
}

fn enforce_row(raw_row: &RawRow, declared: &DtypeMap, row_idx: usize) -> Result<Row, McError> {
    let mut row: Row = HashMap::with_capacity(raw_row.len());
    for (column, raw_value) in raw_row {
        let dtype = declared.get(column).cloned().unwrap_or(Dtype::Object);
        let value = coerce_value(raw_value, &dtype, column, row_idx)?;
        row.insert(column.clone(), value);
    }
    Ok(row)
}

fn coerce_value(
    raw: &JsonValue,
    dtype: &Dtype,
    column: &str,
    row_idx: usize,
) -> Result<Value, McError> {
    if raw.is_null() {
        return Ok(Value::Null);
    }
    let fail = |msg: String| McError::schema(column, row_idx, msg);
    match dtype {
        Dtype::Int => coerce_int(raw).ok_or_else(|| fail(format!("'{raw}' is not an int"))),
        Dtype::Float => coerce_float(raw).ok_or_else(|| fail(format!("'{raw}' is not a float"))),
        Dtype::Bool => {
            coerce_bool(raw).ok_or_else(|| fail(format!("'{raw}' is not an accepted bool literal")))
        }
        Dtype::Str => Ok(Value::Str(raw_to_string(raw))),
        Dtype::Bytes => {
            coerce_bytes(raw).ok_or_else(|| fail(format!("'{raw}' is not base64 or byte data")))
        }
        Dtype::Uuid => coerce_uuid(raw).ok_or_else(|| fail(format!("'{raw}' is not a uuid"))),
        Dtype::Numeric { .. } => {
            coerce_numeric(raw).ok_or_else(|| fail(format!("'{raw}' is not numeric")))
        }
        Dtype::Json => Ok(Value::Json(raw.clone())),
        Dtype::DateTime(regime) => {
            let parsed = coerce_datetime(raw)
                .ok_or_else(|| fail(format!("'{raw}' is not a recognised datetime")))?;
            Ok(normalise_to_regime(&parsed, regime))
        }
        Dtype::Object => Ok(Value::Object(raw.clone())),
    }
}

fn coerce_int(raw: &JsonValue) -> Option<Value> {
    match raw {
        JsonValue::Number(n) => n.as_i64().map(Value::Int),
        JsonValue::String(s) => s.trim().parse::<i64>().ok().map(Value::Int),
        JsonValue::Bool(b) => Some(Value::Int(if *b { 1 } else { 0 })),
        _ => None,
    }
}

fn coerce_float(raw: &JsonValue) -> Option<Value> {
    match raw {
        JsonValue::Number(n) => n.as_f64().map(Value::Float),
        JsonValue::String(s) => s.trim().parse::<f64>().ok().map(Value::Float),
        _ => None,
    }
}

/// Accepts the conservative literal set from spec.md §4.1:
/// `true/false/1/0/'true'/'false'/'True'/'False'` and `None`.
/// Anything else (including `"yes"`/`"no"`) is rejected -- widening this
/// set is an explicit Open Question (§9) the spec says not to guess on.
fn coerce_bool(raw: &JsonValue) -> Option<Value> {
    match raw {
        JsonValue::Bool(b) => Some(Value::Bool(*b)),
        JsonValue::Number(n) => match n.as_i64() {
            Some(0) => Some(Value::Bool(false)),
            Some(1) => Some(Value::Bool(true)),
            _ => None,
        },
        JsonValue::String(s) => match s.as_str() {
            "true" | "True" => Some(Value::Bool(true)),
            "false" | "False" => Some(Value::Bool(false)),
            "1" => Some(Value::Bool(true)),
            "0" => Some(Value::Bool(false)),
            _ => None,
        },
        _ => None,
    }
}

fn coerce_bytes(raw: &JsonValue) -> Option<Value> {
    use base64::Engine;
    match raw {
        JsonValue::String(s) => base64::engine::general_purpose::STANDARD
            .decode(s)
            .ok()
            .map(Value::Bytes),
        JsonValue::Array(items) => {
            let mut bytes = Vec::with_capacity(items.len());
            for item in items {
                bytes.push(item.as_u64()?.try_into().ok()?);
            }
            Some(Value::Bytes(bytes))
        }
        _ => None,
    }
}

fn coerce_uuid(raw: &JsonValue) -> Option<Value> {
    match raw {
        JsonValue::String(s) if s.len() == 36 => Uuid::parse_str(s).ok().map(Value::Uuid),
        _ => None,
    }
}

fn coerce_numeric(raw: &JsonValue) -> Option<Value> {
    match raw {
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(Value::Numeric(Decimal::from(i)))
            } else {
                n.as_f64()
                    .and_then(|f| Decimal::try_from(f).ok())
                    .map(Value::Numeric)
            }
        }
        JsonValue::String(s) => s.trim().parse::<Decimal>().ok().map(Value::Numeric),
        _ => None,
    }
}

fn coerce_datetime(raw: &JsonValue) -> Option<Value> {
    match raw {
        JsonValue::String(s) => parse_datetime_str(s),
        JsonValue::Number(n) => n
            .as_i64()
            .and_then(|epoch| DateTime::<Utc>::from_timestamp(epoch, 0))
            .map(Value::DateTimeUtc),
        _ => None,
    }
}

/// Parses an RFC3339/ISO-8601-ish string, distinguishing tz-aware from
/// tz-naive inputs the way §4.1 requires (`'2024-01-01'` is naive;
/// `'2024-01-01T00:00:00Z'` or with an explicit offset is aware).
fn parse_datetime_str(s: &str) -> Option<Value> {
    if let Ok(aware) = DateTime::parse_from_rfc3339(s) {
        return Some(Value::DateTimeUtc(aware.with_timezone(&Utc)));
    }
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(Value::DateTimeNaive(naive));
        }
    }
    if let Ok(date) = chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(Value::DateTimeNaive);
    }
    None
}

fn raw_to_string(raw: &JsonValue) -> String {
    match raw {
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Used by the tz-regime-stickiness check (§4.1 invariant 6 / §8.6): once
/// a column's regime is persisted, `enforce_dtypes` must keep converting
/// into it rather than letting a differently-shaped input silently widen
/// the declared dtype. Re-exported so the sync orchestrator can assert the
/// regime hasn't drifted after enforcement.
pub fn regime_of(dtype: &Dtype) -> Option<&TzRegime> {
    match dtype {
        Dtype::DateTime(regime) => Some(regime),
        _ => None,
    }
}
