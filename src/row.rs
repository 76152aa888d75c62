//! Row-oriented data model used throughout the sync engine.
//!
//! The teacher models blockchain state as strongly-typed Rust structs
//! (`ProtocolState`, `Account`, ...) because its schema is fixed at compile
//! time. A pipe's schema is not: columns, their names, and their dtypes
//! are only known once the first batch arrives (§4.1). So a batch is a row
//! set of loosely-typed `RawValue`s (as it would arrive from any source:
//! a CSV reader, a JSON API, a SQL driver's generic row), and
//! `enforce_dtypes` (§4.1) turns it into a row set of `Value`s, which is
//! the closed, storage-ready representation the rest of the core works
//! with.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDateTime, Utc};
use chrono_tz::Tz;
use rust_decimal::Decimal;
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// An unenforced cell as it arrives from a fetch connector or a caller-
/// supplied batch. `serde_json::Value` is a convenient closed sum type for
/// "whatever a source handed us" -- numbers, strings, bools, nulls, and
/// nested json for the columns that are going to end up as `Dtype::Json`.
pub type RawValue = JsonValue;

/// An unenforced row: column name -> raw cell.
pub type RawRow = HashMap<String, RawValue>;

/// A batch of unenforced rows, in source emission order (§5, "Ordering").
pub type RawBatch = Vec<RawRow>;

/// A single cell after `enforce_dtypes` (§4.1) has coerced it to one of the
/// closed logical dtypes.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
    Bytes(Vec<u8>),
    Uuid(Uuid),
    Numeric(Decimal),
    Json(JsonValue),
    DateTimeNaive(NaiveDateTime),
    DateTimeUtc(DateTime<Utc>),
    DateTimeZoned(DateTime<Tz>),
    /// Catch-all for values that don't fit a closed dtype (`object`).
    Object(JsonValue),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Equality used by the filter engine (§4.5 step 4), where null and
    /// the backend's null sentinel compare equal, and numeric comparisons
    /// respect the declared scale (delegated to `Decimal`'s own `PartialEq`,
    /// which normalizes scale).
    pub fn sync_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Numeric(a), Value::Numeric(b)) => a == b,
            (Value::DateTimeNaive(a), Value::DateTimeNaive(b)) => a == b,
            (Value::DateTimeUtc(a), Value::DateTimeUtc(b)) => a == b,
            (Value::DateTimeZoned(a), Value::DateTimeZoned(b)) => a == b,
            _ => self == other,
        }
    }
}

/// A row of enforced values: column name -> typed cell.
pub type Row = HashMap<String, Value>;

/// A batch of enforced rows.
pub type Batch = Vec<Row>;
