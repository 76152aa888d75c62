//! `infer_dtypes` (§4.1): per-column dtype inference over a raw batch,
//! applied in the order the spec lists the rules.

use std::collections::{HashMap, HashSet};

use serde_json::Value as JsonValue;

use super::{Dtype, DtypeMap, TzRegime};
use crate::row::RawBatch;

/// Infers a dtype per column by examining every non-null value present in
/// `batch`. Columns that are null in every row are omitted -- there is
/// nothing to infer from, and the column stays unresolved until a non-null
/// value arrives in a later batch.
pub fn infer_dtypes(batch: &RawBatch) -> DtypeMap {
    let mut columns: Vec<&str> = Vec::new();
    let mut seen = HashSet::new();
    for row in batch {
        for column in row.keys() {
            if seen.insert(column.as_str()) {
                columns.push(column.as_str());
            }
        }
    }

    let mut out: DtypeMap = HashMap::new();
    for column in columns {
        let values: Vec<&JsonValue> = batch
            .iter()
            .filter_map(|row| row.get(column))
            .filter(|v| !v.is_null())
            .collect();
        if values.is_empty() {
            continue;
        }
        out.insert(column.to_string(), infer_column(&values));
    }
    out
}

fn infer_column(values: &[&JsonValue]) -> Dtype {
    if values.iter().all(|v| looks_like_datetime(v)) {
        let any_aware = values.iter().any(|v| datetime_is_aware(v));
        return Dtype::DateTime(if any_aware { TzRegime::Utc } else { TzRegime::Naive });
    }
    if values.iter().all(|v| looks_like_decimal_string(v)) {
        return Dtype::Numeric { precision: None, scale: None };
    }
    let all_numbers = values.iter().all(|v| v.is_number());
    if all_numbers {
        let any_int = values.iter().any(|v| matches!(v, JsonValue::Number(n) if n.is_i64() || n.is_u64()));
        let any_non_integer_float = values.iter().any(|v| {
            matches!(v, JsonValue::Number(n) if n.is_f64() && n.as_f64().map(|f| f.fract() != 0.0).unwrap_or(false))
        });
        if any_int && any_non_integer_float {
            return Dtype::Numeric { precision: None, scale: None };
        }
        let all_int = values
            .iter()
            .all(|v| matches!(v, JsonValue::Number(n) if n.is_i64() || n.is_u64()));
        return if all_int { Dtype::Int } else { Dtype::Float };
    }
    if values.iter().any(|v| v.is_object() || v.is_array()) {
        return Dtype::Json;
    }
    if values.iter().all(|v| looks_like_uuid(v)) {
        return Dtype::Uuid;
    }
    if values.iter().all(|v| v.is_boolean()) {
        return Dtype::Bool;
    }
    if values.iter().all(|v| v.is_string()) {
        return Dtype::Str;
    }
    Dtype::Object
}

fn looks_like_datetime(v: &JsonValue) -> bool {
    match v {
        JsonValue::String(s) => {
            chrono::DateTime::parse_from_rfc3339(s).is_ok()
                || chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").is_ok()
                || chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok()
        }
        _ => false,
    }
}

fn datetime_is_aware(v: &JsonValue) -> bool {
    matches!(v, JsonValue::String(s) if chrono::DateTime::parse_from_rfc3339(s).is_ok())
}

fn looks_like_decimal_string(v: &JsonValue) -> bool {
    matches!(v, JsonValue::String(s) if s.parse::<rust_decimal::Decimal>().is_ok() && s.parse::<i64>().is_err())
}

fn looks_like_uuid(v: &JsonValue) -> bool {
    matches!(v, JsonValue::String(s) if s.len() == 36 && uuid::Uuid::parse_str(s).is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(pairs: &[(&str, JsonValue)]) -> crate::row::RawRow {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn infers_json_from_mixed_containers() {
        let batch = vec![
            row(&[("id", json!(1)), ("a", json!(["x"]))]),
            row(&[("id", json!(2)), ("a", json!({"b": 1}))]),
        ];
        let dtypes = infer_dtypes(&batch);
        assert_eq!(dtypes["a"], Dtype::Json);
        assert_eq!(dtypes["id"], Dtype::Int);
    }

    #[test]
    fn mixed_int_float_promotes_to_numeric() {
        let batch = vec![row(&[("v", json!(1))]), row(&[("v", json!(2.5))])];
        let dtypes = infer_dtypes(&batch);
        assert_eq!(dtypes["v"], Dtype::Numeric { precision: None, scale: None });
    }

    #[test]
    fn all_int_stays_int() {
        let batch = vec![row(&[("v", json!(1))]), row(&[("v", json!(2))])];
        let dtypes = infer_dtypes(&batch);
        assert_eq!(dtypes["v"], Dtype::Int);
    }
}
