//! Integration coverage for the type/dtype system (C1): inference feeding
//! straight into enforcement the way the sync orchestrator chains them,
//! plus the datetime tz-regime stickiness rule from §4.1.

use std::collections::HashMap;

use chrono::{NaiveDate, TimeZone, Utc};
use serde_json::json;

use meerschaum_core::dtype::{enforce_dtypes, infer_dtypes, Dtype, TzRegime};
use meerschaum_core::row::{RawRow, Value};

fn row(pairs: &[(&str, serde_json::Value)]) -> RawRow {
    pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
}

#[test]
fn infer_then_enforce_round_trips_a_mixed_batch() {
    let batch = vec![
        row(&[
            ("device_id", json!(1)),
            ("ts", json!("2024-05-01T12:00:00Z")),
            ("reading", json!(98.6)),
            ("active", json!(true)),
        ]),
        row(&[
            ("device_id", json!(2)),
            ("ts", json!("2024-05-01T13:00:00Z")),
            ("reading", json!(101.2)),
            ("active", json!(false)),
        ]),
    ];

    let inferred = infer_dtypes(&batch);
    assert_eq!(inferred["device_id"], Dtype::Int);
    assert_eq!(inferred["reading"], Dtype::Float);
    assert_eq!(inferred["active"], Dtype::Bool);
    assert_eq!(inferred["ts"], Dtype::DateTime(TzRegime::Utc));

    let enforced = enforce_dtypes(&batch, &inferred).unwrap();
    assert_eq!(enforced.len(), 2);
    assert_eq!(enforced[0]["device_id"], Value::Int(1));
    assert_eq!(enforced[1]["active"], Value::Bool(false));
    match &enforced[0]["ts"] {
        Value::DateTimeUtc(dt) => assert_eq!(*dt, Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()),
        other => panic!("expected DateTimeUtc, got {other:?}"),
    }
}

#[test]
fn naive_datetime_column_stays_naive_once_declared() {
    let mut declared = HashMap::new();
    declared.insert("ts".to_string(), Dtype::DateTime(TzRegime::Naive));

    let batch = vec![row(&[("ts", json!("2024-05-01 00:00:00"))])];
    let enforced = enforce_dtypes(&batch, &declared).unwrap();
    match &enforced[0]["ts"] {
        Value::DateTimeNaive(dt) => assert_eq!(*dt, NaiveDate::from_ymd_opt(2024, 5, 1).unwrap().and_hms_opt(0, 0, 0).unwrap()),
        other => panic!("expected DateTimeNaive, got {other:?}"),
    }
}

#[test]
fn declared_dtype_rejects_unparsable_value_with_schema_error() {
    let mut declared = HashMap::new();
    declared.insert("device_id".to_string(), Dtype::Int);

    let batch = vec![row(&[("device_id", json!("not-a-number"))])];
    let err = enforce_dtypes(&batch, &declared).unwrap_err();
    assert_eq!(err.kind(), meerschaum_core::ErrorKind::Schema);
}

#[test]
fn unknown_column_passes_through_as_object() {
    let batch = vec![row(&[("extra", json!({"nested": true}))])];
    let enforced = enforce_dtypes(&batch, &HashMap::new()).unwrap();
    match &enforced[0]["extra"] {
        Value::Object(v) => assert_eq!(v, &json!({"nested": true})),
        other => panic!("expected Object, got {other:?}"),
    }
}

#[test]
fn null_cells_enforce_to_value_null_regardless_of_declared_dtype() {
    let mut declared = HashMap::new();
    declared.insert("reading".to_string(), Dtype::Float);
    let batch = vec![row(&[("reading", json!(null))])];
    let enforced = enforce_dtypes(&batch, &declared).unwrap();
    assert!(enforced[0]["reading"].is_null());
}
