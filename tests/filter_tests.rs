//! Integration coverage for the filter-existing engine (C6) working over
//! a batch shaped the way `enforce_dtypes` actually produces it, rather
//! than hand-built `Row`s -- exercises the seam between C1 and C6.

use serde_json::json;

use meerschaum_core::dtype::enforce_dtypes;
use meerschaum_core::filter::{partition, NullIndicesPolicy};
use meerschaum_core::row::RawRow;

fn row(pairs: &[(&str, serde_json::Value)]) -> RawRow {
    pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
}

#[test]
fn partitions_a_batch_of_device_readings_into_unseen_and_update() {
    let declared = [("device_id", "int"), ("reading", "float")]
        .iter()
        .map(|(k, v)| (k.to_string(), v.parse().unwrap()))
        .collect();

    let existing = enforce_dtypes(
        &vec![
            row(&[("device_id", json!(1)), ("reading", json!(20.0))]),
            row(&[("device_id", json!(2)), ("reading", json!(21.0))]),
        ],
        &declared,
    )
    .unwrap();

    let incoming = enforce_dtypes(
        &vec![
            row(&[("device_id", json!(1)), ("reading", json!(20.0))]), // unchanged, dropped
            row(&[("device_id", json!(2)), ("reading", json!(99.0))]), // changed, update
            row(&[("device_id", json!(3)), ("reading", json!(5.0))]),  // new, unseen
        ],
        &declared,
    )
    .unwrap();

    let result = partition(
        incoming,
        &existing,
        &["device_id".to_string()],
        NullIndicesPolicy::NullsNeverMatch,
    );

    assert_eq!(result.unseen.len(), 1);
    assert_eq!(result.update.len(), 1);
    let delta = result.delta();
    assert_eq!(delta.len(), 2);
}

#[test]
fn nulls_match_policy_collapses_two_rows_sharing_a_null_key() {
    let declared = [("id", "int")].iter().map(|(k, v)| (k.to_string(), v.parse().unwrap())).collect();
    let existing = enforce_dtypes(&vec![row(&[("id", json!(null))])], &declared).unwrap();
    let incoming = enforce_dtypes(&vec![row(&[("id", json!(null))])], &declared).unwrap();

    let never_match = partition(
        incoming.clone(),
        &existing,
        &["id".to_string()],
        NullIndicesPolicy::NullsNeverMatch,
    );
    assert_eq!(never_match.unseen.len(), 1);

    let matches = partition(incoming, &existing, &["id".to_string()], NullIndicesPolicy::NullsMatch);
    // Same null key, no other columns differ: dropped as unchanged.
    assert!(matches.is_empty());
}
