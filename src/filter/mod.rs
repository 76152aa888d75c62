//! # Filter-Existing Engine (C6)
//!
//! Partitions an incoming, already-typed batch against what's already
//! stored, using the pipe's effective unique constraint `U` (§4.3, §4.5):
//!
//! - **unseen**: no existing row shares this row's `U` values.
//! - **update**: an existing row shares `U` but at least one other column
//!   differs.
//! - unchanged rows (same `U`, identical elsewhere) are dropped silently
//!   -- re-writing them would be a correct no-op, so skipping them is
//!   purely an efficiency choice, not a correctness one.
//!
//! `delta` is `unseen` followed by `update`, the rows worth writing at all.

use std::collections::HashMap;

use crate::row::{Batch, Row};

/// The `null_indices` policy named in §4.3: when `true`, a row whose `U`
/// columns contain any null is always treated as unseen (nulls never
/// match each other as a key), matching SQL's own `NULL <> NULL`
/// semantics. When `false`, null `U` values are compared for equality
/// like any other value, so two rows that are both null-in-`U` collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NullIndicesPolicy {
    NullsNeverMatch,
    NullsMatch,
}

#[derive(Debug, Clone, Default)]
pub struct Partition {
    pub unseen: Batch,
    pub update: Batch,
}

impl Partition {
    /// The rows actually worth writing: `unseen` then `update`, in that
    /// order (insert-shaped rows before update-shaped ones keeps a
    /// downstream upsert's insert/update counts meaningful for logging).
    pub fn delta(self) -> Batch {
        let mut out = self.unseen;
        out.extend(self.update);
        out
    }

    pub fn is_empty(&self) -> bool {
        self.unseen.is_empty() && self.update.is_empty()
    }
}

/// Partitions `incoming` against `existing` using `unique_columns` as `U`.
///
/// If `unique_columns` is empty there's no key to dedup on -- every row
/// is `unseen` (pure append), matching the "none" tier of the `U`
/// precedence order.
pub fn partition(
    incoming: Batch,
    existing: &Batch,
    unique_columns: &[String],
    policy: NullIndicesPolicy,
) -> Partition {
    if unique_columns.is_empty() {
        return Partition { unseen: incoming, update: Batch::new() };
    }

    let index = index_by_key(existing, unique_columns, policy);
    let mut out = Partition::default();
    for row in incoming {
        let Some(key) = key_of(&row, unique_columns, policy) else {
            out.unseen.push(row);
            continue;
        };
        match index.get(&key) {
            Some(existing_row) if rows_equal(existing_row, &row) => {
                // Unchanged: dropped.
            }
            Some(_) => out.update.push(row),
            None => out.unseen.push(row),
        }
    }
    out
}

/// A row's `U` values rendered into a hashable key, or `None` when the
/// `NullsNeverMatch` policy applies and any `U` column is null -- such
/// rows never look up a match and always land in `unseen`.
fn key_of(row: &Row, unique_columns: &[String], policy: NullIndicesPolicy) -> Option<Vec<String>> {
    let mut key = Vec::with_capacity(unique_columns.len());
    for column in unique_columns {
        let value = row.get(column);
        if policy == NullIndicesPolicy::NullsNeverMatch {
            if value.map(|v| v.is_null()).unwrap_or(true) {
                return None;
            }
        }
        key.push(render_key_component(value));
    }
    Some(key)
}

fn render_key_component(value: Option<&crate::row::Value>) -> String {
    match value {
        None => "\u{0}null".to_string(),
        Some(v) if v.is_null() => "\u{0}null".to_string(),
        Some(v) => format!("{v:?}"),
    }
}

fn index_by_key<'a>(
    existing: &'a Batch,
    unique_columns: &[String],
    policy: NullIndicesPolicy,
) -> HashMap<Vec<String>, &'a Row> {
    let mut map = HashMap::with_capacity(existing.len());
    for row in existing {
        if let Some(key) = key_of(row, unique_columns, policy) {
            map.insert(key, row);
        }
    }
    map
}

fn rows_equal(existing: &Row, incoming: &Row) -> bool {
    let columns: std::collections::HashSet<&String> =
        existing.keys().chain(incoming.keys()).collect();
    columns.into_iter().all(|col| match (existing.get(col), incoming.get(col)) {
        (Some(a), Some(b)) => a.sync_eq(b),
        (None, None) => true,
        _ => false,
    })
}
