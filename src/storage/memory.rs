//! An in-memory `InstanceStorage`, used by tests and any `sql:` connector
//! whose attributes request the `memory` flavor (useful for dry runs with
//! no real database). Mirrors the surface of `postgres::PostgresInstance`
//! without needing a live connection.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use tokio::sync::RwLock;
use tracing::instrument;

use super::{InstanceStorage, TimeBounds};
use crate::error::McError;
use crate::pipe::{Pipe, PipeKey};
use crate::row::{Batch, Row, Value};
use crate::success::SuccessTuple;

#[derive(Default)]
struct State {
    metadata: HashMap<PipeKey, JsonValue>,
    tables: HashMap<PipeKey, Batch>,
}

#[derive(Default)]
pub struct MemoryInstance {
    state: RwLock<State>,
}

impl MemoryInstance {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl InstanceStorage for MemoryInstance {
    #[instrument(skip(self, pipe))]
    async fn register_pipe(&self, pipe: &Pipe) -> Result<SuccessTuple, McError> {
        let mut state = self.state.write().await;
        if state.metadata.contains_key(&pipe.key) {
            return Ok(SuccessTuple::fail(format!("pipe '{}' already exists", pipe.key)));
        }
        state.metadata.insert(pipe.key.clone(), pipe.parameters.clone());
        state.tables.entry(pipe.key.clone()).or_default();
        Ok(SuccessTuple::ok(format!("registered pipe '{}'", pipe.key)))
    }

    async fn edit_pipe(&self, pipe: &Pipe) -> Result<SuccessTuple, McError> {
        let mut state = self.state.write().await;
        if !state.metadata.contains_key(&pipe.key) {
            return Err(McError::integrity(format!("pipe '{}' is not registered", pipe.key)));
        }
        state.metadata.insert(pipe.key.clone(), pipe.parameters.clone());
        Ok(SuccessTuple::ok(format!("edited pipe '{}'", pipe.key)))
    }

    async fn pipe_exists(&self, key: &PipeKey) -> Result<bool, McError> {
        Ok(self.state.read().await.metadata.contains_key(key))
    }

    async fn get_pipe_attributes(&self, key: &PipeKey) -> Result<Option<JsonValue>, McError> {
        Ok(self.state.read().await.metadata.get(key).cloned())
    }

    async fn delete_pipe(&self, key: &PipeKey) -> Result<SuccessTuple, McError> {
        let mut state = self.state.write().await;
        state.tables.remove(key);
        match state.metadata.remove(key) {
            Some(_) => Ok(SuccessTuple::ok(format!("deleted pipe '{key}'"))),
            None => Ok(SuccessTuple::fail(format!("pipe '{key}' was not registered"))),
        }
    }

    async fn get_sync_time(&self, pipe: &Pipe, newest: bool) -> Result<Option<Value>, McError> {
        let Some(datetime_col) = pipe.column("datetime") else { return Ok(None) };
        let state = self.state.read().await;
        let Some(rows) = state.tables.get(&pipe.key) else { return Ok(None) };
        let mut best: Option<&Value> = None;
        for row in rows {
            let Some(value) = row.get(&datetime_col) else { continue };
            if value.is_null() {
                continue;
            }
            best = Some(match best {
                None => value,
                Some(current) => pick_extreme(current, value, newest),
            });
        }
        Ok(best.cloned())
    }

    async fn get_pipe_data(&self, pipe: &Pipe, bounds: &TimeBounds) -> Result<Batch, McError> {
        let state = self.state.read().await;
        let Some(rows) = state.tables.get(&pipe.key) else { return Ok(Vec::new()) };
        let datetime_col = pipe.column("datetime");
        Ok(rows
            .iter()
            .filter(|row| within_bounds(row, datetime_col.as_deref(), bounds))
            .cloned()
            .collect())
    }

    #[instrument(skip(self, pipe, batch), fields(rows = batch.len()))]
    async fn sync_pipe(&self, pipe: &Pipe, batch: Batch) -> Result<SuccessTuple, McError> {
        let unique_columns = pipe.unique_columns();
        let mut state = self.state.write().await;
        let table = state.tables.entry(pipe.key.clone()).or_default();

        if unique_columns.is_empty() {
            let inserted = batch.len();
            table.extend(batch);
            return Ok(SuccessTuple::ok(format!("inserted {inserted} row(s)")));
        }

        let mut inserted = 0usize;
        let mut updated = 0usize;
        for incoming in batch {
            match table.iter_mut().find(|existing| rows_match(existing, &incoming, &unique_columns)) {
                Some(existing) => {
                    *existing = incoming;
                    updated += 1;
                }
                None => {
                    table.push(incoming);
                    inserted += 1;
                }
            }
        }
        Ok(SuccessTuple::ok(format!("inserted {inserted}, updated {updated} row(s)")))
    }

    async fn clear_pipe(&self, pipe: &Pipe, bounds: &TimeBounds) -> Result<SuccessTuple, McError> {
        let mut state = self.state.write().await;
        let datetime_col = pipe.column("datetime");
        let Some(rows) = state.tables.get_mut(&pipe.key) else {
            return Ok(SuccessTuple::ok("nothing to clear"));
        };
        let before = rows.len();
        rows.retain(|row| !within_bounds(row, datetime_col.as_deref(), bounds));
        Ok(SuccessTuple::ok(format!("cleared {} row(s)", before - rows.len())))
    }

    async fn drop_pipe(&self, pipe: &Pipe) -> Result<SuccessTuple, McError> {
        let mut state = self.state.write().await;
        state.tables.remove(&pipe.key);
        Ok(SuccessTuple::ok(format!("dropped table for pipe '{}'", pipe.key)))
    }

    async fn create_indices(&self, _pipe: &Pipe) -> Result<SuccessTuple, McError> {
        Ok(SuccessTuple::ok("no-op: in-memory storage has no index structures"))
    }

    async fn drop_indices(&self, _pipe: &Pipe) -> Result<SuccessTuple, McError> {
        Ok(SuccessTuple::ok("no-op: in-memory storage has no index structures"))
    }
}

fn rows_match(a: &Row, b: &Row, unique_columns: &[String]) -> bool {
    unique_columns.iter().all(|col| match (a.get(col), b.get(col)) {
        (Some(av), Some(bv)) => av.sync_eq(bv),
        _ => false,
    })
}

fn pick_extreme<'a>(current: &'a Value, candidate: &'a Value, newest: bool) -> &'a Value {
    let candidate_wins = match datetime_cmp(current, candidate) {
        Some(std::cmp::Ordering::Less) => newest,
        Some(std::cmp::Ordering::Greater) => !newest,
        _ => false,
    };
    if candidate_wins { candidate } else { current }
}

fn datetime_cmp(a: &Value, b: &Value) -> Option<std::cmp::Ordering> {
    use crate::row::Value::*;
    match (a, b) {
        (DateTimeNaive(x), DateTimeNaive(y)) => Some(x.cmp(y)),
        (DateTimeUtc(x), DateTimeUtc(y)) => Some(x.cmp(y)),
        (DateTimeZoned(x), DateTimeZoned(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn within_bounds(row: &Row, datetime_col: Option<&str>, bounds: &TimeBounds) -> bool {
    let Some(col) = datetime_col else { return true };
    let Some(value) = row.get(col) else { return true };
    if let Some(begin) = &bounds.begin {
        if matches!(datetime_cmp(value, begin), Some(std::cmp::Ordering::Less)) {
            return false;
        }
    }
    if let Some(end) = &bounds.end {
        if matches!(datetime_cmp(value, end), Some(std::cmp::Ordering::Greater)) {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::{ConnectorKeys, ConnectorKind};
    use crate::pipe::PipeKey;
    use crate::row::Value;
    use serde_json::json;

    fn test_pipe() -> Pipe {
        let key = PipeKey::new(
            ConnectorKeys::new(ConnectorKind::Sql, "main"),
            "temperature",
            None,
            ConnectorKeys::new(ConnectorKind::Sql, "local"),
        )
        .unwrap();
        Pipe::new(key, json!({"columns": {"datetime": "ts", "id": "device_id"}}))
    }

    fn row(device_id: i64, ts_secs: i64, value: f64) -> Row {
        let mut row = Row::new();
        row.insert("device_id".into(), Value::Int(device_id));
        row.insert(
            "ts".into(),
            Value::DateTimeUtc(chrono::DateTime::from_timestamp(ts_secs, 0).unwrap()),
        );
        row.insert("value".into(), Value::Float(value));
        row
    }

    #[tokio::test]
    async fn sync_pipe_upserts_on_unique_columns() {
        let storage = MemoryInstance::new();
        let pipe = test_pipe();
        storage.register_pipe(&pipe).await.unwrap();

        storage.sync_pipe(&pipe, vec![row(1, 100, 20.0)]).await.unwrap();
        storage.sync_pipe(&pipe, vec![row(1, 100, 25.0)]).await.unwrap();

        let data = storage.get_pipe_data(&pipe, &TimeBounds::default()).await.unwrap();
        assert_eq!(data.len(), 1);
        assert_eq!(data[0]["value"], Value::Float(25.0));
    }

    #[tokio::test]
    async fn get_sync_time_returns_newest_by_default() {
        let storage = MemoryInstance::new();
        let pipe = test_pipe();
        storage.register_pipe(&pipe).await.unwrap();
        storage
            .sync_pipe(&pipe, vec![row(1, 100, 1.0), row(2, 200, 2.0)])
            .await
            .unwrap();

        let newest = storage.get_sync_time(&pipe, true).await.unwrap().unwrap();
        assert_eq!(newest, Value::DateTimeUtc(chrono::DateTime::from_timestamp(200, 0).unwrap()));
    }

    #[tokio::test]
    async fn registering_twice_reports_failure_without_error() {
        let storage = MemoryInstance::new();
        let pipe = test_pipe();
        storage.register_pipe(&pipe).await.unwrap();
        let second = storage.register_pipe(&pipe).await.unwrap();
        assert!(!second.is_ok());
    }
}
