//! A Postgres-backed `InstanceStorage`, grounded on the teacher's
//! `storage::postgres::PostgresGateway` (dynamic query construction over a
//! pooled connection) but built on `sqlx` instead of `diesel`/
//! `diesel_async`: a pipe's backing table is created and altered at
//! runtime from its `dtypes` map, which `diesel`'s compile-time `table!`
//! macros have no way to express (§ AMBIENT STACK in SPEC_FULL.md). The
//! same pattern -- raw, hand-built SQL with bound parameters over
//! `sqlx::PgPool` for a schema that isn't known until runtime -- is what
//! `estuary-flow`, `sl224-casparianflow` and `grove-pg-stream` do for
//! their own dynamic-schema sinks.

use std::collections::HashSet;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use sqlx::{PgPool, Row as _};
use tracing::{instrument, warn};

use super::{InstanceStorage, TimeBounds};
use crate::dtype::Dtype;
use crate::error::McError;
use crate::pipe::{Pipe, PipeKey};
use crate::row::{Batch, Row, Value};
use crate::success::SuccessTuple;

/// The metadata table every `PostgresInstance` keeps alongside pipes'
/// own data tables, holding each pipe's identity and `parameters` JSON.
const PIPES_TABLE: &str = "mrsm_pipes";

pub struct PostgresInstance {
    pool: PgPool,
}

impl PostgresInstance {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[instrument(skip(self))]
    async fn ensure_pipes_table(&self) -> Result<(), McError> {
        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {PIPES_TABLE} (
                connector_keys TEXT NOT NULL,
                metric_key TEXT NOT NULL,
                location_key TEXT NOT NULL DEFAULT '',
                instance_keys TEXT NOT NULL,
                parameters JSONB NOT NULL,
                PRIMARY KEY (connector_keys, metric_key, location_key, instance_keys)
            )"
        ))
        .execute(&self.pool)
        .await
        .map_err(from_sqlx)?;
        Ok(())
    }

    async fn table_exists(&self, table: &str) -> Result<bool, McError> {
        let row = sqlx::query("SELECT to_regclass($1) IS NOT NULL AS exists")
            .bind(table)
            .fetch_one(&self.pool)
            .await
            .map_err(from_sqlx)?;
        Ok(row.try_get::<bool, _>("exists").unwrap_or(false))
    }

}

#[async_trait]
impl InstanceStorage for PostgresInstance {
    #[instrument(skip(self, pipe))]
    async fn register_pipe(&self, pipe: &Pipe) -> Result<SuccessTuple, McError> {
        self.ensure_pipes_table().await?;
        if self.pipe_exists(&pipe.key).await? {
            return Ok(SuccessTuple::fail(format!("pipe '{}' already exists", pipe.key)));
        }
        sqlx::query(&format!(
            "INSERT INTO {PIPES_TABLE}
                (connector_keys, metric_key, location_key, instance_keys, parameters)
             VALUES ($1, $2, $3, $4, $5)"
        ))
        .bind(pipe.key.connector_keys.to_string())
        .bind(&pipe.key.metric_key)
        .bind(pipe.key.location_key.clone().unwrap_or_default())
        .bind(pipe.key.instance_keys.to_string())
        .bind(&pipe.parameters)
        .execute(&self.pool)
        .await
        .map_err(from_sqlx)?;
        Ok(SuccessTuple::ok(format!("registered pipe '{}'", pipe.key)))
    }

    async fn edit_pipe(&self, pipe: &Pipe) -> Result<SuccessTuple, McError> {
        self.ensure_pipes_table().await?;
        let result = sqlx::query(&format!(
            "UPDATE {PIPES_TABLE} SET parameters = $1
             WHERE connector_keys = $2 AND metric_key = $3 AND location_key = $4 AND instance_keys = $5"
        ))
        .bind(&pipe.parameters)
        .bind(pipe.key.connector_keys.to_string())
        .bind(&pipe.key.metric_key)
        .bind(pipe.key.location_key.clone().unwrap_or_default())
        .bind(pipe.key.instance_keys.to_string())
        .execute(&self.pool)
        .await
        .map_err(from_sqlx)?;
        if result.rows_affected() == 0 {
            return Err(McError::integrity(format!("pipe '{}' is not registered", pipe.key)));
        }
        Ok(SuccessTuple::ok(format!("edited pipe '{}'", pipe.key)))
    }

    async fn pipe_exists(&self, key: &PipeKey) -> Result<bool, McError> {
        self.ensure_pipes_table().await?;
        let row = sqlx::query(&format!(
            "SELECT EXISTS(SELECT 1 FROM {PIPES_TABLE}
             WHERE connector_keys = $1 AND metric_key = $2 AND location_key = $3 AND instance_keys = $4) AS exists"
        ))
        .bind(key.connector_keys.to_string())
        .bind(&key.metric_key)
        .bind(key.location_key.clone().unwrap_or_default())
        .bind(key.instance_keys.to_string())
        .fetch_one(&self.pool)
        .await
        .map_err(from_sqlx)?;
        Ok(row.try_get::<bool, _>("exists").unwrap_or(false))
    }

    async fn get_pipe_attributes(&self, key: &PipeKey) -> Result<Option<JsonValue>, McError> {
        self.ensure_pipes_table().await?;
        let row = sqlx::query(&format!(
            "SELECT parameters FROM {PIPES_TABLE}
             WHERE connector_keys = $1 AND metric_key = $2 AND location_key = $3 AND instance_keys = $4"
        ))
        .bind(key.connector_keys.to_string())
        .bind(&key.metric_key)
        .bind(key.location_key.clone().unwrap_or_default())
        .bind(key.instance_keys.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(from_sqlx)?;
        Ok(row.map(|r| r.try_get::<JsonValue, _>("parameters").unwrap_or(JsonValue::Null)))
    }

    async fn delete_pipe(&self, key: &PipeKey) -> Result<SuccessTuple, McError> {
        self.ensure_pipes_table().await?;
        let result = sqlx::query(&format!(
            "DELETE FROM {PIPES_TABLE}
             WHERE connector_keys = $1 AND metric_key = $2 AND location_key = $3 AND instance_keys = $4"
        ))
        .bind(key.connector_keys.to_string())
        .bind(&key.metric_key)
        .bind(key.location_key.clone().unwrap_or_default())
        .bind(key.instance_keys.to_string())
        .execute(&self.pool)
        .await
        .map_err(from_sqlx)?;
        if result.rows_affected() == 0 {
            return Ok(SuccessTuple::fail(format!("pipe '{key}' was not registered")));
        }
        Ok(SuccessTuple::ok(format!("deleted pipe '{key}'")))
    }

    async fn get_sync_time(&self, pipe: &Pipe, newest: bool) -> Result<Option<Value>, McError> {
        let Some(datetime_col) = pipe.column("datetime") else { return Ok(None) };
        let table = sanitize_identifier(&pipe.target())?;
        if !self.table_exists(&table).await? {
            return Ok(None);
        }
        let order = if newest { "DESC" } else { "ASC" };
        let column = sanitize_identifier(&datetime_col)?;
        let sql = format!(
            "SELECT {column} AS value FROM {table} WHERE {column} IS NOT NULL ORDER BY {column} {order} LIMIT 1"
        );
        let row = sqlx::query(&sql).fetch_optional(&self.pool).await.map_err(from_sqlx)?;
        Ok(row.and_then(|r| r.try_get::<chrono::DateTime<chrono::Utc>, _>("value").ok()).map(Value::DateTimeUtc))
    }

    async fn get_pipe_data(&self, pipe: &Pipe, bounds: &TimeBounds) -> Result<Batch, McError> {
        let table = sanitize_identifier(&pipe.target())?;
        if !self.table_exists(&table).await? {
            return Ok(Vec::new());
        }
        // Binding begin/end generically across unknown dtypes is left to a
        // per-dtype query builder this stand-in doesn't implement; reads
        // degrade to a full scan filtered in Rust instead.
        let rows = sqlx::query(&format!("SELECT row_to_json(t) AS doc FROM {table} t"))
            .fetch_all(&self.pool)
            .await
            .map_err(from_sqlx)?;
        let dtypes = pipe.dtypes();
        let datetime_col = pipe.column("datetime");
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let doc: JsonValue = row.try_get("doc").map_err(from_sqlx)?;
            if let JsonValue::Object(obj) = doc {
                let raw_row: crate::row::RawRow = obj.into_iter().collect();
                let typed = crate::dtype::enforce_dtypes(&[raw_row], &dtypes)?;
                out.extend(typed);
            }
        }
        if let Some(col) = datetime_col {
            out.retain(|row| within_time_bounds(row, &col, bounds));
        }
        Ok(out)
    }

    #[instrument(skip(self, pipe, batch), fields(rows = batch.len()))]
    async fn sync_pipe(&self, pipe: &Pipe, batch: Batch) -> Result<SuccessTuple, McError> {
        if batch.is_empty() {
            return Ok(SuccessTuple::ok("nothing to sync"));
        }
        let table = sanitize_identifier(&pipe.target())?;
        let dtypes = pipe.dtypes();

        if !self.table_exists(&table).await? {
            create_table(&self.pool, &table, &batch, &dtypes).await?;
        } else if !pipe.is_static() {
            add_missing_columns(&self.pool, &table, &batch, &dtypes).await?;
        }

        let unique_columns = pipe.unique_columns();
        let affected = upsert_rows(&self.pool, &table, &batch, &unique_columns, &dtypes).await?;
        Ok(SuccessTuple::ok(format!("synced {affected} row(s) into '{table}'")))
    }

    async fn clear_pipe(&self, pipe: &Pipe, bounds: &TimeBounds) -> Result<SuccessTuple, McError> {
        let table = sanitize_identifier(&pipe.target())?;
        if !self.table_exists(&table).await? {
            return Ok(SuccessTuple::ok("nothing to clear"));
        }
        match pipe.column("datetime").filter(|_| bounds.begin.is_some() || bounds.end.is_some()) {
            Some(col) => {
                let column = sanitize_identifier(&col)?;
                let mut clauses = Vec::new();
                let mut binds = Vec::new();
                if let Some(begin) = &bounds.begin {
                    clauses.push(format!("{column} >= ${}", binds.len() + 1));
                    binds.push(begin.clone());
                }
                if let Some(end) = &bounds.end {
                    clauses.push(format!("{column} <= ${}", binds.len() + 1));
                    binds.push(end.clone());
                }
                let sql = format!("DELETE FROM {table} WHERE {}", clauses.join(" AND "));
                let mut query = sqlx::query(&sql);
                for bind in binds {
                    query = bind_typed(query, bind, None);
                }
                query.execute(&self.pool).await.map_err(from_sqlx)?;
            }
            None => {
                sqlx::query(&format!("TRUNCATE {table}")).execute(&self.pool).await.map_err(from_sqlx)?;
            }
        }
        Ok(SuccessTuple::ok(format!("cleared pipe '{}'", pipe.key)))
    }

    async fn drop_pipe(&self, pipe: &Pipe) -> Result<SuccessTuple, McError> {
        let table = sanitize_identifier(&pipe.target())?;
        sqlx::query(&format!("DROP TABLE IF EXISTS {table}"))
            .execute(&self.pool)
            .await
            .map_err(from_sqlx)?;
        Ok(SuccessTuple::ok(format!("dropped table for pipe '{}'", pipe.key)))
    }

    async fn create_indices(&self, pipe: &Pipe) -> Result<SuccessTuple, McError> {
        let table = sanitize_identifier(&pipe.target())?;
        let unique_columns = pipe.unique_columns();
        if unique_columns.is_empty() {
            return Ok(SuccessTuple::ok("no unique constraint to index"));
        }
        let quoted: Result<Vec<String>, McError> =
            unique_columns.iter().map(|c| sanitize_identifier(c)).collect();
        let index_name = sanitize_identifier(&format!("{table}_unique_idx"))?;
        sqlx::query(&format!(
            "CREATE UNIQUE INDEX IF NOT EXISTS {index_name} ON {table} ({})",
            quoted?.join(", ")
        ))
        .execute(&self.pool)
        .await
        .map_err(from_sqlx)?;
        Ok(SuccessTuple::ok(format!("created indices for pipe '{}'", pipe.key)))
    }

    async fn drop_indices(&self, pipe: &Pipe) -> Result<SuccessTuple, McError> {
        let table = sanitize_identifier(&pipe.target())?;
        let index_name = sanitize_identifier(&format!("{table}_unique_idx"))?;
        sqlx::query(&format!("DROP INDEX IF EXISTS {index_name}"))
            .execute(&self.pool)
            .await
            .map_err(from_sqlx)?;
        Ok(SuccessTuple::ok(format!("dropped indices for pipe '{}'", pipe.key)))
    }
}

async fn create_table(
    pool: &PgPool,
    table: &str,
    batch: &Batch,
    dtypes: &crate::dtype::DtypeMap,
) -> Result<(), McError> {
    let mut columns: Vec<&str> = Vec::new();
    let mut seen = HashSet::new();
    for row in batch {
        for col in row.keys() {
            if seen.insert(col.as_str()) {
                columns.push(col.as_str());
            }
        }
    }
    let mut defs = Vec::with_capacity(columns.len());
    for col in &columns {
        let quoted = sanitize_identifier(col)?;
        let dtype = dtypes.get(*col);
        defs.push(format!("{quoted} {}", sql_type_for(dtype)));
    }
    let sql = format!("CREATE TABLE IF NOT EXISTS {table} ({})", defs.join(", "));
    sqlx::query(&sql).execute(pool).await.map_err(from_sqlx)?;
    Ok(())
}

async fn add_missing_columns(
    pool: &PgPool,
    table: &str,
    batch: &Batch,
    dtypes: &crate::dtype::DtypeMap,
) -> Result<(), McError> {
    let existing = existing_columns_of(pool, table).await?;
    let mut seen = HashSet::new();
    for row in batch {
        for col in row.keys() {
            if existing.contains(col) || !seen.insert(col.clone()) {
                continue;
            }
            let quoted = sanitize_identifier(col)?;
            let dtype = dtypes.get(col.as_str());
            let sql = format!("ALTER TABLE {table} ADD COLUMN IF NOT EXISTS {quoted} {}", sql_type_for(dtype));
            sqlx::query(&sql).execute(pool).await.map_err(from_sqlx)?;
        }
    }
    Ok(())
}

async fn existing_columns_of(pool: &PgPool, table: &str) -> Result<HashSet<String>, McError> {
    let rows = sqlx::query("SELECT column_name FROM information_schema.columns WHERE table_name = $1")
        .bind(table)
        .fetch_all(pool)
        .await
        .map_err(from_sqlx)?;
    Ok(rows.into_iter().filter_map(|r| r.try_get::<String, _>("column_name").ok()).collect())
}

/// Upserts `batch`, binding each column as the Postgres type its `Value`
/// variant actually is rather than uniformly as JSONB -- Postgres does not
/// implicitly cast `jsonb` into `bigint`/`timestamptz`/`uuid`/`numeric`
/// columns, so a typed column's write would otherwise fail with "column is
/// of type X but expression is of type jsonb".
async fn upsert_rows(
    pool: &PgPool,
    table: &str,
    batch: &Batch,
    unique_columns: &[String],
    dtypes: &crate::dtype::DtypeMap,
) -> Result<usize, McError> {
    let mut columns: Vec<String> = Vec::new();
    let mut seen = HashSet::new();
    for row in batch {
        for col in row.keys() {
            if seen.insert(col.clone()) {
                columns.push(col.clone());
            }
        }
    }
    let quoted_columns: Result<Vec<String>, McError> =
        columns.iter().map(|c| sanitize_identifier(c)).collect();
    let quoted_columns = quoted_columns?;

    let mut affected = 0usize;
    for row in batch {
        let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("${i}")).collect();
        let mut sql = format!(
            "INSERT INTO {table} ({}) VALUES ({})",
            quoted_columns.join(", "),
            placeholders.join(", ")
        );
        if !unique_columns.is_empty() {
            let quoted_unique: Result<Vec<String>, McError> =
                unique_columns.iter().map(|c| sanitize_identifier(c)).collect();
            let updates: Vec<String> = columns
                .iter()
                .filter(|c| !unique_columns.contains(c))
                .map(|c| format!("{0} = EXCLUDED.{0}", sanitize_identifier(c).unwrap_or_default()))
                .collect();
            if updates.is_empty() {
                sql.push_str(&format!(" ON CONFLICT ({}) DO NOTHING", quoted_unique?.join(", ")));
            } else {
                sql.push_str(&format!(
                    " ON CONFLICT ({}) DO UPDATE SET {}",
                    quoted_unique?.join(", "),
                    updates.join(", ")
                ));
            }
        }
        let mut query = sqlx::query(&sql);
        for column in &columns {
            let value = row.get(column).cloned().unwrap_or(Value::Null);
            query = bind_typed(query, value, dtypes.get(column.as_str()));
        }
        match query.execute(pool).await {
            Ok(result) => affected += result.rows_affected() as usize,
            Err(e) => {
                warn!(error = %e, "row upsert failed");
                return Err(from_sqlx(e));
            }
        }
    }
    Ok(affected)
}

type PgQuery<'q> = sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments>;

/// Binds `value` as the Postgres type its variant (or, for a `Null` with
/// no variant to go on, `dtype`) implies, rather than always as JSONB.
fn bind_typed<'q>(query: PgQuery<'q>, value: Value, dtype: Option<&Dtype>) -> PgQuery<'q> {
    match value {
        Value::Null => match dtype {
            Some(Dtype::Int) => query.bind(None::<i64>),
            Some(Dtype::Float) => query.bind(None::<f64>),
            Some(Dtype::Bool) => query.bind(None::<bool>),
            Some(Dtype::Str) => query.bind(None::<String>),
            Some(Dtype::Bytes) => query.bind(None::<Vec<u8>>),
            Some(Dtype::Uuid) => query.bind(None::<uuid::Uuid>),
            Some(Dtype::Numeric { .. }) => query.bind(None::<rust_decimal::Decimal>),
            Some(Dtype::DateTime(_)) => query.bind(None::<chrono::DateTime<chrono::Utc>>),
            Some(Dtype::Json) | Some(Dtype::Object) | None => query.bind(None::<JsonValue>),
        },
        Value::Int(i) => query.bind(i),
        Value::Float(f) => query.bind(f),
        Value::Bool(b) => query.bind(b),
        Value::Str(s) => query.bind(s),
        Value::Bytes(b) => query.bind(b),
        Value::Uuid(u) => query.bind(u),
        Value::Numeric(d) => query.bind(d),
        Value::Json(v) | Value::Object(v) => query.bind(v),
        Value::DateTimeNaive(dt) => query.bind(dt),
        Value::DateTimeUtc(dt) => query.bind(dt),
        Value::DateTimeZoned(dt) => query.bind(dt.with_timezone(&chrono::Utc)),
    }
}

fn sql_type_for(dtype: Option<&Dtype>) -> &'static str {
    match dtype {
        Some(Dtype::Int) => "BIGINT",
        Some(Dtype::Float) => "DOUBLE PRECISION",
        Some(Dtype::Bool) => "BOOLEAN",
        Some(Dtype::Str) => "TEXT",
        Some(Dtype::Bytes) => "BYTEA",
        Some(Dtype::Uuid) => "UUID",
        Some(Dtype::Numeric { .. }) => "NUMERIC",
        Some(Dtype::Json) => "JSONB",
        Some(Dtype::DateTime(_)) => "TIMESTAMPTZ",
        Some(Dtype::Object) | None => "JSONB",
    }
}

/// Rejects anything but ASCII alphanumerics/underscore, to keep
/// runtime-constructed identifiers (table and column names come from pipe
/// parameters, not from a fixed schema) from being used as an injection
/// vector -- bound parameters cover values, this covers identifiers.
fn sanitize_identifier(name: &str) -> Result<String, McError> {
    if name.is_empty()
        || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        || name.chars().next().map(|c| c.is_ascii_digit()).unwrap_or(false)
    {
        return Err(McError::schema(name, 0, "not a valid SQL identifier"));
    }
    Ok(format!("\"{name}\""))
}

fn from_sqlx(err: sqlx::Error) -> McError {
    McError::transient(format!("postgres error: {err}"))
}

fn within_time_bounds(row: &Row, datetime_col: &str, bounds: &TimeBounds) -> bool {
    let Some(value) = row.get(datetime_col) else { return true };
    let as_utc = |v: &Value| match v {
        Value::DateTimeUtc(dt) => Some(*dt),
        Value::DateTimeNaive(dt) => Some(chrono::TimeZone::from_utc_datetime(&chrono::Utc, dt)),
        Value::DateTimeZoned(dt) => Some(dt.with_timezone(&chrono::Utc)),
        _ => None,
    };
    let Some(value) = as_utc(value) else { return true };
    if let Some(begin) = bounds.begin.as_ref().and_then(as_utc) {
        if value < begin {
            return false;
        }
    }
    if let Some(end) = bounds.end.as_ref().and_then(as_utc) {
        if value > end {
            return false;
        }
    }
    true
}
