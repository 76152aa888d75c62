//! # Instance Storage Contract (C4)
//!
//! Everything a pipe's instance connector must provide: metadata
//! register/edit/delete, sync time bounds, reading back stored data, and
//! the actual `sync_pipe` write path (create-table-if-missing, add
//! columns unless static, upsert on the effective unique constraint or
//! plain insert otherwise), per spec.md §4.3.
//!
//! Grounded on the teacher's `storage::ChainGateway` /
//! `ExtractionStateGateway` async traits (`storage/mod.rs`): a small set
//! of async trait methods any backend can implement, called through a
//! trait object rather than monomorphised per backend, since the
//! orchestrator doesn't know or care which instance it's talking to.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use crate::error::McError;
use crate::pipe::{Pipe, PipeKey};
use crate::row::{Batch, Value};
use crate::success::SuccessTuple;

/// An optional time-range bound for reads, expressed as already-typed
/// `Value`s (the caller is expected to have coerced `begin`/`end` into the
/// pipe's datetime dtype before calling).
#[derive(Debug, Clone, Default)]
pub struct TimeBounds {
    pub begin: Option<Value>,
    pub end: Option<Value>,
}

/// The storage backend behind one instance connector. A `sql:*` instance
/// is backed by `postgres::PostgresInstance`; tests and the in-process
/// dry-run mode use `memory::MemoryInstance`.
#[async_trait]
pub trait InstanceStorage: Send + Sync {
    /// Persists a new pipe's identity and parameters. Returns `ok=false`
    /// (not an `Err`) if the pipe already exists -- registration
    /// conflicts are an expected outcome, not a storage failure.
    async fn register_pipe(&self, pipe: &Pipe) -> Result<SuccessTuple, McError>;

    /// Overwrites an existing pipe's parameters. Fails with `integrity` if
    /// the pipe isn't registered yet.
    async fn edit_pipe(&self, pipe: &Pipe) -> Result<SuccessTuple, McError>;

    async fn pipe_exists(&self, key: &PipeKey) -> Result<bool, McError>;

    async fn get_pipe_attributes(&self, key: &PipeKey) -> Result<Option<JsonValue>, McError>;

    /// Removes the pipe's metadata record. Does not drop its data table;
    /// callers that want both call `drop_pipe` first.
    async fn delete_pipe(&self, key: &PipeKey) -> Result<SuccessTuple, McError>;

    /// The newest (or oldest, if `newest` is false) value of the pipe's
    /// datetime column currently stored, used to bound incremental
    /// fetches (§4.4 point 2). `None` if the pipe has no datetime column
    /// or no rows yet.
    async fn get_sync_time(&self, pipe: &Pipe, newest: bool) -> Result<Option<Value>, McError>;

    /// Reads back stored rows within `bounds`, in ascending order by the
    /// pipe's datetime column if it has one.
    async fn get_pipe_data(&self, pipe: &Pipe, bounds: &TimeBounds) -> Result<Batch, McError>;

    /// The core write path (§4.3 point 2): create the table if it doesn't
    /// exist, add any new columns (unless the pipe `is_static()`), then
    /// upsert on the effective unique constraint if one exists, or plain
    /// insert otherwise.
    async fn sync_pipe(&self, pipe: &Pipe, batch: Batch) -> Result<SuccessTuple, McError>;

    /// Deletes rows within `bounds` without dropping the table.
    async fn clear_pipe(&self, pipe: &Pipe, bounds: &TimeBounds) -> Result<SuccessTuple, McError>;

    /// Drops the pipe's backing table entirely. Metadata (`register_pipe`)
    /// is untouched -- the pipe still exists, just empty.
    async fn drop_pipe(&self, pipe: &Pipe) -> Result<SuccessTuple, McError>;

    async fn create_indices(&self, pipe: &Pipe) -> Result<SuccessTuple, McError>;

    async fn drop_indices(&self, pipe: &Pipe) -> Result<SuccessTuple, McError>;
}
