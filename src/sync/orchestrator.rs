//! # Sync Orchestrator (C7)
//!
//! Drives one pipe through a full sync: pre-hooks, incremental fetch
//! bounded by the pipe's existing sync time, per-batch coerce -> infer ->
//! filter -> write, post-hooks (§4.4). Transient errors are retried with
//! backoff; schema and integrity errors are not (§4.6, §7) -- they mean
//! the data or the pipe's own state is wrong, and retrying changes
//! nothing. Cancellation is cooperative, checked between batches and
//! before each retry sleep.
//!
//! Grounded on the teacher's `ExtractorRunner::run` (`extractor/runner.rs`):
//! a `tokio::select!`-driven loop pulling from one async source and
//! reacting to a cancellation signal, generalised here from "stream of
//! blockchain messages" to "stream of fetched batches".

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::connector::fetch::FetchBounds;
use crate::connector::{ConnectorKeys, FetchConnector};
use crate::dtype::{enforce_dtypes, infer_dtypes};
use crate::error::McError;
use crate::filter::{self, NullIndicesPolicy};
use crate::pipe::{Pipe, PipeKey};
use crate::row::{RawBatch, Value};
use crate::storage::{InstanceStorage, TimeBounds};
use crate::success::SuccessTuple;

use super::hooks::HookRegistry;

/// Where a sync pulls its batches from: either a registered
/// `FetchConnector` polled repeatedly with advancing bounds, or a single
/// caller-supplied dataframe served once (§4.6 step 2: `pipe.sync(df |
/// None, ...)` -- when `df` is supplied it's used directly as the batch
/// iterator instead of calling the source's `fetch`).
enum BatchSource {
    Fetcher(Arc<dyn FetchConnector>),
    Dataframe(Option<RawBatch>),
}

impl BatchSource {
    async fn next(&mut self, bounds: &FetchBounds) -> Result<Option<RawBatch>, McError> {
        match self {
            BatchSource::Fetcher(fetcher) => fetcher.fetch(bounds).await,
            BatchSource::Dataframe(slot) => Ok(slot.take()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 5, base_delay: Duration::from_millis(200), max_delay: Duration::from_secs(30) }
    }
}

#[derive(Clone, Default)]
pub struct SyncOptions {
    pub cancel: CancellationToken,
    /// Caps how many fetch/write batches a single `sync` call processes,
    /// mostly for tests -- `None` means "until the fetcher reports done".
    pub max_batches: Option<usize>,
}

pub struct SyncOrchestrator {
    storage: Arc<dyn InstanceStorage>,
    fetchers: HashMap<ConnectorKeys, Arc<dyn FetchConnector>>,
    hooks: HookRegistry,
    retry: RetryPolicy,
}

impl SyncOrchestrator {
    pub fn new(storage: Arc<dyn InstanceStorage>) -> Self {
        Self { storage, fetchers: HashMap::new(), hooks: HookRegistry::new(), retry: RetryPolicy::default() }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_hooks(mut self, hooks: HookRegistry) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn register_fetcher(&mut self, keys: ConnectorKeys, fetcher: Arc<dyn FetchConnector>) {
        self.fetchers.insert(keys, fetcher);
    }

    #[instrument(skip(self, options), fields(pipe = %key))]
    pub async fn sync(&self, key: &PipeKey, options: SyncOptions) -> Result<SuccessTuple, McError> {
        let attrs = self
            .storage
            .get_pipe_attributes(key)
            .await?
            .ok_or_else(|| McError::integrity(format!("pipe '{key}' is not registered")))?;
        let pipe = Pipe::new(key.clone(), attrs);

        self.hooks.run_pre(&pipe).await;

        let fetcher = self
            .fetchers
            .get(&pipe.key.connector_keys)
            .ok_or_else(|| McError::connector(format!("no fetch connector registered for '{}'", pipe.key.connector_keys)))?
            .clone();

        let mut bounds = FetchBounds::default();
        if let Some(newest) = self.storage.get_sync_time(&pipe, true).await? {
            bounds.begin = Some(render_bound(&newest));
        }

        let mut source = BatchSource::Fetcher(fetcher);
        self.drive_batches(&pipe, &options, &mut source, &mut bounds).await
    }

    /// Syncs `pipe` from an already-materialized batch rather than a
    /// registered `FetchConnector` (§4.6 step 2: `pipe.sync(df | None, ...)`
    /// uses `df` directly as the batch iterator when the caller supplies
    /// one). The batch is processed once, in full, with no incremental
    /// bounds-tracking pass between calls -- there's no fetcher to bound.
    #[instrument(skip(self, df, options), fields(pipe = %key))]
    pub async fn sync_dataframe(
        &self,
        key: &PipeKey,
        df: RawBatch,
        options: SyncOptions,
    ) -> Result<SuccessTuple, McError> {
        let attrs = self
            .storage
            .get_pipe_attributes(key)
            .await?
            .ok_or_else(|| McError::integrity(format!("pipe '{key}' is not registered")))?;
        let pipe = Pipe::new(key.clone(), attrs);

        self.hooks.run_pre(&pipe).await;

        let mut bounds = FetchBounds::default();
        let mut source = BatchSource::Dataframe(Some(df));
        self.drive_batches(&pipe, &options, &mut source, &mut bounds).await
    }

    async fn drive_batches(
        &self,
        pipe: &Pipe,
        options: &SyncOptions,
        source: &mut BatchSource,
        bounds: &mut FetchBounds,
    ) -> Result<SuccessTuple, McError> {
        let mut total_inserted = 0usize;
        let mut total_updated = 0usize;
        let mut batches_processed = 0usize;

        loop {
            if options.cancel.is_cancelled() {
                return Err(McError::cancelled());
            }
            if let Some(max) = options.max_batches {
                if batches_processed >= max {
                    break;
                }
            }

            let raw_batch = self.retry_transient(options, || source.next(bounds)).await?;
            let Some(raw_batch) = raw_batch else { break };
            if raw_batch.is_empty() {
                continue;
            }

            if options.cancel.is_cancelled() {
                return Err(McError::cancelled());
            }

            let mut dtypes = pipe.dtypes();
            for (column, dtype) in infer_dtypes(&raw_batch) {
                dtypes.entry(column).or_insert(dtype);
            }

            let enforced = enforce_dtypes(&raw_batch, &dtypes)?;

            // The filter engine only needs existing rows that could collide
            // with this batch's `U` values, which -- for a pipe with a
            // datetime column -- is bounded by the batch's own min/max
            // datetime (§4.3 C6). Pipes without a datetime column fall back
            // to a full read-back since there's no range to bound by.
            let batch_bounds = pipe
                .column("datetime")
                .map(|col| datetime_span(&enforced, &col))
                .unwrap_or_default();
            let existing = self
                .retry_transient(options, || self.storage.get_pipe_data(pipe, &batch_bounds))
                .await?;

            let unique_columns = pipe.unique_columns();
            let partition = filter::partition(enforced, &existing, &unique_columns, NullIndicesPolicy::NullsNeverMatch);
            let (batch_inserted, batch_updated) = (partition.unseen.len(), partition.update.len());
            let delta = partition.delta();

            if !delta.is_empty() {
                self.retry_transient(options, || self.storage.sync_pipe(pipe, delta.clone())).await?;
            }

            total_inserted += batch_inserted;
            total_updated += batch_updated;
            batches_processed += 1;

            if let Some(newest) = self.storage.get_sync_time(pipe, true).await? {
                bounds.begin = Some(render_bound(&newest));
            }

            debug!(pipe = %pipe.key, batch_inserted, batch_updated, "processed batch");
        }

        self.hooks.run_post(pipe).await;
        info!(pipe = %pipe.key, total_inserted, total_updated, batches_processed, "sync complete");
        Ok(SuccessTuple::ok(format!(
            "synced pipe '{}': {total_inserted} inserted, {total_updated} updated across {batches_processed} batch(es)",
            pipe.key
        )))
    }

    /// Retries `f` while it returns a `transient`-kind error, with
    /// exponential backoff capped at `retry.max_delay`. Any other error
    /// kind (schema, integrity, ...) propagates immediately -- per §4.6,
    /// only transient failures are worth retrying.
    async fn retry_transient<F, Fut, T>(&self, options: &SyncOptions, mut f: F) -> Result<T, McError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, McError>>,
    {
        let mut attempt = 0u32;
        loop {
            match f().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt + 1 < self.retry.max_attempts => {
                    attempt += 1;
                    let delay = (self.retry.base_delay * 2u32.pow(attempt.saturating_sub(1)))
                        .min(self.retry.max_delay);
                    warn!(attempt, ?delay, error = %err, "retrying after transient error");
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = options.cancel.cancelled() => return Err(McError::cancelled()),
                    }
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// The inclusive min/max value of `column` across `batch`, used to bound
/// the existing-rows read-back to the range the incoming batch could
/// possibly collide with.
fn datetime_span(batch: &crate::row::Batch, column: &str) -> TimeBounds {
    let mut begin: Option<Value> = None;
    let mut end: Option<Value> = None;
    for row in batch {
        let Some(value) = row.get(column) else { continue };
        if value.is_null() {
            continue;
        }
        begin = Some(match begin {
            None => value.clone(),
            Some(current) => if datetime_less(value, &current) { value.clone() } else { current },
        });
        end = Some(match end {
            None => value.clone(),
            Some(current) => if datetime_less(&current, value) { value.clone() } else { current },
        });
    }
    TimeBounds { begin, end }
}

fn datetime_less(a: &Value, b: &Value) -> bool {
    use crate::row::Value::*;
    match (a, b) {
        (DateTimeNaive(x), DateTimeNaive(y)) => x < y,
        (DateTimeUtc(x), DateTimeUtc(y)) => x < y,
        (DateTimeZoned(x), DateTimeZoned(y)) => x < y,
        _ => false,
    }
}

fn render_bound(value: &Value) -> String {
    match value {
        Value::DateTimeNaive(dt) => dt.to_string(),
        Value::DateTimeUtc(dt) => dt.to_rfc3339(),
        Value::DateTimeZoned(dt) => dt.to_rfc3339(),
        other => format!("{other:?}"),
    }
}
