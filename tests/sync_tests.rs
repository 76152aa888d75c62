//! End-to-end coverage of the sync orchestrator (C7) over `MemoryInstance`
//! (C4): pre-hooks, incremental fetch, infer/enforce/filter/write, and the
//! transient-retry policy, driven the way a scheduler job would drive it.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use meerschaum_core::connector::fetch::{FetchBounds, FetchConnector};
use meerschaum_core::connector::{ConnectorKeys, ConnectorKind};
use meerschaum_core::error::McError;
use meerschaum_core::pipe::{Pipe, PipeKey};
use meerschaum_core::row::RawBatch;
use meerschaum_core::storage::memory::MemoryInstance;
use meerschaum_core::storage::InstanceStorage;
use meerschaum_core::sync::{RetryPolicy, SyncOptions, SyncOrchestrator};

fn test_key() -> PipeKey {
    PipeKey::new(
        ConnectorKeys::new(ConnectorKind::Api, "sensors"),
        "temperature",
        None,
        ConnectorKeys::new(ConnectorKind::Sql, "local"),
    )
    .unwrap()
}

/// Yields two fixed batches (keyed on whether `bounds.begin` has already
/// advanced past the first batch's rows), then reports done.
struct TwoBatchFetcher {
    calls: AtomicUsize,
}

#[async_trait]
impl FetchConnector for TwoBatchFetcher {
    async fn fetch(&self, bounds: &FetchBounds) -> Result<Option<RawBatch>, McError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if bounds.begin.is_some() || call > 0 {
            return Ok(None);
        }
        Ok(Some(vec![
            [
                ("device_id".to_string(), json!(1)),
                ("ts".to_string(), json!("2024-05-01T00:00:00Z")),
                ("reading".to_string(), json!(20.0)),
            ]
            .into_iter()
            .collect(),
            [
                ("device_id".to_string(), json!(2)),
                ("ts".to_string(), json!("2024-05-01T00:05:00Z")),
                ("reading".to_string(), json!(21.0)),
            ]
            .into_iter()
            .collect(),
        ]))
    }
}

/// Fails transiently the first `fail_times` calls, then succeeds with an
/// empty batch -- exercises `retry_transient`'s backoff path.
struct FlakyFetcher {
    remaining_failures: AtomicUsize,
}

#[async_trait]
impl FetchConnector for FlakyFetcher {
    async fn fetch(&self, _bounds: &FetchBounds) -> Result<Option<RawBatch>, McError> {
        let remaining = self.remaining_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.remaining_failures.fetch_sub(1, Ordering::SeqCst);
            return Err(McError::transient("upstream temporarily unavailable"));
        }
        Ok(None)
    }
}

async fn register(storage: &MemoryInstance, key: &PipeKey) {
    let pipe = Pipe::new(
        key.clone(),
        json!({"columns": {"datetime": "ts", "id": "device_id"}}),
    );
    storage.register_pipe(&pipe).await.unwrap();
}

#[tokio::test]
async fn sync_fetches_enforces_filters_and_writes_a_batch() {
    let storage = Arc::new(MemoryInstance::new());
    let key = test_key();
    register(&storage, &key).await;

    let mut orchestrator = SyncOrchestrator::new(storage.clone() as Arc<dyn InstanceStorage>);
    orchestrator.register_fetcher(
        key.connector_keys.clone(),
        Arc::new(TwoBatchFetcher { calls: AtomicUsize::new(0) }),
    );

    let result = orchestrator.sync(&key, SyncOptions::default()).await.unwrap();
    assert!(result.is_ok());

    let pipe = Pipe::new(key.clone(), storage.get_pipe_attributes(&key).await.unwrap().unwrap());
    let data = storage
        .get_pipe_data(&pipe, &meerschaum_core::storage::TimeBounds::default())
        .await
        .unwrap();
    assert_eq!(data.len(), 2);
}

#[tokio::test]
async fn sync_retries_transient_fetch_failures_then_succeeds() {
    let storage = Arc::new(MemoryInstance::new());
    let key = test_key();
    register(&storage, &key).await;

    let mut orchestrator = SyncOrchestrator::new(storage.clone() as Arc<dyn InstanceStorage>)
        .with_retry_policy(RetryPolicy {
            max_attempts: 5,
            base_delay: std::time::Duration::from_millis(1),
            max_delay: std::time::Duration::from_millis(5),
        });
    orchestrator.register_fetcher(
        key.connector_keys.clone(),
        Arc::new(FlakyFetcher { remaining_failures: AtomicUsize::new(2) }),
    );

    let result = orchestrator.sync(&key, SyncOptions::default()).await.unwrap();
    assert!(result.is_ok());
}

#[tokio::test]
async fn sync_fails_fast_when_no_fetcher_is_registered() {
    let storage = Arc::new(MemoryInstance::new());
    let key = test_key();
    register(&storage, &key).await;

    let orchestrator = SyncOrchestrator::new(storage as Arc<dyn InstanceStorage>);
    let err = orchestrator.sync(&key, SyncOptions::default()).await.unwrap_err();
    assert_eq!(err.kind(), meerschaum_core::ErrorKind::Connector);
}

#[tokio::test]
async fn sync_fails_when_pipe_is_not_registered() {
    let storage = Arc::new(MemoryInstance::new());
    let key = test_key();
    let orchestrator = SyncOrchestrator::new(storage as Arc<dyn InstanceStorage>);
    let err = orchestrator.sync(&key, SyncOptions::default()).await.unwrap_err();
    assert_eq!(err.kind(), meerschaum_core::ErrorKind::Integrity);
}

#[tokio::test]
async fn sync_dataframe_writes_a_caller_supplied_batch_without_a_fetcher() {
    let storage = Arc::new(MemoryInstance::new());
    let key = test_key();
    register(&storage, &key).await;

    // No fetcher registered at all -- sync_dataframe must not need one.
    let orchestrator = SyncOrchestrator::new(storage.clone() as Arc<dyn InstanceStorage>);

    let df = vec![[
        ("device_id".to_string(), json!(3)),
        ("ts".to_string(), json!("2024-05-02T00:00:00Z")),
        ("reading".to_string(), json!(19.5)),
    ]
    .into_iter()
    .collect()];

    let result = orchestrator.sync_dataframe(&key, df, SyncOptions::default()).await.unwrap();
    assert!(result.is_ok());

    let pipe = Pipe::new(key.clone(), storage.get_pipe_attributes(&key).await.unwrap().unwrap());
    let data = storage
        .get_pipe_data(&pipe, &meerschaum_core::storage::TimeBounds::default())
        .await
        .unwrap();
    assert_eq!(data.len(), 1);
}
