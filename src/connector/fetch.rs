//! # Fetch Contract (C5)
//!
//! The boundary between "however a connector gets raw rows" and the rest
//! of the sync pipeline (§4.4). Grounded on the teacher's
//! `extractor::MessageSender<M>` trait in `extractor/runner.rs`: an async
//! trait object the orchestrator drives without knowing which concrete
//! backend (chain/connector) is behind it.

use async_trait::async_trait;

use crate::error::McError;
use crate::row::RawBatch;

/// Optional bounds narrowing a fetch to a time range, as passed through
/// from the sync orchestrator's `begin`/`end` parameters (§4.4 point 2).
#[derive(Debug, Clone, Default)]
pub struct FetchBounds {
    pub begin: Option<String>,
    pub end: Option<String>,
}

/// A source of raw, not-yet-typed rows for one pipe. Implementations
/// live behind each connector kind (SQL query, API poll, plugin
/// callback); none are backed by this trait's own default methods, which
/// exist only to keep simple connectors from writing boilerplate.
#[async_trait]
pub trait FetchConnector: Send + Sync {
    /// Pulls the next batch of raw rows. Returning `Ok(None)` signals
    /// end-of-data for this fetch call (not necessarily end-of-pipe --
    /// the orchestrator may call `fetch` again on the next scheduled run).
    async fn fetch(&self, bounds: &FetchBounds) -> Result<Option<RawBatch>, McError>;

    /// A human-readable name for logging/error messages; connectors with
    /// only one reasonable name can rely on the default.
    fn name(&self) -> &str {
        "fetch_connector"
    }
}
