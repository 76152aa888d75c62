//! # Scheduler & Worker Pool (C8)
//!
//! Runs a set of pipes in one of three modes (§4.6): one-shot (each pipe
//! synced exactly once), loop (sync, then immediately resync, until
//! stopped), or scheduled (each pipe's own `Schedule` string governs when
//! it runs next). Work is bounded by a fixed-size worker pool; each job
//! gets its own per-pipe timeout and can be cancelled cooperatively.
//!
//! Grounded on the teacher's `ExtractorRunner`/`ExtractorHandle` pair in
//! `extractor/runner.rs`: a `tokio::select!` loop driven by a control
//! channel, generalised here from "one extractor" to "a bounded pool
//! running many pipes' sync jobs concurrently" via a `tokio::sync::Semaphore`.

pub mod schedule;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::error::McError;
use crate::pipe::PipeKey;
use crate::success::SuccessTuple;
use crate::sync::orchestrator::{SyncOptions, SyncOrchestrator};
use schedule::Schedule;

/// How a pipe's schedule entry governs its run cadence.
pub enum Mode {
    /// Sync once and stop.
    OneShot,
    /// Sync repeatedly back-to-back with no delay, until cancelled.
    Loop,
    /// Sync according to a parsed `Schedule` string.
    Scheduled(Schedule),
}

pub struct ScheduledPipe {
    pub key: PipeKey,
    pub mode: Mode,
    pub timeout: Duration,
}

/// Bounds how many pipe syncs run concurrently, mirroring the teacher's
/// one-handle-per-extractor model but capped rather than unbounded.
pub struct Scheduler {
    orchestrator: Arc<SyncOrchestrator>,
    permits: Arc<Semaphore>,
    cancel: CancellationToken,
}

impl Scheduler {
    pub fn new(orchestrator: Arc<SyncOrchestrator>, pool_size: usize) -> Self {
        Self {
            orchestrator,
            permits: Arc::new(Semaphore::new(pool_size.max(1))),
            cancel: CancellationToken::new(),
        }
    }

    pub fn cancel_handle(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Runs every entry in `pipes` to completion, in the sense each mode
    /// defines: one-shot pipes run once, loop/scheduled pipes run until
    /// `cancel` fires. Returns the last `SuccessTuple` each pipe produced.
    #[instrument(skip(self, pipes))]
    pub async fn run(&self, pipes: Vec<ScheduledPipe>) -> HashMap<PipeKey, Result<SuccessTuple, McError>> {
        let mut handles = Vec::with_capacity(pipes.len());
        for entry in pipes {
            let orchestrator = Arc::clone(&self.orchestrator);
            let permits = Arc::clone(&self.permits);
            let cancel = self.cancel.clone();
            handles.push(tokio::spawn(async move {
                let key = entry.key.clone();
                let result = run_one(orchestrator, permits, cancel, entry).await;
                (key, result)
            }));
        }

        let mut results = HashMap::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok((key, result)) => {
                    results.insert(key, result);
                }
                Err(join_err) => {
                    error!(error = %join_err, "scheduler worker panicked");
                }
            }
        }
        results
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

async fn run_one(
    orchestrator: Arc<SyncOrchestrator>,
    permits: Arc<Semaphore>,
    cancel: CancellationToken,
    entry: ScheduledPipe,
) -> Result<SuccessTuple, McError> {
    match entry.mode {
        Mode::OneShot => run_job(&orchestrator, &permits, &cancel, &entry.key, entry.timeout).await,
        Mode::Loop => {
            let mut last = Err(McError::internal("loop mode exited before any run"));
            while !cancel.is_cancelled() {
                last = run_job(&orchestrator, &permits, &cancel, &entry.key, entry.timeout).await;
                if let Err(err) = &last {
                    warn!(pipe = %entry.key, error = %err, "loop iteration failed, continuing");
                }
            }
            last
        }
        Mode::Scheduled(schedule) => {
            let mut last = Err(McError::internal("scheduled mode exited before any run"));
            let mut emitted = 0usize;
            const BATCH: usize = 128;
            while !cancel.is_cancelled() {
                let batch = schedule.next_occurrences(emitted + BATCH);
                let Some(targets) = batch.get(emitted..) else { break };
                if targets.is_empty() {
                    break;
                }
                for target in targets {
                    if cancel.is_cancelled() {
                        break;
                    }
                    if let Some(delay) = delay_until(*target) {
                        tokio::select! {
                            _ = tokio::time::sleep(delay) => {}
                            _ = cancel.cancelled() => break,
                        }
                    }
                    last = run_job(&orchestrator, &permits, &cancel, &entry.key, entry.timeout).await;
                    emitted += 1;
                }
            }
            last
        }
    }
}

fn delay_until(target: chrono::NaiveDateTime) -> Option<Duration> {
    let now = chrono::Utc::now().naive_utc();
    let delta = target.signed_duration_since(now);
    delta.to_std().ok()
}

#[instrument(skip(orchestrator, permits, cancel))]
async fn run_job(
    orchestrator: &Arc<SyncOrchestrator>,
    permits: &Arc<Semaphore>,
    cancel: &CancellationToken,
    key: &PipeKey,
    per_pipe_timeout: Duration,
) -> Result<SuccessTuple, McError> {
    let _permit = permits.acquire().await.map_err(|_| McError::internal("worker pool closed"))?;
    if cancel.is_cancelled() {
        return Err(McError::cancelled());
    }
    info!(pipe = %key, "starting sync job");
    let options = SyncOptions { cancel: cancel.clone(), ..Default::default() };
    match timeout(per_pipe_timeout, orchestrator.sync(key, options)).await {
        Ok(result) => result,
        Err(_) => Err(McError::timeout(per_pipe_timeout.as_secs())),
    }
}
