//! Pre-/post-sync hook registry (§4.6 step 1, §7). A hook is an async
//! callback run before fetch or after write; hooks observe but don't see
//! or alter batch contents -- that's what `FetchConnector`/`InstanceStorage`
//! are for. A failing hook, pre or post, is logged and dropped rather than
//! aborting the sync (§7): hooks are side effects of a sync, not gates on it.

use std::sync::Arc;

use futures::future::BoxFuture;

use crate::error::McError;
use crate::pipe::Pipe;

pub type Hook = Arc<dyn Fn(&Pipe) -> BoxFuture<'static, Result<(), McError>> + Send + Sync>;

#[derive(Clone, Default)]
pub struct HookRegistry {
    pre: Vec<Hook>,
    post: Vec<Hook>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_pre(&mut self, hook: Hook) {
        self.pre.push(hook);
    }

    pub fn add_post(&mut self, hook: Hook) {
        self.post.push(hook);
    }

    /// Runs every pre-hook in registration order, logging but not
    /// propagating individual failures -- per §7, a failing pre-hook does
    /// not abort the sync it was meant to precede.
    pub async fn run_pre(&self, pipe: &Pipe) {
        for hook in &self.pre {
            if let Err(err) = hook(pipe).await {
                tracing::warn!(pipe = %pipe.key, error = %err, "pre-sync hook failed");
            }
        }
    }

    /// Runs every post-hook, logging but not propagating individual
    /// failures -- the sync already succeeded by the time post-hooks run,
    /// so a post-hook problem shouldn't retroactively fail it.
    pub async fn run_post(&self, pipe: &Pipe) {
        for hook in &self.post {
            if let Err(err) = hook(pipe).await {
                tracing::warn!(pipe = %pipe.key, error = %err, "post-sync hook failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::{ConnectorKeys, ConnectorKind};
    use crate::pipe::PipeKey;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn test_pipe() -> Pipe {
        let key = PipeKey::new(
            ConnectorKeys::new(ConnectorKind::Sql, "main"),
            "temperature",
            None,
            ConnectorKeys::new(ConnectorKind::Sql, "local"),
        )
        .unwrap();
        Pipe::new(key, json!({}))
    }

    #[tokio::test]
    async fn pre_hook_failure_does_not_stop_later_hooks() {
        let mut registry = HookRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = Arc::clone(&calls);
        registry.add_pre(Arc::new(move |_pipe| {
            let calls = Arc::clone(&calls_clone);
            Box::pin(async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(McError::internal("boom"))
            })
        }));
        let calls_clone2 = Arc::clone(&calls);
        registry.add_pre(Arc::new(move |_pipe| {
            let calls = Arc::clone(&calls_clone2);
            Box::pin(async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        }));

        let pipe = test_pipe();
        registry.run_pre(&pipe).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
