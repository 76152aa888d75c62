//! Pipe lifecycle operations (register/edit/clear/drop/delete), each a
//! thin, logged wrapper over the `InstanceStorage` (C4) the pipe's
//! instance connector resolves to. Kept separate from `sync` (C7) --
//! these are one-shot metadata/table operations, not the fetch-coerce-
//! filter-write loop.

use tracing::instrument;

use super::Pipe;
use crate::error::McError;
use crate::storage::{InstanceStorage, TimeBounds};
use crate::success::SuccessTuple;

impl Pipe {
    #[instrument(skip(self, storage))]
    pub async fn register(&self, storage: &dyn InstanceStorage) -> Result<SuccessTuple, McError> {
        storage.register_pipe(self).await
    }

    #[instrument(skip(self, storage))]
    pub async fn edit(&self, storage: &dyn InstanceStorage) -> Result<SuccessTuple, McError> {
        storage.edit_pipe(self).await
    }

    pub async fn exists(&self, storage: &dyn InstanceStorage) -> Result<bool, McError> {
        storage.pipe_exists(&self.key).await
    }

    #[instrument(skip(self, storage))]
    pub async fn clear(
        &self,
        storage: &dyn InstanceStorage,
        bounds: &TimeBounds,
    ) -> Result<SuccessTuple, McError> {
        storage.clear_pipe(self, bounds).await
    }

    /// Drops the pipe's data table, then removes its metadata record --
    /// the full teardown the original calls `pipe.drop()` followed by
    /// removing it from the pipes table entirely.
    #[instrument(skip(self, storage))]
    pub async fn delete(&self, storage: &dyn InstanceStorage) -> Result<SuccessTuple, McError> {
        storage.drop_pipe(self).await?;
        storage.delete_pipe(&self.key).await
    }

    /// Drops the data table but keeps the pipe registered (empty).
    #[instrument(skip(self, storage))]
    pub async fn drop_data(&self, storage: &dyn InstanceStorage) -> Result<SuccessTuple, McError> {
        storage.drop_pipe(self).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::{ConnectorKeys, ConnectorKind};
    use crate::pipe::PipeKey;
    use crate::storage::memory::MemoryInstance;
    use serde_json::json;

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
    async fn register_then_delete_round_trips() {
        let storage = MemoryInstance::new();
        let pipe = test_pipe();
        assert!(pipe.register(&storage).await.unwrap().is_ok());
        assert!(pipe.exists(&storage).await.unwrap());
        assert!(pipe.delete(&storage).await.unwrap().is_ok());
        assert!(!pipe.exists(&storage).await.unwrap());
    }
}
