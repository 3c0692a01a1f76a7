//! In-memory [`CheckpointSaver`] for development, tests, and single-process runs.
//!
//! Stores every checkpoint ever written, per thread, in an `Arc<RwLock<_>>`.
//! Data does not survive process restart; use a durable backend (not shipped
//! here) for that.

use crate::checkpoint::{Checkpoint, CheckpointConfig, CheckpointMetadata, CheckpointTuple};
use crate::error::{CheckpointError, Result};
use crate::traits::{CheckpointSaver, CheckpointStream};
use async_trait::async_trait;
use futures::stream;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
struct Entry {
    checkpoint: Checkpoint,
    metadata: CheckpointMetadata,
    config: CheckpointConfig,
    parent_config: Option<CheckpointConfig>,
}

type Storage = Arc<RwLock<HashMap<String, Vec<Entry>>>>;

/// Reference [`CheckpointSaver`] implementation backed by an in-memory map.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCheckpointSaver {
    storage: Storage,
}

impl InMemoryCheckpointSaver {
    pub fn new() -> Self {
        Self {
            storage: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn thread_count(&self) -> usize {
        self.storage.read().await.len()
    }

    pub async fn checkpoint_count(&self) -> usize {
        self.storage.read().await.values().map(|v| v.len()).sum()
    }

    pub async fn clear(&self) {
        self.storage.write().await.clear();
    }
}

#[async_trait]
impl CheckpointSaver for InMemoryCheckpointSaver {
    async fn save_with_cursor(
        &self,
        thread_id: &str,
        parent_config: Option<&CheckpointConfig>,
        node_cursor: Option<&str>,
        state: Value,
        metadata: CheckpointMetadata,
        plan_hash: &str,
    ) -> Result<CheckpointConfig> {
        let mut checkpoint = Checkpoint::new(thread_id, state, plan_hash);
        if let Some(cursor) = node_cursor {
            checkpoint = checkpoint.with_node_cursor(cursor);
        }

        let config = CheckpointConfig::new(thread_id).with_checkpoint_id(checkpoint.id.clone());

        let entry = Entry {
            checkpoint,
            metadata,
            config: config.clone(),
            parent_config: parent_config.cloned(),
        };

        let mut storage = self.storage.write().await;
        storage.entry(thread_id.to_string()).or_default().push(entry);
        Ok(config)
    }

    async fn latest(&self, thread_id: &str) -> Result<Option<CheckpointTuple>> {
        let storage = self.storage.read().await;
        Ok(storage.get(thread_id).and_then(|entries| entries.last()).map(|e| {
            let mut tuple = CheckpointTuple::new(e.config.clone(), e.checkpoint.clone(), e.metadata.clone());
            if let Some(parent) = &e.parent_config {
                tuple = tuple.with_parent_config(parent.clone());
            }
            tuple
        }))
    }

    async fn get_tuple(&self, config: &CheckpointConfig) -> Result<Option<CheckpointTuple>> {
        let thread_id = config
            .thread_id
            .as_ref()
            .ok_or_else(|| CheckpointError::Invalid("thread_id is required".to_string()))?;

        let storage = self.storage.read().await;
        let Some(entries) = storage.get(thread_id) else {
            return Ok(None);
        };

        let found = match &config.checkpoint_id {
            Some(id) => entries.iter().find(|e| &e.checkpoint.id == id),
            None => entries.last(),
        };

        Ok(found.map(|e| {
            let mut tuple = CheckpointTuple::new(e.config.clone(), e.checkpoint.clone(), e.metadata.clone());
            if let Some(parent) = &e.parent_config {
                tuple = tuple.with_parent_config(parent.clone());
            }
            tuple
        }))
    }

    async fn list(&self, thread_id: &str, limit: Option<usize>) -> Result<CheckpointStream> {
        let storage = self.storage.read().await;
        let mut results: Vec<Result<CheckpointTuple>> = Vec::new();

        if let Some(entries) = storage.get(thread_id) {
            for entry in entries.iter().rev() {
                let mut tuple =
                    CheckpointTuple::new(entry.config.clone(), entry.checkpoint.clone(), entry.metadata.clone());
                if let Some(parent) = &entry.parent_config {
                    tuple = tuple.with_parent_config(parent.clone());
                }
                results.push(Ok(tuple));
                if limit.is_some_and(|l| results.len() >= l) {
                    break;
                }
            }
        }

        Ok(Box::pin(stream::iter(results)))
    }

    async fn delete_thread(&self, thread_id: &str) -> Result<()> {
        self.storage.write().await.remove(thread_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::CheckpointSource;
    use futures::StreamExt;
    use serde_json::json;

    #[tokio::test]
    async fn save_then_latest_round_trips_state() {
        let saver = InMemoryCheckpointSaver::new();
        saver.setup().await.unwrap();

        let config = saver
            .save(
                "thread-1",
                None,
                json!({"count": 1}),
                CheckpointMetadata::new().with_source(CheckpointSource::Loop),
                "plan-hash-1",
            )
            .await
            .unwrap();
        assert!(config.checkpoint_id.is_some());

        let tuple = saver.latest("thread-1").await.unwrap().unwrap();
        assert_eq!(tuple.checkpoint.state, json!({"count": 1}));
        assert_eq!(tuple.checkpoint.plan_hash, "plan-hash-1");
    }

    #[tokio::test]
    async fn list_returns_newest_first_capped_at_limit() {
        let saver = InMemoryCheckpointSaver::new();
        for i in 0..5 {
            saver
                .save("thread-1", None, json!({"step": i}), CheckpointMetadata::new().with_step(i), "h")
                .await
                .unwrap();
        }

        let stream = saver.list("thread-1", Some(2)).await.unwrap();
        let results: Vec<_> = stream.collect().await;
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].as_ref().unwrap().checkpoint.state, json!({"step": 4}));
        assert_eq!(results[1].as_ref().unwrap().checkpoint.state, json!({"step": 3}));
    }

    #[tokio::test]
    async fn delete_thread_clears_entries() {
        let saver = InMemoryCheckpointSaver::new();
        saver.save("thread-1", None, json!({}), CheckpointMetadata::new(), "h").await.unwrap();
        assert_eq!(saver.thread_count().await, 1);

        saver.delete_thread("thread-1").await.unwrap();
        assert_eq!(saver.thread_count().await, 0);
        assert!(saver.latest("thread-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn get_tuple_by_specific_checkpoint_id() {
        let saver = InMemoryCheckpointSaver::new();
        let first = saver.save("t", None, json!({"v": 1}), CheckpointMetadata::new(), "h").await.unwrap();
        saver.save("t", Some(&first), json!({"v": 2}), CheckpointMetadata::new(), "h").await.unwrap();

        let tuple = saver.get_tuple(&first).await.unwrap().unwrap();
        assert_eq!(tuple.checkpoint.state, json!({"v": 1}));
    }
}
