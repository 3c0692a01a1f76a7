//! The [`CheckpointSaver`] trait: the storage abstraction the executor runtime
//! persists run state through.
//!
//! Implementors provide durable (or in-memory) storage for checkpoints keyed
//! by `thread_id`. The runtime calls `save` after every superstep and at every
//! `interruptBefore` gate, and calls `latest` at the start of `resume` to
//! hydrate state. The trait assumes **at-least-once** durability: a saver may
//! hand back a duplicate of the most recently written checkpoint on resume,
//! and callers must tolerate that.
//!
//! # Example
//!
//! ```rust,ignore
//! use graphflow_checkpoint::{CheckpointSaver, InMemoryCheckpointSaver, CheckpointMetadata};
//! use serde_json::json;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let saver = InMemoryCheckpointSaver::new();
//! saver.setup().await?;
//!
//! let config = saver
//!     .save("thread-1", None, json!({"count": 1}), CheckpointMetadata::new(), "plan-hash")
//!     .await?;
//!
//! let tuple = saver.latest("thread-1").await?.unwrap();
//! assert_eq!(tuple.checkpoint.state, json!({"count": 1}));
//! # Ok(())
//! # }
//! ```

use crate::checkpoint::{Checkpoint, CheckpointConfig, CheckpointMetadata, CheckpointTuple};
use crate::error::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde_json::Value;

/// A lazy sequence of checkpoints, newest first.
pub type CheckpointStream = BoxStream<'static, Result<CheckpointTuple>>;

/// Storage backend for run checkpoints.
///
/// All methods are async to accommodate out-of-process backends (Postgres,
/// Redis, object storage, ...). The in-memory implementation in
/// [`crate::memory::InMemoryCheckpointSaver`] is the reference backend used in
/// tests and examples.
#[async_trait]
pub trait CheckpointSaver: Send + Sync {
    /// Persist a new checkpoint for `thread_id`, returning a config that
    /// addresses it (for chaining as the next call's `parent_config`).
    ///
    /// `parent_config` should be the config returned by the previous `save`
    /// call on this thread, or `None` for the first checkpoint of a run.
    async fn save(
        &self,
        thread_id: &str,
        parent_config: Option<&CheckpointConfig>,
        state: Value,
        metadata: CheckpointMetadata,
        plan_hash: &str,
    ) -> Result<CheckpointConfig> {
        self.save_with_cursor(thread_id, parent_config, None, state, metadata, plan_hash)
            .await
    }

    /// Same as `save`, but also stamps the id of the node that just completed.
    /// This is the method implementors provide; `save` forwards to it with
    /// `node_cursor = None`.
    async fn save_with_cursor(
        &self,
        thread_id: &str,
        parent_config: Option<&CheckpointConfig>,
        node_cursor: Option<&str>,
        state: Value,
        metadata: CheckpointMetadata,
        plan_hash: &str,
    ) -> Result<CheckpointConfig>;

    /// Retrieve the most recent checkpoint for `thread_id`, if any.
    async fn latest(&self, thread_id: &str) -> Result<Option<CheckpointTuple>>;

    /// Retrieve a specific checkpoint by its full config.
    async fn get(&self, config: &CheckpointConfig) -> Result<Option<Checkpoint>> {
        Ok(self.get_tuple(config).await?.map(|t| t.checkpoint))
    }

    /// Retrieve a specific checkpoint tuple by config.
    async fn get_tuple(&self, config: &CheckpointConfig) -> Result<Option<CheckpointTuple>>;

    /// List checkpoints for a thread, most recent first, capped at `limit`.
    async fn list(&self, thread_id: &str, limit: Option<usize>) -> Result<CheckpointStream>;

    /// Delete all checkpoints for a thread.
    async fn delete_thread(&self, thread_id: &str) -> Result<()>;

    /// Idempotent bootstrap (create tables/indices/etc). No-op by default.
    async fn setup(&self) -> Result<()> {
        Ok(())
    }
}
