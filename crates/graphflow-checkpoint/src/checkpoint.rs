//! Core checkpoint data structures for state persistence and resume.
//!
//! A checkpoint is a snapshot of one run's materialized `State`, the id of the
//! last node that completed (`node_cursor`), and the hash of the compiled plan
//! that produced it. The `plan_hash` lets a saver refuse to resume a thread
//! against a graph definition that has since changed shape.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

/// Checkpoint ID type.
pub type CheckpointId = String;

/// Origin of a checkpoint write.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointSource {
    /// Checkpoint created from the initial input to `invoke`/`stream`.
    Input,
    /// Checkpoint created after a superstep completed.
    Loop,
    /// Checkpoint created from an external state update between runs.
    Update,
}

/// Metadata associated with a checkpoint.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CheckpointMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<CheckpointSource>,

    /// Superstep number; -1 for the input checkpoint, 0.. for loop checkpoints.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<i64>,

    /// Id of the immediate parent checkpoint, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,

    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

impl CheckpointMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_source(mut self, source: CheckpointSource) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_step(mut self, step: i64) -> Self {
        self.step = Some(step);
        self
    }

    pub fn with_parent_id(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }
}

/// A persisted snapshot of one run's state.
///
/// `plan_hash` is the compiler's hash of the `GraphDefinition` that was
/// compiled to produce the run; see [`crate::traits::CheckpointSaver`] for the
/// mismatch-on-resume rule this enables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub v: i32,
    pub id: CheckpointId,
    pub ts: DateTime<Utc>,
    pub thread_id: String,
    /// Id of the last node that completed before this checkpoint was written.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_cursor: Option<String>,
    /// Materialized state map at this point in the run.
    pub state: Value,
    /// Hash of the compiled plan that produced this state.
    pub plan_hash: String,
}

impl Checkpoint {
    pub const CURRENT_VERSION: i32 = 1;

    pub fn new(thread_id: impl Into<String>, state: Value, plan_hash: impl Into<String>) -> Self {
        Self {
            v: Self::CURRENT_VERSION,
            id: Uuid::new_v4().to_string(),
            ts: Utc::now(),
            thread_id: thread_id.into(),
            node_cursor: None,
            state,
            plan_hash: plan_hash.into(),
        }
    }

    pub fn with_node_cursor(mut self, node_id: impl Into<String>) -> Self {
        self.node_cursor = Some(node_id.into());
        self
    }
}

/// Identifies which checkpoint to operate on.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CheckpointConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkpoint_id: Option<CheckpointId>,
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

impl CheckpointConfig {
    pub fn new(thread_id: impl Into<String>) -> Self {
        Self {
            thread_id: Some(thread_id.into()),
            checkpoint_id: None,
            extra: HashMap::new(),
        }
    }

    pub fn with_checkpoint_id(mut self, checkpoint_id: impl Into<String>) -> Self {
        self.checkpoint_id = Some(checkpoint_id.into());
        self
    }
}

/// A checkpoint plus its config and metadata, as returned by `latest`/`list`.
#[derive(Debug, Clone)]
pub struct CheckpointTuple {
    pub config: CheckpointConfig,
    pub checkpoint: Checkpoint,
    pub metadata: CheckpointMetadata,
    pub parent_config: Option<CheckpointConfig>,
}

impl CheckpointTuple {
    pub fn new(config: CheckpointConfig, checkpoint: Checkpoint, metadata: CheckpointMetadata) -> Self {
        Self {
            config,
            checkpoint,
            metadata,
            parent_config: None,
        }
    }

    pub fn with_parent_config(mut self, parent_config: CheckpointConfig) -> Self {
        self.parent_config = Some(parent_config);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checkpoint_carries_plan_hash_and_cursor() {
        let cp = Checkpoint::new("t1", serde_json::json!({"a": 1}), "hash-abc")
            .with_node_cursor("nodeA");
        assert_eq!(cp.plan_hash, "hash-abc");
        assert_eq!(cp.node_cursor.as_deref(), Some("nodeA"));
        assert_eq!(cp.v, Checkpoint::CURRENT_VERSION);
    }

    #[test]
    fn metadata_builder() {
        let meta = CheckpointMetadata::new()
            .with_source(CheckpointSource::Loop)
            .with_step(3)
            .with_parent_id("parent-1");
        assert_eq!(meta.step, Some(3));
        assert_eq!(meta.parent_id.as_deref(), Some("parent-1"));
    }
}
