//! # graphflow-checkpoint - State Persistence for Graph Execution
//!
//! **Trait-based checkpoint abstractions and implementations** for persisting and restoring
//! graph execution state. This crate enables resume-after-interrupt, human-in-the-loop
//! workflows, and fault recovery for runs driven by `graphflow-core`.
//!
//! ## Overview
//!
//! A checkpoint is a snapshot of one thread's materialized `State`, captured after each
//! superstep (or at an `interruptBefore` gate). Checkpoints enable:
//!
//! - **Human-in-the-Loop** - Pause before a node, inspect state, resume with an update
//! - **Fault Recovery** - Resume a thread from the last successfully completed node
//! - **Audit Trails** - Walk a thread's full checkpoint history via `list()`
//!
//! ## Core Concepts
//!
//! ### 1. CheckpointSaver Trait
//!
//! The [`CheckpointSaver`] trait is the storage abstraction the executor runtime persists
//! through. Implementors provide:
//!
//! - **`save`/`save_with_cursor`** - Persist a new checkpoint, optionally stamping the
//!   id of the node that just completed
//! - **`latest`** - Load the most recent checkpoint for a thread (the hydrate-on-resume path)
//! - **`get`/`get_tuple`** - Load a specific checkpoint by config
//! - **`list`** - Walk a thread's checkpoint history, newest first
//! - **`delete_thread`** - Drop all checkpoints for a thread
//!
//! ### 2. Plan hash guard
//!
//! Every [`Checkpoint`] carries the `plan_hash` of the compiled graph that produced it.
//! A saver is free to reject a `resume` whose current plan hash doesn't match what's
//! persisted — see [`CheckpointError::PlanMismatch`] — since the graph shape may have
//! changed since the thread was last run.
//!
//! ### 3. Implementation strategy
//!
//! This crate ships [`InMemoryCheckpointSaver`] as the reference implementation, used in
//! tests and single-process deployments. For durable storage, implement [`CheckpointSaver`]
//! against your backend of choice (Postgres, SQLite, Redis, object storage, ...); the
//! [`serializer`] module's [`SerializerProtocol`] gives such backends a pluggable byte
//! encoding for the state blob.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use graphflow_checkpoint::{InMemoryCheckpointSaver, CheckpointSaver, CheckpointMetadata};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let saver = InMemoryCheckpointSaver::new();
//!     saver.setup().await?;
//!
//!     let config = saver
//!         .save("thread-123", None, json!({"count": 1}), CheckpointMetadata::new(), "plan-hash-abc")
//!         .await?;
//!     println!("saved checkpoint {:?}", config.checkpoint_id);
//!
//!     if let Some(tuple) = saver.latest("thread-123").await? {
//!         println!("resumed state: {}", tuple.checkpoint.state);
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`checkpoint`] - [`Checkpoint`], [`CheckpointConfig`], [`CheckpointMetadata`], [`CheckpointTuple`]
//! - [`traits`] - [`CheckpointSaver`] trait and [`CheckpointStream`]
//! - [`memory`] - [`InMemoryCheckpointSaver`] reference implementation
//! - [`serializer`] - [`SerializerProtocol`] for durable backends that need byte encoding
//! - [`error`] - [`CheckpointError`] types

pub mod checkpoint;
pub mod error;
pub mod memory;
pub mod serializer;
pub mod traits;

pub use checkpoint::{
    Checkpoint, CheckpointConfig, CheckpointId, CheckpointMetadata, CheckpointSource, CheckpointTuple,
};
pub use error::{CheckpointError, Result};
pub use memory::InMemoryCheckpointSaver;
pub use serializer::{BincodeSerializer, JsonSerializer, SerializerProtocol};
pub use traits::{CheckpointSaver, CheckpointStream};
