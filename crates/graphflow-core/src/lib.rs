//! # graphflow-core - Graph Execution Engine for Agent Workflows
//!
//! Compiles a declarative graph of agent/tool/routing nodes into a runnable
//! plan and drives it to completion with Pregel-style supersteps, fan-out/
//! fan-in concurrency, checkpointing, and human-in-the-loop interrupts.
//!
//! ## Overview
//!
//! `graphflow-core` sits underneath a graph-builder UI or YAML loader: it
//! never constructs graphs itself. Given a [`GraphDefinition`] it provides:
//!
//! - **Compilation** - [`compiler::compile`] validates node/edge references,
//!   state fields, and fallback wiring, and resolves every node to a
//!   concrete executor, producing a [`plan::CompiledPlan`].
//! - **Execution** - [`Runtime`] drives the compiled plan: superstep
//!   scheduling, bounded-concurrency fan-out, fan-in barriers, and
//!   `interruptBefore` gates.
//! - **State** - [`StateSchema`] applies per-field reducers
//!   (overwrite/append/merge/sum/messages-merge) to node output deltas.
//! - **Data pills** - [`variable_resolver`] rewrites `state.field`,
//!   `{NodeLabel.output}`, and `context.path` references embedded in node
//!   configuration against the live state, pre-execution.
//! - **Checkpointing** - durability is delegated to [`graphflow_checkpoint`];
//!   the runtime saves a checkpoint after every superstep.
//! - **Tracing** - [`trace::TraceSink`] receives a sanitized before/after
//!   snapshot and duration for every node execution.
//!
//! ## Core Concepts
//!
//! ### 1. GraphDefinition -> CompiledPlan
//!
//! A [`GraphDefinition`] is pure data: [`NodeDef`]s, [`EdgeDef`]s, and
//! [`StateFieldSpec`]s. [`compiler::compile`] turns it into an immutable
//! [`plan::CompiledPlan`] that the runtime can execute any number of times.
//! Compilation never performs I/O; it is a synchronous validation pass.
//!
//! ### 2. Pregel-style Execution
//!
//! [`Runtime::invoke`]/[`Runtime::resume`] follow a superstep loop:
//! - **Supersteps**: one round of node executions, bounded by `recursionLimit`.
//! - **Fan-out**: a node with multiple static successors and no routing
//!   table runs its branches concurrently, bounded by
//!   `parallel_branch_concurrency`.
//! - **Fan-in barrier**: an aggregator waits for every expected arrival
//!   before running, tracked via [`plan::ExpectedTasks`].
//! - **Checkpointing**: state is snapshotted after each superstep via the
//!   configured [`graphflow_checkpoint::CheckpointSaver`].
//!
//! ### 3. Human-in-the-Loop
//!
//! Any node with `interrupt_before` set (forced for [`NodeKind::HumanInput`])
//! halts the run before executing and checkpoints so a caller can inspect or
//! edit state and [`Runtime::resume`] later.
//!
//! ### 4. Error Handling & Fallback
//!
//! Node executors return a [`node_result::NodeResult`] rather than panicking
//! on a failed call; [`GraphError`] carries the taxonomy (`ExternalError`,
//! `AuthError`, `ParamError`, `UserExpressionError`, ...). If a node errors
//! and the plan (or the node) has a `fallback_target`, the runtime records
//! the error in state and routes to the fallback node instead of aborting.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use graphflow_core::{GraphDefinition, NodeDef, NodeKind, EdgeDef};
//! use graphflow_core::{compiler, ExecutorRegistry, Services, Runtime, RunConfig};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), graphflow_core::GraphError> {
//!     let def = GraphDefinition::new("greet", "Greet")
//!         .with_node(NodeDef::new("reply", NodeKind::DirectReply, "Reply")
//!             .with_config("template", serde_json::json!("Hello, {name}!")))
//!         .with_edge(EdgeDef::normal(graphflow_core::START, "reply"));
//!
//!     let services = Services::builder().build();
//!     let registry = ExecutorRegistry::with_builtins();
//!     let plan = compiler::compile(&def, &registry, &services)?;
//!
//!     let runtime = Runtime::new(Arc::new(plan));
//!     let config = RunConfig::new("thread-1");
//!     let result = runtime.invoke(serde_json::json!({"name": "Ada"}), &config).await?;
//!     println!("{:?}", result.state);
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//!                    ┌─────────────────────────────────────┐
//!                    │          GraphDefinition             │
//!                    │  nodes, edges, state_fields           │
//!                    └──────────────┬──────────────────────┘
//!                                   │ compiler::compile
//!                                   ▼
//!                    ┌─────────────────────────────────────┐
//!                    │            CompiledPlan              │
//!                    │  node_wrappers, successors, schema    │
//!                    └──────────────┬──────────────────────┘
//!                                   │
//!                                   ▼
//!                    ┌─────────────────────────────────────┐
//!                    │               Runtime                 │
//!                    │  • superstep loop  • fan-out/fan-in   │
//!                    │  • interrupt gates • fallback routing │
//!                    └──────────────┬──────────────────────┘
//!                                   │
//!                    ┌──────────────┴──────────────┐
//!                    ▼                             ▼
//!         ┌──────────────────────┐     ┌──────────────────────┐
//!         │    NodeExecutors     │     │  Checkpoint / Trace  │
//!         │  agent/tool/http/... │────▶│  Saver / TraceSink   │
//!         └──────────────────────┘     └──────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! ### Graph definition & compilation
//! - [`graph_def`] - [`GraphDefinition`], [`NodeDef`], [`EdgeDef`], state field specs
//! - [`compiler`] - validates and compiles a [`GraphDefinition`] into a [`plan::CompiledPlan`]
//! - [`plan`] - the compiled, runnable representation; [`plan::NodeExecutor`] trait
//! - [`services`] - [`ExecutorRegistry`], [`Services`], collaborator handles
//!
//! ### Execution
//! - [`runtime`] - [`Runtime`], [`RunConfig`], the superstep loop
//! - [`state`] - [`StateSchema`] and reducers (overwrite, append, merge, sum, messages-merge)
//! - [`node_result`] - [`node_result::NodeResult`], [`node_result::NodeError`]
//! - [`send`] - dynamic fan-out via [`send::Send`]
//! - [`command`] - [`Command`], `goto`/resume control flow
//! - [`interrupt`] - interrupt gates and resume state
//! - [`variable_resolver`] - data-pill resolution and validation
//! - [`expr`] - restricted boolean/arithmetic expression evaluator
//!
//! ### Node executors
//! - [`executors`] - the built-in executor set (agent, tool, http, condition, router,
//!   loop, aggregator, function, json_parser, direct_reply, human_input)
//!
//! ### Ambient
//! - [`error`] - [`GraphError`] taxonomy
//! - [`retry`] - [`retry::RetryPolicy`] with exponential backoff
//! - [`trace`] - [`trace::TraceSink`], sanitized before/after snapshots
//! - [`messages`] - chat message types and trimming/filtering utilities
//! - [`tool`] - tool abstractions invoked by the `tool` executor
//! - [`llm`] - chat model trait and request/response types consumed by the `agent` executor
//!
//! ## See Also
//!
//! - [`graphflow_checkpoint`] - checkpoint trait and implementations

pub mod command;
pub mod compiler;
pub mod error;
pub mod executors;
pub mod expr;
pub mod graph_def;
pub mod interrupt;
pub mod llm;
pub mod messages;
pub mod node_result;
pub mod plan;
pub mod retry;
pub mod runtime;
pub mod send;
pub mod services;
pub mod state;
pub mod tool;
pub mod trace;
pub mod variable_resolver;

pub use command::{Command, CommandGraph, GotoTarget, ResumeValue, PARENT};
pub use error::{GraphError, Result};
pub use graph_def::{EdgeDef, EdgeKind, GraphDefinition, NodeDef, NodeId, NodeKind, StateFieldSpec, StateFieldType, END, START};
pub use interrupt::{InterruptConfig, InterruptError, InterruptState, InterruptTracker, InterruptWhen};
pub use node_result::{NodeError, NodeErrorKind, NodeResult};
pub use plan::{CompiledPlan, ConditionalTable, ExpectedTasks, NodeExecutor, NodeMetadata, NodeWrapper};
pub use retry::{RetryPolicy, RetryState};
pub use runtime::{RunConfig, RunResult, Runtime};
pub use send::{ConditionalEdgeResult, Send};
pub use services::{ExecutorRegistry, LlmClientFactory, Services, ServicesBuilder};
pub use state::{AppendReducer, MergeReducer, MessagesMergeReducer, OverwriteReducer, Reducer, StateSchema, SumReducer};
pub use tool::{Tool, ToolCall, ToolCallResult, ToolError, ToolOutput, ToolRegistry, ToolResult, ToolRuntime};
pub use trace::{NodeTrace, SnapshotPolicy, TraceSink};
pub use messages::{
    add_message_likes, add_messages, convert_to_messages, filter_by_role, get_last_message, get_messages_by_id,
    merge_consecutive_messages, trim_messages, truncate_messages, ContentPart, Message, MessageContent, MessageLike,
    MessageRole, RemoveMessage, TrimOptions, TrimStrategy,
};
