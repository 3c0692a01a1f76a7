//! Node execution result types
//!
//! This module defines the result types that nodes can return from execution.
//! Nodes can return a simple state update, a Command for advanced control, or
//! a structured error that the executor can route through the fallback
//! machinery instead of unwinding the whole run.

use crate::command::Command;
use serde_json::Value;

/// Coarse classification of a node-level error, used to pick a fallback
/// strategy without string-matching the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NodeErrorKind {
    /// A call to an external system (HTTP endpoint, tool, LLM provider) failed.
    External,
    /// Authentication/credential failure.
    Auth,
    /// Invalid or missing parameters.
    Param,
    /// A user-supplied expression failed to evaluate.
    UserExpression,
    /// Anything else.
    Internal,
}

/// A structured error raised by a node, carrying enough context for the
/// executor's fallback engine to decide what to do next.
#[derive(Debug, Clone)]
pub struct NodeError {
    pub kind: NodeErrorKind,
    pub message: String,
    pub source_node_id: String,
}

impl NodeError {
    pub fn new(kind: NodeErrorKind, message: impl Into<String>, source_node_id: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source_node_id: source_node_id.into(),
        }
    }
}

/// Result that a node can return from execution.
///
/// Nodes can return:
/// - A simple state value (JSON) that will be merged into the graph state
/// - A Command for advanced control (update, goto, resume)
/// - A structured error that the executor routes through retry/fallback
///   before deciding whether to fail the run
///
/// # Example: Simple State Update
///
/// ```rust
/// use graphflow_core::NodeResult;
/// use serde_json::json;
///
/// let result = NodeResult::State(json!({"count": 42}));
/// ```
///
/// # Example: Command with Navigation
///
/// ```rust
/// use graphflow_core::{NodeResult, Command};
/// use serde_json::json;
///
/// let result = NodeResult::Command(
///     Command::new()
///         .with_update(json!({"status": "processed"}))
///         .with_goto("next_step")
/// );
/// ```
#[derive(Debug, Clone)]
pub enum NodeResult {
    /// Simple state value to be merged into graph state
    State(Value),

    /// Command with advanced control
    Command(Command),

    /// Structured error for the fallback engine to handle
    Error(NodeError),
}

impl NodeResult {
    /// Extract the state update from this result
    ///
    /// For State variant, returns the value directly.
    /// For Command variant, returns the command's update field.
    /// For Error, returns None.
    pub fn get_state_update(&self) -> Option<Value> {
        match self {
            NodeResult::State(value) => Some(value.clone()),
            NodeResult::Command(cmd) => cmd.update.clone(),
            NodeResult::Error(_) => None,
        }
    }

    /// Extract the Command if present
    pub fn get_command(&self) -> Option<&Command> {
        match self {
            NodeResult::Command(cmd) => Some(cmd),
            _ => None,
        }
    }

    /// Extract the NodeError if present
    pub fn get_error(&self) -> Option<&NodeError> {
        match self {
            NodeResult::Error(err) => Some(err),
            _ => None,
        }
    }

    /// Check if this result contains a goto directive
    pub fn has_goto(&self) -> bool {
        matches!(self, NodeResult::Command(cmd) if cmd.goto.is_some())
    }

    /// Check if this result contains a resume directive
    pub fn has_resume(&self) -> bool {
        matches!(self, NodeResult::Command(cmd) if cmd.resume.is_some())
    }

    /// Check if this result is an error
    pub fn is_error(&self) -> bool {
        matches!(self, NodeResult::Error(_))
    }

    /// Convert into a Command, creating one if needed. Errors convert into an
    /// empty command since they carry no state update or navigation intent;
    /// callers should check [`NodeResult::is_error`] first.
    pub fn into_command(self) -> Command {
        match self {
            NodeResult::State(value) => Command::new().with_update(value),
            NodeResult::Command(cmd) => cmd,
            NodeResult::Error(_) => Command::new(),
        }
    }
}

impl From<Value> for NodeResult {
    fn from(value: Value) -> Self {
        NodeResult::State(value)
    }
}

impl From<Command> for NodeResult {
    fn from(cmd: Command) -> Self {
        NodeResult::Command(cmd)
    }
}

impl From<NodeError> for NodeResult {
    fn from(err: NodeError) -> Self {
        NodeResult::Error(err)
    }
}
