//! Error types for graph compilation and execution.
//!
//! All errors implement `std::error::Error` via `thiserror`. The variant set maps
//! onto the taxonomy an executor surfaces to callers: failures that happen before
//! a run starts (`CompileError`), failures a node raises during a run
//! (`ExternalError`, `AuthError`, `ParamError`, `UserExpressionError`), failures the
//! runtime itself detects (`RecursionLimitError`, `AggregatedFailure`, `Cancelled`),
//! and a catch-all (`InternalError`) for anything else.
//!
//! # Example
//!
//! ```rust
//! use graphflow_core::error::GraphError;
//!
//! fn validate_input(data: &str) -> Result<(), GraphError> {
//!     if data.is_empty() {
//!         return Err(GraphError::Validation("input cannot be empty".to_string()));
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Matching errors
//!
//! ```rust
//! use graphflow_core::error::GraphError;
//!
//! fn describe(err: &GraphError) -> String {
//!     match err {
//!         GraphError::Interrupted { node, reason } => format!("paused at {node}: {reason}"),
//!         GraphError::NodeExecution { node, error } => format!("{node} failed: {error}"),
//!         GraphError::RecursionLimit { limit } => format!("recursion limit {limit} exceeded"),
//!         other => format!("{other}"),
//!     }
//! }
//! ```

use thiserror::Error;

/// Convenience result type using [`GraphError`].
pub type Result<T> = std::result::Result<T, GraphError>;

/// Comprehensive error type for graph compilation and execution.
#[derive(Error, Debug)]
pub enum GraphError {
    /// Graph definition failed compilation: a reference to a node/edge that
    /// doesn't exist, a schema that can't be built, a cycle where none is
    /// allowed, or any other static-shape problem caught before a run starts.
    #[error("graph compilation failed: {0}")]
    Validation(String),

    /// A node's executor raised an error during execution.
    #[error("node '{node}' execution failed: {error}")]
    NodeExecution {
        /// Name of the node that failed.
        node: String,
        /// Error message from node execution.
        error: String,
    },

    /// Generic execution error without a specific node context.
    #[error("execution failed: {0}")]
    Execution(String),

    /// Execution paused at an `interruptBefore` gate awaiting human input.
    /// Not itself a failure; the checkpoint taken at this point is the resume
    /// point once the caller supplies an update.
    #[error("execution interrupted at node '{node}': {reason}")]
    Interrupted {
        /// Node where execution was interrupted.
        node: String,
        /// Reason for the interrupt.
        reason: String,
    },

    /// State management error with optional node context.
    #[error("state error{}: {error}", node.as_ref().map(|n| format!(" in node '{n}'")).unwrap_or_default())]
    StateError {
        /// Optional node context where the error occurred.
        node: Option<String>,
        /// Error description.
        error: String,
    },

    /// State error without node context.
    #[error("state error: {0}")]
    State(String),

    /// A call to an external system a node depends on (HTTP endpoint, tool,
    /// LLM provider) failed.
    #[error("external call from node '{node}' failed: {message}")]
    ExternalError {
        /// Node that made the external call.
        node: String,
        /// Error message describing the failure.
        message: String,
    },

    /// A node's credentials or authentication step failed.
    #[error("authentication failed for node '{node}': {message}")]
    AuthError {
        node: String,
        message: String,
    },

    /// A node received a parameter that failed validation (missing required
    /// field, wrong type, out-of-range value).
    #[error("invalid parameters for node '{node}': {message}")]
    ParamError {
        node: String,
        message: String,
    },

    /// A user-supplied expression (condition, data-pill, transform) failed to
    /// evaluate.
    #[error("expression error{}: {message}", node.as_ref().map(|n| format!(" in node '{n}'")).unwrap_or_default())]
    UserExpressionError {
        node: Option<String>,
        message: String,
    },

    /// A fan-out step produced more than one failure; this wraps them all so
    /// callers can inspect every branch that failed rather than only the
    /// first one observed.
    #[error("{} of {} parallel tasks failed", errors.len(), total)]
    AggregatedFailure {
        errors: Vec<String>,
        total: usize,
    },

    /// A run exceeded its configured recursion (superstep) limit.
    #[error("recursion limit ({limit}) exceeded")]
    RecursionLimit { limit: u32 },

    /// A run was cancelled by its caller before completing.
    #[error("run cancelled")]
    Cancelled,

    /// Checkpoint persistence error. Wraps `graphflow_checkpoint::CheckpointError`.
    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] graphflow_checkpoint::CheckpointError),

    /// JSON serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parsing error, used when loading graph definitions from YAML.
    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Graph or node configuration error.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Operation exceeded its time limit.
    #[error("operation timed out after {duration_ms}ms: {operation}")]
    Timeout {
        operation: String,
        duration_ms: u64,
    },

    /// A bug in the runtime itself rather than in graph definition or node
    /// logic — should never surface in practice; if it does, it's worth a
    /// bug report against the runtime.
    #[error("internal error: {0}")]
    InternalError(String),

    /// Application-defined error not covered by other variants.
    #[error("{0}")]
    Custom(String),
}

impl GraphError {
    /// Create a node execution error with context.
    pub fn node_execution(node: impl Into<String>, error: impl Into<String>) -> Self {
        Self::NodeExecution {
            node: node.into(),
            error: error.into(),
        }
    }

    /// Create a state error with optional node context.
    pub fn state_error(node: Option<impl Into<String>>, error: impl Into<String>) -> Self {
        Self::StateError {
            node: node.map(|n| n.into()),
            error: error.into(),
        }
    }

    /// Create an interrupted error.
    pub fn interrupted(node: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Interrupted {
            node: node.into(),
            reason: reason.into(),
        }
    }

    /// Create an external-call error.
    pub fn external(node: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ExternalError {
            node: node.into(),
            message: message.into(),
        }
    }

    /// Create a param validation error.
    pub fn param(node: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ParamError {
            node: node.into(),
            message: message.into(),
        }
    }

    /// Create a user-expression error.
    pub fn user_expression(node: Option<impl Into<String>>, message: impl Into<String>) -> Self {
        Self::UserExpressionError {
            node: node.map(|n| n.into()),
            message: message.into(),
        }
    }

    /// Aggregate a batch of per-task failures from a fan-out step.
    pub fn aggregated(errors: Vec<String>, total: usize) -> Self {
        Self::AggregatedFailure { errors, total }
    }

    /// Returns true if this error represents a human-in-the-loop pause rather
    /// than a terminal failure.
    pub fn is_interrupt(&self) -> bool {
        matches!(self, Self::Interrupted { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_execution_formats_with_node_name() {
        let err = GraphError::node_execution("llm_call", "API timeout");
        assert_eq!(format!("{err}"), "node 'llm_call' execution failed: API timeout");
    }

    #[test]
    fn aggregated_failure_reports_counts() {
        let err = GraphError::aggregated(vec!["a".into(), "b".into()], 5);
        assert_eq!(format!("{err}"), "2 of 5 parallel tasks failed");
    }

    #[test]
    fn interrupted_is_not_a_terminal_failure() {
        let err = GraphError::interrupted("gate", "awaiting approval");
        assert!(err.is_interrupt());
        assert!(!GraphError::Cancelled.is_interrupt());
    }
}
