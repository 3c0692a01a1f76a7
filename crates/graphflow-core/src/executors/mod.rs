//! Built-in executors: one module per [`crate::graph_def::NodeKind`].
//!
//! Each executor reads its configuration off [`crate::graph_def::NodeDef::config`]
//! and is built by an [`crate::services::ExecutorFactory`] registered against
//! [`crate::services::ExecutorRegistry::with_builtins`]. They are ordinary
//! [`crate::plan::NodeExecutor`] implementations; nothing about them is
//! special-cased by the runtime beyond the metadata the compiler attaches.

mod agent;
mod aggregator;
mod condition;
mod direct_reply;
mod function;
mod http;
mod human_input;
mod json_parser;
mod loop_node;
mod tool_node;

pub use agent::AgentExecutor;
pub use aggregator::{AggregatorExecutor, CombineMethod, ErrorStrategy};
pub use condition::{ConditionAgentExecutor, ConditionExecutor, RouterNodeExecutor};
pub use direct_reply::DirectReplyExecutor;
pub use function::FunctionExecutor;
pub use http::HttpExecutor;
pub use human_input::HumanInputExecutor;
pub use json_parser::JsonParserExecutor;
pub use loop_node::LoopConditionExecutor;
pub use tool_node::ToolNodeExecutor;

use crate::error::Result;
use crate::graph_def::{NodeDef, NodeKind};
use crate::plan::NodeExecutor;
use crate::services::{ExecutorRegistry, Services};
use std::sync::Arc;

type BuildFn = fn(&NodeDef, &Services) -> Result<Arc<dyn NodeExecutor>>;

/// Registers graphflow's built-in executor for every [`NodeKind`]. Node
/// construction happens per-node at compile time, not once at startup, since
/// most executors close over that node's own config.
pub fn register_builtins(registry: &mut ExecutorRegistry) {
    let entries: &[(NodeKind, BuildFn)] = &[
        (NodeKind::Agent, agent::build as BuildFn),
        (NodeKind::CodeAgent, agent::build as BuildFn),
        (NodeKind::Condition, condition::build_condition as BuildFn),
        (NodeKind::ConditionAgent, condition::build_condition_agent as BuildFn),
        (NodeKind::RouterNode, condition::build_router as BuildFn),
        (NodeKind::LoopConditionNode, loop_node::build as BuildFn),
        (NodeKind::AggregatorNode, aggregator::build as BuildFn),
        (NodeKind::Http, http::build as BuildFn),
        (NodeKind::Tool, tool_node::build as BuildFn),
        (NodeKind::Function, function::build as BuildFn),
        (NodeKind::JsonParser, json_parser::build as BuildFn),
        (NodeKind::DirectReply, direct_reply::build as BuildFn),
        (NodeKind::HumanInput, human_input::build as BuildFn),
    ];
    for (kind, build) in entries {
        registry.register(*kind, Arc::new(*build));
    }
}

/// Reads a required string config value, erroring with a consistent message
/// across executors when it's missing or the wrong type.
pub(crate) fn required_str<'a>(
    config: &'a std::collections::HashMap<String, serde_json::Value>,
    node_id: &str,
    key: &str,
) -> crate::error::Result<&'a str> {
    config
        .get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| crate::error::GraphError::param(node_id, format!("missing required config field '{key}'")))
}

/// Reads an optional string config value.
pub(crate) fn optional_str<'a>(
    config: &'a std::collections::HashMap<String, serde_json::Value>,
    key: &str,
) -> Option<&'a str> {
    config.get(key).and_then(|v| v.as_str())
}
