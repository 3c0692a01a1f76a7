//! Compiled execution plan.
//!
//! A [`CompiledPlan`] is the immutable, runnable form of a [`crate::graph_def::GraphDefinition`]
//! produced by [`crate::compiler::compile`]. It carries the resolved adjacency
//! tables the executor runtime walks at run time, plus one [`NodeWrapper`] per
//! node wrapping the concrete [`NodeExecutor`] the executor registry resolved
//! for that node's kind.

use crate::error::Result;
use crate::graph_def::{GraphDefinition, NodeId, NodeKind};
use crate::node_result::NodeResult;
use crate::state::StateSchema;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Implemented once per node kind (agent, condition, http, ...); resolved by
/// the executor registry at compile time and invoked by the runtime at run
/// time through the owning [`NodeWrapper`].
#[async_trait]
pub trait NodeExecutor: Send + Sync {
    /// Run this node against the current materialized state, returning a
    /// delta (or Command, or structured Error) to apply through reducers.
    async fn execute(&self, state: &Value, run_config: &crate::runtime::RunConfig) -> Result<NodeResult>;

    /// State fields this node is declared to read, for diagnostics. Defaults
    /// to the empty list; concrete executors should override when they know
    /// their own reads beyond what the NodeDef declared.
    fn declared_reads(&self) -> Vec<String> {
        Vec::new()
    }

    /// State fields this node is declared to write, for diagnostics.
    fn declared_writes(&self) -> Vec<String> {
        Vec::new()
    }
}

/// Metadata the compiler attaches to every node, used by the runtime to
/// decide isolation scope and fallback wiring without re-walking the graph.
#[derive(Debug, Clone, Default)]
pub struct NodeMetadata {
    pub is_loop_body: bool,
    pub loop_owner_id: Option<NodeId>,
    pub is_parallel_branch: bool,
    pub fallback_target: Option<NodeId>,
    pub interrupt_before: bool,
    pub kind: Option<NodeKind>,
}

/// A compiled node: its executor plus the metadata the runtime needs to
/// schedule it correctly.
pub struct NodeWrapper {
    pub id: NodeId,
    pub executor: Arc<dyn NodeExecutor>,
    pub metadata: NodeMetadata,
    /// The node's raw declared configuration, kept around so the runtime's
    /// pre-hook can resolve data pills in `config["context"]` against live
    /// state before each execution (see `crate::variable_resolver`).
    pub config: HashMap<String, Value>,
}

impl NodeWrapper {
    pub fn new(id: impl Into<String>, executor: Arc<dyn NodeExecutor>, metadata: NodeMetadata) -> Self {
        Self {
            id: id.into(),
            executor,
            metadata,
            config: HashMap::new(),
        }
    }

    pub fn with_config(mut self, config: HashMap<String, Value>) -> Self {
        self.config = config;
        self
    }

    pub async fn execute(&self, state: &Value, run_config: &crate::runtime::RunConfig) -> Result<NodeResult> {
        self.executor.execute(state, run_config).await
    }
}

/// Expected-task-count policy for a fan-in barrier node. See Open Question:
/// fan-in barrier identity is config, not inferred, when predecessors are
/// themselves conditional.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpectedTasks {
    /// Infer from the number of incoming static edges at compile time.
    Auto,
    /// A fixed expected count regardless of incoming edge count.
    Fixed(usize),
    /// Determined dynamically at run time (e.g. forEach over a runtime-sized list).
    Dynamic,
}

/// The compiled, immutable form of a [`GraphDefinition`].
pub struct CompiledPlan {
    /// Roots: nodes with no incoming normal edge.
    pub start_node_ids: Vec<NodeId>,
    /// One wrapper per node, keyed by node id.
    pub node_wrappers: HashMap<NodeId, NodeWrapper>,
    /// Normal-edge successors per source node, in declaration order.
    pub static_successors: HashMap<NodeId, Vec<NodeId>>,
    /// Conditional successors: source -> routeKey -> target, plus an optional default.
    pub conditional_successors: HashMap<NodeId, ConditionalTable>,
    /// Materialized state schema combining built-in execution fields with user fields.
    pub state_schema: Arc<StateSchema>,
    /// Expected upstream task count for each fan-in barrier node.
    pub expected_tasks: HashMap<NodeId, ExpectedTasks>,
    /// Global fallback node, if configured.
    pub fallback_node_id: Option<NodeId>,
    /// Hash of the [`GraphDefinition`] this plan was compiled from; stamped on
    /// every checkpoint so a resume can detect a shape mismatch.
    pub plan_hash: String,
}

/// Route-key -> target table for a conditional node, plus an optional default target.
#[derive(Debug, Clone, Default)]
pub struct ConditionalTable {
    pub routes: HashMap<String, NodeId>,
    pub default: Option<NodeId>,
}

impl CompiledPlan {
    /// Resolve the successor(s) of `node_id` given its route decision (if any).
    /// `route_decision` is ignored for nodes with only static successors.
    pub fn successors(&self, node_id: &str, route_decision: Option<&str>) -> Result<Vec<NodeId>> {
        if let Some(table) = self.conditional_successors.get(node_id) {
            if let Some(decision) = route_decision {
                if let Some(target) = table.routes.get(decision) {
                    return Ok(vec![target.clone()]);
                }
            }
            if let Some(default) = &table.default {
                return Ok(vec![default.clone()]);
            }
            return Err(crate::error::GraphError::Validation(format!(
                "node '{node_id}' has no route for decision {route_decision:?} and no default route"
            )));
        }

        Ok(self.static_successors.get(node_id).cloned().unwrap_or_default())
    }

    pub fn node(&self, node_id: &str) -> Option<&NodeWrapper> {
        self.node_wrappers.get(node_id)
    }

    pub fn is_fan_out(&self, node_id: &str) -> bool {
        self.static_successors.get(node_id).map(|s| s.len() > 1).unwrap_or(false)
            && !self.conditional_successors.contains_key(node_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::StateSchema;

    fn empty_plan() -> CompiledPlan {
        CompiledPlan {
            start_node_ids: vec!["a".into()],
            node_wrappers: HashMap::new(),
            static_successors: HashMap::new(),
            conditional_successors: HashMap::new(),
            state_schema: Arc::new(StateSchema::new()),
            expected_tasks: HashMap::new(),
            fallback_node_id: None,
            plan_hash: "h".into(),
        }
    }

    #[test]
    fn successors_falls_back_to_default_route() {
        let mut plan = empty_plan();
        let mut table = ConditionalTable::default();
        table.routes.insert("true".into(), "hi".into());
        table.default = Some("lo".into());
        plan.conditional_successors.insert("c".into(), table);

        assert_eq!(plan.successors("c", Some("true")).unwrap(), vec!["hi".to_string()]);
        assert_eq!(plan.successors("c", Some("unknown")).unwrap(), vec!["lo".to_string()]);
    }

    #[test]
    fn successors_errors_without_default_or_match() {
        let mut plan = empty_plan();
        let mut table = ConditionalTable::default();
        table.routes.insert("true".into(), "hi".into());
        plan.conditional_successors.insert("c".into(), table);

        assert!(plan.successors("c", Some("false")).is_err());
    }

    #[test]
    fn is_fan_out_detects_multi_static_successor_non_routing_node() {
        let mut plan = empty_plan();
        plan.static_successors.insert("s".into(), vec!["p1".into(), "p2".into()]);
        assert!(plan.is_fan_out("s"));
    }
}
