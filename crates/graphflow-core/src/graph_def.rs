//! Declarative graph definition types.
//!
//! A [`GraphDefinition`] is the immutable description a collaborator (graph
//! builder UI, YAML loader, programmatic API) hands to the [`crate::compiler`]
//! to produce a [`crate::plan::CompiledPlan`]. Nothing in this module executes
//! anything; it is pure data.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// A node id is just a string handle, unique within a [`GraphDefinition`].
pub type NodeId = String;

/// The implicit start node: every root with no incoming normal edge is
/// reachable from here.
pub const START: &str = "__start__";
/// The implicit end node: a run with no further successors terminates here.
pub const END: &str = "__end__";

/// Executor kind a [`NodeDef`] resolves to via the executor registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Agent,
    CodeAgent,
    Condition,
    ConditionAgent,
    RouterNode,
    LoopConditionNode,
    AggregatorNode,
    Http,
    Tool,
    Function,
    JsonParser,
    DirectReply,
    HumanInput,
}

impl NodeKind {
    /// True for node kinds whose edges are matched by `routeKey`/`sourceHandleId`
    /// rather than fanned out unconditionally.
    pub fn is_routing(&self) -> bool {
        matches!(
            self,
            NodeKind::Condition | NodeKind::ConditionAgent | NodeKind::RouterNode | NodeKind::LoopConditionNode
        )
    }
}

/// A node in a [`GraphDefinition`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDef {
    pub id: NodeId,
    pub kind: NodeKind,
    pub label: String,
    /// Free-form key-value configuration (model handle, prompt, expression, URL, ...).
    #[serde(default)]
    pub config: HashMap<String, Value>,
    /// Declared state-field reads, for debugging/warnings. `["*"]` means all.
    #[serde(default)]
    pub reads: Vec<String>,
    /// Declared state-field writes, for debugging/warnings. `["*"]` means all.
    #[serde(default)]
    pub writes: Vec<String>,
    /// Human-in-the-loop gate: halt and checkpoint before this node runs.
    #[serde(default)]
    pub interrupt_before: bool,
}

impl NodeDef {
    pub fn new(id: impl Into<String>, kind: NodeKind, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            label: label.into(),
            config: HashMap::new(),
            reads: Vec::new(),
            writes: Vec::new(),
            interrupt_before: false,
        }
    }

    pub fn with_config(mut self, key: impl Into<String>, value: Value) -> Self {
        self.config.insert(key.into(), value);
        self
    }

    pub fn with_reads(mut self, reads: Vec<String>) -> Self {
        self.reads = reads;
        self
    }

    pub fn with_writes(mut self, writes: Vec<String>) -> Self {
        self.writes = writes;
        self
    }

    pub fn with_interrupt_before(mut self, interrupt_before: bool) -> Self {
        self.interrupt_before = interrupt_before;
        self
    }

    pub fn reads_all(&self) -> bool {
        self.reads.iter().any(|r| r == "*")
    }

    pub fn writes_all(&self) -> bool {
        self.writes.iter().any(|w| w == "*")
    }
}

/// Edge kind: `normal` edges are statically wired successors; `conditional`
/// edges are matched by `routeKey` against a node's route decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeKind {
    Normal,
    Conditional,
}

/// An edge in a [`GraphDefinition`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeDef {
    pub source: NodeId,
    pub target: NodeId,
    pub kind: EdgeKind,
    /// Label matched against a router/condition output. Required for conditional edges.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub route_key: Option<String>,
    /// Structured handle used by multi-output nodes (router branches, condition true/false).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_handle_id: Option<String>,
}

impl EdgeDef {
    pub fn normal(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            kind: EdgeKind::Normal,
            route_key: None,
            source_handle_id: None,
        }
    }

    pub fn conditional(source: impl Into<String>, target: impl Into<String>, route_key: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            kind: EdgeKind::Conditional,
            route_key: Some(route_key.into()),
            source_handle_id: None,
        }
    }

    pub fn with_source_handle(mut self, handle: impl Into<String>) -> Self {
        self.source_handle_id = Some(handle.into());
        self
    }
}

/// Scalar/compound types a state field may hold; informational only (the
/// runtime is JSON-valued throughout) but used for compile-time checks and
/// for documentation generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateFieldType {
    String,
    Int,
    Float,
    Bool,
    List,
    Dict,
    Messages,
    Any,
}

/// Declarative specification of one state field: its type, its reducer, and
/// whether it's required. See [`crate::state::reducer_from_name`] for the
/// reducer-name vocabulary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateFieldSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: StateFieldType,
    pub reducer: String,
    #[serde(default)]
    pub default: Option<Value>,
    #[serde(default)]
    pub required: bool,
}

impl StateFieldSpec {
    pub fn new(name: impl Into<String>, field_type: StateFieldType, reducer: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            field_type,
            reducer: reducer.into(),
            default: None,
            required: false,
        }
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

/// Immutable description of a graph, as produced by a collaborator (graph
/// builder, YAML loader, ...). Compile this with [`crate::compiler::compile`]
/// to get a runnable [`crate::plan::CompiledPlan`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphDefinition {
    pub id: String,
    pub name: String,
    pub nodes: Vec<NodeDef>,
    pub edges: Vec<EdgeDef>,
    pub state_fields: Vec<StateFieldSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_node_id: Option<NodeId>,
}

impl GraphDefinition {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            nodes: Vec::new(),
            edges: Vec::new(),
            state_fields: Vec::new(),
            fallback_node_id: None,
        }
    }

    pub fn with_node(mut self, node: NodeDef) -> Self {
        self.nodes.push(node);
        self
    }

    pub fn with_edge(mut self, edge: EdgeDef) -> Self {
        self.edges.push(edge);
        self
    }

    pub fn with_state_field(mut self, field: StateFieldSpec) -> Self {
        self.state_fields.push(field);
        self
    }

    pub fn with_fallback(mut self, node_id: impl Into<String>) -> Self {
        self.fallback_node_id = Some(node_id.into());
        self
    }

    pub fn node(&self, id: &str) -> Option<&NodeDef> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Deterministic hash of this definition's shape, used as the
    /// `plan_hash` a checkpoint is tagged with. Two definitions with the
    /// same nodes/edges/state-fields (ignoring map iteration order) hash
    /// identically; any structural change changes the hash.
    pub fn shape_hash(&self) -> String {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut node_ids: Vec<&str> = self.nodes.iter().map(|n| n.id.as_str()).collect();
        node_ids.sort_unstable();
        let mut edges: Vec<String> = self
            .edges
            .iter()
            .map(|e| format!("{}->{}:{:?}:{:?}", e.source, e.target, e.kind, e.route_key))
            .collect();
        edges.sort_unstable();
        let mut fields: Vec<String> = self
            .state_fields
            .iter()
            .map(|f| format!("{}:{:?}:{}", f.name, f.field_type, f.reducer))
            .collect();
        fields.sort_unstable();

        let mut hasher = DefaultHasher::new();
        node_ids.hash(&mut hasher);
        edges.hash(&mut hasher);
        fields.hash(&mut hasher);
        self.fallback_node_id.hash(&mut hasher);
        format!("{:016x}", hasher.finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shape_hash_is_stable_under_reordering() {
        let g1 = GraphDefinition::new("g", "G")
            .with_node(NodeDef::new("a", NodeKind::Agent, "A"))
            .with_node(NodeDef::new("b", NodeKind::DirectReply, "B"))
            .with_edge(EdgeDef::normal("a", "b"));

        let g2 = GraphDefinition::new("g", "G")
            .with_node(NodeDef::new("b", NodeKind::DirectReply, "B"))
            .with_node(NodeDef::new("a", NodeKind::Agent, "A"))
            .with_edge(EdgeDef::normal("a", "b"));

        assert_eq!(g1.shape_hash(), g2.shape_hash());
    }

    #[test]
    fn shape_hash_changes_with_new_edge() {
        let g1 = GraphDefinition::new("g", "G")
            .with_node(NodeDef::new("a", NodeKind::Agent, "A"))
            .with_node(NodeDef::new("b", NodeKind::DirectReply, "B"))
            .with_edge(EdgeDef::normal("a", "b"));

        let g2 = g1.clone().with_edge(EdgeDef::normal("b", "a"));
        assert_ne!(g1.shape_hash(), g2.shape_hash());
    }

    #[test]
    fn node_def_reads_all_detects_wildcard() {
        let node = NodeDef::new("n", NodeKind::Function, "N").with_reads(vec!["*".to_string()]);
        assert!(node.reads_all());
    }
}
