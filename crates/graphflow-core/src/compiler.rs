//! Compiles a declarative [`GraphDefinition`] into a runnable [`CompiledPlan`].
//!
//! Compilation is a pure, synchronous pass (no I/O, no async) over the graph's
//! static shape: every node resolves to a concrete executor, every edge is
//! validated and classified as a static or conditional successor, loop/fan-out
//! metadata is propagated to the nodes it applies to, and the declared state
//! fields are materialized into a [`StateSchema`]. Nothing here runs a node.

use crate::error::{GraphError, Result};
use crate::graph_def::{EdgeKind, GraphDefinition, NodeId, NodeKind};
use crate::plan::{CompiledPlan, ConditionalTable, ExpectedTasks, NodeMetadata, NodeWrapper};
use crate::services::{ExecutorRegistry, Services};
use crate::state::{reducer_from_name, StateSchema};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::warn;

/// Built-in execution-bookkeeping fields every compiled plan's schema carries
/// regardless of what the graph declares: message history, routing/loop
/// bookkeeping the built-in executors read and write. A graph's own
/// `state_fields` layer on top of these.
pub(crate) const BUILTIN_STATE_FIELDS: &[(&str, &str)] = &[
    ("messages", "messages_merge"),
    ("route_history", "add"),
    ("route_decision", "replace"),
    ("current_node", "replace"),
    ("task_results", "add"),
    ("loop_count", "add"),
    ("context", "merge"),
];

/// Compile `def` against `registry`/`services`. Returns the first validation
/// error encountered; warnings (unknown reads, tie-broken conditional routes)
/// are logged via `tracing` rather than failing compilation.
pub fn compile(def: &GraphDefinition, registry: &ExecutorRegistry, services: &Services) -> Result<CompiledPlan> {
    validate_node_ids(def)?;
    validate_edges(def)?;
    let state_schema = build_state_schema(def)?;
    let known_fields = known_field_names(def);

    validate_fallback(def)?;

    let mut node_wrappers = HashMap::new();
    for node in &def.nodes {
        let executor = registry.resolve_executor(node, services)?;
        let metadata = NodeMetadata {
            interrupt_before: node.kind == NodeKind::HumanInput || node.interrupt_before,
            fallback_target: None,
            kind: Some(node.kind),
            ..NodeMetadata::default()
        };
        node_wrappers.insert(
            node.id.clone(),
            NodeWrapper::new(node.id.clone(), executor, metadata).with_config(node.config.clone()),
        );
    }

    let (static_successors, conditional_successors) = classify_edges(def)?;

    propagate_loop_metadata(def, &static_successors, &mut node_wrappers);
    propagate_parallel_metadata(&static_successors, &conditional_successors, &mut node_wrappers);

    if let Some(fallback) = &def.fallback_node_id {
        for wrapper in node_wrappers.values_mut() {
            if wrapper.metadata.fallback_target.is_none() {
                wrapper.metadata.fallback_target = Some(fallback.clone());
            }
        }
    }

    warn_on_unknown_reads(def, &known_fields);
    reject_unknown_writes(def, &known_fields)?;

    let expected_tasks = compute_expected_tasks(def, &static_successors);
    let start_node_ids = compute_start_nodes(def);

    Ok(CompiledPlan {
        start_node_ids,
        node_wrappers,
        static_successors,
        conditional_successors,
        state_schema: Arc::new(state_schema),
        expected_tasks,
        fallback_node_id: def.fallback_node_id.clone(),
        plan_hash: def.shape_hash(),
    })
}

fn validate_node_ids(def: &GraphDefinition) -> Result<()> {
    let mut seen = HashSet::new();
    for node in &def.nodes {
        if !seen.insert(node.id.as_str()) {
            return Err(GraphError::Validation(format!("duplicate node id '{}'", node.id)));
        }
    }
    Ok(())
}

fn validate_edges(def: &GraphDefinition) -> Result<()> {
    let node_ids: HashSet<&str> = def.nodes.iter().map(|n| n.id.as_str()).collect();
    for edge in &def.edges {
        if edge.source != crate::graph_def::START && !node_ids.contains(edge.source.as_str()) {
            return Err(GraphError::Validation(format!("edge references unknown source node '{}'", edge.source)));
        }
        if edge.target != crate::graph_def::END && !node_ids.contains(edge.target.as_str()) {
            return Err(GraphError::Validation(format!("edge references unknown target node '{}'", edge.target)));
        }
        if edge.kind == EdgeKind::Conditional && edge.route_key.is_none() {
            return Err(GraphError::Validation(format!(
                "conditional edge '{}' -> '{}' is missing a routeKey",
                edge.source, edge.target
            )));
        }
    }
    Ok(())
}

fn validate_fallback(def: &GraphDefinition) -> Result<()> {
    if let Some(fallback) = &def.fallback_node_id {
        if def.node(fallback).is_none() {
            return Err(GraphError::Validation(format!("fallbackNodeId '{fallback}' does not name a known node")));
        }
    }
    Ok(())
}

fn build_state_schema(def: &GraphDefinition) -> Result<StateSchema> {
    let mut schema = StateSchema::new();
    let mut seen = HashSet::new();

    for (name, reducer_name) in BUILTIN_STATE_FIELDS {
        schema.add_field(*name, reducer_from_name(reducer_name).expect("builtin reducer name must be valid"));
        seen.insert(*name);
    }

    for field in &def.state_fields {
        if !seen.insert(field.name.as_str()) {
            return Err(GraphError::Validation(format!("duplicate state field '{}'", field.name)));
        }
        let reducer = reducer_from_name(&field.reducer)
            .ok_or_else(|| GraphError::Validation(format!("state field '{}' declares unknown reducer '{}'", field.name, field.reducer)))?;
        schema.add_field(field.name.clone(), reducer);
    }

    Ok(schema)
}

pub(crate) fn known_field_names(def: &GraphDefinition) -> HashSet<String> {
    let mut fields: HashSet<String> = BUILTIN_STATE_FIELDS.iter().map(|(n, _)| n.to_string()).collect();
    fields.extend(def.state_fields.iter().map(|f| f.name.clone()));
    fields
}

/// Builds `(static_successors, conditional_successors)`. Routing-kind sources
/// (`NodeKind::is_routing`) require every outgoing edge to be conditional and
/// keyed; a second edge registered under a `routeKey` already claimed by an
/// earlier edge wins (last-wins) and is logged as a warning rather than
/// rejected, since graph builders can legitimately overwrite a draft route
/// while iterating. Non-routing sources collect their normal edges, in
/// declaration order, into `static_successors`.
fn classify_edges(def: &GraphDefinition) -> Result<(HashMap<NodeId, Vec<NodeId>>, HashMap<NodeId, ConditionalTable>)> {
    let mut static_successors: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
    let mut conditional_successors: HashMap<NodeId, ConditionalTable> = HashMap::new();

    for edge in &def.edges {
        let source_is_routing = def.node(&edge.source).map(|n| n.kind.is_routing()).unwrap_or(false);

        if source_is_routing || edge.kind == EdgeKind::Conditional {
            let route_key = edge.route_key.clone().ok_or_else(|| {
                GraphError::Validation(format!("routing node '{}' has an edge to '{}' with no routeKey", edge.source, edge.target))
            })?;
            let table = conditional_successors.entry(edge.source.clone()).or_default();
            if let Some(existing) = table.routes.get(&route_key) {
                warn!(
                    source = %edge.source,
                    route_key = %route_key,
                    previous_target = %existing,
                    new_target = %edge.target,
                    "duplicate routeKey on conditional node; last registration wins"
                );
            }
            if route_key == "default" {
                table.default = Some(edge.target.clone());
            }
            table.routes.insert(route_key, edge.target.clone());
        } else {
            static_successors.entry(edge.source.clone()).or_default().push(edge.target.clone());
        }
    }

    Ok((static_successors, conditional_successors))
}

/// Marks every node reachable from a `LoopConditionNode`'s own conditional
/// successors (other than the loop's exit target) as loop-body, owned by that
/// loop node, so the runtime can reset per-iteration scratch state on each
/// pass. A node reachable from more than one loop keeps the first owner found;
/// nested loops are an open area this simple reachability pass does not
/// disambiguate further.
fn propagate_loop_metadata(def: &GraphDefinition, static_successors: &HashMap<NodeId, Vec<NodeId>>, wrappers: &mut HashMap<NodeId, NodeWrapper>) {
    for node in &def.nodes {
        if node.kind != NodeKind::LoopConditionNode {
            continue;
        }
        let mut visited = HashSet::new();
        let mut stack: Vec<NodeId> = static_successors.get(&node.id).cloned().unwrap_or_default();
        while let Some(current) = stack.pop() {
            if current == node.id || !visited.insert(current.clone()) {
                continue;
            }
            if let Some(wrapper) = wrappers.get_mut(&current) {
                if !wrapper.metadata.is_loop_body {
                    wrapper.metadata.is_loop_body = true;
                    wrapper.metadata.loop_owner_id = Some(node.id.clone());
                }
            }
            stack.extend(static_successors.get(&current).cloned().unwrap_or_default());
        }
    }
}

/// Marks every static successor of a fan-out source (more than one static
/// successor, and not itself a routing node) as a parallel branch.
fn propagate_parallel_metadata(
    static_successors: &HashMap<NodeId, Vec<NodeId>>,
    conditional_successors: &HashMap<NodeId, ConditionalTable>,
    wrappers: &mut HashMap<NodeId, NodeWrapper>,
) {
    for (source, targets) in static_successors {
        if targets.len() <= 1 || conditional_successors.contains_key(source) {
            continue;
        }
        for target in targets {
            if let Some(wrapper) = wrappers.get_mut(target) {
                wrapper.metadata.is_parallel_branch = true;
            }
        }
    }
}

fn warn_on_unknown_reads(def: &GraphDefinition, known_fields: &HashSet<String>) {
    for node in &def.nodes {
        if node.reads_all() {
            continue;
        }
        for field in &node.reads {
            if !known_fields.contains(field) {
                warn!(node = %node.id, field = %field, "node declares a read on a field absent from the state schema");
            }
        }
    }
}

fn reject_unknown_writes(def: &GraphDefinition, known_fields: &HashSet<String>) -> Result<()> {
    for node in &def.nodes {
        if node.writes_all() {
            continue;
        }
        for field in &node.writes {
            if !known_fields.contains(field) {
                return Err(GraphError::Validation(format!(
                    "node '{}' declares a write to unknown state field '{}'",
                    node.id, field
                )));
            }
        }
    }
    Ok(())
}

/// A node with more than one static predecessor is a fan-in barrier; its
/// expected arrival count defaults to `Auto` (inferred from incoming static
/// edge count at run time). `AggregatorNode`s always get `Auto` too unless a
/// host overrides via a later recompile, since aggregator fan-in width is
/// determined by how many branches the upstream fan-out produced.
fn compute_expected_tasks(def: &GraphDefinition, static_successors: &HashMap<NodeId, Vec<NodeId>>) -> HashMap<NodeId, ExpectedTasks> {
    let mut incoming: HashMap<&str, usize> = HashMap::new();
    for targets in static_successors.values() {
        for target in targets {
            *incoming.entry(target.as_str()).or_insert(0) += 1;
        }
    }

    let mut expected = HashMap::new();
    for node in &def.nodes {
        let count = incoming.get(node.id.as_str()).copied().unwrap_or(0);
        if count > 1 || node.kind == NodeKind::AggregatorNode {
            expected.insert(node.id.clone(), ExpectedTasks::Auto);
        }
    }
    expected
}

/// Root nodes: every node with no incoming normal edge (and not the source of
/// a `__start__` edge producing itself), plus any node an explicit
/// `__start__`-sourced edge names.
fn compute_start_nodes(def: &GraphDefinition) -> Vec<NodeId> {
    let explicit: Vec<NodeId> = def
        .edges
        .iter()
        .filter(|e| e.source == crate::graph_def::START)
        .map(|e| e.target.clone())
        .collect();
    if !explicit.is_empty() {
        return explicit;
    }

    let has_incoming: HashSet<&str> = def
        .edges
        .iter()
        .filter(|e| e.source != crate::graph_def::START)
        .map(|e| e.target.as_str())
        .collect();
    def.nodes.iter().map(|n| n.id.as_str()).filter(|id| !has_incoming.contains(id)).map(str::to_string).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph_def::{EdgeDef, NodeDef, StateFieldSpec, StateFieldType};

    fn registry_and_services() -> (ExecutorRegistry, Services) {
        (ExecutorRegistry::with_builtins(), Services::builder().build())
    }

    fn direct_reply(id: &str, label: &str) -> NodeDef {
        NodeDef::new(id, NodeKind::DirectReply, label).with_config("template", serde_json::json!(""))
    }

    #[test]
    fn compiles_a_linear_graph_with_a_single_start_node() {
        let def = GraphDefinition::new("g", "G")
            .with_node(direct_reply("a", "A"))
            .with_node(direct_reply("b", "B"))
            .with_edge(EdgeDef::normal("a", "b"));
        let (registry, services) = registry_and_services();

        let plan = compile(&def, &registry, &services).unwrap();
        assert_eq!(plan.start_node_ids, vec!["a".to_string()]);
        assert_eq!(plan.static_successors.get("a"), Some(&vec!["b".to_string()]));
    }

    #[test]
    fn rejects_edge_to_unknown_target() {
        let def = GraphDefinition::new("g", "G")
            .with_node(NodeDef::new("a", NodeKind::DirectReply, "A"))
            .with_edge(EdgeDef::normal("a", "missing"));
        let (registry, services) = registry_and_services();

        assert!(compile(&def, &registry, &services).is_err());
    }

    #[test]
    fn rejects_unknown_reducer_name() {
        let def = GraphDefinition::new("g", "G")
            .with_node(NodeDef::new("a", NodeKind::DirectReply, "A"))
            .with_state_field(StateFieldSpec::new("score", StateFieldType::Int, "bogus"));
        let (registry, services) = registry_and_services();

        assert!(compile(&def, &registry, &services).is_err());
    }

    #[test]
    fn rejects_write_to_field_absent_from_schema() {
        let def = GraphDefinition::new("g", "G")
            .with_node(NodeDef::new("a", NodeKind::DirectReply, "A").with_writes(vec!["nonexistent".to_string()]));
        let (registry, services) = registry_and_services();

        assert!(compile(&def, &registry, &services).is_err());
    }

    #[test]
    fn condition_node_routes_build_conditional_table() {
        let def = GraphDefinition::new("g", "G")
            .with_node(NodeDef::new("c", NodeKind::Condition, "C").with_config("condition", serde_json::json!("true")))
            .with_node(direct_reply("hi", "Hi"))
            .with_node(direct_reply("lo", "Lo"))
            .with_edge(EdgeDef::conditional("c", "hi", "true"))
            .with_edge(EdgeDef::conditional("c", "lo", "false"));
        let (registry, services) = registry_and_services();

        let plan = compile(&def, &registry, &services).unwrap();
        let table = plan.conditional_successors.get("c").unwrap();
        assert_eq!(table.routes.get("true"), Some(&"hi".to_string()));
        assert_eq!(table.routes.get("false"), Some(&"lo".to_string()));
    }

    #[test]
    fn human_input_node_always_gets_interrupt_before() {
        let def = GraphDefinition::new("g", "G").with_node(NodeDef::new("h", NodeKind::HumanInput, "H"));
        let (registry, services) = registry_and_services();

        let plan = compile(&def, &registry, &services).unwrap();
        assert!(plan.node("h").unwrap().metadata.interrupt_before);
    }

    #[test]
    fn fan_out_successors_are_marked_parallel_branches() {
        let def = GraphDefinition::new("g", "G")
            .with_node(direct_reply("s", "S"))
            .with_node(direct_reply("p1", "P1"))
            .with_node(direct_reply("p2", "P2"))
            .with_edge(EdgeDef::normal("s", "p1"))
            .with_edge(EdgeDef::normal("s", "p2"));
        let (registry, services) = registry_and_services();

        let plan = compile(&def, &registry, &services).unwrap();
        assert!(plan.node("p1").unwrap().metadata.is_parallel_branch);
        assert!(plan.node("p2").unwrap().metadata.is_parallel_branch);
    }

    #[test]
    fn loop_body_nodes_inherit_loop_owner() {
        let def = GraphDefinition::new("g", "G")
            .with_node(
                NodeDef::new("loop", NodeKind::LoopConditionNode, "Loop")
                    .with_config("conditionType", serde_json::json!("while"))
                    .with_config("condition", serde_json::json!("true")),
            )
            .with_node(direct_reply("body", "Body"))
            .with_node(direct_reply("after", "After"))
            .with_edge(EdgeDef::conditional("loop", "body", "continue"))
            .with_edge(EdgeDef::conditional("loop", "after", "stop"))
            .with_edge(EdgeDef::normal("body", "loop"));
        let (registry, services) = registry_and_services();

        let plan = compile(&def, &registry, &services).unwrap();
        let body = plan.node("body").unwrap();
        assert!(body.metadata.is_loop_body);
        assert_eq!(body.metadata.loop_owner_id, Some("loop".to_string()));
        assert!(!plan.node("after").unwrap().metadata.is_loop_body);
    }

    #[test]
    fn fallback_node_id_is_wired_onto_every_node_without_its_own() {
        let def = GraphDefinition::new("g", "G")
            .with_node(direct_reply("a", "A"))
            .with_node(direct_reply("fb", "Fallback"))
            .with_fallback("fb");
        let (registry, services) = registry_and_services();

        let plan = compile(&def, &registry, &services).unwrap();
        assert_eq!(plan.node("a").unwrap().metadata.fallback_target, Some("fb".to_string()));
    }

    #[test]
    fn unknown_fallback_node_id_is_rejected() {
        let def = GraphDefinition::new("g", "G")
            .with_node(NodeDef::new("a", NodeKind::DirectReply, "A"))
            .with_fallback("missing");
        let (registry, services) = registry_and_services();

        assert!(compile(&def, &registry, &services).is_err());
    }

    #[test]
    fn duplicate_node_ids_are_rejected() {
        let def = GraphDefinition::new("g", "G")
            .with_node(NodeDef::new("a", NodeKind::DirectReply, "A"))
            .with_node(NodeDef::new("a", NodeKind::DirectReply, "A again"));
        let (registry, services) = registry_and_services();

        assert!(compile(&def, &registry, &services).is_err());
    }
}
