//! Data-pill resolution: rewrites variable references embedded in a node's
//! `config.context` subtree against the current State before the node runs.
//!
//! Recognized forms (see module-level grammar in [`crate::expr`] for the
//! sibling restricted-expression language used by condition/router nodes):
//! - `state.get("field", default)` — field lookup with fallback
//! - `state.field` / `state.field.sub` / `state.items[0]` — nested path access
//! - `{NodeLabel.output}` — value previously written to `context.<NodeLabel>.output`
//! - `context.path` — sugar for `state.context.path`
//!
//! Resolution only rewrites whole string leaves that parse as one of these
//! forms; every other string (including ones merely containing a data pill
//! as a substring) passes through untouched — free-text template
//! interpolation is handled by individual executors (e.g.
//! [`crate::executors::http`]'s `{field}` substitution), not here.

use crate::error::Result;
use crate::graph_def::{GraphDefinition, NodeId};
use serde_json::Value;
use std::collections::{HashSet, VecDeque};

/// One segment of a dotted/bracketed path, e.g. `items[0].name` is
/// `[Field("items"), Index(0), Field("name")]`.
#[derive(Debug, Clone, PartialEq)]
enum PathSegment {
    Field(String),
    Index(usize),
}

/// A parsed data-pill reference, prior to lookup against State.
#[derive(Debug, Clone, PartialEq)]
enum VariableReference {
    StateGet { path: Vec<PathSegment>, default: Option<Value> },
    StatePath { path: Vec<PathSegment> },
    NodeOutput { node_label: String },
    ContextPath { path: Vec<PathSegment> },
}

/// Splits `a.b[0].c` into path segments. Empty segments (leading/trailing
/// dots) are rejected so callers can tell "not a path" from "empty path".
fn parse_path(text: &str) -> Option<Vec<PathSegment>> {
    if text.is_empty() {
        return None;
    }
    let mut segments = Vec::new();
    for raw in text.split('.') {
        if raw.is_empty() {
            return None;
        }
        let mut chars = raw;
        // Pull off any number of trailing `[n]` index suffixes.
        let mut indices = Vec::new();
        while let Some(open) = chars.rfind('[') {
            if !chars.ends_with(']') {
                return None;
            }
            let index_str = &chars[open + 1..chars.len() - 1];
            let index: usize = index_str.parse().ok()?;
            indices.push(index);
            chars = &chars[..open];
        }
        if chars.is_empty() {
            return None;
        }
        segments.push(PathSegment::Field(chars.to_string()));
        indices.reverse();
        segments.extend(indices.into_iter().map(PathSegment::Index));
    }
    Some(segments)
}

/// Parses the single literal argument of `state.get("field", default)`: a
/// JSON literal if it parses as one, otherwise a bare string (so
/// `state.get("x", fallback)` treats `fallback` as the string `"fallback"`).
fn parse_default_literal(text: &str) -> Value {
    let trimmed = text.trim();
    if let (Some('"'), Some('"')) = (trimmed.chars().next(), trimmed.chars().last()) {
        if trimmed.len() >= 2 {
            return Value::String(trimmed[1..trimmed.len() - 1].to_string());
        }
    }
    serde_json::from_str(trimmed).unwrap_or_else(|_| Value::String(trimmed.to_string()))
}

fn parse_state_get(rest: &str) -> Option<VariableReference> {
    let rest = rest.strip_prefix("get(")?;
    let rest = rest.strip_suffix(')')?;
    let (field_part, default_part) = rest.split_once(',')?;
    let field_part = field_part.trim();
    if field_part.len() < 2 || !field_part.starts_with('"') || !field_part.ends_with('"') {
        return None;
    }
    let field = &field_part[1..field_part.len() - 1];
    let path = parse_path(field)?;
    let default = parse_default_literal(default_part);
    Some(VariableReference::StateGet { path, default: Some(default) })
}

/// Parses a whole string as one of the recognized data-pill forms. Returns
/// `None` for anything else, which callers must treat as a literal value.
fn parse_reference(text: &str) -> Option<VariableReference> {
    let text = text.trim();

    if let Some(inner) = text.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
        let label = inner.strip_suffix(".output")?;
        if label.is_empty() {
            return None;
        }
        return Some(VariableReference::NodeOutput { node_label: label.to_string() });
    }

    if let Some(rest) = text.strip_prefix("state.") {
        if rest.starts_with("get(") {
            return parse_state_get(rest);
        }
        return parse_path(rest).map(|path| VariableReference::StatePath { path });
    }

    if let Some(rest) = text.strip_prefix("context.") {
        return parse_path(rest).map(|path| VariableReference::ContextPath { path });
    }

    None
}

fn lookup_path<'a>(root: &'a Value, path: &[PathSegment]) -> Option<&'a Value> {
    let mut current = root;
    for segment in path {
        current = match segment {
            PathSegment::Field(name) => current.get(name)?,
            PathSegment::Index(i) => current.get(i)?,
        };
    }
    Some(current)
}

fn resolve_reference(reference: &VariableReference, state: &Value, warnings: &mut Vec<String>, raw: &str) -> Value {
    let (found, default) = match reference {
        VariableReference::StateGet { path, default } => (lookup_path(state, path), default.clone()),
        VariableReference::StatePath { path } => (lookup_path(state, path), None),
        VariableReference::ContextPath { path } => {
            let mut full = vec![PathSegment::Field("context".to_string())];
            full.extend(path.clone());
            (lookup_path(state, &full), None)
        }
        VariableReference::NodeOutput { node_label } => {
            let full = [
                PathSegment::Field("context".to_string()),
                PathSegment::Field(node_label.clone()),
                PathSegment::Field("output".to_string()),
            ];
            (lookup_path(state, &full), None)
        }
    };

    match found {
        Some(value) => value.clone(),
        None => {
            warnings.push(format!("unresolved data pill '{raw}'"));
            default.unwrap_or_else(|| Value::String(String::new()))
        }
    }
}

/// Rewrites every string leaf of `context` that parses as a data pill,
/// substituting the resolved value from `state`. Non-pill strings, numbers,
/// bools, and structure are left untouched. Pure: never mutates `state`.
/// Warnings are returned rather than logged directly so callers can attach
/// them to the node's trace entry.
pub fn resolve_context(context: &Value, state: &Value) -> (Value, Vec<String>) {
    let mut warnings = Vec::new();
    let resolved = resolve_value(context, state, &mut warnings);
    (resolved, warnings)
}

fn resolve_value(value: &Value, state: &Value, warnings: &mut Vec<String>) -> Value {
    match value {
        Value::String(s) => match parse_reference(s) {
            Some(reference) => resolve_reference(&reference, state, warnings, s),
            None => value.clone(),
        },
        Value::Array(items) => Value::Array(items.iter().map(|v| resolve_value(v, state, warnings)).collect()),
        Value::Object(map) => {
            Value::Object(map.iter().map(|(k, v)| (k.clone(), resolve_value(v, state, warnings))).collect())
        }
        other => other.clone(),
    }
}

/// Validates `expr`-evaluable strings through the same path parser used for
/// resolution, without touching State. Exposed for callers (the restricted
/// expression evaluator, `§4.3`) that want data-pill syntax checking without
/// running resolution.
pub fn is_well_formed(text: &str) -> bool {
    parse_reference(text).is_some()
}

/// One reference found while walking a node's `config.context`, classified
/// against the set of variables available by the time that node runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReferenceStatus {
    DefinedUpstream,
    Undefined,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassifiedReference {
    pub raw: String,
    pub status: ReferenceStatus,
}

/// Node labels reachable as predecessors of `node_id`, by walking both
/// static and conditional edges backwards. Used to decide whether a
/// `{NodeLabel.output}` reference could possibly have been written by the
/// time `node_id` executes.
fn upstream_labels(def: &GraphDefinition, node_id: &NodeId) -> HashSet<String> {
    let mut visited: HashSet<NodeId> = HashSet::new();
    let mut labels = HashSet::new();
    let mut queue: VecDeque<NodeId> = VecDeque::new();
    queue.push_back(node_id.clone());
    visited.insert(node_id.clone());

    while let Some(current) = queue.pop_front() {
        for edge in &def.edges {
            if edge.target == current && visited.insert(edge.source.clone()) {
                if let Some(node) = def.node(&edge.source) {
                    labels.insert(node.label.clone());
                }
                queue.push_back(edge.source.clone());
            }
        }
    }

    labels
}

fn first_field_name(path: &[PathSegment]) -> Option<&str> {
    match path.first() {
        Some(PathSegment::Field(name)) => Some(name.as_str()),
        _ => None,
    }
}

fn classify(reference: &VariableReference, raw: &str, known_fields: &HashSet<String>, upstream: &HashSet<String>) -> ClassifiedReference {
    let defined = match reference {
        VariableReference::StateGet { path, .. } | VariableReference::StatePath { path } => {
            first_field_name(path).map(|name| known_fields.contains(name)).unwrap_or(false)
        }
        VariableReference::ContextPath { .. } => known_fields.contains("context"),
        VariableReference::NodeOutput { node_label } => upstream.contains(node_label),
    };
    ClassifiedReference {
        raw: raw.to_string(),
        status: if defined { ReferenceStatus::DefinedUpstream } else { ReferenceStatus::Undefined },
    }
}

fn collect_string_leaves<'a>(value: &'a Value, out: &mut Vec<&'a str>) {
    match value {
        Value::String(s) => out.push(s.as_str()),
        Value::Array(items) => items.iter().for_each(|v| collect_string_leaves(v, out)),
        Value::Object(map) => map.values().for_each(|v| collect_string_leaves(v, out)),
        _ => {}
    }
}

/// Enumerates every data-pill reference in `context` and classifies each as
/// `defined_upstream` or `undefined` against the state fields declared on
/// `def` (plus built-ins) and the node labels reachable as `node_id`'s
/// ancestors. Non-pill strings are skipped; this is a static check, no
/// State is touched and no lookup is performed.
pub fn validate_references(def: &GraphDefinition, node_id: &NodeId, context: &Value) -> Vec<ClassifiedReference> {
    let known_fields = crate::compiler::known_field_names(def);
    let upstream = upstream_labels(def, node_id);

    let mut leaves = Vec::new();
    collect_string_leaves(context, &mut leaves);

    leaves
        .into_iter()
        .filter_map(|raw| parse_reference(raw).map(|reference| classify(&reference, raw, &known_fields, &upstream)))
        .collect()
}

/// Evaluates a single data-pill string against `state`. Convenience wrapper
/// around [`resolve_context`] for callers that already know they're looking
/// at one reference rather than a whole `context` subtree.
pub fn resolve_one(text: &str, state: &Value) -> Result<Value> {
    let (resolved, _warnings) = resolve_context(&Value::String(text.to_string()), state);
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph_def::{EdgeDef, NodeDef, NodeKind};

    #[test]
    fn resolves_simple_state_path() {
        let state = serde_json::json!({"user_name": "ada"});
        let (resolved, warnings) = resolve_context(&serde_json::json!("state.user_name"), &state);
        assert_eq!(resolved, serde_json::json!("ada"));
        assert!(warnings.is_empty());
    }

    #[test]
    fn resolves_nested_path_with_index() {
        let state = serde_json::json!({"items": [{"name": "widget"}, {"name": "gadget"}]});
        let (resolved, _) = resolve_context(&serde_json::json!("state.items[1].name"), &state);
        assert_eq!(resolved, serde_json::json!("gadget"));
    }

    #[test]
    fn state_get_falls_back_to_default_on_unknown_field() {
        let state = serde_json::json!({});
        let (resolved, warnings) = resolve_context(&serde_json::json!(r#"state.get("missing", "fallback")"#), &state);
        assert_eq!(resolved, serde_json::json!("fallback"));
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn unknown_path_without_default_yields_empty_string_and_warning() {
        let state = serde_json::json!({});
        let (resolved, warnings) = resolve_context(&serde_json::json!("state.missing_field"), &state);
        assert_eq!(resolved, serde_json::json!(""));
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn node_output_pill_reads_from_context_bucket() {
        let state = serde_json::json!({"context": {"Summarize": {"output": "a short summary"}}});
        let (resolved, warnings) = resolve_context(&serde_json::json!("{Summarize.output}"), &state);
        assert_eq!(resolved, serde_json::json!("a short summary"));
        assert!(warnings.is_empty());
    }

    #[test]
    fn context_path_is_sugar_for_state_context() {
        let state = serde_json::json!({"context": {"step1": {"result": 42}}});
        let (resolved, _) = resolve_context(&serde_json::json!("context.step1.result"), &state);
        assert_eq!(resolved, serde_json::json!(42));
    }

    #[test]
    fn non_pill_strings_pass_through_untouched() {
        let state = serde_json::json!({});
        let (resolved, warnings) = resolve_context(&serde_json::json!("just a normal prompt string"), &state);
        assert_eq!(resolved, serde_json::json!("just a normal prompt string"));
        assert!(warnings.is_empty());
    }

    #[test]
    fn resolution_recurses_through_nested_objects_and_arrays() {
        let state = serde_json::json!({"topic": "rust"});
        let context = serde_json::json!({
            "prompt": "state.topic",
            "tags": ["state.topic", "literal"],
        });
        let (resolved, _) = resolve_context(&context, &state);
        assert_eq!(resolved["prompt"], serde_json::json!("rust"));
        assert_eq!(resolved["tags"][0], serde_json::json!("rust"));
        assert_eq!(resolved["tags"][1], serde_json::json!("literal"));
    }

    #[test]
    fn resolution_never_mutates_the_input_state() {
        let state = serde_json::json!({"count": 1});
        let before = state.clone();
        let _ = resolve_context(&serde_json::json!("state.count"), &state);
        assert_eq!(state, before);
    }

    fn graph_with_chain() -> GraphDefinition {
        GraphDefinition::new("g", "G")
            .with_node(NodeDef::new("fetch", NodeKind::Http, "FetchData"))
            .with_node(NodeDef::new("summarize", NodeKind::Agent, "Summarize"))
            .with_node(NodeDef::new("reply", NodeKind::DirectReply, "Reply").with_config("template", serde_json::json!("")))
            .with_edge(EdgeDef::normal("fetch", "summarize"))
            .with_edge(EdgeDef::normal("summarize", "reply"))
    }

    #[test]
    fn validate_references_marks_ancestor_node_output_as_defined() {
        let def = graph_with_chain();
        let context = serde_json::json!({"body": "{FetchData.output}"});
        let classified = validate_references(&def, &"summarize".to_string(), &context);
        assert_eq!(classified.len(), 1);
        assert_eq!(classified[0].status, ReferenceStatus::DefinedUpstream);
    }

    #[test]
    fn validate_references_marks_non_ancestor_node_output_as_undefined() {
        let def = graph_with_chain();
        let context = serde_json::json!({"body": "{Reply.output}"});
        let classified = validate_references(&def, &"fetch".to_string(), &context);
        assert_eq!(classified[0].status, ReferenceStatus::Undefined);
    }

    #[test]
    fn validate_references_marks_known_state_field_as_defined() {
        let def = graph_with_chain();
        let context = serde_json::json!("state.messages");
        let classified = validate_references(&def, &"fetch".to_string(), &context);
        assert_eq!(classified[0].status, ReferenceStatus::DefinedUpstream);
    }

    #[test]
    fn validate_references_marks_unknown_state_field_as_undefined() {
        let def = graph_with_chain();
        let context = serde_json::json!("state.totally_made_up_field");
        let classified = validate_references(&def, &"fetch".to_string(), &context);
        assert_eq!(classified[0].status, ReferenceStatus::Undefined);
    }

    #[test]
    fn non_pill_strings_are_skipped_by_validation() {
        let def = graph_with_chain();
        let context = serde_json::json!("plain text, not a data pill");
        let classified = validate_references(&def, &"fetch".to_string(), &context);
        assert!(classified.is_empty());
    }
}
