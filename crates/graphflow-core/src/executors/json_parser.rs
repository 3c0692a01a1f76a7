//! JSON parser executor (`json_parser`): extracts a JSON object embedded in
//! a text field (by default the last assistant message) and maps its
//! sub-fields into State.

use crate::error::Result;
use crate::graph_def::NodeDef;
use crate::messages::Message;
use crate::node_result::{NodeError, NodeErrorKind, NodeResult};
use crate::plan::NodeExecutor;
use crate::runtime::RunConfig;
use crate::services::Services;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

pub struct JsonParserExecutor {
    node_id: String,
    source_field: Option<String>,
    output_mapping: HashMap<String, String>,
}

pub(crate) fn build(node: &NodeDef, _services: &Services) -> Result<Arc<dyn NodeExecutor>> {
    let source_field = super::optional_str(&node.config, "source_field").map(str::to_string);
    let output_mapping = node
        .config
        .get("output_mapping")
        .and_then(|v| v.as_object())
        .map(|obj| obj.iter().filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string()))).collect())
        .unwrap_or_default();

    Ok(Arc::new(JsonParserExecutor {
        node_id: node.id.clone(),
        source_field,
        output_mapping,
    }))
}

/// Strips a single fenced code block (` ```json ... ``` ` or ` ``` ... ``` `)
/// if the text is wrapped in one; otherwise returns the text unchanged.
fn strip_markdown_fence(text: &str) -> &str {
    let trimmed = text.trim();
    if let Some(rest) = trimmed.strip_prefix("```") {
        let rest = rest.strip_prefix("json").unwrap_or(rest);
        let rest = rest.trim_start_matches('\n');
        if let Some(body) = rest.strip_suffix("```") {
            return body.trim();
        }
    }
    trimmed
}

impl JsonParserExecutor {
    fn source_text(&self, state: &Value) -> Option<String> {
        if let Some(field) = &self.source_field {
            return state.get(field).and_then(|v| v.as_str()).map(str::to_string);
        }
        let messages: Vec<Message> = state.get("messages").cloned().and_then(|v| serde_json::from_value(v).ok()).unwrap_or_default();
        messages.last().and_then(|m| m.text()).map(str::to_string)
    }
}

#[async_trait]
impl NodeExecutor for JsonParserExecutor {
    async fn execute(&self, state: &Value, _run_config: &RunConfig) -> Result<NodeResult> {
        let text = match self.source_text(state) {
            Some(t) => t,
            None => {
                return Ok(NodeResult::Error(NodeError::new(
                    NodeErrorKind::Internal,
                    "json_parser: no source text found to parse".to_string(),
                    self.node_id.clone(),
                )));
            }
        };

        let stripped = strip_markdown_fence(&text);
        let parsed: Value = match serde_json::from_str(stripped) {
            Ok(v) => v,
            Err(e) => {
                return Ok(NodeResult::Error(NodeError::new(
                    NodeErrorKind::UserExpression,
                    format!("json_parser: failed to parse JSON: {e}"),
                    self.node_id.clone(),
                )));
            }
        };

        let mut delta = serde_json::Map::new();
        if self.output_mapping.is_empty() {
            delta.insert("parsed_output".to_string(), parsed);
        } else {
            for (target_variable, source_path) in &self.output_mapping {
                let value = parsed.get(source_path).cloned().unwrap_or(Value::Null);
                delta.insert(target_variable.clone(), value);
            }
        }

        Ok(NodeResult::State(Value::Object(delta)))
    }

    fn declared_reads(&self) -> Vec<String> {
        match &self.source_field {
            Some(field) => vec![field.clone()],
            None => vec!["messages".to_string()],
        }
    }

    fn declared_writes(&self) -> Vec<String> {
        if self.output_mapping.is_empty() {
            vec!["parsed_output".to_string()]
        } else {
            self.output_mapping.keys().cloned().collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph_def::NodeKind;

    #[tokio::test]
    async fn parses_fenced_json_from_source_field() {
        let services = Services::builder().build();
        let mut node = NodeDef::new("parser1", NodeKind::JsonParser, "parser1");
        node.config.insert("source_field".into(), serde_json::json!("raw_output"));
        node.config.insert("output_mapping".into(), serde_json::json!({"city": "location"}));
        let executor = build(&node, &services).unwrap();

        let state = serde_json::json!({"raw_output": "```json\n{\"location\": \"paris\"}\n```"});
        let result = executor.execute(&state, &RunConfig::new("t1")).await.unwrap();
        let delta = result.get_state_update().unwrap();
        assert_eq!(delta.get("city"), Some(&serde_json::json!("paris")));
    }

    #[tokio::test]
    async fn falls_back_to_last_message_when_no_source_field() {
        let services = Services::builder().build();
        let node = NodeDef::new("parser1", NodeKind::JsonParser, "parser1");
        let executor = build(&node, &services).unwrap();

        let state = serde_json::json!({"messages": [{"role": "assistant", "content": "{\"ok\": true}"}]});
        let result = executor.execute(&state, &RunConfig::new("t1")).await.unwrap();
        let delta = result.get_state_update().unwrap();
        assert_eq!(delta.get("parsed_output"), Some(&serde_json::json!({"ok": true})));
    }

    #[tokio::test]
    async fn invalid_json_surfaces_user_expression_error() {
        let services = Services::builder().build();
        let mut node = NodeDef::new("parser1", NodeKind::JsonParser, "parser1");
        node.config.insert("source_field".into(), serde_json::json!("raw_output"));
        let executor = build(&node, &services).unwrap();

        let state = serde_json::json!({"raw_output": "not json"});
        let result = executor.execute(&state, &RunConfig::new("t1")).await.unwrap();
        assert!(result.is_error());
    }
}
