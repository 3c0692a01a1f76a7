//! Tool executor (`tool`): invokes a single named tool with arguments bound
//! from State via `input_mapping`, and writes its output via `output_mapping`.

use crate::error::Result;
use crate::graph_def::NodeDef;
use crate::node_result::{NodeError, NodeErrorKind, NodeResult};
use crate::plan::NodeExecutor;
use crate::runtime::RunConfig;
use crate::services::Services;
use crate::tool::ToolRuntime;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

pub struct ToolNodeExecutor {
    node_id: String,
    tool_name: String,
    input_mapping: HashMap<String, String>,
    output_variable: String,
    services: Services,
}

pub(crate) fn build(node: &NodeDef, services: &Services) -> Result<Arc<dyn NodeExecutor>> {
    let tool_name = super::required_str(&node.config, &node.id, "toolName")?.to_string();
    let input_mapping = node
        .config
        .get("input_mapping")
        .and_then(|v| v.as_object())
        .map(|obj| obj.iter().filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string()))).collect())
        .unwrap_or_default();
    let output_variable = super::optional_str(&node.config, "output_variable").unwrap_or("tool_output").to_string();

    if !services.tool_registry.has_tool(&tool_name) {
        return Err(crate::error::GraphError::param(node.id.clone(), format!("no tool registered under name '{tool_name}'")));
    }

    Ok(Arc::new(ToolNodeExecutor {
        node_id: node.id.clone(),
        tool_name,
        input_mapping,
        output_variable,
        services: services.clone(),
    }))
}

#[async_trait]
impl NodeExecutor for ToolNodeExecutor {
    async fn execute(&self, state: &Value, _run_config: &RunConfig) -> Result<NodeResult> {
        let tool = match self.services.tool_registry.get(&self.tool_name) {
            Some(tool) => tool,
            None => {
                return Ok(NodeResult::Error(NodeError::new(
                    NodeErrorKind::Internal,
                    format!("tool '{}' is no longer registered", self.tool_name),
                    self.node_id.clone(),
                )));
            }
        };

        let mut args = serde_json::Map::new();
        for (arg_name, state_path) in &self.input_mapping {
            if let Some(value) = state.get(state_path) {
                args.insert(arg_name.clone(), value.clone());
            }
        }

        let runtime = ToolRuntime::new(state.clone());
        match tool.execute(Value::Object(args), Some(runtime)).await {
            Ok(content) => {
                let mut delta = serde_json::Map::new();
                delta.insert(self.output_variable.clone(), content);
                Ok(NodeResult::State(Value::Object(delta)))
            }
            Err(e) => Ok(NodeResult::Error(NodeError::new(NodeErrorKind::External, e.to_string(), self.node_id.clone()))),
        }
    }

    fn declared_reads(&self) -> Vec<String> {
        self.input_mapping.values().cloned().collect()
    }

    fn declared_writes(&self) -> Vec<String> {
        vec![self.output_variable.clone()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph_def::NodeKind;
    use crate::tool::{Tool, ToolRegistry};

    fn echo_registry() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry.register(Tool::new(
            "echo",
            "echoes its input",
            serde_json::json!({}),
            Arc::new(|args, _runtime| Box::pin(async move { Ok(args) })),
        ));
        registry
    }

    #[tokio::test]
    async fn tool_node_binds_inputs_and_writes_output() {
        let services = Services::builder().with_tool_registry(Arc::new(echo_registry())).build();
        let mut node = NodeDef::new("tool1", NodeKind::Tool, "tool1");
        node.config.insert("toolName".into(), serde_json::json!("echo"));
        node.config.insert("input_mapping".into(), serde_json::json!({"query": "search_term"}));
        node.config.insert("output_variable".into(), serde_json::json!("search_result"));
        let executor = build(&node, &services).unwrap();

        let state = serde_json::json!({"search_term": "rust"});
        let result = executor.execute(&state, &RunConfig::new("t1")).await.unwrap();
        let delta = result.get_state_update().unwrap();
        assert_eq!(delta.get("search_result").unwrap().get("query"), Some(&serde_json::json!("rust")));
    }

    #[test]
    fn build_rejects_unregistered_tool() {
        let services = Services::builder().build();
        let mut node = NodeDef::new("tool1", NodeKind::Tool, "tool1");
        node.config.insert("toolName".into(), serde_json::json!("missing"));
        assert!(build(&node, &services).is_err());
    }
}
