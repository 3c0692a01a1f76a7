//! Condition / Router executors (`condition`, `condition_agent`, `router_node`).

use crate::error::Result;
use crate::graph_def::NodeDef;
use crate::llm::ChatRequest;
use crate::messages::Message;
use crate::node_result::{NodeError, NodeErrorKind, NodeResult};
use crate::plan::NodeExecutor;
use crate::runtime::RunConfig;
use crate::services::Services;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

/// `route_history` is declared with [`crate::state::AppendReducer`] by the
/// compiler, so the delta carries a one-element array to append rather than
/// the full history.
fn append_route_history(mut delta: serde_json::Map<String, Value>, node_id: &str, decision: &Value) -> Value {
    delta.insert(
        "route_history".to_string(),
        serde_json::json!([{"node": node_id, "decision": decision}]),
    );
    Value::Object(delta)
}

/// `condition`: evaluates a restricted boolean expression against State.
pub struct ConditionExecutor {
    node_id: String,
    expression: String,
    services: Services,
}

pub(crate) fn build_condition(node: &NodeDef, services: &Services) -> Result<Arc<dyn NodeExecutor>> {
    let expression = super::required_str(&node.config, &node.id, "condition")?.to_string();
    Ok(Arc::new(ConditionExecutor {
        node_id: node.id.clone(),
        expression,
        services: services.clone(),
    }))
}

#[async_trait]
impl NodeExecutor for ConditionExecutor {
    async fn execute(&self, state: &Value, _run_config: &RunConfig) -> Result<NodeResult> {
        match self.services.expression_evaluator.evaluate_bool(&self.expression, state) {
            Ok(decision) => {
                let mut delta = serde_json::Map::new();
                delta.insert("route_decision".into(), Value::Bool(decision));
                Ok(NodeResult::State(append_route_history(delta, &self.node_id, &Value::Bool(decision))))
            }
            Err(e) => Ok(NodeResult::Error(NodeError::new(NodeErrorKind::UserExpression, e.to_string(), self.node_id.clone()))),
        }
    }

    fn declared_writes(&self) -> Vec<String> {
        vec!["route_decision".to_string(), "route_history".to_string()]
    }
}

/// `condition_agent`: calls an LLM with a fixed schema and routes among a
/// fixed option list.
pub struct ConditionAgentExecutor {
    node_id: String,
    model_handle: String,
    prompt: String,
    options: Vec<String>,
    services: Services,
}

pub(crate) fn build_condition_agent(node: &NodeDef, services: &Services) -> Result<Arc<dyn NodeExecutor>> {
    let model_handle = super::required_str(&node.config, &node.id, "model")?.to_string();
    let prompt = super::required_str(&node.config, &node.id, "prompt")?.to_string();
    let options = node
        .config
        .get("options")
        .and_then(|v| v.as_array())
        .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
        .unwrap_or_default();
    Ok(Arc::new(ConditionAgentExecutor {
        node_id: node.id.clone(),
        model_handle,
        prompt,
        options,
        services: services.clone(),
    }))
}

#[async_trait]
impl NodeExecutor for ConditionAgentExecutor {
    async fn execute(&self, _state: &Value, _run_config: &RunConfig) -> Result<NodeResult> {
        let model = match self.services.llm_client_factory.resolve(&self.model_handle) {
            Ok(model) => model,
            Err(e) => {
                return Ok(NodeResult::Error(NodeError::new(
                    NodeErrorKind::External,
                    format!("failed to resolve model '{}': {e}", self.model_handle),
                    self.node_id.clone(),
                )));
            }
        };

        let instruction = format!(
            "{}\n\nRespond with exactly one of the following options and nothing else: {}",
            self.prompt,
            self.options.join(", ")
        );
        let request = ChatRequest::new(vec![Message::human(instruction)]);
        let response = match model.chat(request).await {
            Ok(r) => r,
            Err(e) => {
                return Ok(NodeResult::Error(NodeError::new(
                    NodeErrorKind::External,
                    format!("LLM call failed: {e}"),
                    self.node_id.clone(),
                )));
            }
        };

        let raw = response.message.text().unwrap_or("").trim().to_string();
        let selected = self
            .options
            .iter()
            .find(|opt| opt.eq_ignore_ascii_case(&raw))
            .cloned()
            .unwrap_or(raw);

        let mut delta = serde_json::Map::new();
        delta.insert("selected_option".into(), Value::String(selected.clone()));
        Ok(NodeResult::State(append_route_history(delta, &self.node_id, &Value::String(selected))))
    }

    fn declared_writes(&self) -> Vec<String> {
        vec!["selected_option".to_string(), "route_history".to_string()]
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
struct RouterRule {
    condition: String,
    #[serde(rename = "targetEdgeKey")]
    target_edge_key: String,
    #[serde(default)]
    priority: i64,
}

/// `router_node`: evaluates a sorted list of rules, first match wins.
pub struct RouterNodeExecutor {
    node_id: String,
    rules: Vec<RouterRule>,
    default_route: Option<String>,
    services: Services,
}

pub(crate) fn build_router(node: &NodeDef, services: &Services) -> Result<Arc<dyn NodeExecutor>> {
    let mut rules: Vec<RouterRule> = node
        .config
        .get("rules")
        .cloned()
        .map(serde_json::from_value)
        .transpose()
        .map_err(|e| crate::error::GraphError::param(node.id.clone(), format!("invalid 'rules' config: {e}")))?
        .unwrap_or_default();
    rules.sort_by_key(|r| r.priority);
    let default_route = super::optional_str(&node.config, "defaultRoute").map(|s| s.to_string());
    Ok(Arc::new(RouterNodeExecutor {
        node_id: node.id.clone(),
        rules,
        default_route,
        services: services.clone(),
    }))
}

#[async_trait]
impl NodeExecutor for RouterNodeExecutor {
    async fn execute(&self, state: &Value, _run_config: &RunConfig) -> Result<NodeResult> {
        for rule in &self.rules {
            match self.services.expression_evaluator.evaluate_bool(&rule.condition, state) {
                Ok(true) => {
                    let mut delta = serde_json::Map::new();
                    delta.insert("target_edge_key".into(), Value::String(rule.target_edge_key.clone()));
                    return Ok(NodeResult::State(append_route_history(delta, &self.node_id, &Value::String(rule.target_edge_key.clone()))));
                }
                Ok(false) => continue,
                Err(e) => {
                    return Ok(NodeResult::Error(NodeError::new(NodeErrorKind::UserExpression, e.to_string(), self.node_id.clone())));
                }
            }
        }
        match &self.default_route {
            Some(route) => {
                let mut delta = serde_json::Map::new();
                delta.insert("target_edge_key".into(), Value::String(route.clone()));
                Ok(NodeResult::State(append_route_history(delta, &self.node_id, &Value::String(route.clone()))))
            }
            None => Ok(NodeResult::Error(NodeError::new(
                NodeErrorKind::Internal,
                "no router rule matched and no defaultRoute configured".to_string(),
                self.node_id.clone(),
            ))),
        }
    }

    fn declared_writes(&self) -> Vec<String> {
        vec!["target_edge_key".to_string(), "route_history".to_string()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph_def::NodeKind;

    #[tokio::test]
    async fn condition_executor_writes_route_decision() {
        let services = Services::builder().build();
        let mut node = NodeDef::new("cond1", NodeKind::Condition, "cond1");
        node.config.insert("condition".into(), serde_json::json!("count > 3"));
        let executor = build_condition(&node, &services).unwrap();

        let state = serde_json::json!({"count": 5});
        let result = executor.execute(&state, &RunConfig::new("t1")).await.unwrap();
        let delta = result.get_state_update().unwrap();
        assert_eq!(delta.get("route_decision"), Some(&Value::Bool(true)));
    }

    #[tokio::test]
    async fn router_node_falls_back_to_default_route() {
        let services = Services::builder().build();
        let mut node = NodeDef::new("router1", NodeKind::RouterNode, "router1");
        node.config.insert(
            "rules".into(),
            serde_json::json!([{"condition": "false", "targetEdgeKey": "never", "priority": 0}]),
        );
        node.config.insert("defaultRoute".into(), serde_json::json!("fallback"));
        let executor = build_router(&node, &services).unwrap();

        let state = serde_json::json!({});
        let result = executor.execute(&state, &RunConfig::new("t1")).await.unwrap();
        let delta = result.get_state_update().unwrap();
        assert_eq!(delta.get("target_edge_key"), Some(&Value::String("fallback".into())));
    }

    #[tokio::test]
    async fn router_node_errors_without_match_or_default() {
        let services = Services::builder().build();
        let node = NodeDef::new("router1", NodeKind::RouterNode, "router1");
        let executor = build_router(&node, &services).unwrap();
        let result = executor.execute(&serde_json::json!({}), &RunConfig::new("t1")).await.unwrap();
        assert!(result.is_error());
    }
}
