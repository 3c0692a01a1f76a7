//! Loop executor (`loop_condition_node`): while / doWhile / forEach.

use crate::error::Result;
use crate::graph_def::NodeDef;
use crate::node_result::{NodeError, NodeErrorKind, NodeResult};
use crate::plan::NodeExecutor;
use crate::runtime::RunConfig;
use crate::services::Services;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

const DEFAULT_MAX_ITERATIONS: u64 = 5;

#[derive(Debug, Clone)]
enum ConditionType {
    While { condition: String },
    DoWhile { condition: String },
    ForEach { list_variable: String, element_variable: String },
}

pub struct LoopConditionExecutor {
    node_id: String,
    condition_type: ConditionType,
    max_iterations: u64,
    services: Services,
}

pub(crate) fn build(node: &NodeDef, services: &Services) -> Result<Arc<dyn NodeExecutor>> {
    let kind = super::required_str(&node.config, &node.id, "conditionType")?;
    let max_iterations = node
        .config
        .get("maxIterations")
        .and_then(|v| v.as_u64())
        .unwrap_or(DEFAULT_MAX_ITERATIONS);

    let condition_type = match kind {
        "while" => ConditionType::While {
            condition: super::required_str(&node.config, &node.id, "condition")?.to_string(),
        },
        "doWhile" => ConditionType::DoWhile {
            condition: super::required_str(&node.config, &node.id, "condition")?.to_string(),
        },
        "forEach" => ConditionType::ForEach {
            list_variable: super::required_str(&node.config, &node.id, "listVariable")?.to_string(),
            element_variable: super::optional_str(&node.config, "elementVariable").unwrap_or("current_item").to_string(),
        },
        other => {
            return Err(crate::error::GraphError::param(
                node.id.clone(),
                format!("unknown conditionType '{other}', expected while|doWhile|forEach"),
            ));
        }
    };

    Ok(Arc::new(LoopConditionExecutor {
        node_id: node.id.clone(),
        condition_type,
        max_iterations,
        services: services.clone(),
    }))
}

fn loop_scope(state: &Value, node_id: &str) -> Value {
    state
        .get("loop_state")
        .and_then(|ls| ls.get(node_id))
        .cloned()
        .unwrap_or_else(|| serde_json::json!({"loop_count": 0}))
}

#[async_trait]
impl NodeExecutor for LoopConditionExecutor {
    async fn execute(&self, state: &Value, _run_config: &RunConfig) -> Result<NodeResult> {
        let scope = loop_scope(state, &self.node_id);
        let loop_count = scope.get("loop_count").and_then(|v| v.as_u64()).unwrap_or(0);

        if loop_count >= self.max_iterations {
            return Ok(Self::exit_result(&self.node_id, loop_count, false));
        }

        let (should_continue, extra) = match &self.condition_type {
            ConditionType::While { condition } | ConditionType::DoWhile { condition } => {
                match self.services.expression_evaluator.evaluate_bool(condition, state) {
                    Ok(v) => (v, serde_json::json!({})),
                    Err(e) => {
                        return Ok(NodeResult::Error(NodeError::new(NodeErrorKind::UserExpression, e.to_string(), self.node_id.clone())));
                    }
                }
            }
            ConditionType::ForEach { list_variable, element_variable } => {
                let list = state.get(list_variable).and_then(|v| v.as_array()).cloned().unwrap_or_default();
                let index = loop_count as usize;
                if index < list.len() {
                    let mut extra = serde_json::Map::new();
                    extra.insert(element_variable.clone(), list[index].clone());
                    (true, Value::Object(extra))
                } else {
                    (false, Value::Object(serde_json::Map::new()))
                }
            }
        };

        if !should_continue {
            return Ok(Self::exit_result(&self.node_id, loop_count, true));
        }

        let mut loop_state_entry = serde_json::Map::new();
        loop_state_entry.insert("loop_count".to_string(), serde_json::json!(loop_count + 1));
        let mut loop_state = serde_json::Map::new();
        loop_state.insert(self.node_id.clone(), Value::Object(loop_state_entry));

        let mut delta = serde_json::Map::new();
        delta.insert("loop_state".to_string(), Value::Object(loop_state));
        delta.insert("loop_handle".to_string(), Value::String("continue".to_string()));
        if let Value::Object(extra_map) = extra {
            for (k, v) in extra_map {
                delta.insert(k, v);
            }
        }
        Ok(NodeResult::State(Value::Object(delta)))
    }

    fn declared_reads(&self) -> Vec<String> {
        vec!["loop_state".to_string()]
    }

    fn declared_writes(&self) -> Vec<String> {
        vec!["loop_state".to_string(), "loop_handle".to_string(), "loop_condition_met".to_string()]
    }
}

impl LoopConditionExecutor {
    fn exit_result(node_id: &str, loop_count: u64, condition_met: bool) -> NodeResult {
        let mut loop_state_entry = serde_json::Map::new();
        loop_state_entry.insert("loop_count".to_string(), serde_json::json!(loop_count));
        let mut loop_state = serde_json::Map::new();
        loop_state.insert(node_id.to_string(), Value::Object(loop_state_entry));

        let mut delta = serde_json::Map::new();
        delta.insert("loop_state".to_string(), Value::Object(loop_state));
        delta.insert("loop_handle".to_string(), Value::String("exit".to_string()));
        delta.insert("loop_condition_met".to_string(), Value::Bool(condition_met));
        NodeResult::State(Value::Object(delta))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph_def::NodeKind;

    fn make_node(condition_type: &str, max_iterations: u64) -> NodeDef {
        let mut node = NodeDef::new("loop1", NodeKind::LoopConditionNode, "loop1");
        node.config.insert("conditionType".into(), serde_json::json!(condition_type));
        node.config.insert("maxIterations".into(), serde_json::json!(max_iterations));
        node
    }

    #[tokio::test]
    async fn while_loop_continues_while_condition_holds() {
        let services = Services::builder().build();
        let mut node = make_node("while", 5);
        node.config.insert("condition".into(), serde_json::json!("count < 3"));
        let executor = build(&node, &services).unwrap();

        let state = serde_json::json!({"count": 0});
        let result = executor.execute(&state, &RunConfig::new("t1")).await.unwrap();
        let delta = result.get_state_update().unwrap();
        assert_eq!(delta.get("loop_handle"), Some(&Value::String("continue".into())));
    }

    #[tokio::test]
    async fn loop_exits_once_condition_fails() {
        let services = Services::builder().build();
        let mut node = make_node("while", 5);
        node.config.insert("condition".into(), serde_json::json!("count < 3"));
        let executor = build(&node, &services).unwrap();

        let state = serde_json::json!({"count": 10});
        let result = executor.execute(&state, &RunConfig::new("t1")).await.unwrap();
        let delta = result.get_state_update().unwrap();
        assert_eq!(delta.get("loop_handle"), Some(&Value::String("exit".into())));
        assert_eq!(delta.get("loop_condition_met"), Some(&Value::Bool(true)));
    }

    #[tokio::test]
    async fn hard_iteration_bound_exits_without_error() {
        let services = Services::builder().build();
        let mut node = make_node("while", 2);
        node.config.insert("condition".into(), serde_json::json!("true"));
        let executor = build(&node, &services).unwrap();

        let state = serde_json::json!({"loop_state": {"loop1": {"loop_count": 2}}});
        let result = executor.execute(&state, &RunConfig::new("t1")).await.unwrap();
        let delta = result.get_state_update().unwrap();
        assert_eq!(delta.get("loop_handle"), Some(&Value::String("exit".into())));
        assert_eq!(delta.get("loop_condition_met"), Some(&Value::Bool(false)));
    }

    #[tokio::test]
    async fn for_each_advances_through_list() {
        let services = Services::builder().build();
        let mut node = make_node("forEach", 10);
        node.config.insert("listVariable".into(), serde_json::json!("items"));
        let executor = build(&node, &services).unwrap();

        let state = serde_json::json!({"items": ["a", "b"], "loop_state": {"loop1": {"loop_count": 1}}});
        let result = executor.execute(&state, &RunConfig::new("t1")).await.unwrap();
        let delta = result.get_state_update().unwrap();
        assert_eq!(delta.get("current_item"), Some(&Value::String("b".into())));
    }
}
