//! Function executor (`function`): a small library of predefined state
//! transforms, or an arbitrary expression evaluated through the restricted
//! expression language when `functionName` is `"expression"`.

use crate::error::Result;
use crate::graph_def::NodeDef;
use crate::node_result::{NodeError, NodeErrorKind, NodeResult};
use crate::plan::NodeExecutor;
use crate::runtime::RunConfig;
use crate::services::Services;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

#[derive(Debug, Clone)]
enum Function {
    Add { operands: Vec<String> },
    Multiply { operands: Vec<String> },
    Concat { operands: Vec<String>, separator: String },
    Get { field: String, default: Value },
    Set { value: Value },
    Expression { expr: String },
}

pub struct FunctionExecutor {
    node_id: String,
    function: Function,
    target_variable: String,
    services: Services,
}

pub(crate) fn build(node: &NodeDef, services: &Services) -> Result<Arc<dyn NodeExecutor>> {
    let name = super::required_str(&node.config, &node.id, "functionName")?;
    let target_variable = super::required_str(&node.config, &node.id, "target_variable")?.to_string();
    let operands = |cfg: &NodeDef| -> Vec<String> {
        cfg.config
            .get("operands")
            .and_then(|v| v.as_array())
            .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default()
    };

    let function = match name {
        "add" => Function::Add { operands: operands(node) },
        "multiply" => Function::Multiply { operands: operands(node) },
        "concat" => Function::Concat {
            operands: operands(node),
            separator: super::optional_str(&node.config, "separator").unwrap_or("").to_string(),
        },
        "get" => Function::Get {
            field: super::required_str(&node.config, &node.id, "field")?.to_string(),
            default: node.config.get("default").cloned().unwrap_or(Value::Null),
        },
        "set" => Function::Set {
            value: node.config.get("value").cloned().unwrap_or(Value::Null),
        },
        "expression" => Function::Expression {
            expr: super::required_str(&node.config, &node.id, "expression")?.to_string(),
        },
        other => {
            return Err(crate::error::GraphError::param(
                node.id.clone(),
                format!("unknown functionName '{other}', expected add|multiply|concat|get|set|expression"),
            ));
        }
    };

    Ok(Arc::new(FunctionExecutor {
        node_id: node.id.clone(),
        function,
        target_variable,
        services: services.clone(),
    }))
}

fn numeric_operands(state: &Value, operands: &[String]) -> Vec<f64> {
    operands.iter().filter_map(|name| state.get(name).and_then(|v| v.as_f64())).collect()
}

#[async_trait]
impl NodeExecutor for FunctionExecutor {
    async fn execute(&self, state: &Value, _run_config: &RunConfig) -> Result<NodeResult> {
        let value = match &self.function {
            Function::Add { operands } => Value::from(numeric_operands(state, operands).into_iter().sum::<f64>()),
            Function::Multiply { operands } => Value::from(numeric_operands(state, operands).into_iter().product::<f64>()),
            Function::Concat { operands, separator } => {
                let parts: Vec<String> = operands
                    .iter()
                    .map(|name| match state.get(name) {
                        Some(Value::String(s)) => s.clone(),
                        Some(other) => other.to_string(),
                        None => String::new(),
                    })
                    .collect();
                Value::String(parts.join(separator))
            }
            Function::Get { field, default } => state.get(field).cloned().unwrap_or_else(|| default.clone()),
            Function::Set { value } => value.clone(),
            Function::Expression { expr } => match self.services.expression_evaluator.evaluate(expr, state) {
                Ok(v) => v,
                Err(e) => {
                    return Ok(NodeResult::Error(NodeError::new(NodeErrorKind::UserExpression, e.to_string(), self.node_id.clone())));
                }
            },
        };

        let mut delta = serde_json::Map::new();
        delta.insert(self.target_variable.clone(), value);
        Ok(NodeResult::State(Value::Object(delta)))
    }

    fn declared_writes(&self) -> Vec<String> {
        vec![self.target_variable.clone()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph_def::NodeKind;

    #[tokio::test]
    async fn add_sums_named_operands() {
        let services = Services::builder().build();
        let mut node = NodeDef::new("fn1", NodeKind::Function, "fn1");
        node.config.insert("functionName".into(), serde_json::json!("add"));
        node.config.insert("operands".into(), serde_json::json!(["a", "b"]));
        node.config.insert("target_variable".into(), serde_json::json!("total"));
        let executor = build(&node, &services).unwrap();

        let state = serde_json::json!({"a": 2, "b": 5});
        let result = executor.execute(&state, &RunConfig::new("t1")).await.unwrap();
        let delta = result.get_state_update().unwrap();
        assert_eq!(delta.get("total"), Some(&serde_json::json!(7.0)));
    }

    #[tokio::test]
    async fn expression_function_uses_restricted_evaluator() {
        let services = Services::builder().build();
        let mut node = NodeDef::new("fn1", NodeKind::Function, "fn1");
        node.config.insert("functionName".into(), serde_json::json!("expression"));
        node.config.insert("expression".into(), serde_json::json!("count * 2"));
        node.config.insert("target_variable".into(), serde_json::json!("doubled"));
        let executor = build(&node, &services).unwrap();

        let state = serde_json::json!({"count": 4});
        let result = executor.execute(&state, &RunConfig::new("t1")).await.unwrap();
        let delta = result.get_state_update().unwrap();
        assert_eq!(delta.get("doubled"), Some(&serde_json::json!(8.0)));
    }

    #[test]
    fn build_rejects_unknown_function_name() {
        let services = Services::builder().build();
        let mut node = NodeDef::new("fn1", NodeKind::Function, "fn1");
        node.config.insert("functionName".into(), serde_json::json!("divide"));
        node.config.insert("target_variable".into(), serde_json::json!("x"));
        assert!(build(&node, &services).is_err());
    }
}
