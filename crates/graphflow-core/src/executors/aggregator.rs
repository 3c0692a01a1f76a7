//! Aggregator executor (`aggregator_node`): fan-in barrier plus optional
//! generic combination over `source_variables` -> `target_variable`.
//!
//! The barrier itself (waiting for every expected `task_results` entry to
//! arrive) is enforced by [`crate::runtime`] before this executor runs; by
//! the time `execute` is called, all expected branches have already merged.

use crate::error::Result;
use crate::graph_def::NodeDef;
use crate::node_result::{NodeError, NodeErrorKind, NodeResult};
use crate::plan::NodeExecutor;
use crate::runtime::RunConfig;
use crate::services::Services;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorStrategy {
    FailFast,
    BestEffort,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CombineMethod {
    Append,
    Sum,
    Merge,
    Latest,
}

impl CombineMethod {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "append" => Some(Self::Append),
            "sum" => Some(Self::Sum),
            "merge" => Some(Self::Merge),
            "latest" => Some(Self::Latest),
            _ => None,
        }
    }

    fn combine(&self, values: &[Value]) -> Value {
        match self {
            CombineMethod::Append => Value::Array(values.to_vec()),
            CombineMethod::Sum => {
                let total: f64 = values.iter().filter_map(|v| v.as_f64()).sum();
                serde_json::json!(total)
            }
            CombineMethod::Merge => {
                let mut merged = serde_json::Map::new();
                for v in values {
                    if let Value::Object(map) = v {
                        for (k, val) in map {
                            merged.insert(k.clone(), val.clone());
                        }
                    }
                }
                Value::Object(merged)
            }
            CombineMethod::Latest => values.last().cloned().unwrap_or(Value::Null),
        }
    }
}

pub struct AggregatorExecutor {
    node_id: String,
    error_strategy: ErrorStrategy,
    method: Option<CombineMethod>,
    source_variables: Vec<String>,
    target_variable: Option<String>,
}

pub(crate) fn build(node: &NodeDef, _services: &Services) -> Result<Arc<dyn NodeExecutor>> {
    let error_strategy = match super::optional_str(&node.config, "error_strategy").unwrap_or("fail_fast") {
        "fail_fast" => ErrorStrategy::FailFast,
        "best_effort" => ErrorStrategy::BestEffort,
        other => {
            return Err(crate::error::GraphError::param(
                node.id.clone(),
                format!("unknown error_strategy '{other}', expected fail_fast|best_effort"),
            ));
        }
    };
    let method = super::optional_str(&node.config, "method")
        .map(|m| {
            CombineMethod::parse(m)
                .ok_or_else(|| crate::error::GraphError::param(node.id.clone(), format!("unknown method '{m}'")))
        })
        .transpose()?;
    let source_variables = node
        .config
        .get("source_variables")
        .and_then(|v| v.as_array())
        .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
        .unwrap_or_default();
    let target_variable = super::optional_str(&node.config, "target_variable").map(str::to_string);

    Ok(Arc::new(AggregatorExecutor {
        node_id: node.id.clone(),
        error_strategy,
        method,
        source_variables,
        target_variable,
    }))
}

#[async_trait]
impl NodeExecutor for AggregatorExecutor {
    async fn execute(&self, state: &Value, _run_config: &RunConfig) -> Result<NodeResult> {
        let task_results = state.get("task_results").and_then(|v| v.as_array()).cloned().unwrap_or_default();

        let errors: Vec<&Value> = task_results
            .iter()
            .filter(|r| r.get("status").and_then(|s| s.as_str()) == Some("error"))
            .collect();

        if self.error_strategy == ErrorStrategy::FailFast && !errors.is_empty() {
            let messages: Vec<String> = errors.iter().filter_map(|e| e.get("error").and_then(|v| v.as_str()).map(str::to_string)).collect();
            return Ok(NodeResult::Error(NodeError::new(
                NodeErrorKind::Internal,
                crate::error::GraphError::aggregated(messages, task_results.len()).to_string(),
                self.node_id.clone(),
            )));
        }

        let mut delta = serde_json::Map::new();
        if self.error_strategy == ErrorStrategy::BestEffort {
            let success: Vec<&Value> = task_results.iter().filter(|r| r.get("status").and_then(|s| s.as_str()) == Some("success")).collect();
            delta.insert("status".to_string(), Value::String("success".to_string()));
            delta.insert("success_count".to_string(), serde_json::json!(success.len()));
            delta.insert("error_count".to_string(), serde_json::json!(errors.len()));
            delta.insert("results".to_string(), Value::Array(success.into_iter().cloned().collect()));
            delta.insert("errors".to_string(), Value::Array(errors.into_iter().cloned().collect()));
        }

        if let (Some(method), Some(target)) = (self.method, &self.target_variable) {
            let values: Vec<Value> = self
                .source_variables
                .iter()
                .filter_map(|name| state.get(name).cloned())
                .collect();
            delta.insert(target.clone(), method.combine(&values));
        }

        Ok(NodeResult::State(Value::Object(delta)))
    }

    fn declared_reads(&self) -> Vec<String> {
        let mut reads = vec!["task_results".to_string()];
        reads.extend(self.source_variables.clone());
        reads
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph_def::NodeKind;

    #[tokio::test]
    async fn fail_fast_errors_when_any_task_failed() {
        let services = Services::builder().build();
        let mut node = NodeDef::new("agg1", NodeKind::AggregatorNode, "agg1");
        node.config.insert("error_strategy".into(), serde_json::json!("fail_fast"));
        let executor = build(&node, &services).unwrap();

        let state = serde_json::json!({"task_results": [{"task_id": "a", "status": "error", "error": "boom"}]});
        let result = executor.execute(&state, &RunConfig::new("t1")).await.unwrap();
        assert!(result.is_error());
    }

    #[tokio::test]
    async fn best_effort_reports_counts() {
        let services = Services::builder().build();
        let mut node = NodeDef::new("agg1", NodeKind::AggregatorNode, "agg1");
        node.config.insert("error_strategy".into(), serde_json::json!("best_effort"));
        let executor = build(&node, &services).unwrap();

        let state = serde_json::json!({"task_results": [
            {"task_id": "a", "status": "success"},
            {"task_id": "b", "status": "error", "error": "boom"},
        ]});
        let result = executor.execute(&state, &RunConfig::new("t1")).await.unwrap();
        let delta = result.get_state_update().unwrap();
        assert_eq!(delta.get("success_count"), Some(&serde_json::json!(1)));
        assert_eq!(delta.get("error_count"), Some(&serde_json::json!(1)));
    }

    #[tokio::test]
    async fn generic_sum_combination_writes_target_variable() {
        let services = Services::builder().build();
        let mut node = NodeDef::new("agg1", NodeKind::AggregatorNode, "agg1");
        node.config.insert("error_strategy".into(), serde_json::json!("best_effort"));
        node.config.insert("method".into(), serde_json::json!("sum"));
        node.config.insert("source_variables".into(), serde_json::json!(["a", "b"]));
        node.config.insert("target_variable".into(), serde_json::json!("total"));
        let executor = build(&node, &services).unwrap();

        let state = serde_json::json!({"a": 2, "b": 3, "task_results": []});
        let result = executor.execute(&state, &RunConfig::new("t1")).await.unwrap();
        let delta = result.get_state_update().unwrap();
        assert_eq!(delta.get("total"), Some(&serde_json::json!(5.0)));
    }
}
