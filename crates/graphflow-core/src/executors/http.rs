//! HTTP executor (`http`): issues a configured request, retrying transient
//! network/timeout/5xx failures with [`crate::retry::RetryPolicy`].

use crate::error::Result;
use crate::graph_def::NodeDef;
use crate::node_result::{NodeError, NodeErrorKind, NodeResult};
use crate::plan::NodeExecutor;
use crate::runtime::RunConfig;
use crate::retry::RetryPolicy;
use crate::services::Services;
use async_trait::async_trait;
use reqwest::Method;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

pub struct HttpExecutor {
    node_id: String,
    method: Method,
    url_template: String,
    headers: HashMap<String, String>,
    body_field: Option<String>,
    output_variable: String,
    retry_policy: RetryPolicy,
    services: Services,
}

pub(crate) fn build(node: &NodeDef, services: &Services) -> Result<Arc<dyn NodeExecutor>> {
    let method_str = super::optional_str(&node.config, "method").unwrap_or("GET");
    let method = method_str
        .parse::<Method>()
        .map_err(|_| crate::error::GraphError::param(node.id.clone(), format!("invalid HTTP method '{method_str}'")))?;
    let url_template = super::required_str(&node.config, &node.id, "url")?.to_string();
    let headers = node
        .config
        .get("headers")
        .and_then(|v| v.as_object())
        .map(|obj| obj.iter().filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string()))).collect())
        .unwrap_or_default();
    let body_field = super::optional_str(&node.config, "body_field").map(str::to_string);
    let output_variable = super::optional_str(&node.config, "output_variable").unwrap_or("http_response").to_string();
    let max_attempts = node.config.get("maxRetries").and_then(|v| v.as_u64()).map(|n| n as usize + 1).unwrap_or(3);

    Ok(Arc::new(HttpExecutor {
        node_id: node.id.clone(),
        method,
        url_template,
        headers,
        body_field,
        output_variable,
        retry_policy: RetryPolicy::new(max_attempts),
        services: services.clone(),
    }))
}

fn substitute(template: &str, state: &Value) -> String {
    let mut rendered = template.to_string();
    if let Value::Object(map) = state {
        for (key, value) in map {
            if let Some(s) = value.as_str() {
                rendered = rendered.replace(&format!("{{{key}}}"), s);
            }
        }
    }
    rendered
}

fn is_transient(status: reqwest::StatusCode) -> bool {
    status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS
}

#[async_trait]
impl NodeExecutor for HttpExecutor {
    async fn execute(&self, state: &Value, _run_config: &RunConfig) -> Result<NodeResult> {
        let url = substitute(&self.url_template, state);
        let body = self.body_field.as_ref().and_then(|field| state.get(field)).cloned();

        let mut attempt = 0usize;
        loop {
            let mut request = self.services.http_client.request(self.method.clone(), url.as_str());
            for (key, value) in &self.headers {
                request = request.header(key.as_str(), value.as_str());
            }
            if let Some(body) = &body {
                request = request.json(body);
            }

            let outcome = request.send().await;
            match outcome {
                Ok(response) if !is_transient(response.status()) => {
                    let status = response.status().as_u16();
                    let payload: Value = response.json().await.unwrap_or(Value::Null);
                    if status >= 400 {
                        return Ok(NodeResult::Error(NodeError::new(
                            NodeErrorKind::External,
                            format!("http request failed with status {status}"),
                            self.node_id.clone(),
                        )));
                    }
                    let mut delta = serde_json::Map::new();
                    delta.insert(self.output_variable.clone(), serde_json::json!({"status": status, "body": payload}));
                    return Ok(NodeResult::State(Value::Object(delta)));
                }
                Ok(response) => {
                    if !self.retry_policy.should_retry(attempt) {
                        return Ok(NodeResult::Error(NodeError::new(
                            NodeErrorKind::External,
                            format!("http request failed after retries with status {}", response.status()),
                            self.node_id.clone(),
                        )));
                    }
                }
                Err(e) => {
                    if !self.retry_policy.should_retry(attempt) {
                        return Ok(NodeResult::Error(NodeError::new(
                            NodeErrorKind::External,
                            format!("http request failed after retries: {e}"),
                            self.node_id.clone(),
                        )));
                    }
                }
            }

            tokio::time::sleep(self.retry_policy.calculate_delay(attempt)).await;
            attempt += 1;
        }
    }

    fn declared_writes(&self) -> Vec<String> {
        vec![self.output_variable.clone()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph_def::NodeKind;

    #[test]
    fn build_rejects_invalid_method() {
        let services = Services::builder().build();
        let mut node = NodeDef::new("http1", NodeKind::Http, "http1");
        node.config.insert("method".into(), serde_json::json!("NOT-A-METHOD"));
        node.config.insert("url".into(), serde_json::json!("https://example.com"));
        assert!(build(&node, &services).is_err());
    }

    #[test]
    fn url_template_substitutes_state_fields() {
        let state = serde_json::json!({"id": "abc123"});
        let rendered = substitute("https://api.example.com/items/{id}", &state);
        assert_eq!(rendered, "https://api.example.com/items/abc123");
    }

    #[test]
    fn transient_status_codes_are_retried() {
        assert!(is_transient(reqwest::StatusCode::SERVICE_UNAVAILABLE));
        assert!(is_transient(reqwest::StatusCode::TOO_MANY_REQUESTS));
        assert!(!is_transient(reqwest::StatusCode::NOT_FOUND));
    }
}
