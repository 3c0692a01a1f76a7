//! Direct reply executor (`direct_reply`): appends a single assistant
//! message built from a template with `{variable}` placeholders substituted
//! from State, with no LLM call involved.

use crate::error::Result;
use crate::graph_def::NodeDef;
use crate::messages::Message;
use crate::node_result::NodeResult;
use crate::plan::NodeExecutor;
use crate::runtime::RunConfig;
use crate::services::Services;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

pub struct DirectReplyExecutor {
    node_id: String,
    template: String,
}

pub(crate) fn build(node: &NodeDef, _services: &Services) -> Result<Arc<dyn NodeExecutor>> {
    let template = super::required_str(&node.config, &node.id, "template")?.to_string();
    Ok(Arc::new(DirectReplyExecutor {
        node_id: node.id.clone(),
        template,
    }))
}

fn render(template: &str, state: &Value) -> String {
    let mut rendered = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '{' {
            let mut name = String::new();
            let mut closed = false;
            for next in chars.by_ref() {
                if next == '}' {
                    closed = true;
                    break;
                }
                name.push(next);
            }
            if closed {
                let value = state.get(name.trim()).map(value_to_text).unwrap_or_default();
                rendered.push_str(&value);
            } else {
                rendered.push('{');
                rendered.push_str(&name);
            }
        } else {
            rendered.push(c);
        }
    }
    rendered
}

fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[async_trait]
impl NodeExecutor for DirectReplyExecutor {
    async fn execute(&self, state: &Value, _run_config: &RunConfig) -> Result<NodeResult> {
        let text = render(&self.template, state);
        let message = Message::ai(text);
        let delta = serde_json::json!({
            "messages": [message],
            "current_node": self.node_id,
        });
        Ok(NodeResult::State(delta))
    }

    fn declared_writes(&self) -> Vec<String> {
        vec!["messages".to_string(), "current_node".to_string()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph_def::NodeKind;

    #[tokio::test]
    async fn substitutes_state_variables_into_template() {
        let services = Services::builder().build();
        let mut node = NodeDef::new("reply1", NodeKind::DirectReply, "reply1");
        node.config.insert("template".into(), serde_json::json!("Hello, {name}! You have {count} new items."));
        let executor = build(&node, &services).unwrap();

        let state = serde_json::json!({"name": "Ada", "count": 3});
        let result = executor.execute(&state, &RunConfig::new("t1")).await.unwrap();
        let delta = result.get_state_update().unwrap();
        let messages = delta.get("messages").unwrap().as_array().unwrap();
        let text = messages[0].get("content").unwrap().as_str().unwrap();
        assert_eq!(text, "Hello, Ada! You have 3 new items.");
    }

    #[tokio::test]
    async fn missing_variable_renders_as_empty() {
        let services = Services::builder().build();
        let mut node = NodeDef::new("reply1", NodeKind::DirectReply, "reply1");
        node.config.insert("template".into(), serde_json::json!("Hi {missing}!"));
        let executor = build(&node, &services).unwrap();

        let state = serde_json::json!({});
        let result = executor.execute(&state, &RunConfig::new("t1")).await.unwrap();
        let delta = result.get_state_update().unwrap();
        let messages = delta.get("messages").unwrap().as_array().unwrap();
        let text = messages[0].get("content").unwrap().as_str().unwrap();
        assert_eq!(text, "Hi !");
    }
}
