//! Human input executor (`human_input`): the node itself never blocks —
//! the compiler forces `interruptBefore=true` on every node of this kind so
//! the runtime halts and checkpoints ahead of it. By the time `execute` runs
//! again on resume, the caller's `extraInput` has already been merged into
//! State under `pending_human_input`; this executor promotes it into
//! `messages` and clears the pending slot.

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

pub struct HumanInputExecutor {
    node_id: String,
    prompt: Option<String>,
}

pub(crate) fn build(node: &NodeDef, _services: &Services) -> Result<Arc<dyn NodeExecutor>> {
    let prompt = super::optional_str(&node.config, "prompt").map(str::to_string);
    Ok(Arc::new(HumanInputExecutor {
        node_id: node.id.clone(),
        prompt,
    }))
}

#[async_trait]
impl NodeExecutor for HumanInputExecutor {
    async fn execute(&self, state: &Value, _run_config: &RunConfig) -> Result<NodeResult> {
        let content = match state.get("pending_human_input").and_then(|v| v.as_str()) {
            Some(text) => text.to_string(),
            None => self.prompt.clone().unwrap_or_default(),
        };

        let message = Message::human(content);
        let delta = serde_json::json!({
            "messages": [message],
            "pending_human_input": Value::Null,
            "current_node": self.node_id,
        });
        Ok(NodeResult::State(delta))
    }

    fn declared_reads(&self) -> Vec<String> {
        vec!["pending_human_input".to_string()]
    }

    fn declared_writes(&self) -> Vec<String> {
        vec!["messages".to_string(), "pending_human_input".to_string(), "current_node".to_string()]
    }
}
