//! Agent executor (`agent`, `code_agent`): drives an LLM tool-calling loop.

use crate::error::{GraphError, Result};
use crate::graph_def::NodeDef;
use crate::llm::{ChatRequest};
use crate::messages::Message;
use crate::node_result::{NodeError, NodeErrorKind, NodeResult};
use crate::plan::NodeExecutor;
use crate::runtime::RunConfig;
use crate::services::Services;
use crate::tool::{ToolCall, ToolRuntime};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

const DEFAULT_MAX_STEPS: u32 = 10;

pub struct AgentExecutor {
    node_id: String,
    model_handle: String,
    temperature: Option<f32>,
    max_tokens: Option<usize>,
    system_prompt: Option<String>,
    max_steps: u32,
    services: Services,
}

pub(crate) fn build(node: &NodeDef, services: &Services) -> Result<Arc<dyn NodeExecutor>> {
    let model_handle = super::required_str(&node.config, &node.id, "model")?.to_string();
    let temperature = node.config.get("temperature").and_then(|v| v.as_f64()).map(|f| f as f32);
    let max_tokens = node.config.get("max_tokens").and_then(|v| v.as_u64()).map(|n| n as usize);
    let system_prompt = super::optional_str(&node.config, "systemPrompt").map(|s| s.to_string());
    let max_steps = node
        .config
        .get("maxSteps")
        .and_then(|v| v.as_u64())
        .map(|n| n as u32)
        .unwrap_or(DEFAULT_MAX_STEPS);

    Ok(Arc::new(AgentExecutor {
        node_id: node.id.clone(),
        model_handle,
        temperature,
        max_tokens,
        system_prompt,
        max_steps,
        services: services.clone(),
    }))
}

impl AgentExecutor {
    fn conversation(&self, state: &Value) -> Result<Vec<Message>> {
        let mut messages: Vec<Message> = state
            .get("messages")
            .cloned()
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| GraphError::state_error(Some(self.node_id.clone()), format!("invalid 'messages' field: {e}")))?
            .unwrap_or_default();
        if let Some(prompt) = &self.system_prompt {
            messages.insert(0, Message::system(prompt.clone()));
        }
        Ok(messages)
    }
}

#[async_trait]
impl NodeExecutor for AgentExecutor {
    async fn execute(&self, state: &Value, _run_config: &RunConfig) -> Result<NodeResult> {
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

        let mut conversation = self.conversation(state)?;
        let mut new_messages: Vec<Message> = Vec::new();
        let mut steps = 0u32;

        loop {
            let mut request = ChatRequest::new(conversation.clone());
            if let Some(t) = self.temperature {
                request = request.with_temperature(t);
            }
            if let Some(mt) = self.max_tokens {
                request = request.with_max_tokens(mt);
            }

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

            let assistant_message = response.message.clone();
            conversation.push(assistant_message.clone());
            new_messages.push(assistant_message.clone());

            let tool_calls = match &assistant_message.tool_calls {
                Some(calls) if !calls.is_empty() => calls.clone(),
                _ => break,
            };

            steps += 1;
            if steps > self.max_steps {
                break;
            }

            for call in tool_calls {
                let tool_call = ToolCall {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    args: call.args.clone(),
                };
                let runtime = ToolRuntime::new(state.clone()).with_tool_call_id(call.id.clone());
                let result = self.services.tool_registry.execute_tool_call(&tool_call, Some(runtime)).await;
                let content = serde_json::to_string(&result.output).unwrap_or_else(|_| "null".to_string());
                let tool_message = Message::tool(content, call.id.clone());
                conversation.push(tool_message.clone());
                new_messages.push(tool_message);
            }
        }

        let delta = serde_json::json!({
            "messages": new_messages,
            "current_node": self.node_id,
        });
        Ok(NodeResult::State(delta))
    }

    fn declared_reads(&self) -> Vec<String> {
        vec!["messages".to_string(), "context".to_string()]
    }

    fn declared_writes(&self) -> Vec<String> {
        vec!["messages".to_string(), "current_node".to_string()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph_def::NodeKind;
    use crate::llm::{ChatResponse, ChatStreamResponse};
    use crate::services::{LlmClientFactory, StaticLlmClientFactory};
    use async_trait::async_trait;

    struct StubModel;

    #[async_trait]
    impl crate::llm::ChatModel for StubModel {
        async fn chat(&self, _request: ChatRequest) -> Result<ChatResponse> {
            Ok(ChatResponse {
                message: Message::ai("final answer"),
                usage: None,
                reasoning: None,
                metadata: Default::default(),
            })
        }

        async fn stream(&self, _request: ChatRequest) -> Result<ChatStreamResponse> {
            unimplemented!()
        }
    }

    #[tokio::test]
    async fn agent_executor_appends_assistant_reply_without_tool_calls() {
        let factory = StaticLlmClientFactory::new().with_client("stub", Arc::new(StubModel));
        let services = Services::builder().with_llm_client_factory(Arc::new(factory)).build();
        let mut node = NodeDef::new("agent1", NodeKind::Agent, "agent1");
        node.config.insert("model".into(), serde_json::json!("stub"));
        let executor = build(&node, &services).unwrap();

        let state = serde_json::json!({"messages": []});
        let run_config = RunConfig::new("thread1");
        let result = executor.execute(&state, &run_config).await.unwrap();
        let delta = result.get_state_update().unwrap();
        let messages = delta.get("messages").unwrap().as_array().unwrap();
        assert_eq!(messages.len(), 1);
    }

    #[tokio::test]
    async fn agent_executor_surfaces_unresolvable_model_as_external_error() {
        let services = Services::builder().build();
        let mut node = NodeDef::new("agent1", NodeKind::Agent, "agent1");
        node.config.insert("model".into(), serde_json::json!("missing-model"));
        let executor = build(&node, &services).unwrap();

        let state = serde_json::json!({"messages": []});
        let run_config = RunConfig::new("thread1");
        let result = executor.execute(&state, &run_config).await.unwrap();
        assert!(result.is_error());
    }
}
