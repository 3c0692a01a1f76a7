//! Response types returned by a [`crate::llm::ChatModel`] implementation.

use crate::messages::Message;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Token accounting for one chat call, when the provider reports it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageMetadata {
    pub input_tokens: u32,
    pub output_tokens: u32,
    /// Tokens spent on hidden reasoning, for thinking models that report it separately.
    pub reasoning_tokens: Option<u32>,
    pub total_tokens: u32,
}

/// Extended reasoning content surfaced by thinking models (OpenAI o1, DeepSeek R1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasoningContent {
    pub content: String,
    /// Provider-specific signature/redaction marker, opaque to callers.
    pub signature: Option<String>,
}

/// A complete, non-streaming chat response.
#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub message: Message,
    pub usage: Option<UsageMetadata>,
    pub reasoning: Option<ReasoningContent>,
    pub metadata: HashMap<String, Value>,
}

/// One piece of a streaming chat response.
#[derive(Debug, Clone)]
pub struct MessageChunk {
    pub content: String,
    pub message_id: Option<String>,
    pub is_final: bool,
    pub metadata: Option<Value>,
}

impl MessageChunk {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            message_id: None,
            is_final: false,
            metadata: None,
        }
    }

    pub fn with_message_id(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = Some(message_id.into());
        self
    }

    pub fn final_chunk(mut self) -> Self {
        self.is_final = true;
        self
    }
}

/// A streaming chat response: a lazy sequence of [`MessageChunk`]s, plus
/// usage metadata once the stream is known to be complete (providers that
/// report usage only in a trailing event fill this in after the fact).
pub struct ChatStreamResponse {
    pub chunks: BoxStream<'static, crate::error::Result<MessageChunk>>,
    pub usage: Option<UsageMetadata>,
}

impl std::fmt::Debug for ChatStreamResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatStreamResponse").field("usage", &self.usage).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_chunk_builder_sets_fields() {
        let chunk = MessageChunk::new("hi").with_message_id("m1").final_chunk();
        assert_eq!(chunk.content, "hi");
        assert_eq!(chunk.message_id, Some("m1".to_string()));
        assert!(chunk.is_final);
    }

    #[test]
    fn usage_metadata_defaults_to_zero() {
        let usage = UsageMetadata::default();
        assert_eq!(usage.total_tokens, 0);
        assert!(usage.reasoning_tokens.is_none());
    }
}
