//! Message and request types for LLM communication.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::ThinkingLevel;

/// Default maximum tokens to generate.
pub const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Role of a message in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// User message, including tool-result turns.
    User,
    /// Assistant message (LLM response).
    Assistant,
}

/// One block of message content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Plain assistant or user text.
    Text { text: String },
    /// A model-initiated function call.
    ToolUse { id: String, name: String, input: Value },
    /// The outcome of a function call, answering a `tool_use` by id.
    ToolResult { tool_use_id: String, content: String },
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn tool_result(tool_use_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::ToolResult {
            tool_use_id: tool_use_id.into(),
            content: content.into(),
        }
    }
}

/// A single message in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: Vec<ContentBlock>,
}

impl ChatMessage {
    /// Creates a user message with one text block.
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: vec![ContentBlock::text(text)],
        }
    }

    /// Creates a user turn carrying tool results.
    pub fn tool_results(results: Vec<ContentBlock>) -> Self {
        Self {
            role: MessageRole::User,
            content: results,
        }
    }

    /// Creates an assistant message from content blocks.
    pub fn assistant(content: Vec<ContentBlock>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content,
        }
    }

    /// Concatenated text of all text blocks.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }
}

/// Declarative tool surface offered to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// Why the model stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Normal end of turn.
    EndTurn,
    /// The model is requesting tool calls.
    ToolUse,
}

/// The sealed result of one streamed model turn.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamingResponse {
    pub content: Vec<ContentBlock>,
    pub stop_reason: StopReason,
}

impl StreamingResponse {
    /// The tool_use blocks in this response, in order.
    pub fn tool_uses(&self) -> impl Iterator<Item = (&str, &str, &Value)> {
        self.content.iter().filter_map(|block| match block {
            ContentBlock::ToolUse { id, name, input } => {
                Some((id.as_str(), name.as_str(), input))
            }
            _ => None,
        })
    }
}

/// Extended-reasoning request options in the provider's shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThinkingConfig {
    #[serde(rename = "type")]
    pub kind: String,
    pub budget_tokens: u32,
}

impl ThinkingConfig {
    pub fn enabled(level: ThinkingLevel) -> Self {
        Self {
            kind: "enabled".to_string(),
            budget_tokens: level.budget_tokens(),
        }
    }
}

/// One LLM turn request.
#[derive(Debug, Clone, Serialize)]
pub struct MessageRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking: Option<ThinkingConfig>,
}

impl MessageRequest {
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            max_tokens: DEFAULT_MAX_TOKENS,
            system: None,
            tools: Vec::new(),
            stream: true,
            thinking: None,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_thinking(mut self, thinking: Option<ThinkingConfig>) -> Self {
        self.thinking = thinking;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_block_serialization() {
        let block = ContentBlock::text("hello");
        let json = serde_json::to_string(&block).unwrap();
        assert_eq!(json, r#"{"type":"text","text":"hello"}"#);

        let block = ContentBlock::ToolUse {
            id: "toolu_1".to_string(),
            name: "list_tables".to_string(),
            input: serde_json::json!({}),
        };
        let json = serde_json::to_string(&block).unwrap();
        assert!(json.contains(r#""type":"tool_use""#));
        assert!(json.contains(r#""id":"toolu_1""#));
    }

    #[test]
    fn test_chat_message_text_concatenation() {
        let message = ChatMessage::assistant(vec![
            ContentBlock::text("Hello"),
            ContentBlock::ToolUse {
                id: "toolu_1".to_string(),
                name: "list_tables".to_string(),
                input: serde_json::json!({}),
            },
            ContentBlock::text(" world"),
        ]);
        assert_eq!(message.text(), "Hello world");
    }

    #[test]
    fn test_request_serialization_skips_empty() {
        let request = MessageRequest::new("claude-sonnet-4", vec![ChatMessage::user_text("hi")]);
        let json = serde_json::to_string(&request).unwrap();
        assert!(!json.contains("system"));
        assert!(!json.contains("tools"));
        assert!(!json.contains("thinking"));
        assert!(json.contains(r#""stream":true"#));
    }

    #[test]
    fn test_streaming_response_tool_uses() {
        let response = StreamingResponse {
            content: vec![
                ContentBlock::text("Let me check."),
                ContentBlock::ToolUse {
                    id: "toolu_1".to_string(),
                    name: "execute_sql".to_string(),
                    input: serde_json::json!({"query": "SELECT 1"}),
                },
            ],
            stop_reason: StopReason::ToolUse,
        };
        let uses: Vec<_> = response.tool_uses().collect();
        assert_eq!(uses.len(), 1);
        assert_eq!(uses[0].1, "execute_sql");
    }

    #[test]
    fn test_thinking_config_from_level() {
        let config = ThinkingConfig::enabled(ThinkingLevel::Medium);
        assert_eq!(config.kind, "enabled");
        assert_eq!(config.budget_tokens, 4096);
    }
}
