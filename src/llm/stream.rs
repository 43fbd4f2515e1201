//! Content-block reassembly for streamed model turns.
//!
//! The in-flight assistant turn is an ordered list of blocks keyed by the
//! provider's `index`. Text blocks accumulate deltas; tool_use blocks carry a
//! rolling JSON buffer whose last successful parse wins. Partial parse
//! failures are not errors.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::error::{Result, SaberError};
use crate::llm::types::{ContentBlock, StopReason, StreamingResponse};
use crate::llm::ClientEvent;

/// State of one in-flight content block.
#[derive(Debug, Clone)]
enum BlockState {
    Text(String),
    ToolUse {
        id: String,
        name: String,
        json_buffer: String,
        input: Value,
    },
}

/// Reassembles provider stream events into a final [`StreamingResponse`].
#[derive(Debug, Default)]
pub struct StreamAdapter {
    blocks: BTreeMap<u64, BlockState>,
    message_stopped: bool,
}

impl StreamAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `message_stop` has been seen.
    pub fn message_stopped(&self) -> bool {
        self.message_stopped
    }

    /// Handles one decoded provider event, returning the client events it
    /// produces. Unknown event types are ignored.
    pub fn handle_event(&mut self, event_type: &str, data: &Value) -> Result<Vec<ClientEvent>> {
        match event_type {
            "message_start" => Ok(vec![ClientEvent::MessageStart]),

            "content_block_start" => {
                let index = data["index"].as_u64().unwrap_or(0);
                let block = &data["content_block"];
                match block["type"].as_str() {
                    Some("tool_use") => {
                        let id = block["id"].as_str().unwrap_or_default().to_string();
                        let name = block["name"].as_str().unwrap_or_default().to_string();
                        self.blocks.insert(
                            index,
                            BlockState::ToolUse {
                                id: id.clone(),
                                name: name.clone(),
                                json_buffer: String::new(),
                                input: block
                                    .get("input")
                                    .cloned()
                                    .unwrap_or_else(|| Value::Object(Default::default())),
                            },
                        );
                        Ok(vec![ClientEvent::ToolUseStart {
                            index: index as usize,
                            id,
                            name,
                        }])
                    }
                    _ => {
                        let initial = block["text"].as_str().unwrap_or_default().to_string();
                        self.blocks.insert(index, BlockState::Text(initial));
                        Ok(Vec::new())
                    }
                }
            }

            "content_block_delta" => {
                let index = data["index"].as_u64().unwrap_or(0);
                let delta = &data["delta"];
                match delta["type"].as_str() {
                    Some("text_delta") => {
                        let text = delta["text"].as_str().unwrap_or_default().to_string();
                        if text.is_empty() {
                            return Ok(Vec::new());
                        }
                        match self.blocks.get_mut(&index) {
                            Some(BlockState::Text(existing)) => existing.push_str(&text),
                            _ => {
                                // Delta without a start record: begin a text block.
                                self.blocks.insert(index, BlockState::Text(text.clone()));
                            }
                        }
                        Ok(vec![ClientEvent::TextDelta {
                            index: index as usize,
                            text,
                        }])
                    }
                    Some("input_json_delta") => {
                        let fragment = delta["partial_json"].as_str().unwrap_or_default();
                        if let Some(BlockState::ToolUse {
                            json_buffer, input, ..
                        }) = self.blocks.get_mut(&index)
                        {
                            json_buffer.push_str(fragment);
                            // The final successful parse wins; failures along
                            // the way just mean the buffer is still partial.
                            if let Ok(parsed) = serde_json::from_str::<Value>(json_buffer) {
                                *input = parsed;
                            }
                        }
                        Ok(Vec::new())
                    }
                    _ => Ok(Vec::new()),
                }
            }

            "content_block_stop" => {
                let index = data["index"].as_u64().unwrap_or(0);
                Ok(vec![ClientEvent::ContentBlockStop {
                    index: index as usize,
                }])
            }

            "message_stop" => {
                self.message_stopped = true;
                Ok(vec![
                    ClientEvent::MessageStop,
                    ClientEvent::ResponseReady(self.seal()),
                ])
            }

            "ping" => Ok(vec![ClientEvent::Ping]),

            "error" => {
                let message = data["error"]["message"]
                    .as_str()
                    .or_else(|| data["message"].as_str())
                    .unwrap_or("Stream error");
                let kind = data["error"]["type"]
                    .as_str()
                    .or_else(|| data["type"].as_str())
                    .unwrap_or("stream_error");
                Err(SaberError::llm(format!("{kind}: {message}")))
            }

            // message_delta and anything unrecognized carry nothing we track.
            _ => Ok(Vec::new()),
        }
    }

    /// Seals the block set into a response. Empty text blocks are dropped;
    /// the stop reason is `ToolUse` iff any tool_use block exists.
    pub fn seal(&self) -> StreamingResponse {
        let mut content = Vec::new();
        let mut has_tool_use = false;

        for state in self.blocks.values() {
            match state {
                BlockState::Text(text) => {
                    if !text.is_empty() {
                        content.push(ContentBlock::Text { text: text.clone() });
                    }
                }
                BlockState::ToolUse {
                    id, name, input, ..
                } => {
                    has_tool_use = true;
                    content.push(ContentBlock::ToolUse {
                        id: id.clone(),
                        name: name.clone(),
                        input: input.clone(),
                    });
                }
            }
        }

        StreamingResponse {
            content,
            stop_reason: if has_tool_use {
                StopReason::ToolUse
            } else {
                StopReason::EndTurn
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn start_text(adapter: &mut StreamAdapter, index: u64) {
        adapter
            .handle_event(
                "content_block_start",
                &json!({"index": index, "content_block": {"type": "text", "text": ""}}),
            )
            .unwrap();
    }

    fn text_delta(adapter: &mut StreamAdapter, index: u64, text: &str) -> Vec<ClientEvent> {
        adapter
            .handle_event(
                "content_block_delta",
                &json!({"index": index, "delta": {"type": "text_delta", "text": text}}),
            )
            .unwrap()
    }

    fn start_tool_use(adapter: &mut StreamAdapter, index: u64, id: &str, name: &str) {
        adapter
            .handle_event(
                "content_block_start",
                &json!({
                    "index": index,
                    "content_block": {"type": "tool_use", "id": id, "name": name, "input": {}}
                }),
            )
            .unwrap();
    }

    fn json_delta(adapter: &mut StreamAdapter, index: u64, fragment: &str) {
        adapter
            .handle_event(
                "content_block_delta",
                &json!({"index": index, "delta": {"type": "input_json_delta", "partial_json": fragment}}),
            )
            .unwrap();
    }

    #[test]
    fn test_text_reassembly() {
        let mut adapter = StreamAdapter::new();
        start_text(&mut adapter, 0);
        let events = text_delta(&mut adapter, 0, "Hel");
        assert_eq!(events.len(), 1);
        text_delta(&mut adapter, 0, "lo");
        text_delta(&mut adapter, 0, "!");

        let response = adapter.seal();
        assert_eq!(response.content, vec![ContentBlock::text("Hello!")]);
        assert_eq!(response.stop_reason, StopReason::EndTurn);
    }

    #[test]
    fn test_empty_text_blocks_dropped() {
        let mut adapter = StreamAdapter::new();
        start_text(&mut adapter, 0);
        start_tool_use(&mut adapter, 1, "toolu_1", "list_tables");

        let response = adapter.seal();
        assert_eq!(response.content.len(), 1);
        assert_eq!(response.stop_reason, StopReason::ToolUse);
    }

    #[test]
    fn test_partial_json_any_split_yields_same_input() {
        let payload = r#"{"query": "SELECT * FROM users", "limit": 50}"#;
        let expected: Value = serde_json::from_str(payload).unwrap();

        for split in 0..=payload.len() {
            if !payload.is_char_boundary(split) {
                continue;
            }
            let mut adapter = StreamAdapter::new();
            start_tool_use(&mut adapter, 0, "toolu_1", "execute_sql");
            json_delta(&mut adapter, 0, &payload[..split]);
            json_delta(&mut adapter, 0, &payload[split..]);

            let response = adapter.seal();
            match &response.content[0] {
                ContentBlock::ToolUse { input, .. } => assert_eq!(input, &expected),
                other => panic!("unexpected block: {other:?}"),
            }
        }
    }

    #[test]
    fn test_last_good_parse_wins() {
        let mut adapter = StreamAdapter::new();
        start_tool_use(&mut adapter, 0, "toolu_1", "execute_sql");
        json_delta(&mut adapter, 0, r#"{"query""#);
        json_delta(&mut adapter, 0, r#": "SELECT 1"}"#);

        let response = adapter.seal();
        match &response.content[0] {
            ContentBlock::ToolUse { input, .. } => {
                assert_eq!(input["query"], "SELECT 1");
            }
            other => panic!("unexpected block: {other:?}"),
        }
    }

    #[test]
    fn test_message_stop_emits_response_ready() {
        let mut adapter = StreamAdapter::new();
        start_text(&mut adapter, 0);
        text_delta(&mut adapter, 0, "done");
        let events = adapter
            .handle_event("message_stop", &json!({"type": "message_stop"}))
            .unwrap();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], ClientEvent::MessageStop));
        match &events[1] {
            ClientEvent::ResponseReady(response) => {
                assert_eq!(response.content, vec![ContentBlock::text("done")]);
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(adapter.message_stopped());
    }

    #[test]
    fn test_error_event_raises() {
        let mut adapter = StreamAdapter::new();
        let err = adapter
            .handle_event(
                "error",
                &json!({"error": {"type": "overloaded_error", "message": "Overloaded"}}),
            )
            .unwrap_err();
        assert!(err.to_string().contains("overloaded_error"));
        assert!(err.to_string().contains("Overloaded"));
    }

    #[test]
    fn test_stop_reason_tool_use_with_mixed_blocks() {
        let mut adapter = StreamAdapter::new();
        start_text(&mut adapter, 0);
        text_delta(&mut adapter, 0, "Let me look.");
        start_tool_use(&mut adapter, 1, "toolu_9", "introspect_schema");
        json_delta(&mut adapter, 1, r#"{"table_pattern": "user%"}"#);

        let response = adapter.seal();
        assert_eq!(response.stop_reason, StopReason::ToolUse);
        assert_eq!(response.content.len(), 2);
    }
}
