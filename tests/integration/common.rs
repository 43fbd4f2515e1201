//! Shared helpers for integration tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use sqlsaber::error::Result;
use sqlsaber::events::StreamEvent;
use sqlsaber::llm::{ClientEvent, ContentBlock, LlmClient, MessageRequest, StreamingResponse};

/// A scripted LLM client: each call pops the next event sequence. Requests
/// are recorded for assertions.
pub struct ScriptedClient {
    scripts: Mutex<VecDeque<Vec<ClientEvent>>>,
    pub requests: Mutex<Vec<MessageRequest>>,
}

impl ScriptedClient {
    pub fn new(scripts: Vec<Vec<ClientEvent>>) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl LlmClient for ScriptedClient {
    async fn create_message_stream(
        &self,
        request: MessageRequest,
        _cancel: CancellationToken,
    ) -> Result<BoxStream<'static, Result<ClientEvent>>> {
        self.requests.lock().unwrap().push(request);
        let events = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .expect("scripted client ran out of turns");
        Ok(futures::stream::iter(events.into_iter().map(Ok)).boxed())
    }
}

/// Builds the event sequence for a turn that streams `deltas` and seals into
/// `response`.
pub fn turn_with_text(deltas: &[&str], response: StreamingResponse) -> Vec<ClientEvent> {
    let mut events = vec![ClientEvent::MessageStart];
    for delta in deltas {
        events.push(ClientEvent::TextDelta {
            index: 0,
            text: delta.to_string(),
        });
    }
    events.push(ClientEvent::MessageStop);
    events.push(ClientEvent::ResponseReady(response));
    events
}

/// A final-text turn: streams the text in one delta and stops.
pub fn text_turn(text: &str) -> Vec<ClientEvent> {
    turn_with_text(
        &[text],
        StreamingResponse {
            content: vec![ContentBlock::text(text)],
            stop_reason: sqlsaber::llm::StopReason::EndTurn,
        },
    )
}

/// A turn whose sealed response requests the given tool calls.
pub fn tool_use_turn(calls: Vec<(&str, &str, serde_json::Value)>) -> Vec<ClientEvent> {
    let mut events = vec![ClientEvent::MessageStart];
    let mut content = Vec::new();
    for (index, (id, name, input)) in calls.into_iter().enumerate() {
        events.push(ClientEvent::ToolUseStart {
            index,
            id: id.to_string(),
            name: name.to_string(),
        });
        content.push(ContentBlock::ToolUse {
            id: id.to_string(),
            name: name.to_string(),
            input,
        });
    }
    events.push(ClientEvent::MessageStop);
    events.push(ClientEvent::ResponseReady(StreamingResponse {
        content,
        stop_reason: sqlsaber::llm::StopReason::ToolUse,
    }));
    events
}

/// Collects events from a run into a shared vector, for assertions.
pub type EventLog = Arc<Mutex<Vec<StreamEvent>>>;

pub fn event_log() -> EventLog {
    Arc::new(Mutex::new(Vec::new()))
}
