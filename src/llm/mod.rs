//! LLM integration for SQLsaber.
//!
//! The event model is the unifying contract across providers: a client turns
//! one request into a stream of [`ClientEvent`]s ending in `ResponseReady`.
//! The Anthropic wire client is implemented here; other providers plug in by
//! implementing [`LlmClient`].

pub mod anthropic;
pub mod sse;
pub mod stream;
pub mod types;

pub use anthropic::AnthropicClient;
pub use stream::StreamAdapter;
pub use types::{
    ChatMessage, ContentBlock, MessageRequest, MessageRole, StopReason, StreamingResponse,
    ThinkingConfig, ToolDefinition, DEFAULT_MAX_TOKENS,
};

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use tokio_util::sync::CancellationToken;

use crate::config::{ModelProvider, ResolvedModel};
use crate::error::{Result, SaberError};

/// Events surfaced while one model turn streams in.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// The provider acknowledged the request.
    MessageStart,
    /// A chunk of text for the block at `index`.
    TextDelta { index: usize, text: String },
    /// The model began a tool call.
    ToolUseStart {
        index: usize,
        id: String,
        name: String,
    },
    /// The block at `index` is complete.
    ContentBlockStop { index: usize },
    /// Non-semantic heartbeat.
    Ping,
    /// The provider finished the message.
    MessageStop,
    /// The sealed response; always the final event of a successful stream.
    ResponseReady(StreamingResponse),
}

/// A streaming LLM client.
///
/// Implementations must be thread-safe (Send + Sync). A set cancellation
/// token terminates the stream cleanly: already-emitted events stay valid
/// and `ResponseReady` is never produced.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Performs one model turn, streaming events as they arrive.
    async fn create_message_stream(
        &self,
        request: MessageRequest,
        cancel: CancellationToken,
    ) -> Result<BoxStream<'static, Result<ClientEvent>>>;
}

/// Creates the wire client for a resolved model.
pub fn create_client(resolved: &ResolvedModel) -> Result<Arc<dyn LlmClient>> {
    match resolved.spec.provider {
        ModelProvider::Anthropic => Ok(Arc::new(AnthropicClient::new(&resolved.api_key))),
        other => Err(SaberError::configuration(format!(
            "No built-in wire client for provider '{other}'. \
             Construct the agent with a custom LlmClient implementation."
        ))),
    }
}
