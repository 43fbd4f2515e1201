//! Anthropic streaming client.
//!
//! Implements [`LlmClient`] for Anthropic's messages API: one POST, a
//! server-sent-event response, and content-block reassembly into a final
//! `ResponseReady` event.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use reqwest::Client;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{Result, SaberError};
use crate::llm::sse::{SseDecoder, SseRecord};
use crate::llm::stream::StreamAdapter;
use crate::llm::types::MessageRequest;
use crate::llm::{ClientEvent, LlmClient};

/// Anthropic API base URL.
const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";

/// Anthropic API version header.
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Anthropic streaming LLM client.
#[derive(Debug, Clone)]
pub struct AnthropicClient {
    api_key: String,
    base_url: String,
    client: Client,
}

impl AnthropicClient {
    /// Creates a client against the production API with no request timeout;
    /// streams run as long as the provider keeps sending.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: ANTHROPIC_BASE_URL.to_string(),
            client: Client::new(),
        }
    }

    /// Overrides the API base URL (for proxies and tests).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Applies a whole-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self> {
        self.client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SaberError::llm(format!("Failed to create HTTP client: {e}")))?;
        Ok(self)
    }

    /// Parses a non-2xx API response into a typed error.
    fn parse_error(status: reqwest::StatusCode, body: &str) -> SaberError {
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return SaberError::llm("Authentication failed. Check your ANTHROPIC_API_KEY.");
        }

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return SaberError::llm("Rate limited. Please wait and try again.");
        }

        if status.as_u16() == 529 {
            return SaberError::llm("Anthropic API is overloaded. Please try again later.");
        }

        if let Ok(error_response) = serde_json::from_str::<AnthropicErrorResponse>(body) {
            return SaberError::llm(format!(
                "Anthropic API error: {}",
                error_response.error.message
            ));
        }

        SaberError::llm(format!("Anthropic API error ({status}): {body}"))
    }
}

#[async_trait]
impl LlmClient for AnthropicClient {
    async fn create_message_stream(
        &self,
        mut request: MessageRequest,
        cancel: CancellationToken,
    ) -> Result<BoxStream<'static, Result<ClientEvent>>> {
        // Streaming is the only mode this client speaks.
        request.stream = true;

        let url = format!("{}/v1/messages", self.base_url);
        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SaberError::llm("Request timed out. Try again.")
                } else if e.is_connect() {
                    SaberError::llm("Failed to connect to Anthropic API. Check your network.")
                } else {
                    SaberError::llm(format!("Request failed: {e}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(Self::parse_error(status, &body));
        }

        debug!(model = %request.model, "Anthropic stream opened");

        let bytes = response
            .bytes_stream()
            .map(|chunk| chunk.map(|b| b.to_vec()))
            .boxed();

        let state = StreamState {
            bytes,
            decoder: SseDecoder::new(),
            adapter: StreamAdapter::new(),
            pending: VecDeque::new(),
            cancel,
            done: false,
        };

        Ok(futures::stream::unfold(state, next_event).boxed())
    }
}

struct StreamState {
    bytes: BoxStream<'static, reqwest::Result<Vec<u8>>>,
    decoder: SseDecoder,
    adapter: StreamAdapter,
    pending: VecDeque<Result<ClientEvent>>,
    cancel: CancellationToken,
    done: bool,
}

/// Drives the byte stream forward until an event is available. The
/// cancellation token is checked between chunks; once set, the stream ends
/// without a `ResponseReady`.
async fn next_event(mut state: StreamState) -> Option<(Result<ClientEvent>, StreamState)> {
    loop {
        if let Some(event) = state.pending.pop_front() {
            if event.is_err() {
                state.done = true;
            }
            return Some((event, state));
        }

        if state.done || state.cancel.is_cancelled() {
            return None;
        }

        match state.bytes.next().await {
            Some(Ok(chunk)) => {
                for record in state.decoder.feed(&chunk) {
                    match process_record(&mut state.adapter, &record) {
                        Ok(events) => state.pending.extend(events.into_iter().map(Ok)),
                        Err(e) => {
                            state.pending.push_back(Err(e));
                            break;
                        }
                    }
                }
            }
            Some(Err(e)) => {
                state
                    .pending
                    .push_back(Err(SaberError::llm(format!("Stream error: {e}"))));
            }
            None => {
                state.done = true;
                if !state.adapter.message_stopped() && !state.cancel.is_cancelled() {
                    return Some((
                        Err(SaberError::llm("Stream ended before message_stop")),
                        state,
                    ));
                }
                return None;
            }
        }
    }
}

/// Routes one SSE record through the adapter. Records with undecodable JSON
/// payloads are logged and skipped, matching the provider contract that
/// unknown events must be tolerated.
fn process_record(adapter: &mut StreamAdapter, record: &SseRecord) -> Result<Vec<ClientEvent>> {
    let data: serde_json::Value = match serde_json::from_str(&record.data) {
        Ok(value) => value,
        Err(e) => {
            if record.event == "error" {
                return Err(SaberError::llm("Stream error with invalid JSON"));
            }
            warn!(event = %record.event, "Failed to parse stream data: {e}");
            return Ok(Vec::new());
        }
    };

    let event_type = if record.event.is_empty() {
        data["type"].as_str().unwrap_or_default().to_string()
    } else {
        record.event.clone()
    };

    adapter.handle_event(&event_type, &data)
}

#[derive(Debug, Deserialize)]
struct AnthropicErrorResponse {
    error: AnthropicError,
}

#[derive(Debug, Deserialize)]
struct AnthropicError {
    message: String,
}
