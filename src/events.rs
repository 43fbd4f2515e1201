//! Stream events emitted to consumers during a query run.
//!
//! This is the typed contract between the agent orchestrator and whatever is
//! consuming it (CLI renderer, API server, tests). Events for one run arrive
//! in the order they are produced; no reordering.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Execution status attached to `tool_use` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolUseStatus {
    /// The model has started emitting this tool call.
    Started,
    /// The orchestrator is executing the tool.
    Executing,
}

/// An event emitted during a streaming query run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// A chunk of assistant text, forwarded as it arrives.
    Text { text: String },
    /// A tool call the model requested.
    ToolUse {
        name: String,
        status: ToolUseStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        input: Option<Value>,
    },
    /// A generic tool result (schema introspection, knowledge search, ...).
    ToolResult { tool_name: String, result: String },
    /// Rows returned by `execute_sql`, paired with the query that produced them.
    QueryResult { query: String, results: Vec<Value> },
    /// A validated visualization spec produced by the `viz` tool.
    PlotResult {
        tool_name: String,
        input: Value,
        result: String,
    },
    /// Progress note between tool results and the next model turn.
    Processing { message: String },
    /// A fatal error; the run ends after this event.
    Error { message: String },
}

impl StreamEvent {
    /// Creates a text event.
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Creates a processing event.
    pub fn processing(message: impl Into<String>) -> Self {
        Self::Processing {
            message: message.into(),
        }
    }

    /// Creates an error event.
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }
}
