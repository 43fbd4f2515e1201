//! Internal agent for generating visualization specs.
//!
//! A nested LLM loop with two helper tools and a validation-driven retry:
//! when a returned spec fails validation, the full conversation (including
//! prior tool calls and the failed output) is preserved and the validation
//! error is appended as a new user message.

use std::sync::Arc;

use futures::StreamExt;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{Result, SaberError};
use crate::llm::{
    ChatMessage, ClientEvent, ContentBlock, LlmClient, MessageRequest, StopReason, ToolDefinition,
};
use crate::viz::data::ColumnSummary;
use crate::viz::spec::VizSpec;
use crate::viz::templates::{list_chart_types, vizspec_template, ChartType};

/// Re-invocations allowed after the first failed validation.
pub const MAX_RETRIES: usize = 2;

/// Tool-use cycles allowed within one generation attempt.
const MAX_TOOL_CYCLES: usize = 8;

const VIZ_SYSTEM_PROMPT: &str = r#"You are a visualization spec generator. Given a user's request and data summary, generate a valid JSON visualization spec.

## Workflow
1. Decide the appropriate chart type based on the request and data. To see all available chart types, call `get_available_chart_types`
2. Call `get_vizspec_template` with the chart type and file to get the correct spec structure
3. Fill in the template with actual column names from the provided data summary
4. Return ONLY the final JSON spec (no explanations, no markdown code blocks)

## Example Chart Type Selection
- Comparing categories -> bar
- Comparing categories across series -> bar with encoding.series
- Trend over time -> line
- Correlation between two numbers -> scatter
- Distribution of one variable -> histogram
- Distribution comparison across groups -> boxplot

## Transform Operations (optional, add to "transform" array)
- {"sort": [{"field": "col", "dir": "desc"}]} - Sort data
- {"limit": 20} - Limit rows (recommended for bar charts with many categories)
- {"filter": {"field": "col", "op": "!=", "value": null}} - Filter rows

## Rules
- Use ONLY columns that exist in the provided data summary
- Match field types: category columns for x in bar charts, numeric columns for y
- Add limit transform for bar charts to avoid overcrowding (10-20 bars max)
- Sort bar charts by y value descending for better readability
- Title should describe what the chart shows
"#;

/// Internal agent that turns a free-text request into a validated [`VizSpec`].
pub struct SpecAgent {
    client: Arc<dyn LlmClient>,
    model: String,
}

impl SpecAgent {
    pub fn new(client: Arc<dyn LlmClient>, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }

    /// Generates a spec from the request and data summary.
    ///
    /// Retries up to [`MAX_RETRIES`] times with the validation error fed back
    /// into the preserved conversation.
    pub async fn generate_spec(
        &self,
        request: &str,
        columns: &[ColumnSummary],
        row_count: usize,
        file: &str,
        chart_type_hint: Option<&str>,
    ) -> Result<VizSpec> {
        let mut messages = vec![ChatMessage::user_text(build_prompt(
            request,
            columns,
            row_count,
            file,
            chart_type_hint,
        ))];

        let mut last_error = String::new();
        for attempt in 0..=MAX_RETRIES {
            let output = self.run_attempt(&mut messages).await?;

            match parse_spec_json(&output).and_then(|value| VizSpec::validate(&value)) {
                Ok(spec) => return Ok(spec),
                Err(error) => {
                    debug!(
                        attempt = attempt + 1,
                        "Spec validation failed: {error}"
                    );
                    last_error = error.clone();
                    if attempt < MAX_RETRIES {
                        // Keep the whole conversation so the agent sees its
                        // prior tool calls and failed output.
                        messages.push(ChatMessage::user_text(format!(
                            "The spec you returned failed validation:\n{error}\n\n\
                             Fix the JSON and return ONLY the corrected spec."
                        )));
                    }
                }
            }
        }

        Err(SaberError::validation(format!(
            "Visualization spec failed validation after {} attempts: {last_error}",
            MAX_RETRIES + 1
        )))
    }

    /// Runs one generation attempt: streams turns, serving helper tool calls
    /// until the model produces a final text answer.
    async fn run_attempt(&self, messages: &mut Vec<ChatMessage>) -> Result<String> {
        for _ in 0..MAX_TOOL_CYCLES {
            let request = MessageRequest::new(self.model.clone(), messages.clone())
                .with_system(VIZ_SYSTEM_PROMPT)
                .with_tools(helper_tool_definitions());

            let response = self.collect_response(request).await?;
            let is_tool_use = response.stop_reason == StopReason::ToolUse;
            let text = ChatMessage::assistant(response.content.clone()).text();

            messages.push(ChatMessage::assistant(response.content.clone()));

            if !is_tool_use {
                return Ok(text.trim().to_string());
            }

            let mut tool_results = Vec::new();
            for (id, name, input) in response.tool_uses() {
                let result = execute_helper_tool(name, input);
                tool_results.push(ContentBlock::tool_result(id, result));
            }
            messages.push(ChatMessage::tool_results(tool_results));
        }

        Err(SaberError::llm(
            "Visualization agent exceeded the tool-call budget without producing a spec",
        ))
    }

    /// Streams one turn to completion and returns the sealed response.
    async fn collect_response(
        &self,
        request: MessageRequest,
    ) -> Result<crate::llm::StreamingResponse> {
        let mut stream = self
            .client
            .create_message_stream(request, CancellationToken::new())
            .await?;

        let mut response = None;
        while let Some(event) = stream.next().await {
            if let ClientEvent::ResponseReady(r) = event? {
                response = Some(r);
            }
        }

        response.ok_or_else(|| SaberError::llm("Stream ended without a response"))
    }
}

/// Builds the initial user prompt from the request and data summary.
fn build_prompt(
    request: &str,
    columns: &[ColumnSummary],
    row_count: usize,
    file: &str,
    chart_type_hint: Option<&str>,
) -> String {
    let columns_json =
        serde_json::to_string_pretty(columns).unwrap_or_else(|_| "[]".to_string());
    let hint_text = chart_type_hint
        .map(|hint| format!("Chart type hint: {hint}"))
        .unwrap_or_default();

    format!(
        "## User Request\n{}\n\n\
         ## Data Summary\n\
         Row count: {row_count}\n\
         File: {file}\n\
         Columns:\n{columns_json}\n\n\
         {hint_text}\n\n\
         Use `get_vizspec_template` to get the correct spec structure, \
         then fill in the placeholders with actual column names.\n\
         Return ONLY the final JSON.",
        request.trim()
    )
    .trim()
    .to_string()
}

/// Definitions of the helper tools exposed only to this agent.
pub fn helper_tool_definitions() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            name: "get_vizspec_template".to_string(),
            description: "Get the complete VizSpec template for a chart type. Call this FIRST \
                          to get the correct JSON structure, then fill in the placeholder field \
                          names with actual column names from your data."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "chart_type": {
                        "type": "string",
                        "enum": ["bar", "line", "scatter", "boxplot", "histogram"],
                        "description": "The chart type to get a template for"
                    },
                    "file": {
                        "type": "string",
                        "description": "The result file key (e.g., \"result_abc123.json\")"
                    }
                },
                "required": ["chart_type", "file"]
            }),
        },
        ToolDefinition {
            name: "get_available_chart_types".to_string(),
            description: "List available chart types with descriptions. Call this if you're \
                          unsure which chart type to use for the data."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {},
                "required": []
            }),
        },
    ]
}

/// Executes one helper tool call locally.
fn execute_helper_tool(name: &str, input: &Value) -> String {
    match name {
        "get_vizspec_template" => {
            let chart_type = input["chart_type"].as_str().unwrap_or_default();
            let file = input["file"].as_str().unwrap_or_default();
            match chart_type.parse::<ChartType>() {
                Ok(chart_type) => vizspec_template(chart_type, file).to_string(),
                Err(e) => json!({"error": e.to_string()}).to_string(),
            }
        }
        "get_available_chart_types" => list_chart_types().to_string(),
        other => json!({"error": format!("Unknown tool: {other}")}).to_string(),
    }
}

/// Parses model output as JSON, tolerating markdown fences and prose by
/// falling back to the span between the first `{` and the last `}`.
pub fn parse_spec_json(text: &str) -> std::result::Result<Value, String> {
    let trimmed = text.trim();

    let parsed = serde_json::from_str::<Value>(trimmed).or_else(|first_err| {
        match (trimmed.find('{'), trimmed.rfind('}')) {
            (Some(start), Some(end)) if end > start => {
                serde_json::from_str::<Value>(&trimmed[start..=end])
                    .map_err(|e| format!("Output is not valid JSON: {e}"))
            }
            _ => Err(format!("Output is not valid JSON: {first_err}")),
        }
    })?;

    if parsed.is_object() {
        Ok(parsed)
    } else {
        Err("Expected a JSON object".to_string())
    }
}
