//! Terminal visualization tool.
//!
//! Resolves a `result_<tool_call_id>.json` handle against the run's result
//! cache, summarizes the data, and delegates spec generation to the internal
//! spec agent. The returned spec is validated and carries bar-chart defaults.

use std::any::Any;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::db::Row;
use crate::tools::{ResultCache, Tool, ToolDeps, VizBinding};
use crate::viz::spec::{result_file_pattern, ChartSpec, SortDir, SortItem, Transform, VizSpec};
use crate::viz::{extract_data_summary, SpecAgent};

/// Wall-clock budget for one spec generation, retries included.
const SPEC_TIMEOUT: Duration = Duration::from_secs(300);

/// Generates a visualization spec for stored SQL results.
pub struct VizTool {
    result_cache: Option<ResultCache>,
    binding: Option<VizBinding>,
    last_rows: Option<Vec<Row>>,
    last_file: Option<String>,
}

impl VizTool {
    pub fn new() -> Self {
        Self {
            result_cache: None,
            binding: None,
            last_rows: None,
            last_file: None,
        }
    }

    /// Rows backing the most recent spec, for renderers.
    pub fn last_rows(&self) -> Option<&[Row]> {
        self.last_rows.as_deref()
    }

    /// File handle of the most recent spec.
    pub fn last_file(&self) -> Option<&str> {
        self.last_file.as_deref()
    }
}

impl Default for VizTool {
    fn default() -> Self {
        Self::new()
    }
}

/// Adds the bar-chart defaults: sort desc by the y field when no sort is
/// present, and a limit of 20 when the data is larger and unbounded.
fn ensure_bar_defaults(mut spec: VizSpec, row_count: usize) -> VizSpec {
    let y_field = match &spec.chart {
        ChartSpec::Bar { encoding, .. } => encoding.y.field.clone(),
        _ => return spec,
    };

    let has_sort = spec
        .transform
        .iter()
        .any(|t| matches!(t, Transform::Sort { .. }));
    let has_limit = spec
        .transform
        .iter()
        .any(|t| matches!(t, Transform::Limit { .. }));

    if !has_sort {
        spec.transform.push(Transform::Sort {
            sort: vec![SortItem {
                field: y_field,
                dir: SortDir::Desc,
            }],
        });
    }

    if !has_limit && row_count > 20 {
        spec.transform.push(Transform::Limit { limit: 20 });
    }

    spec
}

#[async_trait]
impl Tool for VizTool {
    fn name(&self) -> &'static str {
        "viz"
    }

    fn description(&self) -> &'static str {
        "Create a visualization of SQL results. Pass the result file key returned by \
         execute_sql and describe the chart you want."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "request": {
                    "type": "string",
                    "description": "Natural language description of the desired visualization"
                },
                "file": {
                    "type": "string",
                    "description": "Result file key from execute_sql (e.g., \"result_abc123.json\")"
                },
                "chart_type": {
                    "type": "string",
                    "enum": ["bar", "line", "scatter", "boxplot", "histogram"],
                    "description": "Optional hint for the chart type"
                }
            },
            "required": ["request", "file"]
        })
    }

    fn requires_context(&self) -> bool {
        true
    }

    fn bind(&mut self, deps: &ToolDeps) {
        self.result_cache = Some(deps.result_cache.clone());
        self.binding = deps.viz.clone();
    }

    async fn execute(&mut self, args: Value) -> String {
        let request = args
            .get("request")
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        let file = args.get("file").and_then(|v| v.as_str()).unwrap_or_default();
        let chart_type = args.get("chart_type").and_then(|v| v.as_str());

        if file.is_empty() || !result_file_pattern().is_match(file) {
            return json!({"error": "Invalid result file key format."}).to_string();
        }

        let Some(cache) = &self.result_cache else {
            return json!({"error": "Visualization context is unavailable for this session."})
                .to_string();
        };
        let Some(binding) = self.binding.clone() else {
            return json!({"error": "Visualization context is unavailable for this session."})
                .to_string();
        };

        let tool_call_id = file
            .strip_prefix("result_")
            .and_then(|s| s.strip_suffix(".json"))
            .unwrap_or(file);
        let Some(raw_payload) = cache.get(tool_call_id) else {
            return json!({"error": "Tool output not found in message history."}).to_string();
        };
        let payload: Value = serde_json::from_str(&raw_payload)
            .unwrap_or_else(|_| json!({"result": raw_payload}));

        let summary = extract_data_summary(&payload);
        self.last_rows = Some(summary.rows.clone());
        self.last_file = Some(file.to_string());

        let agent = SpecAgent::new(binding.client, binding.model);
        let generated = tokio::time::timeout(
            SPEC_TIMEOUT,
            agent.generate_spec(
                request,
                &summary.columns,
                summary.row_count,
                file,
                chart_type,
            ),
        )
        .await;

        match generated {
            Ok(Ok(spec)) => {
                let spec = ensure_bar_defaults(spec, summary.row_count);
                serde_json::to_string(&spec).unwrap_or_else(|e| {
                    json!({"error": format!("Failed to encode spec: {e}")}).to_string()
                })
            }
            Ok(Err(e)) => json!({
                "error": "Failed to generate a valid visualization spec.",
                "details": e.to_string()
            })
            .to_string(),
            Err(_) => json!({
                "error": "Spec generation timed out.",
                "details": format!("Timed out after {} seconds.", SPEC_TIMEOUT.as_secs())
            })
            .to_string(),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
