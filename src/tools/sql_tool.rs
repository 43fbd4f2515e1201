//! Read-only SQL execution tool.
//!
//! The write gate refuses statements whose first keyword mutates data unless
//! dangerous mode is on; either way the gateway rolls every transaction back.
//! SELECTs without a LIMIT get one injected.

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::db::Gateway;
use crate::error::SaberError;
use crate::tools::{Tool, ToolDeps};

/// Default row cap when the model does not pass one.
pub const DEFAULT_ROW_LIMIT: usize = 100;

/// First keywords refused without dangerous mode.
const WRITE_KEYWORDS: [&str; 7] = [
    "INSERT", "UPDATE", "DELETE", "DROP", "CREATE", "ALTER", "TRUNCATE",
];

/// Executes SQL against the active database.
pub struct ExecuteSqlTool {
    gateway: Option<Arc<Gateway>>,
    allow_dangerous: bool,
    last_query: Option<String>,
    last_results: Option<Vec<Value>>,
}

impl ExecuteSqlTool {
    pub fn new() -> Self {
        Self {
            gateway: None,
            allow_dangerous: false,
            last_query: None,
            last_results: None,
        }
    }

    /// The last executed query, including any injected LIMIT.
    pub fn last_query(&self) -> Option<&str> {
        self.last_query.as_deref()
    }

    /// The rows from the last successful execution, capped at its limit.
    pub fn last_results(&self) -> Option<&[Value]> {
        self.last_results.as_deref()
    }
}

impl Default for ExecuteSqlTool {
    fn default() -> Self {
        Self::new()
    }
}

/// Whether the first keyword marks a write operation.
fn is_write_query(query: &str) -> bool {
    let upper = query.trim().to_uppercase();
    WRITE_KEYWORDS.iter().any(|kw| upper.starts_with(kw))
}

/// Appends `LIMIT n` to SELECTs that have none, stripping a trailing `;`.
fn add_limit_to_query(query: &str, limit: usize) -> String {
    let upper = query.trim().to_uppercase();
    if upper.starts_with("SELECT") && !upper.contains("LIMIT") {
        let trimmed = query.trim().trim_end_matches(';').trim_end();
        format!("{trimmed} LIMIT {limit};")
    } else {
        query.to_string()
    }
}

/// Attaches targeted suggestions for common failure shapes.
fn suggestions_for(error_msg: &str) -> Vec<&'static str> {
    let lower = error_msg.to_lowercase();
    let mut suggestions = Vec::new();
    if lower.contains("column") && lower.contains("does not exist") {
        suggestions.push("Check column names using the schema introspection tool");
    } else if lower.contains("table") && lower.contains("does not exist") {
        suggestions.push("Check table names using the schema introspection tool");
    } else if lower.contains("syntax error") {
        suggestions.push("Review SQL syntax, especially JOIN conditions and WHERE clauses");
    }
    suggestions
}

#[async_trait]
impl Tool for ExecuteSqlTool {
    fn name(&self) -> &'static str {
        "execute_sql"
    }

    fn description(&self) -> &'static str {
        "Execute a SQL query against the database."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "SQL query to execute"
                },
                "limit": {
                    "type": "integer",
                    "description": "Maximum number of rows to return (default: 100)",
                    "default": DEFAULT_ROW_LIMIT
                }
            },
            "required": ["query"]
        })
    }

    fn bind(&mut self, deps: &ToolDeps) {
        self.gateway = Some(deps.gateway.clone());
        self.allow_dangerous = deps.allow_dangerous;
    }

    async fn execute(&mut self, args: Value) -> String {
        let Some(gateway) = self.gateway.clone() else {
            return json!({"error": "No database connection configured."}).to_string();
        };

        let Some(query) = args.get("query").and_then(|v| v.as_str()) else {
            return json!({"error": "Missing required parameter: query"}).to_string();
        };
        let limit = args
            .get("limit")
            .and_then(|v| v.as_u64())
            .map(|v| v as usize)
            .unwrap_or(DEFAULT_ROW_LIMIT);

        if is_write_query(query) && !self.allow_dangerous {
            return json!({
                "error": "Write operations are not allowed. Only SELECT queries are permitted."
            })
            .to_string();
        }

        let query = add_limit_to_query(query, limit);
        debug!(query = %query, "Executing SQL");

        match gateway.execute_query(&query).await {
            Ok(rows) => {
                let row_count = rows.len();
                let truncated = row_count > limit;
                let results: Vec<Value> = rows
                    .into_iter()
                    .take(limit)
                    .map(Value::Object)
                    .collect();

                self.last_query = Some(query);
                self.last_results = Some(results.clone());

                json!({
                    "success": true,
                    "row_count": row_count,
                    "results": results,
                    "truncated": truncated
                })
                .to_string()
            }
            Err(e) => {
                let error_msg = match &e {
                    SaberError::Query(msg) | SaberError::Connection(msg) => msg.clone(),
                    other => other.to_string(),
                };
                let suggestions = suggestions_for(&error_msg);
                if suggestions.is_empty() {
                    json!({"error": error_msg}).to_string()
                } else {
                    json!({"error": error_msg, "suggestions": suggestions}).to_string()
                }
            }
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
