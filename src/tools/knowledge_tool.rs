//! Knowledge-base search tool for agent context retrieval.

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::knowledge::{KnowledgeStore, DEFAULT_SEARCH_LIMIT};
use crate::tools::{DisplayColumn, DisplaySpec, TableDisplay, Tool, ToolDeps};

/// Searches saved database knowledge by keyword.
pub struct SearchKnowledgeTool {
    database_name: Option<String>,
    knowledge: Option<Arc<KnowledgeStore>>,
}

impl SearchKnowledgeTool {
    pub fn new() -> Self {
        Self {
            database_name: None,
            knowledge: None,
        }
    }
}

impl Default for SearchKnowledgeTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for SearchKnowledgeTool {
    fn name(&self) -> &'static str {
        "search_knowledge"
    }

    fn description(&self) -> &'static str {
        "Search existing SQL and knowledge about the active database. Use this whenever the \
         user asks a question about their data, to look for existing query patterns, and to \
         understand metrics, terminology, and references the user makes."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The keyword search query to execute"
                }
            },
            "required": ["query"]
        })
    }

    fn requires_context(&self) -> bool {
        true
    }

    fn display_spec(&self) -> Option<DisplaySpec> {
        Some(DisplaySpec {
            display_name: "Search Knowledge",
            table: Some(TableDisplay {
                items_field: "results",
                columns: vec![
                    DisplayColumn {
                        field: "name",
                        header: "Name",
                    },
                    DisplayColumn {
                        field: "description",
                        header: "Description",
                    },
                    DisplayColumn {
                        field: "sql",
                        header: "SQL",
                    },
                    DisplayColumn {
                        field: "source",
                        header: "Source",
                    },
                ],
                max_rows: 20,
            }),
        })
    }

    fn bind(&mut self, deps: &ToolDeps) {
        self.database_name = deps.database_name.clone();
        self.knowledge = deps.knowledge.clone();
    }

    async fn execute(&mut self, args: Value) -> String {
        let query = args
            .get("query")
            .and_then(|v| v.as_str())
            .unwrap_or_default();

        if query.trim().is_empty() {
            return json!({"error": "No query provided."}).to_string();
        }

        let (Some(knowledge), Some(database_name)) = (&self.knowledge, &self.database_name)
        else {
            return json!({
                "error": "Knowledge context is unavailable for this session. \
                          Set an active database first."
            })
            .to_string();
        };

        match knowledge
            .search(database_name, query, DEFAULT_SEARCH_LIMIT)
            .await
        {
            Ok(entries) => json!({
                "total_results": entries.len(),
                "results": entries
                    .iter()
                    .map(|entry| json!({
                        "id": entry.id,
                        "name": entry.name,
                        "description": entry.description,
                        "sql": entry.sql.clone().unwrap_or_default(),
                        "source": entry.source.clone().unwrap_or_default(),
                    }))
                    .collect::<Vec<_>>()
            })
            .to_string(),
            Err(e) => json!({"error": format!("Error searching knowledge: {e}")}).to_string(),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
