//! Schema discovery tools: `list_tables` and `introspect_schema`.

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::schema::SchemaManager;
use crate::tools::{DisplayColumn, DisplaySpec, TableDisplay, Tool, ToolDeps};

/// Lists all user tables in the database.
pub struct ListTablesTool {
    schema_manager: Option<Arc<SchemaManager>>,
}

impl ListTablesTool {
    pub fn new() -> Self {
        Self {
            schema_manager: None,
        }
    }
}

impl Default for ListTablesTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for ListTablesTool {
    fn name(&self) -> &'static str {
        "list_tables"
    }

    fn description(&self) -> &'static str {
        "Get a list of all tables in the database. Use this first to discover available tables."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    fn display_spec(&self) -> Option<DisplaySpec> {
        Some(DisplaySpec {
            display_name: "List Tables",
            table: Some(TableDisplay {
                items_field: "tables",
                columns: vec![
                    DisplayColumn {
                        field: "full_name",
                        header: "Table",
                    },
                    DisplayColumn {
                        field: "type",
                        header: "Type",
                    },
                ],
                max_rows: 50,
            }),
        })
    }

    fn bind(&mut self, deps: &ToolDeps) {
        self.schema_manager = Some(deps.schema_manager.clone());
    }

    async fn execute(&mut self, _args: Value) -> String {
        let Some(manager) = &self.schema_manager else {
            return json!({"error": "No database connection configured."}).to_string();
        };

        match manager.list_tables().await {
            Ok(listing) => serde_json::to_string(&listing)
                .unwrap_or_else(|e| json!({"error": format!("Error encoding tables: {e}")}).to_string()),
            Err(e) => json!({"error": format!("Error listing tables: {e}")}).to_string(),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Introspects table structures, optionally filtered by a LIKE pattern.
pub struct IntrospectSchemaTool {
    schema_manager: Option<Arc<SchemaManager>>,
}

impl IntrospectSchemaTool {
    pub fn new() -> Self {
        Self {
            schema_manager: None,
        }
    }
}

impl Default for IntrospectSchemaTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for IntrospectSchemaTool {
    fn name(&self) -> &'static str {
        "introspect_schema"
    }

    fn description(&self) -> &'static str {
        "Introspect database schema to understand table structures. Prefer narrow table \
         patterns over introspecting everything to keep responses small."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "table_pattern": {
                    "type": "string",
                    "description": "Optional pattern to filter tables (e.g., 'public.users', 'user%', '%order%')"
                }
            },
            "required": []
        })
    }

    fn bind(&mut self, deps: &ToolDeps) {
        self.schema_manager = Some(deps.schema_manager.clone());
    }

    async fn execute(&mut self, args: Value) -> String {
        let Some(manager) = &self.schema_manager else {
            return json!({"error": "No database connection configured."}).to_string();
        };

        let pattern = args.get("table_pattern").and_then(|v| v.as_str());
        match manager.get_schema_info(pattern).await {
            Ok(schema) => serde_json::to_string(&schema)
                .unwrap_or_else(|e| json!({"error": format!("Error encoding schema: {e}")}).to_string()),
            Err(e) => json!({"error": format!("Error introspecting schema: {e}")}).to_string(),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
