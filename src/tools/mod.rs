//! Tool registry and built-in tools.
//!
//! The registry is a process-global map of tool name to constructor. Each
//! orchestrator instantiates its own tool set from it: classes are shared,
//! instances never are, because instances carry per-agent state (database
//! handle, dangerous-mode flag, knowledge context, cached results).

mod knowledge_tool;
mod schema_tools;
mod sql_tool;
mod viz_tool;

pub use knowledge_tool::SearchKnowledgeTool;
pub use schema_tools::{IntrospectSchemaTool, ListTablesTool};
pub use sql_tool::ExecuteSqlTool;
pub use viz_tool::VizTool;

use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, OnceLock};

use async_trait::async_trait;
use serde_json::Value;

use crate::db::Gateway;
use crate::knowledge::KnowledgeStore;
use crate::llm::{LlmClient, ToolDefinition};
use crate::schema::SchemaManager;

/// Model binding the `viz` tool uses for its internal spec agent.
#[derive(Clone)]
pub struct VizBinding {
    pub client: Arc<dyn LlmClient>,
    pub model: String,
}

/// Shared map of tool_call_id to raw result JSON, written by the
/// orchestrator after every tool call so later tools can resolve
/// `result_<tool_call_id>.json` handles.
#[derive(Clone, Default)]
pub struct ResultCache {
    inner: Arc<Mutex<HashMap<String, String>>>,
}

impl ResultCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, tool_call_id: impl Into<String>, payload: impl Into<String>) {
        self.inner
            .lock()
            .expect("result cache lock poisoned")
            .insert(tool_call_id.into(), payload.into());
    }

    pub fn get(&self, tool_call_id: &str) -> Option<String> {
        self.inner
            .lock()
            .expect("result cache lock poisoned")
            .get(tool_call_id)
            .cloned()
    }
}

/// Run-scoped dependencies handed to tools at bind time.
#[derive(Clone)]
pub struct ToolDeps {
    pub gateway: Arc<Gateway>,
    pub schema_manager: Arc<SchemaManager>,
    pub database_name: Option<String>,
    pub knowledge: Option<Arc<KnowledgeStore>>,
    pub allow_dangerous: bool,
    pub result_cache: ResultCache,
    pub viz: Option<VizBinding>,
}

/// Rendering hints consumers may use when displaying a tool's results.
#[derive(Debug, Clone)]
pub struct DisplaySpec {
    pub display_name: &'static str,
    pub table: Option<TableDisplay>,
}

/// Table layout for a tool's result payload.
#[derive(Debug, Clone)]
pub struct TableDisplay {
    /// Payload field holding the row list.
    pub items_field: &'static str,
    pub columns: Vec<DisplayColumn>,
    pub max_rows: usize,
}

#[derive(Debug, Clone)]
pub struct DisplayColumn {
    pub field: &'static str,
    pub header: &'static str,
}

/// A tool the model can call.
///
/// `execute` always returns JSON text; failures are `{"error": ...}` payloads
/// so the model can observe them and recover on its next turn.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    /// JSON-Schema-shaped description of the tool's arguments.
    fn input_schema(&self) -> Value;

    /// Whether the tool needs run-scoped dependencies beyond the gateway.
    fn requires_context(&self) -> bool {
        false
    }

    /// Optional rendering hints for CLI consumers.
    fn display_spec(&self) -> Option<DisplaySpec> {
        None
    }

    /// Receives the run-scoped dependency bag after construction.
    fn bind(&mut self, deps: &ToolDeps);

    /// Executes the tool with already-parsed JSON arguments.
    async fn execute(&mut self, args: Value) -> String;

    /// Downcast support so the orchestrator can read tool-specific state
    /// (notably the SQL tool's cached last query and results).
    fn as_any(&self) -> &dyn Any;
}

/// Produces the wire-format definition for a tool.
pub fn definition_for(tool: &dyn Tool) -> ToolDefinition {
    ToolDefinition {
        name: tool.name().to_string(),
        description: tool.description().to_string(),
        input_schema: tool.input_schema(),
    }
}

type ToolFactory = fn() -> Box<dyn Tool>;

/// Registry of tool constructors, keyed by tool name.
pub struct ToolRegistry {
    factories: BTreeMap<&'static str, ToolFactory>,
}

impl ToolRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    /// The registry of built-in tools.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register("list_tables", || Box::new(ListTablesTool::new()));
        registry.register("introspect_schema", || Box::new(IntrospectSchemaTool::new()));
        registry.register("execute_sql", || Box::new(ExecuteSqlTool::new()));
        registry.register("search_knowledge", || Box::new(SearchKnowledgeTool::new()));
        registry.register("viz", || Box::new(VizTool::new()));
        registry
    }

    /// The process-global registry of built-in tools.
    pub fn global() -> &'static ToolRegistry {
        static REGISTRY: OnceLock<ToolRegistry> = OnceLock::new();
        REGISTRY.get_or_init(ToolRegistry::builtin)
    }

    /// Registers a constructor under a name, replacing any existing one.
    pub fn register(&mut self, name: &'static str, factory: ToolFactory) {
        self.factories.insert(name, factory);
    }

    /// Registered tool names, sorted.
    pub fn names(&self) -> Vec<&'static str> {
        self.factories.keys().copied().collect()
    }

    /// Builds a fresh instance of one tool.
    pub fn instantiate(&self, name: &str) -> Option<Box<dyn Tool>> {
        self.factories.get(name).map(|factory| factory())
    }

    /// Builds fresh instances of every registered tool.
    pub fn instantiate_all(&self) -> HashMap<String, Box<dyn Tool>> {
        self.factories
            .iter()
            .map(|(name, factory)| (name.to_string(), factory()))
            .collect()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}
