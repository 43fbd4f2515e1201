//! Agent orchestrator.
//!
//! Owns one conversation: assembles the system prompt, runs the streaming
//! tool loop, dispatches tool calls against per-agent tool instances, and
//! commits turns to history at exactly one safe point - after a whole
//! tool-result batch is built.

pub mod prompts;

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures::StreamExt;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::AgentConfig;
use crate::db::{ConnectionTarget, DatabaseKind, Gateway};
use crate::error::Result;
use crate::events::{StreamEvent, ToolUseStatus};
use crate::knowledge::KnowledgeStore;
use crate::llm::{
    self, ChatMessage, ClientEvent, ContentBlock, LlmClient, MessageRequest, StopReason,
    StreamingResponse, ThinkingConfig, ToolDefinition,
};
use crate::memory::MemoryStore;
use crate::schema::SchemaManager;
use crate::tools::{
    definition_for, ExecuteSqlTool, ResultCache, Tool, ToolDeps, ToolRegistry, VizBinding,
};

/// The per-run coordinator for natural-language SQL queries.
pub struct SqlAgent {
    client: Arc<dyn LlmClient>,
    model: String,
    config: AgentConfig,
    gateway: Arc<Gateway>,
    schema_manager: Arc<SchemaManager>,
    database_name: Option<String>,
    db_kind: DatabaseKind,
    knowledge: Option<Arc<KnowledgeStore>>,
    memory_store: Option<MemoryStore>,
    tools: HashMap<String, Box<dyn Tool>>,
    tool_order: Vec<String>,
    result_cache: ResultCache,
    history: Vec<ChatMessage>,
}

impl SqlAgent {
    /// Connects to a database and builds an agent with the built-in wire
    /// client, the global tool registry, and the default stores.
    pub async fn connect(
        spec: &str,
        database_name: Option<&str>,
        config: AgentConfig,
    ) -> Result<Self> {
        let target = ConnectionTarget::parse(spec)?;
        let gateway = Arc::new(Gateway::connect(&target).await?);

        let resolved = config.resolve()?;
        let client = llm::create_client(&resolved)?;

        let mut agent = Self::with_client(
            gateway,
            database_name,
            config,
            client,
            resolved.spec.model.clone(),
        )?;

        if database_name.is_some() {
            agent.set_knowledge(Arc::new(KnowledgeStore::open_default().await?));
            agent.set_memory_store(MemoryStore::open_default()?);
        }

        Ok(agent)
    }

    /// Builds an agent over an existing gateway with a caller-supplied
    /// client. This is the seam tests and alternative providers use.
    pub fn with_client(
        gateway: Arc<Gateway>,
        database_name: Option<&str>,
        config: AgentConfig,
        client: Arc<dyn LlmClient>,
        model: impl Into<String>,
    ) -> Result<Self> {
        let model = model.into();
        let schema_manager = Arc::new(SchemaManager::with_ttl(
            gateway.clone(),
            config.cache_ttl(),
        ));

        let registry = ToolRegistry::global();
        let tool_order: Vec<String> = registry.names().iter().map(|n| n.to_string()).collect();
        let db_kind = gateway.kind();

        let mut agent = Self {
            client,
            model,
            config,
            gateway,
            schema_manager,
            database_name: database_name.map(String::from),
            db_kind,
            knowledge: None,
            memory_store: None,
            tools: registry.instantiate_all(),
            tool_order,
            result_cache: ResultCache::new(),
            history: Vec::new(),
        };
        agent.bind_tools()?;
        Ok(agent)
    }

    /// Attaches a knowledge store and rebinds tools.
    pub fn set_knowledge(&mut self, store: Arc<KnowledgeStore>) {
        self.knowledge = Some(store);
        // Binding cannot fail once construction has succeeded.
        let _ = self.bind_tools();
    }

    /// Attaches a memory store.
    pub fn set_memory_store(&mut self, store: MemoryStore) {
        self.memory_store = Some(store);
    }

    /// The per-agent tool instances (never shared across agents).
    pub fn tools(&self) -> &HashMap<String, Box<dyn Tool>> {
        &self.tools
    }

    /// The committed conversation history.
    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }

    /// Clears the conversation history.
    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    /// Drops all cached schema information.
    pub fn clear_schema_cache(&self) {
        self.schema_manager.clear_schema_cache();
    }

    /// Adds a memory note for the active database.
    pub fn add_memory(&self, content: &str) -> Result<Option<String>> {
        let (Some(store), Some(database_name)) = (&self.memory_store, &self.database_name)
        else {
            return Ok(None);
        };
        let entry = store.add(database_name, content)?;
        Ok(Some(entry.id))
    }

    /// Rebuilds the run-scoped dependency bag and hands it to every tool.
    fn bind_tools(&mut self) -> Result<()> {
        let viz = self.viz_binding()?;
        let deps = ToolDeps {
            gateway: self.gateway.clone(),
            schema_manager: self.schema_manager.clone(),
            database_name: self.database_name.clone(),
            knowledge: self.knowledge.clone(),
            allow_dangerous: self.config.allow_dangerous,
            result_cache: self.result_cache.clone(),
            viz: Some(viz),
        };
        for tool in self.tools.values_mut() {
            tool.bind(&deps);
        }
        Ok(())
    }

    /// Resolves the model binding for the viz sub-agent: the `viz` tool
    /// override when configured, otherwise this agent's own client.
    fn viz_binding(&self) -> Result<VizBinding> {
        if self.config.tool_overrides.contains_key("viz") {
            let resolved = self.config.resolve_for_tool("viz")?;
            Ok(VizBinding {
                client: llm::create_client(&resolved)?,
                model: resolved.spec.model,
            })
        } else {
            Ok(VizBinding {
                client: self.client.clone(),
                model: self.model.clone(),
            })
        }
    }

    /// The single source of truth for the system prompt, rebuilt per run.
    pub fn system_prompt_text(&self, include_memory: bool) -> String {
        let base = match self
            .config
            .system_prompt
            .as_deref()
            .filter(|p| !p.trim().is_empty())
        {
            Some(custom) => custom.to_string(),
            None => {
                let template = if self.model.to_lowercase().contains("gpt") {
                    prompts::GPT_BASE
                } else {
                    prompts::CLAUDE_BASE
                };
                template.replace("{db}", self.db_kind.display_name())
            }
        };

        let mut prompt = base;

        if self.config.allow_dangerous {
            prompt.push_str("\n\n");
            prompt.push_str(prompts::DANGEROUS_RIDER);
        }

        if include_memory {
            let memory = match &self.config.memory {
                // An override - even an empty one - replaces stored memories.
                Some(text) => text.trim().to_string(),
                None => match (&self.memory_store, &self.database_name) {
                    (Some(store), Some(database_name)) => store
                        .format_for_prompt(database_name)
                        .unwrap_or_default(),
                    _ => String::new(),
                },
            };
            if !memory.is_empty() {
                prompt.push_str("\n\n");
                prompt.push_str(prompts::MEMORY_ADDITION);
                prompt.push_str("\n\n");
                prompt.push_str(&memory);
            }
        }

        prompt
    }

    /// Tool definitions offered to the model, in registry order.
    pub fn tool_definitions(&self) -> Vec<ToolDefinition> {
        self.tool_order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| definition_for(tool.as_ref()))
            .collect()
    }

    fn thinking_config(&self) -> Option<ThinkingConfig> {
        self.config.thinking().map(ThinkingConfig::enabled)
    }

    /// Processes a user query, emitting [`StreamEvent`]s as work happens.
    ///
    /// Stream failures emit one `error` event and end the run without
    /// touching history. Cancellation ends the run silently; history keeps
    /// everything up to the last complete tool-result turn.
    pub async fn query_stream<F, Fut>(
        &mut self,
        user_query: &str,
        use_history: bool,
        cancel: CancellationToken,
        mut on_event: F,
    ) -> Result<()>
    where
        F: FnMut(StreamEvent) -> Fut,
        Fut: Future<Output = ()>,
    {
        let system_prompt = self.system_prompt_text(true);
        let tools = self.tool_definitions();

        let mut messages: Vec<ChatMessage> = if use_history {
            self.history.clone()
        } else {
            Vec::new()
        };
        let user_message = ChatMessage::user_text(user_query);
        messages.push(user_message.clone());
        let mut user_committed = false;

        info!(query_len = user_query.len(), "Starting query run");

        let mut response = match self
            .stream_turn(&messages, &system_prompt, &tools, &cancel, &mut on_event)
            .await
        {
            Ok(Some(response)) => response,
            // Cancelled mid-stream: nothing was committed.
            Ok(None) => return Ok(()),
            Err(e) => {
                on_event(StreamEvent::error(e.to_string())).await;
                return Ok(());
            }
        };

        while response.stop_reason == StopReason::ToolUse {
            let assistant_message = ChatMessage::assistant(response.content.clone());
            let calls: Vec<(String, String, Value)> = response
                .tool_uses()
                .map(|(id, name, input)| (id.to_string(), name.to_string(), input.clone()))
                .collect();

            let mut tool_results = Vec::new();
            for (id, name, input) in calls {
                if cancel.is_cancelled() {
                    return Ok(());
                }

                on_event(StreamEvent::ToolUse {
                    name: name.clone(),
                    status: ToolUseStatus::Executing,
                    input: Some(input.clone()),
                })
                .await;

                let result = self.dispatch_tool(&name, input.clone()).await;
                self.result_cache.insert(&id, result.clone());
                self.emit_tool_event(&name, &input, &result, &mut on_event).await;

                tool_results.push(ContentBlock::tool_result(&id, result));
            }

            let results_message = ChatMessage::tool_results(tool_results);
            messages.push(assistant_message.clone());
            messages.push(results_message.clone());

            // The single safe commit point: a whole tool-result batch.
            if use_history {
                if !user_committed {
                    self.history.push(user_message.clone());
                    user_committed = true;
                }
                self.history.push(assistant_message);
                self.history.push(results_message);
            }

            if cancel.is_cancelled() {
                // Completed work stays committed for a later resume.
                return Ok(());
            }

            on_event(StreamEvent::processing("Analyzing results...")).await;

            response = match self
                .stream_turn(&messages, &system_prompt, &tools, &cancel, &mut on_event)
                .await
            {
                Ok(Some(response)) => response,
                Ok(None) => return Ok(()),
                Err(e) => {
                    on_event(StreamEvent::error(e.to_string())).await;
                    return Ok(());
                }
            };
        }

        if use_history {
            if !user_committed {
                self.history.push(user_message);
            }
            self.history
                .push(ChatMessage::assistant(response.content));
        }

        info!("Query run complete");
        Ok(())
    }

    /// Streams one model turn, forwarding text and tool-use-start events.
    /// Returns `None` when the run was cancelled before the response sealed.
    async fn stream_turn<F, Fut>(
        &self,
        messages: &[ChatMessage],
        system_prompt: &str,
        tools: &[ToolDefinition],
        cancel: &CancellationToken,
        on_event: &mut F,
    ) -> Result<Option<StreamingResponse>>
    where
        F: FnMut(StreamEvent) -> Fut,
        Fut: Future<Output = ()>,
    {
        let request = MessageRequest::new(self.model.clone(), messages.to_vec())
            .with_system(system_prompt)
            .with_tools(tools.to_vec())
            .with_thinking(self.thinking_config());

        let mut stream = self
            .client
            .create_message_stream(request, cancel.clone())
            .await?;

        let mut response = None;
        while let Some(event) = stream.next().await {
            if cancel.is_cancelled() {
                return Ok(None);
            }
            match event? {
                ClientEvent::TextDelta { text, .. } => {
                    if !text.is_empty() {
                        on_event(StreamEvent::text(text)).await;
                    }
                }
                ClientEvent::ToolUseStart { name, .. } => {
                    on_event(StreamEvent::ToolUse {
                        name,
                        status: ToolUseStatus::Started,
                        input: None,
                    })
                    .await;
                }
                ClientEvent::ResponseReady(sealed) => response = Some(sealed),
                _ => {}
            }
        }

        if cancel.is_cancelled() {
            return Ok(None);
        }
        Ok(response)
    }

    /// Runs one tool call; unknown names and tool failures come back as
    /// error payloads the model can observe.
    async fn dispatch_tool(&mut self, name: &str, input: Value) -> String {
        debug!(tool = name, "Dispatching tool call");
        match self.tools.get_mut(name) {
            Some(tool) => tool.execute(input).await,
            None => serde_json::json!({"error": format!("Unknown tool: {name}")}).to_string(),
        }
    }

    /// Emits the tool-specific event for a completed call.
    async fn emit_tool_event<F, Fut>(
        &self,
        name: &str,
        input: &Value,
        result: &str,
        on_event: &mut F,
    ) where
        F: FnMut(StreamEvent) -> Fut,
        Fut: Future<Output = ()>,
    {
        match name {
            "execute_sql" => {
                let succeeded = serde_json::from_str::<Value>(result)
                    .map(|v| v["success"] == Value::Bool(true))
                    .unwrap_or(false);
                if !succeeded {
                    return;
                }
                let sql_tool = self
                    .tools
                    .get(name)
                    .and_then(|t| t.as_any().downcast_ref::<ExecuteSqlTool>());
                if let Some(tool) = sql_tool {
                    if let (Some(query), Some(results)) = (tool.last_query(), tool.last_results())
                    {
                        on_event(StreamEvent::QueryResult {
                            query: query.to_string(),
                            results: results.to_vec(),
                        })
                        .await;
                    }
                }
            }
            "viz" => {
                on_event(StreamEvent::PlotResult {
                    tool_name: name.to_string(),
                    input: input.clone(),
                    result: result.to_string(),
                })
                .await;
            }
            _ => {
                on_event(StreamEvent::ToolResult {
                    tool_name: name.to_string(),
                    result: result.to_string(),
                })
                .await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ThinkingLevel;

    async fn memory_agent(config: AgentConfig) -> SqlAgent {
        let gateway = Arc::new(
            Gateway::connect(&ConnectionTarget::Sqlite(None))
                .await
                .unwrap(),
        );
        let client: Arc<dyn LlmClient> = Arc::new(crate::llm::AnthropicClient::new("sk-test"));
        SqlAgent::with_client(gateway, Some("testdb"), config, client, "claude-sonnet-4").unwrap()
    }

    #[tokio::test]
    async fn test_system_prompt_uses_claude_template() {
        let agent = memory_agent(AgentConfig::new()).await;
        let prompt = agent.system_prompt_text(true);
        assert!(prompt.contains("helpful SQL assistant"));
        assert!(prompt.contains("SQLite"));
    }

    #[tokio::test]
    async fn test_system_prompt_gpt_family() {
        let gateway = Arc::new(
            Gateway::connect(&ConnectionTarget::Sqlite(None))
                .await
                .unwrap(),
        );
        let client: Arc<dyn LlmClient> = Arc::new(crate::llm::AnthropicClient::new("sk-test"));
        let agent =
            SqlAgent::with_client(gateway, None, AgentConfig::new(), client, "gpt-5-mini")
                .unwrap();
        let prompt = agent.system_prompt_text(true);
        assert!(prompt.contains("SQL assistant working against"));
    }

    #[tokio::test]
    async fn test_custom_system_prompt_replaces_base() {
        let config = AgentConfig::new().with_system_prompt("CUSTOM SYSTEM PROMPT");
        let agent = memory_agent(config).await;
        let prompt = agent.system_prompt_text(true);
        assert!(prompt.contains("CUSTOM SYSTEM PROMPT"));
        assert!(!prompt.contains("helpful SQL assistant"));
    }

    #[tokio::test]
    async fn test_whitespace_system_prompt_ignored() {
        let config = AgentConfig::new().with_system_prompt("   \n\t");
        let agent = memory_agent(config).await;
        assert!(agent.system_prompt_text(true).contains("helpful SQL assistant"));
    }

    #[tokio::test]
    async fn test_dangerous_rider_appended() {
        let config = AgentConfig::new().with_allow_dangerous(true);
        let agent = memory_agent(config).await;
        assert!(agent
            .system_prompt_text(true)
            .contains("Write operations (INSERT, UPDATE, DELETE, DDL) are enabled"));
    }

    #[tokio::test]
    async fn test_memory_override_is_verbatim() {
        let config = AgentConfig::new().with_memory("remember: fiscal year starts in April");
        let agent = memory_agent(config).await;
        let prompt = agent.system_prompt_text(true);
        assert!(prompt.contains(prompts::MEMORY_ADDITION));
        assert!(prompt.contains("fiscal year starts in April"));
    }

    #[tokio::test]
    async fn test_empty_memory_override_disables_injection() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::open(dir.path().join("memories.json"));
        store.add("testdb", "a stored note").unwrap();

        let mut agent = memory_agent(AgentConfig::new().with_memory("")).await;
        agent.set_memory_store(store);
        let prompt = agent.system_prompt_text(true);
        assert!(!prompt.contains(prompts::MEMORY_ADDITION));
        assert!(!prompt.contains("a stored note"));
    }

    #[tokio::test]
    async fn test_stored_memories_injected() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::open(dir.path().join("memories.json"));
        store.add("testdb", "totals exclude refunds").unwrap();

        let mut agent = memory_agent(AgentConfig::new()).await;
        agent.set_memory_store(store);
        let prompt = agent.system_prompt_text(true);
        assert!(prompt.contains(prompts::MEMORY_ADDITION));
        assert!(prompt.contains("totals exclude refunds"));

        // And the memory section can be excluded on demand.
        assert!(!agent.system_prompt_text(false).contains("totals exclude refunds"));
    }

    #[tokio::test]
    async fn test_tool_definitions_in_registry_order() {
        let agent = memory_agent(AgentConfig::new()).await;
        let names: Vec<String> = agent
            .tool_definitions()
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert_eq!(
            names,
            vec![
                "execute_sql",
                "introspect_schema",
                "list_tables",
                "search_knowledge",
                "viz"
            ]
        );
    }

    #[tokio::test]
    async fn test_tool_instances_not_shared_between_agents() {
        let a = memory_agent(AgentConfig::new()).await;
        let b = memory_agent(AgentConfig::new()).await;
        for (name, tool) in a.tools() {
            let other = &b.tools()[name];
            let a_ptr = tool.as_ref() as *const dyn Tool as *const u8;
            let b_ptr = other.as_ref() as *const dyn Tool as *const u8;
            assert_ne!(a_ptr, b_ptr, "tool '{name}' shared across agents");
        }
    }

    #[tokio::test]
    async fn test_thinking_config_propagates() {
        let config = AgentConfig::new().with_thinking_level(ThinkingLevel::High);
        let agent = memory_agent(config).await;
        let thinking = agent.thinking_config().unwrap();
        assert_eq!(thinking.budget_tokens, 16384);
    }
}
