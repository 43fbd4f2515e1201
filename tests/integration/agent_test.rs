//! Orchestrator integration tests with a scripted LLM client.

use std::sync::Arc;

use serde_json::json;
use tokio_util::sync::CancellationToken;

use sqlsaber::config::AgentConfig;
use sqlsaber::agent::SqlAgent;
use sqlsaber::db::{ConnectionTarget, Gateway};
use sqlsaber::events::StreamEvent;
use sqlsaber::llm::{ContentBlock, MessageRole};

use super::common::{event_log, text_turn, tool_use_turn, turn_with_text, ScriptedClient};
use super::gateway_test::seeded_sqlite;

async fn seeded_agent(
    dir: &tempfile::TempDir,
    client: Arc<ScriptedClient>,
) -> SqlAgent {
    let path = seeded_sqlite(dir).await;
    let gateway = Arc::new(
        Gateway::connect(&ConnectionTarget::Sqlite(Some(path)))
            .await
            .unwrap(),
    );
    SqlAgent::with_client(
        gateway,
        Some("testdb"),
        AgentConfig::new(),
        client,
        "claude-sonnet-4",
    )
    .unwrap()
}

async fn run(
    agent: &mut SqlAgent,
    query: &str,
    cancel: CancellationToken,
    log: super::common::EventLog,
) {
    let sink = log.clone();
    agent
        .query_stream(query, true, cancel, move |event| {
            let sink = sink.clone();
            async move {
                sink.lock().unwrap().push(event);
            }
        })
        .await
        .unwrap();
}

/// Scenario: streaming text
/// Given a stream emitting text deltas "Hel", "lo", "!"
/// When the orchestrator runs
/// Then three text events arrive in order
/// And the committed assistant content equals "Hello!"
#[tokio::test]
async fn test_streaming_text_deltas() {
    let client = ScriptedClient::new(vec![turn_with_text(
        &["Hel", "lo", "!"],
        sqlsaber::llm::StreamingResponse {
            content: vec![ContentBlock::text("Hello!")],
            stop_reason: sqlsaber::llm::StopReason::EndTurn,
        },
    )]);
    let dir = tempfile::tempdir().unwrap();
    let mut agent = seeded_agent(&dir, client).await;
    let log = event_log();

    run(&mut agent, "say hello", CancellationToken::new(), log.clone()).await;

    let texts: Vec<String> = log
        .lock()
        .unwrap()
        .iter()
        .filter_map(|e| match e {
            StreamEvent::Text { text } => Some(text.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(texts, ["Hel", "lo", "!"]);

    let history = agent.history();
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].text(), "Hello!");
}

/// Scenario: tool-loop convergence
/// Given a stub model that requests list_tables and execute_sql in one turn,
/// then emits final text "done"
/// When the orchestrator runs
/// Then events arrive in order and history holds four turns
/// (user, assistant, tool_result, assistant)
#[tokio::test]
async fn test_tool_loop_convergence() {
    let client = ScriptedClient::new(vec![
        tool_use_turn(vec![
            ("toolu_1", "list_tables", json!({})),
            ("toolu_2", "execute_sql", json!({"query": "SELECT 1 AS x"})),
        ]),
        text_turn("done"),
    ]);
    let dir = tempfile::tempdir().unwrap();
    let mut agent = seeded_agent(&dir, client.clone()).await;
    let log = event_log();

    run(&mut agent, "what is in here?", CancellationToken::new(), log.clone()).await;

    // Event ordering: both tool starts, then executing/result pairs, then
    // the processing marker, then final text.
    let events = log.lock().unwrap();
    let kinds: Vec<String> = events
        .iter()
        .map(|e| match e {
            StreamEvent::ToolUse { name, status, .. } => format!("{name}:{status:?}"),
            StreamEvent::ToolResult { tool_name, .. } => format!("result:{tool_name}"),
            StreamEvent::QueryResult { .. } => "query_result".to_string(),
            StreamEvent::Processing { .. } => "processing".to_string(),
            StreamEvent::Text { .. } => "text".to_string(),
            other => format!("{other:?}"),
        })
        .collect();
    assert_eq!(
        kinds,
        [
            "list_tables:Started",
            "execute_sql:Started",
            "list_tables:Executing",
            "result:list_tables",
            "execute_sql:Executing",
            "query_result",
            "processing",
            "text"
        ]
    );
    drop(events);

    // History shape: user, assistant(tool uses), tool_results, assistant.
    let history = agent.history();
    assert_eq!(history.len(), 4);
    assert_eq!(history[0].role, MessageRole::User);
    assert_eq!(history[1].role, MessageRole::Assistant);
    assert_eq!(history[2].role, MessageRole::User);
    assert_eq!(history[3].role, MessageRole::Assistant);
    assert_eq!(history[3].text(), "done");

    // Tool-use pairing: every tool_use id is answered exactly once in the
    // immediately following turn.
    let use_ids: Vec<&str> = history[1]
        .content
        .iter()
        .filter_map(|b| match b {
            ContentBlock::ToolUse { id, .. } => Some(id.as_str()),
            _ => None,
        })
        .collect();
    let result_ids: Vec<&str> = history[2]
        .content
        .iter()
        .filter_map(|b| match b {
            ContentBlock::ToolResult { tool_use_id, .. } => Some(tool_use_id.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(use_ids, result_ids);

    // The second model call saw the tool results.
    assert_eq!(client.request_count(), 2);
    let requests = client.requests.lock().unwrap();
    assert_eq!(requests[1].messages.len(), 3);
}

/// Scenario: write refusal through the agent
/// Given a model that tries DROP TABLE and then reports what happened
/// Then the tool result carries the refusal and the table survives
#[tokio::test]
async fn test_write_gate_through_agent() {
    let client = ScriptedClient::new(vec![
        tool_use_turn(vec![(
            "toolu_1",
            "execute_sql",
            json!({"query": "DROP TABLE users"}),
        )]),
        text_turn("I cannot do that."),
    ]);
    let dir = tempfile::tempdir().unwrap();
    let mut agent = seeded_agent(&dir, client).await;
    let log = event_log();

    run(&mut agent, "drop the users table", CancellationToken::new(), log.clone()).await;

    let history = agent.history();
    match &history[2].content[0] {
        ContentBlock::ToolResult { content, .. } => {
            assert!(content.contains("Write operations are not allowed"));
        }
        other => panic!("unexpected block: {other:?}"),
    }

    // No query_result event for a refused statement.
    assert!(!log
        .lock()
        .unwrap()
        .iter()
        .any(|e| matches!(e, StreamEvent::QueryResult { .. })));
}

/// Scenario: cancellation before any commit leaves history unchanged.
#[tokio::test]
async fn test_cancellation_before_commit_keeps_history_clean() {
    let client = ScriptedClient::new(vec![tool_use_turn(vec![(
        "toolu_1",
        "execute_sql",
        json!({"query": "SELECT 1"}),
    )])]);
    let dir = tempfile::tempdir().unwrap();
    let mut agent = seeded_agent(&dir, client).await;
    let log = event_log();

    let cancel = CancellationToken::new();
    cancel.cancel();
    run(&mut agent, "anything", cancel, log.clone()).await;

    assert!(agent.history().is_empty());
    assert!(log.lock().unwrap().is_empty());
}

/// Scenario: cancellation after a tool-result batch commits that batch.
#[tokio::test]
async fn test_cancellation_after_batch_commits_tool_results() {
    let client = ScriptedClient::new(vec![tool_use_turn(vec![(
        "toolu_1",
        "execute_sql",
        json!({"query": "SELECT 1 AS x"}),
    )])]);
    let dir = tempfile::tempdir().unwrap();
    let mut agent = seeded_agent(&dir, client).await;

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    agent
        .query_stream("select one", true, cancel, move |event| {
            let trigger = trigger.clone();
            async move {
                // Cancel once the tool has run; the batch still commits.
                if matches!(event, StreamEvent::QueryResult { .. }) {
                    trigger.cancel();
                }
            }
        })
        .await
        .unwrap();

    let history = agent.history();
    assert_eq!(history.len(), 3);
    assert_eq!(history[0].role, MessageRole::User);
    assert!(matches!(
        history[2].content[0],
        ContentBlock::ToolResult { .. }
    ));
}

/// Stream errors emit one error event and leave history untouched.
#[tokio::test]
async fn test_stream_error_emits_error_event() {
    struct FailingClient;

    #[async_trait::async_trait]
    impl sqlsaber::llm::LlmClient for FailingClient {
        async fn create_message_stream(
            &self,
            _request: sqlsaber::llm::MessageRequest,
            _cancel: CancellationToken,
        ) -> sqlsaber::error::Result<
            futures::stream::BoxStream<
                'static,
                sqlsaber::error::Result<sqlsaber::llm::ClientEvent>,
            >,
        > {
            Err(sqlsaber::error::SaberError::llm("boom"))
        }
    }

    let dir = tempfile::tempdir().unwrap();
    let path = seeded_sqlite(&dir).await;
    let gateway = Arc::new(
        Gateway::connect(&ConnectionTarget::Sqlite(Some(path)))
            .await
            .unwrap(),
    );
    let mut agent = SqlAgent::with_client(
        gateway,
        None,
        AgentConfig::new(),
        Arc::new(FailingClient),
        "claude-sonnet-4",
    )
    .unwrap();

    let log = event_log();
    run(&mut agent, "anything", CancellationToken::new(), log.clone()).await;

    let events = log.lock().unwrap();
    assert_eq!(events.len(), 1);
    assert!(matches!(events[0], StreamEvent::Error { .. }));
    assert!(agent.history().is_empty());
}

/// An unknown tool name comes back as an error payload, not a crash.
#[tokio::test]
async fn test_unknown_tool_returns_error_payload() {
    let client = ScriptedClient::new(vec![
        tool_use_turn(vec![("toolu_1", "time_travel", json!({}))]),
        text_turn("that tool does not exist"),
    ]);
    let dir = tempfile::tempdir().unwrap();
    let mut agent = seeded_agent(&dir, client).await;
    let log = event_log();

    run(&mut agent, "go back in time", CancellationToken::new(), log.clone()).await;

    match &agent.history()[2].content[0] {
        ContentBlock::ToolResult { content, .. } => {
            assert!(content.contains("Unknown tool"));
        }
        other => panic!("unexpected block: {other:?}"),
    }
}

/// History accumulates across runs and clears on request.
#[tokio::test]
async fn test_history_across_runs_and_clear() {
    let client = ScriptedClient::new(vec![text_turn("first"), text_turn("second")]);
    let dir = tempfile::tempdir().unwrap();
    let mut agent = seeded_agent(&dir, client.clone()).await;
    let log = event_log();

    run(&mut agent, "one", CancellationToken::new(), log.clone()).await;
    run(&mut agent, "two", CancellationToken::new(), log.clone()).await;
    assert_eq!(agent.history().len(), 4);

    // The second request carried the first exchange as context.
    let requests = client.requests.lock().unwrap();
    assert_eq!(requests[1].messages.len(), 3);
    drop(requests);

    agent.clear_history();
    assert!(agent.history().is_empty());
}
