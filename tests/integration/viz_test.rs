//! Visualization flow integration tests.
//!
//! Drives execute_sql then viz through the orchestrator with a scripted
//! client, covering the result-handle lookup and the validation-feedback
//! retry.

use std::sync::Arc;

use serde_json::json;
use tokio_util::sync::CancellationToken;

use sqlsaber::agent::SqlAgent;
use sqlsaber::config::AgentConfig;
use sqlsaber::db::{ConnectionTarget, Gateway};
use sqlsaber::events::StreamEvent;
use sqlsaber::viz::{apply_transforms, VizSpec};

use super::common::{event_log, text_turn, tool_use_turn, ScriptedClient};
use super::gateway_test::seeded_sqlite;

fn valid_spec_json(file: &str) -> String {
    json!({
        "version": "1",
        "title": "Order totals",
        "data": {"source": {"file": file}},
        "chart": {
            "type": "bar",
            "encoding": {
                "x": {"field": "name", "type": "category"},
                "y": {"field": "total", "type": "number"}
            }
        }
    })
    .to_string()
}

#[tokio::test]
async fn test_viz_flow_with_self_correction() {
    let file = "result_toolu_sql.json";

    // Outer turn 1: run SQL. Outer turn 2: ask for a chart. The two middle
    // scripts answer the viz sub-agent: first an invalid spec (missing the
    // chart discriminator), then a valid one. Outer turn 3: final prose.
    let invalid_spec = json!({
        "data": {"source": {"file": file}},
        "chart": {"encoding": {"x": {"field": "name"}, "y": {"field": "total"}}}
    })
    .to_string();

    let client = ScriptedClient::new(vec![
        tool_use_turn(vec![(
            "toolu_sql",
            "execute_sql",
            json!({"query": "SELECT u.name, o.total FROM users u JOIN orders o ON o.user_id = u.id"}),
        )]),
        tool_use_turn(vec![(
            "toolu_viz",
            "viz",
            json!({"request": "bar chart of totals by name", "file": file}),
        )]),
        text_turn(&invalid_spec),
        text_turn(&valid_spec_json(file)),
        text_turn("Here is your chart."),
    ]);

    let dir = tempfile::tempdir().unwrap();
    let path = seeded_sqlite(&dir).await;
    let gateway = Arc::new(
        Gateway::connect(&ConnectionTarget::Sqlite(Some(path)))
            .await
            .unwrap(),
    );
    let mut agent = SqlAgent::with_client(
        gateway,
        Some("testdb"),
        AgentConfig::new(),
        client.clone(),
        "claude-sonnet-4",
    )
    .unwrap();

    let log = event_log();
    let sink = log.clone();
    agent
        .query_stream(
            "plot order totals per user",
            true,
            CancellationToken::new(),
            move |event| {
                let sink = sink.clone();
                async move {
                    sink.lock().unwrap().push(event);
                }
            },
        )
        .await
        .unwrap();

    // Five model calls total: two for the sub-agent's retry (run count = 2).
    assert_eq!(client.request_count(), 5);

    // The retry carried the validation error back to the sub-agent.
    let requests = client.requests.lock().unwrap();
    let retry_text = requests[3].messages.last().unwrap().text();
    assert!(retry_text.contains("failed validation"));
    drop(requests);

    // The plot_result payload re-validates against the spec schema and
    // gained the bar defaults (sort desc by y).
    let events = log.lock().unwrap();
    let plot = events
        .iter()
        .find_map(|e| match e {
            StreamEvent::PlotResult { result, .. } => Some(result.clone()),
            _ => None,
        })
        .expect("plot_result event missing");
    let value: serde_json::Value = serde_json::from_str(&plot).unwrap();
    let spec = VizSpec::validate(&value).unwrap();
    assert_eq!(spec.chart.type_name(), "bar");
    assert_eq!(spec.transform.len(), 1);
    drop(events);

    // History: user, assistant, tool_result, assistant, tool_result, assistant.
    assert_eq!(agent.history().len(), 6);
}

#[tokio::test]
async fn test_viz_rejects_unknown_handle() {
    let client = ScriptedClient::new(vec![
        tool_use_turn(vec![(
            "toolu_viz",
            "viz",
            json!({"request": "chart", "file": "result_never_ran.json"}),
        )]),
        text_turn("no data"),
    ]);

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
        client,
        "claude-sonnet-4",
    )
    .unwrap();

    let log = event_log();
    let sink = log.clone();
    agent
        .query_stream("chart nothing", true, CancellationToken::new(), move |event| {
            let sink = sink.clone();
            async move {
                sink.lock().unwrap().push(event);
            }
        })
        .await
        .unwrap();

    let events = log.lock().unwrap();
    let plot = events
        .iter()
        .find_map(|e| match e {
            StreamEvent::PlotResult { result, .. } => Some(result.clone()),
            _ => None,
        })
        .unwrap();
    assert!(plot.contains("Tool output not found"));
}

#[test]
fn test_validated_spec_transforms_apply_to_rows() {
    let value: serde_json::Value =
        serde_json::from_str(&valid_spec_json("result_x.json")).unwrap();
    let mut value = value;
    value["transform"] = json!([
        {"sort": [{"field": "total", "dir": "desc"}]},
        {"limit": 2}
    ]);
    let spec = VizSpec::validate(&value).unwrap();

    let rows: Vec<sqlsaber::db::Row> = [10.0, 30.0, 20.0]
        .iter()
        .map(|total| {
            let mut row = sqlsaber::db::Row::new();
            row.insert("name".to_string(), json!("x"));
            row.insert("total".to_string(), json!(total));
            row
        })
        .collect();

    let shaped = apply_transforms(rows, &spec.transform);
    assert_eq!(shaped.len(), 2);
    assert_eq!(shaped[0]["total"], json!(30.0));
    assert_eq!(shaped[1]["total"], json!(20.0));
}
