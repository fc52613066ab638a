//! MCP Protocol Tests
//!
//! Feeds JSON-RPC lines through the server's request handler and checks the
//! responses an MCP client would see.

mod common;

use pretty_assertions::assert_eq;
use serde_json::{json, Value};

use common::{orchestrator, orchestrator_config, FakeDriver, ScriptedClient, TestOrchestrator};
use pg_mcp::mcp::{handle_line, InFlight};
use pg_mcp::validator::ValidationPolicy;

async fn server(answers: &[&'static str]) -> TestOrchestrator {
    let registry = common::registry(FakeDriver::new(), &["sales"]).await;
    orchestrator(
        registry,
        ScriptedClient::new(answers.iter().copied()),
        ValidationPolicy::read_only(),
        orchestrator_config(2),
    )
}

async fn call(orchestrator: &TestOrchestrator, request: Value) -> Value {
    let line = handle_line(orchestrator, &InFlight::default(), &request.to_string()).await.unwrap();
    serde_json::from_str(&line).unwrap()
}

async fn call_tool(orchestrator: &TestOrchestrator, name: &str, arguments: Value) -> (bool, Value) {
    let response = call(
        orchestrator,
        json!({
            "jsonrpc": "2.0",
            "id": 7,
            "method": "tools/call",
            "params": {"name": name, "arguments": arguments}
        }),
    )
    .await;
    let result = &response["result"];
    let envelope = serde_json::from_str(result["content"][0]["text"].as_str().unwrap()).unwrap();
    (result["isError"].as_bool().unwrap(), envelope)
}

#[tokio::test]
async fn test_initialize_and_list_tools() {
    let orchestrator = server(&["SELECT 1"]).await;

    let response =
        call(&orchestrator, json!({"jsonrpc": "2.0", "id": 1, "method": "initialize"})).await;
    assert_eq!(response["id"], 1);
    assert_eq!(response["result"]["serverInfo"]["name"], "pg-mcp");

    let response =
        call(&orchestrator, json!({"jsonrpc": "2.0", "id": 2, "method": "tools/list"})).await;
    assert_eq!(response["result"]["tools"].as_array().unwrap().len(), 4);
}

#[tokio::test]
async fn test_notifications_get_no_response() {
    let orchestrator = server(&["SELECT 1"]).await;
    let line = json!({"jsonrpc": "2.0", "method": "notifications/initialized"}).to_string();
    assert!(handle_line(&orchestrator, &InFlight::default(), &line).await.is_none());
}

#[tokio::test]
async fn test_protocol_errors() {
    let orchestrator = server(&["SELECT 1"]).await;

    let line = handle_line(&orchestrator, &InFlight::default(), "{not json").await.unwrap();
    let response: Value = serde_json::from_str(&line).unwrap();
    assert_eq!(response["error"]["code"], -32700);

    let response =
        call(&orchestrator, json!({"jsonrpc": "2.0", "id": 3, "method": "resources/list"})).await;
    assert_eq!(response["error"]["code"], -32601);

    let response = call(
        &orchestrator,
        json!({
            "jsonrpc": "2.0",
            "id": 4,
            "method": "tools/call",
            "params": {"name": "drop_everything"}
        }),
    )
    .await;
    assert_eq!(response["error"]["message"], "Unknown tool: drop_everything");

    let response = call(
        &orchestrator,
        json!({
            "jsonrpc": "2.0",
            "id": 5,
            "method": "tools/call",
            "params": {"name": "execute_sql", "arguments": {"database": "sales"}}
        }),
    )
    .await;
    assert_eq!(response["error"]["message"], "Missing required field: sql");
}

#[tokio::test]
async fn test_ping() {
    let orchestrator = server(&["SELECT 1"]).await;
    let response =
        call(&orchestrator, json!({"jsonrpc": "2.0", "id": "p", "method": "ping"})).await;
    assert_eq!(response["id"], "p");
    assert_eq!(response["result"], json!({}));
}

#[tokio::test]
async fn test_query_tool_success() {
    let orchestrator = server(&["SELECT id FROM users"]).await;

    let (is_error, envelope) =
        call_tool(&orchestrator, "query", json!({"question": "ids?", "database": "sales"})).await;

    assert!(!is_error);
    assert_eq!(envelope["ok"], true);
    assert_eq!(envelope["engine"], "fake");
    assert_eq!(envelope["command"], "query");
    assert_eq!(envelope["data"]["sql"], "SELECT id FROM users");
    assert_eq!(envelope["data"]["attempts"], 1);
    assert_eq!(envelope["meta"]["rows_returned"], 1);
}

#[tokio::test]
async fn test_query_tool_rejection_is_tool_error() {
    let orchestrator = server(&["DELETE FROM users"]).await;

    let (is_error, envelope) =
        call_tool(
            &orchestrator,
            "query",
            json!({"question": "delete all", "database": "sales"}),
        )
        .await;

    assert!(is_error);
    assert_eq!(envelope["ok"], false);
    assert_eq!(envelope["error"]["code"], "VALIDATION_REJECTED");
    assert_eq!(envelope["error"]["rule"], "write-not-allowed");
}

#[tokio::test]
async fn test_validate_sql_tool() {
    let orchestrator = server(&["SELECT 1"]).await;

    let (is_error, envelope) =
        call_tool(
            &orchestrator,
            "validate_sql",
            json!({"database": "sales", "sql": "DROP TABLE users"}),
        )
        .await;
    assert!(!is_error);
    assert_eq!(envelope["data"]["accepted"], false);
    assert_eq!(envelope["data"]["rule"], "ddl-not-allowed");

    let (_, envelope) =
        call_tool(
            &orchestrator,
            "validate_sql",
            json!({"database": "sales", "sql": "select 1"}),
        )
        .await;
    assert_eq!(envelope["data"]["accepted"], true);
    assert_eq!(envelope["data"]["sql"], "SELECT 1");
}

#[tokio::test]
async fn test_execute_sql_and_list_databases_tools() {
    let orchestrator = server(&["SELECT 1"]).await;

    let (is_error, envelope) =
        call_tool(
            &orchestrator,
            "execute_sql",
            json!({"database": "sales", "sql": "SELECT 1"}),
        )
        .await;
    assert!(!is_error);
    assert_eq!(envelope["data"]["result"]["rows"][0]["n"], 1);

    let (is_error, envelope) =
        call_tool(
            &orchestrator,
            "execute_sql",
            json!({"database": "nope", "sql": "SELECT 1"}),
        )
        .await;
    assert!(is_error);
    assert_eq!(envelope["error"]["code"], "POOL_UNAVAILABLE");

    let (is_error, envelope) = call_tool(&orchestrator, "list_databases", json!({})).await;
    assert!(!is_error);
    assert_eq!(envelope["data"][0]["name"], "sales");
    assert_eq!(envelope["data"][0]["pool"]["outstanding"], 0);
}

async fn stalled_server() -> TestOrchestrator {
    let registry = common::registry(FakeDriver::new(), &["sales"]).await;
    let client = ScriptedClient::stalled();
    orchestrator(registry, client, ValidationPolicy::read_only(), orchestrator_config(2))
}

/// Wait until `count` requests are registered as in flight
async fn until_in_flight(in_flight: &InFlight, count: usize) {
    while in_flight.len() != count {
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn test_cancelled_notification_stops_query() {
    let orchestrator = stalled_server().await;
    let in_flight = InFlight::default();
    let query = json!({
        "jsonrpc": "2.0",
        "id": 11,
        "method": "tools/call",
        "params": {"name": "query", "arguments": {"question": "ids?", "database": "sales"}}
    })
    .to_string();
    let cancel = json!({
        "jsonrpc": "2.0",
        "method": "notifications/cancelled",
        "params": {"requestId": 11, "reason": "user aborted"}
    })
    .to_string();

    let (response, notification_response) = tokio::join!(
        handle_line(&orchestrator, &in_flight, &query),
        async {
            until_in_flight(&in_flight, 1).await;
            handle_line(&orchestrator, &in_flight, &cancel).await
        }
    );

    // Neither the cancelled request nor the notification gets a reply
    assert!(response.is_none());
    assert!(notification_response.is_none());
    assert!(in_flight.is_empty());
    assert_eq!(orchestrator.registry().outstanding("sales").await, Some(0));
}

#[tokio::test]
async fn test_cancellation_for_other_id_leaves_request_running() {
    let orchestrator = server(&["SELECT id FROM users"]).await;
    let in_flight = InFlight::default();
    let cancel = json!({
        "jsonrpc": "2.0",
        "method": "notifications/cancelled",
        "params": {"requestId": "unknown"}
    })
    .to_string();
    assert!(handle_line(&orchestrator, &in_flight, &cancel).await.is_none());

    let query = json!({
        "jsonrpc": "2.0",
        "id": "unknown-not",
        "method": "tools/call",
        "params": {"name": "query", "arguments": {"question": "ids?", "database": "sales"}}
    })
    .to_string();
    let line = handle_line(&orchestrator, &in_flight, &query).await.unwrap();
    let response: Value = serde_json::from_str(&line).unwrap();
    assert_eq!(response["id"], "unknown-not");
    assert_eq!(response["result"]["isError"], false);
    assert!(in_flight.is_empty());
}
