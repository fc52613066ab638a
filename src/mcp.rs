//! MCP (Model Context Protocol) Server
//!
//! This module implements an MCP server using manual JSON-RPC 2.0 over stdio.
//! No MCP-specific crates are involved: requests and responses are plain
//! `serde_json` values, one JSON document per line.
//!
//! # Architecture
//!
//! - **Transport**: JSON-RPC 2.0 over stdio (line-based)
//! - **Concurrency**: each request runs in its own task; a single writer task
//!   owns stdout so responses never interleave
//! - **Tools**: thin wrappers over [`QueryOrchestrator`] operations
//! - **Cancellation**: `notifications/cancelled` cancels the in-flight
//!   `tools/call` with the matching `requestId`; no response is written for it
//!
//! # MCP Tools
//!
//! - `query` - Answer a natural-language question against a registered database
//! - `execute_sql` - Validate and run caller-supplied SQL
//! - `validate_sql` - Validate SQL without running it
//! - `list_databases` - Registered databases with pool counters
//!
//! Tool results carry the same success/error envelopes the CLI prints. A
//! failed operation is a successful JSON-RPC response with `isError: true`;
//! JSON-RPC errors are reserved for protocol problems (bad JSON, unknown
//! method or tool, missing arguments).
//!
//! # Usage
//!
//! ```json
//! {
//!   "mcpServers": {
//!     "pg-mcp": {
//!       "command": "pg-mcp",
//!       "args": ["serve"]
//!     }
//!   }
//! }
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::engine::{millis, Driver};
use crate::error::OrchestrationError;
use crate::generator::{CompletionClient, PromptBuilder};
use crate::orchestrator::{QueryOrchestrator, QueryRequest};
use crate::output::{answer_envelope, ErrorEnvelope, Metadata, SuccessEnvelope, ValidationReport};
use crate::validator::SqlParser;

const PROTOCOL_VERSION: &str = "2024-11-05";

const PARSE_ERROR: i32 = -32700;
const METHOD_NOT_FOUND: i32 = -32601;
const INTERNAL_ERROR: i32 = -32603;

// ============================================================================
// JSON-RPC 2.0 Structures
// ============================================================================

/// JSON-RPC 2.0 Request
#[derive(Debug, Deserialize)]
struct JsonRpcRequest {
    #[allow(dead_code)]
    jsonrpc: String,
    id: Option<Value>,
    method: String,
    params: Option<Value>,
}

/// JSON-RPC 2.0 Response
#[derive(Debug, Serialize)]
struct JsonRpcResponse {
    jsonrpc: String,
    id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    fn success(id: Option<Value>, result: Value) -> Self {
        Self { jsonrpc: "2.0".to_string(), id, result: Some(result), error: None }
    }

    fn failure(id: Option<Value>, code: i32, message: String) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(JsonRpcError { code, message, data: None }),
        }
    }
}

/// JSON-RPC 2.0 Error
#[derive(Debug, Serialize)]
struct JsonRpcError {
    code: i32,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
}

// ============================================================================
// MCP Tool Result Structures
// ============================================================================

/// Text content block for MCP tool results
#[derive(Debug, Serialize)]
struct TextContent {
    #[serde(rename = "type")]
    content_type: String,
    text: String,
}

impl TextContent {
    fn new(text: String) -> Self {
        Self { content_type: "text".to_string(), text }
    }
}

/// MCP tool call result
#[derive(Debug, Serialize)]
struct CallToolResult {
    content: Vec<TextContent>,
    #[serde(rename = "isError")]
    is_error: bool,
}

impl CallToolResult {
    /// Tool result holding a success envelope
    fn success(envelope: impl Serialize) -> Result<Value> {
        Self::build(envelope, false)
    }

    /// Tool result holding an error envelope
    fn error(envelope: &ErrorEnvelope) -> Result<Value> {
        Self::build(envelope, true)
    }

    fn build(envelope: impl Serialize, is_error: bool) -> Result<Value> {
        let json_text = serde_json::to_string_pretty(&envelope)?;
        let result = Self { content: vec![TextContent::new(json_text)], is_error };
        Ok(serde_json::to_value(result)?)
    }
}

// ============================================================================
// In-flight Requests
// ============================================================================

/// Cancellation tokens of running `tools/call` requests, keyed by request id
#[derive(Debug, Clone, Default)]
pub struct InFlight {
    inner: Arc<Mutex<Requests>>,
}

#[derive(Debug, Default)]
struct Requests {
    next_seq: u64,
    by_id: HashMap<String, (u64, CancellationToken)>,
}

impl InFlight {
    /// Track `id` until the returned guard drops
    fn register(&self, id: &Value) -> InFlightGuard {
        let key = id.to_string();
        let token = CancellationToken::new();
        let mut requests = self.lock();
        let seq = requests.next_seq;
        requests.next_seq += 1;
        requests.by_id.insert(key.clone(), (seq, token.clone()));
        InFlightGuard { in_flight: self.clone(), key, seq, token }
    }

    /// Cancel the request with `id`; false when nothing with that id is running
    pub fn cancel(&self, id: &Value) -> bool {
        match self.lock().by_id.get(&id.to_string()) {
            Some((_, token)) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Number of requests currently tracked
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().by_id.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, Requests> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Removes its request from [`InFlight`] on drop
struct InFlightGuard {
    in_flight: InFlight,
    key: String,
    seq: u64,
    token: CancellationToken,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut requests = self.in_flight.lock();
        // A reused id may already belong to a newer request
        if requests.by_id.get(&self.key).is_some_and(|(seq, _)| *seq == self.seq) {
            requests.by_id.remove(&self.key);
        }
    }
}

// ============================================================================
// MCP Server
// ============================================================================

/// Start the MCP server
///
/// Reads JSON-RPC requests from stdin until EOF and writes one response line
/// per request to stdout. Requests are handled concurrently; responses may be
/// written in a different order than requests arrived, matched by `id`.
///
/// # Errors
///
/// Returns an error if reading stdin fails.
pub async fn serve<D, C, P, B>(orchestrator: Arc<QueryOrchestrator<D, C, P, B>>) -> Result<()>
where
    D: Driver,
    C: CompletionClient,
    P: SqlParser + 'static,
    B: PromptBuilder + 'static,
{
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(line) = rx.recv().await {
            if stdout.write_all(line.as_bytes()).await.is_err()
                || stdout.write_all(b"\n").await.is_err()
                || stdout.flush().await.is_err()
            {
                tracing::error!("stdout closed, stopping MCP writer");
                break;
            }
        }
    });

    tracing::info!(engine = orchestrator.registry().engine(), "MCP server listening on stdio");

    let in_flight = InFlight::default();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let orchestrator = Arc::clone(&orchestrator);
        let in_flight = in_flight.clone();
        let tx = tx.clone();
        tokio::spawn(async move {
            if let Some(response) = handle_line(&orchestrator, &in_flight, &line).await {
                let _ = tx.send(response);
            }
        });
    }

    tracing::info!("stdin closed, MCP server shutting down");
    drop(tx);
    let _ = writer.await;
    Ok(())
}

/// Handle one line of input
///
/// Returns the serialized response, or `None` for notifications and for
/// requests cancelled while they ran.
pub async fn handle_line<D, C, P, B>(
    orchestrator: &QueryOrchestrator<D, C, P, B>,
    in_flight: &InFlight,
    line: &str,
) -> Option<String>
where
    D: Driver,
    C: CompletionClient,
    P: SqlParser,
    B: PromptBuilder,
{
    let response = match serde_json::from_str::<JsonRpcRequest>(line) {
        Ok(request) => handle_request(orchestrator, in_flight, request).await?,
        Err(e) => JsonRpcResponse::failure(None, PARSE_ERROR, format!("Parse error: {e}")),
    };

    match serde_json::to_string(&response) {
        Ok(json) => Some(json),
        Err(e) => {
            tracing::error!(error = %e, "Failed to serialize JSON-RPC response");
            None
        }
    }
}

/// Route a request to its handler
async fn handle_request<D, C, P, B>(
    orchestrator: &QueryOrchestrator<D, C, P, B>,
    in_flight: &InFlight,
    request: JsonRpcRequest,
) -> Option<JsonRpcResponse>
where
    D: Driver,
    C: CompletionClient,
    P: SqlParser,
    B: PromptBuilder,
{
    // Notifications never get a response
    if request.id.is_none() && request.method.starts_with("notifications/") {
        if request.method == "notifications/cancelled" {
            handle_cancelled(in_flight, request.params.as_ref());
        } else {
            tracing::debug!(method = %request.method, "Notification received");
        }
        return None;
    }

    let result = match request.method.as_str() {
        "initialize" => handle_initialize(request.params),
        "ping" => Ok(serde_json::json!({})),
        "tools/list" => handle_list_tools(),
        "tools/call" => {
            let guard = request.id.as_ref().map(|id| in_flight.register(id));
            let token = guard.as_ref().map_or_else(CancellationToken::new, |g| g.token.clone());
            let result = handle_call_tool(orchestrator, request.params, &token).await;
            if token.is_cancelled() {
                return None;
            }
            result
        }
        method => {
            return Some(JsonRpcResponse::failure(
                request.id,
                METHOD_NOT_FOUND,
                format!("Unknown method: {method}"),
            ));
        }
    };

    Some(match result {
        Ok(value) => JsonRpcResponse::success(request.id, value),
        Err(e) => JsonRpcResponse::failure(request.id, INTERNAL_ERROR, e.to_string()),
    })
}

// ============================================================================
// MCP Protocol Handlers
// ============================================================================

/// Handle MCP initialize request
fn handle_initialize(_params: Option<Value>) -> Result<Value> {
    Ok(serde_json::json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": {
            "tools": {}
        },
        "serverInfo": {
            "name": "pg-mcp",
            "version": env!("CARGO_PKG_VERSION")
        }
    }))
}

/// Handle tools/list request
fn handle_list_tools() -> Result<Value> {
    Ok(serde_json::json!({
        "tools": [
            {
                "name": "query",
                "description": "Answer a natural-language question against a registered PostgreSQL database. The question is translated to SQL, checked against the database's safety policy (read-only unless writes are enabled), and executed. Returns the SQL that ran, the number of generation attempts, and the rows. Use list_databases first to find database names.",
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "question": {
                            "type": "string",
                            "description": "Question in natural language"
                        },
                        "database": {
                            "type": "string",
                            "description": "Name of a registered database"
                        },
                        "schema_context": {
                            "type": "string",
                            "description": "Optional schema description used instead of the loaded catalog"
                        }
                    },
                    "required": ["question", "database"]
                }
            },
            {
                "name": "execute_sql",
                "description": "Validate and execute SQL you wrote yourself against a registered database. The same safety policy as the query tool applies; rejected SQL returns the rule that failed.",
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "database": {
                            "type": "string",
                            "description": "Name of a registered database"
                        },
                        "sql": {
                            "type": "string",
                            "description": "SQL to validate and run"
                        }
                    },
                    "required": ["database", "sql"]
                }
            },
            {
                "name": "validate_sql",
                "description": "Check SQL against a database's safety policy without running it. Returns whether it would be accepted, the sanitized SQL, or the rule and reason for rejection.",
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "database": {
                            "type": "string",
                            "description": "Database whose policy applies"
                        },
                        "sql": {
                            "type": "string",
                            "description": "SQL to validate"
                        }
                    },
                    "required": ["database", "sql"]
                }
            },
            {
                "name": "list_databases",
                "description": "List registered databases with their connection pool counters and whether writes are allowed.",
                "inputSchema": {
                    "type": "object",
                    "properties": {}
                }
            }
        ]
    }))
}

/// Handle `notifications/cancelled`
fn handle_cancelled(in_flight: &InFlight, params: Option<&Value>) {
    let Some(id) = params.and_then(|p| p.get("requestId")) else {
        tracing::debug!("Cancellation without requestId ignored");
        return;
    };
    let reason = params.and_then(|p| p["reason"].as_str()).unwrap_or("");
    if in_flight.cancel(id) {
        tracing::info!(request_id = %id, reason, "Request cancelled by client");
    } else {
        tracing::debug!(request_id = %id, "Cancellation for unknown or finished request");
    }
}

/// Handle tools/call request
async fn handle_call_tool<D, C, P, B>(
    orchestrator: &QueryOrchestrator<D, C, P, B>,
    params: Option<Value>,
    token: &CancellationToken,
) -> Result<Value>
where
    D: Driver,
    C: CompletionClient,
    P: SqlParser,
    B: PromptBuilder,
{
    let params = params.ok_or_else(|| anyhow!("Missing params"))?;
    let name = params["name"].as_str().ok_or_else(|| anyhow!("Missing tool name"))?;
    let args = params.get("arguments").cloned().unwrap_or_else(|| serde_json::json!({}));

    tracing::debug!(tool = name, "Tool call");
    match name {
        "query" => tool_query(orchestrator, &args, token).await,
        "execute_sql" => tool_execute_sql(orchestrator, &args, token).await,
        "validate_sql" => tool_validate_sql(orchestrator, &args),
        "list_databases" => tool_list_databases(orchestrator).await,
        _ => Err(anyhow!("Unknown tool: {name}")),
    }
}

/// Required string argument
fn required_str<'a>(args: &'a Value, field: &str) -> Result<&'a str> {
    args[field].as_str().ok_or_else(|| anyhow!("Missing required field: {field}"))
}

/// MCP Tool: query
async fn tool_query<D, C, P, B>(
    orchestrator: &QueryOrchestrator<D, C, P, B>,
    args: &Value,
    token: &CancellationToken,
) -> Result<Value>
where
    D: Driver,
    C: CompletionClient,
    P: SqlParser,
    B: PromptBuilder,
{
    let request: QueryRequest =
        serde_json::from_value(args.clone()).map_err(|e| anyhow!("Invalid arguments: {e}"))?;
    let engine = orchestrator.registry().engine();

    match orchestrator.run_cancellable(request, token.clone()).await {
        Ok(answer) => CallToolResult::success(answer_envelope(engine, "query", answer)),
        Err(e) => CallToolResult::error(&ErrorEnvelope::from_error(engine, "query", &e)),
    }
}

/// MCP Tool: execute_sql
async fn tool_execute_sql<D, C, P, B>(
    orchestrator: &QueryOrchestrator<D, C, P, B>,
    args: &Value,
    token: &CancellationToken,
) -> Result<Value>
where
    D: Driver,
    C: CompletionClient,
    P: SqlParser,
    B: PromptBuilder,
{
    let database = required_str(args, "database")?;
    let sql = required_str(args, "sql")?;
    let engine = orchestrator.registry().engine();

    let outcome = tokio::select! {
        biased;
        () = token.cancelled() => Err(OrchestrationError::Cancelled),
        result = orchestrator.execute_sql(database, sql) => result,
    };

    match outcome {
        Ok(answer) => CallToolResult::success(answer_envelope(engine, "execute_sql", answer)),
        Err(e) => CallToolResult::error(&ErrorEnvelope::from_error(engine, "execute_sql", &e)),
    }
}

/// MCP Tool: validate_sql
fn tool_validate_sql<D, C, P, B>(
    orchestrator: &QueryOrchestrator<D, C, P, B>,
    args: &Value,
) -> Result<Value>
where
    D: Driver,
    C: CompletionClient,
    P: SqlParser,
    B: PromptBuilder,
{
    let database = required_str(args, "database")?;
    let sql = required_str(args, "sql")?;

    let start = Instant::now();
    let report = ValidationReport::from(orchestrator.validate_sql(database, sql));
    let meta = Metadata::new(millis(start.elapsed()));

    CallToolResult::success(SuccessEnvelope::new(
        orchestrator.registry().engine(),
        "validate_sql",
        report,
        meta,
    ))
}

/// MCP Tool: list_databases
async fn tool_list_databases<D, C, P, B>(
    orchestrator: &QueryOrchestrator<D, C, P, B>,
) -> Result<Value>
where
    D: Driver,
    C: CompletionClient,
    P: SqlParser,
    B: PromptBuilder,
{
    let databases = orchestrator.databases().await;
    let meta = Metadata::with_rows(0, databases.len());
    CallToolResult::success(SuccessEnvelope::new(
        orchestrator.registry().engine(),
        "list_databases",
        databases,
        meta,
    ))
}
