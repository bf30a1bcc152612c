//! MCP (Model Context Protocol) JSON-RPC handler.
//!
//! Reads JSON-RPC 2.0 requests from stdin (one per line) and writes responses
//! to stdout.
//!
//! ## Supported methods
//!
//! | Method              | Description                      |
//! |---------------------|----------------------------------|
//! | `initialize`        | Handshake, returns capabilities  |
//! | `tools/list`        | List available tool definitions  |
//! | `tools/call`        | Execute a tool and return result |
//! | `ping`              | Liveness check                   |
//!
//! Each request runs in its own task, so a slow BMC never blocks `ping` or a
//! second tool call. Responses go through a single writer task and may
//! arrive out of order. `notifications/cancelled` aborts the named request;
//! other notifications are ignored.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::hosts::HostRegistry;
use crate::tools;

const SERVER_NAME: &str = "redfish-mcp";
const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");
const PROTOCOL_VERSION: &str = "2024-11-05";

const PARSE_ERROR: i64 = -32700;
const METHOD_NOT_FOUND: i64 = -32601;
const INTERNAL_ERROR: i64 = -32603;

/// Run the MCP server on stdio until EOF.
pub async fn run_stdio(registry: Arc<HostRegistry>) {
    info!("Serving MCP on stdio");
    serve(BufReader::new(tokio::io::stdin()), tokio::io::stdout(), registry).await;
}

/// Serve line-delimited JSON-RPC from `reader`, writing responses to `writer`.
///
/// Returns after EOF once every in-flight request has answered.
pub async fn serve<R, W>(mut reader: R, writer: W, registry: Arc<HostRegistry>)
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel::<Value>();
    let writer_task = tokio::spawn(write_loop(writer, rx));

    let mut in_flight: HashMap<String, JoinHandle<()>> = HashMap::new();
    let mut line = String::new();

    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                error!(error = %e, "stdin read error");
                break;
            }
        }
        in_flight.retain(|_, task| !task.is_finished());

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let request: Value = match serde_json::from_str(trimmed) {
            Ok(v) => v,
            Err(e) => {
                let _ = tx.send(error_response(
                    Value::Null,
                    PARSE_ERROR,
                    format!("Parse error: {e}"),
                ));
                continue;
            }
        };

        let method = request.get("method").and_then(Value::as_str).unwrap_or("");
        let Some(id) = request.get("id").cloned() else {
            handle_notification(method, &request, &mut in_flight);
            continue;
        };

        let key = id.to_string();
        let registry = Arc::clone(&registry);
        let task = spawn_request(id.clone(), tx.clone(), async move {
            handle_request(&request, &registry).await
        });
        if let Some(previous) = in_flight.insert(key, task) {
            if !previous.is_finished() {
                warn!(id = %id, "Request id reused while still in flight");
            }
        }
    }

    for (id, task) in in_flight {
        if let Err(e) = task.await {
            if !e.is_cancelled() {
                error!(id = %id, error = %e, "Request task failed");
            }
        }
    }
    drop(tx);
    let _ = writer_task.await;
}

/// Run one request in its own task and send its response.
///
/// A handler panic is answered with an internal error for `id`. Aborting the
/// returned handle also aborts the handler.
fn spawn_request<F>(id: Value, tx: mpsc::UnboundedSender<Value>, handler: F) -> JoinHandle<()>
where
    F: Future<Output = Value> + Send + 'static,
{
    tokio::spawn(async move {
        let mut inner = AbortOnDrop(tokio::spawn(handler));
        let response = match (&mut inner.0).await {
            Ok(response) => response,
            Err(e) if e.is_panic() => {
                error!(id = %id, "Request handler panicked");
                error_response(id, INTERNAL_ERROR, "Internal error".into())
            }
            Err(_) => return,
        };
        let _ = tx.send(response);
    })
}

struct AbortOnDrop(JoinHandle<Value>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

fn handle_notification(
    method: &str,
    request: &Value,
    in_flight: &mut HashMap<String, JoinHandle<()>>,
) {
    match method {
        "notifications/initialized" => {}
        "notifications/cancelled" => {
            let Some(id) = request.pointer("/params/requestId") else {
                return;
            };
            if let Some(task) = in_flight.remove(&id.to_string()) {
                task.abort();
                info!(id = %id, "Cancelled request");
            }
        }
        _ => debug!(method, "Ignoring unknown notification"),
    }
}

/// Answer one JSON-RPC request that carries an `id`.
pub async fn handle_request(request: &Value, registry: &HostRegistry) -> Value {
    let id = request.get("id").cloned().unwrap_or(Value::Null);
    let method = request.get("method").and_then(Value::as_str).unwrap_or("");

    let result = match method {
        "initialize" => handle_initialize(),
        "tools/list" => json!({ "tools": tools::tool_definitions() }),
        "tools/call" => handle_tools_call(request, registry).await,
        "ping" => json!({}),
        _ => {
            return error_response(id, METHOD_NOT_FOUND, format!("Method not found: {method}"));
        }
    };

    json!({ "jsonrpc": "2.0", "id": id, "result": result })
}

fn handle_initialize() -> Value {
    json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": {
            "tools": { "listChanged": false }
        },
        "serverInfo": {
            "name": SERVER_NAME,
            "version": SERVER_VERSION
        }
    })
}

async fn handle_tools_call(request: &Value, registry: &HostRegistry) -> Value {
    let params = request.get("params").cloned().unwrap_or(json!({}));
    let name = params.get("name").and_then(Value::as_str).unwrap_or("");
    let args = params.get("arguments").cloned().unwrap_or(json!({}));

    let result = tools::handle_tool_call(name, &args, registry).await;
    let mut response = json!({ "content": result.content });
    if result.is_error {
        response["isError"] = json!(true);
    }
    response
}

fn error_response(id: Value, code: i64, message: String) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": { "code": code, "message": message }
    })
}

/// Write each message as one line, flushed immediately.
async fn write_loop<W: AsyncWrite + Unpin>(mut writer: W, mut rx: mpsc::UnboundedReceiver<Value>) {
    while let Some(message) = rx.recv().await {
        let mut output = serde_json::to_string(&message).unwrap_or_default();
        output.push('\n');
        if let Err(e) = writer.write_all(output.as_bytes()).await {
            error!(error = %e, "stdout write error");
            return;
        }
        if let Err(e) = writer.flush().await {
            error!(error = %e, "stdout flush error");
            return;
        }
    }
}
