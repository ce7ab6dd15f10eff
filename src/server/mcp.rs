//! MCP transport over stdio: newline-delimited JSON-RPC 2.0.
//!
//! Each request is dispatched on its own task so slow backends never stall
//! unrelated clients; a writer task serializes responses back to stdout.
//! A `notifications/cancelled` notification aborts the task for the named
//! request id: the dispatch future is dropped, pending backend awaits are
//! abandoned, and any uncommitted driver transaction rolls back when its
//! handle drops. EOF (or Ctrl-C) starts the drain: reading stops and
//! in-flight dispatches get up to the configured window to finish.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::AbortHandle;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::SharedState;
use crate::mcp::ToolCallResult;

/// JSON-RPC request
#[derive(Debug, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
}

/// JSON-RPC response
#[derive(Debug, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    /// ID must always be present in responses (null if notification)
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

/// JSON-RPC error
#[derive(Debug, Serialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcResponse {
    /// Create a success response
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: id.unwrap_or(Value::Null),
            result: Some(result),
            error: None,
        }
    }

    /// Create an error response
    pub fn error(id: Option<Value>, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: id.unwrap_or(Value::Null),
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }
}

/// Tool call parameters
#[derive(Debug, Deserialize)]
struct ToolCallParams {
    /// Explicit sub-server; tools route through discovery when absent.
    #[serde(default)]
    server: Option<String>,
    name: String,
    #[serde(default)]
    arguments: Option<Value>,
}

/// MCP server running over stdio
pub struct McpServer {
    state: SharedState,
}

impl McpServer {
    /// Create a new MCP server
    pub fn new(state: SharedState) -> Self {
        Self { state }
    }

    /// Run the server using async stdio until EOF or Ctrl-C, then drain.
    pub async fn run(&self) -> std::io::Result<()> {
        info!("Memory hub serving MCP on stdio");

        let stdin = tokio::io::stdin();
        let mut reader = BufReader::new(stdin);
        let mut line = String::new();

        let (tx, mut rx) = mpsc::channel::<JsonRpcResponse>(64);
        let writer = tokio::spawn(async move {
            let mut stdout = tokio::io::stdout();
            while let Some(response) = rx.recv().await {
                match serde_json::to_string(&response) {
                    Ok(body) => {
                        if stdout.write_all(body.as_bytes()).await.is_err()
                            || stdout.write_all(b"\n").await.is_err()
                            || stdout.flush().await.is_err()
                        {
                            break;
                        }
                    }
                    Err(e) => error!(error = %e, "Failed to serialize response"),
                }
            }
        });

        let in_flight = Arc::new(AtomicU64::new(0));
        let inflight_ids: Arc<Mutex<HashMap<String, AbortHandle>>> =
            Arc::new(Mutex::new(HashMap::new()));

        loop {
            line.clear();
            let read = tokio::select! {
                read = reader.read_line(&mut line) => read?,
                _ = tokio::signal::ctrl_c() => {
                    info!("Shutdown signal received");
                    break;
                }
            };
            if read == 0 {
                info!("EOF received, shutting down");
                break;
            }

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            debug!(request = %trimmed, "Received request");

            let request = match serde_json::from_str::<JsonRpcRequest>(trimmed) {
                Ok(request) => request,
                Err(e) => {
                    error!(error = %e, "Failed to parse request");
                    let _ = tx
                        .send(JsonRpcResponse::error(None, -32700, format!("Parse error: {}", e)))
                        .await;
                    continue;
                }
            };

            // Cancellation is handled on the read loop so it can reach the
            // in-flight map before the target finishes.
            if request.method == "notifications/cancelled" {
                cancel_request(&inflight_ids, request.params.as_ref());
                continue;
            }

            // Each request runs on its own task so dispatches interleave.
            let key = request.id.as_ref().map(id_key);
            in_flight.fetch_add(1, Ordering::SeqCst);
            let guard = RequestGuard {
                in_flight: in_flight.clone(),
                inflight_ids: inflight_ids.clone(),
                key: key.clone(),
            };
            let state = self.state.clone();
            let tx = tx.clone();
            let handle = tokio::spawn(async move {
                let _guard = guard;
                if let Some(response) = handle_request(&state, request).await {
                    let _ = tx.send(response).await;
                }
            });
            if let Some(key) = key {
                inflight_ids
                    .lock()
                    .expect("in-flight map poisoned")
                    .insert(key.clone(), handle.abort_handle());
                // the task may have finished before its handle landed
                if handle.is_finished() {
                    inflight_ids
                        .lock()
                        .expect("in-flight map poisoned")
                        .remove(&key);
                }
            }
        }

        self.drain(&in_flight).await;
        drop(tx);
        let _ = writer.await;
        Ok(())
    }

    /// Wait for in-flight dispatches, up to the configured drain window.
    async fn drain(&self, in_flight: &AtomicU64) {
        let deadline = Duration::from_secs(self.state.config.server.shutdown_drain_secs);
        let waited = tokio::time::timeout(deadline, async {
            while in_flight.load(Ordering::SeqCst) > 0 {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        })
        .await;

        match waited {
            Ok(()) => info!("All in-flight dispatches drained"),
            Err(_) => warn!(
                remaining = in_flight.load(Ordering::SeqCst),
                "Drain deadline exceeded, shutting down anyway"
            ),
        }
    }
}

/// Releases a request's bookkeeping on every exit path, including abort.
struct RequestGuard {
    in_flight: Arc<AtomicU64>,
    inflight_ids: Arc<Mutex<HashMap<String, AbortHandle>>>,
    key: Option<String>,
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        if let Some(key) = &self.key {
            if let Ok(mut ids) = self.inflight_ids.lock() {
                ids.remove(key);
            }
        }
    }
}

/// Abort the in-flight task named by a cancellation notification.
///
/// No response is ever sent for a cancelled request; the abort drops the
/// dispatch future mid-await.
fn cancel_request(inflight_ids: &Mutex<HashMap<String, AbortHandle>>, params: Option<&Value>) {
    let request_id = params.and_then(|p| p.get("requestId").or_else(|| p.get("id")));
    let Some(request_id) = request_id else {
        debug!("Cancellation notification without requestId, ignoring");
        return;
    };

    let key = id_key(request_id);
    let handle = inflight_ids
        .lock()
        .expect("in-flight map poisoned")
        .remove(&key);
    match handle {
        Some(handle) => {
            info!(request_id = %key, "Cancelling in-flight request");
            handle.abort();
        }
        None => debug!(request_id = %key, "Cancellation for unknown or finished request"),
    }
}

/// Stable map key for a JSON-RPC id.
fn id_key(id: &Value) -> String {
    match id {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Handle a single JSON-RPC request.
/// Returns None for notifications (requests without id) per JSON-RPC 2.0.
async fn handle_request(state: &SharedState, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
    let is_notification = request.id.is_none();

    match request.method.as_str() {
        "initialize" => Some(handle_initialize(request.id)),
        "initialized" => {
            debug!("Received initialized notification");
            None
        }
        "ping" => Some(JsonRpcResponse::success(
            request.id,
            Value::Object(Default::default()),
        )),
        "tools/list" => {
            state
                .dispatcher
                .omega()
                .log_transport("stdio", "tools/list", Value::Null)
                .await;
            let tools = state.dispatcher.list_tools();
            Some(JsonRpcResponse::success(
                request.id,
                json!({ "tools": tools }),
            ))
        }
        "tools/call" => Some(handle_tool_call(state, request.id, request.params).await),
        "resources/list" => {
            let resources = state.dispatcher.list_resources().await;
            Some(JsonRpcResponse::success(
                request.id,
                json!({ "resources": resources }),
            ))
        }
        "resources/read" => Some(handle_resource_read(state, request.id, request.params).await),
        "health/check" => {
            let report = state.health_report().await;
            Some(JsonRpcResponse::success(request.id, report))
        }
        method => {
            if is_notification {
                debug!(method = %method, "Unknown notification, ignoring");
                None
            } else {
                error!(method = %method, "Unknown method");
                Some(JsonRpcResponse::error(
                    request.id,
                    -32601,
                    format!("Method not found: {}", method),
                ))
            }
        }
    }
}

fn handle_initialize(id: Option<Value>) -> JsonRpcResponse {
    info!("Handling initialize request");
    JsonRpcResponse::success(
        id,
        json!({
            "protocolVersion": "2024-11-05",
            "capabilities": {
                "tools": { "listChanged": false },
                "resources": { "listChanged": false }
            },
            "serverInfo": {
                "name": "mcp-memory-hub",
                "version": env!("CARGO_PKG_VERSION")
            }
        }),
    )
}

async fn handle_tool_call(
    state: &SharedState,
    id: Option<Value>,
    params: Option<Value>,
) -> JsonRpcResponse {
    let params: ToolCallParams = match params {
        Some(p) => match serde_json::from_value(p) {
            Ok(p) => p,
            Err(e) => {
                return JsonRpcResponse::error(id, -32602, format!("Invalid params: {}", e));
            }
        },
        None => {
            return JsonRpcResponse::error(id, -32602, "Missing params");
        }
    };

    info!(tool = %params.name, server = ?params.server, "Handling tool call");

    let result: ToolCallResult = state
        .dispatcher
        .call_tool(
            params.server.as_deref(),
            &params.name,
            params.arguments.unwrap_or_else(|| json!({})),
        )
        .await;

    match serde_json::to_value(result) {
        Ok(value) => JsonRpcResponse::success(id, value),
        Err(e) => {
            error!(error = %e, "Failed to serialize tool call result");
            JsonRpcResponse::error(id, -32603, format!("Internal error: {}", e))
        }
    }
}

async fn handle_resource_read(
    state: &SharedState,
    id: Option<Value>,
    params: Option<Value>,
) -> JsonRpcResponse {
    let uri = params
        .as_ref()
        .and_then(|p| p.get("uri"))
        .and_then(Value::as_str);
    let Some(uri) = uri else {
        return JsonRpcResponse::error(id, -32602, "Missing uri");
    };

    match state.dispatcher.read_resource(uri).await {
        Ok(contents) => JsonRpcResponse::success(id, json!({ "contents": [contents] })),
        Err(e) => JsonRpcResponse::error(id, -32002, e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jsonrpc_response_success_with_id() {
        let response = JsonRpcResponse::success(Some(json!(1)), json!({"result": "ok"}));

        assert_eq!(response.jsonrpc, "2.0");
        assert_eq!(response.id, json!(1));
        assert!(response.result.is_some());
        assert!(response.error.is_none());
    }

    #[test]
    fn test_jsonrpc_response_success_without_id() {
        let response = JsonRpcResponse::success(None, json!({"data": "value"}));
        assert_eq!(response.id, Value::Null);
    }

    #[test]
    fn test_jsonrpc_response_error() {
        let response = JsonRpcResponse::error(Some(json!(42)), -32601, "Method not found");

        assert_eq!(response.id, json!(42));
        assert!(response.result.is_none());
        let error = response.error.unwrap();
        assert_eq!(error.code, -32601);
        assert_eq!(error.message, "Method not found");
    }

    #[test]
    fn test_jsonrpc_response_serialization_omits_none() {
        let response = JsonRpcResponse::success(Some(json!(1)), json!({"test": true}));
        let serialized = serde_json::to_string(&response).unwrap();

        assert!(serialized.contains("\"jsonrpc\":\"2.0\""));
        assert!(!serialized.contains("\"error\""));

        let response = JsonRpcResponse::error(Some(json!(1)), -32700, "Parse error");
        let serialized = serde_json::to_string(&response).unwrap();
        assert!(!serialized.contains("\"result\""));
    }

    #[test]
    fn test_jsonrpc_request_deserialization() {
        let request: JsonRpcRequest =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":1,"method":"tools/list"}"#).unwrap();
        assert_eq!(request.method, "tools/list");
        assert!(request.params.is_none());

        let request: JsonRpcRequest =
            serde_json::from_str(r#"{"jsonrpc":"2.0","method":"initialized"}"#).unwrap();
        assert!(request.id.is_none());
    }

    #[test]
    fn test_id_key_forms() {
        assert_eq!(id_key(&json!("req-1")), "req-1");
        assert_eq!(id_key(&json!(42)), "42");
    }

    #[tokio::test]
    async fn test_cancel_request_aborts_in_flight_task() {
        let inflight_ids = Mutex::new(HashMap::new());
        let handle = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(60)).await;
        });
        inflight_ids
            .lock()
            .unwrap()
            .insert("req-9".to_string(), handle.abort_handle());

        cancel_request(&inflight_ids, Some(&json!({"requestId": "req-9"})));

        let err = handle.await.unwrap_err();
        assert!(err.is_cancelled());
        assert!(inflight_ids.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_unknown_request_is_harmless() {
        let inflight_ids = Mutex::new(HashMap::new());
        cancel_request(&inflight_ids, Some(&json!({"requestId": "ghost"})));
        cancel_request(&inflight_ids, Some(&json!({})));
        cancel_request(&inflight_ids, None);
    }

    #[tokio::test]
    async fn test_request_guard_releases_on_abort() {
        let in_flight = Arc::new(AtomicU64::new(1));
        let inflight_ids: Arc<Mutex<HashMap<String, AbortHandle>>> =
            Arc::new(Mutex::new(HashMap::new()));

        let guard = RequestGuard {
            in_flight: in_flight.clone(),
            inflight_ids: inflight_ids.clone(),
            key: Some("req-1".to_string()),
        };
        let handle = tokio::spawn(async move {
            let _guard = guard;
            tokio::time::sleep(Duration::from_secs(60)).await;
        });
        inflight_ids
            .lock()
            .unwrap()
            .insert("req-1".to_string(), handle.abort_handle());

        handle.abort();
        let _ = handle.await;

        // the guard ran even though the task was aborted
        assert_eq!(in_flight.load(Ordering::SeqCst), 0);
        assert!(inflight_ids.lock().unwrap().is_empty());
    }

    #[test]
    fn test_tool_call_params_accept_optional_server() {
        let params: ToolCallParams = serde_json::from_str(
            r#"{"server":"graph-memory","name":"create_entity","arguments":{"label":"Person"}}"#,
        )
        .unwrap();
        assert_eq!(params.server.as_deref(), Some("graph-memory"));
        assert_eq!(params.name, "create_entity");

        let params: ToolCallParams =
            serde_json::from_str(r#"{"name":"list_models"}"#).unwrap();
        assert!(params.server.is_none());
        assert!(params.arguments.is_none());
    }
}
