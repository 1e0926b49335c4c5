//! MCP over stdio: line-delimited JSON-RPC 2.0 session
//!
//! One JSON object per line in each direction. Session states:
//! Uninitialized → Initializing (after `initialize`) → Ready (after
//! `notifications/initialized`) → Closed (EOF or cancellation).

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::registry::ToolRegistry;

pub const JSONRPC_VERSION: &str = "2.0";

/// Protocol revisions this server can speak, oldest first
pub const SUPPORTED_PROTOCOL_VERSIONS: &[&str] = &["2024-11-05", "2025-03-26", "2025-06-18"];

pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;
pub const SERVER_NOT_INITIALIZED: i64 = -32002;

/// Protocol-level error carried in an RPC error reply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{message} ({code})")]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

impl RpcError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(INVALID_REQUEST, message)
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(METHOD_NOT_FOUND, format!("Method not found: {method}"))
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(INVALID_PARAMS, message)
    }

    pub fn not_initialized() -> Self {
        Self::new(SERVER_NOT_INITIALIZED, "Server not initialized")
    }
}

/// Inbound request or notification. `id` is absent for notifications.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcMessage {
    #[serde(default)]
    pub jsonrpc: Option<String>,
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub params: Option<Value>,
}

/// Outbound reply: exactly one of `result` or `error`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl RpcResponse {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Value, error: RpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Initializing,
    Ready,
    Closed,
}

/// What to do with one input line
#[derive(Debug)]
pub enum Action {
    Reply(RpcResponse),
    /// Run a tool call off the read loop; reply when it finishes
    CallTool {
        id: Value,
        name: String,
        arguments: Value,
    },
    Ignore,
}

#[derive(Deserialize)]
struct CallToolParams {
    name: String,
    #[serde(default)]
    arguments: Value,
}

/// One MCP session over a reader/writer pair
pub struct RpcServer {
    registry: Arc<ToolRegistry>,
    state: SessionState,
}

impl RpcServer {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self {
            registry,
            state: SessionState::Uninitialized,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Serve until EOF or cancellation. On EOF, in-flight tool calls are
    /// allowed to finish and their replies are written; on cancellation they
    /// are dropped.
    pub async fn serve<R, W>(
        mut self,
        mut reader: R,
        mut writer: W,
        cancel: CancellationToken,
    ) -> std::io::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut buf = Vec::new();
        let (tx, mut rx) = mpsc::unbounded_channel::<RpcResponse>();
        info!("MCP session started");

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("MCP session cancelled");
                    self.state = SessionState::Closed;
                    return Ok(());
                }
                Some(reply) = rx.recv() => {
                    write_reply(&mut writer, &reply).await?;
                }
                // Partial reads stay in `buf` if another branch wins
                read = reader.read_until(b'\n', &mut buf) => {
                    if read? == 0 {
                        debug!("Input closed");
                        break;
                    }
                    let action = match std::str::from_utf8(&buf) {
                        Ok(line) => self.handle_line(line),
                        Err(e) => {
                            warn!("Dropping line that is not valid UTF-8: {e}");
                            Action::Ignore
                        }
                    };
                    buf.clear();

                    match action {
                        Action::Reply(reply) => write_reply(&mut writer, &reply).await?,
                        Action::CallTool { id, name, arguments } => {
                            let registry = self.registry.clone();
                            let tx = tx.clone();
                            tokio::spawn(async move {
                                let outcome = registry.invoke(&name, arguments).await;
                                // Receiver is gone once the session has closed
                                let _ = tx.send(RpcResponse::success(id, outcome.to_call_result()));
                            });
                        }
                        Action::Ignore => {}
                    }
                }
            }
        }

        // Drain replies for calls still in flight
        drop(tx);
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                reply = rx.recv() => match reply {
                    Some(reply) => write_reply(&mut writer, &reply).await?,
                    None => break,
                },
            }
        }

        self.state = SessionState::Closed;
        info!("MCP session closed");
        Ok(())
    }

    /// Decode one input line and decide how to answer it
    pub fn handle_line(&mut self, line: &str) -> Action {
        if self.state == SessionState::Closed {
            return Action::Ignore;
        }

        let line = line.trim();
        if line.is_empty() {
            return Action::Ignore;
        }

        let value: Value = match serde_json::from_str(line) {
            Ok(value) => value,
            Err(e) => {
                // No id can be recovered from unparseable input
                warn!("Dropping unparseable line: {e}");
                return Action::Ignore;
            }
        };

        let id = value.get("id").filter(|id| !id.is_null()).cloned();
        let message: RpcMessage = match serde_json::from_value(value) {
            Ok(message) => message,
            Err(e) => return reject(id, RpcError::invalid_request(format!("Invalid Request: {e}"))),
        };

        if message.jsonrpc.as_deref() != Some(JSONRPC_VERSION) {
            return reject(id, RpcError::invalid_request("Invalid Request: jsonrpc must be \"2.0\""));
        }

        let Some(method) = message.method.clone() else {
            return reject(id, RpcError::invalid_request("Invalid Request: missing method"));
        };

        match id {
            Some(id) => self.handle_request(id, &method, message.params),
            None => {
                self.handle_notification(&method);
                Action::Ignore
            }
        }
    }

    fn handle_request(&mut self, id: Value, method: &str, params: Option<Value>) -> Action {
        debug!("Request {id}: {method}");

        let result = match method {
            "initialize" => self.initialize(params),
            "ping" => Ok(json!({})),
            _ if self.state != SessionState::Ready => {
                warn!("Rejecting {method} before initialization completed");
                Err(RpcError::not_initialized())
            }
            "tools/list" => Ok(json!({ "tools": self.registry.list_tools() })),
            "tools/call" => {
                return match parse_call_params(params) {
                    Ok(call) => Action::CallTool {
                        id,
                        name: call.name,
                        arguments: call.arguments,
                    },
                    Err(e) => Action::Reply(RpcResponse::error(id, e)),
                };
            }
            _ => Err(RpcError::method_not_found(method)),
        };

        Action::Reply(match result {
            Ok(result) => RpcResponse::success(id, result),
            Err(error) => RpcResponse::error(id, error),
        })
    }

    fn handle_notification(&mut self, method: &str) {
        match method {
            "notifications/initialized" => match self.state {
                SessionState::Initializing => {
                    self.state = SessionState::Ready;
                    info!("MCP session ready");
                }
                state => warn!("Ignoring initialized notification in state {state:?}"),
            },
            _ => debug!("Ignoring notification: {method}"),
        }
    }

    fn initialize(&mut self, params: Option<Value>) -> Result<Value, RpcError> {
        if self.state == SessionState::Ready {
            return Err(RpcError::invalid_request("Server already initialized"));
        }

        let requested = params
            .as_ref()
            .and_then(|p| p.get("protocolVersion"))
            .and_then(Value::as_str);
        let version = negotiate_protocol_version(requested);

        if let Some(client) = params.as_ref().and_then(|p| p.get("clientInfo")) {
            let name = client.get("name").and_then(Value::as_str).unwrap_or("unknown");
            let client_version = client.get("version").and_then(Value::as_str).unwrap_or("");
            info!("Initialize from {name} {client_version} (protocol {version})");
        }

        self.state = SessionState::Initializing;
        Ok(json!({
            "protocolVersion": version,
            "capabilities": {
                "tools": { "listChanged": false }
            },
            "serverInfo": {
                "name": crate::SERVER_NAME,
                "version": crate::SERVER_VERSION,
            }
        }))
    }
}

/// Echo the client's protocol version when supported, else offer the latest
pub fn negotiate_protocol_version(requested: Option<&str>) -> &'static str {
    requested
        .and_then(|v| SUPPORTED_PROTOCOL_VERSIONS.iter().find(|s| **s == v))
        .copied()
        .unwrap_or(SUPPORTED_PROTOCOL_VERSIONS[SUPPORTED_PROTOCOL_VERSIONS.len() - 1])
}

fn parse_call_params(params: Option<Value>) -> Result<CallToolParams, RpcError> {
    let params = params.ok_or_else(|| RpcError::invalid_params("Missing params for tools/call"))?;
    serde_json::from_value(params)
        .map_err(|e| RpcError::invalid_params(format!("Invalid params for tools/call: {e}")))
}

fn reject(id: Option<Value>, error: RpcError) -> Action {
    match id {
        Some(id) => Action::Reply(RpcResponse::error(id, error)),
        None => {
            warn!("Dropping malformed notification: {error}");
            Action::Ignore
        }
    }
}

async fn write_reply<W>(writer: &mut W, reply: &RpcResponse) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut line = match serde_json::to_vec(reply) {
        Ok(line) => line,
        Err(e) => {
            warn!("Failed to serialize reply: {e}");
            serde_json::to_vec(&RpcResponse::error(
                reply.id.clone(),
                RpcError::new(INTERNAL_ERROR, "Internal error"),
            ))?
        }
    };
    line.push(b'\n');
    writer.write_all(&line).await?;
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{HandlerFuture, ToolDescriptor, ToolHandler, ToolOutcome};

    static NOOP: ToolDescriptor = ToolDescriptor {
        name: "noop",
        description: "Does nothing",
        fault_prefix: "Error doing nothing",
        params: &[],
    };

    fn server() -> RpcServer {
        let mut reg = ToolRegistry::new();
        let handler: ToolHandler =
            Arc::new(|_: Value| -> HandlerFuture { Box::pin(async { ToolOutcome::success("ok") }) });
        reg.register_tool(&NOOP, handler).unwrap();
        RpcServer::new(Arc::new(reg))
    }

    fn reply(action: Action) -> RpcResponse {
        match action {
            Action::Reply(reply) => reply,
            other => panic!("expected reply, got {other:?}"),
        }
    }

    fn ready_server() -> RpcServer {
        let mut s = server();
        reply(s.handle_line(r#"{"jsonrpc":"2.0","id":0,"method":"initialize","params":{}}"#));
        assert!(matches!(
            s.handle_line(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#),
            Action::Ignore
        ));
        assert_eq!(s.state(), SessionState::Ready);
        s
    }

    #[test]
    fn test_initialize_returns_server_info() {
        let mut s = server();
        let r = reply(s.handle_line(
            r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{"protocolVersion":"2024-11-05","clientInfo":{"name":"t","version":"1"}}}"#,
        ));
        assert_eq!(r.id, json!(1));
        let result = r.result.unwrap();
        assert_eq!(result["protocolVersion"], "2024-11-05");
        assert_eq!(result["serverInfo"]["name"], "lemon-email");
        assert_eq!(result["serverInfo"]["version"], crate::SERVER_VERSION);
        assert_eq!(result["capabilities"]["tools"]["listChanged"], false);
        assert_eq!(s.state(), SessionState::Initializing);
    }

    #[test]
    fn test_protocol_negotiation() {
        assert_eq!(negotiate_protocol_version(Some("2025-03-26")), "2025-03-26");
        assert_eq!(negotiate_protocol_version(Some("1999-01-01")), "2025-06-18");
        assert_eq!(negotiate_protocol_version(None), "2025-06-18");
    }

    #[test]
    fn test_requests_before_initialize_rejected() {
        let mut s = server();
        let r = reply(s.handle_line(
            r#"{"jsonrpc":"2.0","id":"a","method":"tools/call","params":{"name":"noop"}}"#,
        ));
        assert_eq!(r.id, json!("a"));
        assert_eq!(r.error.unwrap().code, SERVER_NOT_INITIALIZED);
        assert_eq!(s.state(), SessionState::Uninitialized);
    }

    #[test]
    fn test_requests_before_initialized_notification_rejected() {
        let mut s = server();
        reply(s.handle_line(r#"{"jsonrpc":"2.0","id":1,"method":"initialize"}"#));
        let r = reply(s.handle_line(r#"{"jsonrpc":"2.0","id":2,"method":"tools/list"}"#));
        assert_eq!(r.error.unwrap().code, SERVER_NOT_INITIALIZED);
    }

    #[test]
    fn test_ping_allowed_anytime() {
        let mut s = server();
        let r = reply(s.handle_line(r#"{"jsonrpc":"2.0","id":5,"method":"ping"}"#));
        assert_eq!(r.result, Some(json!({})));
    }

    #[test]
    fn test_tools_list() {
        let mut s = ready_server();
        let r = reply(s.handle_line(r#"{"jsonrpc":"2.0","id":3,"method":"tools/list"}"#));
        let tools = r.result.unwrap()["tools"].clone();
        assert_eq!(tools.as_array().unwrap().len(), 1);
        assert_eq!(tools[0]["name"], "noop");
        assert!(tools[0]["inputSchema"].is_object());
    }

    #[test]
    fn test_tools_call_dispatches() {
        let mut s = ready_server();
        match s.handle_line(
            r#"{"jsonrpc":"2.0","id":4,"method":"tools/call","params":{"name":"noop","arguments":{"x":1}}}"#,
        ) {
            Action::CallTool { id, name, arguments } => {
                assert_eq!(id, json!(4));
                assert_eq!(name, "noop");
                assert_eq!(arguments, json!({"x": 1}));
            }
            other => panic!("expected tool call, got {other:?}"),
        }
    }

    #[test]
    fn test_tools_call_without_name_is_invalid_params() {
        let mut s = ready_server();
        let r = reply(s.handle_line(
            r#"{"jsonrpc":"2.0","id":6,"method":"tools/call","params":{"arguments":{}}}"#,
        ));
        assert_eq!(r.error.unwrap().code, INVALID_PARAMS);

        let r = reply(s.handle_line(r#"{"jsonrpc":"2.0","id":7,"method":"tools/call"}"#));
        assert_eq!(r.error.unwrap().code, INVALID_PARAMS);
    }

    #[test]
    fn test_unknown_method() {
        let mut s = ready_server();
        let r = reply(s.handle_line(r#"{"jsonrpc":"2.0","id":8,"method":"resources/list"}"#));
        let err = r.error.unwrap();
        assert_eq!(err.code, METHOD_NOT_FOUND);
        assert!(err.message.contains("resources/list"));
    }

    #[test]
    fn test_second_initialize_rejected() {
        let mut s = ready_server();
        let r = reply(s.handle_line(r#"{"jsonrpc":"2.0","id":9,"method":"initialize"}"#));
        assert_eq!(r.error.unwrap().code, INVALID_REQUEST);
        assert_eq!(s.state(), SessionState::Ready);
    }

    #[test]
    fn test_malformed_input() {
        let mut s = server();
        assert!(matches!(s.handle_line("not json"), Action::Ignore));
        assert!(matches!(s.handle_line("   "), Action::Ignore));
        assert!(matches!(s.handle_line("[1,2]"), Action::Ignore));

        let r = reply(s.handle_line(r#"{"jsonrpc":"2.0","id":10}"#));
        assert_eq!(r.id, json!(10));
        assert_eq!(r.error.unwrap().code, INVALID_REQUEST);

        let r = reply(s.handle_line(r#"{"id":11,"method":"ping"}"#));
        assert_eq!(r.error.unwrap().code, INVALID_REQUEST);

        // Malformed and uncorrelated: dropped
        assert!(matches!(s.handle_line(r#"{"jsonrpc":"2.0"}"#), Action::Ignore));
    }

    #[test]
    fn test_notifications_never_replied() {
        let mut s = ready_server();
        assert!(matches!(
            s.handle_line(r#"{"jsonrpc":"2.0","method":"tools/call","params":{"name":"noop"}}"#),
            Action::Ignore
        ));
        assert!(matches!(
            s.handle_line(r#"{"jsonrpc":"2.0","method":"notifications/cancelled","params":{}}"#),
            Action::Ignore
        ));
    }

    #[test]
    fn test_error_reply_serialization() {
        let r = RpcResponse::error(json!(1), RpcError::not_initialized());
        let v = serde_json::to_value(&r).unwrap();
        assert_eq!(
            v,
            json!({"jsonrpc": "2.0", "id": 1, "error": {"code": -32002, "message": "Server not initialized"}})
        );
    }
}
