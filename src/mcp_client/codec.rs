//! JSON-RPC framing, the MCP handshake and request/response correlation.
//!
//! The codec sits on top of a [`ProcessTransport`] and owns the connection's
//! request id counter. Every request blocks until its own response arrives;
//! frames that show up in between are classified and handled:
//!
//! - server requests are answered (`ping` gets an empty result),
//! - notifications are logged and skipped,
//! - late responses to timed-out requests are discarded,
//! - anything else with an unknown id is a protocol violation.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};

use super::errors::McpError;
use super::transport::ProcessTransport;
use super::types::{
    error_codes, CallToolResult, InitializeResult, JsonRpcError, JsonRpcNotification,
    JsonRpcRequest, JsonRpcResponse, PromptTemplate, ResourceDescriptor, ToolSchema,
    CLIENT_NAME, LATEST_PROTOCOL_VERSION, SUPPORTED_PROTOCOL_VERSIONS,
};

/// Bound on the whole `initialize` exchange.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

/// Notification sent (best effort) before the transport is closed.
const SHUTDOWN_NOTIFICATION: &str = "shutdown";

// ─── Frames ──────────────────────────────────────────────────────────────────

/// A decoded line from the server.
#[derive(Debug, Clone, PartialEq)]
pub enum IncomingFrame {
    /// Reply to one of our requests. `id` is `None` when the server could
    /// not tell which request it was answering.
    Response {
        id: Option<Value>,
        result: Result<Value, JsonRpcError>,
    },
    /// The server asks us something and expects an answer.
    Request {
        id: Value,
        method: String,
        params: Option<Value>,
    },
    /// Fire-and-forget message from the server.
    Notification {
        method: String,
        params: Option<Value>,
    },
}

/// Result of decoding one line.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    Frame(IncomingFrame),
    /// Blank line or non-JSON noise; the reason is only logged.
    Skip(String),
}

/// Serialize one message as a newline-terminated frame.
pub fn encode_frame<T: Serialize>(message: &T) -> serde_json::Result<Vec<u8>> {
    let mut bytes = serde_json::to_vec(message)?;
    bytes.push(b'\n');
    Ok(bytes)
}

/// Classify one incoming line.
///
/// Lines that are not a JSON object are treated as log noise. A JSON object
/// that is neither a request, a response nor a notification is malformed.
pub fn decode_frame(line: &[u8]) -> Result<Decoded, String> {
    let text = String::from_utf8_lossy(line);
    let text = text.trim();
    if text.is_empty() {
        return Ok(Decoded::Skip("blank line".into()));
    }

    let value: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(_) => return Ok(Decoded::Skip(format!("non-JSON output: {}", truncate(text, 200)))),
    };

    let Value::Object(mut obj) = value else {
        return Ok(Decoded::Skip(format!("non-object JSON: {}", truncate(text, 200))));
    };

    let id = obj.remove("id");
    let method = obj
        .get("method")
        .and_then(|m| m.as_str())
        .map(|m| m.to_string());
    let params = obj.remove("params");

    match (id, method) {
        (Some(id), Some(method)) if !id.is_null() => {
            Ok(Decoded::Frame(IncomingFrame::Request { id, method, params }))
        }
        // No id, or an explicit null id.
        (_, Some(method)) => Ok(Decoded::Frame(IncomingFrame::Notification { method, params })),
        (id, None) if obj.contains_key("result") || obj.contains_key("error") => {
            let result = match obj.remove("error") {
                Some(err) => Err(serde_json::from_value::<JsonRpcError>(err)
                    .map_err(|e| format!("invalid error object: {e}"))?),
                None => Ok(obj.remove("result").unwrap_or(Value::Null)),
            };
            let id = id.filter(|v| !v.is_null());
            Ok(Decoded::Frame(IncomingFrame::Response { id, result }))
        }
        _ => Err(format!(
            "message is neither request, response nor notification: {}",
            truncate(text, 200)
        )),
    }
}

/// Interpret a response id as one of our numeric ids.
fn numeric_id(id: &Value) -> Option<u64> {
    match id {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

// ─── ProtocolCodec ───────────────────────────────────────────────────────────

/// JSON-RPC session over one process transport.
pub struct ProtocolCodec {
    transport: ProcessTransport,
    next_id: u64,
    /// Ids of requests that timed out; their late responses are dropped.
    abandoned: HashSet<u64>,
}

impl ProtocolCodec {
    pub fn new(transport: ProcessTransport) -> Self {
        Self {
            transport,
            next_id: 1,
            abandoned: HashSet::new(),
        }
    }

    pub fn server_name(&self) -> &str {
        self.transport.server_name()
    }

    pub fn is_alive(&mut self) -> bool {
        self.transport.is_alive()
    }

    /// Send a request and wait for its response, bounded by the transport's
    /// receive timeout.
    pub async fn request(&mut self, method: &str, params: Option<Value>) -> Result<Value, McpError> {
        let timeout = self.transport.receive_timeout();
        self.request_within(method, params, timeout).await
    }

    /// Send a request and wait at most `timeout` for its response.
    pub async fn request_within(
        &mut self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value, McpError> {
        let id = self.next_id;
        self.next_id += 1;

        let request = JsonRpcRequest::new(id, method, params);
        let frame = encode_frame(&request).map_err(|e| McpError::TransportError {
            server: self.server_name().to_string(),
            reason: format!("failed to serialize request: {e}"),
        })?;

        tracing::debug!(server = %self.server_name(), id, method, "→ request");
        self.transport.send(&frame).await?;

        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let line = match self.transport.receive_within(remaining, method).await {
                Ok(line) => line,
                Err(McpError::Timeout { .. }) => {
                    self.abandoned.insert(id);
                    tracing::warn!(
                        server = %self.server_name(),
                        id,
                        method,
                        timeout_ms = timeout.as_millis() as u64,
                        "request timed out"
                    );
                    return Err(McpError::Timeout {
                        server: self.server_name().to_string(),
                        operation: method.to_string(),
                        timeout_ms: timeout.as_millis() as u64,
                    });
                }
                Err(e) => return Err(e),
            };

            let decoded = decode_frame(&line).map_err(|reason| McpError::MalformedFrame {
                server: self.server_name().to_string(),
                reason,
            })?;

            let frame = match decoded {
                Decoded::Frame(frame) => frame,
                Decoded::Skip(reason) => {
                    tracing::debug!(server = %self.server_name(), reason = %reason, "skipping line");
                    continue;
                }
            };

            match frame {
                IncomingFrame::Response { id: None, result } => {
                    // Only an error can sensibly come back without an id; it
                    // belongs to the request that is in flight.
                    return match result {
                        Err(err) => Err(server_error(err)),
                        Ok(_) => Err(McpError::MalformedFrame {
                            server: self.server_name().to_string(),
                            reason: "response without id".into(),
                        }),
                    };
                }
                IncomingFrame::Response {
                    id: Some(got),
                    result,
                } => match numeric_id(&got) {
                    Some(got) if got == id => {
                        tracing::debug!(server = %self.server_name(), id, ok = result.is_ok(), "← response");
                        return result.map_err(server_error);
                    }
                    Some(got) if self.abandoned.remove(&got) => {
                        tracing::debug!(
                            server = %self.server_name(),
                            id = got,
                            "discarding late response to timed-out request"
                        );
                    }
                    other => {
                        return Err(McpError::UnexpectedResponseId {
                            server: self.server_name().to_string(),
                            expected: id,
                            got: other.unwrap_or(0),
                        });
                    }
                },
                IncomingFrame::Request { id: req_id, method: req_method, .. } => {
                    self.answer_server_request(req_id, &req_method).await?;
                }
                IncomingFrame::Notification { method: note, .. } => {
                    tracing::debug!(server = %self.server_name(), method = %note, "server notification");
                }
            }
        }
    }

    /// Send a notification (no response expected).
    pub async fn notify(&mut self, method: &str, params: Option<Value>) -> Result<(), McpError> {
        let notification = JsonRpcNotification::new(method, params);
        let frame = encode_frame(&notification).map_err(|e| McpError::TransportError {
            server: self.server_name().to_string(),
            reason: format!("failed to serialize notification: {e}"),
        })?;
        tracing::debug!(server = %self.server_name(), method, "→ notification");
        self.transport.send(&frame).await
    }

    async fn answer_server_request(&mut self, id: Value, method: &str) -> Result<(), McpError> {
        let response = if method == "ping" {
            JsonRpcResponse {
                jsonrpc: "2.0".into(),
                id,
                result: Some(json!({})),
                error: None,
            }
        } else {
            tracing::debug!(server = %self.server_name(), method, "declining server request");
            JsonRpcResponse {
                jsonrpc: "2.0".into(),
                id,
                result: None,
                error: Some(JsonRpcError {
                    code: error_codes::METHOD_NOT_FOUND,
                    message: format!("method not supported by client: {method}"),
                    data: None,
                }),
            }
        };

        let frame = encode_frame(&response).map_err(|e| McpError::TransportError {
            server: self.server_name().to_string(),
            reason: format!("failed to serialize response: {e}"),
        })?;
        self.transport.send(&frame).await
    }

    // ─── MCP Operations ──────────────────────────────────────────────────

    /// Run the `initialize` / `notifications/initialized` exchange.
    pub async fn handshake(&mut self) -> Result<InitializeResult, McpError> {
        let params = json!({
            "protocolVersion": LATEST_PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": CLIENT_NAME,
                "version": env!("CARGO_PKG_VERSION"),
            }
        });

        let value = self
            .request_within("initialize", Some(params), HANDSHAKE_TIMEOUT)
            .await
            .map_err(|e| match e {
                McpError::ServerError { code, message, .. } => McpError::InitFailed {
                    name: self.server_name().to_string(),
                    reason: format!("[{code}] {message}"),
                },
                other => other,
            })?;

        let init: InitializeResult =
            serde_json::from_value(value).map_err(|e| McpError::InitFailed {
                name: self.server_name().to_string(),
                reason: format!("invalid initialize result: {e}"),
            })?;

        if !SUPPORTED_PROTOCOL_VERSIONS.contains(&init.protocol_version.as_str()) {
            return Err(McpError::VersionMismatch {
                name: self.server_name().to_string(),
                offered: init.protocol_version,
                supported: SUPPORTED_PROTOCOL_VERSIONS
                    .iter()
                    .map(|v| v.to_string())
                    .collect(),
            });
        }

        self.notify("notifications/initialized", None).await?;

        tracing::info!(
            server = %self.server_name(),
            protocol = %init.protocol_version,
            server_info = ?init.server_info.as_ref().map(|i| &i.name),
            "handshake complete"
        );
        Ok(init)
    }

    pub async fn list_tools(&mut self) -> Result<Vec<ToolSchema>, McpError> {
        self.list_paginated("tools/list", "tools").await
    }

    pub async fn list_prompts(&mut self) -> Result<Vec<PromptTemplate>, McpError> {
        self.list_paginated("prompts/list", "prompts").await
    }

    pub async fn list_resources(&mut self) -> Result<Vec<ResourceDescriptor>, McpError> {
        self.list_paginated("resources/list", "resources").await
    }

    /// Follow `nextCursor` until the listing is exhausted.
    async fn list_paginated<T: DeserializeOwned>(
        &mut self,
        method: &str,
        key: &str,
    ) -> Result<Vec<T>, McpError> {
        let mut items = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let params = cursor.as_ref().map(|c| json!({ "cursor": c }));
            let page = match self.request(method, params).await {
                Ok(page) => page,
                Err(McpError::ServerError { code, .. }) if code == error_codes::METHOD_NOT_FOUND => {
                    tracing::warn!(server = %self.server_name(), method, "listing not supported");
                    return Ok(items);
                }
                Err(e) => return Err(e),
            };

            let entries = page
                .get(key)
                .cloned()
                .unwrap_or_else(|| Value::Array(Vec::new()));
            let batch: Vec<T> =
                serde_json::from_value(entries).map_err(|e| McpError::MalformedFrame {
                    server: self.server_name().to_string(),
                    reason: format!("invalid {method} result: {e}"),
                })?;
            items.extend(batch);

            let next = page
                .get("nextCursor")
                .and_then(|c| c.as_str())
                .filter(|c| !c.is_empty())
                .map(|c| c.to_string());

            match next {
                Some(next) if cursor.as_deref() == Some(next.as_str()) => {
                    tracing::warn!(server = %self.server_name(), method, cursor = %next, "cursor did not advance");
                    break;
                }
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        tracing::debug!(server = %self.server_name(), method, count = items.len(), "listing complete");
        Ok(items)
    }

    /// Invoke `tools/call` and decode the result payload.
    pub async fn call_tool(&mut self, name: &str, arguments: Value) -> Result<CallToolResult, McpError> {
        let params = json!({ "name": name, "arguments": arguments });
        let value = self.request("tools/call", Some(params)).await?;
        serde_json::from_value(value).map_err(|e| McpError::MalformedFrame {
            server: self.server_name().to_string(),
            reason: format!("invalid tools/call result: {e}"),
        })
    }

    /// Best-effort shutdown notification, then close the transport.
    pub async fn close(&mut self) {
        if self.transport.is_alive() {
            if let Err(e) = self.notify(SHUTDOWN_NOTIFICATION, None).await {
                tracing::debug!(server = %self.server_name(), error = %e, "shutdown notification failed");
            }
        }
        self.transport.close().await;
    }
}

fn server_error(err: JsonRpcError) -> McpError {
    McpError::ServerError {
        code: err.code,
        message: err.message,
        data: err.data,
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
