//! Shared types for the MCP client.
//!
//! JSON-RPC 2.0 message types, MCP protocol structures and the immutable
//! server descriptor consumed by the transport.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::errors::McpError;

// ─── Protocol Constants ──────────────────────────────────────────────────────

/// Protocol version the client offers in `initialize`.
pub const LATEST_PROTOCOL_VERSION: &str = "2025-06-18";

/// Every protocol version the client accepts in the server's reply.
pub const SUPPORTED_PROTOCOL_VERSIONS: &[&str] = &["2024-11-05", "2025-03-26", "2025-06-18"];

/// Client identity sent during the handshake.
pub const CLIENT_NAME: &str = "mcp-chat";

// ─── JSON-RPC 2.0 ───────────────────────────────────────────────────────────

/// JSON-RPC 2.0 request message.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl JsonRpcRequest {
    /// Create a new JSON-RPC request.
    pub fn new(id: u64, method: &str, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            method: method.to_string(),
            params,
        }
    }
}

/// JSON-RPC 2.0 notification (a request without an id).
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl JsonRpcNotification {
    pub fn new(method: &str, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            method: method.to_string(),
            params,
        }
    }
}

/// JSON-RPC 2.0 response message (success or error).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

// ─── MCP Protocol Types ──────────────────────────────────────────────────────

/// A callable tool as advertised by `tools/list`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// JSON Schema of the tool's arguments.
    #[serde(default, rename = "inputSchema", alias = "input_schema")]
    pub input_schema: serde_json::Value,
}

impl ToolSchema {
    /// Description, or the placeholder shown to users and models when the
    /// server did not provide one.
    pub fn description_or_default(&self) -> &str {
        self.description
            .as_deref()
            .filter(|d| !d.is_empty())
            .unwrap_or("No description")
    }
}

/// A prompt template as advertised by `prompts/list`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptTemplate {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub arguments: Vec<PromptArgument>,
}

/// A single argument of a prompt template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptArgument {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub required: bool,
}

/// A readable resource as advertised by `resources/list`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    pub uri: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, rename = "mimeType")]
    pub mime_type: Option<String>,
}

/// `initialize` response payload.
#[derive(Debug, Clone, Deserialize)]
pub struct InitializeResult {
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
    #[serde(default)]
    pub capabilities: ServerCapabilities,
    #[serde(default, rename = "serverInfo")]
    pub server_info: Option<ServerInfo>,
    #[serde(default)]
    pub instructions: Option<String>,
}

/// Capability summary from the handshake. Presence of a key means the
/// server supports the matching listing call.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerCapabilities {
    #[serde(default)]
    pub tools: Option<serde_json::Value>,
    #[serde(default)]
    pub prompts: Option<serde_json::Value>,
    #[serde(default)]
    pub resources: Option<serde_json::Value>,
}

/// Server identity returned in the initialize response.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerInfo {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
}

/// `tools/call` response payload.
#[derive(Debug, Clone, Deserialize)]
pub struct CallToolResult {
    #[serde(default)]
    pub content: Vec<ContentItem>,
    #[serde(default, rename = "isError")]
    pub is_error: bool,
    #[serde(default, rename = "structuredContent")]
    pub structured_content: Option<serde_json::Value>,
}

/// One element of a tool result's `content` array.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentItem {
    Text {
        text: String,
    },
    Image {
        #[serde(default, rename = "mimeType")]
        mime_type: String,
    },
    Audio {
        #[serde(default, rename = "mimeType")]
        mime_type: String,
    },
    Resource {
        resource: serde_json::Value,
    },
    ResourceLink {
        uri: String,
    },
    #[serde(other)]
    Unknown,
}

impl CallToolResult {
    /// Flatten the result into the text handed back to the model.
    pub fn text(&self) -> String {
        if self.content.is_empty() {
            return self
                .structured_content
                .as_ref()
                .map(|v| v.to_string())
                .unwrap_or_default();
        }

        self.content
            .iter()
            .map(|item| match item {
                ContentItem::Text { text } => text.clone(),
                ContentItem::Image { mime_type } => format!("[image: {mime_type}]"),
                ContentItem::Audio { mime_type } => format!("[audio: {mime_type}]"),
                ContentItem::Resource { resource } => {
                    if let Some(text) = resource.get("text").and_then(|t| t.as_str()) {
                        text.to_string()
                    } else {
                        let uri = resource
                            .get("uri")
                            .and_then(|u| u.as_str())
                            .unwrap_or("<unknown>");
                        format!("[resource: {uri}]")
                    }
                }
                ContentItem::ResourceLink { uri } => format!("[resource: {uri}]"),
                ContentItem::Unknown => "[unsupported content]".to_string(),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Outcome of a single tool invocation as seen by the dispatcher.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    pub text: String,
    /// The server flagged the result as a tool-level failure.
    pub is_error: bool,
}

// ─── Server Descriptor ───────────────────────────────────────────────────────

/// How the tool server process is started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportKind {
    /// Spawn `command` directly.
    Script { command: String },
    /// Spawn `<runtime> run -i --rm … <image>`.
    Container { runtime: String, image: String },
}

/// A host path or named volume made visible inside a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountSpec {
    /// Host path or volume name.
    pub source: String,
    /// Path inside the container.
    pub target: String,
    #[serde(default)]
    pub read_only: bool,
}

impl MountSpec {
    /// Render as a `-v` argument value: `source:target[:ro]`.
    pub fn to_volume_arg(&self) -> String {
        if self.read_only {
            format!("{}:{}:ro", self.source, self.target)
        } else {
            format!("{}:{}", self.source, self.target)
        }
    }
}

/// Immutable description of one tool server, built once by the config
/// loader and never re-read during a session.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerDescriptor {
    pub name: String,
    pub description: String,
    pub kind: TransportKind,
    /// Script: arguments after the command. Container: arguments after the image.
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    /// Only meaningful for containers.
    pub mounts: Vec<MountSpec>,
    pub cwd: Option<PathBuf>,
}

impl ServerDescriptor {
    /// Descriptor for a locally executed command.
    pub fn script(name: &str, command: &str, args: Vec<String>) -> Self {
        Self {
            name: name.to_string(),
            description: String::new(),
            kind: TransportKind::Script {
                command: command.to_string(),
            },
            args,
            env: BTreeMap::new(),
            mounts: Vec::new(),
            cwd: None,
        }
    }

    /// Descriptor for a containerized server.
    pub fn container(name: &str, runtime: &str, image: &str) -> Self {
        Self {
            name: name.to_string(),
            description: String::new(),
            kind: TransportKind::Container {
                runtime: runtime.to_string(),
                image: image.to_string(),
            },
            args: Vec::new(),
            env: BTreeMap::new(),
            mounts: Vec::new(),
            cwd: None,
        }
    }

    /// Whether this server runs inside a container runtime.
    pub fn is_container(&self) -> bool {
        matches!(self.kind, TransportKind::Container { .. })
    }

    /// Container image, if any.
    pub fn image(&self) -> Option<&str> {
        match &self.kind {
            TransportKind::Container { image, .. } => Some(image),
            TransportKind::Script { .. } => None,
        }
    }

    /// Check the descriptor once, before anything is spawned.
    pub fn validate(&self) -> Result<(), McpError> {
        let fail = |reason: String| Err(McpError::ConfigError { reason });

        if self.name.trim().is_empty() {
            return fail("server name must not be empty".into());
        }

        match &self.kind {
            TransportKind::Script { command } if command.trim().is_empty() => {
                return fail(format!("server '{}': command must not be empty", self.name));
            }
            TransportKind::Container { runtime, .. } if runtime.trim().is_empty() => {
                return fail(format!("server '{}': container runtime must not be empty", self.name));
            }
            TransportKind::Container { image, .. } if image.trim().is_empty() => {
                return fail(format!("server '{}': container image must not be empty", self.name));
            }
            _ => {}
        }

        for mount in &self.mounts {
            if mount.source.trim().is_empty() || mount.target.trim().is_empty() {
                return fail(format!(
                    "server '{}': mount needs both source and target (got '{}' -> '{}')",
                    self.name, mount.source, mount.target
                ));
            }
        }

        if let Some(key) = self.env.keys().find(|k| k.is_empty() || k.contains('=')) {
            return fail(format!("server '{}': invalid environment variable name '{key}'", self.name));
        }

        Ok(())
    }
}

// ─── Standard MCP Error Codes ────────────────────────────────────────────────

/// Well-known JSON-RPC error codes.
pub mod error_codes {
    /// Invalid JSON was received.
    pub const PARSE_ERROR: i32 = -32700;
    /// The JSON sent is not a valid Request object.
    pub const INVALID_REQUEST: i32 = -32600;
    /// The method does not exist or is not available.
    pub const METHOD_NOT_FOUND: i32 = -32601;
    /// Invalid method parameters.
    pub const INVALID_PARAMS: i32 = -32602;
    /// Internal JSON-RPC error.
    pub const INTERNAL_ERROR: i32 = -32603;
}

// ─── Tests ───────────────────────────────────────────────────────────────────
