//! MCP Client error types.

use thiserror::Error;

/// Errors that can occur while talking to a tool server.
#[derive(Debug, Error)]
pub enum McpError {
    /// The server process (or container runtime) failed to start.
    #[error("failed to spawn server '{name}': {reason}")]
    SpawnFailed { name: String, reason: String },

    /// The server process exited or closed its stdout unexpectedly.
    #[error("server '{name}' crashed: {reason}")]
    ServerCrashed { name: String, reason: String },

    /// Low-level I/O failure on the server's stdio.
    #[error("transport error for server '{server}': {reason}")]
    TransportError { server: String, reason: String },

    /// No frame arrived within the receive timeout.
    #[error("server '{server}' did not answer '{operation}' within {timeout_ms}ms")]
    Timeout {
        server: String,
        operation: String,
        timeout_ms: u64,
    },

    /// The transport was already closed (by us or by a crash).
    #[error("server '{name}' is not connected")]
    Disconnected { name: String },

    /// The server answered the handshake with a protocol version we do not speak.
    #[error("server '{name}' speaks protocol '{offered}', supported: {}", supported.join(", "))]
    VersionMismatch {
        name: String,
        offered: String,
        supported: Vec<String>,
    },

    /// The initialization handshake failed for a reason other than version.
    #[error("server '{name}' initialization failed: {reason}")]
    InitFailed { name: String, reason: String },

    /// A frame could not be decoded as a JSON-RPC message.
    #[error("malformed frame from '{server}': {reason}")]
    MalformedFrame { server: String, reason: String },

    /// A response arrived whose id matches no outstanding request.
    #[error("server '{server}' answered request {got}, expected {expected}")]
    UnexpectedResponseId {
        server: String,
        expected: u64,
        got: u64,
    },

    /// Server returned a JSON-RPC error response.
    #[error("server error [{code}]: {message}")]
    ServerError {
        code: i32,
        message: String,
        data: Option<serde_json::Value>,
    },

    /// Tool not found in the capability registry.
    #[error("unknown tool: '{name}'{}", format_suggestions(suggestions))]
    UnknownTool {
        name: String,
        suggestions: Vec<String>,
    },

    /// Tool call arguments failed the structural schema check.
    #[error("invalid arguments for '{tool}': {reason}")]
    InvalidArguments { tool: String, reason: String },

    /// Bad or missing server descriptor / configuration file.
    #[error("config error: {reason}")]
    ConfigError { reason: String },
}

/// Broad classification of an [`McpError`], used by the session to decide
/// whether a failure is fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Spawn failure, broken pipe, crash, timeout.
    Transport,
    /// Handshake/version mismatch, malformed frame, unmatched id.
    Protocol,
    /// The server or registry rejected a specific tool invocation.
    Tool,
    /// Bad descriptor or configuration file.
    Config,
}

impl McpError {
    /// Classify this error into the session-level taxonomy.
    pub fn category(&self) -> ErrorCategory {
        match self {
            McpError::SpawnFailed { .. }
            | McpError::ServerCrashed { .. }
            | McpError::TransportError { .. }
            | McpError::Timeout { .. }
            | McpError::Disconnected { .. } => ErrorCategory::Transport,
            McpError::VersionMismatch { .. }
            | McpError::InitFailed { .. }
            | McpError::MalformedFrame { .. }
            | McpError::UnexpectedResponseId { .. } => ErrorCategory::Protocol,
            McpError::ServerError { .. }
            | McpError::UnknownTool { .. }
            | McpError::InvalidArguments { .. } => ErrorCategory::Tool,
            McpError::ConfigError { .. } => ErrorCategory::Config,
        }
    }

    /// Whether the underlying connection is unusable after this error.
    pub fn is_transport(&self) -> bool {
        self.category() == ErrorCategory::Transport
    }
}

fn format_suggestions(suggestions: &[String]) -> String {
    if suggestions.is_empty() {
        String::new()
    } else {
        format!(" (did you mean: {}?)", suggestions.join(", "))
    }
}
