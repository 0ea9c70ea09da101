//! Agent Core error types.

use thiserror::Error;

use crate::inference::ProviderError;
use crate::mcp_client::{ErrorCategory, McpError};

/// Errors that end the chat session. Recoverable tool failures never reach
/// this type; see [`ToolExecutionError`].
#[derive(Debug, Error)]
pub enum SessionError {
    /// Bad server descriptor, config file or provider settings.
    #[error("configuration error: {reason}")]
    Config { reason: String },

    /// The tool server could not be reached or went away.
    #[error("transport error: {reason}")]
    Transport { reason: String },

    /// The tool server or the model broke the conversation protocol.
    #[error("protocol error: {reason}")]
    Protocol { reason: String },

    /// The LLM provider request failed.
    #[error("provider error: {0}")]
    Provider(ProviderError),

    /// The model kept requesting tools past the round limit.
    #[error("model requested tools for {rounds} consecutive rounds without answering")]
    LoopGuard { rounds: usize },

    /// Reading user input or writing the conversation failed.
    #[error("terminal i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl SessionError {
    /// Process exit status for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            SessionError::Config { .. } => 2,
            SessionError::Transport { .. } => 3,
            SessionError::Protocol { .. } => 4,
            SessionError::Provider(_) => 5,
            SessionError::LoopGuard { .. } => 6,
            SessionError::Io(_) => 1,
        }
    }
}

impl From<McpError> for SessionError {
    fn from(e: McpError) -> Self {
        let reason = e.to_string();
        match e.category() {
            ErrorCategory::Transport => SessionError::Transport { reason },
            ErrorCategory::Config => SessionError::Config { reason },
            // A tool-level rejection only escapes the dispatcher during
            // discovery, where it means the server misbehaved.
            ErrorCategory::Protocol | ErrorCategory::Tool => SessionError::Protocol { reason },
        }
    }
}

impl From<ProviderError> for SessionError {
    fn from(e: ProviderError) -> Self {
        match e {
            ProviderError::Config { reason } => SessionError::Config { reason },
            other => SessionError::Provider(other),
        }
    }
}

/// A tool invocation that failed without breaking the session. Rendered
/// into a flagged result so the model can see what went wrong.
#[derive(Debug, Error)]
pub enum ToolExecutionError {
    /// Unknown tool, invalid arguments or a JSON-RPC error reply.
    #[error("{0}")]
    Rejected(McpError),

    /// The server ran the tool and flagged the result as a failure.
    #[error("tool '{tool}' failed: {message}")]
    Reported { tool: String, message: String },

    /// Timeout or crash while the call was in flight.
    #[error("tool '{tool}' was interrupted: {source}")]
    Interrupted {
        tool: String,
        #[source]
        source: McpError,
    },
}

impl ToolExecutionError {
    /// Classify an invoker error. Protocol and config errors are not
    /// recoverable and are handed back unchanged.
    pub fn classify(tool: &str, err: McpError) -> Result<Self, McpError> {
        match err.category() {
            ErrorCategory::Tool => Ok(ToolExecutionError::Rejected(err)),
            ErrorCategory::Transport => Ok(ToolExecutionError::Interrupted {
                tool: tool.to_string(),
                source: err,
            }),
            ErrorCategory::Protocol | ErrorCategory::Config => Err(err),
        }
    }

    /// Whether the tool server connection is gone after this failure.
    pub fn lost_connection(&self) -> bool {
        matches!(self, ToolExecutionError::Interrupted { source, .. } if !matches!(source, McpError::Timeout { .. }))
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
