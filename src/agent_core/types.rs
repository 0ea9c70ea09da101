//! Shared types for the agent core.
//!
//! Conversation messages and the tool call request/result pair that flows
//! between the query handler, the dispatcher and the session history.

use serde::{Deserialize, Serialize};

// ─── Conversation Messages ──────────────────────────────────────────────────

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    Tool,
}

/// Body of a message.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageContent {
    /// Plain text from the user or a final assistant answer.
    Text(String),
    /// Assistant turn that requests tool invocations, optionally with text.
    ToolCalls {
        text: Option<String>,
        calls: Vec<ToolCallRequest>,
    },
    /// Result of one tool invocation, correlated by id.
    ToolResult(ToolCallResult),
}

/// A single entry in the append-only conversation history.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: MessageContent::Text(text.into()),
        }
    }

    /// Assistant message carrying tool calls. Empty text is stored as `None`.
    pub fn assistant_tool_calls(text: Option<String>, calls: Vec<ToolCallRequest>) -> Self {
        Self {
            role: Role::Assistant,
            content: MessageContent::ToolCalls {
                text: text.filter(|t| !t.is_empty()),
                calls,
            },
        }
    }

    pub fn tool_result(result: ToolCallResult) -> Self {
        Self {
            role: Role::Tool,
            content: MessageContent::ToolResult(result),
        }
    }

    /// Text portion of the message, if any.
    pub fn text(&self) -> Option<&str> {
        match &self.content {
            MessageContent::Text(text) => Some(text),
            MessageContent::ToolCalls { text, .. } => text.as_deref(),
            MessageContent::ToolResult(result) => Some(&result.content),
        }
    }

    /// For tool messages, the id of the call this result answers.
    pub fn correlation_id(&self) -> Option<&str> {
        match &self.content {
            MessageContent::ToolResult(result) => Some(&result.id),
            _ => None,
        }
    }

    /// Tool calls requested by this message (empty for other kinds).
    pub fn tool_calls(&self) -> &[ToolCallRequest] {
        match &self.content {
            MessageContent::ToolCalls { calls, .. } => calls,
            _ => &[],
        }
    }
}

// ─── Tool Calls ─────────────────────────────────────────────────────────────

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    /// Unique within one round.
    pub id: String,
    pub name: String,
    /// Argument object as produced by the model.
    pub arguments: serde_json::Value,
}

/// Outcome of one tool invocation as recorded in history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallResult {
    /// Id of the request this result answers.
    pub id: String,
    pub content: String,
    pub is_error: bool,
}

// ─── Tests ───────────────────────────────────────────────────────────────────
