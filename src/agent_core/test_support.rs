//! Scripted query handler and tool invoker for session and dispatcher tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::dispatcher::ToolInvoker;
use super::types::{Message, ToolCallRequest, ToolCallResult};
use crate::inference::{Outcome, ProviderError, ProviderKind, QueryHandler};
use crate::mcp_client::errors::McpError;
use crate::mcp_client::types::{ToolOutput, ToolSchema};

pub fn call(id: &str, name: &str, arguments: Value) -> ToolCallRequest {
    ToolCallRequest {
        id: id.into(),
        name: name.into(),
        arguments,
    }
}

pub fn result(id: &str, content: &str, is_error: bool) -> ToolCallResult {
    ToolCallResult {
        id: id.into(),
        content: content.into(),
        is_error,
    }
}

pub fn fetch_schema() -> ToolSchema {
    ToolSchema {
        name: "fetch".into(),
        description: Some("Fetch a URL".into()),
        input_schema: json!({
            "type": "object",
            "properties": {"url": {"type": "string"}},
            "required": ["url"]
        }),
    }
}

// ─── StubHandler ─────────────────────────────────────────────────────────────

/// Replays queued outcomes, then falls back to a fixed one if set.
pub struct StubHandler {
    queue: Mutex<VecDeque<Result<Outcome, ProviderError>>>,
    fallback: Option<Outcome>,
    /// History length seen by each `respond` call.
    pub seen: Mutex<Vec<usize>>,
}

impl StubHandler {
    pub fn new(script: Vec<Result<Outcome, ProviderError>>) -> Self {
        Self {
            queue: Mutex::new(script.into()),
            fallback: None,
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn always(outcome: Outcome) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            fallback: Some(outcome),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn respond_count(&self) -> usize {
        self.seen.lock().unwrap().len()
    }
}

#[async_trait]
impl QueryHandler for StubHandler {
    fn provider(&self) -> ProviderKind {
        ProviderKind::Ollama
    }

    fn model(&self) -> &str {
        "stub"
    }

    async fn respond(&self, history: &[Message], _tools: &[ToolSchema]) -> Result<Outcome, ProviderError> {
        self.seen.lock().unwrap().push(history.len());
        if let Some(next) = self.queue.lock().unwrap().pop_front() {
            return next;
        }
        Ok(self
            .fallback
            .clone()
            .unwrap_or_else(|| panic!("stub handler ran out of outcomes")))
    }
}

// ─── StubInvoker ─────────────────────────────────────────────────────────────

pub enum StubReply {
    Output(ToolOutput),
    Fail(McpError),
}

impl StubReply {
    pub fn text(text: &str) -> Self {
        StubReply::Output(ToolOutput {
            text: text.into(),
            is_error: false,
        })
    }
}

/// Replays queued replies; answers "ok" once the queue is empty. A crash
/// reply marks the invoker disconnected, like a real server would be.
pub struct StubInvoker {
    replies: VecDeque<StubReply>,
    pub connected: bool,
    pub closed: bool,
    pub invoked: Vec<String>,
}

impl StubInvoker {
    pub fn new(replies: Vec<StubReply>) -> Self {
        Self {
            replies: replies.into(),
            connected: true,
            closed: false,
            invoked: Vec::new(),
        }
    }
}

#[async_trait]
impl ToolInvoker for StubInvoker {
    fn tools(&self) -> Vec<ToolSchema> {
        vec![fetch_schema()]
    }

    async fn ensure_connected(&mut self) -> Result<(), McpError> {
        if self.connected {
            Ok(())
        } else {
            Err(McpError::Disconnected { name: "stub".into() })
        }
    }

    async fn invoke(&mut self, name: &str, _arguments: Value) -> Result<ToolOutput, McpError> {
        if !self.connected {
            return Err(McpError::Disconnected { name: "stub".into() });
        }
        self.invoked.push(name.to_string());
        match self.replies.pop_front() {
            Some(StubReply::Output(out)) => Ok(out),
            Some(StubReply::Fail(err)) => {
                if matches!(err, McpError::ServerCrashed { .. }) {
                    self.connected = false;
                }
                Err(err)
            }
            None => Ok(ToolOutput {
                text: "ok".into(),
                is_error: false,
            }),
        }
    }

    async fn close(&mut self) {
        self.connected = false;
        self.closed = true;
    }
}
