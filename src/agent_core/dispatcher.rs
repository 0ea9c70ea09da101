//! Tool dispatcher: runs the model's tool calls against the tool server.
//!
//! Calls in a batch execute sequentially in the order the provider returned
//! them. Failures the model can react to (unknown tool, bad arguments, a
//! server-side error, timeout, crash) become flagged results; protocol
//! violations abort the turn. Nothing is retried.

use std::collections::HashSet;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::Value;

use super::errors::{SessionError, ToolExecutionError};
use super::types::{ToolCallRequest, ToolCallResult};
use crate::mcp_client::errors::McpError;
use crate::mcp_client::types::{ToolOutput, ToolSchema};

// ─── ToolInvoker ─────────────────────────────────────────────────────────────

/// Something that can execute named tools. Implemented by `McpClient`.
#[async_trait]
pub trait ToolInvoker: Send {
    /// Tools to advertise to the model.
    fn tools(&self) -> Vec<ToolSchema>;

    /// Fails if the connection is already gone.
    async fn ensure_connected(&mut self) -> Result<(), McpError>;

    async fn invoke(&mut self, name: &str, arguments: Value) -> Result<ToolOutput, McpError>;

    async fn close(&mut self);
}

// ─── Dispatch ────────────────────────────────────────────────────────────────

/// Results of one batch, in request order, plus one transcript line per call.
#[derive(Debug, Clone, Default)]
pub struct DispatchReport {
    pub results: Vec<ToolCallResult>,
    pub transcript: Vec<String>,
}

/// Execute a batch of tool calls.
pub async fn dispatch<I>(invoker: &mut I, calls: &[ToolCallRequest]) -> Result<DispatchReport, SessionError>
where
    I: ToolInvoker + ?Sized,
{
    // Reject ambiguous ids before any tool has side effects.
    unique_request_ids(calls)?;
    invoker.ensure_connected().await?;

    let mut report = DispatchReport::default();
    for call in calls {
        let start = Instant::now();
        tracing::info!(tool = %call.name, call_id = %call.id, "dispatching tool call");

        let outcome = match invoker.invoke(&call.name, call.arguments.clone()).await {
            Ok(output) if output.is_error => Err(ToolExecutionError::Reported {
                tool: call.name.clone(),
                message: output.text,
            }),
            Ok(output) => Ok(output.text),
            Err(e) => match ToolExecutionError::classify(&call.name, e) {
                Ok(failure) => Err(failure),
                Err(fatal) => {
                    tracing::error!(tool = %call.name, error = %fatal, "protocol failure during tool call");
                    return Err(fatal.into());
                }
            },
        };

        let elapsed_ms = start.elapsed().as_millis() as u64;
        match outcome {
            Ok(content) => {
                tracing::info!(tool = %call.name, elapsed_ms, result_len = content.len(), "tool call succeeded");
                report.transcript.push(format!("[Used {}({})]", call.name, call.arguments));
                report.results.push(ToolCallResult {
                    id: call.id.clone(),
                    content,
                    is_error: false,
                });
            }
            Err(failure) => {
                tracing::warn!(
                    tool = %call.name,
                    elapsed_ms,
                    lost_connection = failure.lost_connection(),
                    error = %failure,
                    "tool call failed"
                );
                let content = format!("Error: {failure}");
                report.transcript.push(format!("[{content}]"));
                report.results.push(ToolCallResult {
                    id: call.id.clone(),
                    content,
                    is_error: true,
                });
            }
        }
    }

    correlate(calls, &report.results)?;
    Ok(report)
}

/// Every result must answer exactly one request of the round, and every
/// request must be answered once.
pub fn correlate(requests: &[ToolCallRequest], results: &[ToolCallResult]) -> Result<(), SessionError> {
    let requested = unique_request_ids(requests)?;

    let mut answered = HashSet::new();
    for result in results {
        if !requested.contains(result.id.as_str()) {
            return Err(SessionError::Protocol {
                reason: format!("tool result '{}' matches no request", result.id),
            });
        }
        if !answered.insert(result.id.as_str()) {
            return Err(SessionError::Protocol {
                reason: format!("tool call '{}' answered twice", result.id),
            });
        }
    }

    if let Some(missing) = requests.iter().find(|r| !answered.contains(r.id.as_str())) {
        return Err(SessionError::Protocol {
            reason: format!("tool call '{}' has no result", missing.id),
        });
    }
    Ok(())
}

fn unique_request_ids(requests: &[ToolCallRequest]) -> Result<HashSet<&str>, SessionError> {
    let mut ids = HashSet::new();
    for req in requests {
        if !ids.insert(req.id.as_str()) {
            return Err(SessionError::Protocol {
                reason: format!("duplicate tool call id '{}'", req.id),
            });
        }
    }
    Ok(ids)
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_core::test_support::{call, result, StubInvoker, StubReply};
    use serde_json::json;

    #[tokio::test]
    async fn test_dispatch_in_order() {
        let mut invoker = StubInvoker::new(vec![
            StubReply::text("first"),
            StubReply::text("second"),
        ]);
        let calls = vec![
            call("a", "fetch", json!({"url": "https://a"})),
            call("b", "fetch", json!({"url": "https://b"})),
        ];

        let report = dispatch(&mut invoker, &calls).await.unwrap();
        assert_eq!(report.results[0], result("a", "first", false));
        assert_eq!(report.results[1], result("b", "second", false));
        assert_eq!(report.transcript[0], r#"[Used fetch({"url":"https://a"})]"#);
        assert_eq!(invoker.invoked, vec!["fetch", "fetch"]);
    }

    #[tokio::test]
    async fn test_recoverable_failures_are_flagged() {
        let mut invoker = StubInvoker::new(vec![
            StubReply::Fail(McpError::UnknownTool {
                name: "fetc".into(),
                suggestions: vec!["fetch".into()],
            }),
            StubReply::Output(ToolOutput {
                text: "404 Not Found".into(),
                is_error: true,
            }),
            StubReply::Fail(McpError::ServerCrashed {
                name: "fetch".into(),
                reason: "exit status: 137".into(),
            }),
        ]);
        let calls = vec![
            call("a", "fetc", json!({})),
            call("b", "fetch", json!({"url": "https://gone"})),
            call("c", "fetch", json!({"url": "https://x"})),
        ];

        let report = dispatch(&mut invoker, &calls).await.unwrap();
        assert!(report.results.iter().all(|r| r.is_error));
        assert!(report.results[0].content.starts_with("Error: unknown tool: 'fetc'"));
        assert!(report.results[1].content.contains("404 Not Found"));
        assert!(report.results[2].content.contains("interrupted"));
        assert!(report.transcript.iter().all(|l| l.starts_with("[Error: ")));
    }

    #[tokio::test]
    async fn test_protocol_error_is_fatal() {
        let mut invoker = StubInvoker::new(vec![StubReply::Fail(McpError::MalformedFrame {
            server: "fetch".into(),
            reason: "expected value".into(),
        })]);
        let err = dispatch(&mut invoker, &[call("a", "fetch", json!({}))])
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Protocol { .. }));
    }

    #[tokio::test]
    async fn test_disconnected_before_batch_is_fatal() {
        let mut invoker = StubInvoker::new(vec![StubReply::text("unused")]);
        invoker.connected = false;

        let err = dispatch(&mut invoker, &[call("a", "fetch", json!({}))])
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Transport { .. }));
        assert!(invoker.invoked.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_ids_rejected_before_any_call() {
        let mut invoker = StubInvoker::new(vec![]);
        let calls = vec![
            call("dup", "fetch", json!({"url": "https://a"})),
            call("dup", "fetch", json!({"url": "https://b"})),
        ];

        let err = dispatch(&mut invoker, &calls).await.unwrap_err();
        assert!(matches!(err, SessionError::Protocol { .. }));
        assert!(invoker.invoked.is_empty());
    }

    #[test]
    fn test_correlate() {
        let requests = vec![call("a", "fetch", json!({})), call("b", "fetch", json!({}))];

        assert!(correlate(&requests, &[result("a", "", false), result("b", "", true)]).is_ok());
        assert!(correlate(&requests, &[result("a", "", false)]).is_err());
        assert!(correlate(&requests, &[result("a", "", false), result("a", "", false)]).is_err());
        assert!(correlate(&requests, &[result("a", "", false), result("z", "", false)]).is_err());

        let duplicated = vec![call("a", "fetch", json!({})), call("a", "fetch", json!({}))];
        assert!(correlate(&duplicated, &[]).is_err());
    }
}
