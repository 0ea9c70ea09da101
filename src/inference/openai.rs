//! OpenAI Chat Completions handler.
//!
//! Requests are streamed (`stream: true`) and the SSE body is buffered into a
//! single [`Outcome`]: text deltas are concatenated and tool call fragments
//! are merged by index. A server that answers with plain JSON instead of an
//! event stream is handled too.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client as HttpClient;
use uuid::Uuid;

use super::config::{ProviderConfig, ProviderKind};
use super::errors::ProviderError;
use super::handler::{Outcome, QueryHandler, MAX_TOKENS};
use super::schema::{adapt_tools, OpenAiSchemaAdapter};
use super::types::{
    ChatCompletionChunk, ChatCompletionRequest, ChatCompletionResponse, ChatMessage,
    FunctionCallResponse, ToolCallResponse, WireRole,
};
use crate::agent_core::types::{Message, MessageContent, ToolCallRequest};
use crate::mcp_client::types::ToolSchema;

// ─── Constants ───────────────────────────────────────────────────────────────

/// TCP connection timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Total request timeout, including reading the whole stream.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(180);

// ─── OpenAiHandler ───────────────────────────────────────────────────────────

/// Query handler for the hosted OpenAI API (or any compatible endpoint).
pub struct OpenAiHandler {
    http: HttpClient,
    config: ProviderConfig,
}

impl OpenAiHandler {
    pub fn new(config: ProviderConfig) -> Result<Self, ProviderError> {
        if config.api_key.is_none() {
            return Err(ProviderError::Config {
                reason: "OpenAI provider requires an API key".into(),
            });
        }

        let http = HttpClient::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ProviderError::ConnectionFailed {
                endpoint: config.base_url.clone(),
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self { http, config })
    }

    async fn read_outcome(&self, response: reqwest::Response, url: &str) -> Result<Outcome, ProviderError> {
        let is_json = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|ct| ct.starts_with("application/json"))
            .unwrap_or(false);

        if is_json {
            let text = response
                .text()
                .await
                .map_err(|e| ProviderError::from_reqwest(e, url, REQUEST_TIMEOUT.as_secs()))?;
            return parse_non_streaming_response(&text);
        }

        let mut accumulator = SseAccumulator::default();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let bytes = chunk.map_err(|e| match e {
                e if e.is_timeout() => ProviderError::Timeout {
                    duration_secs: REQUEST_TIMEOUT.as_secs(),
                },
                e => ProviderError::StreamError {
                    reason: format!("stream read error: {e}"),
                },
            })?;
            accumulator.push_bytes(&bytes)?;
            if accumulator.is_done() {
                break;
            }
        }
        accumulator.finish()
    }
}

#[async_trait]
impl QueryHandler for OpenAiHandler {
    fn provider(&self) -> ProviderKind {
        ProviderKind::OpenAi
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    async fn respond(&self, history: &[Message], tools: &[ToolSchema]) -> Result<Outcome, ProviderError> {
        let specs = adapt_tools(&OpenAiSchemaAdapter, ProviderKind::OpenAi, tools)?;
        let tools = if specs.is_empty() {
            None
        } else {
            Some(specs.iter().map(|s| s.to_definition()).collect::<Vec<_>>())
        };

        let body = ChatCompletionRequest {
            model: self.config.model.clone(),
            messages: build_messages(history),
            tool_choice: tools.as_ref().map(|_| "auto".to_string()),
            tools,
            max_tokens: MAX_TOKENS,
            stream: true,
        };
        let url = format!("{}/chat/completions", self.config.base_url);

        // Log the request metadata (not the full body, it can be huge)
        tracing::info!(
            url = %url,
            model = %body.model,
            message_count = body.messages.len(),
            tool_count = body.tools.as_ref().map(|t| t.len()).unwrap_or(0),
            max_tokens = body.max_tokens,
            stream = body.stream,
            "=== LLM REQUEST ==="
        );

        let mut request = self
            .http
            .post(&url)
            .json(&body)
            .header(reqwest::header::ACCEPT, "text/event-stream");
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ProviderError::from_reqwest(e, &url, REQUEST_TIMEOUT.as_secs()))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            tracing::warn!(status = status.as_u16(), body = %body_text, "provider returned error");
            return Err(ProviderError::from_status(status.as_u16(), body_text));
        }

        let outcome = self.read_outcome(response, &url).await?;
        tracing::info!(
            final_answer = matches!(outcome, Outcome::FinalAnswer(_)),
            tool_calls = match &outcome {
                Outcome::ToolCalls { calls, .. } => calls.len(),
                Outcome::FinalAnswer(_) => 0,
            },
            "=== LLM RESPONSE ==="
        );
        Ok(outcome)
    }
}

// ─── Message Conversion ──────────────────────────────────────────────────────

/// Convert session history into Chat Completions messages.
pub fn build_messages(history: &[Message]) -> Vec<ChatMessage> {
    history
        .iter()
        .map(|msg| match &msg.content {
            MessageContent::Text(text) => ChatMessage {
                role: msg.role.into(),
                content: Some(text.clone()),
                tool_call_id: None,
                tool_calls: None,
            },
            MessageContent::ToolCalls { text, calls } => ChatMessage {
                role: WireRole::Assistant,
                content: text.clone(),
                tool_call_id: None,
                tool_calls: Some(
                    calls
                        .iter()
                        .map(|call| ToolCallResponse {
                            id: call.id.clone(),
                            r#type: "function".to_string(),
                            function: FunctionCallResponse {
                                name: call.name.clone(),
                                arguments: call.arguments.to_string(),
                            },
                        })
                        .collect(),
                ),
            },
            MessageContent::ToolResult(result) => ChatMessage {
                role: WireRole::Tool,
                content: Some(result.content.clone()),
                tool_call_id: Some(result.id.clone()),
                tool_calls: None,
            },
        })
        .collect()
}

// ─── SSE Accumulation ────────────────────────────────────────────────────────

/// In-progress tool call: fragments are appended until the stream ends.
#[derive(Debug, Default)]
struct PendingToolCall {
    index: u32,
    id: Option<String>,
    name: String,
    arguments: String,
}

/// Buffers an SSE body into one outcome.
#[derive(Debug, Default)]
pub struct SseAccumulator {
    /// Raw bytes not yet terminated by a blank line.
    buffer: Vec<u8>,
    text: String,
    pending: Vec<PendingToolCall>,
    /// `[DONE]` was received.
    done: bool,
    /// At least one choice reported a finish reason.
    finished: bool,
}

impl SseAccumulator {
    /// Feed raw body bytes. Events may be split across calls arbitrarily.
    pub fn push_bytes(&mut self, bytes: &[u8]) -> Result<(), ProviderError> {
        self.buffer.extend_from_slice(bytes);

        while let Some((end, sep_len)) = find_event_boundary(&self.buffer) {
            let event: Vec<u8> = self.buffer.drain(..end + sep_len).take(end).collect();
            let event = String::from_utf8_lossy(&event).into_owned();
            self.process_event(&event)?;
            if self.done {
                break;
            }
        }
        Ok(())
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Process a single SSE event (may contain multiple `data:` lines).
    fn process_event(&mut self, event: &str) -> Result<(), ProviderError> {
        let mut data_content = String::new();

        for line in event.lines() {
            if let Some(data) = line.strip_prefix("data:") {
                let data = data.trim();
                if data == "[DONE]" {
                    self.done = true;
                    return Ok(());
                }
                data_content.push_str(data);
            }
            // Comments, event names and ids are ignored.
        }

        if data_content.is_empty() {
            return Ok(()); // Keep-alive or comment
        }

        let value: serde_json::Value =
            serde_json::from_str(&data_content).map_err(|e| ProviderError::StreamError {
                reason: format!("failed to parse SSE chunk: {e} (data: {data_content})"),
            })?;

        if let Some(error) = value.get("error") {
            let message = error
                .get("message")
                .and_then(|m| m.as_str())
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string());
            return Err(ProviderError::StreamError {
                reason: format!("provider reported an error mid-stream: {message}"),
            });
        }

        let chunk: ChatCompletionChunk =
            serde_json::from_value(value).map_err(|e| ProviderError::StreamError {
                reason: format!("unexpected SSE chunk shape: {e}"),
            })?;

        for choice in chunk.choices {
            if let Some(content) = choice.delta.content {
                self.text.push_str(&content);
            }

            for tc in choice.delta.tool_calls.unwrap_or_default() {
                let index = tc.index.unwrap_or(0);
                let pos = match self.pending.iter().position(|p| p.index == index) {
                    Some(pos) => pos,
                    None => {
                        self.pending.push(PendingToolCall {
                            index,
                            ..Default::default()
                        });
                        self.pending.len() - 1
                    }
                };
                let pending = &mut self.pending[pos];

                if tc.id.is_some() {
                    pending.id = tc.id;
                }
                if let Some(f) = tc.function {
                    if let Some(name) = f.name {
                        pending.name.push_str(&name);
                    }
                    if let Some(args) = f.arguments {
                        pending.arguments.push_str(&args);
                    }
                }
            }

            if choice.finish_reason.is_some() {
                self.finished = true;
            }
        }

        Ok(())
    }

    /// Flush any trailing event and build the outcome.
    pub fn finish(mut self) -> Result<Outcome, ProviderError> {
        if !self.done && !self.buffer.iter().all(|b| b.is_ascii_whitespace()) {
            let rest = String::from_utf8_lossy(&std::mem::take(&mut self.buffer)).into_owned();
            self.process_event(&rest)?;
        }

        if !self.done && !self.finished {
            return Err(ProviderError::StreamError {
                reason: "stream ended before the response was complete".into(),
            });
        }

        let mut pending = std::mem::take(&mut self.pending);
        pending.sort_by_key(|p| p.index);

        let calls = pending
            .into_iter()
            .map(|p| finalize_tool_call(p.id.as_deref(), &p.name, &p.arguments))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Outcome::from_parts(self.text, calls))
    }
}

/// Position of the first blank-line event separator and its length.
fn find_event_boundary(buf: &[u8]) -> Option<(usize, usize)> {
    let lf = buf.windows(2).position(|w| w == b"\n\n").map(|p| (p, 2));
    let crlf = buf.windows(4).position(|w| w == b"\r\n\r\n").map(|p| (p, 4));
    match (lf, crlf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    }
}

/// Turn accumulated fragments into a request, generating an id if missing.
fn finalize_tool_call(id: Option<&str>, name: &str, arguments: &str) -> Result<ToolCallRequest, ProviderError> {
    if name.is_empty() {
        return Err(ProviderError::MalformedResponse {
            reason: "tool call without a function name".into(),
        });
    }

    let arguments = if arguments.trim().is_empty() {
        serde_json::json!({})
    } else {
        serde_json::from_str(arguments).map_err(|e| ProviderError::MalformedResponse {
            reason: format!("invalid JSON arguments for '{name}': {e}"),
        })?
    };

    Ok(ToolCallRequest {
        id: id
            .filter(|i| !i.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("call_{}", Uuid::new_v4())),
        name: name.to_string(),
        arguments,
    })
}

/// Parse a complete (non-streaming) JSON response body.
pub fn parse_non_streaming_response(body: &str) -> Result<Outcome, ProviderError> {
    let response: ChatCompletionResponse =
        serde_json::from_str(body).map_err(|e| ProviderError::MalformedResponse {
            reason: format!("failed to parse response: {e}"),
        })?;

    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| ProviderError::MalformedResponse {
            reason: "response contained no choices".into(),
        })?;

    let calls = choice
        .message
        .tool_calls
        .unwrap_or_default()
        .iter()
        .map(|tc| finalize_tool_call(Some(&tc.id), &tc.function.name, &tc.function.arguments))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Outcome::from_parts(choice.message.content.unwrap_or_default(), calls))
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_core::types::ToolCallResult;
    use crate::inference::testing::serve_once;
    use serde_json::json;

    fn accumulate(parts: &[&str]) -> Result<Outcome, ProviderError> {
        let mut acc = SseAccumulator::default();
        for part in parts {
            acc.push_bytes(part.as_bytes())?;
        }
        acc.finish()
    }

    #[test]
    fn test_text_deltas_are_concatenated() {
        let outcome = accumulate(&[
            "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\",\"content\":\"Hel\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\ndata: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n",
            "data: [DONE]\n\n",
        ])
        .unwrap();
        assert_eq!(outcome, Outcome::FinalAnswer("Hello".into()));
    }

    #[test]
    fn test_tool_call_fragments_merge_by_index() {
        let outcome = accumulate(&[
            ": keep-alive\n\n",
            "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"id\":\"call_a\",\"function\":{\"name\":\"fetch\",\"arguments\":\"\"}}]}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":1,\"id\":\"call_b\",\"function\":{\"name\":\"time\",\"arguments\":\"{}\"}}]}}]}\n\n",
            // Event split across two network reads.
            "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"function\":{\"argu",
            "ments\":\"{\\\"url\\\":\\\"https://example.com\\\"}\"}}]}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"tool_calls\"}]}\n\ndata: [DONE]\n\n",
        ])
        .unwrap();

        match outcome {
            Outcome::ToolCalls { text, calls } => {
                assert!(text.is_none());
                assert_eq!(calls.len(), 2);
                assert_eq!(calls[0].id, "call_a");
                assert_eq!(calls[0].name, "fetch");
                assert_eq!(calls[0].arguments, json!({"url": "https://example.com"}));
                assert_eq!(calls[1].name, "time");
            }
            other => panic!("expected tool calls, got {other:?}"),
        }
    }

    #[test]
    fn test_crlf_separated_events() {
        let outcome = accumulate(&[
            "data: {\"choices\":[{\"delta\":{\"content\":\"ok\"},\"finish_reason\":\"stop\"}]}\r\n\r\n",
            "data: [DONE]\r\n\r\n",
        ])
        .unwrap();
        assert_eq!(outcome, Outcome::FinalAnswer("ok".into()));
    }

    #[test]
    fn test_missing_tool_call_id_is_generated() {
        let outcome = accumulate(&[
            "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"function\":{\"name\":\"now\"}}]},\"finish_reason\":\"tool_calls\"}]}\n\n",
        ])
        .unwrap();
        match outcome {
            Outcome::ToolCalls { calls, .. } => {
                assert!(calls[0].id.starts_with("call_"));
                assert_eq!(calls[0].arguments, json!({}));
            }
            other => panic!("expected tool calls, got {other:?}"),
        }
    }

    #[test]
    fn test_error_event_mid_stream() {
        let err = accumulate(&["data: {\"error\":{\"message\":\"overloaded\"}}\n\n"]).unwrap_err();
        assert!(matches!(err, ProviderError::StreamError { .. }));
        assert!(err.to_string().contains("overloaded"));
    }

    #[test]
    fn test_truncated_stream_is_an_error() {
        let err = accumulate(&["data: {\"choices\":[{\"delta\":{\"content\":\"partial\"}}]}\n\n"]).unwrap_err();
        assert!(matches!(err, ProviderError::StreamError { .. }));
    }

    #[test]
    fn test_invalid_arguments_json_is_malformed() {
        let err = accumulate(&[
            "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"id\":\"c\",\"function\":{\"name\":\"fetch\",\"arguments\":\"{not json\"}}]},\"finish_reason\":\"tool_calls\"}]}\n\n",
        ])
        .unwrap_err();
        assert!(matches!(err, ProviderError::MalformedResponse { .. }));
    }

    #[test]
    fn test_parse_non_streaming_response() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":null,"tool_calls":[{"id":"call_1","type":"function","function":{"name":"fetch","arguments":"{\"url\":\"x\"}"}}]}}]}"#;
        match parse_non_streaming_response(body).unwrap() {
            Outcome::ToolCalls { calls, .. } => assert_eq!(calls[0].arguments, json!({"url": "x"})),
            other => panic!("expected tool calls, got {other:?}"),
        }
        assert!(parse_non_streaming_response(r#"{"choices":[]}"#).is_err());
    }

    #[test]
    fn test_build_messages() {
        let call = ToolCallRequest {
            id: "call_1".into(),
            name: "fetch".into(),
            arguments: json!({"url": "https://example.com"}),
        };
        let history = vec![
            Message::user("get it"),
            Message::assistant_tool_calls(None, vec![call]),
            Message::tool_result(ToolCallResult {
                id: "call_1".into(),
                content: "<html/>".into(),
                is_error: false,
            }),
        ];
        let wire = serde_json::to_value(build_messages(&history)).unwrap();
        assert_eq!(wire[0]["role"], "user");
        assert_eq!(wire[1]["content"], "");
        assert_eq!(wire[1]["tool_calls"][0]["function"]["arguments"], r#"{"url":"https://example.com"}"#);
        assert_eq!(wire[2]["role"], "tool");
        assert_eq!(wire[2]["tool_call_id"], "call_1");
    }

    fn handler_for(base_url: &str) -> OpenAiHandler {
        OpenAiHandler::new(ProviderConfig {
            kind: ProviderKind::OpenAi,
            model: "gpt-4o-mini".into(),
            base_url: base_url.to_string(),
            api_key: Some("sk-test".into()),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_respond_streams_and_authenticates() {
        let sse = "data: {\"choices\":[{\"delta\":{\"content\":\"Hi there\"},\"finish_reason\":\"stop\"}]}\n\ndata: [DONE]\n\n";
        let server = serve_once(200, "text/event-stream", sse).await;
        let handler = handler_for(&server.base_url);

        let outcome = handler.respond(&[Message::user("hello")], &[]).await.unwrap();
        assert_eq!(outcome, Outcome::FinalAnswer("Hi there".into()));

        let request = server.request().await;
        assert!(request.starts_with("POST /chat/completions"));
        assert!(request.to_lowercase().contains("authorization: bearer sk-test"));
        assert!(request.contains("\"stream\":true"));
        assert!(request.contains("\"max_tokens\":1000"));
        assert!(!request.contains("\"tools\""));
    }

    #[tokio::test]
    async fn test_respond_maps_auth_failure() {
        let server = serve_once(401, "application/json", r#"{"error":{"message":"bad key"}}"#).await;
        let handler = handler_for(&server.base_url);
        let err = handler.respond(&[Message::user("hello")], &[]).await.unwrap_err();
        assert!(matches!(err, ProviderError::Auth { status: 401, .. }));
    }

    #[tokio::test]
    async fn test_respond_maps_rate_limit() {
        let server = serve_once(429, "application/json", "{}").await;
        let handler = handler_for(&server.base_url);
        let err = handler.respond(&[Message::user("hello")], &[]).await.unwrap_err();
        assert!(matches!(err, ProviderError::RateLimited { .. }));
    }

    #[tokio::test]
    async fn test_respond_connection_refused() {
        // Bind then drop to get a port nobody listens on.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let handler = handler_for(&format!("http://{addr}"));
        let err = handler.respond(&[Message::user("hello")], &[]).await.unwrap_err();
        assert!(matches!(err, ProviderError::ConnectionFailed { .. }));
    }

    #[test]
    fn test_new_requires_key() {
        let result = OpenAiHandler::new(ProviderConfig {
            kind: ProviderKind::OpenAi,
            model: "gpt-4o-mini".into(),
            base_url: "https://api.openai.com/v1".into(),
            api_key: None,
        });
        assert!(matches!(result, Err(ProviderError::Config { .. })));
    }
}
