//! Ollama `/api/chat` handler.
//!
//! Requests are non-streaming. Ollama returns tool call arguments as JSON
//! objects and assigns no ids, so ids are generated here.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client as HttpClient;
use uuid::Uuid;

use super::config::{ProviderConfig, ProviderKind};
use super::errors::ProviderError;
use super::handler::{Outcome, QueryHandler, MAX_TOKENS};
use super::schema::{adapt_tools, OllamaSchemaAdapter};
use super::types::{
    OllamaChatRequest, OllamaChatResponse, OllamaFunctionCall, OllamaMessage, OllamaOptions,
    OllamaTagsResponse, OllamaToolCall, WireRole,
};
use crate::agent_core::types::{Message, MessageContent, ToolCallRequest};
use crate::mcp_client::types::ToolSchema;

/// TCP connection timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Total request timeout. Local models can take a while on large contexts.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(180);

/// Query handler for a locally hosted Ollama server.
pub struct OllamaHandler {
    http: HttpClient,
    config: ProviderConfig,
}

impl OllamaHandler {
    pub fn new(config: ProviderConfig) -> Result<Self, ProviderError> {
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

    /// Whether the configured model is among the locally available ones.
    pub async fn check_model(&self) -> Result<bool, ProviderError> {
        let url = format!("{}/api/tags", self.config.base_url);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| ProviderError::from_reqwest(e, &url, REQUEST_TIMEOUT.as_secs()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(status.as_u16(), body));
        }

        let text = response
            .text()
            .await
            .map_err(|e| ProviderError::from_reqwest(e, &url, REQUEST_TIMEOUT.as_secs()))?;
        let tags: OllamaTagsResponse =
            serde_json::from_str(&text).map_err(|e| ProviderError::MalformedResponse {
                reason: format!("failed to parse /api/tags response: {e}"),
            })?;

        let available: Vec<&str> = tags.models.iter().map(|m| m.name.as_str()).collect();
        let found = model_available(&self.config.model, &available);
        tracing::info!(
            model = %self.config.model,
            found,
            available = ?available,
            "checked local models"
        );
        Ok(found)
    }
}

/// Loose match: `qwen2.5` is satisfied by `qwen2.5:latest`.
fn model_available(model: &str, available: &[&str]) -> bool {
    available.iter().any(|name| name.contains(model))
}

#[async_trait]
impl QueryHandler for OllamaHandler {
    fn provider(&self) -> ProviderKind {
        ProviderKind::Ollama
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    async fn respond(&self, history: &[Message], tools: &[ToolSchema]) -> Result<Outcome, ProviderError> {
        let specs = adapt_tools(&OllamaSchemaAdapter, ProviderKind::Ollama, tools)?;
        let tools = if specs.is_empty() {
            None
        } else {
            Some(specs.iter().map(|s| s.to_definition()).collect::<Vec<_>>())
        };

        let body = OllamaChatRequest {
            model: self.config.model.clone(),
            messages: build_messages(history),
            tools,
            stream: false,
            options: OllamaOptions {
                num_predict: MAX_TOKENS,
            },
        };
        let url = format!("{}/api/chat", self.config.base_url);

        tracing::info!(
            url = %url,
            model = %body.model,
            message_count = body.messages.len(),
            tool_count = body.tools.as_ref().map(|t| t.len()).unwrap_or(0),
            num_predict = body.options.num_predict,
            "=== LLM REQUEST ==="
        );

        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::from_reqwest(e, &url, REQUEST_TIMEOUT.as_secs()))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            tracing::warn!(status = status.as_u16(), body = %body_text, "provider returned error");
            return Err(ProviderError::from_status(status.as_u16(), body_text));
        }

        let text = response
            .text()
            .await
            .map_err(|e| ProviderError::from_reqwest(e, &url, REQUEST_TIMEOUT.as_secs()))?;
        let outcome = parse_chat_response(&text)?;

        tracing::info!(
            final_answer = matches!(outcome, Outcome::FinalAnswer(_)),
            "=== LLM RESPONSE ==="
        );
        Ok(outcome)
    }
}

// ─── Conversion ──────────────────────────────────────────────────────────────

/// Convert session history into Ollama messages. Tool results carry the
/// name of the tool that produced them, looked up by call id.
pub fn build_messages(history: &[Message]) -> Vec<OllamaMessage> {
    history
        .iter()
        .map(|msg| match &msg.content {
            MessageContent::Text(text) => OllamaMessage {
                role: msg.role.into(),
                content: text.clone(),
                tool_calls: None,
                tool_name: None,
            },
            MessageContent::ToolCalls { text, calls } => OllamaMessage {
                role: WireRole::Assistant,
                content: text.clone().unwrap_or_default(),
                tool_calls: Some(
                    calls
                        .iter()
                        .map(|call| OllamaToolCall {
                            function: OllamaFunctionCall {
                                name: call.name.clone(),
                                arguments: call.arguments.clone(),
                            },
                        })
                        .collect(),
                ),
                tool_name: None,
            },
            MessageContent::ToolResult(result) => OllamaMessage {
                role: WireRole::Tool,
                content: result.content.clone(),
                tool_calls: None,
                tool_name: history
                    .iter()
                    .flat_map(|m| m.tool_calls())
                    .find(|call| call.id == result.id)
                    .map(|call| call.name.clone()),
            },
        })
        .collect()
}

/// Parse a `/api/chat` response body into an outcome.
pub fn parse_chat_response(body: &str) -> Result<Outcome, ProviderError> {
    let response: OllamaChatResponse =
        serde_json::from_str(body).map_err(|e| ProviderError::MalformedResponse {
            reason: format!("failed to parse /api/chat response: {e}"),
        })?;

    let calls = response
        .message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|tc| -> Result<ToolCallRequest, ProviderError> {
            let arguments = match tc.function.arguments {
                serde_json::Value::Null => serde_json::json!({}),
                // Some models emit arguments as an encoded string.
                serde_json::Value::String(s) if s.trim().is_empty() => serde_json::json!({}),
                serde_json::Value::String(s) => {
                    serde_json::from_str(&s).map_err(|e| ProviderError::MalformedResponse {
                        reason: format!("invalid JSON arguments for '{}': {e}", tc.function.name),
                    })?
                }
                other => other,
            };
            Ok(ToolCallRequest {
                id: format!("call_{}", Uuid::new_v4()),
                name: tc.function.name,
                arguments,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Outcome::from_parts(response.message.content, calls))
}

// ─── Tests ───────────────────────────────────────────────────────────────────
