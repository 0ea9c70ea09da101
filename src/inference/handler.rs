//! The query handler seam between the chat session and an LLM provider.

use async_trait::async_trait;

use super::config::{ProviderConfig, ProviderKind};
use super::errors::ProviderError;
use super::ollama::OllamaHandler;
use super::openai::OpenAiHandler;
use crate::agent_core::types::{Message, ToolCallRequest};
use crate::mcp_client::types::ToolSchema;

/// Maximum tokens requested per completion, for both providers.
pub const MAX_TOKENS: u32 = 1000;

// ─── Outcome ─────────────────────────────────────────────────────────────────

/// What the model decided to do with the conversation so far.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Plain answer for the user; the turn is over.
    FinalAnswer(String),
    /// The model wants tools run before it answers.
    ToolCalls {
        text: Option<String>,
        calls: Vec<ToolCallRequest>,
    },
}

impl Outcome {
    /// Build an outcome from accumulated text and calls. No calls means a
    /// final answer; empty text alongside calls is dropped.
    pub fn from_parts(text: String, calls: Vec<ToolCallRequest>) -> Self {
        if calls.is_empty() {
            Outcome::FinalAnswer(text)
        } else {
            Outcome::ToolCalls {
                text: Some(text).filter(|t| !t.trim().is_empty()),
                calls,
            }
        }
    }
}

// ─── QueryHandler ────────────────────────────────────────────────────────────

/// One completion round trip: history and tools in, one outcome out.
#[async_trait]
pub trait QueryHandler: Send + Sync {
    fn provider(&self) -> ProviderKind;

    fn model(&self) -> &str;

    async fn respond(&self, history: &[Message], tools: &[ToolSchema]) -> Result<Outcome, ProviderError>;
}

// ─── LlmProvider ─────────────────────────────────────────────────────────────

/// The configured provider. Chosen once at startup.
pub enum LlmProvider {
    /// Hosted OpenAI-compatible endpoint.
    Remote(OpenAiHandler),
    /// Local Ollama server.
    Local(OllamaHandler),
}

impl LlmProvider {
    pub fn from_config(config: ProviderConfig) -> Result<Self, ProviderError> {
        match config.kind {
            ProviderKind::OpenAi => Ok(LlmProvider::Remote(OpenAiHandler::new(config)?)),
            ProviderKind::Ollama => Ok(LlmProvider::Local(OllamaHandler::new(config)?)),
        }
    }

    /// Startup checks that only warn. For Ollama this verifies the model is
    /// pulled; a remote endpoint has nothing to check up front.
    pub async fn preflight(&self) {
        if let LlmProvider::Local(handler) = self {
            match handler.check_model().await {
                Ok(true) => {}
                Ok(false) => tracing::warn!(
                    model = handler.model(),
                    "model not found locally; Ollama will try to pull it on first use"
                ),
                Err(e) => tracing::warn!(error = %e, "could not verify Ollama models"),
            }
        }
    }
}

#[async_trait]
impl QueryHandler for LlmProvider {
    fn provider(&self) -> ProviderKind {
        match self {
            LlmProvider::Remote(h) => h.provider(),
            LlmProvider::Local(h) => h.provider(),
        }
    }

    fn model(&self) -> &str {
        match self {
            LlmProvider::Remote(h) => h.model(),
            LlmProvider::Local(h) => h.model(),
        }
    }

    async fn respond(&self, history: &[Message], tools: &[ToolSchema]) -> Result<Outcome, ProviderError> {
        match self {
            LlmProvider::Remote(h) => h.respond(history, tools).await,
            LlmProvider::Local(h) => h.respond(history, tools).await,
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_outcome_from_parts() {
        assert_eq!(
            Outcome::from_parts("done".into(), vec![]),
            Outcome::FinalAnswer("done".into())
        );

        let call = ToolCallRequest {
            id: "call_1".into(),
            name: "fetch".into(),
            arguments: json!({}),
        };
        assert_eq!(
            Outcome::from_parts("  ".into(), vec![call.clone()]),
            Outcome::ToolCalls {
                text: None,
                calls: vec![call]
            }
        );
    }

    #[test]
    fn test_from_config_picks_variant() {
        let local = LlmProvider::from_config(ProviderConfig {
            kind: ProviderKind::Ollama,
            model: "qwen2.5:7b".into(),
            base_url: "http://localhost:11434".into(),
            api_key: None,
        })
        .unwrap();
        assert!(matches!(local, LlmProvider::Local(_)));
        assert_eq!(local.provider(), ProviderKind::Ollama);
        assert_eq!(local.model(), "qwen2.5:7b");

        let remote = LlmProvider::from_config(ProviderConfig {
            kind: ProviderKind::OpenAi,
            model: "gpt-4o-mini".into(),
            base_url: "https://api.openai.com/v1".into(),
            api_key: Some("sk-test".into()),
        })
        .unwrap();
        assert!(matches!(remote, LlmProvider::Remote(_)));
        assert_eq!(remote.provider(), ProviderKind::OpenAi);
    }
}
