//! Inference: LLM provider clients behind one query handler seam.
//!
//! This module handles:
//! - Provider selection from explicit choices and the environment
//! - Adapting tool schemas into provider tool declarations
//! - OpenAI Chat Completions over SSE, buffered into one outcome
//! - Ollama `/api/chat` (non-streaming) with generated tool call ids
//!
//! The chat session only sees [`QueryHandler`]; the concrete provider is the
//! statically dispatched [`LlmProvider`] enum.

pub mod config;
pub mod errors;
pub mod handler;
pub mod ollama;
pub mod openai;
pub mod schema;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

// Re-exports for convenience
pub use config::{select_provider, ProviderConfig, ProviderKind};
pub use errors::ProviderError;
pub use handler::{LlmProvider, Outcome, QueryHandler};
pub use schema::{adapt_tools, OllamaSchemaAdapter, OpenAiSchemaAdapter, ProviderToolSpec, SchemaAdapter};
