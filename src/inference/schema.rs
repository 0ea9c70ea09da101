//! Schema adapters: `ToolSchema` → provider tool declarations.
//!
//! Both providers take OpenAI-style function tools, so the two adapters
//! share one normalization. They stay separate types so a tool list built
//! for one provider cannot silently be sent to the other.

use serde_json::{json, Value};

use super::config::ProviderKind;
use super::errors::ProviderError;
use super::types::{FunctionDefinition, ToolDefinition};
use crate::mcp_client::types::ToolSchema;

// ─── ProviderToolSpec ────────────────────────────────────────────────────────

/// A tool declaration shaped for one provider family.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderToolSpec {
    family: ProviderKind,
    definition: ToolDefinition,
}

impl ProviderToolSpec {
    pub fn family(&self) -> ProviderKind {
        self.family
    }

    pub fn name(&self) -> &str {
        &self.definition.function.name
    }

    pub fn description(&self) -> &str {
        &self.definition.function.description
    }

    /// The parameter schema as it will be sent.
    pub fn parameters(&self) -> &Value {
        &self.definition.function.parameters
    }

    /// Top-level `required` field names, in schema order.
    pub fn required_fields(&self) -> Vec<&str> {
        self.parameters()
            .get("required")
            .and_then(|r| r.as_array())
            .map(|fields| fields.iter().filter_map(|f| f.as_str()).collect())
            .unwrap_or_default()
    }

    /// Wire form included in the request body.
    pub fn to_definition(&self) -> ToolDefinition {
        self.definition.clone()
    }
}

// ─── SchemaAdapter ───────────────────────────────────────────────────────────

/// Converts tool schemas into one provider's declaration format.
pub trait SchemaAdapter {
    /// Provider family this adapter produces declarations for.
    fn family(&self) -> ProviderKind;

    /// Pure conversion of a single tool.
    fn adapt(&self, tool: &ToolSchema) -> ProviderToolSpec;
}

/// Adapter for OpenAI Chat Completions `tools`.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenAiSchemaAdapter;

/// Adapter for Ollama `/api/chat` `tools`.
#[derive(Debug, Clone, Copy, Default)]
pub struct OllamaSchemaAdapter;

impl SchemaAdapter for OpenAiSchemaAdapter {
    fn family(&self) -> ProviderKind {
        ProviderKind::OpenAi
    }

    fn adapt(&self, tool: &ToolSchema) -> ProviderToolSpec {
        function_tool(ProviderKind::OpenAi, tool)
    }
}

impl SchemaAdapter for OllamaSchemaAdapter {
    fn family(&self) -> ProviderKind {
        ProviderKind::Ollama
    }

    fn adapt(&self, tool: &ToolSchema) -> ProviderToolSpec {
        function_tool(ProviderKind::Ollama, tool)
    }
}

/// Adapt a whole tool list, refusing an adapter built for another provider.
pub fn adapt_tools(
    adapter: &dyn SchemaAdapter,
    provider: ProviderKind,
    tools: &[ToolSchema],
) -> Result<Vec<ProviderToolSpec>, ProviderError> {
    if adapter.family() != provider {
        return Err(ProviderError::Config {
            reason: format!(
                "schema adapter for '{}' cannot be used with provider '{provider}'",
                adapter.family()
            ),
        });
    }
    Ok(tools.iter().map(|t| adapter.adapt(t)).collect())
}

fn function_tool(family: ProviderKind, tool: &ToolSchema) -> ProviderToolSpec {
    ProviderToolSpec {
        family,
        definition: ToolDefinition {
            r#type: "function".to_string(),
            function: FunctionDefinition {
                name: tool.name.clone(),
                description: tool.description_or_default().to_string(),
                parameters: normalize_parameters(&tool.input_schema),
            },
        },
    }
}

/// Null or non-object schemas become an empty object schema. An object
/// schema without `type` gains `"type": "object"`. Nothing else changes.
fn normalize_parameters(schema: &Value) -> Value {
    match schema {
        Value::Object(map) => {
            let mut map = map.clone();
            map.entry("type").or_insert_with(|| json!("object"));
            Value::Object(map)
        }
        _ => json!({"type": "object", "properties": {}}),
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
