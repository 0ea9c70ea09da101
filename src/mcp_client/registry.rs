//! Capability registry: immutable snapshot of what one server offers.
//!
//! Provides:
//! - Tool lookup by name, with "did you mean" suggestions on a miss
//! - Sorted listings of tools, prompts and resources
//! - Structural validation of tool call arguments
//! - The `--members` report

use std::collections::BTreeMap;
use std::fmt::Write as _;

use super::errors::McpError;
use super::types::{PromptTemplate, ResourceDescriptor, ToolSchema};

/// Suggestions below this similarity score are not worth showing.
const SUGGESTION_FLOOR: f64 = 0.3;

/// Maximum number of suggestions attached to an `UnknownTool` error.
const MAX_SUGGESTIONS: usize = 3;

// ─── CapabilityRegistry ──────────────────────────────────────────────────────

/// Tools, prompts and resources keyed by name. Built once after discovery.
#[derive(Debug, Clone, Default)]
pub struct CapabilityRegistry {
    tools: BTreeMap<String, ToolSchema>,
    prompts: BTreeMap<String, PromptTemplate>,
    resources: BTreeMap<String, ResourceDescriptor>,
}

impl CapabilityRegistry {
    /// Build a registry from discovery results. Later duplicates of a name
    /// replace earlier ones.
    pub fn new(
        tools: Vec<ToolSchema>,
        prompts: Vec<PromptTemplate>,
        resources: Vec<ResourceDescriptor>,
    ) -> Self {
        Self {
            tools: tools.into_iter().map(|t| (t.name.clone(), t)).collect(),
            prompts: prompts.into_iter().map(|p| (p.name.clone(), p)).collect(),
            resources: resources.into_iter().map(|r| (r.name.clone(), r)).collect(),
        }
    }

    /// Look up a tool, or fail with `UnknownTool` and suggestions.
    pub fn tool(&self, name: &str) -> Result<&ToolSchema, McpError> {
        self.tools.get(name).ok_or_else(|| McpError::UnknownTool {
            name: name.to_string(),
            suggestions: self.find_similar(name, MAX_SUGGESTIONS),
        })
    }

    pub fn prompt(&self, name: &str) -> Option<&PromptTemplate> {
        self.prompts.get(name)
    }

    /// All tools, sorted by name.
    pub fn tools(&self) -> Vec<&ToolSchema> {
        self.tools.values().collect()
    }

    /// All prompts, sorted by name.
    pub fn prompts(&self) -> Vec<&PromptTemplate> {
        self.prompts.values().collect()
    }

    /// All resources, sorted by name.
    pub fn resources(&self) -> Vec<&ResourceDescriptor> {
        self.resources.values().collect()
    }

    pub fn tool_names(&self) -> Vec<&str> {
        self.tools.keys().map(|k| k.as_str()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty() && self.prompts.is_empty() && self.resources.is_empty()
    }

    /// Validate a tool call against the registered schema.
    ///
    /// This is a basic structural check: the tool exists and every required
    /// top-level field is present. Full JSON Schema validation is left to
    /// the server itself.
    pub fn validate_tool_call(
        &self,
        tool_name: &str,
        arguments: &serde_json::Value,
    ) -> Result<(), McpError> {
        let def = self.tool(tool_name)?;

        if !arguments.is_object() && !arguments.is_null() {
            return Err(McpError::InvalidArguments {
                tool: tool_name.to_string(),
                reason: format!("arguments must be an object, got {arguments}"),
            });
        }

        if let Some(required_arr) = def.input_schema.get("required").and_then(|r| r.as_array()) {
            let args_obj = arguments.as_object();
            for field_name in required_arr.iter().filter_map(|f| f.as_str()) {
                let has_field = args_obj
                    .map(|obj| obj.contains_key(field_name))
                    .unwrap_or(false);
                if !has_field {
                    return Err(McpError::InvalidArguments {
                        tool: tool_name.to_string(),
                        reason: format!("missing required field: '{field_name}'"),
                    });
                }
            }
        }

        Ok(())
    }

    /// Find up to `max_results` tool names most similar to `name`.
    pub fn find_similar(&self, name: &str, max_results: usize) -> Vec<String> {
        let mut scored: Vec<(&String, f64)> = self
            .tools
            .keys()
            .map(|candidate| (candidate, similarity(name, candidate)))
            .filter(|(_, score)| *score > SUGGESTION_FLOOR)
            .collect();

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(max_results);
        scored.into_iter().map(|(name, _)| name.clone()).collect()
    }

    /// Render the capability listing printed by `--members`.
    ///
    /// `server` is `(name, description)` of the configured server, when known.
    pub fn members_report(&self, server: Option<(&str, &str)>) -> String {
        let rule = "=".repeat(50);
        let mut out = String::new();

        match server {
            Some((name, description)) => {
                let _ = writeln!(out, "MCP Server: {name}");
                let _ = writeln!(out, "Description: {description}");
            }
            None => {
                let _ = writeln!(out, "MCP Server Members");
            }
        }
        let _ = writeln!(out, "{rule}");

        let tools: Vec<(&str, Option<&str>)> = self
            .tools
            .values()
            .map(|t| (t.name.as_str(), t.description.as_deref()))
            .collect();
        let prompts: Vec<(&str, Option<&str>)> = self
            .prompts
            .values()
            .map(|p| (p.name.as_str(), p.description.as_deref()))
            .collect();
        let resources: Vec<(&str, Option<&str>)> = self
            .resources
            .values()
            .map(|r| (r.name.as_str(), r.description.as_deref()))
            .collect();

        write_section(&mut out, "TOOLS", &tools);
        write_section(&mut out, "PROMPTS", &prompts);
        write_section(&mut out, "RESOURCES", &resources);

        let _ = writeln!(out, "\n{rule}");
        out
    }
}

fn write_section(out: &mut String, title: &str, items: &[(&str, Option<&str>)]) {
    if items.is_empty() {
        let _ = writeln!(out, "\n{title}: None available");
        return;
    }

    let _ = writeln!(out, "\n{title} ({}):", items.len());
    let _ = writeln!(out, "{}", "-".repeat(30));
    for (name, description) in items {
        let description = description.filter(|d| !d.is_empty()).unwrap_or("No description");
        let _ = writeln!(out, " > {name} - {description}");
    }
}

// ─── Edit Distance ──────────────────────────────────────────────────────────

/// Levenshtein edit distance, computed over chars.
fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let n = b.len();

    // Single-row DP
    let mut prev: Vec<usize> = (0..=n).collect();
    let mut curr = vec![0usize; n + 1];

    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[n]
}

/// Normalized similarity (0.0 = completely different, 1.0 = identical).
fn similarity(a: &str, b: &str) -> f64 {
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 1.0;
    }
    1.0 - (levenshtein(a, b) as f64 / max_len as f64)
}

// ─── Tests ───────────────────────────────────────────────────────────────────
