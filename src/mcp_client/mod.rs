//! MCP Client: JSON-RPC over stdio to a single tool server.
//!
//! This module handles:
//! - Spawning the server as a local process or inside a container runtime
//! - JSON-RPC 2.0 framing, the initialize handshake and id correlation
//! - Discovery of tools, prompts and resources into a capability registry
//! - Validated tool invocation
//! - Loading server definitions from `mcp-servers.json` / YAML
//!
//! [`McpClient`] is the tool invoker the agent core dispatches calls to.

pub mod client;
pub mod codec;
pub mod config;
pub mod errors;
pub mod registry;
pub mod transport;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

// Re-exports for convenience
pub use client::McpClient;
pub use config::ServerConfigs;
pub use errors::{ErrorCategory, McpError};
pub use registry::CapabilityRegistry;
pub use types::{MountSpec, ServerDescriptor, ToolOutput, ToolSchema, TransportKind};
