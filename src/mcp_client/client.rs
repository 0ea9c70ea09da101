//! MCP Client: one connected tool server.
//!
//! Composes transport, codec and registry: connect → handshake → discover.
//! This is the production [`ToolInvoker`] used by the tool dispatcher.

use async_trait::async_trait;
use std::time::Instant;

use super::codec::ProtocolCodec;
use super::errors::McpError;
use super::registry::CapabilityRegistry;
use super::transport::ProcessTransport;
use super::types::{InitializeResult, ServerDescriptor, ServerInfo, ToolOutput, ToolSchema};
use crate::agent_core::dispatcher::ToolInvoker;

// ─── McpClient ───────────────────────────────────────────────────────────────

/// A live, initialized connection to a single tool server.
pub struct McpClient {
    descriptor: ServerDescriptor,
    codec: ProtocolCodec,
    init: InitializeResult,
    registry: CapabilityRegistry,
}

impl McpClient {
    /// Spawn the server, run the handshake and capture its capabilities.
    ///
    /// On any failure after spawn the process is shut down before the error
    /// is returned.
    pub async fn connect(descriptor: &ServerDescriptor) -> Result<Self, McpError> {
        descriptor.validate()?;
        let start = Instant::now();

        let transport = ProcessTransport::connect(descriptor).await?;
        let mut codec = ProtocolCodec::new(transport);

        let init = match codec.handshake().await {
            Ok(init) => init,
            Err(e) => {
                codec.close().await;
                return Err(e);
            }
        };

        let registry = match discover(&mut codec, &init).await {
            Ok(registry) => registry,
            Err(e) => {
                codec.close().await;
                return Err(e);
            }
        };

        tracing::info!(
            server = %descriptor.name,
            tools = registry.tools().len(),
            prompts = registry.prompts().len(),
            resources = registry.resources().len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "connected to tool server"
        );
        if registry.is_empty() {
            tracing::warn!(server = %descriptor.name, "server advertises no tools, prompts or resources");
        }

        Ok(Self {
            descriptor: descriptor.clone(),
            codec,
            init,
            registry,
        })
    }

    pub fn descriptor(&self) -> &ServerDescriptor {
        &self.descriptor
    }

    pub fn registry(&self) -> &CapabilityRegistry {
        &self.registry
    }

    /// Identity reported by the server during the handshake.
    pub fn server_info(&self) -> Option<&ServerInfo> {
        self.init.server_info.as_ref()
    }

    /// Protocol version agreed during the handshake.
    pub fn protocol_version(&self) -> &str {
        &self.init.protocol_version
    }

    /// Free-form usage instructions supplied by the server, if any.
    pub fn instructions(&self) -> Option<&str> {
        self.init.instructions.as_deref()
    }

    /// Render the `--members` listing for this server.
    pub fn members_report(&self) -> String {
        let description = if self.descriptor.description.is_empty() {
            "No description"
        } else {
            self.descriptor.description.as_str()
        };
        self.registry
            .members_report(Some((self.descriptor.name.as_str(), description)))
    }

    /// Validate and execute one tool call.
    pub async fn call_tool(
        &mut self,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<ToolOutput, McpError> {
        let start = Instant::now();
        self.registry.validate_tool_call(name, &arguments)?;

        let arguments = if arguments.is_null() {
            serde_json::json!({})
        } else {
            arguments
        };

        let result = self.codec.call_tool(name, arguments).await?;
        let output = ToolOutput {
            text: result.text(),
            is_error: result.is_error,
        };

        tracing::info!(
            server = %self.descriptor.name,
            tool = name,
            is_error = output.is_error,
            result_len = output.text.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "tool call complete"
        );
        Ok(output)
    }

    pub fn is_alive(&mut self) -> bool {
        self.codec.is_alive()
    }

    /// Shut the server down. Safe to call more than once.
    pub async fn close(&mut self) {
        self.codec.close().await;
    }
}

/// List every capability the server advertised.
async fn discover(
    codec: &mut ProtocolCodec,
    init: &InitializeResult,
) -> Result<CapabilityRegistry, McpError> {
    let tools = if init.capabilities.tools.is_some() {
        codec.list_tools().await?
    } else {
        Vec::new()
    };
    let prompts = if init.capabilities.prompts.is_some() {
        codec.list_prompts().await?
    } else {
        Vec::new()
    };
    let resources = if init.capabilities.resources.is_some() {
        codec.list_resources().await?
    } else {
        Vec::new()
    };
    Ok(CapabilityRegistry::new(tools, prompts, resources))
}

// ─── ToolInvoker ─────────────────────────────────────────────────────────────

#[async_trait]
impl ToolInvoker for McpClient {
    fn tools(&self) -> Vec<ToolSchema> {
        self.registry.tools().into_iter().cloned().collect()
    }

    async fn ensure_connected(&mut self) -> Result<(), McpError> {
        if self.codec.is_alive() {
            Ok(())
        } else {
            Err(McpError::Disconnected {
                name: self.descriptor.name.clone(),
            })
        }
    }

    async fn invoke(
        &mut self,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<ToolOutput, McpError> {
        self.call_tool(name, arguments).await
    }

    async fn close(&mut self) {
        McpClient::close(self).await;
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::mcp_client::errors::ErrorCategory;
    use crate::mcp_client::testing::fake_server;
    use serde_json::json;

    const FULL_INIT: &str = r#"{"jsonrpc":"2.0","id":1,"result":{"protocolVersion":"2024-11-05","capabilities":{"tools":{},"prompts":{}},"serverInfo":{"name":"fetch-server","version":"1.2"},"instructions":"be nice"}}"#;

    fn fetch_server_script(after_discovery: &str) -> String {
        format!(
            r#"
read -r _; echo '{FULL_INIT}'
read -r _
read -r _; echo '{{"jsonrpc":"2.0","id":2,"result":{{"tools":[{{"name":"fetch","description":"Fetch a URL","inputSchema":{{"type":"object","properties":{{"url":{{"type":"string"}}}},"required":["url"]}}}}]}}}}'
read -r _; echo '{{"jsonrpc":"2.0","id":3,"result":{{"prompts":[{{"name":"summarize"}}]}}}}'
{after_discovery}
"#
        )
    }

    #[tokio::test]
    async fn test_connect_discovers_capabilities() {
        let script = fetch_server_script("read -r _");
        let mut client = McpClient::connect(&fake_server(&script)).await.unwrap();

        assert_eq!(client.protocol_version(), "2024-11-05");
        assert_eq!(client.server_info().unwrap().name, "fetch-server");
        assert_eq!(client.instructions(), Some("be nice"));
        assert_eq!(client.registry().tool_names(), vec!["fetch"]);
        assert_eq!(client.registry().prompts().len(), 1);
        assert!(client.registry().resources().is_empty());

        let report = client.members_report();
        assert!(report.contains(" > fetch - Fetch a URL"));
        client.close().await;
    }

    #[tokio::test]
    async fn test_invoke_tool() {
        let script = fetch_server_script(
            r#"read -r _; echo '{"jsonrpc":"2.0","id":4,"result":{"content":[{"type":"text","text":"<html>ok</html>"}]}}'
read -r _"#,
        );
        let mut client = McpClient::connect(&fake_server(&script)).await.unwrap();
        client.ensure_connected().await.unwrap();

        let out = client
            .invoke("fetch", json!({"url": "https://example.com"}))
            .await
            .unwrap();
        assert_eq!(out.text, "<html>ok</html>");
        assert!(!out.is_error);
        ToolInvoker::close(&mut client).await;
    }

    #[tokio::test]
    async fn test_unknown_tool_never_reaches_server() {
        let script = fetch_server_script("read -r _");
        let mut client = McpClient::connect(&fake_server(&script)).await.unwrap();

        let err = client.invoke("fetc", json!({})).await.unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Tool);
        assert!(err.to_string().contains("did you mean: fetch"));

        let err = client.invoke("fetch", json!({})).await.unwrap_err();
        assert!(matches!(err, McpError::InvalidArguments { .. }));
        assert!(client.is_alive());
        client.close().await;
    }

    #[tokio::test]
    async fn test_disconnect_is_detected() {
        let script = fetch_server_script("read -r _; exit 1");
        let mut client = McpClient::connect(&fake_server(&script)).await.unwrap();

        let err = client
            .invoke("fetch", json!({"url": "https://example.com"}))
            .await
            .unwrap_err();
        assert!(err.is_transport());

        let err = client.ensure_connected().await.unwrap_err();
        assert!(matches!(err, McpError::Disconnected { .. }));
    }

    #[tokio::test]
    async fn test_connect_rejects_invalid_descriptor() {
        let d = ServerDescriptor::script("bad", "", vec![]);
        let err = McpClient::connect(&d).await.err().unwrap();
        assert_eq!(err.category(), ErrorCategory::Config);
    }
}
