//! Scripted fake tool servers for transport, codec and client tests.

use super::types::ServerDescriptor;

/// `initialize` reply advertising the tools capability only.
pub const INIT_REPLY: &str = r#"{"jsonrpc":"2.0","id":1,"result":{"protocolVersion":"2025-06-18","capabilities":{"tools":{}},"serverInfo":{"name":"fake","version":"0.0.1"}}}"#;

/// Descriptor that runs `script` with `sh -c`.
pub fn fake_server(script: &str) -> ServerDescriptor {
    ServerDescriptor::script("fake", "sh", vec!["-c".into(), script.to_string()])
}
