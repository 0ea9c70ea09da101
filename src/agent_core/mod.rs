//! Agent Core: the conversation loop.
//!
//! Submodules:
//! - `session`: History ownership and the respond → dispatch loop
//! - `dispatcher`: Sequential tool execution and result correlation
//! - `types`: Messages and tool call request/result pairs
//! - `errors`: Session-level error taxonomy and exit codes

pub mod dispatcher;
pub mod errors;
pub mod session;
pub mod types;

#[cfg(test)]
pub(crate) mod test_support;

// Re-exports for convenience
pub use dispatcher::{correlate, dispatch, DispatchReport, ToolInvoker};
pub use errors::{SessionError, ToolExecutionError};
pub use session::{ChatSession, SessionState, TurnReply, DEFAULT_MAX_ROUNDS};
pub use types::{Message, MessageContent, Role, ToolCallRequest, ToolCallResult};
