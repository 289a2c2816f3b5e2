//! MCP (Model Context Protocol) layer
//!
//! JSON-RPC message types, the dispatcher contract the HTTP transport
//! calls into, and the built-in [`McpServer`] dispatcher with its tool
//! registry.

pub mod context;
pub mod dispatcher;
pub mod handler;
pub mod protocol;
pub mod registry;
pub mod tools;

pub use dispatcher::{DisconnectReason, McpDispatcher, SessionContext, SessionOutbox};
pub use handler::McpServer;
pub use protocol::{McpError, McpNotification, McpRequest, McpResponse};
pub use registry::{McpRegistry, ToolBuilder};
