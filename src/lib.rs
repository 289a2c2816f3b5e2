//! CMS MCP Server Library
//!
//! HTTP transport for the Model Context Protocol: session management, the
//! per-session SSE message queue, and the built-in dispatcher. Exposed as a
//! library so a host CMS can plug in its own dispatcher or tools.

pub mod config;
pub mod mcp;
pub mod server;
pub mod session;
pub mod sqlite_persistence;
pub mod transport;

// Re-export commonly used types for convenience
pub use mcp::{McpDispatcher, McpServer};
pub use server::{make_app, run_server, RequestsLoggingLevel, ServerConfig};
pub use session::{InMemorySessionStore, SessionStore, SqliteSessionStore};
pub use transport::{McpTransport, TransportConfig, TransportError};
