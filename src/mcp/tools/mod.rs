//! MCP Tools
//!
//! Built-in tools every deployment exposes.

pub mod server;
pub mod session;

use super::registry::McpRegistry;

/// Register all tools with the registry
pub fn register_all_tools(registry: &mut McpRegistry) {
    server::register_tools(registry);
    session::register_tools(registry);
}
