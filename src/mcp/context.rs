//! MCP Tool Execution Context
//!
//! Provides access to server and session state for tool implementations.

use std::time::Instant;

use super::dispatcher::SessionContext;

/// Context provided to tool handlers during execution
#[derive(Clone)]
pub struct ToolContext {
    /// The session the call arrived on, including its SSE outbox
    pub session: SessionContext,

    /// Server version info
    pub server_version: String,

    /// Server start time (for uptime calculation)
    pub start_time: Instant,

    /// Number of tools in the registry serving this call
    pub tool_count: usize,
}

impl ToolContext {
    pub fn session_id(&self) -> &str {
        &self.session.session_id
    }
}
