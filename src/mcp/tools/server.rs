//! Server Tools
//!
//! Tools for querying server status and information.

use serde::Serialize;
use serde_json::Value;

use crate::mcp::context::ToolContext;
use crate::mcp::handler::SERVER_NAME;
use crate::mcp::protocol::{McpError, ToolsCallResult, MCP_PROTOCOL_VERSION};
use crate::mcp::registry::{McpRegistry, RegisteredTool, ToolBuilder, ToolResult};

/// Register server tools with the registry
pub fn register_tools(registry: &mut McpRegistry) {
    registry.register_tool(server_info_tool());
}

// ============================================================================
// server.info
// ============================================================================

#[derive(Debug, Serialize)]
struct ServerInfoResult {
    name: &'static str,
    version: String,
    protocol_version: &'static str,
    uptime_secs: u64,
    tools: usize,
    session_id: String,
}

fn server_info_tool() -> RegisteredTool {
    ToolBuilder::new("server.info")
        .description("Get server version, uptime and protocol information")
        .build(server_info_handler)
}

async fn server_info_handler(ctx: ToolContext, _params: Value) -> ToolResult {
    let result = ServerInfoResult {
        name: SERVER_NAME,
        version: ctx.server_version.clone(),
        protocol_version: MCP_PROTOCOL_VERSION,
        uptime_secs: ctx.start_time.elapsed().as_secs(),
        tools: ctx.tool_count,
        session_id: ctx.session_id().to_string(),
    };

    ToolsCallResult::json(&result).map_err(|e| McpError::InternalError(e.to_string()))
}
