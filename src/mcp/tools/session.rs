//! Session Tools
//!
//! Tools that talk back to the calling session over its SSE stream.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::mcp::context::ToolContext;
use crate::mcp::handler::SERVER_NAME;
use crate::mcp::protocol::{methods, McpError, McpNotification, ToolsCallResult};
use crate::mcp::registry::{McpRegistry, RegisteredTool, ToolBuilder, ToolResult};

/// Register session tools with the registry
pub fn register_tools(registry: &mut McpRegistry) {
    registry.register_tool(session_notify_tool());
}

// ============================================================================
// session.notify
// ============================================================================

/// MCP logging levels, lowest to highest.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
enum LogLevel {
    Debug,
    #[default]
    Info,
    Notice,
    Warning,
    Error,
    Critical,
    Alert,
    Emergency,
}

#[derive(Debug, Deserialize)]
struct SessionNotifyParams {
    message: String,
    #[serde(default)]
    level: LogLevel,
    #[serde(default)]
    data: Option<Value>,
}

#[derive(Debug, Serialize)]
struct SessionNotifyResult {
    event_id: u64,
}

fn session_notify_tool() -> RegisteredTool {
    ToolBuilder::new("session.notify")
        .description(
            "Push a notifications/message event to this session's SSE stream and \
             return the assigned event id",
        )
        .input_schema(json!({
            "type": "object",
            "properties": {
                "message": {
                    "type": "string",
                    "description": "Text delivered to the client"
                },
                "level": {
                    "type": "string",
                    "enum": ["debug", "info", "notice", "warning", "error", "critical", "alert", "emergency"],
                    "description": "Log level of the notification (default: info)"
                },
                "data": {
                    "description": "Optional structured payload sent alongside the message"
                }
            },
            "required": ["message"]
        }))
        .build(session_notify_handler)
}

async fn session_notify_handler(ctx: ToolContext, params: Value) -> ToolResult {
    let params: SessionNotifyParams =
        serde_json::from_value(params).map_err(|e| McpError::InvalidParams(e.to_string()))?;

    let mut data = json!({ "message": params.message });
    if let Some(extra) = params.data {
        data["data"] = extra;
    }
    let notification = McpNotification::new(
        methods::NOTIFICATION_MESSAGE,
        Some(json!({
            "level": params.level,
            "logger": SERVER_NAME,
            "data": data,
        })),
    );

    let event_id = ctx
        .session
        .outbox
        .send(&notification)
        .map_err(|e| McpError::ToolExecutionFailed(e.to_string()))?;

    ToolsCallResult::json(&SessionNotifyResult { event_id })
        .map_err(|e| McpError::InternalError(e.to_string()))
}
