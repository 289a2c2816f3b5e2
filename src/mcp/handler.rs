//! Built-in MCP dispatcher.
//!
//! Routes JSON-RPC methods to handlers and tool calls to the registry.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info};

use super::context::ToolContext;
use super::dispatcher::{DisconnectReason, McpDispatcher, SessionContext};
use super::protocol::{
    methods, InitializeParams, InitializeResult, McpError, McpRequest, PingResult,
    ServerCapabilities, ServerInfo, ToolsCallParams, ToolsCapability, ToolsListResult,
    MCP_PROTOCOL_VERSION,
};
use super::registry::McpRegistry;

pub const SERVER_NAME: &str = "cms-mcp-server";

pub fn server_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

pub struct McpServer {
    registry: Arc<McpRegistry>,
    start_time: Instant,
}

impl McpServer {
    pub fn new(registry: McpRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
            start_time: Instant::now(),
        }
    }

    /// Server with only the built-in tools registered
    pub fn with_default_tools() -> Self {
        let mut registry = McpRegistry::new();
        super::tools::register_all_tools(&mut registry);
        info!(
            "MCP registry initialized with {} tools",
            registry.tool_count()
        );
        Self::new(registry)
    }

    pub fn registry(&self) -> &McpRegistry {
        &self.registry
    }

    fn tool_context(&self, session: &SessionContext) -> ToolContext {
        ToolContext {
            session: session.clone(),
            server_version: server_version(),
            start_time: self.start_time,
            tool_count: self.registry.tool_count(),
        }
    }

    async fn handle_tools_call(
        &self,
        ctx: &SessionContext,
        request: &McpRequest,
    ) -> Result<Value, McpError> {
        let params: ToolsCallParams = request
            .params
            .clone()
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| McpError::InvalidParams(e.to_string()))?
            .ok_or_else(|| McpError::InvalidParams("Missing params".to_string()))?;

        let tool = self
            .registry
            .get_tool(&params.name)
            .ok_or_else(|| McpError::MethodNotFound(format!("Unknown tool: {}", params.name)))?;

        debug!("Session {} calling tool {}", ctx.session_id, params.name);
        let arguments = params.arguments.unwrap_or(serde_json::json!({}));
        let result = (tool.handler)(self.tool_context(ctx), arguments).await?;

        serde_json::to_value(result).map_err(|e| McpError::InternalError(e.to_string()))
    }
}

#[async_trait]
impl McpDispatcher for McpServer {
    async fn client_connected(&self, ctx: &SessionContext) {
        debug!("MCP client connected on session {}", ctx.session_id);
    }

    async fn handle_message(
        &self,
        ctx: &SessionContext,
        request: McpRequest,
    ) -> Result<Option<Value>, McpError> {
        match request.method.as_str() {
            methods::INITIALIZE => handle_initialize(&request).map(Some),
            methods::PING => handle_ping().map(Some),
            methods::TOOLS_LIST => handle_tools_list(&self.registry).map(Some),
            methods::TOOLS_CALL => self.handle_tools_call(ctx, &request).await.map(Some),
            // Client is disconnecting gracefully
            methods::SHUTDOWN => Ok(None),
            m if m.starts_with(methods::NOTIFICATION_PREFIX) => Ok(None),
            other => Err(McpError::MethodNotFound(other.to_string())),
        }
    }

    async fn client_disconnected(&self, session_id: &str, reason: DisconnectReason) {
        debug!(
            "MCP client on session {} disconnected ({})",
            session_id,
            reason.as_str()
        );
    }
}

fn handle_initialize(request: &McpRequest) -> Result<Value, McpError> {
    let params: InitializeParams = request
        .params
        .clone()
        .map(serde_json::from_value)
        .transpose()
        .map_err(|e| McpError::InvalidParams(e.to_string()))?
        .unwrap_or_default();

    if let Some(client) = &params.client_info {
        info!(
            "MCP client {} {} initializing (protocol {})",
            client.name,
            client.version.as_deref().unwrap_or("?"),
            params.protocol_version.as_deref().unwrap_or("?")
        );
    }

    let result = InitializeResult {
        protocol_version: MCP_PROTOCOL_VERSION.to_string(),
        capabilities: ServerCapabilities {
            tools: Some(ToolsCapability { list_changed: None }),
            logging: Some(serde_json::json!({})),
        },
        server_info: ServerInfo {
            name: SERVER_NAME.to_string(),
            version: server_version(),
        },
    };

    serde_json::to_value(result).map_err(|e| McpError::InternalError(e.to_string()))
}

fn handle_ping() -> Result<Value, McpError> {
    serde_json::to_value(PingResult {}).map_err(|e| McpError::InternalError(e.to_string()))
}

fn handle_tools_list(registry: &McpRegistry) -> Result<Value, McpError> {
    let result = ToolsListResult {
        tools: registry.get_available_tools(),
    };

    serde_json::to_value(result).map_err(|e| McpError::InternalError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::dispatcher::SessionOutbox;
    use crate::mcp::protocol::RequestId;
    use crate::transport::MessageQueue;
    use serde_json::json;

    fn session() -> (Arc<MessageQueue>, SessionContext) {
        let queue = Arc::new(MessageQueue::new(16, 16));
        queue.open("s1");
        let ctx = SessionContext {
            session_id: "s1".to_string(),
            outbox: SessionOutbox::new(queue.clone(), "s1".to_string()),
        };
        (queue, ctx)
    }

    fn request(method: &str, params: Option<Value>) -> McpRequest {
        McpRequest::new(Some(RequestId::Number(1)), method, params)
    }

    #[tokio::test]
    async fn test_initialize_advertises_tools() {
        let server = McpServer::with_default_tools();
        let (_queue, ctx) = session();

        let result = server
            .handle_message(
                &ctx,
                request(
                    methods::INITIALIZE,
                    Some(json!({
                        "protocolVersion": "2024-11-05",
                        "clientInfo": { "name": "test", "version": "1.0" }
                    })),
                ),
            )
            .await
            .unwrap()
            .unwrap();

        assert_eq!(result["protocolVersion"], MCP_PROTOCOL_VERSION);
        assert_eq!(result["serverInfo"]["name"], SERVER_NAME);
        assert!(result["capabilities"]["tools"].is_object());
    }

    #[tokio::test]
    async fn test_initialize_rejects_malformed_params() {
        let server = McpServer::with_default_tools();
        let (_queue, ctx) = session();

        let err = server
            .handle_message(
                &ctx,
                request(methods::INITIALIZE, Some(json!({ "clientInfo": 42 }))),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), -32602);
    }

    #[tokio::test]
    async fn test_notifications_have_no_result() {
        let server = McpServer::with_default_tools();
        let (_queue, ctx) = session();

        let notification = McpRequest::new(None, methods::INITIALIZED, None);
        assert!(server
            .handle_message(&ctx, notification)
            .await
            .unwrap()
            .is_none());

        let cancelled = McpRequest::new(None, "notifications/cancelled", None);
        assert!(server.handle_message(&ctx, cancelled).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let server = McpServer::with_default_tools();
        let (_queue, ctx) = session();

        let err = server
            .handle_message(&ctx, request("resources/list", None))
            .await
            .unwrap_err();
        assert_eq!(err.code(), -32601);
    }

    #[tokio::test]
    async fn test_tools_list_and_call() {
        let server = McpServer::with_default_tools();
        let (_queue, ctx) = session();

        let list = server
            .handle_message(&ctx, request(methods::TOOLS_LIST, None))
            .await
            .unwrap()
            .unwrap();
        let names: Vec<&str> = list["tools"]
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["name"].as_str().unwrap())
            .collect();
        assert!(names.contains(&"server.info"));
        assert!(names.contains(&"session.notify"));

        let call = server
            .handle_message(
                &ctx,
                request(methods::TOOLS_CALL, Some(json!({ "name": "server.info" }))),
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(call["content"][0]["type"], "text");
    }

    #[tokio::test]
    async fn test_tools_call_errors() {
        let server = McpServer::with_default_tools();
        let (_queue, ctx) = session();

        let err = server
            .handle_message(&ctx, request(methods::TOOLS_CALL, None))
            .await
            .unwrap_err();
        assert_eq!(err.code(), -32602);

        let err = server
            .handle_message(
                &ctx,
                request(methods::TOOLS_CALL, Some(json!({ "name": "nope" }))),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), -32601);
    }
}
