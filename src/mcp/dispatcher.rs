//! Contract between the HTTP transport and the protocol layer.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use super::protocol::{McpError, McpRequest};
use crate::transport::{MessageQueue, TransportError};

/// Why a client stopped being reachable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The SSE stream was dropped by the peer. The session itself survives.
    StreamClosed,
    /// The client ended the session with DELETE.
    SessionDeleted,
    /// The session expired and was garbage collected.
    SessionExpired,
    /// `initialize` failed and the freshly minted session was discarded.
    InitializeFailed,
}

impl DisconnectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisconnectReason::StreamClosed => "stream_closed",
            DisconnectReason::SessionDeleted => "deleted",
            DisconnectReason::SessionExpired => "expired",
            DisconnectReason::InitializeFailed => "initialize_failed",
        }
    }
}

/// Write side of a session's SSE stream.
#[derive(Clone)]
pub struct SessionOutbox {
    queue: Arc<MessageQueue>,
    session_id: String,
}

impl SessionOutbox {
    pub(crate) fn new(queue: Arc<MessageQueue>, session_id: String) -> Self {
        Self { queue, session_id }
    }

    /// Queues a message for the session's SSE stream and returns its event id.
    /// Resolves once queued, not once delivered.
    pub fn send<T: Serialize + ?Sized>(&self, message: &T) -> Result<u64, TransportError> {
        let payload = serde_json::to_string(message)?;
        Ok(self.queue.enqueue(&self.session_id, payload)?)
    }
}

/// What a dispatcher knows about the session a message arrived on.
#[derive(Clone)]
pub struct SessionContext {
    pub session_id: String,
    pub outbox: SessionOutbox,
}

/// Receives parsed messages from the transport.
///
/// `handle_message` may produce at most one synchronous result. Returning
/// `Ok(None)` means the reply, if any, goes out through
/// [`SessionContext::outbox`]; the HTTP request is answered with 202.
#[async_trait]
pub trait McpDispatcher: Send + Sync {
    async fn client_connected(&self, _ctx: &SessionContext) {}

    async fn handle_message(
        &self,
        ctx: &SessionContext,
        request: McpRequest,
    ) -> Result<Option<Value>, McpError>;

    async fn client_disconnected(&self, _session_id: &str, _reason: DisconnectReason) {}
}
