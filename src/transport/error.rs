use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use super::queue::QueueError;
use crate::mcp::protocol::{McpError, McpResponse, RejectedMessage};
use crate::server::metrics;

/// Client-visible transport failures. Every variant renders as a
/// JSON-RPC error envelope with a fixed HTTP status.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Content-Type must be application/json")]
    UnsupportedMediaType,

    #[error("empty body")]
    EmptyBody,

    #[error("{}", .0.error.message())]
    Rejected(RejectedMessage),

    #[error("missing session id")]
    MissingSession,

    /// Session id supplied to POST or `send_message` is not recognized.
    #[error("Unknown session: {0}")]
    UnknownSession(String),

    /// Session id supplied to the SSE endpoint is not recognized.
    #[error("Session not found: {0}")]
    StreamNotFound(String),

    #[error("Failed to serialize message: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl TransportError {
    pub fn status(&self) -> StatusCode {
        match self {
            TransportError::UnsupportedMediaType => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            TransportError::EmptyBody
            | TransportError::Rejected(_)
            | TransportError::MissingSession
            | TransportError::UnknownSession(_) => StatusCode::BAD_REQUEST,
            TransportError::StreamNotFound(_) => StatusCode::NOT_FOUND,
            TransportError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_type(&self) -> &'static str {
        match self {
            TransportError::UnsupportedMediaType => "unsupported_media_type",
            TransportError::EmptyBody => "empty_body",
            TransportError::Rejected(_) => "rejected_message",
            TransportError::MissingSession => "missing_session",
            TransportError::UnknownSession(_) | TransportError::StreamNotFound(_) => {
                "unknown_session"
            }
            TransportError::Serialization(_) => "serialization",
        }
    }

    pub fn to_rpc_response(&self) -> McpResponse {
        match self {
            TransportError::Rejected(rejected) => {
                McpResponse::error(rejected.id.clone(), rejected.error.clone())
            }
            TransportError::UnknownSession(id) | TransportError::StreamNotFound(id) => {
                McpResponse::error(None, McpError::SessionNotFound(id.clone()))
            }
            TransportError::Serialization(e) => {
                McpResponse::error(None, McpError::InternalError(e.to_string()))
            }
            other => McpResponse::error(None, McpError::InvalidRequest(other.to_string())),
        }
    }
}

impl From<QueueError> for TransportError {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::UnknownSession(id) => TransportError::UnknownSession(id),
        }
    }
}

impl IntoResponse for TransportError {
    fn into_response(self) -> Response {
        metrics::record_error(self.error_type(), "mcp");
        (self.status(), Json(self.to_rpc_response())).into_response()
    }
}
