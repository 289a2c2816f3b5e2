//! HTTP client for end-to-end tests
//!
//! This module provides a high-level HTTP client that wraps reqwest
//! and provides methods for all MCP transport endpoints, plus a small
//! reader for the SSE stream.
//!
//! When API routes or request formats change, update only this file.

use super::constants::*;
use axum::body::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use reqwest::Response;
use serde_json::{json, Value};
use std::time::Duration;

/// HTTP test client speaking JSON-RPC over the MCP transport
pub struct TestClient {
    /// The underlying reqwest client (public for custom requests in tests)
    pub client: reqwest::Client,
    /// The base URL of the test server
    pub base_url: String,
    /// Client without a total timeout, for long-lived SSE responses
    stream_client: reqwest::Client,
}

impl TestClient {
    pub fn new(base_url: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .expect("Failed to build reqwest client");
        let stream_client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .expect("Failed to build reqwest client");

        Self {
            client,
            base_url,
            stream_client,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    // ========================================================================
    // POST
    // ========================================================================

    /// Sends `body` as-is with the given content type
    pub async fn post_raw(
        &self,
        content_type: &str,
        session_id: Option<&str>,
        body: impl Into<reqwest::Body>,
    ) -> Response {
        let mut request = self
            .client
            .post(self.url("/mcp"))
            .header("content-type", content_type)
            .body(body);
        if let Some(id) = session_id {
            request = request.header(SESSION_HEADER, id);
        }
        request.send().await.expect("POST /mcp failed")
    }

    /// Sends one JSON-RPC message
    pub async fn post_message(&self, session_id: Option<&str>, message: &Value) -> Response {
        self.post_raw("application/json", session_id, message.to_string())
            .await
    }

    /// Runs `initialize` and returns the minted session id
    ///
    /// # Panics
    ///
    /// Panics if the server does not answer with 200 and a session header.
    pub async fn initialize(&self) -> String {
        let response = self
            .post_message(
                None,
                &json!({
                    "jsonrpc": "2.0",
                    "id": 1,
                    "method": "initialize",
                    "params": {
                        "protocolVersion": TEST_PROTOCOL_VERSION,
                        "capabilities": {},
                        "clientInfo": { "name": TEST_CLIENT_NAME, "version": "1.0.0" }
                    }
                }),
            )
            .await;
        assert_eq!(response.status(), reqwest::StatusCode::OK);

        response
            .headers()
            .get(SESSION_HEADER)
            .expect("initialize response has no session header")
            .to_str()
            .expect("session header is not ASCII")
            .to_string()
    }

    pub async fn ping(&self, session_id: &str, id: u64) -> Response {
        self.post_message(
            Some(session_id),
            &json!({ "jsonrpc": "2.0", "id": id, "method": "ping" }),
        )
        .await
    }

    pub async fn list_tools(&self, session_id: &str, id: u64) -> Response {
        self.post_message(
            Some(session_id),
            &json!({ "jsonrpc": "2.0", "id": id, "method": "tools/list" }),
        )
        .await
    }

    pub async fn call_tool(
        &self,
        session_id: &str,
        id: u64,
        name: &str,
        arguments: Value,
    ) -> Response {
        self.post_message(
            Some(session_id),
            &json!({
                "jsonrpc": "2.0",
                "id": id,
                "method": "tools/call",
                "params": { "name": name, "arguments": arguments }
            }),
        )
        .await
    }

    // ========================================================================
    // GET / DELETE
    // ========================================================================

    /// Opens the SSE stream, passing the session id in the query string
    pub async fn open_stream(&self, session_id: &str, last_event_id: Option<u64>) -> Response {
        let mut request = self
            .stream_client
            .get(self.url("/mcp"))
            .query(&[("sessionId", session_id)])
            .header("accept", "text/event-stream");
        if let Some(last) = last_event_id {
            request = request.header("last-event-id", last.to_string());
        }
        request.send().await.expect("GET /mcp failed")
    }

    pub async fn delete_session(&self, session_id: Option<&str>) -> Response {
        let mut request = self.client.delete(self.url("/mcp"));
        if let Some(id) = session_id {
            request = request.header(SESSION_HEADER, id);
        }
        request.send().await.expect("DELETE /mcp failed")
    }

    pub async fn get_status(&self) -> Response {
        self.client
            .get(self.url("/"))
            .send()
            .await
            .expect("GET / failed")
    }
}

/// One dispatched SSE event
#[derive(Debug, Clone, Default)]
pub struct SseEvent {
    pub event: Option<String>,
    pub id: Option<String>,
    pub data: String,
}

impl SseEvent {
    pub fn json(&self) -> Value {
        serde_json::from_str(&self.data).expect("SSE data is not JSON")
    }
}

/// Incremental reader over an SSE response body
pub struct SseReader {
    stream: BoxStream<'static, reqwest::Result<Bytes>>,
    buffer: String,
}

impl SseReader {
    pub fn new(response: Response) -> Self {
        Self {
            stream: response.bytes_stream().boxed(),
            buffer: String::new(),
        }
    }

    /// Next event, skipping keep-alive comments. `None` once the server
    /// closes the stream.
    ///
    /// # Panics
    ///
    /// Panics if nothing arrives within `SSE_EVENT_TIMEOUT_MS`.
    pub async fn next_event(&mut self) -> Option<SseEvent> {
        loop {
            if let Some(end) = self.buffer.find("\n\n") {
                let frame: String = self.buffer.drain(..end + 2).collect();
                if let Some(event) = parse_frame(&frame) {
                    return Some(event);
                }
                continue;
            }

            let chunk = tokio::time::timeout(
                Duration::from_millis(SSE_EVENT_TIMEOUT_MS),
                self.stream.next(),
            )
            .await
            .expect("Timed out waiting for SSE event");

            match chunk {
                Some(Ok(bytes)) => {
                    self.buffer
                        .push_str(&String::from_utf8_lossy(&bytes).replace("\r\n", "\n"));
                }
                Some(Err(_)) | None => return None,
            }
        }
    }
}

fn parse_frame(frame: &str) -> Option<SseEvent> {
    let mut event = SseEvent::default();
    let mut data_lines = Vec::new();

    for line in frame.lines() {
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        let (field, value) = line.split_once(':').unwrap_or((line, ""));
        let value = value.strip_prefix(' ').unwrap_or(value);
        match field {
            "event" => event.event = Some(value.to_string()),
            "id" => event.id = Some(value.to_string()),
            "data" => data_lines.push(value.to_string()),
            _ => {}
        }
    }

    if event.event.is_none() && data_lines.is_empty() {
        return None;
    }
    event.data = data_lines.join("\n");
    Some(event)
}
