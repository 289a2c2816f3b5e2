//! End-to-end tests for the MCP HTTP transport
//!
//! Tests the POST/GET/DELETE surface, session lifecycle and SSE delivery.

mod common;

use cms_mcp_server::session::SqliteSessionStore;
use common::{test_transport_config, SseReader, TestClient, TestServer, MESSAGE_ENDPOINT};
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::sync::Arc;

// ============================================================================
// Session lifecycle
// ============================================================================

#[tokio::test]
async fn test_initialize_list_delete_lifecycle() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());

    let session_id = client.initialize().await;
    assert!(session_id.starts_with("mcp_"));
    assert_eq!(session_id.len(), 4 + 64);

    // Notification: accepted, nothing returned
    let response = client
        .post_message(
            Some(&session_id),
            &json!({ "jsonrpc": "2.0", "method": "notifications/initialized" }),
        )
        .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert!(response.text().await.unwrap().is_empty());

    let response = client.list_tools(&session_id, 2).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response
            .headers()
            .get("mcp-session-id")
            .unwrap()
            .to_str()
            .unwrap(),
        session_id
    );
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["jsonrpc"], "2.0");
    assert_eq!(body["id"], 2);
    let tools = body["result"]["tools"].as_array().unwrap();
    assert!(tools.iter().any(|t| t["name"] == "server.info"));
    assert!(tools.iter().any(|t| t["name"] == "session.notify"));

    let response = client.delete_session(Some(&session_id)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["success"], true);

    // The session is gone for both POST and GET
    let response = client.ping(&session_id, 3).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["code"], -32001);

    let response = client.open_stream(&session_id, None).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_initialize_error_does_not_create_session() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());

    let response = client
        .post_message(
            None,
            &json!({
                "jsonrpc": "2.0",
                "id": 1,
                "method": "initialize",
                "params": { "clientInfo": "not an object" }
            }),
        )
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().get("mcp-session-id").is_none());
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["code"], -32602);
    assert_eq!(server.transport.open_sessions(), 0);
}

#[tokio::test]
async fn test_session_id_accepted_from_query_string() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());
    let session_id = client.initialize().await;

    let response = client
        .client
        .post(format!(
            "{}{}?sessionId={}",
            server.base_url, MESSAGE_ENDPOINT, session_id
        ))
        .header("content-type", "application/json")
        .body(json!({ "jsonrpc": "2.0", "id": 5, "method": "ping" }).to_string())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["id"], 5);
    assert_eq!(body["result"], json!({}));

    let response = client
        .client
        .post(format!("{}/mcp?clientId={}", server.base_url, session_id))
        .header("content-type", "application/json")
        .body(json!({ "jsonrpc": "2.0", "id": 6, "method": "ping" }).to_string())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_delete_is_idempotent() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());
    let session_id = client.initialize().await;

    for _ in 0..2 {
        let response = client.delete_session(Some(&session_id)).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = client.delete_session(None).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_status_reports_open_sessions() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());

    client.initialize().await;
    client.initialize().await;

    let response = client.get_status().await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["open_sessions"], 2);
    assert!(body["version"].is_string());
}

// ============================================================================
// Request validation
// ============================================================================

#[tokio::test]
async fn test_rejects_non_json_content_type() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());

    let response = client
        .post_raw("text/plain", None, r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#)
        .await;
    assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["code"], -32600);
}

#[tokio::test]
async fn test_rejects_empty_body() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());

    let response = client.post_raw("application/json", None, "  ").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["code"], -32600);
    assert_eq!(body["error"]["message"], "Invalid request: empty body");
    assert_eq!(body["id"], Value::Null);
}

#[tokio::test]
async fn test_rejects_malformed_json() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());

    let response = client
        .post_raw("application/json; charset=utf-8", None, "{not json")
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["code"], -32700);
}

#[tokio::test]
async fn test_rejects_batches() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());

    let response = client
        .post_message(
            None,
            &json!([{ "jsonrpc": "2.0", "id": 1, "method": "ping" }]),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["code"], -32600);
}

#[tokio::test]
async fn test_requires_session_for_non_initialize() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());

    let response = client
        .post_message(None, &json!({ "jsonrpc": "2.0", "id": 1, "method": "ping" }))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = client.ping("mcp_unknown", 1).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["code"], -32001);
}

#[tokio::test]
async fn test_unknown_method_is_rpc_error() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());
    let session_id = client.initialize().await;

    let response = client
        .post_message(
            Some(&session_id),
            &json!({ "jsonrpc": "2.0", "id": "abc", "method": "resources/list" }),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["id"], "abc");
    assert_eq!(body["error"]["code"], -32601);
}

// ============================================================================
// SSE delivery
// ============================================================================

#[tokio::test]
async fn test_stream_starts_with_endpoint_event() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());
    let session_id = client.initialize().await;

    let response = client.open_stream(&session_id, None).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap()
        .starts_with("text/event-stream"));
    assert_eq!(
        response.headers().get("x-accel-buffering").unwrap(),
        "no"
    );

    let mut reader = SseReader::new(response);
    let event = reader.next_event().await.unwrap();
    assert_eq!(event.event.as_deref(), Some("endpoint"));
    assert_eq!(
        event.data,
        format!("{}?sessionId={}", MESSAGE_ENDPOINT, session_id)
    );
}

#[tokio::test]
async fn test_tool_notification_arrives_on_stream() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());
    let session_id = client.initialize().await;

    let mut reader = SseReader::new(client.open_stream(&session_id, None).await);
    assert_eq!(
        reader.next_event().await.unwrap().event.as_deref(),
        Some("endpoint")
    );

    let response = client
        .call_tool(
            &session_id,
            7,
            "session.notify",
            json!({ "message": "catalog rebuilt", "level": "notice" }),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    let result_text = body["result"]["content"][0]["text"].as_str().unwrap();
    let result: Value = serde_json::from_str(result_text).unwrap();
    assert_eq!(result["event_id"], 1);

    let event = reader.next_event().await.unwrap();
    assert_eq!(event.event.as_deref(), Some("message"));
    assert_eq!(event.id.as_deref(), Some("1"));
    let message = event.json();
    assert_eq!(message["method"], "notifications/message");
    assert_eq!(message["params"]["level"], "notice");
    assert_eq!(message["params"]["data"]["message"], "catalog rebuilt");
}

#[tokio::test]
async fn test_server_push_preserves_order() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());
    let session_id = client.initialize().await;

    let mut reader = SseReader::new(client.open_stream(&session_id, None).await);
    reader.next_event().await.unwrap();

    for i in 0..3 {
        server
            .transport
            .send_message(
                &session_id,
                &json!({ "jsonrpc": "2.0", "method": "notifications/progress", "params": { "i": i } }),
            )
            .await
            .unwrap();
    }

    for (expected, seq) in (0..3).zip(1..) {
        let event = reader.next_event().await.unwrap();
        assert_eq!(event.id, Some(seq.to_string()));
        assert_eq!(event.json()["params"]["i"], expected);
    }
}

#[tokio::test]
async fn test_messages_queued_before_stream_are_delivered() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());
    let session_id = client.initialize().await;

    server
        .transport
        .send_message(&session_id, &json!({ "jsonrpc": "2.0", "method": "early" }))
        .await
        .unwrap();

    let mut reader = SseReader::new(client.open_stream(&session_id, None).await);
    assert_eq!(
        reader.next_event().await.unwrap().event.as_deref(),
        Some("endpoint")
    );
    let event = reader.next_event().await.unwrap();
    assert_eq!(event.json()["method"], "early");
}

#[tokio::test]
async fn test_resume_with_last_event_id() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());
    let session_id = client.initialize().await;

    for i in 1..=3 {
        server
            .transport
            .send_message(
                &session_id,
                &json!({ "jsonrpc": "2.0", "method": "tick", "params": { "n": i } }),
            )
            .await
            .unwrap();
    }

    {
        let mut reader = SseReader::new(client.open_stream(&session_id, None).await);
        reader.next_event().await.unwrap();
        for _ in 0..3 {
            reader.next_event().await.unwrap();
        }
    }

    let mut reader = SseReader::new(client.open_stream(&session_id, Some(1)).await);
    assert_eq!(
        reader.next_event().await.unwrap().event.as_deref(),
        Some("endpoint")
    );
    let ids: Vec<Option<String>> = vec![
        reader.next_event().await.unwrap().id,
        reader.next_event().await.unwrap().id,
    ];
    assert_eq!(ids, vec![Some("2".to_string()), Some("3".to_string())]);
}

#[tokio::test]
async fn test_stream_ends_when_session_deleted() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());
    let session_id = client.initialize().await;

    let mut reader = SseReader::new(client.open_stream(&session_id, None).await);
    reader.next_event().await.unwrap();

    client.delete_session(Some(&session_id)).await;

    assert!(reader.next_event().await.is_none());
}

#[tokio::test]
async fn test_newer_stream_replaces_older_one() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());
    let session_id = client.initialize().await;

    let mut first = SseReader::new(client.open_stream(&session_id, None).await);
    first.next_event().await.unwrap();

    let mut second = SseReader::new(client.open_stream(&session_id, None).await);
    second.next_event().await.unwrap();

    assert!(first.next_event().await.is_none());

    server
        .transport
        .send_message(&session_id, &json!({ "jsonrpc": "2.0", "method": "only-once" }))
        .await
        .unwrap();
    let event = second.next_event().await.unwrap();
    assert_eq!(event.json()["method"], "only-once");
}

#[tokio::test]
async fn test_send_to_unknown_session_fails() {
    let server = TestServer::spawn().await;

    let result = server
        .transport
        .send_message("mcp_nobody", &json!({ "jsonrpc": "2.0", "method": "x" }))
        .await;
    assert!(result.is_err());
}

// ============================================================================
// Persistence
// ============================================================================

#[tokio::test]
async fn test_sqlite_sessions_survive_restart() {
    let temp_dir = tempfile::TempDir::new().unwrap();
    let db_path = temp_dir.path().join("sessions.db");

    let session_id = {
        let store = Arc::new(SqliteSessionStore::new(&db_path).unwrap());
        let server = TestServer::spawn_with(test_transport_config(), store).await;
        let client = TestClient::new(server.base_url.clone());
        client.initialize().await
    };

    let store = Arc::new(SqliteSessionStore::new(&db_path).unwrap());
    let server = TestServer::spawn_with(test_transport_config(), store).await;
    let client = TestClient::new(server.base_url.clone());

    let response = client.ping(&session_id, 2).await;
    assert_eq!(response.status(), StatusCode::OK);

    let mut reader = SseReader::new(client.open_stream(&session_id, None).await);
    assert_eq!(
        reader.next_event().await.unwrap().event.as_deref(),
        Some("endpoint")
    );
}
