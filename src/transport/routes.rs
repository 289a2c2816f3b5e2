use axum::{
    body::Bytes,
    extract::{rejection::QueryRejection, Query, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tracing::debug;

use super::PostOutcome;
use crate::server::state::{GuardedTransport, ServerState};

pub const MCP_SESSION_ID_HEADER: &str = "mcp-session-id";
const LAST_EVENT_ID_HEADER: &str = "last-event-id";

/// Query-string fallbacks for clients that cannot set headers (EventSource).
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionQuery {
    session_id: Option<String>,
    client_id: Option<String>,
    last_event_id: Option<String>,
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Header first, then `sessionId`, then `clientId`.
fn session_id_from(headers: &HeaderMap, query: &SessionQuery) -> Option<String> {
    non_empty(
        headers
            .get(MCP_SESSION_ID_HEADER)
            .and_then(|v| v.to_str().ok()),
    )
    .or_else(|| non_empty(query.session_id.as_deref()))
    .or_else(|| non_empty(query.client_id.as_deref()))
}

/// A query string that does not deserialize (duplicate keys, bad encoding)
/// is treated as absent so every verb still answers with its own contract.
fn query_or_default(query: Result<Query<SessionQuery>, QueryRejection>) -> SessionQuery {
    match query {
        Ok(Query(query)) => query,
        Err(rejection) => {
            debug!("Ignoring unparseable query string: {}", rejection.body_text());
            SessionQuery::default()
        }
    }
}

/// Unparseable values are ignored and the stream starts fresh.
fn last_event_id_from(headers: &HeaderMap, query: &SessionQuery) -> Option<u64> {
    headers
        .get(LAST_EVENT_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .or(query.last_event_id.as_deref())
        .and_then(|v| v.trim().parse::<u64>().ok())
}

fn with_session_header(mut response: Response, session_id: &str) -> Response {
    if let Ok(value) = HeaderValue::from_str(session_id) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(MCP_SESSION_ID_HEADER), value);
    }
    response
}

async fn post_message(
    State(transport): State<GuardedTransport>,
    query: Result<Query<SessionQuery>, QueryRejection>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok());
    let query = query_or_default(query);
    let session_id = session_id_from(&headers, &query);

    match transport.handle_post(content_type, session_id, &body).await {
        Ok(PostOutcome {
            session_id,
            response,
        }) => {
            let http_response = match response {
                Some(rpc) => (StatusCode::OK, Json(rpc)).into_response(),
                None => StatusCode::ACCEPTED.into_response(),
            };
            match session_id {
                Some(id) => with_session_header(http_response, &id),
                None => http_response,
            }
        }
        Err(e) => e.into_response(),
    }
}

async fn open_event_stream(
    State(transport): State<GuardedTransport>,
    query: Result<Query<SessionQuery>, QueryRejection>,
    headers: HeaderMap,
) -> Response {
    let query = query_or_default(query);
    let session_id = session_id_from(&headers, &query);
    let last_event_id = last_event_id_from(&headers, &query);

    match transport.open_stream(session_id.clone(), last_event_id).await {
        Ok(sse) => {
            let response = (
                [
                    (HeaderName::from_static("x-accel-buffering"), "no"),
                    (header::CONNECTION, "keep-alive"),
                ],
                sse,
            )
                .into_response();
            match session_id {
                Some(id) => with_session_header(response, &id),
                None => response,
            }
        }
        Err(e) => e.into_response(),
    }
}

async fn delete_session(
    State(transport): State<GuardedTransport>,
    query: Result<Query<SessionQuery>, QueryRejection>,
    headers: HeaderMap,
) -> Json<serde_json::Value> {
    let query = query_or_default(query);
    let session_id = session_id_from(&headers, &query);
    transport.handle_delete(session_id.as_deref()).await;
    Json(json!({ "success": true }))
}

/// `/mcp` serves all three verbs. The announced message endpoint, when it
/// differs, accepts POST and DELETE too.
pub fn make_mcp_routes(state: ServerState) -> Router {
    let message_endpoint = state.transport.config().message_endpoint.clone();

    let mut router = Router::new().route(
        "/mcp",
        post(post_message)
            .get(open_event_stream)
            .delete(delete_session),
    );
    if message_endpoint != "/mcp" {
        router = router.route(
            &message_endpoint,
            post(post_message).delete(delete_session),
        );
    }

    router.layer(CorsLayer::permissive()).with_state(state)
}
