use anyhow::{Context, Result};
use std::time::Duration;

use axum::{extract::State, middleware, response::IntoResponse, routing::get, Json, Router};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::{log_requests, metrics::metrics_handler, state::*, ServerConfig};
use crate::mcp::handler::server_version;
use crate::mcp::protocol::MCP_PROTOCOL_VERSION;
use crate::transport::make_mcp_routes;

#[derive(Serialize)]
struct ServerStats {
    pub uptime: String,
    pub version: String,
    pub protocol_version: &'static str,
    pub open_sessions: usize,
}

fn format_uptime(duration: Duration) -> String {
    let total_seconds = duration.as_secs();

    let days = total_seconds / 86_400;
    let hours = (total_seconds % 86_400) / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    format!("{}d {:02}:{:02}:{:02}", days, hours, minutes, seconds)
}

async fn home(State(state): State<ServerState>) -> impl IntoResponse {
    let stats = ServerStats {
        uptime: format_uptime(state.start_time.elapsed()),
        version: server_version(),
        protocol_version: MCP_PROTOCOL_VERSION,
        open_sessions: state.transport.open_sessions(),
    };
    Json(stats)
}

pub fn make_app(config: ServerConfig, transport: GuardedTransport) -> Router {
    let state = ServerState::new(config, transport);

    let mcp_routes = make_mcp_routes(state.clone());

    Router::new()
        .route("/", get(home))
        .with_state(state.clone())
        .merge(mcp_routes)
        .layer(middleware::from_fn_with_state(state, log_requests))
}

fn make_metrics_app() -> Router {
    Router::new().route("/metrics", get(metrics_handler))
}

/// Serves the MCP app, and the metrics app when a metrics port is set, until
/// `shutdown` is cancelled.
pub async fn run_server(
    config: ServerConfig,
    transport: GuardedTransport,
    shutdown: CancellationToken,
) -> Result<()> {
    let listener = tokio::net::TcpListener::bind((config.host.as_str(), config.port))
        .await
        .with_context(|| format!("Failed to bind {}:{}", config.host, config.port))?;
    info!("Ready to serve at {}:{}!", config.host, config.port);

    let metrics_listener = match config.metrics_port {
        Some(metrics_port) => {
            let listener = tokio::net::TcpListener::bind((config.host.as_str(), metrics_port))
                .await
                .with_context(|| format!("Failed to bind metrics port {}", metrics_port))?;
            info!("Metrics available at port {}!", metrics_port);
            Some(listener)
        }
        None => None,
    };

    // SSE responses never finish on their own; close them so graceful
    // shutdown can drain the connections.
    let stream_closer = {
        let transport = transport.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            shutdown.cancelled().await;
            transport.close_streams();
        })
    };

    let app = make_app(config, transport);
    let main_server = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.clone().cancelled_owned());

    let result = match metrics_listener {
        Some(metrics_listener) => {
            let metrics_server = axum::serve(metrics_listener, make_metrics_app())
                .with_graceful_shutdown(shutdown.clone().cancelled_owned());
            tokio::try_join!(async { main_server.await }, async {
                metrics_server.await
            })
            .map(|_| ())
        }
        None => main_server.await,
    };

    stream_closer.abort();
    Ok(result?)
}
