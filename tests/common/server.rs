//! Test server lifecycle management
//!
//! This module manages spawning and shutting down test HTTP servers.
//! Each test gets an isolated server with its own session store.

use super::constants::*;
use cms_mcp_server::mcp::McpServer;
use cms_mcp_server::server::{make_app, RequestsLoggingLevel, ServerConfig};
use cms_mcp_server::session::{InMemorySessionStore, SessionStore};
use cms_mcp_server::transport::{McpTransport, TransportConfig};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

/// Test server instance with an isolated transport
///
/// When dropped, open SSE streams are closed and the server shuts down.
pub struct TestServer {
    /// Base URL for making requests (e.g., "http://127.0.0.1:12345")
    pub base_url: String,

    /// The port the server is listening on
    pub port: u16,

    /// Direct access to the transport, for server-initiated messages
    pub transport: Arc<McpTransport>,

    _shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

impl TestServer {
    /// Spawns a new test server on a random port with an in-memory store
    pub async fn spawn() -> Self {
        Self::spawn_with(test_transport_config(), Arc::new(InMemorySessionStore::new())).await
    }

    /// Spawns a test server with a custom transport config and session store
    ///
    /// # Panics
    ///
    /// Panics if port binding fails or the server doesn't become ready
    /// within timeout.
    pub async fn spawn_with(config: TransportConfig, store: Arc<dyn SessionStore>) -> Self {
        let transport = Arc::new(McpTransport::new(
            config,
            store,
            Arc::new(McpServer::with_default_tools()),
        ));

        // Bind to random port
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind to random port");

        let port = listener
            .local_addr()
            .expect("Failed to get local address")
            .port();

        let base_url = format!("http://127.0.0.1:{}", port);

        // Create shutdown channel
        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

        let server_config = ServerConfig {
            requests_logging_level: RequestsLoggingLevel::None,
            host: "127.0.0.1".to_string(),
            port,
            metrics_port: None,
        };
        let app = make_app(server_config, transport.clone());

        // Spawn server in background task with graceful shutdown
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    shutdown_rx.await.ok();
                })
                .await
                .expect("Server failed");
        });

        let server = Self {
            base_url,
            port,
            transport,
            _shutdown_tx: Some(shutdown_tx),
        };

        server.wait_for_ready().await;

        server
    }

    /// Waits for the server to become ready by polling the status endpoint
    async fn wait_for_ready(&self) {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(100))
            .build()
            .expect("Failed to build reqwest client");

        let start = std::time::Instant::now();
        let timeout = Duration::from_millis(SERVER_READY_TIMEOUT_MS);

        loop {
            if start.elapsed() > timeout {
                panic!(
                    "Server did not become ready within {}ms",
                    SERVER_READY_TIMEOUT_MS
                );
            }

            match client.get(format!("{}/", self.base_url)).send().await {
                Ok(response) if response.status().is_success() => {
                    return;
                }
                _ => {
                    tokio::time::sleep(Duration::from_millis(SERVER_READY_POLL_INTERVAL_MS)).await;
                }
            }
        }
    }
}

/// Transport settings for tests: no lottery GC, fast stream polling
pub fn test_transport_config() -> TransportConfig {
    TransportConfig {
        gc_probability: 0,
        sse_poll_interval: Duration::from_millis(100),
        ..Default::default()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.transport.close_streams();
        if let Some(tx) = self._shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}
