use axum::extract::FromRef;
use std::sync::Arc;
use std::time::Instant;

use super::ServerConfig;
use crate::transport::McpTransport;

pub type GuardedTransport = Arc<McpTransport>;

#[derive(Clone)]
pub struct ServerState {
    pub config: ServerConfig,
    pub start_time: Instant,
    pub transport: GuardedTransport,
}

impl ServerState {
    pub fn new(config: ServerConfig, transport: GuardedTransport) -> Self {
        Self {
            config,
            start_time: Instant::now(),
            transport,
        }
    }
}

impl FromRef<ServerState> for ServerConfig {
    fn from_ref(input: &ServerState) -> Self {
        input.config.clone()
    }
}

impl FromRef<ServerState> for GuardedTransport {
    fn from_ref(input: &ServerState) -> Self {
        input.transport.clone()
    }
}
