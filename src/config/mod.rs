mod file_config;

pub use file_config::{FileConfig, SessionConfig, TransportFileConfig};

use crate::server::{RequestsLoggingLevel, ServerConfig};
use crate::transport::TransportConfig;
use anyhow::{bail, Result};
use clap::ValueEnum;
use std::path::PathBuf;
use std::time::Duration;

/// Longest accepted session lifetime, one year.
const MAX_SESSION_TTL_SEC: u64 = 365 * 24 * 60 * 60;

/// Where session records live.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum SessionBackend {
    #[default]
    Memory,
    Sqlite,
}

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone)]
pub struct CliConfig {
    pub host: String,
    pub port: u16,
    pub metrics_port: u16,
    pub logging_level: RequestsLoggingLevel,
    pub session_backend: SessionBackend,
    pub session_db_path: Option<PathBuf>,
    pub session_ttl_sec: u64,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3001,
            metrics_port: 9091,
            logging_level: RequestsLoggingLevel::Path,
            session_backend: SessionBackend::Memory,
            session_db_path: None,
            session_ttl_sec: 3600,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    /// 0 disables the metrics server
    pub metrics_port: u16,
    pub logging_level: RequestsLoggingLevel,

    pub session: SessionSettings,
    pub transport: TransportConfig,
}

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub backend: SessionBackend,
    pub db_path: Option<PathBuf>,
    pub ttl: Duration,
    pub gc_probability: u32,
    pub gc_divisor: u32,
    /// `None` when background GC is disabled
    pub gc_interval: Option<Duration>,
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        // TOML overrides CLI for each field
        let host = file.host.unwrap_or_else(|| cli.host.clone());
        let port = file.port.unwrap_or(cli.port);
        let metrics_port = file.metrics_port.unwrap_or(cli.metrics_port);

        let logging_level = file
            .logging_level
            .and_then(|s| parse_logging_level(&s))
            .unwrap_or_else(|| cli.logging_level.clone());

        let session_file = file.session.unwrap_or_default();
        let backend = match session_file.backend {
            Some(s) => match SessionBackend::from_str(&s, true) {
                Ok(backend) => backend,
                Err(_) => bail!("Unknown session backend: {:?}", s),
            },
            None => cli.session_backend,
        };
        let db_path = session_file
            .db_path
            .map(PathBuf::from)
            .or_else(|| cli.session_db_path.clone());
        if backend == SessionBackend::Sqlite && db_path.is_none() {
            bail!("The sqlite session backend requires session.db_path or --session-db-path");
        }

        let ttl_sec = session_file.ttl_sec.unwrap_or(cli.session_ttl_sec);
        if ttl_sec == 0 {
            bail!("session.ttl_sec must be greater than 0");
        }
        if ttl_sec > MAX_SESSION_TTL_SEC {
            bail!(
                "session.ttl_sec ({}) cannot exceed {} (one year)",
                ttl_sec,
                MAX_SESSION_TTL_SEC
            );
        }
        let gc_probability = session_file.gc_probability.unwrap_or(2);
        let gc_divisor = session_file.gc_divisor.unwrap_or(100);
        if gc_divisor == 0 {
            bail!("session.gc_divisor must be greater than 0");
        }
        if gc_probability > gc_divisor {
            bail!(
                "session.gc_probability ({}) cannot exceed session.gc_divisor ({})",
                gc_probability,
                gc_divisor
            );
        }
        let gc_interval = match session_file.gc_interval_sec.unwrap_or(300) {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };

        let session = SessionSettings {
            backend,
            db_path,
            ttl: Duration::from_secs(ttl_sec),
            gc_probability,
            gc_divisor,
            gc_interval,
        };

        let transport_file = file.transport.unwrap_or_default();
        let defaults = TransportConfig::default();
        let max_pending_messages = transport_file
            .max_pending_messages
            .unwrap_or(defaults.max_pending_messages);
        if max_pending_messages == 0 {
            bail!("transport.max_pending_messages must be greater than 0");
        }
        let message_endpoint = transport_file
            .message_endpoint
            .unwrap_or(defaults.message_endpoint);
        if !message_endpoint.starts_with('/') {
            bail!(
                "transport.message_endpoint must start with '/': {:?}",
                message_endpoint
            );
        }

        let transport = TransportConfig {
            session_ttl: session.ttl,
            gc_probability,
            gc_divisor,
            // Sub-second polling only burns CPU
            sse_poll_interval: Duration::from_secs(
                transport_file.sse_poll_interval_sec.unwrap_or(1).max(1),
            ),
            keep_alive_interval: Duration::from_secs(
                transport_file.keep_alive_interval_sec.unwrap_or(15).max(1),
            ),
            max_pending_messages,
            replay_buffer_size: transport_file
                .replay_buffer_size
                .unwrap_or(defaults.replay_buffer_size),
            message_endpoint,
        };

        Ok(Self {
            host,
            port,
            metrics_port,
            logging_level,
            session,
            transport,
        })
    }

    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            requests_logging_level: self.logging_level.clone(),
            host: self.host.clone(),
            port: self.port,
            metrics_port: (self.metrics_port != 0).then_some(self.metrics_port),
        }
    }
}

/// Parses a logging level string into RequestsLoggingLevel.
/// Uses clap's ValueEnum trait for parsing.
fn parse_logging_level(s: &str) -> Option<RequestsLoggingLevel> {
    RequestsLoggingLevel::from_str(s, true).ok()
}
