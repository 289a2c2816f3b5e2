use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use cms_mcp_server::config::{self, SessionBackend};
use cms_mcp_server::mcp::McpServer;
use cms_mcp_server::server::{metrics, run_server, RequestsLoggingLevel};
use cms_mcp_server::session::{InMemorySessionStore, SessionStore, SqliteSessionStore};
use cms_mcp_server::transport::{run_periodic_gc, McpTransport};

fn parse_path(s: &str) -> Result<PathBuf, String> {
    let path_buf = PathBuf::from(s);
    let original_path = match path_buf.canonicalize() {
        Ok(path) => path,
        Err(msg) => {
            if msg.kind() == std::io::ErrorKind::NotFound {
                path_buf
            } else {
                return Err(format!("Error resolving path '{}': {}", s, msg));
            }
        }
    };
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir().map_err(|e| format!("Failed to get current dir: {}", e))?;
    Ok(cwd.join(original_path))
}

#[derive(Parser, Debug)]
struct CliArgs {
    /// Path to TOML configuration file. Values in the file override CLI arguments.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// The address to bind.
    #[clap(long, default_value = "127.0.0.1")]
    pub host: String,

    /// The port to listen on.
    #[clap(short, long, default_value_t = 3001)]
    pub port: u16,

    /// The port for the metrics server (Prometheus scraping). 0 disables it.
    #[clap(long, default_value_t = 9091)]
    pub metrics_port: u16,

    /// The level of logging to perform on each request.
    #[clap(long, default_value = "path")]
    pub logging_level: RequestsLoggingLevel,

    /// Where session records are kept.
    #[clap(long, default_value = "memory")]
    pub session_backend: SessionBackend,

    /// SQLite database file for the sqlite session backend.
    #[clap(long, value_parser = parse_path)]
    pub session_db_path: Option<PathBuf>,

    /// Session lifetime in seconds, measured from the last request.
    #[clap(long, default_value_t = 3600)]
    pub session_ttl_sec: u64,
}

/// Convert CLI args to CliConfig for config resolution
impl From<&CliArgs> for config::CliConfig {
    fn from(args: &CliArgs) -> Self {
        config::CliConfig {
            host: args.host.clone(),
            port: args.port,
            metrics_port: args.metrics_port,
            logging_level: args.logging_level.clone(),
            session_backend: args.session_backend,
            session_db_path: args.session_db_path.clone(),
            session_ttl_sec: args.session_ttl_sec,
        }
    }
}

fn open_session_store(settings: &config::SessionSettings) -> Result<Arc<dyn SessionStore>> {
    match (settings.backend, &settings.db_path) {
        (SessionBackend::Sqlite, Some(db_path)) => {
            if !db_path.exists() {
                info!("Creating new session database at {:?}", db_path);
            }
            Ok(Arc::new(SqliteSessionStore::new(db_path)?))
        }
        (SessionBackend::Sqlite, None) => {
            anyhow::bail!("The sqlite session backend requires a database path")
        }
        (SessionBackend::Memory, _) => Ok(Arc::new(InMemorySessionStore::new())),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()?;

    // Load TOML config if provided
    let file_config = match &cli_args.config {
        Some(path) => {
            info!("Loading configuration from {:?}", path);
            Some(config::FileConfig::load(path)?)
        }
        None => None,
    };

    // Resolve final configuration (TOML overrides CLI)
    let cli_config: config::CliConfig = (&cli_args).into();
    let app_config = config::AppConfig::resolve(&cli_config, file_config)?;

    info!("Configuration loaded:");
    info!("  listen: {}:{}", app_config.host, app_config.port);
    info!("  session backend: {:?}", app_config.session.backend);
    info!("  session ttl: {:?}", app_config.session.ttl);

    info!("Initializing metrics...");
    metrics::init_metrics();

    let store = open_session_store(&app_config.session)?;
    let dispatcher = Arc::new(McpServer::with_default_tools());
    let transport = Arc::new(McpTransport::new(
        app_config.transport.clone(),
        store,
        dispatcher,
    ));

    let shutdown_token = CancellationToken::new();

    if let Some(interval) = app_config.session.gc_interval {
        info!("Session GC runs every {:?}", interval);
        tokio::spawn(run_periodic_gc(
            transport.clone(),
            interval,
            shutdown_token.clone(),
        ));
    }

    let server = run_server(
        app_config.server_config(),
        transport,
        shutdown_token.clone(),
    );
    tokio::pin!(server);

    tokio::select! {
        result = &mut server => {
            info!("HTTP server stopped: {:?}", result);
            shutdown_token.cancel();
            return result;
        },
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, initiating graceful shutdown");
            shutdown_token.cancel();
        }
    }

    // Open SSE streams are closed on cancellation, so draining is bounded
    // by the stream poll interval.
    let result = server.await;
    info!("HTTP server stopped: {:?}", result);
    result
}
