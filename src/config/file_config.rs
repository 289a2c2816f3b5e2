use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Core settings (can override CLI)
    pub host: Option<String>,
    pub port: Option<u16>,
    pub metrics_port: Option<u16>,
    pub logging_level: Option<String>,

    pub session: Option<SessionConfig>,
    pub transport: Option<TransportFileConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct SessionConfig {
    /// Session backend: "memory" or "sqlite"
    pub backend: Option<String>,
    pub db_path: Option<String>,
    pub ttl_sec: Option<u64>,
    pub gc_probability: Option<u32>,
    pub gc_divisor: Option<u32>,
    /// Seconds between background GC runs, 0 disables
    pub gc_interval_sec: Option<u64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct TransportFileConfig {
    pub sse_poll_interval_sec: Option<u64>,
    pub keep_alive_interval_sec: Option<u64>,
    pub max_pending_messages: Option<usize>,
    pub replay_buffer_size: Option<usize>,
    pub message_endpoint: Option<String>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}
