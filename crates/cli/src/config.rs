//! Configuration file loading
//!
//! `config.json` holds one section per component. A missing file means
//! defaults; a present but malformed file is an error.

use anyhow::{Context, Result};
use rssx_adapters::ServerConfig;
use rssx_federation::NodeConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is not set
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RssxConfig {
    pub server: ServerConfig,
    pub node: NodeConfig,
    pub logging: LoggingConfig,
}

impl RssxConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }

        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("Invalid config file {}", path.display()))
    }
}

/// Replace the host and/or port of a `host:port` listen address.
pub fn override_listen_addr(listen_addr: &str, host: Option<&str>, port: Option<u16>) -> String {
    let (current_host, current_port) = match listen_addr.rsplit_once(':') {
        Some((h, p)) => (h, p.to_string()),
        None => (listen_addr, "5000".to_string()),
    };

    format!(
        "{}:{}",
        host.unwrap_or(current_host),
        port.map(|p| p.to_string()).unwrap_or(current_port)
    )
}
