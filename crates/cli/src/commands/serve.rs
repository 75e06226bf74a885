//! Serve command implementation
//!
//! Starts an RSSX instance: opens the store, loads the instance keys and
//! serves the HTTP API until Ctrl+C or SIGTERM.

use anyhow::{Context, Result};
use rssx_adapters::HttpServer;
use rssx_federation::RssxNode;
use std::path::Path;
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::{override_listen_addr, RssxConfig};

/// Arguments for the serve command
#[derive(Debug, Clone, Default)]
pub struct ServeArgs {
    pub config: String,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub db: Option<String>,
    pub public_host: Option<String>,
}

/// Load the config file and apply command-line overrides.
pub fn resolve_config(args: &ServeArgs) -> Result<RssxConfig> {
    let mut config = RssxConfig::load(&args.config)?;

    config.server.listen_addr = override_listen_addr(
        &config.server.listen_addr,
        args.host.as_deref(),
        args.port,
    );
    if let Some(db) = &args.db {
        config.node.db_path = db.clone();
    }
    if let Some(public_host) = &args.public_host {
        config.node.public_host = public_host.clone();
    }

    Ok(config)
}

/// Execute the serve command
pub async fn execute_serve_command(args: ServeArgs) -> Result<()> {
    let config = resolve_config(&args)?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    validate_db_path(&config.node.db_path)?;

    println!("🌐 Starting RSSX instance...");
    println!("📁 Database: {}", config.node.db_path);
    println!("🔌 Listening on: {}", config.server.listen_addr);
    println!("🏷️  Public host: {}", config.node.public_host);
    println!();

    let node = Arc::new(RssxNode::new(config.node.clone()).context("Failed to create RSSX node")?);
    println!(
        "🔑 Instance key fingerprint: {}",
        node.engine().public_identity().fingerprint()
    );
    println!("👥 Known peers: {}", node.list_peers()?.len());
    println!("🔄 Running... Press Ctrl+C to shutdown");

    let server = HttpServer::new(config.server.clone(), node);
    server.run(wait_for_shutdown()).await?;

    println!("✅ Shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn wait_for_shutdown() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}

/// Make sure the database directory's parent exists
pub fn validate_db_path(db_path: &str) -> Result<()> {
    if db_path.trim().is_empty() {
        anyhow::bail!("Database path cannot be empty");
    }

    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create database directory: {}", parent.display())
            })?;
        }
    }
    Ok(())
}
