//! Gatekeeper demo server
//!
//! Serves `/login`, `/profile` and `/refresh-token` behind JWT
//! authentication, a per-IP sliding window and a global in-flight cap.

use gatekeeper::{config::Config, observability::init_observability, server::App, shutdown::ShutdownCoordinator};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    let config_path = std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
    let config = Config::from_file_with_env(&config_path)?;

    init_observability(&config.logging.level, &config.logging.format);
    info!("Starting gatekeeper server");
    info!("Configuration loaded and validated from {}", config_path);

    let app = App::from_config(&config)?;

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;

    let shutdown = Arc::new(ShutdownCoordinator::new());
    let signal = shutdown.clone();
    tokio::spawn(async move { signal.wait_for_signal().await });

    app.serve(addr, &shutdown).await?;

    Ok(())
}
