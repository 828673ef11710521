use std::net::SocketAddr;
use std::path::Path;

use anyhow::{Context, Result};
use flowmesh_server::AppState;

/// Execute the `serve` command: run the HTTP API until Ctrl-C.
pub async fn execute(config_path: Option<&Path>, host: Option<String>, port: Option<u16>) -> Result<()> {
    let mut config = super::config(config_path)?;
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .with_context(|| format!("Invalid bind address {}:{}", config.server.host, config.server.port))?;

    let orchestrator = super::orchestrator(config).await?;
    flowmesh_server::serve(AppState::new(orchestrator), addr).await
}
