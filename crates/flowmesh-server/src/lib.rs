//! HTTP surface for flowmesh.
//!
//! Streams deploy and kick progress as server-sent events, and serves
//! teardown, single-step unit tests, and the list of in-flight operations.

#![warn(clippy::pedantic)]

pub mod api_errors;
pub mod routes;
pub mod sse;
pub mod state;

use std::net::SocketAddr;

use anyhow::{Context, Result};
use tracing::info;

pub use api_errors::ApiError;
pub use routes::build_router;
pub use state::{AppState, OperationRegistry};

/// Serve until Ctrl-C, then cancel in-flight operations and drain.
///
/// # Errors
///
/// Returns an error if the address cannot be bound or the server fails.
pub async fn serve(state: AppState, addr: SocketAddr) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!(%addr, "flowmesh server listening");

    let shutdown = state.shutdown.clone();
    let operations = state.operations.clone();
    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
            shutdown.cancel();
            let cancelled = operations.cancel_all();
            info!(cancelled, "Shutting down");
        })
        .await
        .context("Server terminated abnormally")
}
