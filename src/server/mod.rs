//! Optional status endpoint (`server` feature).

mod routes;

pub use routes::{create_router, create_router_with_name, AppState};

use axum::Router;
use std::net::SocketAddr;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::error::{BridgeError, BridgeResult};
use crate::runtime::ShutdownSignal;

/// Bind `addr` and serve `router` until `shutdown` fires. Binding errors
/// are returned; serving errors are logged.
pub async fn spawn(
    addr: SocketAddr,
    router: Router,
    mut shutdown: ShutdownSignal,
) -> BridgeResult<JoinHandle<()>> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| BridgeError::config(format!("status endpoint {addr}: {e}")))?;
    let local = listener.local_addr().unwrap_or(addr);

    info!("Status endpoint listening on http://{}", local);
    info!("  GET  /health  - Health check");
    info!("  GET  /status  - Bridge status");

    Ok(tokio::spawn(async move {
        let graceful = async move { shutdown.recv().await };
        if let Err(e) = axum::serve(listener, router).with_graceful_shutdown(graceful).await {
            error!(error = %e, "Status endpoint failed");
        }
    }))
}
