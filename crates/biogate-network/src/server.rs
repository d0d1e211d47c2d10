//! HTTP listener.

use std::io;
use tokio::net::TcpListener;
use tracing::info;

use crate::api::router;
use crate::state::AppState;

/// Serve the API on `listener` until `state.shutdown` is cancelled.
///
/// In-flight requests finish before this returns; websocket sessions watch
/// the same token and close themselves.
///
/// # Errors
/// Returns the listener's I/O error if accepting fails.
pub async fn serve(listener: TcpListener, state: AppState) -> io::Result<()> {
    let shutdown = state.shutdown.clone();
    info!(addr = %listener.local_addr()?, "HTTP server listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    info!("HTTP server stopped");
    Ok(())
}
