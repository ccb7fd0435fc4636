use std::net::SocketAddr;

use axum::{Router, extract::State, routing::get};
use http::StatusCode;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::Result;

/// Serves `/readyz` until `cancel` fires. The agent reports ready once
/// `ready` has been cancelled by the agent task.
pub async fn serve_readiness(
    addr: SocketAddr,
    ready: CancellationToken,
    cancel: CancellationToken,
) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("readiness listening on {}", addr);

    axum::serve(listener, router(ready))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;
    Ok(())
}

fn router(ready: CancellationToken) -> Router {
    Router::new().route("/readyz", get(readyz)).with_state(ready)
}

async fn readyz(State(ready): State<CancellationToken>) -> (StatusCode, &'static str) {
    if ready.is_cancelled() {
        (StatusCode::OK, "Ok")
    } else {
        (StatusCode::INTERNAL_SERVER_ERROR, "NotReady")
    }
}
