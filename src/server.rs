use axum::{extract::State, response::Json, routing::get, Router};
use std::net::SocketAddr;
use tokio::sync::watch;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::error::{BridgeError, Result};
use crate::watcher::StatusBoard;

pub fn router(board: StatusBoard) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/status", get(status_endpoint))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .into_inner(),
        )
        .with_state(board)
}

/// Serve the status endpoints until `shutdown` flips to true
pub async fn serve(addr: &str, board: StatusBoard, mut shutdown: watch::Receiver<bool>) -> Result<()> {
    let addr: SocketAddr = addr
        .parse()
        .map_err(|e| BridgeError::ConfigError(format!("Invalid status_addr {}: {}", addr, e)))?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Status server listening on {}", addr);

    axum::serve(listener, router(board))
        .with_graceful_shutdown(async move {
            while !*shutdown.borrow() {
                if shutdown.changed().await.is_err() {
                    break;
                }
            }
        })
        .await?;
    Ok(())
}

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "anchor-bridge",
        "timestamp": chrono::Utc::now()
    }))
}

async fn status_endpoint(State(board): State<StatusBoard>) -> Json<serde_json::Value> {
    let identities = board.snapshot();
    let failing = identities
        .iter()
        .filter(|status| status.consecutive_failures > 0)
        .count();
    let alerting = identities.iter().filter(|status| status.alerting).count();

    Json(serde_json::json!({
        "service": "anchor-bridge",
        "timestamp": chrono::Utc::now(),
        "watched": identities.len(),
        "failing": failing,
        "alerting": alerting,
        "identities": identities,
    }))
}
