// src/server/metrics_server.rs

use crate::core::RaftCluster;
use crate::core::metrics::gather_metrics;
use axum::{Router, http::StatusCode, response::IntoResponse, routing::get};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info};

/// Handles HTTP requests to the /metrics endpoint.
async fn metrics_handler(cluster: Arc<RaftCluster>) -> impl IntoResponse {
    // Refresh the gauge that changes on every read before gathering.
    crate::core::metrics::MIN_RESOLVED_TS_GAUGE.set(cluster.get_min_resolved_ts() as f64);

    let body = gather_metrics();
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        body,
    )
}

/// Answers the member health probe; followers are allowed to handle it.
async fn ping_handler() -> impl IntoResponse {
    (StatusCode::OK, "pong")
}

/// Runs a simple HTTP server exposing Prometheus metrics on /metrics and the
/// member health probe on /pd/api/v1/ping.
pub async fn run_metrics_server(
    cluster: Arc<RaftCluster>,
    port: u16,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let app = Router::new()
        .route("/metrics", get(move || metrics_handler(cluster.clone())))
        .route("/pd/api/v1/ping", get(ping_handler));

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(
        "Prometheus metrics server listening on http://{}/metrics",
        addr
    );

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            error!("Failed to bind metrics server on port {}: {}", port, e);
            return;
        }
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_rx.recv().await.ok();
            info!("Metrics server shutting down.");
        })
        .await
        .unwrap();
}
