//! Liveness and metrics HTTP endpoint.

use std::{io, net::SocketAddr};

use axum::{extract::State, http::StatusCode, routing::get, Router};
use osmdbt_monitoring::metrics;
use prometheus::Registry;
use tokio::{net::TcpListener, sync::broadcast};

/// Serves `GET /healthz` and `GET /metrics` until a shutdown message.
pub async fn serve(
    addr: SocketAddr,
    registry: Registry,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<(), io::Error> {
    let router = Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(render_metrics))
        .with_state(registry);

    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "liveness endpoint listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            shutdown.recv().await.ok();
        })
        .await
}

async fn healthz() -> &'static str {
    "ok"
}

async fn render_metrics(State(registry): State<Registry>) -> Result<String, StatusCode> {
    metrics::render(&registry).map_err(|err| {
        tracing::error!(error = %err, "failed to render metrics");
        StatusCode::INTERNAL_SERVER_ERROR
    })
}
