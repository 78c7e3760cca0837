//! Health and metrics HTTP surface
//!
//! `/healthz`, `/readyz` and `/` answer 200 unconditionally while the
//! process runs; `/metrics` serves the Prometheus text exposition. The
//! server drains within a 5 second budget on shutdown.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use prometheus::{Encoder, TextEncoder};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::Error;
use crate::metrics::Metrics;

/// Build the router serving health endpoints and metrics
pub fn router(metrics: Arc<Metrics>) -> Router {
    Router::new()
        .route("/healthz", get(ok))
        .route("/readyz", get(ok))
        .route("/", get(ok))
        .route("/metrics", get(render_metrics))
        .with_state(metrics)
}

/// Bind and serve until `shutdown` fires.
pub async fn serve(
    port: u16,
    metrics: Arc<Metrics>,
    shutdown: CancellationToken,
) -> Result<(), Error> {
    let listener = TcpListener::bind(("0.0.0.0", port))
        .await
        .map_err(|e| Error::config(format!("failed to bind server port {port}: {e}")))?;

    info!(port, "server starting");
    axum::serve(listener, router(metrics).into_make_service())
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
        .map_err(|e| Error::transport(format!("http server: {e}")))?;

    info!("server shutdown completed");
    Ok(())
}

async fn ok() -> StatusCode {
    StatusCode::OK
}

async fn render_metrics(State(metrics): State<Arc<Metrics>>) -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    match encoder.encode(&metrics.registry().gather(), &mut buffer) {
        Ok(()) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, encoder.format_type().to_string())],
            buffer,
        ),
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [(header::CONTENT_TYPE, "text/plain".to_string())],
            format!("failed to encode metrics: {err}").into_bytes(),
        ),
    }
}
