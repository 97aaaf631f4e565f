// Copyright 2023-, Semiotic AI, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::{net::SocketAddr, panic};

use axum::{http::StatusCode, response::IntoResponse, routing::get, Router};
use futures_util::FutureExt;
use log::{debug, error, info};
use prometheus::TextEncoder;

async fn handler_metrics() -> (StatusCode, String) {
    let metric_families = prometheus::gather();
    let encoder = TextEncoder::new();

    match encoder.encode_to_string(&metric_families) {
        Ok(s) => (StatusCode::OK, s),
        Err(e) => {
            error!("Error encoding metrics: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Error encoding metrics: {e}"),
            )
        }
    }
}

async fn handler_404() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "404 Not Found")
}

pub fn router() -> Router {
    Router::new()
        .route("/metrics", get(handler_metrics))
        .fallback(handler_404)
}

async fn serve(port: u16) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Metrics server listening on {addr}");

    axum::serve(listener, router()).await?;
    debug!("Metrics server stopped");
    Ok(())
}

pub async fn run_server(port: u16) {
    // A panic inside the spawned server would otherwise go unnoticed.
    match panic::AssertUnwindSafe(serve(port))
        .catch_unwind()
        .await
    {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("Metrics server error: {e:#}"),
        Err(_) => std::process::abort(),
    }
}
