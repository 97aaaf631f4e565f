// Copyright 2023-, Semiotic AI, Inc.
// SPDX-License-Identifier: Apache-2.0

#![doc = include_str!("../README.md")]

use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use anyhow::{Context, Result};
use billing_core::{
    backend::memory::{CatalogEntry, InMemoryBackend},
    session::BillingSession,
    SessionConfig,
};
use billing_service::{events, metrics, server};
use clap::Parser;
use log::{debug, info};
use tokio::sync::mpsc;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Port to listen on for JSON-RPC requests.
    /// Defaults to 8080.
    #[arg(long, default_value_t = 8080, env = "BILLING_PORT")]
    port: u16,

    /// Maximum request body size in bytes.
    /// Defaults to 10MB.
    #[arg(long, default_value_t = 10 * 1024 * 1024, env = "BILLING_MAX_REQUEST_BODY_SIZE")]
    max_request_body_size: u32,

    /// Maximum response body size in bytes.
    /// Defaults to 100kB.
    #[arg(long, default_value_t = 100 * 1024, env = "BILLING_MAX_RESPONSE_BODY_SIZE")]
    max_response_body_size: u32,

    /// Maximum number of concurrent connections.
    /// Defaults to 32.
    #[arg(long, default_value_t = 32, env = "BILLING_MAX_CONNECTIONS")]
    max_connections: u32,

    /// Metrics server port.
    /// Defaults to 5000.
    #[arg(long, default_value_t = 5000, env = "BILLING_METRICS_PORT")]
    metrics_port: u16,

    /// Package name stamped on the purchases of the in-memory store.
    #[arg(long, default_value = "com.example.app", env = "BILLING_PACKAGE_NAME")]
    package_name: String,

    /// JSON file with the products offered by the in-memory store.
    #[arg(long, env = "BILLING_CATALOG")]
    catalog: Option<PathBuf>,

    /// Seconds a purchase call waits for the store's answer before failing.
    /// Waits forever when unset.
    #[arg(long, env = "BILLING_PENDING_TIMEOUT_SECS")]
    pending_timeout_secs: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize the logger.
    // Set the log level by setting the RUST_LOG environment variable.
    // tracing_subscriber also shows the jsonrpsee log spans (client IP, etc).
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    debug!("Settings: {:?}", args);

    // Start the metrics server.
    // We just let it gracelessly get killed at the end of main()
    tokio::spawn(metrics::run_server(args.metrics_port));

    let catalog = match &args.catalog {
        Some(path) => load_catalog(path)?,
        None => Vec::new(),
    };
    info!("Catalog loaded with {} products.", catalog.len());

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let backend =
        Arc::new(InMemoryBackend::new(args.package_name.clone(), events_tx).with_catalog(catalog));

    let mut config = SessionConfig::default();
    if let Some(secs) = args.pending_timeout_secs {
        config = config.with_pending_purchase_timeout(Duration::from_secs(secs));
    }
    let session = Arc::new(BillingSession::new(backend, config));
    events::spawn_event_pump(&session, events_rx);
    session.start().await;

    // Start the JSON-RPC server.
    // This await is non-blocking
    let (handle, _) = server::run_server(
        args.port,
        session.clone(),
        args.max_request_body_size,
        args.max_response_body_size,
        args.max_connections,
    )
    .await?;
    info!("Server started. Listening on port {}.", args.port);

    let _ = handle.await;

    // If we're here, we've received a signal to exit.
    info!("Shutting down...");
    session.terminate();
    Ok(())
}

fn load_catalog(path: &Path) -> Result<Vec<CatalogEntry>> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read catalog {}", path.display()))?;
    serde_json::from_str(&contents)
        .with_context(|| format!("Failed to parse catalog {}", path.display()))
}
