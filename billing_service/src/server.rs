// Copyright 2023-, Semiotic AI, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use anyhow::Result;
use axum::{error_handling::HandleError, routing::post_service, BoxError, Router};
use billing_core::{
    backend::{BillingBackend, ProductType},
    dispatcher::{Command, CommandDispatcher},
    session::BillingSession,
};
use hyper::StatusCode;
use jsonrpsee::{
    core::async_trait,
    proc_macros::rpc,
    server::{ServerBuilder, ServerConfig, ServerHandle, TowerService},
};
use lazy_static::lazy_static;
use log::{debug, info};
use prometheus::{register_int_counter_vec, IntCounterVec};
use serde_json::Value;
use tokio::{net::TcpListener, signal, task::JoinHandle};
use tower::layer::util::Identity;

pub use crate::jsonrpsee_helpers::{JsonRpcError, JsonRpcErrorData, JsonRpcResult};
use crate::jsonrpsee_helpers::billing_error;

// Register the metrics into the global metrics registry.
lazy_static! {
    static ref COMMAND_SUCCESS_COUNTER: IntCounterVec = register_int_counter_vec!(
        "billing_command_success_count",
        "Number of billing requests answered with a result.",
        &["method"]
    )
    .unwrap();
    static ref COMMAND_FAILURE_COUNTER: IntCounterVec = register_int_counter_vec!(
        "billing_command_failure_count",
        "Number of billing requests answered with an error (for any reason).",
        &["method", "code"]
    )
    .unwrap();
}

/// Generates the `RpcServer` trait that is used to define the JSON-RPC API.
///
/// Because of the way the `rpc` macro works, the RpcServer trait cannot be
/// documented here. The JSON-RPC API is documented in
/// `billing_service/README.md` instead; keep it in sync with any change here.
#[rpc(server)]
pub trait Rpc {
    #[method(name = "fetchProducts")]
    async fn fetch_products(
        &self,
        identifiers: Vec<String>,
        #[argument(rename = "type")] product_type: ProductType,
    ) -> JsonRpcResult<Value>;

    #[method(name = "fetchPurchases")]
    async fn fetch_purchases(&self) -> JsonRpcResult<Value>;

    /// Resolves once the backend reported the outcome of the flow.
    #[method(name = "purchase")]
    async fn purchase(&self, identifier: String, consume: Option<bool>) -> JsonRpcResult<Value>;

    #[method(name = "fetchSubscriptions")]
    async fn fetch_subscriptions(&self) -> JsonRpcResult<Value>;

    #[method(name = "subscribe")]
    async fn subscribe(&self, identifier: String) -> JsonRpcResult<Value>;

    #[method(name = "appSharedSecret")]
    async fn app_shared_secret(&self) -> JsonRpcResult<Value>;
}

struct RpcImpl<B> {
    dispatcher: CommandDispatcher<B>,
}

impl<B: BillingBackend> RpcImpl<B> {
    async fn run(&self, command: Command) -> JsonRpcResult<Value> {
        let method = command.method();
        match self.dispatcher.execute(command).await {
            Ok(value) => {
                COMMAND_SUCCESS_COUNTER.with_label_values(&[method]).inc();
                Ok(value)
            }
            Err(e) => {
                debug!("{method} failed: {e}");
                let code = e.code().to_string();
                COMMAND_FAILURE_COUNTER
                    .with_label_values(&[method, code.as_str()])
                    .inc();
                Err(billing_error(&e))
            }
        }
    }
}

#[async_trait]
impl<B: BillingBackend> RpcServer for RpcImpl<B> {
    async fn fetch_products(
        &self,
        identifiers: Vec<String>,
        product_type: ProductType,
    ) -> JsonRpcResult<Value> {
        self.run(Command::FetchProducts {
            identifiers,
            product_type,
        })
        .await
    }

    async fn fetch_purchases(&self) -> JsonRpcResult<Value> {
        self.run(Command::FetchPurchases).await
    }

    async fn purchase(&self, identifier: String, consume: Option<bool>) -> JsonRpcResult<Value> {
        self.run(Command::Purchase {
            identifier,
            consume: consume.unwrap_or(false),
        })
        .await
    }

    async fn fetch_subscriptions(&self) -> JsonRpcResult<Value> {
        self.run(Command::FetchSubscriptions).await
    }

    async fn subscribe(&self, identifier: String) -> JsonRpcResult<Value> {
        self.run(Command::Subscribe { identifier }).await
    }

    async fn app_shared_secret(&self) -> JsonRpcResult<Value> {
        self.run(Command::AppSharedSecret).await
    }
}

/// Starts the JSON-RPC server on `port` (0 picks a free port).
///
/// The returned task ends after a shutdown signal was received and every
/// open request was answered. The session is not terminated; that is left
/// to the caller.
pub async fn run_server<B: BillingBackend>(
    port: u16,
    session: Arc<BillingSession<B>>,
    max_request_body_size: u32,
    max_response_body_size: u32,
    max_concurrent_connections: u32,
) -> Result<(JoinHandle<()>, std::net::SocketAddr)> {
    // Setting up the JSON RPC server
    let rpc_impl = RpcImpl {
        dispatcher: CommandDispatcher::new(session),
    };
    let (json_rpc_service, _) = create_json_rpc_service(
        rpc_impl,
        max_request_body_size,
        max_response_body_size,
        max_concurrent_connections,
    )?;

    async fn handle_anyhow_error(err: BoxError) -> (StatusCode, String) {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Something went wrong: {err}"),
        )
    }
    let router = Router::new().route_service(
        "/",
        HandleError::new(post_service(json_rpc_service), handle_anyhow_error),
    );

    let listener = TcpListener::bind(&format!("0.0.0.0:{port}")).await?;
    let addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_handler())
            .await
        {
            log::error!("Billing service error: {e}");
        }
    });

    Ok((handle, addr))
}

/// Graceful shutdown handler
async fn shutdown_handler() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            log::error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                log::error!("Failed to install signal handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Signal received, starting graceful shutdown");
}

fn create_json_rpc_service<B: BillingBackend>(
    rpc_impl: RpcImpl<B>,
    max_request_body_size: u32,
    max_response_body_size: u32,
    max_concurrent_connections: u32,
) -> Result<(TowerService<Identity, Identity>, ServerHandle)> {
    let config = ServerConfig::builder()
        .max_request_body_size(max_request_body_size)
        .max_response_body_size(max_response_body_size)
        .max_connections(max_concurrent_connections)
        .http_only()
        .build();
    let service_builder = ServerBuilder::new().set_config(config).to_service_builder();
    use jsonrpsee::server::stop_channel;
    let (stop_handle, server_handle) = stop_channel();
    let handle = service_builder.build(rpc_impl.into_rpc(), stop_handle);
    Ok((handle, server_handle))
}
