// Copyright 2023-, Semiotic AI, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use billing_core::{
    backend::{
        memory::{CatalogEntry, FlowOutcome, InMemoryBackend},
        BillingEvent, ProductType,
    },
    purchase::PurchaseRecord,
    session::{BillingSession, ConnectionState},
    Error, FlowAction, ResponseCode, SessionConfig,
};
use rstest::*;
use tokio::sync::mpsc;

async fn wait_until(what: &str, condition: impl Fn() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    panic!("timed out waiting until {what}");
}

fn entry(identifier: &str, product_type: ProductType, micros: i64) -> CatalogEntry {
    CatalogEntry {
        identifier: identifier.to_string(),
        product_type,
        price: format!("${:.2}", micros as f64 / 1_000_000.0),
        introductory_price: None,
        title: identifier.to_string(),
        description: String::new(),
        currency: "USD".to_string(),
        price_amount_micros: micros,
    }
}

fn record(sku: &str) -> PurchaseRecord {
    PurchaseRecord {
        order_id: format!("GPA.{sku}"),
        package_name: "com.example.app".to_string(),
        sku: sku.to_string(),
        purchase_token: format!("token-{sku}"),
        purchase_time: 1_700_000_000_000,
        auto_renewing: false,
    }
}

#[fixture]
fn catalog() -> Vec<CatalogEntry> {
    vec![
        entry("sku1", ProductType::InApp, 990_000),
        entry("sku2", ProductType::InApp, 1_990_000),
        entry("coins_100", ProductType::InApp, 1_990_000),
        entry("monthly", ProductType::Subs, 4_990_000),
    ]
}

struct SessionFixture {
    backend: Arc<InMemoryBackend>,
    session: Arc<BillingSession<InMemoryBackend>>,
}

fn build(catalog: Vec<CatalogEntry>, config: SessionConfig) -> SessionFixture {
    let (tx, rx) = mpsc::unbounded_channel();
    let backend =
        Arc::new(InMemoryBackend::new("com.example.app", tx).with_catalog(catalog));
    let session = Arc::new(BillingSession::new(backend.clone(), config));
    session.spawn_event_loop(rx);
    SessionFixture { backend, session }
}

#[fixture]
fn context(catalog: Vec<CatalogEntry>) -> SessionFixture {
    build(catalog, SessionConfig::default())
}

#[rstest]
#[tokio::test]
async fn completed_purchase_resolves_and_consumes(context: SessionFixture) {
    let SessionFixture { backend, session } = context;

    let purchases = session.purchase("coins_100", true).await.unwrap();

    assert_eq!(purchases.len(), 1);
    assert_eq!(purchases[0].identifier, "coins_100");
    assert_eq!(purchases[0].autorenewal, "false");
    assert_eq!(session.pending_purchases(), 0);

    wait_until("purchase is consumed", || backend.consume_requests().len() == 1).await;
    assert_eq!(backend.consume_requests(), [purchases[0].purchase_token.clone()]);
    assert!(session.fetch_purchases().await.unwrap().is_empty());
}

#[rstest]
#[tokio::test]
async fn purchase_without_consume_stays_owned(context: SessionFixture) {
    let SessionFixture { backend, session } = context;

    let purchases = session.purchase("coins_100", false).await.unwrap();

    let owned = session.fetch_purchases().await.unwrap();
    assert_eq!(owned, purchases);
    assert!(backend.consume_requests().is_empty());
}

#[rstest]
#[tokio::test]
async fn pending_caller_receives_whole_batch(context: SessionFixture) {
    let SessionFixture { backend, session } = context;
    backend.set_flow_outcome(FlowOutcome::Manual);

    let caller = tokio::spawn({
        let session = session.clone();
        async move { session.purchase("sku1", false).await }
    });
    wait_until("purchase is pending", || session.pending_purchases() == 1).await;

    let report =
        session.on_purchases_updated(ResponseCode::OK, Some(vec![record("sku1"), record("sku2")]));

    assert_eq!(report.outcome.resolved, 1);
    assert!(report.consumptions.is_empty());
    assert_eq!(session.pending_purchases(), 0);
    let batch = caller.await.unwrap().unwrap();
    let identifiers: Vec<_> = batch.iter().map(|p| p.identifier.as_str()).collect();
    assert_eq!(identifiers, ["sku1", "sku2"]);
}

#[rstest]
#[tokio::test]
async fn failure_notification_rejects_every_pending_caller(context: SessionFixture) {
    let SessionFixture { backend, session } = context;
    backend.set_flow_outcome(FlowOutcome::Manual);

    let purchase = tokio::spawn({
        let session = session.clone();
        async move { session.purchase("sku1", false).await }
    });
    let subscription = tokio::spawn({
        let session = session.clone();
        async move { session.subscribe("monthly").await }
    });
    wait_until("both calls are pending", || session.pending_purchases() == 2).await;

    backend.emit(BillingEvent::PurchasesUpdated {
        status: ResponseCode::USER_CANCELED,
        purchases: None,
    });

    let expected = Err(Error::PurchaseFailed {
        code: ResponseCode::USER_CANCELED,
    });
    assert_eq!(purchase.await.unwrap(), expected);
    assert_eq!(subscription.await.unwrap(), expected);
    assert_eq!(session.pending_purchases(), 0);
}

#[rstest]
#[tokio::test]
async fn cancelled_flow_reports_status_code(context: SessionFixture) {
    let SessionFixture { backend, session } = context;
    backend.set_flow_outcome(FlowOutcome::Cancel);

    let err = session.purchase("sku1", false).await.unwrap_err();

    assert_eq!(err.to_string(), "Failed to purchase an item with error 1");
}

#[rstest]
#[tokio::test]
async fn consume_request_outlives_failed_call(context: SessionFixture) {
    let SessionFixture { backend, session } = context;
    backend.set_connect_result(Err(ResponseCode::SERVICE_UNAVAILABLE));

    assert_eq!(
        session.purchase("coins_100", true).await,
        Err(Error::ServiceUnavailable)
    );

    backend.set_connect_result(Ok(()));
    let granted = backend.grant_purchase("coins_100", ProductType::InApp);
    session.fetch_purchases().await.unwrap();

    let report = session.on_purchases_updated(ResponseCode::OK, Some(vec![granted.clone()]));
    assert_eq!(report.outcome.resolved, 0);
    assert_eq!(report.outcome.consume_tokens, [granted.purchase_token.clone()]);
    for consumption in report.consumptions {
        consumption.await.unwrap();
    }
    assert_eq!(backend.consume_requests(), [granted.purchase_token]);

    // The flag is gone once honoured.
    let again = session.on_purchases_updated(ResponseCode::OK, Some(vec![record("coins_100")]));
    assert!(again.consumptions.is_empty());
}

#[rstest]
#[tokio::test]
async fn launch_failure_rejects_immediately(context: SessionFixture) {
    let SessionFixture { backend, session } = context;

    let err = session.subscribe("sku1").await.unwrap_err();

    assert_eq!(
        err,
        Error::LaunchFlow {
            action: FlowAction::Subscribe,
            code: ResponseCode::ITEM_UNAVAILABLE,
        }
    );
    assert_eq!(session.pending_purchases(), 0);
    assert!(backend.launched_flows().is_empty());
}

#[rstest]
#[tokio::test]
async fn subscription_is_reported_as_auto_renewing(context: SessionFixture) {
    let SessionFixture { session, .. } = context;

    let purchases = session.subscribe("monthly").await.unwrap();
    assert_eq!(purchases[0].autorenewal, "true");

    let subscriptions = session.fetch_subscriptions().await.unwrap();
    assert_eq!(subscriptions, purchases);
    assert!(session.fetch_purchases().await.unwrap().is_empty());
}

#[rstest]
#[tokio::test]
async fn fetch_products_converts_amount(context: SessionFixture) {
    let SessionFixture { session, .. } = context;

    let products = session
        .fetch_products(
            vec!["sku2".to_string(), "monthly".to_string(), "missing".to_string()],
            ProductType::InApp,
        )
        .await
        .unwrap();

    assert_eq!(products.len(), 1);
    assert_eq!(products[0].identifier, "sku2");
    assert_eq!(products[0].amount, 199);
    assert_eq!(products[0].currency, "USD");
}

#[rstest]
#[tokio::test]
async fn every_operation_is_gated(context: SessionFixture) {
    let SessionFixture { backend, session } = context;
    backend.set_connect_result(Err(ResponseCode::BILLING_UNAVAILABLE));

    let results = vec![
        session
            .fetch_products(vec!["sku1".to_string()], ProductType::InApp)
            .await
            .map(|_| ()),
        session.fetch_purchases().await.map(|_| ()),
        session.purchase("sku1", false).await.map(|_| ()),
        session.fetch_subscriptions().await.map(|_| ()),
        session.subscribe("monthly").await.map(|_| ()),
    ];

    for result in results {
        assert_eq!(result, Err(Error::ServiceUnavailable));
    }
    // No attempt is retried automatically, each call makes its own.
    assert_eq!(backend.connect_calls(), 5);
    assert!(backend.launched_flows().is_empty());
}

#[rstest]
#[tokio::test]
async fn dropped_connection_is_reestablished_by_next_call(context: SessionFixture) {
    let SessionFixture { backend, session } = context;
    session.start().await;
    assert_eq!(session.connection_state(), ConnectionState::Connected);

    backend.simulate_disconnect();
    wait_until("session sees the drop", || {
        session.connection_state() == ConnectionState::Disconnected
    })
    .await;

    session.fetch_purchases().await.unwrap();
    assert_eq!(backend.connect_calls(), 2);
    assert_eq!(session.connection_state(), ConnectionState::Connected);
}

#[rstest]
#[tokio::test]
async fn terminate_disconnects_and_abandons_pending(context: SessionFixture) {
    let SessionFixture { backend, session } = context;
    backend.set_flow_outcome(FlowOutcome::Manual);

    let caller = tokio::spawn({
        let session = session.clone();
        async move { session.purchase("sku1", false).await }
    });
    wait_until("purchase is pending", || session.pending_purchases() == 1).await;

    session.terminate();
    session.terminate();

    assert_eq!(backend.disconnect_calls(), 1);
    assert_eq!(session.connection_state(), ConnectionState::Disconnected);
    assert_eq!(session.pending_purchases(), 1);
    assert!(!caller.is_finished());
    caller.abort();
}

#[rstest]
#[tokio::test]
async fn pending_timeout_rejects_and_cleans_up(catalog: Vec<CatalogEntry>) {
    let timeout = Duration::from_millis(20);
    let SessionFixture { backend, session } = build(
        catalog,
        SessionConfig::default().with_pending_purchase_timeout(timeout),
    );
    backend.set_flow_outcome(FlowOutcome::Manual);

    let err = session.purchase("sku1", false).await.unwrap_err();

    assert_eq!(
        err,
        Error::PendingTimeout {
            identifier: "sku1".to_string(),
            timeout,
        }
    );
    assert_eq!(session.pending_purchases(), 0);
}

#[rstest]
#[tokio::test]
async fn second_purchase_of_same_item_supersedes_first(context: SessionFixture) {
    let SessionFixture { backend, session } = context;
    backend.set_flow_outcome(FlowOutcome::Manual);

    let first = tokio::spawn({
        let session = session.clone();
        async move { session.purchase("sku1", false).await }
    });
    wait_until("first purchase is pending", || session.pending_purchases() == 1).await;
    let second = tokio::spawn({
        let session = session.clone();
        async move { session.purchase("sku1", false).await }
    });

    assert_eq!(
        first.await.unwrap(),
        Err(Error::Superseded {
            identifier: "sku1".to_string()
        })
    );
    wait_until("second launch happened", || backend.launched_flows().len() == 2).await;
    backend.emit(BillingEvent::PurchasesUpdated {
        status: ResponseCode::OK,
        purchases: Some(vec![record("sku1")]),
    });
    assert_eq!(second.await.unwrap().unwrap().len(), 1);
}

#[rstest]
#[tokio::test]
async fn notification_from_host_thread_consumes(catalog: Vec<CatalogEntry>) {
    let (tx, _rx) = mpsc::unbounded_channel();
    let backend = Arc::new(InMemoryBackend::new("com.example.app", tx).with_catalog(catalog));
    let session = Arc::new(BillingSession::new(backend.clone(), SessionConfig::default()));
    backend.set_connect_result(Err(ResponseCode::SERVICE_UNAVAILABLE));
    assert_eq!(
        session.purchase("coins_100", true).await,
        Err(Error::ServiceUnavailable)
    );
    backend.set_connect_result(Ok(()));
    session.start().await;
    let granted = backend.grant_purchase("coins_100", ProductType::InApp);

    let host = std::thread::spawn({
        let session = session.clone();
        let granted = granted.clone();
        move || {
            session.handle_event(BillingEvent::PurchasesUpdated {
                status: ResponseCode::OK,
                purchases: Some(vec![granted]),
            })
        }
    });
    let report = host.join().unwrap().unwrap();

    assert_eq!(report.consumptions.len(), 1);
    for consumption in report.consumptions {
        consumption.await.unwrap();
    }
    assert_eq!(backend.consume_requests(), [granted.purchase_token]);
}

#[rstest]
fn session_created_off_runtime_consumes_on_given_runtime(catalog: Vec<CatalogEntry>) {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .enable_all()
        .build()
        .unwrap();
    let (tx, _rx) = mpsc::unbounded_channel();
    let backend = Arc::new(InMemoryBackend::new("com.example.app", tx).with_catalog(catalog));
    let session = BillingSession::with_runtime(
        backend.clone(),
        SessionConfig::default(),
        runtime.handle().clone(),
    );
    backend.set_connect_result(Err(ResponseCode::SERVICE_UNAVAILABLE));
    assert_eq!(
        runtime.block_on(session.purchase("coins_100", true)),
        Err(Error::ServiceUnavailable)
    );
    backend.set_connect_result(Ok(()));
    runtime.block_on(session.start());
    let granted = backend.grant_purchase("coins_100", ProductType::InApp);

    let report = session
        .handle_event(BillingEvent::PurchasesUpdated {
            status: ResponseCode::OK,
            purchases: Some(vec![granted.clone()]),
        })
        .unwrap();

    assert_eq!(report.consumptions.len(), 1);
    for consumption in report.consumptions {
        runtime.block_on(consumption).unwrap();
    }
    assert_eq!(backend.consume_requests(), [granted.purchase_token]);
}

#[rstest]
#[tokio::test]
async fn event_loop_reports_every_event(catalog: Vec<CatalogEntry>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let backend = Arc::new(InMemoryBackend::new("com.example.app", tx).with_catalog(catalog));
    let session = Arc::new(BillingSession::new(backend.clone(), SessionConfig::default()));
    let seen = Arc::new(Mutex::new(Vec::new()));
    session.spawn_event_loop_with(rx, {
        let seen = seen.clone();
        move |report| {
            seen.lock()
                .unwrap()
                .push(report.map(|report| report.outcome.rejected));
        }
    });

    backend.emit(BillingEvent::PurchasesUpdated {
        status: ResponseCode::USER_CANCELED,
        purchases: None,
    });
    backend.emit(BillingEvent::ServiceDisconnected);

    wait_until("both events are observed", || seen.lock().unwrap().len() == 2).await;
    assert_eq!(*seen.lock().unwrap(), [Some(0), None]);
}
