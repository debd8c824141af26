//! HTTP surface and composition root for the checkout saga system.
//!
//! `compose` wires all four services (Order, Stock, Payment and the
//! Orchestrator) over one in-memory bus and one key-value store per
//! service, spawning each consumer with its own group. `create_app` builds
//! the Axum router over the Order-side bridge. Real deployments swap the
//! in-memory transport and stores for broker- and store-backed
//! implementations of the same traits; nothing above this crate changes.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use bus::{InMemoryEventBus, Subscription};
use common::topics;
use kv_store::InMemoryKvStore;
use metrics_exporter_prometheus::PrometheusHandle;
use orchestrator::Orchestrator;
use order::{OrderRepository, RequestBridge, ResponseConsumer};
use payment::PaymentService;
use stock::StockService;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use config::Config;
use routes::orders::AppState;

/// The composed system: all four services over one bus.
pub struct System {
    pub bus: InMemoryEventBus,
    pub order_store: InMemoryKvStore,
    pub stock_store: InMemoryKvStore,
    pub payment_store: InMemoryKvStore,
    pub stock: Arc<StockService<InMemoryKvStore, InMemoryEventBus>>,
    pub payment: Arc<PaymentService<InMemoryKvStore, InMemoryEventBus>>,
    pub orchestrator: Arc<Orchestrator<InMemoryEventBus>>,
    pub state: Arc<AppState>,
    subscriptions: Vec<Subscription>,
}

impl System {
    /// Stops every consumer. Queued, unacknowledged messages are dropped,
    /// as they would be on process shutdown.
    pub fn shutdown(&self) {
        for subscription in &self.subscriptions {
            subscription.abort();
        }
        self.bus.close();
    }
}

/// Wires the services together and spawns their consumers.
pub async fn compose(config: &Config) -> System {
    let bus = InMemoryEventBus::new();
    let order_store = InMemoryKvStore::new();
    let stock_store = InMemoryKvStore::new();
    let payment_store = InMemoryKvStore::new();
    let retry = config.retry_policy();

    let stock = Arc::new(StockService::with_retry(
        stock_store.clone(),
        bus.clone(),
        retry,
    ));
    let payment = Arc::new(PaymentService::with_retry(
        payment_store.clone(),
        bus.clone(),
        retry,
    ));
    let orchestrator = Arc::new(Orchestrator::new(Arc::new(bus.clone())));
    let response_consumer = Arc::new(ResponseConsumer::with_retry(order_store.clone(), retry));

    let subscriptions = vec![
        bus.subscribe_with_handle(&[topics::STOCK_OPERATIONS], "stock-service-group", stock.clone()),
        bus.subscribe_with_handle(
            &[topics::PAYMENT_OPERATIONS],
            "payment-service-group",
            payment.clone(),
        ),
        bus.subscribe_with_handle(
            &[
                topics::ORDER_OPERATIONS,
                topics::STOCK_RESPONSES,
                topics::PAYMENT_RESPONSES,
            ],
            "orchestrator-service-group",
            orchestrator.clone(),
        ),
        bus.subscribe_with_handle(
            &[topics::STOCK_RESPONSES, topics::ORCHESTRATOR_RESPONSES],
            "order-service-group",
            response_consumer,
        ),
    ];

    let state = Arc::new(AppState {
        bridge: RequestBridge::new(order_store.clone(), bus.clone(), config.bridge_config()),
        repo: OrderRepository::with_retry(order_store.clone(), retry),
    });

    System {
        bus,
        order_store,
        stock_store,
        payment_store,
        stock,
        payment,
        orchestrator,
        state,
        subscriptions,
    }
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/orders/create/{user_id}", post(routes::orders::create))
        .route("/orders/find/{order_id}", get(routes::orders::find))
        .route(
            "/orders/addItem/{order_id}/{item_id}/{quantity}",
            post(routes::orders::add_item),
        )
        .route("/orders/checkout/{order_id}", post(routes::orders::checkout))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
