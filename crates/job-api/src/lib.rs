//! Job service taking part in compensating transactions.
//!
//! Serves CRUD endpoints for jobs. Writes made under a `transaction_id`
//! header are recorded in the compensation ledger and later committed or
//! reversed when the orchestrator publishes the transaction's outcome.

pub mod compensations;
pub mod config;
pub mod error;
pub mod routes;
pub mod store;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use broker::Broker;
use ledger::CompensationLedger;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use transaction::{Participant, ParticipantConfig, WatchdogConfig};

use routes::jobs::AppState;
use store::InMemoryJobStore;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<L: CompensationLedger + Clone + 'static>(
    state: Arc<AppState<L>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check::<L>))
        .route("/job", post(routes::jobs::create::<L>))
        .route(
            "/job/{id}",
            get(routes::jobs::get::<L>)
                .put(routes::jobs::update::<L>)
                .delete(routes::jobs::delete::<L>),
        )
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

/// Creates the application state: an empty job store and a participant
/// whose reversal handlers act on it.
pub fn create_state<L: CompensationLedger + Clone + 'static>(
    participant_id: &str,
    ledger: L,
    broker: Arc<dyn Broker>,
    watchdog: WatchdogConfig,
) -> Arc<AppState<L>> {
    let store = InMemoryJobStore::new();
    let participant = Participant::with_config(
        participant_id,
        ledger,
        broker,
        compensations::registry(store.clone()),
        ParticipantConfig {
            watchdog,
            ..ParticipantConfig::default()
        },
    );

    Arc::new(AppState { store, participant })
}
