//! HTTP API server for the durable order saga.
//!
//! Provides REST endpoints to create orders, read their projected status and
//! deliver decisions, with structured logging (tracing) and Prometheus
//! metrics.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post, put};
use checkpoint_store::CheckpointStore;
use metrics_exporter_prometheus::PrometheusHandle;
use saga::{InMemoryOrderActivities, SagaConfig, SagaOrchestrator};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use routes::metrics::MetricsState;
use routes::orders::AppState;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(MetricsState {
            handle: metrics_handle,
            registry: state.orchestrator.registry().clone(),
        });

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/order", post(routes::orders::create))
        .route("/order/{id}", get(routes::orders::get))
        .route("/order/{id}/status", put(routes::orders::update_status))
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

/// Creates the application state over `store` with the given activities.
pub fn create_default_state(
    store: Arc<dyn CheckpointStore>,
    activities: InMemoryOrderActivities,
    config: SagaConfig,
) -> Arc<AppState> {
    let orchestrator = SagaOrchestrator::with_config(store, activities.clone(), config);
    Arc::new(AppState {
        orchestrator,
        activities,
    })
}
