//! Prometheus metrics endpoint.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use metrics_exporter_prometheus::PrometheusHandle;
use saga::SagaRegistry;

/// State of the metrics route.
#[derive(Clone)]
pub struct MetricsState {
    pub handle: PrometheusHandle,
    pub registry: SagaRegistry,
}

/// GET /metrics: Prometheus-formatted metrics.
pub async fn get(State(state): State<MetricsState>) -> impl IntoResponse {
    metrics::gauge!("sagas_running").set(state.registry.len() as f64);
    (
        StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.handle.render(),
    )
}
