//! Prometheus exposition endpoint.

use axum::extract::State;
use metrics_exporter_prometheus::PrometheusHandle;

/// GET /metrics — renders the recorder's current state.
pub async fn get(State(handle): State<PrometheusHandle>) -> String {
    handle.render()
}
