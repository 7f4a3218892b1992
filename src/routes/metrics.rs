use axum::extract::State;
use axum::response::IntoResponse;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

use crate::services::queue::JobQueue;

#[derive(Clone)]
pub struct MetricsState {
    pub handle: Arc<PrometheusHandle>,
    pub queue: Arc<dyn JobQueue>,
}

/// Prometheus metrics scrape endpoint.
/// Queue depth gauges are refreshed on every scrape.
pub async fn prometheus_metrics(State(state): State<MetricsState>) -> impl IntoResponse {
    match state.queue.counts().await {
        Ok(counts) => {
            for (job_state, count) in [
                ("waiting", counts.waiting),
                ("active", counts.active),
                ("delayed", counts.delayed),
                ("completed", counts.completed),
                ("failed", counts.failed),
            ] {
                metrics::gauge!("import_queue_jobs", "state" => job_state).set(count as f64);
            }
        }
        Err(e) => tracing::warn!(error = %e, "Failed to read queue counts for metrics"),
    }

    state.handle.render()
}
