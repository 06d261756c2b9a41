use axum::response::IntoResponse;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

/// Register descriptions for every metric the relay emits.
pub fn describe_metrics() {
    metrics::describe_counter!("relay_jobs_submitted_total", "Jobs accepted by a backend");
    metrics::describe_counter!(
        "relay_submission_failures_total",
        "Jobs rejected by their backend at submission"
    );
    metrics::describe_counter!(
        "relay_jobs_resolved_total",
        "Jobs that reached a terminal state, by status"
    );
    metrics::describe_counter!(
        "relay_media_retries_total",
        "Media fetch retries, by failure class"
    );
    metrics::describe_gauge!("relay_jobs_pending", "Jobs currently being polled");
    metrics::describe_histogram!(
        "relay_job_duration_seconds",
        "Time from submission to terminal state"
    );
}

/// Prometheus metrics scrape endpoint.
pub async fn prometheus_metrics(
    axum::extract::State(handle): axum::extract::State<Arc<PrometheusHandle>>,
) -> impl IntoResponse {
    handle.render()
}
