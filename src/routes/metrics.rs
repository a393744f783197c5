use axum::extract::State;
use axum::response::IntoResponse;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

/// Prometheus metrics scrape endpoint.
pub async fn prometheus_metrics(State(handle): State<Arc<PrometheusHandle>>) -> impl IntoResponse {
    handle.render()
}

/// Register descriptions for every metric the service records.
pub fn describe_metrics() {
    metrics::describe_counter!("build_jobs_submitted_total", "Build jobs accepted");
    metrics::describe_counter!(
        "build_jobs_completed_total",
        "Build jobs that produced signed artifacts"
    );
    metrics::describe_counter!("build_jobs_failed_total", "Build jobs that ended in failure");
    metrics::describe_counter!("fetch_retries_total", "Retried outbound fetches");
    metrics::describe_counter!("signing_identities_created_total", "Signing identities generated");
    metrics::describe_gauge!("build_queue_depth", "Jobs waiting for a build slot");
    metrics::describe_gauge!("build_jobs_running", "Jobs currently building");
    metrics::describe_histogram!("build_duration_seconds", "Wall-clock time of one build");
}
