use axum::extract::State;
use axum::response::IntoResponse;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::Arc;

/// Install the Prometheus recorder and describe the pipeline's metrics.
pub fn install_recorder() -> Result<Arc<PrometheusHandle>, metrics_exporter_prometheus::BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    describe_metrics();
    Ok(Arc::new(handle))
}

pub fn describe_metrics() {
    metrics::describe_counter!(
        "generation_jobs_submitted",
        "Generation jobs accepted and queued"
    );
    metrics::describe_counter!(
        "generation_jobs_completed",
        "Generation jobs that stored a document"
    );
    metrics::describe_counter!(
        "generation_jobs_failed",
        "Generation jobs that ended in failed, by error code"
    );
    metrics::describe_counter!(
        "completion_retries_total",
        "Retried AI completion attempts"
    );
    metrics::describe_histogram!(
        "generation_processing_seconds",
        "Time from claiming a generation job to its terminal write"
    );
    metrics::describe_gauge!(
        "generation_queue_depth",
        "Generation jobs waiting in the queue"
    );
}

/// Prometheus metrics scrape endpoint.
/// Returns metrics in Prometheus text exposition format.
pub async fn prometheus_metrics(State(handle): State<Arc<PrometheusHandle>>) -> impl IntoResponse {
    handle.render()
}
