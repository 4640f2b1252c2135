use npc_forge::{
    config::AppConfig,
    db::{self, store::PgJobStore},
    routes::metrics::describe_metrics,
    services::{
        completion::CompletionClient, queue::JobQueue, storage::R2Client,
        worker::{GenerationWorker, JobOutcome},
    },
};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

const POLL_INTERVAL_MS: u64 = 1000; // 1 second
const STALL_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting NPC generation worker");

    let config = AppConfig::from_env().expect("Failed to load configuration");

    if let Some(addr) = &config.worker_metrics_addr {
        let addr: SocketAddr = addr.parse().expect("Invalid WORKER_METRICS_ADDR");
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .expect("Failed to install Prometheus exporter");
        describe_metrics();
        tracing::info!(%addr, "Serving worker metrics");
    }

    tracing::info!("Connecting to PostgreSQL");
    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");

    tracing::info!("Initializing services");
    let documents = R2Client::new(
        &config.r2_bucket,
        &config.r2_endpoint,
        &config.r2_access_key,
        &config.r2_secret_key,
    )
    .expect("Failed to initialize R2 client");

    let queue = JobQueue::new(&config.redis_url).expect("Failed to initialize job queue");

    let completion = CompletionClient::with_reqwest(config.completion_config())
        .expect("Failed to initialize AI completion client");

    let worker = GenerationWorker::new(
        Arc::new(PgJobStore::new(db_pool)),
        Arc::new(documents),
        Arc::new(completion),
    );

    // Single worker: anything left on the processing list was abandoned by a previous run.
    match queue.requeue_orphaned().await {
        Ok(0) => {}
        Ok(moved) => tracing::warn!(moved, "Requeued orphaned generation jobs"),
        Err(e) => tracing::error!(error = %e, "Failed to requeue orphaned jobs"),
    }

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    tracing::info!("Shutdown signal received, finishing current job");
                    shutdown.cancel();
                }
                Err(e) => tracing::error!(error = %e, "Failed to listen for shutdown signal"),
            }
        }
    });

    let stall_timeout = config.stall_timeout();
    let mut last_sweep: Option<Instant> = None;

    tracing::info!("Worker ready, starting job processing loop");

    while !shutdown.is_cancelled() {
        if last_sweep.map_or(true, |at| at.elapsed() >= STALL_SWEEP_INTERVAL) {
            sweep_stalled(&worker, &queue, stall_timeout).await;
            last_sweep = Some(Instant::now());
        }

        let idle = match process_next_job(&worker, &queue).await {
            Ok(true) => {
                tracing::debug!("Job processed, checking for next job");
                false
            }
            Ok(false) => {
                tracing::trace!("No jobs available, sleeping");
                true
            }
            Err(e) => {
                tracing::error!(error = %e, "Error processing job, will retry");
                true
            }
        };

        if idle {
            tokio::select! {
                _ = sleep(Duration::from_millis(POLL_INTERVAL_MS)) => {}
                _ = shutdown.cancelled() => {}
            }
        }
    }

    tracing::info!("Worker stopped");
}

/// Process the next job from the queue.
/// Returns Ok(true) if a message was handled, Ok(false) if the queue was empty.
async fn process_next_job(
    worker: &GenerationWorker,
    queue: &JobQueue,
) -> Result<bool, Box<dyn std::error::Error + Send + Sync>> {
    let (message, payload) = match queue.dequeue().await? {
        Some(next) => next,
        None => return Ok(false),
    };

    tracing::info!(
        entity_id = %message.entity_id,
        job_id = %message.job_id,
        "Processing generation job"
    );

    // A claim failure leaves the payload on the processing list for the next start.
    let outcome = worker.process(&message).await?;
    queue.complete(&payload).await?;

    match outcome {
        JobOutcome::Succeeded => tracing::info!(job_id = %message.job_id, "Job completed"),
        JobOutcome::Failed(code) => tracing::warn!(job_id = %message.job_id, %code, "Job failed"),
        JobOutcome::Skipped | JobOutcome::Superseded => {
            tracing::info!(job_id = %message.job_id, ?outcome, "Job not recorded")
        }
    }

    Ok(true)
}

async fn sweep_stalled(worker: &GenerationWorker, queue: &JobQueue, stall_timeout: Duration) {
    match worker.reconcile_stalled(stall_timeout).await {
        Ok(0) => {}
        Ok(failed) => tracing::warn!(failed, "Marked stalled generation jobs as failed"),
        Err(e) => tracing::error!(error = %e, "Stall sweep failed"),
    }

    match queue.queue_depth().await {
        Ok(depth) => metrics::gauge!("generation_queue_depth").set(depth as f64),
        Err(e) => tracing::warn!(error = %e, "Failed to read queue depth"),
    }
}
