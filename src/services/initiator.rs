use garde::Validate;
use serde_json::json;
use tracing::{error, info, instrument};
use uuid::Uuid;

use crate::db::store::{ConflictReason, JobStore, QueueOutcome, StoreError};
use crate::models::generation::{TriggerRequest, TriggerResponse};
use crate::models::job::{JobError, JobErrorCode, JobStatus};
use crate::services::queue::{GenerationJobMessage, JobPublisher, QueueError};

/// Accept a start/regenerate request and queue a job for the entity.
///
/// The guarded write in the store is what enforces one active job per entity;
/// publishing the queue message afterwards is what wakes the worker.
#[instrument(skip(store, publisher, request), fields(regenerate = request.regenerate))]
pub async fn start_generation(
    store: &dyn JobStore,
    publisher: &dyn JobPublisher,
    caller: &str,
    entity_id: Uuid,
    request: TriggerRequest,
) -> Result<TriggerResponse, InitiateError> {
    request.validate()?;

    let job_id = Uuid::new_v4();
    let submitted_at = match store
        .try_queue_job(entity_id, caller, request.regenerate, job_id)
        .await?
    {
        QueueOutcome::Queued { submitted_at, .. } => submitted_at,
        QueueOutcome::NotFound => return Err(InitiateError::NotFound),
        QueueOutcome::Conflict(reason) => {
            info!(?reason, "Refusing to queue generation job");
            return Err(InitiateError::Conflict(reason));
        }
    };

    let message = GenerationJobMessage {
        entity_id,
        job_id,
        previous_document: request.current_document,
    };
    if let Err(e) = publisher.publish(&message).await {
        error!(%job_id, error = %e, "Failed to publish generation job");
        // Leave nothing stuck in `queued` when no worker will ever see the job.
        let failure = JobError::new(JobErrorCode::GenerationFailed, "failed to enqueue generation job")
            .with_details(json!({ "error": e.to_string() }));
        if let Err(store_err) = store.mark_failed(entity_id, job_id, &failure).await {
            error!(%job_id, error = %store_err, "Failed to mark unpublished job as failed");
        }
        return Err(InitiateError::Queue(e));
    }

    metrics::counter!("generation_jobs_submitted").increment(1);
    info!(%job_id, "Generation job queued");

    Ok(TriggerResponse {
        job_id,
        status: JobStatus::Queued,
        entity_id,
        submitted_at,
    })
}

#[derive(Debug, thiserror::Error)]
pub enum InitiateError {
    #[error("Invalid request: {0}")]
    Invalid(#[from] garde::Report),

    #[error("NPC not found")]
    NotFound,

    #[error("Generation job conflict: {0:?}")]
    Conflict(ConflictReason),

    #[error("Job queue unavailable: {0}")]
    Queue(QueueError),

    #[error(transparent)]
    Store(#[from] StoreError),
}
