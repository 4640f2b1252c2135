//! Generation worker: turns one queued job into a stored document.
//!
//! The only step allowed to fail the delivery is claiming the job. Once the
//! record says `processing`, every failure is written back as a terminal
//! `failed` status instead of surfacing to the queue.

use serde_json::json;
use std::error::Error as StdError;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::db::store::{JobStore, StoreError};
use crate::models::job::{JobError, JobErrorCode};
use crate::models::npc::PromptModel;
use crate::services::completion::{CompletionClient, CompletionError, CompletionErrorKind, GenerateOptions};
use crate::services::queue::GenerationJobMessage;
use crate::services::storage::{DocumentStore, StorageError};

/// What happened to one delivered message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Succeeded,
    Failed(JobErrorCode),
    /// The record no longer describes this queued job (stale or duplicate delivery).
    Skipped,
    /// The document was written but the record moved on before the final write.
    Superseded,
}

pub struct GenerationWorker {
    store: Arc<dyn JobStore>,
    documents: Arc<dyn DocumentStore>,
    completion: Arc<CompletionClient>,
    options: GenerateOptions,
}

impl GenerationWorker {
    pub fn new(
        store: Arc<dyn JobStore>,
        documents: Arc<dyn DocumentStore>,
        completion: Arc<CompletionClient>,
    ) -> Self {
        Self {
            store,
            documents,
            completion,
            options: GenerateOptions::default(),
        }
    }

    pub fn with_options(mut self, options: GenerateOptions) -> Self {
        self.options = options;
        self
    }

    #[instrument(skip(self, message), fields(entity_id = %message.entity_id, job_id = %message.job_id))]
    pub async fn process(&self, message: &GenerationJobMessage) -> Result<JobOutcome, WorkerError> {
        let started = Instant::now();

        if !self
            .store
            .mark_processing(message.entity_id, message.job_id)
            .await?
        {
            info!("Job is no longer queued, skipping delivery");
            return Ok(JobOutcome::Skipped);
        }

        let outcome = match self.generate(message).await {
            Ok(true) => {
                metrics::counter!("generation_jobs_completed").increment(1);
                info!("Generation job succeeded");
                JobOutcome::Succeeded
            }
            Ok(false) => {
                warn!("Job record changed during generation, result not recorded");
                JobOutcome::Superseded
            }
            Err(failure) => {
                let job_error = failure.to_job_error();
                warn!(code = %job_error.code, error = %failure, "Generation job failed");
                self.record_failure(message.entity_id, message.job_id, &job_error)
                    .await;
                metrics::counter!("generation_jobs_failed", "code" => job_error.code.to_string())
                    .increment(1);
                JobOutcome::Failed(job_error.code)
            }
        };

        metrics::histogram!("generation_processing_seconds").record(started.elapsed().as_secs_f64());
        Ok(outcome)
    }

    /// Steps after the claim. `Ok(false)` when the final guarded write was refused.
    async fn generate(&self, message: &GenerationJobMessage) -> Result<bool, GenerationFailure> {
        let entity = self
            .store
            .find_entity(message.entity_id)
            .await?
            .filter(|entity| entity.archived_at.is_none())
            .ok_or(GenerationFailure::EntityMissing(message.entity_id))?;

        let prompt = PromptModel::from_entity(&entity, message.previous_document.clone());
        prompt.check_limits().map_err(GenerationFailure::Limits)?;

        let document = self
            .completion
            .generate_document(&prompt, &self.options)
            .await
            .map_err(GenerationFailure::Completion)?;

        self.documents.put_document(entity.id, &document).await?;
        info!(bytes = document.len(), "Document stored");

        Ok(self.store.mark_succeeded(entity.id, message.job_id).await?)
    }

    /// Best effort: a failed write here leaves the job for the stall sweep.
    async fn record_failure(&self, entity_id: Uuid, job_id: Uuid, job_error: &JobError) {
        match self.store.mark_failed(entity_id, job_id, job_error).await {
            Ok(true) => {}
            Ok(false) => warn!("Job record changed before failure could be recorded"),
            Err(e) => error!(error = %e, "Failed to record job failure"),
        }
    }

    /// Fail jobs that have sat in `processing` for longer than `max_age`.
    ///
    /// Returns how many jobs were moved to `failed`.
    pub async fn reconcile_stalled(&self, max_age: Duration) -> Result<usize, StoreError> {
        let cutoff = chrono::Utc::now() - chrono::Duration::seconds(max_age.as_secs() as i64);
        let stalled = self.store.find_stalled(cutoff).await?;

        let mut failed = 0;
        for (entity_id, job_id) in stalled {
            let job_error = JobError::new(
                JobErrorCode::JobStalled,
                format!("job was processing for more than {}s", max_age.as_secs()),
            );
            if self.store.mark_failed(entity_id, job_id, &job_error).await? {
                warn!(%entity_id, %job_id, "Stalled generation job marked failed");
                metrics::counter!("generation_jobs_failed", "code" => JobErrorCode::JobStalled.to_string())
                    .increment(1);
                failed += 1;
            }
        }
        Ok(failed)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("Failed to claim job: {0}")]
    Claim(#[from] StoreError),
}

#[derive(Debug, thiserror::Error)]
enum GenerationFailure {
    #[error("NPC {0} no longer exists")]
    EntityMissing(Uuid),

    #[error("NPC exceeds generation limits: {0}")]
    Limits(garde::Report),

    #[error(transparent)]
    Completion(CompletionError),

    #[error("Failed to store document: {0}")]
    Storage(#[from] StorageError),

    #[error("Failed to load NPC: {0}")]
    Store(#[from] StoreError),
}

impl GenerationFailure {
    fn to_job_error(&self) -> JobError {
        match self {
            GenerationFailure::Completion(e) => {
                let code = match e.kind {
                    CompletionErrorKind::Timeout => JobErrorCode::AiTimeout,
                    CompletionErrorKind::Validation | CompletionErrorKind::InvalidResponse => {
                        JobErrorCode::AiInvalidOutput
                    }
                    _ => JobErrorCode::GenerationFailed,
                };
                JobError::new(code, e.message.clone()).with_details(e.to_details())
            }
            GenerationFailure::Limits(report) => {
                JobError::new(JobErrorCode::EntityLimitExceeded, report.to_string())
            }
            other => JobError::new(JobErrorCode::GenerationFailed, other.to_string())
                .with_details(json!({ "chain": error_chain(other) })),
        }
    }
}

fn error_chain(err: &dyn StdError) -> Vec<String> {
    let mut chain = vec![err.to_string()];
    let mut source = err.source();
    while let Some(cause) = source {
        chain.push(cause.to_string());
        source = cause.source();
    }
    chain
}
