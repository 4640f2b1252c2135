//! Job record persistence seam.
//!
//! Every transition is a guarded write: the current status (and job id) is
//! checked in the same statement that changes it, so concurrent writers can
//! never produce two active jobs for one entity.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::db::queries;
use crate::models::job::{JobError, JobStatus};
use crate::models::npc::NpcEntity;

/// Why a new job was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictReason {
    /// A job is `queued` or `processing`.
    JobActive,
    /// The last job is terminal and the caller did not ask to regenerate.
    AlreadyGenerated,
}

#[derive(Debug, Clone, PartialEq)]
pub enum QueueOutcome {
    Queued {
        job_id: Uuid,
        submitted_at: DateTime<Utc>,
    },
    /// Entity missing, archived, or not owned by the caller.
    NotFound,
    Conflict(ConflictReason),
}

impl QueueOutcome {
    /// Outcome for a refused queue attempt, given the status seen afterwards.
    pub fn refused(current: Option<JobStatus>) -> Self {
        match current {
            Some(status) if status.is_terminal() => {
                QueueOutcome::Conflict(ConflictReason::AlreadyGenerated)
            }
            // Null after a refused write means another writer got there first.
            _ => QueueOutcome::Conflict(ConflictReason::JobActive),
        }
    }
}

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn find_entity(&self, entity_id: Uuid) -> Result<Option<NpcEntity>, StoreError>;

    /// Move the entity's job record to `queued` under `job_id`, if allowed.
    async fn try_queue_job(
        &self,
        entity_id: Uuid,
        owner_id: &str,
        regenerate: bool,
        job_id: Uuid,
    ) -> Result<QueueOutcome, StoreError>;

    /// `queued -> processing` for exactly this job. `false` if the record no
    /// longer describes a queued `job_id`.
    async fn mark_processing(&self, entity_id: Uuid, job_id: Uuid) -> Result<bool, StoreError>;

    /// `processing -> succeeded`. `false` (no change) otherwise.
    async fn mark_succeeded(&self, entity_id: Uuid, job_id: Uuid) -> Result<bool, StoreError>;

    /// `queued | processing -> failed`. `false` (no change) otherwise.
    async fn mark_failed(
        &self,
        entity_id: Uuid,
        job_id: Uuid,
        error: &JobError,
    ) -> Result<bool, StoreError>;

    /// `(entity_id, job_id)` of jobs processing since before `started_before`.
    async fn find_stalled(
        &self,
        started_before: DateTime<Utc>,
    ) -> Result<Vec<(Uuid, Uuid)>, StoreError>;
}

/// Postgres-backed [`JobStore`] over the `npcs` table.
#[derive(Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn find_entity(&self, entity_id: Uuid) -> Result<Option<NpcEntity>, StoreError> {
        queries::get_npc(&self.pool, entity_id).await
    }

    async fn try_queue_job(
        &self,
        entity_id: Uuid,
        owner_id: &str,
        regenerate: bool,
        job_id: Uuid,
    ) -> Result<QueueOutcome, StoreError> {
        if let Some(submitted_at) =
            queries::queue_job(&self.pool, entity_id, owner_id, regenerate, job_id).await?
        {
            return Ok(QueueOutcome::Queued {
                job_id,
                submitted_at,
            });
        }

        match queries::get_visible_job_status(&self.pool, entity_id, owner_id).await? {
            None => Ok(QueueOutcome::NotFound),
            Some(current) => Ok(QueueOutcome::refused(current)),
        }
    }

    async fn mark_processing(&self, entity_id: Uuid, job_id: Uuid) -> Result<bool, StoreError> {
        queries::mark_job_processing(&self.pool, entity_id, job_id).await
    }

    async fn mark_succeeded(&self, entity_id: Uuid, job_id: Uuid) -> Result<bool, StoreError> {
        queries::mark_job_succeeded(&self.pool, entity_id, job_id).await
    }

    async fn mark_failed(
        &self,
        entity_id: Uuid,
        job_id: Uuid,
        error: &JobError,
    ) -> Result<bool, StoreError> {
        queries::mark_job_failed(&self.pool, entity_id, job_id, error).await
    }

    async fn find_stalled(
        &self,
        started_before: DateTime<Utc>,
    ) -> Result<Vec<(Uuid, Uuid)>, StoreError> {
        queries::get_stalled_jobs(&self.pool, started_before, 100).await
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Corrupt job record: {0}")]
    Corrupt(String),
}
