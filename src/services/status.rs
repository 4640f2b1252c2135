use tracing::warn;
use uuid::Uuid;

use crate::db::store::{JobStore, StoreError};
use crate::models::generation::{JobErrorView, JobStatusView};
use crate::models::job::JobStatus;
use crate::services::storage::{DocumentStore, StorageError};

/// Current state of `job_id` on `entity_id`, as seen by its owner.
///
/// Anything the caller may not see is reported as not found.
pub async fn job_status(
    store: &dyn JobStore,
    documents: &dyn DocumentStore,
    caller: &str,
    entity_id: Uuid,
    job_id: Uuid,
) -> Result<JobStatusView, StatusError> {
    let entity = store
        .find_entity(entity_id)
        .await?
        .filter(|entity| entity.is_visible_to(caller))
        .ok_or(StatusError::NotFound)?;

    if !entity.job.matches(job_id) {
        return Err(StatusError::NotFound);
    }
    let status = entity.job.status.ok_or(StatusError::NotFound)?;

    let document = if status == JobStatus::Succeeded {
        let document = documents.get_document(entity_id).await?;
        if document.is_none() {
            warn!(%entity_id, %job_id, "Succeeded job has no stored document");
        }
        document
    } else {
        None
    };

    let error = match status {
        JobStatus::Failed => entity.job.error.as_ref().map(JobErrorView::from),
        _ => None,
    };

    Ok(JobStatusView {
        job_id,
        entity_id,
        status,
        document_size_bytes: document.as_ref().map(|d| d.len() as u64),
        document,
        error,
        updated_at: entity.updated_at,
    })
}

#[derive(Debug, thiserror::Error)]
pub enum StatusError {
    #[error("Generation job not found")]
    NotFound,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Failed to read document: {0}")]
    Storage(#[from] StorageError),
}
