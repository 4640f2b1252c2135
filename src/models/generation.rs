use chrono::{DateTime, Utc};
use garde::Validate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::job::{JobError, JobErrorCode, JobStatus};

/// Body of `POST /api/v1/npcs/{entity_id}/generation`.
#[derive(Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct TriggerRequest {
    /// Must be true to redo a job that already reached a terminal state.
    #[serde(default)]
    #[garde(skip)]
    pub regenerate: bool,

    /// Client's copy of the current document. A hint only, never authoritative.
    #[serde(default)]
    #[garde(length(max = 262144))]
    pub current_document: Option<String>,
}

/// Response after a generation job has been accepted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TriggerResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub entity_id: Uuid,
    pub submitted_at: DateTime<Utc>,
}

/// Public part of a persisted job error.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobErrorView {
    pub code: JobErrorCode,
    pub message: String,
}

impl From<&JobError> for JobErrorView {
    fn from(err: &JobError) -> Self {
        Self {
            code: err.code,
            message: err.message.clone(),
        }
    }
}

/// Response for querying a generation job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusView {
    pub job_id: Uuid,
    pub entity_id: Uuid,
    pub status: JobStatus,
    pub document: Option<String>,
    pub document_size_bytes: Option<u64>,
    pub error: Option<JobErrorView>,
    pub updated_at: DateTime<Utc>,
}

impl JobStatusView {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
