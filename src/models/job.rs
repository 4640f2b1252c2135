use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

/// Status of an NPC document generation job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Processing,
    Succeeded,
    Failed,
}

impl JobStatus {
    /// A job in this state blocks new jobs for the same entity.
    pub fn is_active(self) -> bool {
        matches!(self, JobStatus::Queued | JobStatus::Processing)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }
}

/// Machine-readable failure code stored in `generation_job_error.code`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum JobErrorCode {
    AiTimeout,
    AiInvalidOutput,
    EntityLimitExceeded,
    GenerationFailed,
    JobStalled,
}

/// Structured failure payload persisted on a failed job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobError {
    pub code: JobErrorCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl JobError {
    pub fn new(code: JobErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// Generation job fields embedded on an NPC row.
///
/// All fields are `None` until the first job is queued.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct JobRecord {
    pub job_id: Option<Uuid>,
    pub status: Option<JobStatus>,
    pub started_at: Option<DateTime<Utc>>,
    pub error: Option<JobError>,
}

impl JobRecord {
    pub fn is_active(&self) -> bool {
        self.status.is_some_and(JobStatus::is_active)
    }

    /// Whether this record describes the given job.
    pub fn matches(&self, job_id: Uuid) -> bool {
        self.job_id == Some(job_id)
    }
}
