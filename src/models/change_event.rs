//! Row-mutation webhook payloads.
//!
//! Jobs are normally dispatched through the queue by the initiator. This
//! adapter accepts change events from a database webhook and turns the ones
//! that represent a fresh `queued` transition into queue messages.

use serde::Deserialize;
use uuid::Uuid;

use crate::models::job::JobStatus;
use crate::services::queue::GenerationJobMessage;

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeType {
    Insert,
    Update,
    Delete,
}

/// The subset of an `npcs` row the adapter cares about. Other columns are ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct ChangeRecord {
    pub id: Uuid,
    #[serde(default)]
    pub generation_job_id: Option<Uuid>,
    #[serde(default)]
    pub generation_job_status: Option<JobStatus>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChangeEvent {
    #[serde(rename = "type")]
    pub change_type: ChangeType,
    pub table: String,
    pub record: Option<ChangeRecord>,
    #[serde(default)]
    pub old_record: Option<ChangeRecord>,
}

impl ChangeEvent {
    /// Fires on an insert that is already `queued`, or an update into `queued`
    /// from any other status. Unrelated edits to a queued row do not fire.
    pub fn should_trigger(&self) -> bool {
        let Some(record) = &self.record else {
            return false;
        };
        if record.generation_job_status != Some(JobStatus::Queued) {
            return false;
        }

        match self.change_type {
            ChangeType::Insert => true,
            ChangeType::Update => {
                let previous = self
                    .old_record
                    .as_ref()
                    .and_then(|old| old.generation_job_status);
                previous != Some(JobStatus::Queued)
            }
            ChangeType::Delete => false,
        }
    }

    /// Queue message for a triggering event, if it names a job id.
    pub fn to_message(&self) -> Option<GenerationJobMessage> {
        if !self.should_trigger() {
            return None;
        }
        let record = self.record.as_ref()?;
        Some(GenerationJobMessage {
            entity_id: record.id,
            job_id: record.generation_job_id?,
            previous_document: None,
        })
    }
}
