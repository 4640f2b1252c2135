use chrono::{DateTime, Utc};
use garde::Validate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::job::JobRecord;

/// Largest `currentDocument` hint carried into a prompt (256 KiB).
pub const MAX_PREVIOUS_DOCUMENT_BYTES: usize = 256 * 1024;

/// A single named stat on an NPC (e.g. `strength = 12`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NpcStat {
    pub name: String,
    pub value: i64,
}

/// An NPC row as stored in the `npcs` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NpcEntity {
    pub id: Uuid,
    pub owner_id: String,
    pub name: String,
    pub appearance: Option<String>,
    pub stats: Vec<NpcStat>,
    pub dialogue: Vec<String>,
    pub modules: Vec<String>,
    pub job: JobRecord,
    pub archived_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl NpcEntity {
    /// Visible to `caller`: owned by them and not archived.
    pub fn is_visible_to(&self, caller: &str) -> bool {
        self.archived_at.is_none() && self.owner_id == caller
    }
}

/// Generation-relevant projection of an NPC, assembled right before each AI call.
#[derive(Debug, Clone, Serialize, Validate)]
pub struct PromptModel {
    #[garde(length(min = 1, max = 120))]
    pub name: String,

    #[garde(length(max = 4000))]
    pub appearance: Option<String>,

    #[garde(length(max = 64))]
    pub stats: Vec<NpcStat>,

    #[garde(length(max = 100), inner(length(max = 1000)))]
    pub dialogue: Vec<String>,

    #[garde(length(max = 32), inner(length(min = 1, max = 64)))]
    pub modules: Vec<String>,

    /// Previously generated document, used as a revision hint only.
    #[garde(skip)]
    pub previous_document: Option<String>,
}

impl PromptModel {
    pub fn from_entity(entity: &NpcEntity, previous_document: Option<String>) -> Self {
        let previous_document = previous_document
            .filter(|doc| !doc.trim().is_empty())
            .filter(|doc| {
                let fits = doc.len() <= MAX_PREVIOUS_DOCUMENT_BYTES;
                if !fits {
                    tracing::warn!(
                        entity_id = %entity.id,
                        bytes = doc.len(),
                        "Dropping oversized previous document hint"
                    );
                }
                fits
            });

        Self {
            name: entity.name.clone(),
            appearance: entity.appearance.clone(),
            stats: entity.stats.clone(),
            dialogue: entity.dialogue.clone(),
            modules: entity.modules.clone(),
            previous_document,
        }
    }

    /// Check the size limits a prompt must fit within.
    pub fn check_limits(&self) -> Result<(), garde::Report> {
        self.validate()
    }
}
