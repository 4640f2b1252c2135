//! NPC and provider-response fixtures shared by the test suites.

#![allow(dead_code)]

use chrono::Utc;
use npc_forge::models::job::JobRecord;
use npc_forge::models::npc::{NpcEntity, NpcStat};
use npc_forge::services::completion::TransportResponse;
use serde_json::json;
use uuid::Uuid;

pub const OWNER: &str = "user-1";
pub const STRANGER: &str = "user-2";

pub const MIRA_DOCUMENT: &str = "<npc><name>Mira the Smith</name><appearance>Soot-streaked apron</appearance>\
<stats><stat name=\"strength\" value=\"14\"/></stats><dialogue><line>Need something forged?</line></dialogue>\
<modules><module id=\"shop\"/></modules></npc>";

/// A complete, never-generated NPC owned by [`OWNER`].
pub fn mira() -> NpcEntity {
    let now = Utc::now();
    NpcEntity {
        id: Uuid::new_v4(),
        owner_id: OWNER.to_string(),
        name: "Mira the Smith".to_string(),
        appearance: Some("Soot-streaked apron, braided red hair".to_string()),
        stats: vec![
            NpcStat {
                name: "strength".to_string(),
                value: 14,
            },
            NpcStat {
                name: "charisma".to_string(),
                value: 9,
            },
        ],
        dialogue: vec![
            "Need something forged?".to_string(),
            "Mind the sparks.".to_string(),
        ],
        modules: vec!["shop".to_string(), "repair".to_string()],
        job: JobRecord::default(),
        archived_at: None,
        created_at: now,
        updated_at: now,
    }
}

/// An NPC whose dialogue exceeds what a prompt may carry.
pub fn chatterbox() -> NpcEntity {
    let mut npc = mira();
    npc.name = "Endless Ed".to_string();
    npc.dialogue = (0..150).map(|i| format!("Line {i}")).collect();
    npc
}

pub fn completion_body(content: &str) -> String {
    json!({
        "id": "gen-test",
        "model": "test-model",
        "choices": [{"index": 0, "message": {"role": "assistant", "content": content}}],
        "usage": {"prompt_tokens": 120, "completion_tokens": 80, "total_tokens": 200}
    })
    .to_string()
}

/// 200 with a schema-conforming document payload.
pub fn document_response(document: &str) -> TransportResponse {
    TransportResponse::new(200, completion_body(&json!({ "document": document }).to_string()))
}

pub fn upstream_error() -> TransportResponse {
    TransportResponse::new(500, r#"{"error": {"message": "upstream overloaded", "code": 500}}"#)
        .with_header("x-request-id", "req-500")
}

pub fn unparseable_completion() -> TransportResponse {
    TransportResponse::new(200, completion_body("I'm sorry, I can't produce XML today."))
}
