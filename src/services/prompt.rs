//! Prompt and output-schema formatting for NPC document generation.

use serde::Deserialize;
use serde_json::json;
use std::fmt::Write;

use crate::models::npc::PromptModel;
use crate::services::completion::dto::{ChatMessage, JsonSchemaFormat, ResponseFormat};

const SCHEMA_NAME: &str = "npc_document";

const SYSTEM_PROMPT: &str = "\
You write NPC configuration documents for a role-playing game engine.
Produce a single well-formed XML document with root element <npc> containing, in order:
  <name> - the NPC's display name
  <appearance> - a short visual description
  <stats> - one <stat name=\"...\" value=\"...\"/> per stat
  <dialogue> - one <line> per dialogue message, in the given order
  <modules> - one <module id=\"...\"/> per enabled module, with any configuration it needs
Use only the data provided. Escape XML special characters. Do not add comments.";

/// Payload the model must return: exactly one non-blank `document` string.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DocumentPayload {
    pub document: String,
}

pub fn system_prompt() -> &'static str {
    SYSTEM_PROMPT
}

/// Render the prompt model as a deterministic text block.
pub fn user_prompt(model: &PromptModel) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "NPC name: {}", model.name);
    let _ = writeln!(
        out,
        "Appearance: {}",
        model.appearance.as_deref().unwrap_or("(not specified)")
    );

    out.push_str("Stats:\n");
    if model.stats.is_empty() {
        out.push_str("- (none)\n");
    }
    for stat in &model.stats {
        let _ = writeln!(out, "- {}: {}", stat.name, stat.value);
    }

    out.push_str("Dialogue:\n");
    if model.dialogue.is_empty() {
        out.push_str("- (none)\n");
    }
    for (i, line) in model.dialogue.iter().enumerate() {
        let _ = writeln!(out, "{}. {}", i + 1, line);
    }

    let modules = if model.modules.is_empty() {
        "(none)".to_string()
    } else {
        model.modules.join(", ")
    };
    let _ = writeln!(out, "Enabled modules: {modules}");

    if let Some(previous) = &model.previous_document {
        out.push_str(
            "\nThe NPC's current document follows. Revise it to match the data above, \
             keeping anything that is still accurate.\n<current_document>\n",
        );
        out.push_str(previous);
        out.push_str("\n</current_document>\n");
    }

    out.push_str("\nReturn the XML document in the `document` field.");
    out
}

pub fn build_messages(model: &PromptModel) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(system_prompt()),
        ChatMessage::user(user_prompt(model)),
    ]
}

pub fn document_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "document": {
                "type": "string",
                "description": "The complete NPC XML document"
            }
        },
        "required": ["document"],
        "additionalProperties": false
    })
}

pub fn response_format() -> ResponseFormat {
    ResponseFormat::JsonSchema {
        json_schema: JsonSchemaFormat {
            name: SCHEMA_NAME.to_string(),
            strict: true,
            schema: document_schema(),
        },
    }
}

/// Inline replacement for `response_format` on providers that reject it.
pub fn fallback_instruction() -> String {
    format!(
        "Return ONLY a JSON object matching this JSON schema, with no text before or after it:\n{}",
        document_schema()
    )
}

/// First balanced `{...}` block in `text`, skipping braces inside JSON strings.
pub fn extract_json_block(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }

        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }

    None
}
