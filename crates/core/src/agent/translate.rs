//! Translation between the persisted domain model (`store::{Message, Part}`)
//! and the provider wire model (`ai::types::{ModelMessage, Content}`) —
//! spec §3's "two-layer message representation".
//!
//! The teacher keeps its session rows close enough to the wire format that
//! no explicit translation module exists; this crate needs one because
//! `store` is deliberately decoupled from `ai::types` (see both modules'
//! doc comments). Every conversion here is a pure function so it's trivial
//! to test without a store or a provider adapter.

use crate::ai::types::{self, AiToolCall, Content, ModelMessage};
use crate::store::{self, Part};

/// Map a store role onto its wire-layer counterpart. The two enums carry
/// the same variants by design (spec §3), so this is a straight rename.
pub fn role_to_wire(role: store::Role) -> types::Role {
    match role {
        store::Role::System => types::Role::System,
        store::Role::User => types::Role::User,
        store::Role::Assistant => types::Role::Assistant,
        store::Role::Tool => types::Role::Tool,
    }
}

pub fn usage_to_store(usage: &types::Usage) -> store::Usage {
    store::Usage {
        prompt_tokens: usage.prompt_tokens as u64,
        completion_tokens: usage.completion_tokens as u64,
        cached_tokens: usage.cache_read_input_tokens as u64,
        cost: 0.0,
    }
}

/// Render one persisted part as zero or one wire content blocks. A `Finish`
/// part carries no wire representation (it's the store's own bookkeeping);
/// an unfinished `ToolCall` part (arguments still streaming in) is likewise
/// dropped — only a message that's been fully assembled is ever translated
/// back into a request.
fn part_to_content(part: &Part) -> Option<Content> {
    match part {
        Part::Text { text } => Some(Content::Text { text: text.clone() }),
        Part::Reasoning { text, signature } => match signature {
            Some(signature) => Some(Content::Thinking {
                thinking: text.clone(),
                signature: signature.clone(),
            }),
            None => Some(Content::RedactedThinking { data: text.clone() }),
        },
        Part::BinaryAttachment { media_type, data } => Some(Content::Image {
            image: types::ImageContent {
                url: None,
                base64: Some(data.clone()),
                media_type: Some(media_type.clone()),
            },
            detail: None,
        }),
        Part::ToolCall {
            id,
            name,
            input,
            finished,
        } => (*finished).then(|| Content::ToolUse {
            id: id.clone(),
            name: name.clone(),
            input: input.clone(),
        }),
        Part::ToolResult {
            tool_call_id,
            content,
            is_error,
            ..
        } => Some(Content::ToolResult {
            tool_use_id: tool_call_id.clone(),
            output: serde_json::Value::String(content.clone()),
            is_error: Some(*is_error),
        }),
        Part::Finish { .. } => None,
    }
}

/// Assemble the prompt history for a request (spec §4.7 step 2): every
/// finished message in the session, in order, translated to the wire
/// model. An unfinished trailing message (a crash mid-stream left it that
/// way) is skipped rather than sent half-built.
pub fn to_model_messages(history: &[store::Message]) -> Vec<ModelMessage> {
    history
        .iter()
        .filter(|m| m.is_finished())
        .filter_map(|m| {
            let content: Vec<Content> = m.parts.iter().filter_map(part_to_content).collect();
            if content.is_empty() {
                return None;
            }
            Some(ModelMessage {
                role: role_to_wire(m.role),
                content,
            })
        })
        .collect()
}

/// Split a finished assistant response's content blocks into the store
/// parts it should be persisted as, plus the tool calls the executor needs
/// to dispatch. Used by the non-streaming fallback path and by tests;
/// `stream::run_turn` builds the same parts incrementally as events arrive.
pub fn response_content_to_parts(content: &[Content]) -> (Vec<Part>, Vec<AiToolCall>) {
    let mut parts = Vec::with_capacity(content.len());
    let mut tool_calls = Vec::new();

    for block in content {
        match block {
            Content::Text { text } => parts.push(Part::Text { text: text.clone() }),
            Content::Thinking { thinking, signature } => parts.push(Part::Reasoning {
                text: thinking.clone(),
                signature: Some(signature.clone()),
            }),
            Content::RedactedThinking { data } => parts.push(Part::Reasoning {
                text: data.clone(),
                signature: None,
            }),
            Content::ToolUse { id, name, input } => {
                parts.push(Part::ToolCall {
                    id: id.clone(),
                    name: name.clone(),
                    input: input.clone(),
                    finished: true,
                });
                tool_calls.push(AiToolCall {
                    id: id.clone(),
                    name: name.clone(),
                    arguments: input.clone(),
                });
            }
            Content::ToolResult { .. } | Content::Image { .. } | Content::Document { .. } => {}
        }
    }

    (parts, tool_calls)
}

/// Build the `Part::ToolResult`/`Content::ToolResult` pair for one
/// completed tool call — the two layers always agree here, so both
/// directions are produced together.
pub fn tool_result_part(tool_call_id: &str, output: &str, is_error: bool) -> Part {
    Part::ToolResult {
        tool_call_id: tool_call_id.to_string(),
        content: output.to_string(),
        is_error,
        metadata: None,
    }
}

pub fn tool_result_content(tool_call_id: &str, output: &str, is_error: bool) -> Content {
    Content::ToolResult {
        tool_use_id: tool_call_id.to_string(),
        output: serde_json::Value::String(output.to_string()),
        is_error: Some(is_error),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn finished_message(role: store::Role, parts: Vec<Part>) -> store::Message {
        store::Message {
            id: "m1".into(),
            session_id: "s1".into(),
            role,
            parts,
            created_at: Utc::now(),
            finished_at: Some(Utc::now()),
        }
    }

    #[test]
    fn unfinished_trailing_message_is_skipped() {
        let mut msg = finished_message(store::Role::Assistant, vec![Part::Text { text: "hi".into() }]);
        msg.finished_at = None;
        let out = to_model_messages(std::slice::from_ref(&msg));
        assert!(out.is_empty());
    }

    #[test]
    fn tool_role_message_carries_tool_result_content() {
        let msg = finished_message(
            store::Role::Tool,
            vec![Part::ToolResult {
                tool_call_id: "call_1".into(),
                content: "ok".into(),
                is_error: false,
                metadata: None,
            }],
        );
        let out = to_model_messages(&[msg]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].role, types::Role::Tool);
        assert!(matches!(out[0].content[0], Content::ToolResult { .. }));
    }

    #[test]
    fn unfinished_tool_call_part_is_dropped_from_translation() {
        let msg = finished_message(
            store::Role::Assistant,
            vec![
                Part::Text { text: "working on it".into() },
                Part::ToolCall {
                    id: "call_1".into(),
                    name: "bash".into(),
                    input: serde_json::json!({}),
                    finished: false,
                },
            ],
        );
        let out = to_model_messages(&[msg]);
        assert_eq!(out[0].content.len(), 1);
    }

    #[test]
    fn response_content_splits_tool_calls() {
        let content = vec![
            Content::Text { text: "sure".into() },
            Content::ToolUse {
                id: "call_1".into(),
                name: "bash".into(),
                input: serde_json::json!({"command": "ls"}),
            },
        ];
        let (parts, calls) = response_content_to_parts(&content);
        assert_eq!(parts.len(), 2);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "bash");
    }
}
