//! Session & Message Store (spec §4.6): an append-only conversation log
//! with typed parts, and a session tree with parent/child links and
//! rolled-up token/cost counters.
//!
//! The crate treats persistence as a narrow contract (spec §6) expressed
//! here as two traits, [`SessionStore`] and [`MessageStore`]; `store::sqlite`
//! is the one concrete implementation, adapted from the teacher's
//! `storage/sessions.rs`/`storage/messages.rs` schema down to the columns
//! this data model needs.

pub mod sqlite;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::StoreError;

/// Message role (spec §3: `role ∈ {System, User, Assistant, Tool}`) —
/// mirrors `ai::types::Role` exactly since the wire layer and the stored
/// layer agree on this axis; kept as a distinct type so the store never
/// depends on the provider-adapter module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
            Role::Tool => write!(f, "tool"),
        }
    }
}

impl std::str::FromStr for Role {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "system" => Ok(Role::System),
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "tool" => Ok(Role::Tool),
            other => Err(StoreError::Serde(serde::de::Error::custom(format!(
                "unknown role: {other}"
            )))),
        }
    }
}

/// Why a message finished (spec §3's `Finish` part) — distinct from
/// `ai::types::FinishReason`, which is the provider-wire vocabulary; this
/// is the store's own, provider-agnostic vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    EndTurn,
    MaxTokens,
    ToolUse,
    Canceled,
    Error,
    PermissionDenied,
}

/// Usage counters carried by a `Finish` part and rolled up onto the
/// owning session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub cached_tokens: u64,
    pub cost: f64,
}

/// A single part of a message's ordered content sequence (spec §3). Parts
/// are append-only until the message is finished.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Part {
    Text {
        text: String,
    },
    Reasoning {
        text: String,
        signature: Option<String>,
    },
    BinaryAttachment {
        media_type: String,
        /// Base64-encoded bytes, matching `ai::types::ImageContent`'s wire
        /// shape so translation to/from the provider layer needs no
        /// re-encoding.
        data: String,
    },
    ToolCall {
        id: String,
        name: String,
        input: Value,
        finished: bool,
    },
    ToolResult {
        tool_call_id: String,
        content: String,
        is_error: bool,
        metadata: Option<Value>,
    },
    Finish {
        reason: FinishReason,
        usage: Usage,
    },
}

impl Part {
    /// Whether this part finalizes its owning message (spec §3: "a message
    /// with any finished `ToolCall` parts is itself finished").
    pub fn finalizes_message(&self) -> bool {
        matches!(self, Part::Finish { .. })
            || matches!(self, Part::ToolCall { finished: true, .. })
    }
}

/// A single conversation turn. Timestamps track creation and completion;
/// `finished_at` is `None` while parts are still being streamed in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub session_id: String,
    pub role: Role,
    pub parts: Vec<Part>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Message {
    pub fn is_finished(&self) -> bool {
        self.finished_at.is_some()
    }
}

/// A conversation (spec §3). `parent_session_id` supports the
/// summarize-into-new-session pattern and sub-agent (Task) invocations;
/// rolled-up counters are computed lazily on read by the parent's callers,
/// not stored redundantly on the parent row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub parent_session_id: Option<String>,
    pub title: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub cached_tokens: u64,
    pub cost: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// CRUD over sessions. Mutations emit events on the [`crate::event_bus`]
/// (spec §4.6) — implementations are responsible for publishing, since the
/// trait itself doesn't carry a bus handle (kept as a plain persistence
/// contract per spec §6).
#[async_trait::async_trait]
pub trait SessionStore: Send + Sync {
    async fn create_session(
        &self,
        title: &str,
        parent_session_id: Option<&str>,
    ) -> Result<Session, StoreError>;

    async fn list_sessions(&self) -> Result<Vec<Session>, StoreError>;

    async fn get_session(&self, id: &str) -> Result<Option<Session>, StoreError>;

    /// Cascading delete: also removes every message belonging to `id`.
    async fn delete_session(&self, id: &str) -> Result<(), StoreError>;

    async fn update_session_title(&self, id: &str, title: &str) -> Result<(), StoreError>;

    /// Add `usage` to the session's rolling counters (spec §3's invariant:
    /// "counters equal the sum over finalized Assistant messages").
    async fn accumulate_usage(&self, id: &str, usage: Usage) -> Result<(), StoreError>;
}

/// Append-only message log for a session.
#[async_trait::async_trait]
pub trait MessageStore: Send + Sync {
    /// Start a new message with its initial parts (may be empty for a
    /// message that will be filled in by subsequent `append_part` calls as
    /// a stream arrives).
    async fn append_message(
        &self,
        session_id: &str,
        role: Role,
        parts: Vec<Part>,
    ) -> Result<Message, StoreError>;

    /// Append one more part to an unfinished message.
    async fn append_part(&self, message_id: &str, part: Part) -> Result<(), StoreError>;

    /// Mark a message finished. Idempotent-at-the-store-level: callers are
    /// expected to call this exactly once per message, enforced by the
    /// orchestrator rather than the store.
    async fn finish_message(&self, message_id: &str) -> Result<(), StoreError>;

    async fn get_message(&self, message_id: &str) -> Result<Option<Message>, StoreError>;

    async fn list_messages(&self, session_id: &str) -> Result<Vec<Message>, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_round_trips_through_display_and_from_str() {
        for role in [Role::System, Role::User, Role::Assistant, Role::Tool] {
            let parsed: Role = role.to_string().parse().unwrap();
            assert_eq!(parsed, role);
        }
    }

    #[test]
    fn finish_part_finalizes_message() {
        let part = Part::Finish {
            reason: FinishReason::EndTurn,
            usage: Usage::default(),
        };
        assert!(part.finalizes_message());
    }

    #[test]
    fn unfinished_tool_call_does_not_finalize() {
        let part = Part::ToolCall {
            id: "t1".into(),
            name: "bash".into(),
            input: serde_json::json!({}),
            finished: false,
        };
        assert!(!part.finalizes_message());
    }

    #[test]
    fn finished_tool_call_finalizes_message() {
        let part = Part::ToolCall {
            id: "t1".into(),
            name: "bash".into(),
            input: serde_json::json!({}),
            finished: true,
        };
        assert!(part.finalizes_message());
    }
}
