//! `rusqlite`-backed implementation of [`super::SessionStore`] and
//! [`super::MessageStore`], adapted from the teacher's
//! `storage/sessions.rs`/`storage/messages.rs` schema and query shapes
//! down to the columns spec §3's data model needs — no push-subscription,
//! credentials, or block-UI-state tables carried over.

use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};

use super::{Message, Part, Role, Session, SessionStore, MessageStore, Usage};
use crate::error::StoreError;
use crate::event_bus::{Event, EventBus, EventKind};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS sessions (
    id TEXT PRIMARY KEY,
    parent_session_id TEXT,
    title TEXT NOT NULL,
    prompt_tokens INTEGER NOT NULL DEFAULT 0,
    completion_tokens INTEGER NOT NULL DEFAULT 0,
    cached_tokens INTEGER NOT NULL DEFAULT 0,
    cost REAL NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS messages (
    id TEXT PRIMARY KEY,
    session_id TEXT NOT NULL REFERENCES sessions(id) ON DELETE CASCADE,
    role TEXT NOT NULL,
    parts TEXT NOT NULL,
    created_at TEXT NOT NULL,
    finished_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_messages_session ON messages(session_id);
";

/// Concrete Store over a single SQLite file (or `:memory:` for tests).
/// Holds its own `EventBus` handle so every mutation publishes per spec
/// §4.6 ("mutations emit events on the bus").
pub struct SqliteStore {
    conn: Mutex<Connection>,
    events: std::sync::Arc<EventBus>,
}

impl SqliteStore {
    pub fn open(path: &Path, events: std::sync::Arc<EventBus>) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
            events,
        })
    }

    pub fn open_in_memory(events: std::sync::Arc<EventBus>) -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
            events,
        })
    }

    fn row_to_session(row: &rusqlite::Row) -> rusqlite::Result<Session> {
        let created_at: String = row.get(7)?;
        let updated_at: String = row.get(8)?;
        Ok(Session {
            id: row.get(0)?,
            parent_session_id: row.get(1)?,
            title: row.get(2)?,
            prompt_tokens: row.get::<_, i64>(3)? as u64,
            completion_tokens: row.get::<_, i64>(4)? as u64,
            cached_tokens: row.get::<_, i64>(5)? as u64,
            cost: row.get(6)?,
            created_at: parse_timestamp(&created_at),
            updated_at: parse_timestamp(&updated_at),
        })
    }

    fn row_to_message(row: &rusqlite::Row) -> rusqlite::Result<(String, String, String, String, String, Option<String>)> {
        Ok((
            row.get(0)?,
            row.get(1)?,
            row.get(2)?,
            row.get(3)?,
            row.get(4)?,
            row.get(5)?,
        ))
    }

    fn decode_message(
        id: String,
        session_id: String,
        role: String,
        parts_json: String,
        created_at: String,
        finished_at: Option<String>,
    ) -> Result<Message, StoreError> {
        let parts: Vec<Part> = serde_json::from_str(&parts_json)?;
        Ok(Message {
            id,
            session_id,
            role: Role::from_str(&role)?,
            parts,
            created_at: parse_timestamp(&created_at),
            finished_at: finished_at.as_deref().map(parse_timestamp),
        })
    }
}

fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

#[async_trait::async_trait]
impl SessionStore for SqliteStore {
    async fn create_session(
        &self,
        title: &str,
        parent_session_id: Option<&str>,
    ) -> Result<Session, StoreError> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();
        let now_str = now.to_rfc3339();

        {
            let conn = self.conn.lock();
            conn.execute(
                "INSERT INTO sessions (id, parent_session_id, title, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![id, parent_session_id, title, now_str, now_str],
            )?;
        }

        let session = Session {
            id: id.clone(),
            parent_session_id: parent_session_id.map(str::to_string),
            title: title.to_string(),
            prompt_tokens: 0,
            completion_tokens: 0,
            cached_tokens: 0,
            cost: 0.0,
            created_at: now,
            updated_at: now,
        };

        self.events.publish(Event::Session {
            kind: EventKind::Created,
            session_id: id,
            payload: serde_json::to_value(&session).unwrap_or_default(),
        });

        Ok(session)
    }

    async fn list_sessions(&self) -> Result<Vec<Session>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, parent_session_id, title, prompt_tokens, completion_tokens,
                    cached_tokens, cost, created_at, updated_at
             FROM sessions ORDER BY updated_at DESC",
        )?;
        let sessions = stmt
            .query_map([], Self::row_to_session)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(sessions)
    }

    async fn get_session(&self, id: &str) -> Result<Option<Session>, StoreError> {
        let conn = self.conn.lock();
        let session = conn
            .query_row(
                "SELECT id, parent_session_id, title, prompt_tokens, completion_tokens,
                        cached_tokens, cost, created_at, updated_at
                 FROM sessions WHERE id = ?1",
                [id],
                Self::row_to_session,
            )
            .optional()?;
        Ok(session)
    }

    async fn delete_session(&self, id: &str) -> Result<(), StoreError> {
        {
            let conn = self.conn.lock();
            conn.execute(
                "UPDATE sessions SET parent_session_id = NULL WHERE parent_session_id = ?1",
                params![id],
            )?;
            conn.execute("DELETE FROM messages WHERE session_id = ?1", params![id])?;
            conn.execute("DELETE FROM sessions WHERE id = ?1", params![id])?;
        }

        self.events.publish(Event::Session {
            kind: EventKind::Deleted,
            session_id: id.to_string(),
            payload: serde_json::Value::Null,
        });

        Ok(())
    }

    async fn update_session_title(&self, id: &str, title: &str) -> Result<(), StoreError> {
        let now = Utc::now().to_rfc3339();
        {
            let conn = self.conn.lock();
            conn.execute(
                "UPDATE sessions SET title = ?1, updated_at = ?2 WHERE id = ?3",
                params![title, now, id],
            )?;
        }

        self.events.publish(Event::Session {
            kind: EventKind::Updated,
            session_id: id.to_string(),
            payload: serde_json::json!({ "title": title }),
        });

        Ok(())
    }

    async fn accumulate_usage(&self, id: &str, usage: Usage) -> Result<(), StoreError> {
        let now = Utc::now().to_rfc3339();
        {
            let conn = self.conn.lock();
            conn.execute(
                "UPDATE sessions SET
                    prompt_tokens = prompt_tokens + ?1,
                    completion_tokens = completion_tokens + ?2,
                    cached_tokens = cached_tokens + ?3,
                    cost = cost + ?4,
                    updated_at = ?5
                 WHERE id = ?6",
                params![
                    usage.prompt_tokens as i64,
                    usage.completion_tokens as i64,
                    usage.cached_tokens as i64,
                    usage.cost,
                    now,
                    id
                ],
            )?;
        }

        self.events.publish(Event::Session {
            kind: EventKind::Updated,
            session_id: id.to_string(),
            payload: serde_json::to_value(&usage).unwrap_or_default(),
        });

        Ok(())
    }
}

#[async_trait::async_trait]
impl MessageStore for SqliteStore {
    async fn append_message(
        &self,
        session_id: &str,
        role: Role,
        parts: Vec<Part>,
    ) -> Result<Message, StoreError> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();
        let now_str = now.to_rfc3339();
        let parts_json = serde_json::to_string(&parts)?;
        let role_str = role.to_string();

        let finished_now = parts.iter().any(Part::finalizes_message);

        {
            let conn = self.conn.lock();
            conn.execute(
                "INSERT INTO messages (id, session_id, role, parts, created_at, finished_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    id,
                    session_id,
                    role_str,
                    parts_json,
                    now_str,
                    if finished_now { Some(&now_str) } else { None }
                ],
            )?;
            conn.execute(
                "UPDATE sessions SET updated_at = ?1 WHERE id = ?2",
                params![now_str, session_id],
            )?;
        }

        let message = Message {
            id: id.clone(),
            session_id: session_id.to_string(),
            role,
            parts,
            created_at: now,
            finished_at: if finished_now { Some(now) } else { None },
        };

        self.events.publish(Event::Message {
            kind: EventKind::Created,
            session_id: session_id.to_string(),
            message_id: id,
            payload: serde_json::to_value(&message).unwrap_or_default(),
        });

        Ok(message)
    }

    async fn append_part(&self, message_id: &str, part: Part) -> Result<(), StoreError> {
        let row: Option<(String, String, Option<String>)> = {
            let conn = self.conn.lock();
            conn.query_row(
                "SELECT session_id, parts, finished_at FROM messages WHERE id = ?1",
                [message_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?
        };
        let Some((session_id, parts_json, finished_at)) = row else {
            return Err(StoreError::SessionNotFound(message_id.to_string()));
        };
        let mut parts: Vec<Part> = serde_json::from_str(&parts_json)?;

        if finished_at.is_some() {
            return Err(StoreError::SessionNotFound(format!(
                "message {message_id} already finished, cannot append part"
            )));
        }

        let now = Utc::now().to_rfc3339();
        let finalizes = part.finalizes_message();
        parts.push(part);
        let parts_json = serde_json::to_string(&parts)?;

        {
            let conn = self.conn.lock();
            conn.execute(
                "UPDATE messages SET parts = ?1, finished_at = ?2 WHERE id = ?3",
                params![
                    parts_json,
                    if finalizes { Some(&now) } else { None },
                    message_id
                ],
            )?;
        }

        self.events.publish(Event::Message {
            kind: EventKind::Updated,
            session_id,
            message_id: message_id.to_string(),
            payload: serde_json::Value::Null,
        });

        Ok(())
    }

    async fn finish_message(&self, message_id: &str) -> Result<(), StoreError> {
        let now = Utc::now().to_rfc3339();
        let session_id: String = {
            let conn = self.conn.lock();
            conn.execute(
                "UPDATE messages SET finished_at = ?1 WHERE id = ?2 AND finished_at IS NULL",
                params![now, message_id],
            )?;
            conn.query_row(
                "SELECT session_id FROM messages WHERE id = ?1",
                [message_id],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| StoreError::SessionNotFound(message_id.to_string()))?
        };

        self.events.publish(Event::Message {
            kind: EventKind::Updated,
            session_id,
            message_id: message_id.to_string(),
            payload: serde_json::Value::Null,
        });

        Ok(())
    }

    async fn get_message(&self, message_id: &str) -> Result<Option<Message>, StoreError> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT id, session_id, role, parts, created_at, finished_at
                 FROM messages WHERE id = ?1",
                [message_id],
                Self::row_to_message,
            )
            .optional()?;
        drop(conn);

        row.map(|(id, session_id, role, parts_json, created_at, finished_at)| {
            Self::decode_message(id, session_id, role, parts_json, created_at, finished_at)
        })
        .transpose()
    }

    async fn list_messages(&self, session_id: &str) -> Result<Vec<Message>, StoreError> {
        let rows: Vec<_> = {
            let conn = self.conn.lock();
            let mut stmt = conn.prepare(
                "SELECT id, session_id, role, parts, created_at, finished_at
                 FROM messages WHERE session_id = ?1 ORDER BY created_at, id",
            )?;
            stmt.query_map([session_id], Self::row_to_message)?
                .collect::<Result<Vec<_>, _>>()?
        };

        rows.into_iter()
            .map(|(id, session_id, role, parts_json, created_at, finished_at)| {
                Self::decode_message(id, session_id, role, parts_json, created_at, finished_at)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{FinishReason, Part};

    fn store() -> SqliteStore {
        SqliteStore::open_in_memory(std::sync::Arc::new(EventBus::new())).unwrap()
    }

    #[tokio::test]
    async fn create_and_get_session_round_trips() {
        let store = store();
        let created = store.create_session("hello", None).await.unwrap();
        let fetched = store.get_session(&created.id).await.unwrap().unwrap();
        assert_eq!(fetched.title, "hello");
        assert_eq!(fetched.prompt_tokens, 0);
    }

    #[tokio::test]
    async fn delete_session_cascades_to_messages() {
        let store = store();
        let session = store.create_session("s", None).await.unwrap();
        store
            .append_message(
                &session.id,
                Role::User,
                vec![Part::Text {
                    text: "hi".into(),
                }],
            )
            .await
            .unwrap();

        store.delete_session(&session.id).await.unwrap();

        assert!(store.get_session(&session.id).await.unwrap().is_none());
        assert!(store.list_messages(&session.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_session_orphans_children_instead_of_deleting_them() {
        let store = store();
        let parent = store.create_session("parent", None).await.unwrap();
        let child = store
            .create_session("child", Some(&parent.id))
            .await
            .unwrap();

        store.delete_session(&parent.id).await.unwrap();

        let child = store.get_session(&child.id).await.unwrap().unwrap();
        assert_eq!(child.parent_session_id, None);
    }

    #[tokio::test]
    async fn append_message_starting_unfinished_then_finish() {
        let store = store();
        let session = store.create_session("s", None).await.unwrap();
        let message = store
            .append_message(&session.id, Role::Assistant, vec![])
            .await
            .unwrap();
        assert!(!message.is_finished());

        store
            .append_part(
                &message.id,
                Part::Text {
                    text: "partial".into(),
                },
            )
            .await
            .unwrap();

        let loaded = store.get_message(&message.id).await.unwrap().unwrap();
        assert!(!loaded.is_finished());
        assert_eq!(loaded.parts.len(), 1);

        store.finish_message(&message.id).await.unwrap();
        let loaded = store.get_message(&message.id).await.unwrap().unwrap();
        assert!(loaded.is_finished());
    }

    #[tokio::test]
    async fn append_part_after_finish_errors() {
        let store = store();
        let session = store.create_session("s", None).await.unwrap();
        let message = store
            .append_message(
                &session.id,
                Role::Assistant,
                vec![Part::Finish {
                    reason: FinishReason::EndTurn,
                    usage: Usage::default(),
                }],
            )
            .await
            .unwrap();
        assert!(message.is_finished());

        let result = store
            .append_part(&message.id, Part::Text { text: "late".into() })
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn accumulate_usage_sums_across_calls() {
        let store = store();
        let session = store.create_session("s", None).await.unwrap();
        store
            .accumulate_usage(
                &session.id,
                Usage {
                    prompt_tokens: 10,
                    completion_tokens: 5,
                    cached_tokens: 0,
                    cost: 0.01,
                },
            )
            .await
            .unwrap();
        store
            .accumulate_usage(
                &session.id,
                Usage {
                    prompt_tokens: 3,
                    completion_tokens: 2,
                    cached_tokens: 1,
                    cost: 0.005,
                },
            )
            .await
            .unwrap();

        let session = store.get_session(&session.id).await.unwrap().unwrap();
        assert_eq!(session.prompt_tokens, 13);
        assert_eq!(session.completion_tokens, 7);
        assert_eq!(session.cached_tokens, 1);
    }

    #[tokio::test]
    async fn list_messages_orders_by_creation() {
        let store = store();
        let session = store.create_session("s", None).await.unwrap();
        store
            .append_message(&session.id, Role::User, vec![Part::Text { text: "1".into() }])
            .await
            .unwrap();
        store
            .append_message(
                &session.id,
                Role::Assistant,
                vec![Part::Text { text: "2".into() }],
            )
            .await
            .unwrap();

        let messages = store.list_messages(&session.id).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[1].role, Role::Assistant);
    }
}
