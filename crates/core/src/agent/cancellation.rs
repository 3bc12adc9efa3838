//! Per-session cancellation tokens for the agentic loop (spec §4.7's
//! `Cancel(sessionId)`/`CancelAll()`).
//!
//! Grounded in the same `tokio_util::sync::CancellationToken` the retry
//! policy (`ai::retry::backoff`) already uses to interrupt a backoff wait;
//! this registry is the orchestrator-level analogue, scoped per running
//! session rather than per retry call.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

/// Tracks one `CancellationToken` per currently-running session. A session
/// not present in the map is simply not running — `cancel` on an unknown id
/// is a no-op, matching `Cancel` on an already-finished run.
#[derive(Clone, Default)]
pub struct CancellationRegistry {
    tokens: Arc<Mutex<HashMap<String, CancellationToken>>>,
}

impl CancellationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a fresh token for `session_id`, replacing any stale one
    /// left over from a prior run of the same session.
    pub fn begin(&self, session_id: &str) -> CancellationToken {
        let token = CancellationToken::new();
        self.tokens
            .lock()
            .insert(session_id.to_string(), token.clone());
        token
    }

    /// Drop the token once a run completes, whether normally or cancelled.
    pub fn end(&self, session_id: &str) {
        self.tokens.lock().remove(session_id);
    }

    /// Cancel a single running session. Returns `true` if it was running.
    pub fn cancel(&self, session_id: &str) -> bool {
        match self.tokens.lock().get(session_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every running session.
    pub fn cancel_all(&self) {
        for token in self.tokens.lock().values() {
            token.cancel();
        }
    }

    pub fn is_running(&self, session_id: &str) -> bool {
        self.tokens.lock().contains_key(session_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_unknown_session_is_a_no_op() {
        let registry = CancellationRegistry::new();
        assert!(!registry.cancel("missing"));
    }

    #[test]
    fn begin_then_cancel_trips_the_token() {
        let registry = CancellationRegistry::new();
        let token = registry.begin("s1");
        assert!(!token.is_cancelled());
        assert!(registry.cancel("s1"));
        assert!(token.is_cancelled());
    }

    #[test]
    fn end_removes_the_session() {
        let registry = CancellationRegistry::new();
        registry.begin("s1");
        assert!(registry.is_running("s1"));
        registry.end("s1");
        assert!(!registry.is_running("s1"));
        assert!(!registry.cancel("s1"));
    }

    #[test]
    fn cancel_all_trips_every_token() {
        let registry = CancellationRegistry::new();
        let a = registry.begin("a");
        let b = registry.begin("b");
        registry.cancel_all();
        assert!(a.is_cancelled());
        assert!(b.is_cancelled());
    }
}
