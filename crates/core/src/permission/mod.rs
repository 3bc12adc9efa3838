//! Permission broker (spec §4.2).
//!
//! Grounded on `agent/executor.rs::wait_for_approval` (oneshot-style reply
//! wait keyed by a call id, bounded timeout, heartbeat forwarding while
//! blocked) and `agent/hooks.rs::PlanModeHook` (gating write-category tools).
//! Adds what the teacher's executor never had: a static allow-list, a
//! persistent per-(session,tool,action,path) grant table, and
//! `auto_approve_session`. Uses `dashmap` for the pending-reply map and
//! `parking_lot` for the grant/auto-approve sets — both already teacher
//! dependencies used elsewhere in this crate for the same kind of
//! lock-around-a-collection shape.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::error::PermissionError;
use crate::event_bus::{Event, EventBus};

/// How a permission decision was reached — attached to the event emitted
/// over the bus, useful for audit trails even though this crate doesn't
/// persist them itself (spec §9 leaves audit persistence to the caller).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionSource {
    SkipPermissionsFlag,
    AllowList,
    SessionAutoApprove,
    PersistentGrant,
    UserPrompt,
}

/// A request to perform a gated action, created by the tool registry before
/// dispatching a write-category tool call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionRequest {
    pub id: String,
    pub session_id: String,
    pub tool_call_id: String,
    pub tool_name: String,
    pub action: String,
    /// Canonicalized to a containing directory (a file path's parent, `.`
    /// resolved to the working directory) — see [`canonicalize_to_dir`].
    pub path: PathBuf,
    pub params: serde_json::Value,
    pub description: String,
}

/// Parameters used to create a [`PermissionRequest`]; kept distinct from the
/// request itself because the broker assigns the `id`.
#[derive(Debug, Clone)]
pub struct CreatePermissionRequest {
    pub session_id: String,
    pub tool_call_id: String,
    pub tool_name: String,
    pub action: String,
    pub path: PathBuf,
    pub params: serde_json::Value,
    pub description: String,
}

/// Key identifying one persistent grant: (session, tool, action, directory).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct GrantKey {
    session_id: String,
    tool_name: String,
    action: String,
    path: PathBuf,
}

/// Canonicalize a path reference down to the directory a grant applies to:
/// a file path's parent directory, `.` resolved against `working_dir`.
pub fn canonicalize_to_dir(path: &Path, working_dir: &Path) -> PathBuf {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else if path.as_os_str() == "." {
        working_dir.to_path_buf()
    } else {
        working_dir.join(path)
    };
    let target = if joined.is_file() {
        joined.parent().map(Path::to_path_buf).unwrap_or(joined)
    } else {
        joined
    };
    target.canonicalize().unwrap_or(target)
}

struct PendingReply {
    reply_tx: oneshot::Sender<bool>,
}

/// The Permission Broker: decides whether a gated tool call may proceed.
///
/// Concurrency per spec §5: prompts are serialized through `prompt_lock`
/// (one outstanding user-visible prompt at a time); grant/deny lookups go
/// through the concurrent `pending` map independent of that serialization.
pub struct PermissionBroker {
    event_bus: Arc<EventBus>,
    allow_list: HashSet<String>,
    skip_permissions: bool,
    pending: DashMap<String, PendingReply>,
    persistent_grants: RwLock<HashSet<GrantKey>>,
    auto_approved_sessions: RwLock<HashSet<String>>,
    prompt_lock: Arc<Mutex<()>>,
    default_timeout: Duration,
}

/// Sentinel denial reason surfaced to tool results — stable text so callers
/// can match on it (spec §4.7's "permission denied" fixed tool result).
pub const PERMISSION_DENIED_MESSAGE: &str = "permission denied";

impl PermissionBroker {
    pub fn new(event_bus: Arc<EventBus>, allow_list: Vec<String>, skip_permissions: bool) -> Self {
        Self {
            event_bus,
            allow_list: allow_list.into_iter().collect(),
            skip_permissions,
            pending: DashMap::new(),
            persistent_grants: RwLock::new(HashSet::new()),
            auto_approved_sessions: RwLock::new(HashSet::new()),
            prompt_lock: Arc::new(Mutex::new(())),
            default_timeout: Duration::from_secs(300),
        }
    }

    fn is_allow_listed(&self, tool_name: &str, action: &str) -> bool {
        self.allow_list.contains(tool_name)
            || self.allow_list.contains(&format!("{tool_name}:{action}"))
    }

    fn has_persistent_grant(
        &self,
        session_id: &str,
        tool_name: &str,
        action: &str,
        path: &Path,
    ) -> bool {
        let key = GrantKey {
            session_id: session_id.to_string(),
            tool_name: tool_name.to_string(),
            action: action.to_string(),
            path: path.to_path_buf(),
        };
        self.persistent_grants.read().contains(&key)
    }

    /// Record a persistent grant directly, bypassing the request/approve
    /// round-trip — used by [`Self::grant_persistent`] and by callers that
    /// pre-seed known-safe grants.
    pub fn add_persistent_grant(
        &self,
        session_id: &str,
        tool_name: &str,
        action: &str,
        path: &Path,
    ) {
        self.persistent_grants.write().insert(GrantKey {
            session_id: session_id.to_string(),
            tool_name: tool_name.to_string(),
            action: action.to_string(),
            path: path.to_path_buf(),
        });
    }

    pub fn auto_approve_session(&self, session_id: &str) {
        self.auto_approved_sessions
            .write()
            .insert(session_id.to_string());
    }

    fn is_session_auto_approved(&self, session_id: &str) -> bool {
        self.auto_approved_sessions.read().contains(session_id)
    }

    /// Run the decision algorithm for a permission request, blocking until
    /// a decision is reached, the request is cancelled, or it times out.
    ///
    /// Order (spec §4.2): global skip-permissions -> static allow-list ->
    /// session auto-approve -> persistent grant -> else prompt and block.
    pub async fn request(&self, req: CreatePermissionRequest) -> Result<bool, PermissionError> {
        if self.skip_permissions {
            return Ok(true);
        }
        if self.is_allow_listed(&req.tool_name, &req.action) {
            return Ok(true);
        }
        if self.is_session_auto_approved(&req.session_id) {
            return Ok(true);
        }
        if self.has_persistent_grant(&req.session_id, &req.tool_name, &req.action, &req.path) {
            return Ok(true);
        }

        // Serialize the prompt itself: only one outstanding user-visible
        // request at a time. Held only across the publish, not the wait,
        // matching spec §5's "requests serialized through mutex" for the
        // prompt step while grant/deny still races freely via `pending`.
        let request_id = Uuid::new_v4().to_string();
        let permission_request = PermissionRequest {
            id: request_id.clone(),
            session_id: req.session_id.clone(),
            tool_call_id: req.tool_call_id.clone(),
            tool_name: req.tool_name.clone(),
            action: req.action.clone(),
            path: req.path.clone(),
            params: req.params.clone(),
            description: req.description.clone(),
        };

        let (reply_tx, reply_rx) = oneshot::channel();
        self.pending
            .insert(request_id.clone(), PendingReply { reply_tx });

        {
            let _guard = self.prompt_lock.lock();
            self.event_bus.publish(Event::PermissionCreated {
                request_id: request_id.clone(),
                payload: serde_json::to_value(&permission_request).unwrap_or_default(),
            });
        }

        let result = tokio::time::timeout(self.default_timeout, reply_rx).await;
        self.pending.remove(&request_id);

        match result {
            Ok(Ok(granted)) => {
                self.event_bus.publish(Event::PermissionNotified {
                    request_id,
                    tool_call_id: req.tool_call_id,
                    granted,
                    denied: !granted,
                });
                Ok(granted)
            }
            Ok(Err(_)) => Err(PermissionError::ChannelClosed),
            Err(_) => Err(PermissionError::Timeout),
        }
    }

    /// Grant the currently-pending request for `request_id` (one-shot, does
    /// not persist).
    pub fn grant(&self, request_id: &str) -> Result<(), PermissionError> {
        self.reply(request_id, true)
    }

    /// Grant the currently-pending request and additionally persist the
    /// (session, tool, action, path) tuple so future identical requests
    /// skip the prompt entirely (spec §8 property 1).
    pub fn grant_persistent(
        &self,
        request_id: &str,
        session_id: &str,
        tool_name: &str,
        action: &str,
        path: &Path,
    ) -> Result<(), PermissionError> {
        self.add_persistent_grant(session_id, tool_name, action, path);
        self.reply(request_id, true)
    }

    pub fn deny(&self, request_id: &str) -> Result<(), PermissionError> {
        self.reply(request_id, false)
    }

    fn reply(&self, request_id: &str, granted: bool) -> Result<(), PermissionError> {
        let (_, pending) = self
            .pending
            .remove(request_id)
            .ok_or_else(|| PermissionError::NoPendingRequest(request_id.to_string()))?;
        let _ = pending.reply_tx.send(granted);
        Ok(())
    }

    /// Cancellation of the caller's context is treated as a denial (spec
    /// §4.2): call this from the orchestrator's cancellation path for any
    /// requests tied to the cancelled run.
    pub fn cancel(&self, request_id: &str) {
        let _ = self.reply(request_id, false);
    }

    pub fn subscribe_notifications(&self) -> crate::event_bus::Subscription {
        self.event_bus.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn broker(allow_list: Vec<&str>, skip: bool) -> PermissionBroker {
        let bus = Arc::new(EventBus::new());
        PermissionBroker::new(bus, allow_list.into_iter().map(String::from).collect(), skip)
    }

    fn req(session: &str, tool: &str, action: &str, path: &str) -> CreatePermissionRequest {
        CreatePermissionRequest {
            session_id: session.into(),
            tool_call_id: "call-1".into(),
            tool_name: tool.into(),
            action: action.into(),
            path: PathBuf::from(path),
            params: serde_json::json!({}),
            description: "test".into(),
        }
    }

    #[tokio::test]
    async fn skip_permissions_flag_grants_immediately() {
        let broker = broker(vec![], true);
        let granted = broker.request(req("s1", "write", "edit", "/tmp")).await.unwrap();
        assert!(granted);
    }

    #[tokio::test]
    async fn allow_listed_tool_grants_immediately() {
        let broker = broker(vec!["write"], false);
        let granted = broker.request(req("s1", "write", "edit", "/tmp")).await.unwrap();
        assert!(granted);
    }

    #[tokio::test]
    async fn allow_listed_tool_action_grants_immediately() {
        let broker = broker(vec!["bash:exec"], false);
        let granted = broker.request(req("s1", "bash", "exec", "/tmp")).await.unwrap();
        assert!(granted);
    }

    #[tokio::test]
    async fn auto_approve_session_grants_all_subsequent_requests() {
        let broker = broker(vec![], false);
        broker.auto_approve_session("s1");
        for _ in 0..3 {
            let granted = broker.request(req("s1", "write", "edit", "/tmp")).await.unwrap();
            assert!(granted);
        }
        // a different session still needs a real decision
        assert!(!broker.is_session_auto_approved("s2"));
    }

    #[tokio::test]
    async fn persistent_grant_replays_for_matching_requests() {
        let broker = broker(vec![], false);
        broker.add_persistent_grant("s1", "write", "edit", Path::new("/tmp"));
        let granted = broker
            .request(req("s1", "write", "edit", "/tmp"))
            .await
            .unwrap();
        assert!(granted);
    }

    #[tokio::test]
    async fn grant_unblocks_a_pending_prompt() {
        let broker = Arc::new(broker(vec![], false));
        let broker2 = broker.clone();
        let mut notifications = broker.subscribe_notifications();

        let handle = tokio::spawn(async move { broker2.request(req("s1", "write", "edit", "/tmp")).await });

        let event = notifications.recv().await.expect("permission.created");
        let request_id = match event {
            Event::PermissionCreated { request_id, .. } => request_id,
            other => panic!("unexpected event: {other:?}"),
        };

        broker.grant(&request_id).unwrap();
        let granted = handle.await.unwrap().unwrap();
        assert!(granted);
    }

    #[tokio::test]
    async fn deny_resolves_with_false() {
        let broker = Arc::new(broker(vec![], false));
        let broker2 = broker.clone();
        let mut notifications = broker.subscribe_notifications();

        let handle = tokio::spawn(async move { broker2.request(req("s1", "write", "edit", "/tmp")).await });
        let event = notifications.recv().await.expect("permission.created");
        let request_id = match event {
            Event::PermissionCreated { request_id, .. } => request_id,
            other => panic!("unexpected event: {other:?}"),
        };
        broker.deny(&request_id).unwrap();
        let granted = handle.await.unwrap().unwrap();
        assert!(!granted);
    }
}
