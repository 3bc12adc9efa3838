//! Tool execution for the agentic loop (spec §4.7 step 3 / §8 property 4).
//!
//! Dispatches a batch of tool calls concurrently, gating write-category
//! calls behind the permission broker, and collects results back into the
//! original call order regardless of completion order — one task per call,
//! joined positionally, the way the teacher's `execute_tools` spawned one
//! forwarder task per call and awaited them in sequence.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::ai::types::{AiToolCall, Content};
use crate::agent::translate;
use crate::mcp::McpManager;
use crate::permission::{canonicalize_to_dir, CreatePermissionRequest, PermissionBroker};
use crate::process::ProcessRegistry;
use crate::tools::persistent_shell::PersistentShell;
use crate::tools::registry::{
    tool_category, PermissionMode, ReadTracker, ToolCategory, ToolContext, ToolRegistry,
};
use crate::tools::shell_safety;

use super::loop_events::RunEvent;

const MAX_TOOL_OUTPUT_CHARS: usize = 30_000;
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

/// Everything about a session that persists across tool calls within it:
/// the read-before-write ledger and the shell's working directory/exported
/// environment both need to survive from one call to the next, not be
/// recreated per call.
#[derive(Clone)]
pub struct SessionToolEnv {
    pub session_id: String,
    pub working_dir: PathBuf,
    pub read_tracker: ReadTracker,
    pub persistent_shell: Arc<PersistentShell>,
    pub process_registry: Arc<ProcessRegistry>,
    pub mcp_manager: Option<Arc<McpManager>>,
    pub permission_mode: PermissionMode,
}

impl SessionToolEnv {
    pub fn new(
        session_id: String,
        working_dir: PathBuf,
        process_registry: Arc<ProcessRegistry>,
    ) -> Self {
        Self {
            persistent_shell: Arc::new(PersistentShell::new(working_dir.clone())),
            session_id,
            working_dir,
            read_tracker: ReadTracker::new(),
            process_registry,
            mcp_manager: None,
            permission_mode: PermissionMode::Supervised,
        }
    }
}

/// Execute every call in `tool_calls` concurrently and return their
/// `Content::ToolResult`s in the same order the calls appeared.
pub async fn execute_tools(
    tool_calls: &[AiToolCall],
    tool_registry: &Arc<ToolRegistry>,
    permission_broker: &Arc<PermissionBroker>,
    env: &SessionToolEnv,
    event_tx: &mpsc::UnboundedSender<RunEvent>,
    cancel: &CancellationToken,
) -> Vec<Content> {
    let tasks = tool_calls.iter().cloned().map(|call| {
        let tool_registry = tool_registry.clone();
        let permission_broker = permission_broker.clone();
        let env = env.clone();
        let event_tx = event_tx.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            run_one(call, tool_registry, permission_broker, env, event_tx, cancel).await
        })
    });

    join_all(tasks)
        .await
        .into_iter()
        .zip(tool_calls)
        .map(|(joined, call)| {
            joined.unwrap_or_else(|_| {
                translate::tool_result_content(&call.id, "tool execution panicked", true)
            })
        })
        .collect()
}

async fn run_one(
    call: AiToolCall,
    tool_registry: Arc<ToolRegistry>,
    permission_broker: Arc<PermissionBroker>,
    env: SessionToolEnv,
    event_tx: mpsc::UnboundedSender<RunEvent>,
    cancel: CancellationToken,
) -> Content {
    let _ = event_tx.send(RunEvent::ToolExecuting {
        id: call.id.clone(),
        name: call.name.clone(),
    });

    if let Some(denial) = check_permission(&call, &permission_broker, &env, &cancel).await {
        let _ = event_tx.send(RunEvent::ToolResult {
            id: call.id.clone(),
            output: denial.clone(),
            is_error: true,
        });
        return translate::tool_result_content(&call.id, &denial, true);
    }

    let (output_tx, mut output_rx) =
        mpsc::unbounded_channel::<crate::tools::registry::ToolOutputChunk>();

    let forwarder_event_tx = event_tx.clone();
    let forwarder_id = call.id.clone();
    let forwarder_name = call.name.clone();
    let forwarder = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        loop {
            tokio::select! {
                chunk = output_rx.recv() => {
                    match chunk {
                        Some(chunk) => {
                            if !chunk.chunk.is_empty() {
                                let _ = forwarder_event_tx.send(RunEvent::ToolOutputDelta {
                                    id: forwarder_id.clone(),
                                    delta: chunk.chunk,
                                });
                            }
                            if chunk.is_complete {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                _ = heartbeat.tick() => {
                    let _ = forwarder_event_tx.send(RunEvent::ToolExecuting {
                        id: forwarder_id.clone(),
                        name: forwarder_name.clone(),
                    });
                }
            }
        }
    });

    let ctx = ToolContext {
        working_dir: env.working_dir.clone(),
        sandbox_root: Some(env.working_dir.clone()),
        user_id: None,
        process_registry: Some(env.process_registry.clone()),
        mcp_manager: env.mcp_manager.clone(),
        timeout: None,
        output_tx: Some(output_tx),
        tool_use_id: Some(call.id.clone()),
        read_tracker: env.read_tracker.clone(),
        current_model: None,
        persistent_shell: env.persistent_shell.clone(),
    };

    let result = tool_registry
        .execute(&call.name, call.arguments.clone(), &ctx)
        .await
        .unwrap_or_else(|| {
            crate::tools::registry::ToolResult::error_with_code(
                "unknown_tool",
                format!("Unknown tool: {}", call.name),
            )
        });

    drop(ctx);
    let _ = forwarder.await;

    let output = truncate_output(&result.output);
    let _ = event_tx.send(RunEvent::ToolResult {
        id: call.id.clone(),
        output: output.clone(),
        is_error: result.is_error,
    });

    translate::tool_result_content(&call.id, &output, result.is_error)
}

/// Decide whether `call` needs the permission broker's sign-off, and if
/// denied/cancelled/timed out, return the message to persist as its tool
/// result. `None` means the call may proceed.
async fn check_permission(
    call: &AiToolCall,
    permission_broker: &Arc<PermissionBroker>,
    env: &SessionToolEnv,
    cancel: &CancellationToken,
) -> Option<String> {
    if env.permission_mode == PermissionMode::Autonomous {
        return None;
    }
    if tool_category(&call.name) == ToolCategory::ReadOnly {
        return None;
    }
    if call.name == "bash" {
        if let Some(command) = call.arguments.get("command").and_then(|v| v.as_str()) {
            if shell_safety::is_read_only_command(command) {
                return None;
            }
        }
    }

    let (action, path) = permission_action_and_path(call, &env.working_dir);
    let req = CreatePermissionRequest {
        session_id: env.session_id.clone(),
        tool_call_id: call.id.clone(),
        tool_name: call.name.clone(),
        action,
        path,
        params: call.arguments.clone(),
        description: format!("{} {}", call.name, call.arguments),
    };

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Some(crate::permission::PERMISSION_DENIED_MESSAGE.to_string()),
        result = permission_broker.request(req) => match result {
            Ok(true) => None,
            Ok(false) => Some(crate::permission::PERMISSION_DENIED_MESSAGE.to_string()),
            Err(e) => Some(format!("permission request failed: {e}")),
        },
    }
}

/// Tool-specific action verb and target directory for the permission
/// request (spec §4.1's `PermissionRequest.action`/`path`). Most tools
/// carry a `path` or `file_path` argument; tools that don't (e.g. `bash`)
/// fall back to the session working directory.
fn permission_action_and_path(call: &AiToolCall, working_dir: &Path) -> (String, PathBuf) {
    let raw_path = call
        .arguments
        .get("path")
        .or_else(|| call.arguments.get("file_path"))
        .and_then(|v| v.as_str())
        .unwrap_or(".");
    (call.name.clone(), canonicalize_to_dir(Path::new(raw_path), working_dir))
}

pub(crate) fn truncate_output(output: &str) -> String {
    if output.len() <= MAX_TOOL_OUTPUT_CHARS {
        return output.to_string();
    }

    let truncated_len = floor_char_boundary(output, MAX_TOOL_OUTPUT_CHARS);
    let truncated = &output[..truncated_len];
    let break_point = truncated.rfind('\n').unwrap_or(truncated_len);
    let clean = &output[..break_point];
    format!(
        "{}\n\n[... OUTPUT TRUNCATED: {} chars -> {} chars ...]",
        clean,
        output.len(),
        clean.len()
    )
}

fn floor_char_boundary(text: &str, index: usize) -> usize {
    let mut boundary = index.min(text.len());
    while boundary > 0 && !text.is_char_boundary(boundary) {
        boundary -= 1;
    }
    boundary
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_output_leaves_short_output_untouched() {
        assert_eq!(truncate_output("hello"), "hello");
    }

    #[test]
    fn truncate_output_breaks_at_last_newline() {
        let long_line = "a".repeat(MAX_TOOL_OUTPUT_CHARS - 10);
        let output = format!("{long_line}\nsecond\n{}", "b".repeat(100));
        let truncated = truncate_output(&output);
        assert!(truncated.contains("OUTPUT TRUNCATED"));
        assert!(truncated.starts_with(&long_line));
    }

    #[test]
    fn permission_action_and_path_falls_back_to_working_dir() {
        let call = AiToolCall {
            id: "call_1".into(),
            name: "bash".into(),
            arguments: serde_json::json!({"command": "ls"}),
        };
        let (action, path) = permission_action_and_path(&call, Path::new("/tmp"));
        assert_eq!(action, "bash");
        assert_eq!(path, PathBuf::from("/tmp"));
    }

    /// Spec §8 property 4: results persist in call order regardless of
    /// completion order — the first call sleeps longer than the second, so
    /// completion order is reversed, but `execute_tools` must still return
    /// them positionally.
    #[tokio::test]
    async fn execute_tools_preserves_call_order_not_completion_order() {
        let registry = Arc::new(ToolRegistry::new());
        registry
            .register(Arc::new(crate::tools::implementations::BashTool))
            .await;

        let broker = Arc::new(PermissionBroker::new(
            Arc::new(crate::event_bus::EventBus::new()),
            Vec::new(),
            true, // skip_permissions: bash read-only check would also pass, but be explicit
        ));

        let dir = tempfile::tempdir().unwrap();
        let env = SessionToolEnv::new(
            "s1".to_string(),
            dir.path().to_path_buf(),
            Arc::new(ProcessRegistry::new()),
        );

        let calls = vec![
            AiToolCall {
                id: "slow".into(),
                name: "bash".into(),
                arguments: serde_json::json!({"command": "sleep 0.2 && echo first"}),
            },
            AiToolCall {
                id: "fast".into(),
                name: "bash".into(),
                arguments: serde_json::json!({"command": "echo second"}),
            },
        ];

        let (event_tx, _event_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let results = execute_tools(&calls, &registry, &broker, &env, &event_tx, &cancel).await;

        assert_eq!(results.len(), 2);
        match &results[0] {
            Content::ToolResult { tool_use_id, .. } => assert_eq!(tool_use_id, "slow"),
            other => panic!("unexpected content: {other:?}"),
        }
        match &results[1] {
            Content::ToolResult { tool_use_id, .. } => assert_eq!(tool_use_id, "fast"),
            other => panic!("unexpected content: {other:?}"),
        }
    }
}
