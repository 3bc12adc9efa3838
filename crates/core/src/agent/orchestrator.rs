//! Agent execution loop orchestrator (spec §4.7): `Run`/`Cancel`/
//! `CancelAll`/`IsBusy`/`Summarize`.
//!
//! Grounded on the teacher's `agent/orchestrator.rs` iteration shape (build
//! the prompt, stream a turn, dispatch any tool calls, repeat until a turn
//! produces none or `max_iterations` is hit) generalized from the teacher's
//! direct `AiClient`/SQLite coupling onto this crate's `ProviderAdapter`/
//! `SessionStore`/`MessageStore` trait boundaries. The per-turn work the
//! teacher inlined here now lives in `agent::stream::run_turn` and
//! `agent::executor::execute_tools`; this file is left doing only the
//! things that span turns: history assembly, the auto-summarize trigger,
//! title generation, exploration-budget and repeated-failure tracking.
//!
//! ```text
//!  ┌─────────────┐        RunEvent          ┌─────────────┐
//!  │ Orchestrator │ ─────────────────────►   │  Consumer   │
//!  │   (core)     │                          │ (TUI/Server)│
//!  └─────────────┘                           └─────────────┘
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::agent::cancellation::CancellationRegistry;
use crate::agent::context::{build_context_prefix, estimate_tokens};
use crate::agent::executor::{execute_tools, SessionToolEnv};
use crate::agent::failure::detect_repeated_failures;
use crate::agent::loop_events::RunEvent;
use crate::agent::stream::{run_turn, TurnError};
use crate::agent::subagent::{generate_summary, generate_title};
use crate::agent::translate;
use crate::ai::adapters::{AdapterRequest, ProviderAdapter, ProviderError};
use crate::ai::retry::{with_retry, RetryConfig};
use crate::ai::types::{AiTool, Content};
use crate::config::AgentProfile;
use crate::error::OrchestratorError;
use crate::event_bus::{Event, EventBus, EventKind};
use crate::permission::PermissionBroker;
use crate::store::{self, MessageStore, Part, Role as StoreRole, SessionStore};
use crate::tools::registry::ToolRegistry;

/// Hard ceiling on turns within one `Run` call. Distinct from the
/// exploration budget below: this one ends the run outright rather than
/// just nudging the model.
const MAX_ITERATIONS: usize = 80;

/// Read-only tool calls before the coder is warned, then stopped, so a
/// model that only ever reads never runs forever (nothing in the wire
/// protocol itself bounds exploration).
const EXPLORATION_BUDGET_SOFT: usize = 15;
const EXPLORATION_BUDGET_HARD: usize = 30;

fn is_exploration_tool(name: &str) -> bool {
    matches!(name, "view" | "glob" | "grep" | "ls")
}

/// Narrow a tool list down to what an agent profile permits. `None` in
/// either field means "everything" — most profiles (the coder) don't
/// restrict; the task sub-agent already gets its own read-only list from
/// `agent::subagent` rather than going through this path at all.
fn filter_tools(mut tools: Vec<AiTool>, profile: &AgentProfile) -> Vec<AiTool> {
    if let Some(allowed) = &profile.allowed_tools {
        tools.retain(|t| allowed.iter().any(|a| a == &t.name));
    }
    if let Some(allowed_servers) = &profile.allowed_mcp_servers {
        tools.retain(|t| match t.name.strip_prefix("mcp_") {
            Some(rest) => rest
                .split('_')
                .next()
                .map(|server| allowed_servers.iter().any(|s| s == server))
                .unwrap_or(false),
            None => true,
        });
    }
    tools
}

fn to_store_finish_reason(reason: &crate::ai::types::FinishReason) -> store::FinishReason {
    match reason {
        crate::ai::types::FinishReason::Stop => store::FinishReason::EndTurn,
        crate::ai::types::FinishReason::Length => store::FinishReason::MaxTokens,
        crate::ai::types::FinishReason::ToolCalls => store::FinishReason::ToolUse,
        crate::ai::types::FinishReason::ContentFilter => store::FinishReason::Error,
        crate::ai::types::FinishReason::Other(_) => store::FinishReason::EndTurn,
    }
}

/// Every finished part's text, concatenated, for the auto-summarize token
/// estimate — close enough to what will actually be sent as a prompt
/// without re-deriving `translate::to_model_messages`' wire shape.
fn history_text(history: &[store::Message]) -> String {
    history
        .iter()
        .flat_map(|m| m.parts.iter())
        .filter_map(|part| match part {
            Part::Text { text } => Some(text.as_str()),
            Part::Reasoning { text, .. } => Some(text.as_str()),
            Part::ToolResult { content, .. } => Some(content.as_str()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Services the orchestrator needs, assembled once at startup and shared
/// across every session it runs.
#[derive(Clone)]
pub struct OrchestratorServices {
    pub session_store: Arc<dyn SessionStore>,
    pub message_store: Arc<dyn MessageStore>,
    pub tool_registry: Arc<ToolRegistry>,
    pub permission_broker: Arc<PermissionBroker>,
    pub event_bus: Arc<EventBus>,
    pub cancellations: CancellationRegistry,
    /// Provider adapters keyed by the model id an [`AgentProfile`] names.
    pub adapters: HashMap<String, Arc<dyn ProviderAdapter>>,
    /// Agent profiles keyed by role: "coder", "task", "title", "summarize".
    pub agents: HashMap<String, AgentProfile>,
    pub disable_auto_summarize: bool,
}

impl OrchestratorServices {
    fn profile(&self, role: &str) -> Result<&AgentProfile, OrchestratorError> {
        self.agents
            .get(role)
            .ok_or_else(|| OrchestratorError::MissingAgentProfile(role.to_string()))
    }

    fn adapter_for(
        &self,
        profile: &AgentProfile,
    ) -> Result<Arc<dyn ProviderAdapter>, OrchestratorError> {
        self.adapters
            .get(&profile.model)
            .cloned()
            .ok_or_else(|| OrchestratorError::UnknownModel(profile.model.clone()))
    }
}

/// One `Run` invocation's inputs (spec §4.7's
/// `Run(ctx, sessionId, userInput, attachments…)`).
pub struct RunRequest {
    pub session_id: String,
    pub user_message: String,
    pub attachments: Vec<Attachment>,
    pub env: SessionToolEnv,
}

/// An inline binary attachment (spec §3 `BinaryAttachment`) submitted
/// alongside a user prompt — an already-loaded image, not a path the
/// orchestrator reads itself (path/clipboard/URL loading is a UI
/// collaborator's job; see `tools::image`).
pub struct Attachment {
    pub media_type: String,
    pub base64_data: String,
}

/// Drive the coder agent loop for one user turn to completion: assemble
/// history, stream a response, dispatch any tool calls, and repeat until a
/// turn produces no further tool calls, the run is cancelled, or
/// `MAX_ITERATIONS` is reached. Registers the run with `services.cancellations`
/// so a concurrent `Cancel`/`CancelAll` call can reach it.
pub async fn run(
    services: &OrchestratorServices,
    request: RunRequest,
    event_tx: mpsc::UnboundedSender<RunEvent>,
) -> Result<(), OrchestratorError> {
    let RunRequest {
        session_id,
        user_message,
        attachments,
        env,
    } = request;

    let cancel = services.cancellations.begin(&session_id);
    let result = run_inner(
        services,
        &session_id,
        user_message,
        attachments,
        env,
        &event_tx,
        &cancel,
    )
    .await;
    services.cancellations.end(&session_id);

    match &result {
        Ok(()) => {
            let _ = event_tx.send(RunEvent::Finished {
                session_id: session_id.clone(),
            });
        }
        Err(e) => {
            let _ = event_tx.send(RunEvent::Error {
                error: e.to_string(),
            });
        }
    }
    result
}

async fn run_inner(
    services: &OrchestratorServices,
    session_id: &str,
    user_message: String,
    attachments: Vec<Attachment>,
    mut env: SessionToolEnv,
    event_tx: &mpsc::UnboundedSender<RunEvent>,
    cancel: &CancellationToken,
) -> Result<(), OrchestratorError> {
    let profile = services.profile("coder")?.clone();
    let adapter = services.adapter_for(&profile)?;

    let mut history = services.message_store.list_messages(session_id).await?;
    let is_first_message = history.is_empty();

    let mut user_parts = vec![Part::Text {
        text: user_message.clone(),
    }];
    user_parts.extend(attachments.into_iter().map(|a| Part::BinaryAttachment {
        media_type: a.media_type,
        data: a.base64_data,
    }));

    let user_msg = services
        .message_store
        .append_message(session_id, StoreRole::User, user_parts)
        .await?;
    services.message_store.finish_message(&user_msg.id).await?;
    services.event_bus.publish(Event::Message {
        kind: EventKind::Created,
        session_id: session_id.to_string(),
        message_id: user_msg.id.clone(),
        payload: serde_json::json!({"role": "user"}),
    });
    history.push(user_msg);

    if is_first_message {
        if let (Ok(title_profile), true) = (services.profile("title"), true) {
            if let Ok(title_adapter) = services.adapter_for(title_profile) {
                if let Some(title) =
                    generate_title(title_adapter.as_ref(), title_profile, &user_message).await
                {
                    services
                        .session_store
                        .update_session_title(session_id, &title)
                        .await?;
                    let _ = event_tx.send(RunEvent::TitleGenerated { title: title.clone() });
                    services.event_bus.publish(Event::Session {
                        kind: EventKind::Updated,
                        session_id: session_id.to_string(),
                        payload: serde_json::json!({"title": title}),
                    });
                }
            }
        }
    }

    let mut active_session_id = session_id.to_string();

    if !services.disable_auto_summarize
        && estimate_tokens(&history_text(&history)) > adapter.model().summarize_threshold_tokens()
    {
        if let Ok(summarize_profile) = services.profile("summarize") {
            if let Ok(summarize_adapter) = services.adapter_for(summarize_profile) {
                match generate_summary(summarize_adapter.as_ref(), summarize_profile, &history)
                    .await
                {
                    Ok(summary) => {
                        let parent_title = services
                            .session_store
                            .get_session(&active_session_id)
                            .await?
                            .map(|s| s.title)
                            .unwrap_or_default();
                        let child = services
                            .session_store
                            .create_session(
                                &format!("{parent_title} (continued)"),
                                Some(&active_session_id),
                            )
                            .await?;
                        let system_msg = services
                            .message_store
                            .append_message(
                                &child.id,
                                StoreRole::System,
                                vec![Part::Text { text: summary }],
                            )
                            .await?;
                        services
                            .message_store
                            .finish_message(&system_msg.id)
                            .await?;
                        let _ = event_tx.send(RunEvent::Summarized {
                            child_session_id: child.id.clone(),
                        });
                        active_session_id = child.id.clone();
                        env.session_id = active_session_id.clone();
                        history = services
                            .message_store
                            .list_messages(&active_session_id)
                            .await?;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "auto-summarize failed, continuing on original session");
                    }
                }
            }
        }
    }

    let mut turn = 0usize;
    let mut exploration_count = 0usize;
    let mut failure_counters: HashMap<String, usize> = HashMap::new();

    loop {
        turn += 1;
        if turn > MAX_ITERATIONS {
            return Err(OrchestratorError::MaxIterationsReached(MAX_ITERATIONS));
        }
        if cancel.is_cancelled() {
            return Err(OrchestratorError::Cancelled);
        }

        let context_prefix = build_context_prefix(&env.working_dir, &profile.context_paths);
        let system_prompt = if context_prefix.is_empty() {
            profile.system_prompt.clone()
        } else {
            format!("{}\n\n{}", profile.system_prompt, context_prefix)
        };

        let messages = translate::to_model_messages(&history);
        let tools = filter_tools(services.tool_registry.get_ai_tools().await, &profile);

        let assistant_msg = services
            .message_store
            .append_message(&active_session_id, StoreRole::Assistant, Vec::new())
            .await?;
        let message_id = assistant_msg.id.clone();

        let base_request = AdapterRequest {
            messages,
            tools,
            system_prompt: Some(system_prompt),
            max_tokens: adapter.model().max_output_tokens,
            temperature: 0.0,
            thinking_enabled: adapter.model().supports_thinking,
            thinking_budget_override: None,
        };

        let stream_result = with_retry(&RetryConfig::default(), cancel, |state| {
            let mut req = base_request.clone();
            if let Some(resized) = state.resized_max_tokens {
                req.max_tokens = resized as u32;
            }
            let adapter = adapter.clone();
            async move { adapter.stream(&req).await }
        })
        .await;

        let stream = match stream_result {
            Ok(stream) => stream,
            Err(e) => {
                services.message_store.finish_message(&message_id).await?;
                return Err(OrchestratorError::Provider(e));
            }
        };

        let outcome = match run_turn(
            stream,
            services.message_store.as_ref(),
            &message_id,
            event_tx,
            cancel,
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(TurnError::Cancelled) => {
                services.message_store.finish_message(&message_id).await?;
                return Err(OrchestratorError::Cancelled);
            }
            Err(e) => {
                services.message_store.finish_message(&message_id).await?;
                return Err(OrchestratorError::Provider(ProviderError::Transport(
                    e.to_string(),
                )));
            }
        };

        let turn_usage = translate::usage_to_store(&outcome.usage);
        services
            .message_store
            .append_part(
                &message_id,
                Part::Finish {
                    reason: to_store_finish_reason(&outcome.finish_reason),
                    usage: turn_usage,
                },
            )
            .await?;
        services.message_store.finish_message(&message_id).await?;
        services
            .session_store
            .accumulate_usage(&active_session_id, turn_usage)
            .await?;
        let _ = event_tx.send(RunEvent::Usage {
            prompt_tokens: outcome.usage.prompt_tokens as u64,
            completion_tokens: outcome.usage.completion_tokens as u64,
        });

        history = services
            .message_store
            .list_messages(&active_session_id)
            .await?;

        if outcome.tool_calls.is_empty() {
            let _ = event_tx.send(RunEvent::TurnComplete {
                turn,
                has_more: false,
            });
            return Ok(());
        }

        for call in &outcome.tool_calls {
            if is_exploration_tool(&call.name) {
                exploration_count += 1;
            }
        }
        if exploration_count == EXPLORATION_BUDGET_SOFT {
            let _ = event_tx.send(RunEvent::Error {
                error: format!(
                    "{exploration_count} read-only tool calls so far this run — consider acting on what's been found"
                ),
            });
        } else if exploration_count >= EXPLORATION_BUDGET_HARD {
            return Err(OrchestratorError::RepeatedFailure(
                "exceeded exploration budget without taking a write action".to_string(),
            ));
        }

        let tool_results = execute_tools(
            &outcome.tool_calls,
            &services.tool_registry,
            &services.permission_broker,
            &env,
            event_tx,
            cancel,
        )
        .await;

        if let Some(diagnostic) =
            detect_repeated_failures(&mut failure_counters, &outcome.tool_calls, &tool_results)
        {
            return Err(OrchestratorError::RepeatedFailure(diagnostic));
        }

        let tool_parts: Vec<Part> = tool_results
            .iter()
            .filter_map(|content| match content {
                Content::ToolResult {
                    tool_use_id,
                    output,
                    is_error,
                } => {
                    let output_str = match output {
                        serde_json::Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    Some(translate::tool_result_part(
                        tool_use_id,
                        &output_str,
                        is_error.unwrap_or(false),
                    ))
                }
                _ => None,
            })
            .collect();

        let tool_msg = services
            .message_store
            .append_message(&active_session_id, StoreRole::Tool, tool_parts)
            .await?;
        services.message_store.finish_message(&tool_msg.id).await?;
        history = services
            .message_store
            .list_messages(&active_session_id)
            .await?;

        let _ = event_tx.send(RunEvent::TurnComplete {
            turn,
            has_more: true,
        });
    }
}

/// Cancel a single running session (spec §4.7's `Cancel(sessionId)`).
/// Returns `true` if it was actually running.
pub fn cancel(services: &OrchestratorServices, session_id: &str) -> bool {
    services.cancellations.cancel(session_id)
}

/// Cancel every running session (spec §4.7's `CancelAll()`).
pub fn cancel_all(services: &OrchestratorServices) {
    services.cancellations.cancel_all()
}

/// Whether a session currently has a `Run` in flight (spec §4.7's
/// `IsBusy(sessionId)`).
pub fn is_busy(services: &OrchestratorServices, session_id: &str) -> bool {
    services.cancellations.is_running(session_id)
}

/// Summarize a session on demand (spec §4.7's `Summarize` operation),
/// independent of the token-threshold auto-trigger `run` applies before a
/// turn. Returns the summary text; the caller decides whether to seed a
/// child session with it or use it some other way.
pub async fn summarize(
    services: &OrchestratorServices,
    session_id: &str,
) -> Result<String, OrchestratorError> {
    let profile = services.profile("summarize")?;
    let adapter = services.adapter_for(profile)?;
    let history = services.message_store.list_messages(session_id).await?;
    generate_summary(adapter.as_ref(), profile, &history)
        .await
        .map_err(OrchestratorError::Summarize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::types::FinishReason as WireFinishReason;

    fn tool(name: &str) -> AiTool {
        AiTool {
            name: name.to_string(),
            description: String::new(),
            input_schema: serde_json::json!({}),
        }
    }

    fn profile(model: &str) -> AgentProfile {
        AgentProfile {
            model: model.to_string(),
            system_prompt: String::new(),
            allowed_tools: None,
            allowed_mcp_servers: None,
            context_paths: Vec::new(),
        }
    }

    #[test]
    fn exploration_tools_are_read_only_names() {
        assert!(is_exploration_tool("view"));
        assert!(is_exploration_tool("grep"));
        assert!(!is_exploration_tool("edit"));
        assert!(!is_exploration_tool("bash"));
    }

    #[test]
    fn filter_tools_passes_through_with_no_restrictions() {
        let tools = vec![tool("view"), tool("edit")];
        let filtered = filter_tools(tools, &profile("m"));
        assert_eq!(filtered.len(), 2);
    }

    #[test]
    fn filter_tools_restricts_to_allowed_list() {
        let tools = vec![tool("view"), tool("edit"), tool("bash")];
        let mut p = profile("m");
        p.allowed_tools = Some(vec!["view".to_string()]);
        let filtered = filter_tools(tools, &p);
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].name, "view");
    }

    #[test]
    fn filter_tools_restricts_mcp_tools_by_server() {
        let tools = vec![tool("view"), tool("mcp_github_search"), tool("mcp_slack_post")];
        let mut p = profile("m");
        p.allowed_mcp_servers = Some(vec!["github".to_string()]);
        let filtered = filter_tools(tools, &p);
        let names: Vec<_> = filtered.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["view", "mcp_github_search"]);
    }

    #[test]
    fn finish_reason_maps_tool_calls_to_tool_use() {
        assert_eq!(
            to_store_finish_reason(&WireFinishReason::ToolCalls),
            store::FinishReason::ToolUse
        );
        assert_eq!(
            to_store_finish_reason(&WireFinishReason::Length),
            store::FinishReason::MaxTokens
        );
    }

    /// A provider adapter whose `stream` never terminates on its own,
    /// emitting deltas at a fixed cadence until the caller drops it. Stands
    /// in for a provider wedged mid-response, so the test can assert that
    /// cancellation — not the provider — is what ends the run.
    struct NeverEndingAdapter {
        model: crate::ai::providers::ModelDescriptor,
    }

    #[async_trait::async_trait]
    impl ProviderAdapter for NeverEndingAdapter {
        fn model(&self) -> &crate::ai::providers::ModelDescriptor {
            &self.model
        }

        async fn send(
            &self,
            _request: &AdapterRequest,
        ) -> Result<crate::ai::adapters::ProviderResponse, ProviderError> {
            unimplemented!("not exercised by the cancellation test")
        }

        async fn stream(
            &self,
            _request: &AdapterRequest,
        ) -> Result<crate::ai::adapters::EventStream, ProviderError> {
            let stream = futures::stream::unfold(0u32, |index| async move {
                tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                Some((
                    crate::ai::adapters::ProviderEvent::ContentDelta {
                        index: 0,
                        text: format!("tick {index}"),
                    },
                    index + 1,
                ))
            });
            Ok(Box::pin(stream))
        }
    }

    /// Spec §8 property 3: cancelling a running session causes `Run` to
    /// return (closing its event channel) within a bounded grace period,
    /// even when the provider stream never ends on its own.
    #[tokio::test]
    async fn cancelling_a_run_stops_it_promptly_against_a_never_ending_stream() {
        let event_bus = Arc::new(EventBus::new());
        let store = Arc::new(
            crate::store::sqlite::SqliteStore::open_in_memory(event_bus.clone()).unwrap(),
        );
        let session = store.create_session("untitled", None).await.unwrap();

        let mut adapters: HashMap<String, Arc<dyn ProviderAdapter>> = HashMap::new();
        adapters.insert(
            "test-model".to_string(),
            Arc::new(NeverEndingAdapter {
                model: crate::ai::providers::ModelDescriptor::new("test-model", 200_000, 8_000),
            }),
        );

        let mut agents = HashMap::new();
        agents.insert("coder".to_string(), profile("test-model"));

        let services = OrchestratorServices {
            session_store: store.clone(),
            message_store: store,
            tool_registry: Arc::new(ToolRegistry::new()),
            permission_broker: Arc::new(PermissionBroker::new(event_bus.clone(), Vec::new(), true)),
            event_bus,
            cancellations: CancellationRegistry::new(),
            adapters,
            agents,
            disable_auto_summarize: true,
        };

        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        let dir = tempfile::tempdir().unwrap();
        let run_request = RunRequest {
            session_id: session.id.clone(),
            user_message: "hello".to_string(),
            attachments: Vec::new(),
            env: crate::agent::executor::SessionToolEnv::new(
                session.id.clone(),
                dir.path().to_path_buf(),
                Arc::new(crate::process::ProcessRegistry::new()),
            ),
        };

        let services_for_run = services.clone();
        let handle = tokio::spawn(async move { run(&services_for_run, run_request, event_tx).await });

        // Let the never-ending stream tick a few times before cancelling.
        tokio::time::sleep(std::time::Duration::from_millis(80)).await;
        assert!(services.cancellations.cancel(&session.id));

        let result = tokio::time::timeout(std::time::Duration::from_secs(2), handle)
            .await
            .expect("run did not return within the grace period")
            .unwrap();
        assert!(matches!(result, Err(OrchestratorError::Cancelled)));

        // The event channel closes once `run` returns and drops its sender.
        while event_rx.recv().await.is_some() {}
        assert!(!services.cancellations.is_running(&session.id));
    }

    #[test]
    fn history_text_collects_text_reasoning_and_tool_result_parts() {
        let history = vec![store::Message {
            id: "m1".into(),
            session_id: "s1".into(),
            role: StoreRole::Assistant,
            parts: vec![
                Part::Text { text: "hello".into() },
                Part::ToolCall {
                    id: "c1".into(),
                    name: "bash".into(),
                    input: serde_json::json!({}),
                    finished: true,
                },
                Part::ToolResult {
                    tool_call_id: "c1".into(),
                    content: "world".into(),
                    is_error: false,
                    metadata: None,
                },
            ],
            created_at: chrono::Utc::now(),
            finished_at: Some(chrono::Utc::now()),
        }];
        assert_eq!(history_text(&history), "hello world");
    }
}
