//! One-shot and short-lived sub-agent runners (spec glossary's "task",
//! "title", and "summarize" agent roles). Each is a small, self-contained
//! request/response or short loop against a [`ProviderAdapter`] — none of
//! them stream to a caller the way the main coder loop does, since their
//! output is consumed programmatically (a title string, a summary, a
//! search result) rather than rendered live.

pub mod types;

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;

use crate::ai::adapters::{AdapterRequest, ProviderAdapter};
use crate::ai::types::{Content, ModelMessage, Role};
use crate::agent::translate;
use crate::config::AgentProfile;
use crate::store;
use crate::tools::registry::{tool_category, ToolCategory, ToolContext, ToolRegistry};

pub use types::{
    AgentProgress, AgentProgressStatus, SubAgentApiError, SubAgentModel, SubAgentResult,
    SubAgentTask,
};

/// A "task" sub-agent explores the codebase read-only and never sees the
/// write-category tools at all — not gated by the permission broker, simply
/// never offered the choice (spec glossary: "search-only sub-agent").
const MAX_TURNS: usize = 20;

async fn read_only_tools(tool_registry: &ToolRegistry) -> Vec<crate::ai::types::AiTool> {
    tool_registry
        .get_ai_tools()
        .await
        .into_iter()
        .filter(|t| tool_category(&t.name) == ToolCategory::ReadOnly)
        .collect()
}

/// Run one codebase-exploration sub-agent to completion (or until it hits
/// [`MAX_TURNS`] without finishing).
pub async fn run_task(
    task: SubAgentTask,
    adapter: Arc<dyn ProviderAdapter>,
    tool_registry: Arc<ToolRegistry>,
    progress_tx: Option<mpsc::UnboundedSender<AgentProgress>>,
) -> SubAgentResult {
    let start = Instant::now();
    let system_prompt = task.system_prompt();
    let tools = read_only_tools(&tool_registry).await;
    let ctx = ToolContext {
        working_dir: task.working_dir.clone(),
        sandbox_root: Some(task.working_dir.clone()),
        ..Default::default()
    };

    let mut messages = vec![ModelMessage {
        role: Role::User,
        content: vec![Content::Text {
            text: task.prompt.clone(),
        }],
    }];

    let mut files_examined: Vec<String> = Vec::new();
    let mut tool_count = 0usize;
    let mut progress = AgentProgress {
        task_id: task.id.clone(),
        name: task.name.clone(),
        status: AgentProgressStatus::Running,
        ..Default::default()
    };

    for turn in 1..=MAX_TURNS {
        let request = AdapterRequest {
            messages: messages.clone(),
            tools: tools.clone(),
            system_prompt: Some(system_prompt.clone()),
            max_tokens: task.model.max_tokens(),
            temperature: 0.0,
            thinking_enabled: task.thinking_enabled,
            thinking_budget_override: None,
        };

        let response = match adapter.send(&request).await {
            Ok(response) => response,
            Err(e) => {
                progress.status = AgentProgressStatus::Failed;
                if let Some(tx) = &progress_tx {
                    let _ = tx.send(progress);
                }
                return SubAgentResult {
                    task_id: task.id,
                    success: false,
                    output: String::new(),
                    files_examined,
                    duration_ms: start.elapsed().as_millis() as u64,
                    turns_used: turn,
                    error: Some(e.to_string()),
                };
            }
        };

        let (_, tool_calls) = translate::response_content_to_parts(&response.content);
        let text: String = response
            .content
            .iter()
            .filter_map(|c| match c {
                Content::Text { text } => Some(text.clone()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n");

        messages.push(ModelMessage {
            role: Role::Assistant,
            content: response.content,
        });

        if tool_calls.is_empty() {
            progress.status = AgentProgressStatus::Complete;
            progress.tool_count = tool_count;
            if let Some(tx) = &progress_tx {
                let _ = tx.send(progress);
            }
            return SubAgentResult {
                task_id: task.id,
                success: true,
                output: text,
                files_examined,
                duration_ms: start.elapsed().as_millis() as u64,
                turns_used: turn,
                error: None,
            };
        }

        let mut result_content = Vec::with_capacity(tool_calls.len());
        for call in &tool_calls {
            tool_count += 1;
            if let Some(path) = call.arguments.get("path").and_then(|v| v.as_str()) {
                files_examined.push(path.to_string());
            }
            let result = tool_registry
                .execute(&call.name, call.arguments.clone(), &ctx)
                .await
                .unwrap_or_else(|| {
                    crate::tools::registry::ToolResult::error_with_code(
                        "unknown_tool",
                        format!("Unknown tool: {}", call.name),
                    )
                });
            result_content.push(translate::tool_result_content(
                &call.id,
                &result.output,
                result.is_error,
            ));
        }
        messages.push(ModelMessage {
            role: Role::Tool,
            content: result_content,
        });

        progress.tool_count = tool_count;
        progress.current_action = tool_calls.last().map(|c| format!("running {}", c.name));
        if let Some(tx) = &progress_tx {
            let _ = tx.send(progress.clone());
        }
    }

    progress.status = AgentProgressStatus::Failed;
    if let Some(tx) = &progress_tx {
        let _ = tx.send(progress);
    }
    SubAgentResult {
        task_id: task.id,
        success: false,
        output: String::new(),
        files_examined,
        duration_ms: start.elapsed().as_millis() as u64,
        turns_used: MAX_TURNS,
        error: Some(format!("exceeded {MAX_TURNS} turns without finishing")),
    }
}

/// One-shot title generation from the first user message (spec §4.7's
/// title sub-agent). Returns `None` on any provider error or an empty
/// response — titling is best-effort, never worth failing the run over.
pub async fn generate_title(
    adapter: &dyn ProviderAdapter,
    profile: &AgentProfile,
    first_user_message: &str,
) -> Option<String> {
    let request = AdapterRequest {
        messages: vec![ModelMessage {
            role: Role::User,
            content: vec![Content::Text {
                text: first_user_message.to_string(),
            }],
        }],
        tools: Vec::new(),
        system_prompt: Some(profile.system_prompt.clone()),
        max_tokens: 32,
        temperature: 0.3,
        thinking_enabled: false,
        thinking_budget_override: None,
    };

    let response = adapter.send(&request).await.ok()?;
    let title = response.content.iter().find_map(|c| match c {
        Content::Text { text } => Some(text.trim().trim_matches('"').to_string()),
        _ => None,
    })?;

    (!title.is_empty()).then_some(title)
}

/// One-shot summarization of a session's history (spec §9's auto-summarize
/// trigger). The summary becomes the sole content of the new child
/// session's first `System` message.
pub async fn generate_summary(
    adapter: &dyn ProviderAdapter,
    profile: &AgentProfile,
    history: &[store::Message],
) -> Result<String, String> {
    let mut messages = translate::to_model_messages(history);
    messages.push(ModelMessage {
        role: Role::User,
        content: vec![Content::Text {
            text: "Summarize the conversation above so it can seed a fresh session with no loss \
                   of working context: decisions made, files touched, and outstanding work."
                .to_string(),
        }],
    });

    let request = AdapterRequest {
        messages,
        tools: Vec::new(),
        system_prompt: Some(profile.system_prompt.clone()),
        max_tokens: 2_048,
        temperature: 0.2,
        thinking_enabled: false,
        thinking_budget_override: None,
    };

    let response = adapter.send(&request).await.map_err(|e| e.to_string())?;
    response
        .content
        .into_iter()
        .find_map(|c| match c {
            Content::Text { text } => Some(text),
            _ => None,
        })
        .ok_or_else(|| "summarize agent returned no text content".to_string())
}
