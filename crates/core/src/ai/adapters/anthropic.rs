//! Anthropic Messages API adapter.
//!
//! Message-array construction (role alternation filler, thinking-block
//! preservation, orphaned tool_result repair) is grounded on the teacher's
//! `ai/format/anthropic.rs::{convert_messages, sanitize_tool_results}`,
//! trimmed of its MiniMax-specific thinking-preservation branch since this
//! adapter only ever talks to one vendor. SSE consumption follows the
//! teacher's `ai/client/streaming.rs` shape (`reqwest::Response::bytes_stream`
//! fed through a manual frame-by-frame parser) without its multi-provider
//! dispatch.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;

use super::{AdapterRequest, EventStream, ProviderAdapter, ProviderError, ProviderEvent, ProviderResponse};
use crate::ai::providers::ModelDescriptor;
use crate::ai::reasoning::ReasoningConfig;
use crate::ai::types::{Content, FinishReason, Role, Usage};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";

pub struct AnthropicAdapter {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: ModelDescriptor,
    extra_headers: Vec<(String, String)>,
}

impl AnthropicAdapter {
    pub fn new(api_key: String, base_url: Option<String>, model: ModelDescriptor) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            api_key,
            model,
            extra_headers: Vec::new(),
        }
    }

    pub fn with_extra_headers(mut self, headers: Vec<(String, String)>) -> Self {
        self.extra_headers = headers;
        self
    }

    fn build_body(&self, request: &AdapterRequest, streaming: bool) -> Value {
        let messages = convert_messages(&request.messages);
        let mut body = serde_json::json!({
            "model": self.model.id,
            "messages": messages,
            "max_tokens": request.max_tokens,
        });

        if streaming {
            body["stream"] = serde_json::json!(true);
        }
        if let Some(system) = &request.system_prompt {
            body["system"] = serde_json::json!(system);
        }
        if !request.tools.is_empty() {
            let mut tools: Vec<Value> = request
                .tools
                .iter()
                .map(|t| serde_json::json!({
                    "name": t.name,
                    "description": t.description,
                    "input_schema": t.input_schema,
                }))
                .collect();
            // Mark the final tool description cacheable (spec §4.5): the
            // tool list is stable across turns, so anchoring the cache
            // breakpoint here lets the whole prefix (system + tools) be
            // served from cache on the next request.
            if let Some(last) = tools.last_mut() {
                last["cache_control"] = serde_json::json!({ "type": "ephemeral" });
            }
            body["tools"] = serde_json::json!(tools);
        }

        body["temperature"] = serde_json::json!(ReasoningConfig::temperature(
            request.thinking_enabled,
            0.0
        ));

        if let Some(thinking) = ReasoningConfig::build(
            request.thinking_enabled,
            request.max_tokens,
            request.thinking_budget_override,
        ) {
            body["thinking"] = serde_json::json!({
                "type": "enabled",
                "budget_tokens": thinking.budget_tokens,
            });
        }

        body
    }

    fn request_builder(&self, streaming: bool, request: &AdapterRequest) -> reqwest::RequestBuilder {
        let url = format!("{}/v1/messages", self.base_url.trim_end_matches('/'));
        let mut builder = self
            .client
            .post(url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json");
        for (k, v) in &self.extra_headers {
            builder = builder.header(k, v);
        }
        builder.json(&self.build_body(request, streaming))
    }
}

async fn classify_error(response: reqwest::Response) -> ProviderError {
    let status = response.status().as_u16();
    let retry_after = response
        .headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs);
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<unreadable body>".to_string());

    match status {
        401 => ProviderError::Unauthorized(body),
        429 => ProviderError::RateLimited {
            message: body,
            retry_after,
        },
        529 => ProviderError::Overloaded(body),
        400 => {
            if let Some((input, max, limit)) = super::parse_context_limit_message(&body) {
                ProviderError::ContextLimitExceeded {
                    input_tokens: input,
                    max_tokens: max,
                    context_limit: limit,
                }
            } else {
                ProviderError::BadRequest(body)
            }
        }
        500..=599 => ProviderError::Server { status, message: body },
        _ => ProviderError::Server { status, message: body },
    }
}

#[async_trait]
impl ProviderAdapter for AnthropicAdapter {
    fn model(&self) -> &ModelDescriptor {
        &self.model
    }

    async fn send(&self, request: &AdapterRequest) -> Result<ProviderResponse, ProviderError> {
        let response = self
            .request_builder(false, request)
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(classify_error(response).await);
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| ProviderError::Malformed(e.to_string()))?;
        parse_non_streaming_response(&body)
    }

    async fn stream(&self, request: &AdapterRequest) -> Result<EventStream, ProviderError> {
        let response = self
            .request_builder(true, request)
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(classify_error(response).await);
        }

        let (tx, rx) = mpsc::unbounded_channel();
        spawn_sse_pump(response.bytes_stream(), tx);
        Ok(Box::pin(tokio_stream::wrappers::UnboundedReceiverStream::new(rx)))
    }
}

fn spawn_sse_pump<S>(stream: S, tx: mpsc::UnboundedSender<ProviderEvent>)
where
    S: Stream<Item = reqwest::Result<bytes::Bytes>> + Send + 'static,
{
    tokio::spawn(async move {
        tokio::pin!(stream);
        let mut buffer = String::new();
        let mut block_kinds: Vec<BlockKind> = Vec::new();

        while let Some(chunk) = stream.next().await {
            let bytes = match chunk {
                Ok(b) => b,
                Err(e) => {
                    let _ = tx.send(ProviderEvent::Error {
                        message: format!("stream read error: {e}"),
                    });
                    return;
                }
            };
            buffer.push_str(&String::from_utf8_lossy(&bytes));

            while let Some(pos) = buffer.find("\n\n") {
                let frame: String = buffer.drain(..pos + 2).collect();
                if let Some(event) = parse_sse_frame(&frame, &mut block_kinds) {
                    let is_terminal = matches!(event, ProviderEvent::Complete { .. } | ProviderEvent::Error { .. });
                    if tx.send(event).is_err() {
                        return;
                    }
                    if is_terminal {
                        return;
                    }
                }
            }
        }
    });
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum BlockKind {
    Text,
    Thinking,
    ToolUse,
    Other,
}

/// Parse one `event: ...\ndata: ...\n\n` SSE frame into a [`ProviderEvent`],
/// tracking per-index block kinds so a `content_block_delta` knows whether
/// to emit a text/thinking/signature/tool-json delta.
fn parse_sse_frame(frame: &str, block_kinds: &mut Vec<BlockKind>) -> Option<ProviderEvent> {
    let mut data_line = None;
    for line in frame.lines() {
        if let Some(rest) = line.strip_prefix("data:") {
            data_line = Some(rest.trim());
        }
    }
    let data = data_line?;
    if data.is_empty() {
        return None;
    }
    let json: Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(e) => {
            return Some(ProviderEvent::Warning {
                message: format!("skipped malformed SSE data line: {e}"),
            })
        }
    };

    let event_type = json["type"].as_str().unwrap_or_default();
    match event_type {
        "message_start" => None,
        "ping" => None,
        "content_block_start" => {
            let index = json["index"].as_u64().unwrap_or(0) as usize;
            let kind = match json["content_block"]["type"].as_str() {
                Some("text") => BlockKind::Text,
                Some("thinking") => BlockKind::Thinking,
                Some("tool_use") => BlockKind::ToolUse,
                _ => BlockKind::Other,
            };
            if block_kinds.len() <= index {
                block_kinds.resize(index + 1, BlockKind::Other);
            }
            block_kinds[index] = kind;

            if kind == BlockKind::ToolUse {
                let id = json["content_block"]["id"].as_str().unwrap_or_default().to_string();
                let name = json["content_block"]["name"].as_str().unwrap_or_default().to_string();
                Some(ProviderEvent::ToolUseStart { index, id, name })
            } else {
                Some(ProviderEvent::ContentStart { index })
            }
        }
        "content_block_delta" => {
            let index = json["index"].as_u64().unwrap_or(0) as usize;
            let delta = &json["delta"];
            match delta["type"].as_str() {
                Some("text_delta") => Some(ProviderEvent::ContentDelta {
                    index,
                    text: delta["text"].as_str().unwrap_or_default().to_string(),
                }),
                Some("thinking_delta") => Some(ProviderEvent::ThinkingDelta {
                    index,
                    text: delta["thinking"].as_str().unwrap_or_default().to_string(),
                }),
                Some("signature_delta") => Some(ProviderEvent::SignatureDelta {
                    index,
                    signature: delta["signature"].as_str().unwrap_or_default().to_string(),
                }),
                Some("input_json_delta") => Some(ProviderEvent::ToolUseDelta {
                    index,
                    partial_json: delta["partial_json"].as_str().unwrap_or_default().to_string(),
                }),
                _ => None,
            }
        }
        "content_block_stop" => {
            let index = json["index"].as_u64().unwrap_or(0) as usize;
            let kind = block_kinds.get(index).copied().unwrap_or(BlockKind::Other);
            if kind == BlockKind::ToolUse {
                Some(ProviderEvent::ToolUseStop { index })
            } else {
                Some(ProviderEvent::ContentStop { index })
            }
        }
        "message_delta" => {
            let stop_reason = json["delta"]["stop_reason"].as_str();
            let usage = parse_usage(&json["usage"]);
            let finish_reason = map_finish_reason(stop_reason);
            Some(ProviderEvent::Complete { usage, finish_reason })
        }
        "message_stop" => None,
        "error" => Some(ProviderEvent::Error {
            message: json["error"]["message"]
                .as_str()
                .unwrap_or("unknown streaming error")
                .to_string(),
        }),
        other => Some(ProviderEvent::Warning {
            message: format!("unhandled SSE event type: {other}"),
        }),
    }
}

fn map_finish_reason(stop_reason: Option<&str>) -> FinishReason {
    match stop_reason {
        Some("end_turn") | Some("stop_sequence") => FinishReason::Stop,
        Some("max_tokens") => FinishReason::Length,
        Some("tool_use") => FinishReason::ToolCalls,
        Some(other) => FinishReason::Other(other.to_string()),
        None => FinishReason::Stop,
    }
}

fn parse_usage(value: &Value) -> Usage {
    Usage {
        prompt_tokens: value["input_tokens"].as_u64().unwrap_or(0) as usize,
        completion_tokens: value["output_tokens"].as_u64().unwrap_or(0) as usize,
        total_tokens: (value["input_tokens"].as_u64().unwrap_or(0)
            + value["output_tokens"].as_u64().unwrap_or(0)) as usize,
        cache_creation_input_tokens: value["cache_creation_input_tokens"].as_u64().unwrap_or(0) as usize,
        cache_read_input_tokens: value["cache_read_input_tokens"].as_u64().unwrap_or(0) as usize,
    }
}

fn parse_non_streaming_response(body: &Value) -> Result<ProviderResponse, ProviderError> {
    let blocks = body["content"]
        .as_array()
        .ok_or_else(|| ProviderError::Malformed("missing content array".to_string()))?;

    let mut content = Vec::with_capacity(blocks.len());
    for block in blocks {
        match block["type"].as_str() {
            Some("text") => content.push(Content::Text {
                text: block["text"].as_str().unwrap_or_default().to_string(),
            }),
            Some("thinking") => content.push(Content::Thinking {
                thinking: block["thinking"].as_str().unwrap_or_default().to_string(),
                signature: block["signature"].as_str().unwrap_or_default().to_string(),
            }),
            Some("redacted_thinking") => content.push(Content::RedactedThinking {
                data: block["data"].as_str().unwrap_or_default().to_string(),
            }),
            Some("tool_use") => content.push(Content::ToolUse {
                id: block["id"].as_str().unwrap_or_default().to_string(),
                name: block["name"].as_str().unwrap_or_default().to_string(),
                input: block["input"].clone(),
            }),
            _ => {}
        }
    }

    let finish_reason = map_finish_reason(body["stop_reason"].as_str());
    let usage = parse_usage(&body["usage"]);

    Ok(ProviderResponse {
        content,
        usage,
        finish_reason,
    })
}

/// Convert domain messages to Anthropic's wire format, inserting filler
/// messages to maintain strict user/assistant alternation and preserving
/// thinking blocks only on the last assistant message that still has a
/// pending tool_use (required for signature validation on the next turn).
fn convert_messages(messages: &[crate::ai::types::ModelMessage]) -> Vec<Value> {
    let non_system: Vec<_> = messages.iter().filter(|m| m.role != Role::System).collect();

    let last_assistant_with_tools_idx = {
        let mut idx = None;
        for (i, msg) in non_system.iter().enumerate() {
            let has_tool_use = msg.role == Role::Assistant
                && msg.content.iter().any(|c| matches!(c, Content::ToolUse { .. }));
            if has_tool_use {
                let followed_by_result = non_system
                    .get(i + 1)
                    .is_some_and(|next| next.content.iter().any(|c| matches!(c, Content::ToolResult { .. })));
                if followed_by_result {
                    idx = Some(i);
                }
            }
        }
        idx
    };

    let mut result: Vec<Value> = Vec::new();
    let mut last_role: Option<&str> = None;

    for (i, msg) in non_system.iter().enumerate() {
        let role = match msg.role {
            Role::User | Role::Tool => "user",
            Role::Assistant => "assistant",
            Role::System => unreachable!("system messages filtered above"),
        };

        if last_role == Some(role) {
            let filler_role = if role == "user" { "assistant" } else { "user" };
            result.push(serde_json::json!({
                "role": filler_role,
                "content": [{"type": "text", "text": "."}],
            }));
        }

        let include_thinking = last_assistant_with_tools_idx == Some(i);
        let content: Vec<Value> = msg
            .content
            .iter()
            .filter_map(|c| convert_content(c, include_thinking))
            .collect();

        result.push(serde_json::json!({ "role": role, "content": content }));
        last_role = Some(role);
    }

    sanitize_tool_results(&mut result);
    mark_ephemeral_cache_breakpoints(&mut result);
    result
}

/// Mark the last content block of each of the last ≤3 messages as an
/// ephemeral cache breakpoint (spec §4.5), the way the teacher's
/// `ai/client/streaming.rs` anchors `cache_control` on the tail of the
/// message array so a growing conversation keeps reusing the same cached
/// prefix turn over turn.
fn mark_ephemeral_cache_breakpoints(messages: &mut [Value]) {
    let start = messages.len().saturating_sub(3);
    for msg in &mut messages[start..] {
        if let Some(content) = msg.get_mut("content").and_then(Value::as_array_mut) {
            if let Some(last_block) = content.last_mut() {
                last_block["cache_control"] = serde_json::json!({ "type": "ephemeral" });
            }
        }
    }
}

fn convert_content(content: &Content, include_thinking: bool) -> Option<Value> {
    match content {
        Content::Text { text } => Some(serde_json::json!({ "type": "text", "text": text })),
        Content::ToolUse { id, name, input } => Some(serde_json::json!({
            "type": "tool_use", "id": id, "name": name, "input": input
        })),
        Content::ToolResult { tool_use_id, output, is_error } => Some(serde_json::json!({
            "type": "tool_result",
            "tool_use_id": tool_use_id,
            "content": output,
            "is_error": is_error.unwrap_or(false),
        })),
        Content::Image { image, .. } => {
            if let Some(data) = &image.base64 {
                Some(serde_json::json!({
                    "type": "image",
                    "source": {
                        "type": "base64",
                        "media_type": image.media_type.clone().unwrap_or_else(|| "image/png".to_string()),
                        "data": data,
                    }
                }))
            } else {
                image.url.as_ref().map(|url| serde_json::json!({
                    "type": "image",
                    "source": { "type": "url", "url": url }
                }))
            }
        }
        Content::Document { source } => {
            if let Some(data) = &source.data {
                Some(serde_json::json!({
                    "type": "document",
                    "source": { "type": "base64", "media_type": source.media_type, "data": data }
                }))
            } else {
                source.url.as_ref().map(|url| serde_json::json!({
                    "type": "document",
                    "source": { "type": "url", "url": url }
                }))
            }
        }
        Content::Thinking { thinking, signature } if include_thinking => Some(serde_json::json!({
            "type": "thinking", "thinking": thinking, "signature": signature
        })),
        Content::RedactedThinking { data } if include_thinking => {
            Some(serde_json::json!({ "type": "redacted_thinking", "data": data }))
        }
        Content::Thinking { .. } | Content::RedactedThinking { .. } => None,
    }
}

/// Strip orphaned `tool_result`s and inject stubs for `tool_use`s missing a
/// result, so an interrupted session never produces an invalid tool_use /
/// tool_result pairing on replay.
fn sanitize_tool_results(messages: &mut Vec<Value>) {
    let mut i = 0;
    while i < messages.len() {
        if messages[i]["role"].as_str() != Some("assistant") {
            i += 1;
            continue;
        }

        let mut tool_use_ids: Vec<String> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        if let Some(content) = messages[i]["content"].as_array() {
            for block in content {
                if block["type"].as_str() == Some("tool_use") {
                    if let Some(id) = block["id"].as_str() {
                        if seen.insert(id.to_string()) {
                            tool_use_ids.push(id.to_string());
                        }
                    }
                }
            }
        }

        if tool_use_ids.is_empty() {
            i += 1;
            continue;
        }

        let next_is_user = messages.get(i + 1).map(|m| m["role"].as_str()) == Some(Some("user"));
        if next_is_user {
            let content = messages[i + 1]["content"].as_array().cloned().unwrap_or_default();
            let mut filtered = Vec::with_capacity(content.len() + tool_use_ids.len());
            let mut result_ids: HashSet<String> = HashSet::new();
            for block in content {
                if block["type"].as_str() == Some("tool_result") {
                    let id = block["tool_use_id"].as_str().unwrap_or_default();
                    if seen.contains(id) {
                        result_ids.insert(id.to_string());
                        filtered.push(block);
                    }
                } else {
                    filtered.push(block);
                }
            }
            for id in &tool_use_ids {
                if !result_ids.contains(id) {
                    filtered.push(stub_tool_result(id));
                }
            }
            messages[i + 1]["content"] = Value::Array(filtered);
        } else {
            let stubs: Vec<Value> = tool_use_ids.iter().map(|id| stub_tool_result(id)).collect();
            messages.insert(i + 1, serde_json::json!({ "role": "user", "content": stubs }));
        }
        i += 1;
    }
}

fn stub_tool_result(tool_use_id: &str) -> Value {
    serde_json::json!({
        "type": "tool_result",
        "tool_use_id": tool_use_id,
        "content": "Tool execution was interrupted",
        "is_error": true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::types::ModelMessage;

    fn text_msg(role: Role, text: &str) -> ModelMessage {
        ModelMessage {
            role,
            content: vec![Content::Text { text: text.to_string() }],
        }
    }

    #[test]
    fn inserts_filler_between_consecutive_user_messages() {
        let messages = vec![text_msg(Role::User, "a"), text_msg(Role::User, "b")];
        let converted = convert_messages(&messages);
        assert_eq!(converted.len(), 3);
        assert_eq!(converted[1]["role"].as_str(), Some("assistant"));
    }

    #[test]
    fn marks_last_block_of_trailing_three_messages_ephemeral() {
        let messages = vec![
            text_msg(Role::User, "a"),
            text_msg(Role::Assistant, "b"),
            text_msg(Role::User, "c"),
            text_msg(Role::Assistant, "d"),
        ];
        let converted = convert_messages(&messages);
        assert_eq!(converted.len(), 4);
        assert!(converted[0]["content"][0].get("cache_control").is_none());
        for msg in &converted[1..] {
            assert_eq!(
                msg["content"][0]["cache_control"]["type"].as_str(),
                Some("ephemeral")
            );
        }
    }

    #[test]
    fn build_body_marks_final_tool_ephemeral() {
        let adapter = AnthropicAdapter::new(
            "key".to_string(),
            None,
            ModelDescriptor::new("claude-test", 200_000, 8_000),
        );
        let request = AdapterRequest {
            messages: vec![text_msg(Role::User, "hi")],
            tools: vec![
                crate::ai::types::AiTool {
                    name: "view".to_string(),
                    description: "read a file".to_string(),
                    input_schema: serde_json::json!({}),
                },
                crate::ai::types::AiTool {
                    name: "bash".to_string(),
                    description: "run a shell command".to_string(),
                    input_schema: serde_json::json!({}),
                },
            ],
            system_prompt: None,
            max_tokens: 1024,
            temperature: 0.0,
            thinking_enabled: false,
            thinking_budget_override: None,
        };
        let body = adapter.build_body(&request, false);
        let tools = body["tools"].as_array().unwrap();
        assert!(tools[0].get("cache_control").is_none());
        assert_eq!(tools[1]["cache_control"]["type"].as_str(), Some("ephemeral"));
    }

    #[test]
    fn sanitize_fills_missing_tool_result() {
        let mut messages = vec![serde_json::json!({
            "role": "assistant",
            "content": [{"type": "tool_use", "id": "t1", "name": "bash", "input": {}}]
        })];
        sanitize_tool_results(&mut messages);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1]["content"][0]["tool_use_id"].as_str(), Some("t1"));
        assert_eq!(messages[1]["content"][0]["is_error"].as_bool(), Some(true));
    }

    #[test]
    fn sse_frame_parses_text_delta() {
        let mut kinds = vec![BlockKind::Text];
        let frame = "event: content_block_delta\ndata: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"hi\"}}\n\n";
        let event = parse_sse_frame(frame, &mut kinds).unwrap();
        match event {
            ProviderEvent::ContentDelta { index, text } => {
                assert_eq!(index, 0);
                assert_eq!(text, "hi");
            }
            _ => panic!("expected ContentDelta"),
        }
    }

    #[test]
    fn sse_frame_tracks_tool_use_block_kind() {
        let mut kinds = Vec::new();
        let start = "data: {\"type\":\"content_block_start\",\"index\":0,\"content_block\":{\"type\":\"tool_use\",\"id\":\"t1\",\"name\":\"bash\"}}\n\n";
        let event = parse_sse_frame(start, &mut kinds).unwrap();
        assert!(matches!(event, ProviderEvent::ToolUseStart { .. }));

        let stop = "data: {\"type\":\"content_block_stop\",\"index\":0}\n\n";
        let event = parse_sse_frame(stop, &mut kinds).unwrap();
        assert!(matches!(event, ProviderEvent::ToolUseStop { .. }));
    }

    #[test]
    fn message_delta_yields_complete_with_usage() {
        let mut kinds = Vec::new();
        let frame = "data: {\"type\":\"message_delta\",\"delta\":{\"stop_reason\":\"end_turn\"},\"usage\":{\"input_tokens\":10,\"output_tokens\":5}}\n\n";
        let event = parse_sse_frame(frame, &mut kinds).unwrap();
        match event {
            ProviderEvent::Complete { usage, finish_reason } => {
                assert_eq!(usage.total_tokens, 15);
                assert_eq!(finish_reason, FinishReason::Stop);
            }
            _ => panic!("expected Complete"),
        }
    }
}
