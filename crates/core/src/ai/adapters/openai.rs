//! OpenAI-compatible chat/completions adapter, used for `OpenAiCompatible`
//! and `Azure` [`ProviderKind`]s.
//!
//! Message/tool conversion follows the teacher's
//! `ai/format/openai.rs::convert_messages` shape (string-or-array content,
//! `tool_calls`/`tool_call_id` pairing) trimmed to the single chat/completions
//! flavor — the Responses-API branch and Kimi-specific alternation filler
//! don't apply to spec §4.5's adapter contract.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;

use super::{AdapterRequest, EventStream, ProviderAdapter, ProviderError, ProviderEvent, ProviderResponse};
use crate::ai::providers::ModelDescriptor;
use crate::ai::types::{Content, FinishReason, Role, Usage};

const DEFAULT_BASE_URL: &str = "https://api.openai.com";

pub struct OpenAiAdapter {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: ModelDescriptor,
    extra_headers: Vec<(String, String)>,
}

impl OpenAiAdapter {
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
        let mut messages = Vec::new();
        if let Some(system) = &request.system_prompt {
            messages.push(serde_json::json!({ "role": "system", "content": system }));
        }
        messages.extend(convert_messages(&request.messages));

        let mut body = serde_json::json!({
            "model": self.model.id,
            "messages": messages,
            "max_completion_tokens": request.max_tokens,
            "temperature": request.temperature,
        });
        if streaming {
            body["stream"] = serde_json::json!(true);
            body["stream_options"] = serde_json::json!({ "include_usage": true });
        }
        if !request.tools.is_empty() {
            body["tools"] = serde_json::json!(request
                .tools
                .iter()
                .map(|t| serde_json::json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.input_schema,
                    }
                }))
                .collect::<Vec<_>>());
        }
        body
    }

    fn request_builder(&self, streaming: bool, request: &AdapterRequest) -> reqwest::RequestBuilder {
        let url = format!("{}/v1/chat/completions", self.base_url.trim_end_matches('/'));
        let mut builder = self
            .client
            .post(url)
            .bearer_auth(&self.api_key)
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
    let body = response.text().await.unwrap_or_else(|_| "<unreadable body>".to_string());
    match status {
        401 => ProviderError::Unauthorized(body),
        429 => ProviderError::RateLimited { message: body, retry_after },
        400 => {
            if let Some((input, max, limit)) = super::parse_context_limit_message(&body) {
                ProviderError::ContextLimitExceeded { input_tokens: input, max_tokens: max, context_limit: limit }
            } else {
                ProviderError::BadRequest(body)
            }
        }
        500..=599 => ProviderError::Server { status, message: body },
        _ => ProviderError::Server { status, message: body },
    }
}

#[async_trait]
impl ProviderAdapter for OpenAiAdapter {
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
        let body: Value = response.json().await.map_err(|e| ProviderError::Malformed(e.to_string()))?;
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

/// Per-index accumulation state for an in-progress tool call, since OpenAI
/// streams tool-call arguments as incremental string fragments keyed by
/// array index rather than by a stable id on every delta.
#[derive(Default)]
struct ToolCallAccum {
    id: String,
    name: String,
    started: bool,
}

fn spawn_sse_pump<S>(stream: S, tx: mpsc::UnboundedSender<ProviderEvent>)
where
    S: Stream<Item = reqwest::Result<bytes::Bytes>> + Send + 'static,
{
    tokio::spawn(async move {
        tokio::pin!(stream);
        let mut buffer = String::new();
        let mut text_started = false;
        let mut tool_calls: HashMap<usize, ToolCallAccum> = HashMap::new();
        let mut usage = Usage::default();

        while let Some(chunk) = stream.next().await {
            let bytes = match chunk {
                Ok(b) => b,
                Err(e) => {
                    let _ = tx.send(ProviderEvent::Error { message: format!("stream read error: {e}") });
                    return;
                }
            };
            buffer.push_str(&String::from_utf8_lossy(&bytes));

            while let Some(pos) = buffer.find('\n') {
                let line: String = buffer.drain(..pos + 1).collect();
                let line = line.trim();
                let Some(data) = line.strip_prefix("data:") else { continue };
                let data = data.trim();
                if data.is_empty() {
                    continue;
                }
                if data == "[DONE]" {
                    if text_started {
                        let _ = tx.send(ProviderEvent::ContentStop { index: 0 });
                    }
                    for (index, accum) in &tool_calls {
                        if accum.started {
                            let _ = tx.send(ProviderEvent::ToolUseStop { index: *index });
                        }
                    }
                    let _ = tx.send(ProviderEvent::Complete {
                        usage,
                        finish_reason: FinishReason::Stop,
                    });
                    return;
                }

                let json: Value = match serde_json::from_str(data) {
                    Ok(v) => v,
                    Err(e) => {
                        let _ = tx.send(ProviderEvent::Warning { message: format!("skipped malformed SSE line: {e}") });
                        continue;
                    }
                };

                if let Some(u) = json["usage"].as_object() {
                    usage = Usage {
                        prompt_tokens: u.get("prompt_tokens").and_then(|v| v.as_u64()).unwrap_or(0) as usize,
                        completion_tokens: u.get("completion_tokens").and_then(|v| v.as_u64()).unwrap_or(0) as usize,
                        total_tokens: u.get("total_tokens").and_then(|v| v.as_u64()).unwrap_or(0) as usize,
                        cache_creation_input_tokens: 0,
                        cache_read_input_tokens: 0,
                    };
                }

                let Some(choice) = json["choices"].get(0) else { continue };
                let delta = &choice["delta"];

                if let Some(text) = delta["content"].as_str() {
                    if !text_started {
                        text_started = true;
                        let _ = tx.send(ProviderEvent::ContentStart { index: 0 });
                    }
                    let _ = tx.send(ProviderEvent::ContentDelta { index: 0, text: text.to_string() });
                }

                if let Some(calls) = delta["tool_calls"].as_array() {
                    for call in calls {
                        let index = call["index"].as_u64().unwrap_or(0) as usize;
                        let entry = tool_calls.entry(index).or_default();
                        if !entry.started {
                            entry.started = true;
                            entry.id = call["id"].as_str().unwrap_or_default().to_string();
                            entry.name = call["function"]["name"].as_str().unwrap_or_default().to_string();
                            let _ = tx.send(ProviderEvent::ToolUseStart {
                                index,
                                id: entry.id.clone(),
                                name: entry.name.clone(),
                            });
                        }
                        if let Some(args) = call["function"]["arguments"].as_str() {
                            let _ = tx.send(ProviderEvent::ToolUseDelta {
                                index,
                                partial_json: args.to_string(),
                            });
                        }
                    }
                }

                if let Some(reason) = choice["finish_reason"].as_str() {
                    if text_started {
                        let _ = tx.send(ProviderEvent::ContentStop { index: 0 });
                    }
                    for (i, accum) in &tool_calls {
                        if accum.started {
                            let _ = tx.send(ProviderEvent::ToolUseStop { index: *i });
                        }
                    }
                    let _ = tx.send(ProviderEvent::Complete {
                        usage,
                        finish_reason: map_finish_reason(reason),
                    });
                    return;
                }
            }
        }
    });
}

fn map_finish_reason(reason: &str) -> FinishReason {
    match reason {
        "stop" => FinishReason::Stop,
        "length" => FinishReason::Length,
        "tool_calls" => FinishReason::ToolCalls,
        "content_filter" => FinishReason::ContentFilter,
        other => FinishReason::Other(other.to_string()),
    }
}

fn parse_non_streaming_response(body: &Value) -> Result<ProviderResponse, ProviderError> {
    let choice = body["choices"]
        .get(0)
        .ok_or_else(|| ProviderError::Malformed("missing choices[0]".to_string()))?;
    let message = &choice["message"];

    let mut content = Vec::new();
    if let Some(text) = message["content"].as_str() {
        if !text.is_empty() {
            content.push(Content::Text { text: text.to_string() });
        }
    }
    if let Some(calls) = message["tool_calls"].as_array() {
        for call in calls {
            let args: Value = call["function"]["arguments"]
                .as_str()
                .and_then(|s| serde_json::from_str(s).ok())
                .unwrap_or(Value::Null);
            content.push(Content::ToolUse {
                id: call["id"].as_str().unwrap_or_default().to_string(),
                name: call["function"]["name"].as_str().unwrap_or_default().to_string(),
                input: args,
            });
        }
    }

    let finish_reason = map_finish_reason(choice["finish_reason"].as_str().unwrap_or("stop"));
    let u = &body["usage"];
    let usage = Usage {
        prompt_tokens: u["prompt_tokens"].as_u64().unwrap_or(0) as usize,
        completion_tokens: u["completion_tokens"].as_u64().unwrap_or(0) as usize,
        total_tokens: u["total_tokens"].as_u64().unwrap_or(0) as usize,
        cache_creation_input_tokens: 0,
        cache_read_input_tokens: 0,
    };

    Ok(ProviderResponse { content, usage, finish_reason })
}

fn convert_messages(messages: &[crate::ai::types::ModelMessage]) -> Vec<Value> {
    let mut result = Vec::new();
    for msg in messages.iter().filter(|m| m.role != Role::System) {
        let mut tool_results = Vec::new();
        let mut tool_calls = Vec::new();
        let mut text_parts = Vec::new();

        for block in &msg.content {
            match block {
                Content::Text { text } => text_parts.push(text.clone()),
                Content::ToolUse { id, name, input } => tool_calls.push(serde_json::json!({
                    "id": id,
                    "type": "function",
                    "function": { "name": name, "arguments": input.to_string() },
                })),
                Content::ToolResult { tool_use_id, output, .. } => tool_results.push((tool_use_id.clone(), output.clone())),
                Content::Thinking { thinking, .. } => text_parts.push(format!("[Thinking]\n{thinking}\n[/Thinking]")),
                _ => {}
            }
        }

        if !tool_results.is_empty() {
            for (id, output) in tool_results {
                let content = match output {
                    Value::String(s) => s,
                    other => other.to_string(),
                };
                result.push(serde_json::json!({ "role": "tool", "tool_call_id": id, "content": content }));
            }
            continue;
        }

        let role = match msg.role {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
            Role::System => unreachable!(),
        };

        let mut entry = serde_json::json!({ "role": role, "content": text_parts.join("\n") });
        if !tool_calls.is_empty() {
            entry["tool_calls"] = serde_json::json!(tool_calls);
        }
        result.push(entry);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::types::ModelMessage;

    #[test]
    fn tool_result_becomes_tool_role_message() {
        let messages = vec![ModelMessage {
            role: Role::Tool,
            content: vec![Content::ToolResult {
                tool_use_id: "t1".to_string(),
                output: Value::String("ok".to_string()),
                is_error: Some(false),
            }],
        }];
        let converted = convert_messages(&messages);
        assert_eq!(converted[0]["role"].as_str(), Some("tool"));
        assert_eq!(converted[0]["tool_call_id"].as_str(), Some("t1"));
    }

    #[test]
    fn finish_reason_maps_tool_calls() {
        assert_eq!(map_finish_reason("tool_calls"), FinishReason::ToolCalls);
    }
}
