//! Gemini `generateContent`/`streamGenerateContent` adapter.
//!
//! The teacher's retrieval pack had no Gemini-format counterpart at all;
//! this follows the same request-building/SSE-pump shape as
//! [`super::anthropic`] and [`super::openai`] (the two leaf adapters the
//! teacher did ground), adapted to Gemini's `contents`/`parts`/
//! `functionCall` wire shapes.

use std::time::Duration;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;

use super::{AdapterRequest, EventStream, ProviderAdapter, ProviderError, ProviderEvent, ProviderResponse};
use crate::ai::providers::ModelDescriptor;
use crate::ai::types::{Content, FinishReason, Role, Usage};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Whether the credential is a Gemini API key (`?key=` query param) or a
/// GCP OAuth2 bearer token (Vertex AI's auth scheme).
#[derive(Clone, Copy, PartialEq, Eq)]
enum AuthMode {
    ApiKey,
    Bearer,
}

pub struct GeminiAdapter {
    client: reqwest::Client,
    base_url: String,
    credential: String,
    auth_mode: AuthMode,
    model: ModelDescriptor,
}

impl GeminiAdapter {
    pub fn new(api_key: String, base_url: Option<String>, model: ModelDescriptor) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            credential: api_key,
            auth_mode: AuthMode::ApiKey,
            model,
        }
    }

    /// Build an adapter that authenticates with a bearer token instead of
    /// an API-key query parameter (Vertex AI).
    pub fn with_bearer_auth(bearer_token: String, base_url: String, model: ModelDescriptor) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
            credential: bearer_token,
            auth_mode: AuthMode::Bearer,
            model,
        }
    }

    fn build_body(&self, request: &AdapterRequest) -> Value {
        let contents = convert_messages(&request.messages);
        let mut body = serde_json::json!({
            "contents": contents,
            "generationConfig": {
                "maxOutputTokens": request.max_tokens,
                "temperature": request.temperature,
            },
        });
        if let Some(system) = &request.system_prompt {
            body["systemInstruction"] = serde_json::json!({ "parts": [{ "text": system }] });
        }
        if !request.tools.is_empty() {
            body["tools"] = serde_json::json!([{
                "functionDeclarations": request.tools.iter().map(|t| serde_json::json!({
                    "name": t.name,
                    "description": t.description,
                    "parameters": t.input_schema,
                })).collect::<Vec<_>>(),
            }]);
        }
        if request.thinking_enabled {
            body["generationConfig"]["thinkingConfig"] = serde_json::json!({
                "includeThoughts": true,
                "thinkingBudget": crate::ai::reasoning::ReasoningConfig::budget_for(
                    request.max_tokens,
                    request.thinking_budget_override,
                ),
            });
        }
        body
    }

    fn url(&self, streaming: bool) -> String {
        let method = if streaming { "streamGenerateContent" } else { "generateContent" };
        match self.auth_mode {
            AuthMode::ApiKey => {
                let alt = if streaming { "&alt=sse" } else { "" };
                format!(
                    "{}/v1beta/models/{}:{}?key={}{}",
                    self.base_url.trim_end_matches('/'),
                    self.model.id,
                    method,
                    self.credential,
                    alt,
                )
            }
            AuthMode::Bearer => {
                let alt = if streaming { "?alt=sse" } else { "" };
                format!(
                    "{}/models/{}:{}{}",
                    self.base_url.trim_end_matches('/'),
                    self.model.id,
                    method,
                    alt,
                )
            }
        }
    }

    fn apply_auth(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.auth_mode {
            AuthMode::ApiKey => builder,
            AuthMode::Bearer => builder.bearer_auth(&self.credential),
        }
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
        401 | 403 => ProviderError::Unauthorized(body),
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
impl ProviderAdapter for GeminiAdapter {
    fn model(&self) -> &ModelDescriptor {
        &self.model
    }

    async fn send(&self, request: &AdapterRequest) -> Result<ProviderResponse, ProviderError> {
        let response = self
            .apply_auth(self.client.post(self.url(false)))
            .json(&self.build_body(request))
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
            .apply_auth(self.client.post(self.url(true)))
            .json(&self.build_body(request))
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
        let mut text_started = false;
        let mut usage = Usage::default();
        let mut finish_reason = FinishReason::Stop;

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
                let json: Value = match serde_json::from_str(data) {
                    Ok(v) => v,
                    Err(e) => {
                        let _ = tx.send(ProviderEvent::Warning { message: format!("skipped malformed SSE line: {e}") });
                        continue;
                    }
                };

                if let Some(u) = json["usageMetadata"].as_object() {
                    usage = Usage {
                        prompt_tokens: u.get("promptTokenCount").and_then(|v| v.as_u64()).unwrap_or(0) as usize,
                        completion_tokens: u.get("candidatesTokenCount").and_then(|v| v.as_u64()).unwrap_or(0) as usize,
                        total_tokens: u.get("totalTokenCount").and_then(|v| v.as_u64()).unwrap_or(0) as usize,
                        cache_creation_input_tokens: 0,
                        cache_read_input_tokens: u.get("cachedContentTokenCount").and_then(|v| v.as_u64()).unwrap_or(0) as usize,
                    };
                }

                let Some(candidate) = json["candidates"].get(0) else { continue };
                if let Some(parts) = candidate["content"]["parts"].as_array() {
                    for (index, part) in parts.iter().enumerate() {
                        if let Some(text) = part["text"].as_str() {
                            if !text_started {
                                text_started = true;
                                let _ = tx.send(ProviderEvent::ContentStart { index: 0 });
                            }
                            if part["thought"].as_bool().unwrap_or(false) {
                                let _ = tx.send(ProviderEvent::ThinkingDelta { index: 0, text: text.to_string() });
                            } else {
                                let _ = tx.send(ProviderEvent::ContentDelta { index: 0, text: text.to_string() });
                            }
                        }
                        if let Some(call) = part.get("functionCall") {
                            let name = call["name"].as_str().unwrap_or_default().to_string();
                            let id = format!("call_{index}");
                            let _ = tx.send(ProviderEvent::ToolUseStart { index, id: id.clone(), name });
                            let _ = tx.send(ProviderEvent::ToolUseDelta {
                                index,
                                partial_json: call["args"].to_string(),
                            });
                            let _ = tx.send(ProviderEvent::ToolUseStop { index });
                        }
                    }
                }

                if let Some(reason) = candidate["finishReason"].as_str() {
                    finish_reason = map_finish_reason(reason);
                }
            }
        }

        if text_started {
            let _ = tx.send(ProviderEvent::ContentStop { index: 0 });
        }
        let _ = tx.send(ProviderEvent::Complete { usage, finish_reason });
    });
}

fn map_finish_reason(reason: &str) -> FinishReason {
    match reason {
        "STOP" => FinishReason::Stop,
        "MAX_TOKENS" => FinishReason::Length,
        "SAFETY" | "RECITATION" => FinishReason::ContentFilter,
        other => FinishReason::Other(other.to_string()),
    }
}

fn parse_non_streaming_response(body: &Value) -> Result<ProviderResponse, ProviderError> {
    let candidate = body["candidates"]
        .get(0)
        .ok_or_else(|| ProviderError::Malformed("missing candidates[0]".to_string()))?;

    let mut content = Vec::new();
    if let Some(parts) = candidate["content"]["parts"].as_array() {
        for (index, part) in parts.iter().enumerate() {
            if let Some(text) = part["text"].as_str() {
                if part["thought"].as_bool().unwrap_or(false) {
                    content.push(Content::Thinking { thinking: text.to_string(), signature: String::new() });
                } else {
                    content.push(Content::Text { text: text.to_string() });
                }
            }
            if let Some(call) = part.get("functionCall") {
                content.push(Content::ToolUse {
                    id: format!("call_{index}"),
                    name: call["name"].as_str().unwrap_or_default().to_string(),
                    input: call["args"].clone(),
                });
            }
        }
    }

    let finish_reason = map_finish_reason(candidate["finishReason"].as_str().unwrap_or("STOP"));
    let u = &body["usageMetadata"];
    let usage = Usage {
        prompt_tokens: u["promptTokenCount"].as_u64().unwrap_or(0) as usize,
        completion_tokens: u["candidatesTokenCount"].as_u64().unwrap_or(0) as usize,
        total_tokens: u["totalTokenCount"].as_u64().unwrap_or(0) as usize,
        cache_creation_input_tokens: 0,
        cache_read_input_tokens: u["cachedContentTokenCount"].as_u64().unwrap_or(0) as usize,
    };

    Ok(ProviderResponse { content, usage, finish_reason })
}

fn convert_messages(messages: &[crate::ai::types::ModelMessage]) -> Vec<Value> {
    let mut result = Vec::new();
    for msg in messages.iter().filter(|m| m.role != Role::System) {
        let role = match msg.role {
            Role::User | Role::Tool => "user",
            Role::Assistant => "model",
            Role::System => unreachable!(),
        };
        let mut parts = Vec::new();
        for block in &msg.content {
            match block {
                Content::Text { text } => parts.push(serde_json::json!({ "text": text })),
                Content::Thinking { thinking, .. } => parts.push(serde_json::json!({ "text": thinking, "thought": true })),
                Content::ToolUse { name, input, .. } => parts.push(serde_json::json!({
                    "functionCall": { "name": name, "args": input }
                })),
                Content::ToolResult { output, .. } => parts.push(serde_json::json!({
                    "functionResponse": { "name": "tool", "response": { "result": output } }
                })),
                Content::Image { image, .. } => {
                    if let Some(data) = &image.base64 {
                        parts.push(serde_json::json!({
                            "inlineData": {
                                "mimeType": image.media_type.clone().unwrap_or_else(|| "image/png".to_string()),
                                "data": data,
                            }
                        }));
                    }
                }
                _ => {}
            }
        }
        result.push(serde_json::json!({ "role": role, "parts": parts }));
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assistant_role_maps_to_model() {
        let messages = vec![crate::ai::types::ModelMessage {
            role: Role::Assistant,
            content: vec![Content::Text { text: "hi".to_string() }],
        }];
        let converted = convert_messages(&messages);
        assert_eq!(converted[0]["role"].as_str(), Some("model"));
    }

    #[test]
    fn finish_reason_maps_safety() {
        assert_eq!(map_finish_reason("SAFETY"), FinishReason::ContentFilter);
    }
}
