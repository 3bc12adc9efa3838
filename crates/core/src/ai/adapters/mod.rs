//! Provider adapters (spec §4.5): one implementation per [`ProviderKind`]
//! family, each hiding a vendor's wire format behind the same `Send`/
//! `Stream` surface. `Bedrock`/`VertexAi` are thin routers that reshape a
//! request and delegate to the `Anthropic`/`Gemini` adapters.

pub mod anthropic;
pub mod bedrock;
pub mod gemini;
pub mod openai;
pub mod vertex;

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::Stream;
use thiserror::Error;

use crate::ai::providers::ModelDescriptor;
use crate::ai::retry::IsRetryable;
use crate::ai::types::{AiTool, Content, FinishReason, ModelMessage, Usage};

/// Everything an adapter needs to build one request. Built by
/// `agent::translate` from the persisted `store::Message` history, never
/// constructed by the orchestrator directly.
#[derive(Debug, Clone)]
pub struct AdapterRequest {
    pub messages: Vec<ModelMessage>,
    pub tools: Vec<AiTool>,
    pub system_prompt: Option<String>,
    pub max_tokens: u32,
    pub temperature: f32,
    pub thinking_enabled: bool,
    pub thinking_budget_override: Option<u32>,
}

/// A completed, non-streaming response.
#[derive(Debug, Clone)]
pub struct ProviderResponse {
    pub content: Vec<Content>,
    pub usage: Usage,
    pub finish_reason: FinishReason,
}

/// Incremental events emitted while streaming a response (spec §4.5's exact
/// variant list). `index` is the content-block index within the response,
/// matching how providers multiplex concurrent tool-use/text/thinking
/// blocks onto one stream.
#[derive(Debug, Clone)]
pub enum ProviderEvent {
    ContentStart { index: usize },
    ContentDelta { index: usize, text: String },
    ContentStop { index: usize },
    ThinkingDelta { index: usize, text: String },
    SignatureDelta { index: usize, signature: String },
    ToolUseStart { index: usize, id: String, name: String },
    ToolUseDelta { index: usize, partial_json: String },
    ToolUseStop { index: usize },
    Complete { usage: Usage, finish_reason: FinishReason },
    Error { message: String },
    /// A non-fatal condition worth surfacing (e.g. a malformed SSE line that
    /// was skipped) without ending the stream.
    Warning { message: String },
}

pub type EventStream = Pin<Box<dyn Stream<Item = ProviderEvent> + Send>>;

/// Errors a provider adapter can raise, classified for
/// [`crate::ai::retry::with_retry`].
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("unauthorized (401): {0}")]
    Unauthorized(String),

    #[error("rate limited: {0}")]
    RateLimited {
        message: String,
        retry_after: Option<Duration>,
    },

    #[error("provider overloaded: {0}")]
    Overloaded(String),

    #[error("server error ({status}): {message}")]
    Server { status: u16, message: String },

    #[error("input length and max_tokens exceed context limit: {input_tokens} + {max_tokens} > {context_limit}")]
    ContextLimitExceeded {
        input_tokens: u64,
        max_tokens: u64,
        context_limit: u64,
    },

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("cancelled")]
    Cancelled,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("provider returned malformed response: {0}")]
    Malformed(String),

    #[error("retry limit of {attempts} attempts exceeded: {source}")]
    RetryLimitExceeded {
        attempts: u32,
        source: Box<ProviderError>,
    },
}

impl IsRetryable for ProviderError {
    fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProviderError::RateLimited { .. }
                | ProviderError::Overloaded(_)
                | ProviderError::Server { .. }
                | ProviderError::Transport(_)
        )
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            ProviderError::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    fn is_reauth(&self) -> bool {
        matches!(self, ProviderError::Unauthorized(_))
    }

    fn context_limit_resize(&self) -> Option<(u64, u64, u64)> {
        match self {
            ProviderError::ContextLimitExceeded {
                input_tokens,
                max_tokens,
                context_limit,
            } => Some((*input_tokens, *max_tokens, *context_limit)),
            _ => None,
        }
    }

    fn is_cancelled(&self) -> bool {
        matches!(self, ProviderError::Cancelled)
    }

    fn with_retry_limit_message(self, attempts: u32) -> Self {
        ProviderError::RetryLimitExceeded {
            attempts,
            source: Box::new(self),
        }
    }
}

/// Parse spec §4.5's context-limit error message back into its three
/// components, the inverse of `ProviderError::ContextLimitExceeded`'s
/// `Display`. Providers don't actually send this exact sentence back to us
/// — each adapter's own error body parsing constructs the variant directly
/// — but every adapter's parser is tested against this exact wording so the
/// regex stays in one place.
pub fn parse_context_limit_message(message: &str) -> Option<(u64, u64, u64)> {
    let re = regex::Regex::new(
        r"input length and max_tokens exceed context limit:\s*(\d+)\s*\+\s*(\d+)\s*>\s*(\d+)",
    )
    .ok()?;
    let caps = re.captures(message)?;
    Some((
        caps.get(1)?.as_str().parse().ok()?,
        caps.get(2)?.as_str().parse().ok()?,
        caps.get(3)?.as_str().parse().ok()?,
    ))
}

/// A provider adapter: hides one vendor's wire format (or cloud routing
/// envelope) behind a uniform request/response and request/event-stream
/// surface.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn model(&self) -> &ModelDescriptor;

    async fn send(&self, request: &AdapterRequest) -> Result<ProviderResponse, ProviderError>;

    async fn stream(&self, request: &AdapterRequest) -> Result<EventStream, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_limit_message_parses_back() {
        let msg = "input length and max_tokens exceed context limit: 190000 + 16000 > 200000";
        let (input, max_tokens, limit) = parse_context_limit_message(msg).unwrap();
        assert_eq!((input, max_tokens, limit), (190_000, 16_000, 200_000));
    }

    #[test]
    fn unrelated_message_does_not_match() {
        assert!(parse_context_limit_message("rate limited, try again").is_none());
    }
}
