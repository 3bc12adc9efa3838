//! Consumes one provider response stream and turns it into persisted
//! `store::Part`s plus the `RunEvent`s a caller of `Run` watches live.
//!
//! Grounded in the teacher's `agent/stream.rs` accumulator shape (an
//! idle-timeout read loop over streamed deltas, tool calls collected as they
//! complete) rebuilt against `ai::adapters::{EventStream, ProviderEvent}`
//! instead of the teacher's own `StreamPart`/`AiClient`, since this crate's
//! provider layer speaks the narrower, spec-defined event vocabulary (no
//! citation/server-tool/web-search variants — those belong to a different
//! product surface, not this one).

use std::collections::HashMap;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

use crate::ai::adapters::{EventStream, ProviderEvent};
use crate::ai::types::{AiToolCall, FinishReason, Usage};
use crate::agent::loop_events::RunEvent;
use crate::error::StoreError;
use crate::store::{MessageStore, Part};

/// A response stream that sits idle this long without producing an event is
/// treated as dead.
const STREAM_IDLE_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug)]
pub enum TurnError {
    /// The provider sent a terminal `Error` event.
    Provider(String),
    /// No event arrived within [`STREAM_IDLE_TIMEOUT`].
    Timeout,
    /// The run's cancellation token was tripped mid-stream.
    Cancelled,
    Store(StoreError),
}

impl std::fmt::Display for TurnError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TurnError::Provider(msg) => write!(f, "provider error: {msg}"),
            TurnError::Timeout => write!(f, "stream idle timeout"),
            TurnError::Cancelled => write!(f, "cancelled"),
            TurnError::Store(e) => write!(f, "store error: {e}"),
        }
    }
}

impl std::error::Error for TurnError {}

impl From<StoreError> for TurnError {
    fn from(e: StoreError) -> Self {
        TurnError::Store(e)
    }
}

/// What a completed turn produced, beyond what was already persisted
/// part-by-part as the stream arrived.
#[derive(Debug)]
pub struct TurnOutcome {
    pub usage: Usage,
    pub finish_reason: FinishReason,
    pub tool_calls: Vec<AiToolCall>,
}

impl Default for TurnOutcome {
    fn default() -> Self {
        Self {
            usage: Usage::default(),
            finish_reason: FinishReason::Stop,
            tool_calls: Vec::new(),
        }
    }
}

#[derive(Default)]
struct ToolBuffer {
    id: String,
    name: String,
    json: String,
}

/// Drive `stream` to completion, persisting each finished content block as
/// a `Part` on `message_id` and forwarding a `RunEvent` per increment.
pub async fn run_turn(
    mut stream: EventStream,
    message_store: &dyn MessageStore,
    message_id: &str,
    event_tx: &UnboundedSender<RunEvent>,
    cancel: &CancellationToken,
) -> Result<TurnOutcome, TurnError> {
    let mut text_blocks: HashMap<usize, String> = HashMap::new();
    let mut thinking_blocks: HashMap<usize, (String, String)> = HashMap::new();
    let mut tool_blocks: HashMap<usize, ToolBuffer> = HashMap::new();
    let mut outcome = TurnOutcome::default();

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TurnError::Cancelled),
            next = tokio::time::timeout(STREAM_IDLE_TIMEOUT, stream.next()) => next,
        };

        let event = match next {
            Ok(Some(event)) => event,
            Ok(None) => break,
            Err(_) => return Err(TurnError::Timeout),
        };

        match event {
            ProviderEvent::ContentStart { .. } => {}
            ProviderEvent::ContentDelta { index, text } => {
                text_blocks.entry(index).or_default().push_str(&text);
                let _ = event_tx.send(RunEvent::TextDelta { delta: text });
            }
            ProviderEvent::ContentStop { index } => {
                if let Some((text, signature)) = thinking_blocks.remove(&index) {
                    let _ = event_tx.send(RunEvent::ThinkingComplete {
                        thinking: text.clone(),
                        signature: signature.clone(),
                    });
                    message_store
                        .append_part(
                            message_id,
                            Part::Reasoning {
                                text,
                                signature: (!signature.is_empty()).then_some(signature),
                            },
                        )
                        .await?;
                } else if let Some(text) = text_blocks.remove(&index) {
                    message_store
                        .append_part(message_id, Part::Text { text })
                        .await?;
                }
            }
            ProviderEvent::ThinkingDelta { index, text } => {
                thinking_blocks.entry(index).or_default().0.push_str(&text);
                let _ = event_tx.send(RunEvent::ThinkingDelta { thinking: text });
            }
            ProviderEvent::SignatureDelta { index, signature } => {
                thinking_blocks
                    .entry(index)
                    .or_default()
                    .1
                    .push_str(&signature);
            }
            ProviderEvent::ToolUseStart { index, id, name } => {
                let _ = event_tx.send(RunEvent::ToolCallStart {
                    id: id.clone(),
                    name: name.clone(),
                });
                tool_blocks.insert(
                    index,
                    ToolBuffer {
                        id,
                        name,
                        json: String::new(),
                    },
                );
            }
            ProviderEvent::ToolUseDelta { index, partial_json } => {
                if let Some(buf) = tool_blocks.get_mut(&index) {
                    buf.json.push_str(&partial_json);
                }
            }
            ProviderEvent::ToolUseStop { index } => {
                if let Some(buf) = tool_blocks.remove(&index) {
                    let input = if buf.json.trim().is_empty() {
                        serde_json::json!({})
                    } else {
                        serde_json::from_str(&buf.json).unwrap_or_else(|_| serde_json::json!({}))
                    };
                    message_store
                        .append_part(
                            message_id,
                            Part::ToolCall {
                                id: buf.id.clone(),
                                name: buf.name.clone(),
                                input: input.clone(),
                                finished: true,
                            },
                        )
                        .await?;
                    let _ = event_tx.send(RunEvent::ToolCallComplete {
                        id: buf.id.clone(),
                        name: buf.name.clone(),
                        arguments: input.clone(),
                    });
                    outcome.tool_calls.push(AiToolCall {
                        id: buf.id,
                        name: buf.name,
                        arguments: input,
                    });
                }
            }
            ProviderEvent::Complete { usage, finish_reason } => {
                outcome.usage = usage;
                outcome.finish_reason = finish_reason;
                break;
            }
            ProviderEvent::Error { message } => return Err(TurnError::Provider(message)),
            ProviderEvent::Warning { message } => {
                tracing::warn!(message, "provider stream warning");
            }
        }
    }

    // A malformed stream that ends without a matching content_block_stop
    // still gets its partial content persisted rather than silently dropped.
    for (_, text) in text_blocks {
        message_store
            .append_part(message_id, Part::Text { text })
            .await?;
    }
    for (_, (text, signature)) in thinking_blocks {
        message_store
            .append_part(
                message_id,
                Part::Reasoning {
                    text,
                    signature: (!signature.is_empty()).then_some(signature),
                },
            )
            .await?;
    }

    Ok(outcome)
}
