//! Canonical event protocol for the agentic loop (spec §4.7's `RunEvent`).
//!
//! `RunEvent` is the single source of truth for everything one `Run` call
//! emits on its channel. It is deliberately narrower than the coarse
//! `event_bus::Event` stream: the bus carries session/message/permission
//! state changes any subscriber can watch, while `RunEvent` is the
//! fine-grained per-token/per-tool-call feed a single caller of `Run`
//! consumes to drive its own UI. Transport layers (TUI, HTTP/SSE server)
//! consume these events and map them to their own presentation format.
//!
//! `LoopInput` represents external inputs the platform provides back to a
//! running orchestrator (tool approvals, cancellation) outside of the
//! permission broker's own channel.

use serde::Serialize;

/// Events emitted by the agentic orchestrator for one `Run` invocation.
///
/// Each variant represents a discrete state change in the agentic loop.
/// Consumers (TUI, server) map these to their own presentation format.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    // ── Streaming ──────────────────────────────────────────────────────
    /// Text content delta from the provider response.
    TextDelta { delta: String },

    /// Extended thinking delta.
    ThinkingDelta { thinking: String },

    /// Extended thinking block completed.
    ThinkingComplete { thinking: String, signature: String },

    // ── Tool lifecycle ─────────────────────────────────────────────────
    /// The provider is starting to stream a tool call (arguments not yet
    /// complete).
    ToolCallStart { id: String, name: String },

    /// Tool call arguments fully received from the provider.
    ToolCallComplete {
        id: String,
        name: String,
        arguments: serde_json::Value,
    },

    /// Tool is being executed.
    ToolExecuting { id: String, name: String },

    /// Streaming output delta from a running tool (e.g. bash output).
    ToolOutputDelta { id: String, delta: String },

    /// Tool execution completed with result.
    ToolResult {
        id: String,
        output: String,
        is_error: bool,
    },

    // ── Turn lifecycle ─────────────────────────────────────────────────
    /// An agentic turn completed.
    TurnComplete { turn: usize, has_more: bool },

    /// Token usage for this turn.
    Usage {
        prompt_tokens: u64,
        completion_tokens: u64,
    },

    /// Session title generated by the one-shot title sub-agent.
    TitleGenerated { title: String },

    /// The session's history was auto-summarized into a new child session
    /// before this turn was sent (spec §4.7's auto-summarize trigger).
    Summarized { child_session_id: String },

    /// Agentic loop finished.
    Finished { session_id: String },

    /// Error occurred.
    Error { error: String },
}

/// External inputs the platform provides back to the orchestrator outside
/// of the permission broker's own grant/deny calls.
#[derive(Debug, Clone)]
pub enum LoopInput {
    /// User requested cancellation of the run.
    Cancel,
}
