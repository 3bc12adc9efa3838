//! Provider-wire types for AI SDK communication.
//!
//! These are NOT domain types — `store::{Message, Part}` is the persisted
//! domain model (spec §3); everything here is the shape a provider adapter
//! actually sends/receives on the wire. `agent::translate` maps between the
//! two; nothing else should construct a [`ModelMessage`] directly.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ai::reasoning::DEFAULT_THINKING_BUDGET;

/// A tool definition as advertised to a provider (JSON schema parameters).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiTool {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// A tool call as emitted by a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// Message role in a conversation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// Content block types a provider message can carry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Content {
    #[serde(rename = "text")]
    Text { text: String },

    #[serde(rename = "image")]
    Image {
        image: ImageContent,
        #[serde(skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },

    /// Document content (PDF).
    #[serde(rename = "document")]
    Document { source: DocumentSource },

    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },

    #[serde(rename = "tool_result")]
    ToolResult {
        tool_use_id: String,
        output: Value,
        #[serde(skip_serializing_if = "Option::is_none")]
        is_error: Option<bool>,
    },

    /// Extended thinking content block, preserved verbatim across turns so
    /// providers that sign it (Anthropic) can verify it on replay.
    #[serde(rename = "thinking")]
    Thinking { thinking: String, signature: String },

    /// Redacted thinking block (signature present, content withheld).
    #[serde(rename = "redacted_thinking")]
    RedactedThinking { data: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base64: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
}

/// Document source for PDF content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentSource {
    /// "base64" or "url".
    #[serde(rename = "type")]
    pub source_type: String,
    pub media_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Unified message format sent to a provider adapter's `Send`/`Stream`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelMessage {
    pub role: Role,
    pub content: Vec<Content>,
}

/// Why the model stopped generating.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
    Other(String),
}

/// Token accounting, including prompt-cache metrics where a provider reports
/// them (Anthropic's ephemeral cache markers).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub total_tokens: usize,
    /// Tokens written to cache (25% extra cost).
    #[serde(default)]
    pub cache_creation_input_tokens: usize,
    /// Tokens read from cache (10% cost vs 100%).
    #[serde(default)]
    pub cache_read_input_tokens: usize,
}

/// Extended-thinking configuration sent with a request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThinkingConfig {
    pub budget_tokens: u32,
}

impl Default for ThinkingConfig {
    fn default() -> Self {
        Self {
            budget_tokens: DEFAULT_THINKING_BUDGET,
        }
    }
}
