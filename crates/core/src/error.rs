//! Crate-wide error taxonomy.
//!
//! Each subsystem gets its own typed error enum via `thiserror`; callers that
//! cross subsystem boundaries (the orchestrator, the public API surface) work
//! in terms of `CoreError`, which composes all of them. Leaf call sites that
//! stay within a single subsystem keep using `anyhow::Result` internally, the
//! same way `tools/registry.rs` and `agent/orchestrator.rs` already do.

use thiserror::Error;

/// Errors raised by tool execution.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("unknown tool: {0}")]
    UnknownTool(String),
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),
    #[error("access denied: {0}")]
    AccessDenied(String),
    #[error("tool timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("tool execution failed: {0}")]
    ExecutionFailed(String),
    #[error("blocked by policy: {0}")]
    BlockedByPolicy(String),
}

/// Errors raised by the permission broker.
#[derive(Debug, Error)]
pub enum PermissionError {
    #[error("approval request timed out")]
    Timeout,
    #[error("tool execution denied")]
    Denied,
    #[error("no pending request for tool call {0}")]
    NoPendingRequest(String),
    #[error("approval channel closed before a decision was made")]
    ChannelClosed,
}

/// Errors raised by the session/message store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("session not found: {0}")]
    SessionNotFound(String),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by the MCP supervisor.
#[derive(Debug, Error)]
pub enum McpError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("server '{0}' is not connected")]
    NotConnected(String),
    #[error("request timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("server returned a tool error: {0}")]
    ToolError(String),
    #[error("config error: {0}")]
    Config(String),
}

/// Errors raised by the agent orchestrator.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Provider(#[from] crate::ai::adapters::ProviderError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Permission(#[from] PermissionError),
    #[error("max iterations ({0}) reached without completion")]
    MaxIterationsReached(usize),
    #[error("repeated tool failure detected: {0}")]
    RepeatedFailure(String),
    #[error("cancelled by caller")]
    Cancelled,
    #[error("no agent profile configured for role '{0}'")]
    MissingAgentProfile(String),
    #[error("no provider adapter configured for model '{0}'")]
    UnknownModel(String),
    #[error("summarization failed: {0}")]
    Summarize(String),
}

/// Crate-wide error type composing every subsystem's taxonomy.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Tool(#[from] ToolError),
    #[error(transparent)]
    Permission(#[from] PermissionError),
    #[error(transparent)]
    Provider(#[from] crate::ai::adapters::ProviderError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Mcp(#[from] McpError),
    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type CoreResult<T> = std::result::Result<T, CoreError>;
