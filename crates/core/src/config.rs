//! Configuration contract consumed by this crate.
//!
//! Config loading, merging, and file-watching live outside this crate's scope
//! (spec §1's non-goals) — callers build a [`CoreConfig`] however they like
//! (TOML/YAML/JSON, env, a UI) and hand it to the orchestrator. This module
//! only defines the shape, plus the `$VAR` API-key convention, the same way
//! `mcp/config.rs::expand_env_var` already resolves `${VAR}` references for
//! MCP server env blocks.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::ai::providers::ProviderKind;

/// One configured upstream model provider.
///
/// Immutable after startup, except for the api key being re-resolved on a
/// 401 (the adapter's retry policy re-derefs `api_key` through
/// [`resolve_secret`] and rebuilds its HTTP client).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    pub base_url: Option<String>,
    /// Literal key, or a `$VAR`-prefixed environment variable reference.
    pub api_key: Option<String>,
    #[serde(default)]
    pub extra_headers: HashMap<String, String>,
    #[serde(default)]
    pub extra_params: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub models: Vec<String>,
}

impl ProviderConfig {
    /// Resolve `api_key` through the `$VAR` environment-variable convention.
    pub fn resolved_api_key(&self) -> Option<String> {
        self.api_key.as_deref().map(resolve_secret)
    }
}

/// An agent profile: a preconfigured {model, system prompt, allowed tools}
/// bundle. Spec glossary names four roles used by the orchestrator: coder,
/// a tools-less search/sub-agent role, title, and summarize.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentProfile {
    pub model: String,
    pub system_prompt: String,
    #[serde(default)]
    pub allowed_tools: Option<Vec<String>>,
    #[serde(default)]
    pub allowed_mcp_servers: Option<Vec<String>>,
    #[serde(default)]
    pub context_paths: Vec<PathBuf>,
}

/// Top-level config this crate consumes. Never loaded or merged by this
/// crate itself — only read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    pub providers: HashMap<String, ProviderConfig>,
    pub agents: HashMap<String, AgentProfile>,
    #[serde(default)]
    pub mcp_servers: HashMap<String, crate::mcp::config::McpServerConfig>,
    /// Files whose contents are prepended to the system prompt, in order.
    #[serde(default)]
    pub context_paths: Vec<PathBuf>,
    pub working_dir: PathBuf,
    #[serde(default)]
    pub disable_auto_summarize: bool,
    /// Bypasses the permission broker entirely when set (spec §4.2's
    /// highest-priority decision-algorithm branch).
    #[serde(default)]
    pub skip_permissions: bool,
    /// `tool` or `tool:action` entries that are always granted.
    #[serde(default)]
    pub permission_allow_list: Vec<String>,
}

/// Resolve a secret value: a leading `$` marks an environment-variable
/// reference (`$OPENAI_API_KEY` -> `std::env::var("OPENAI_API_KEY")`),
/// anything else is returned verbatim. Falls back to the literal string if
/// the variable is unset, mirroring `mcp/config.rs`'s existing
/// best-effort-expansion behavior.
pub fn resolve_secret(value: &str) -> String {
    match value.strip_prefix('$') {
        Some(var_name) if !var_name.is_empty() => {
            std::env::var(var_name).unwrap_or_else(|_| value.to_string())
        }
        _ => value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_secret_dereferences_env_var() {
        std::env::set_var("AGENTCORE_TEST_KEY", "sk-test-123");
        assert_eq!(resolve_secret("$AGENTCORE_TEST_KEY"), "sk-test-123");
        std::env::remove_var("AGENTCORE_TEST_KEY");
    }

    #[test]
    fn resolve_secret_passes_through_literal() {
        assert_eq!(resolve_secret("sk-literal"), "sk-literal");
    }

    #[test]
    fn resolve_secret_falls_back_on_unset_var() {
        assert_eq!(resolve_secret("$DEFINITELY_NOT_SET_XYZ"), "$DEFINITELY_NOT_SET_XYZ");
    }
}
