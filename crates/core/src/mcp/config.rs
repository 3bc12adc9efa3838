//! MCP server configuration (spec §4.4): `type ∈ {stdio, sse, http}`,
//! command/args/env for stdio or url/headers for sse/http, plus a
//! `disabled` flag. This module only describes the shape; `config.rs` at
//! the crate root owns the merged `CoreConfig.mcp_servers` map this feeds.

use serde::Deserialize;
use std::collections::HashMap;

/// A single MCP server entry.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum McpServerConfig {
    /// Local process, spoken to over stdio.
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: HashMap<String, String>,
        #[serde(default)]
        disabled: bool,
    },
    /// Server-sent-events endpoint.
    Sse {
        url: String,
        #[serde(default)]
        headers: HashMap<String, String>,
        #[serde(default)]
        disabled: bool,
    },
    /// Streamable HTTP endpoint.
    Http {
        url: String,
        #[serde(default)]
        headers: HashMap<String, String>,
        #[serde(default)]
        disabled: bool,
    },
}

impl McpServerConfig {
    pub fn disabled(&self) -> bool {
        match self {
            McpServerConfig::Stdio { disabled, .. } => *disabled,
            McpServerConfig::Sse { disabled, .. } => *disabled,
            McpServerConfig::Http { disabled, .. } => *disabled,
        }
    }

    pub fn transport_type(&self) -> &'static str {
        match self {
            McpServerConfig::Stdio { .. } => "stdio",
            McpServerConfig::Sse { .. } => "sse",
            McpServerConfig::Http { .. } => "http",
        }
    }

    /// Resolve `$VAR`-prefixed env values and header values against the
    /// process environment (the same convention `config::resolve_secret`
    /// uses for provider API keys).
    pub fn resolved(&self) -> McpServerConfig {
        match self {
            McpServerConfig::Stdio {
                command,
                args,
                env,
                disabled,
            } => McpServerConfig::Stdio {
                command: command.clone(),
                args: args.clone(),
                env: env
                    .iter()
                    .map(|(k, v)| (k.clone(), crate::config::resolve_secret(v)))
                    .collect(),
                disabled: *disabled,
            },
            McpServerConfig::Sse {
                url,
                headers,
                disabled,
            } => McpServerConfig::Sse {
                url: url.clone(),
                headers: headers
                    .iter()
                    .map(|(k, v)| (k.clone(), crate::config::resolve_secret(v)))
                    .collect(),
                disabled: *disabled,
            },
            McpServerConfig::Http {
                url,
                headers,
                disabled,
            } => McpServerConfig::Http {
                url: url.clone(),
                headers: headers
                    .iter()
                    .map(|(k, v)| (k.clone(), crate::config::resolve_secret(v)))
                    .collect(),
                disabled: *disabled,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_stdio_server() {
        let json = r#"{
            "type": "stdio",
            "command": "uvx",
            "args": ["some-mcp-server"],
            "env": {"API_KEY": "literal"}
        }"#;
        let config: McpServerConfig = serde_json::from_str(json).unwrap();
        assert!(matches!(config, McpServerConfig::Stdio { .. }));
        assert_eq!(config.transport_type(), "stdio");
        assert!(!config.disabled());
    }

    #[test]
    fn parses_sse_server_with_disabled_flag() {
        let json = r#"{
            "type": "sse",
            "url": "https://mcp.example.com/sse",
            "headers": {"Authorization": "$MCP_TOKEN"},
            "disabled": true
        }"#;
        let config: McpServerConfig = serde_json::from_str(json).unwrap();
        assert!(matches!(config, McpServerConfig::Sse { .. }));
        assert!(config.disabled());
    }

    #[test]
    fn parses_http_server() {
        let json = r#"{
            "type": "http",
            "url": "https://mcp.example.com/rpc"
        }"#;
        let config: McpServerConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.transport_type(), "http");
    }

    #[test]
    fn resolved_expands_env_reference_without_touching_literal() {
        std::env::set_var("MCP_CONFIG_TEST_TOKEN", "secret-value");
        let json = r#"{
            "type": "sse",
            "url": "https://mcp.example.com/sse",
            "headers": {"Authorization": "$MCP_CONFIG_TEST_TOKEN", "X-Other": "literal"}
        }"#;
        let config: McpServerConfig = serde_json::from_str(json).unwrap();
        let resolved = config.resolved();
        let McpServerConfig::Sse { headers, .. } = resolved else {
            panic!("expected sse variant");
        };
        assert_eq!(headers.get("Authorization").unwrap(), "secret-value");
        assert_eq!(headers.get("X-Other").unwrap(), "literal");
        std::env::remove_var("MCP_CONFIG_TEST_TOKEN");
    }
}
