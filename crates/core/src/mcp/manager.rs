//! MCP Supervisor: owns every connected MCP client handle for the process
//! lifetime (spec §4.4's persistent-pool design — see `SPEC_FULL.md`'s
//! resolution of the source's per-call-vs-persistent-pool inconsistency).
//!
//! Each configured server is dialed with its declared transport
//! (stdio/SSE/HTTP), initialized, and its tools enumerated; failures are
//! logged and skipped so one bad server never blocks the others.

use anyhow::Result;
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

use super::client::McpClient;
use super::config::McpServerConfig;
use super::protocol::{McpToolDef, McpToolResult};
use super::transport::{HttpTransport, SseTransport, StdioTransport, Transport};

/// Server connection status, surfaced for diagnostics/UI.
#[derive(Debug, Clone, PartialEq)]
pub enum McpServerStatus {
    Disconnected,
    Connected,
    Error(String),
}

impl std::fmt::Display for McpServerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            McpServerStatus::Disconnected => write!(f, "disconnected"),
            McpServerStatus::Connected => write!(f, "connected"),
            McpServerStatus::Error(e) => write!(f, "error: {}", e),
        }
    }
}

#[derive(Debug, Clone)]
pub struct McpServerInfo {
    pub name: String,
    pub server_type: String,
    pub status: McpServerStatus,
    pub tool_count: usize,
    pub tools: Vec<McpToolDef>,
    pub error: Option<String>,
}

/// A connected client, boxed over its transport so the manager can hold a
/// single homogeneous map regardless of which transport a server uses.
enum Connection {
    Stdio(McpClient<StdioTransport>),
    Sse(McpClient<SseTransport>),
    Http(McpClient<HttpTransport>),
}

impl Connection {
    async fn initialize(&self) -> Result<()> {
        match self {
            Connection::Stdio(c) => c.initialize().await.map(|_| ()),
            Connection::Sse(c) => c.initialize().await.map(|_| ()),
            Connection::Http(c) => c.initialize().await.map(|_| ()),
        }
    }

    async fn list_tools(&self) -> Result<Vec<McpToolDef>> {
        match self {
            Connection::Stdio(c) => c.list_tools().await,
            Connection::Sse(c) => c.list_tools().await,
            Connection::Http(c) => c.list_tools().await,
        }
    }

    async fn get_tools(&self) -> Vec<McpToolDef> {
        match self {
            Connection::Stdio(c) => c.get_tools().await,
            Connection::Sse(c) => c.get_tools().await,
            Connection::Http(c) => c.get_tools().await,
        }
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<McpToolResult> {
        match self {
            Connection::Stdio(c) => c.call_tool(name, arguments).await,
            Connection::Sse(c) => c.call_tool(name, arguments).await,
            Connection::Http(c) => c.call_tool(name, arguments).await,
        }
    }

    async fn is_alive(&self) -> bool {
        match self {
            Connection::Stdio(c) => c.is_alive().await,
            Connection::Sse(c) => c.is_alive().await,
            Connection::Http(c) => c.is_alive().await,
        }
    }
}

/// The MCP Supervisor component (spec §4.4).
pub struct McpManager {
    clients: RwLock<HashMap<String, Arc<Connection>>>,
    configs: RwLock<HashMap<String, McpServerConfig>>,
    working_dir: PathBuf,
}

impl McpManager {
    pub fn new(working_dir: PathBuf) -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
            configs: RwLock::new(HashMap::new()),
            working_dir,
        }
    }

    /// Install a resolved server map (the crate-root `CoreConfig` owns
    /// loading/merging; the manager only consumes the result).
    pub async fn set_configs(&self, configs: HashMap<String, McpServerConfig>) {
        *self.configs.write().await = configs;
    }

    /// Connect to every enabled server in parallel; a failure on one
    /// server is logged and does not block the others (spec §4.4).
    pub async fn connect_all(&self) -> Result<()> {
        let configs: Vec<_> = {
            let configs = self.configs.read().await;
            configs
                .iter()
                .filter(|(_, c)| !c.disabled())
                .map(|(n, c)| (n.clone(), c.clone()))
                .collect()
        };

        if configs.is_empty() {
            return Ok(());
        }

        info!("Connecting to {} MCP servers in parallel", configs.len());

        let connect_futures: Vec<_> = configs.iter().map(|(name, _)| {
            let name = name.clone();
            async move {
                info!("Attempting to connect to MCP server: {}", name);
                (name.clone(), self.connect(&name).await)
            }
        }).collect();

        let results = futures::future::join_all(connect_futures).await;

        for (name, result) in results {
            if let Err(e) = result {
                warn!("Failed to connect to MCP server {}: {:?}", name, e);
            }
        }

        Ok(())
    }

    /// Connect to a specific server: dial, `Initialize`, `ListTools`.
    pub async fn connect(&self, name: &str) -> Result<()> {
        let config = {
            let configs = self.configs.read().await;
            configs.get(name).cloned()
        };

        let Some(config) = config else {
            return Err(anyhow::anyhow!("Unknown server: {}", name));
        };

        if config.disabled() {
            return Err(anyhow::anyhow!("Server {} is disabled", name));
        }

        self.disconnect(name).await;

        let connection = match config.resolved() {
            McpServerConfig::Stdio {
                command, args, env, ..
            } => {
                let transport =
                    StdioTransport::spawn(&command, &args, &env, &self.working_dir).await?;
                Connection::Stdio(McpClient::new(name, transport))
            }
            McpServerConfig::Sse { url, headers, .. } => {
                let transport = SseTransport::connect(url, headers).await?;
                Connection::Sse(McpClient::new(name, transport))
            }
            McpServerConfig::Http { url, headers, .. } => {
                let transport = HttpTransport::new(url, headers)?;
                Connection::Http(McpClient::new(name, transport))
            }
        };

        connection.initialize().await?;
        connection.list_tools().await?;

        self.clients
            .write()
            .await
            .insert(name.to_string(), Arc::new(connection));

        info!("Connected to MCP server: {}", name);
        Ok(())
    }

    pub async fn disconnect(&self, name: &str) {
        if self.clients.write().await.remove(name).is_some() {
            info!("Disconnected from MCP server: {}", name);
        }
    }

    /// Close every connected client (`CloseAll` in spec terms).
    pub async fn close_all(&self) {
        let names: Vec<String> = self.clients.read().await.keys().cloned().collect();
        for name in names {
            self.disconnect(&name).await;
        }
    }

    pub async fn get_all_tools(&self) -> Vec<(String, McpToolDef)> {
        let clients = self.clients.read().await;
        let mut tools = Vec::new();

        for (name, client) in clients.iter() {
            for tool in client.get_tools().await {
                tools.push((name.clone(), tool));
            }
        }

        tools
    }

    pub async fn call_tool(
        &self,
        server: &str,
        tool: &str,
        arguments: Value,
    ) -> Result<McpToolResult> {
        let clients = self.clients.read().await;
        let client = clients
            .get(server)
            .ok_or_else(|| anyhow::anyhow!("Server not connected: {}", server))?;

        client.call_tool(tool, arguments).await
    }

    pub async fn list_servers(&self) -> Vec<McpServerInfo> {
        let configs = self.configs.read().await;
        let clients = self.clients.read().await;

        let mut servers = Vec::new();

        for (name, config) in configs.iter() {
            let (status, tool_count, tools, error) = if let Some(client) = clients.get(name) {
                let t = client.get_tools().await;
                if client.is_alive().await {
                    (McpServerStatus::Connected, t.len(), t, None)
                } else {
                    (
                        McpServerStatus::Error("connection died".to_string()),
                        0,
                        Vec::new(),
                        Some("connection died".to_string()),
                    )
                }
            } else {
                (McpServerStatus::Disconnected, 0, Vec::new(), None)
            };

            servers.push(McpServerInfo {
                name: name.clone(),
                server_type: config.transport_type().to_string(),
                status,
                tool_count,
                tools,
                error,
            });
        }

        servers.sort_by(|a, b| a.name.cmp(&b.name));
        servers
    }

    pub async fn has_servers(&self) -> bool {
        !self.configs.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn has_servers_reflects_loaded_config() {
        let manager = McpManager::new(PathBuf::from("."));
        assert!(!manager.has_servers().await);

        let mut configs = HashMap::new();
        configs.insert(
            "example".to_string(),
            McpServerConfig::Http {
                url: "https://example.com".to_string(),
                headers: HashMap::new(),
                disabled: false,
            },
        );
        manager.set_configs(configs).await;
        assert!(manager.has_servers().await);
    }

    #[tokio::test]
    async fn connect_unknown_server_errors() {
        let manager = McpManager::new(PathBuf::from("."));
        let result = manager.connect("missing").await;
        assert!(result.is_err());
    }
}
