//! MCP client: JSON-RPC request/response plumbing over any [`Transport`].
//!
//! Uses a background receive loop to avoid races between concurrent calls.

use anyhow::{anyhow, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::{debug, error, info};

use super::protocol::{
    ClientCapabilities, ClientInfo, InitializeParams, InitializeResult, McpRequest, McpResponse,
    McpToolDef, McpToolResult, ToolCallParams, ToolCallResult, ToolsListResult,
};
use super::transport::Transport;

const PROTOCOL_VERSION: &str = "2024-11-05";
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// MCP client generic over its transport (stdio, SSE, or streamable HTTP).
pub struct McpClient<T: Transport + 'static> {
    name: String,
    transport: Arc<T>,
    next_id: AtomicI64,
    pending: Arc<RwLock<HashMap<i64, oneshot::Sender<Result<Value>>>>>,
    tools: RwLock<Vec<McpToolDef>>,
    shutdown_tx: Option<mpsc::Sender<()>>,
}

impl<T: Transport + 'static> McpClient<T> {
    /// Wrap an already-connected transport and start its receive loop.
    pub fn new(name: &str, transport: T) -> Self {
        let transport = Arc::new(transport);
        let pending: Arc<RwLock<HashMap<i64, oneshot::Sender<Result<Value>>>>> =
            Arc::new(RwLock::new(HashMap::new()));

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        let recv_transport = Arc::clone(&transport);
        let recv_pending = Arc::clone(&pending);
        let recv_name = name.to_string();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        debug!("MCP client {} shutting down receive loop", recv_name);
                        break;
                    }
                    result = recv_transport.receive() => {
                        match result {
                            Ok(message) => {
                                if let Err(e) = handle_message(&message, &recv_pending).await {
                                    error!("MCP {} message error: {}", recv_name, e);
                                }
                            }
                            Err(e) => {
                                error!("MCP {} receive error: {}", recv_name, e);
                                let mut pending = recv_pending.write().await;
                                for (_, tx) in pending.drain() {
                                    let _ = tx.send(Err(anyhow!("Connection lost")));
                                }
                                break;
                            }
                        }
                    }
                }
            }
        });

        Self {
            name: name.to_string(),
            transport,
            next_id: AtomicI64::new(1),
            pending,
            tools: RwLock::new(Vec::new()),
            shutdown_tx: Some(shutdown_tx),
        }
    }

    /// Initialize the MCP connection (required before using tools).
    pub async fn initialize(&self) -> Result<InitializeResult> {
        info!("Initializing MCP connection for {}", self.name);

        let params = InitializeParams {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: ClientCapabilities::default(),
            client_info: ClientInfo {
                name: "agentcore".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        };

        debug!("Sending initialize request to {}", self.name);
        let result: InitializeResult = self
            .request("initialize", Some(serde_json::to_value(params)?))
            .await
            .map_err(|e| {
                error!("MCP {} initialize failed: {}", self.name, e);
                e
            })?;

        info!(
            "MCP {} initialized (protocol: {})",
            self.name, result.protocol_version
        );

        self.notify("notifications/initialized", None).await?;

        Ok(result)
    }

    /// List available tools.
    pub async fn list_tools(&self) -> Result<Vec<McpToolDef>> {
        let result: ToolsListResult = self.request("tools/list", None).await?;
        info!("MCP {} has {} tools", self.name, result.tools.len());

        for tool in &result.tools {
            debug!(
                "MCP {} tool '{}' schema: {}",
                self.name,
                tool.name,
                serde_json::to_string(&tool.input_schema).unwrap_or_default()
            );
        }

        *self.tools.write().await = result.tools.clone();

        Ok(result.tools)
    }

    /// Call a tool.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<McpToolResult> {
        let params = ToolCallParams {
            name: name.to_string(),
            arguments: if arguments.is_null() {
                None
            } else {
                Some(arguments)
            },
        };

        let result: ToolCallResult = self
            .request("tools/call", Some(serde_json::to_value(params)?))
            .await?;

        Ok(result.into())
    }

    /// Get cached tools.
    pub async fn get_tools(&self) -> Vec<McpToolDef> {
        self.tools.read().await.clone()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn is_alive(&self) -> bool {
        self.transport.is_alive().await
    }

    async fn request<R: for<'de> serde::Deserialize<'de>>(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<R> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let request = McpRequest::new(id, method, params);
        let json = serde_json::to_string(&request)?;

        debug!("MCP {} request [{}]: {}", self.name, id, method);

        let (tx, rx) = oneshot::channel();
        self.pending.write().await.insert(id, tx);

        self.transport.send(&json).await?;

        let result =
            tokio::time::timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS), rx).await;

        match result {
            Ok(Ok(Ok(value))) => Ok(serde_json::from_value(value)?),
            Ok(Ok(Err(e))) => Err(e),
            Ok(Err(_)) => Err(anyhow!("Request cancelled")),
            Err(_) => {
                self.pending.write().await.remove(&id);
                Err(anyhow!("Request timed out after {}s", REQUEST_TIMEOUT_SECS))
            }
        }
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        #[derive(serde::Serialize)]
        struct Notification {
            jsonrpc: &'static str,
            method: String,
            #[serde(skip_serializing_if = "Option::is_none")]
            params: Option<Value>,
        }

        let notification = Notification {
            jsonrpc: "2.0",
            method: method.to_string(),
            params,
        };

        let json = serde_json::to_string(&notification)?;
        debug!("MCP {} notify: {}", self.name, method);
        self.transport.send(&json).await
    }
}

impl<T: Transport + 'static> Drop for McpClient<T> {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.try_send(());
        }
    }
}

async fn handle_message(
    message: &str,
    pending: &RwLock<HashMap<i64, oneshot::Sender<Result<Value>>>>,
) -> Result<()> {
    let response: McpResponse = serde_json::from_str(message)?;

    if let Some(id) = response.id {
        let mut pending = pending.write().await;
        if let Some(tx) = pending.remove(&id) {
            if let Some(error) = response.error {
                let _ = tx.send(Err(anyhow!("MCP error {}: {}", error.code, error.message)));
            } else {
                let _ = tx.send(Ok(response.result.unwrap_or(Value::Null)));
            }
        }
        return Ok(());
    }

    if let Some(method) = &response.method {
        debug!("MCP notification: {}", method);
    }

    Ok(())
}
