//! MCP transports: stdio, SSE, and streamable HTTP.
//!
//! All three speak newline- or event-delimited JSON-RPC 2.0 (spec §4.4's
//! `MCPServerConfig.type ∈ {stdio, sse, http}`). `Transport` abstracts the
//! framing so `McpClient<T>` only deals in request/response strings.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;

/// A bidirectional line-oriented JSON-RPC channel to an MCP server.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a single JSON-RPC message.
    async fn send(&self, message: &str) -> Result<()>;
    /// Block until the next JSON-RPC message arrives.
    async fn receive(&self) -> Result<String>;
    /// Whether the underlying connection is still usable.
    async fn is_alive(&self) -> bool;
}

/// Stdio transport for local MCP servers. Uses newline-delimited JSON.
pub struct StdioTransport {
    stdin: Mutex<ChildStdin>,
    stdout: Mutex<BufReader<ChildStdout>>,
    child: Mutex<Child>,
}

impl StdioTransport {
    /// Spawn an MCP server process.
    pub async fn spawn(
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
        working_dir: &Path,
    ) -> Result<Self> {
        tracing::info!("Spawning MCP server: {} {:?}", command, args);
        for (k, v) in env {
            let masked = if k.contains("API_KEY") || k.contains("TOKEN") {
                format!(
                    "{}...{}",
                    &v.chars().take(8).collect::<String>(),
                    &v.chars()
                        .rev()
                        .take(4)
                        .collect::<String>()
                        .chars()
                        .rev()
                        .collect::<String>()
                )
            } else {
                v.clone()
            };
            tracing::info!("  env {}={}", k, masked);
        }

        let mut cmd = Command::new(command);
        cmd.args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .current_dir(working_dir)
            .kill_on_drop(true);

        for (key, value) in env {
            cmd.env(key, value);
        }

        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                anyhow!(
                    "Command not found: {}. Is it installed and in PATH?",
                    command
                )
            } else {
                anyhow!("Failed to spawn {}: {}", command, e)
            }
        })?;

        let stdin = child.stdin.take().ok_or_else(|| anyhow!("No stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| anyhow!("No stdout"))?;

        Ok(Self {
            stdin: Mutex::new(stdin),
            stdout: Mutex::new(BufReader::new(stdout)),
            child: Mutex::new(child),
        })
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn send(&self, message: &str) -> Result<()> {
        let mut stdin = self.stdin.lock().await;
        stdin.write_all(message.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await?;
        tracing::debug!("Sent: {}", message);
        Ok(())
    }

    async fn receive(&self) -> Result<String> {
        let mut stdout = self.stdout.lock().await;

        loop {
            let mut line = String::new();
            let bytes = stdout.read_line(&mut line).await?;

            if bytes == 0 {
                let mut child = self.child.lock().await;
                match child.try_wait() {
                    Ok(Some(status)) => {
                        return Err(anyhow!("MCP server exited with {}", status));
                    }
                    Ok(None) => {
                        return Err(anyhow!("MCP server closed stdout unexpectedly"));
                    }
                    Err(e) => {
                        return Err(anyhow!("Error checking MCP server status: {}", e));
                    }
                }
            }

            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            if line.starts_with('{') {
                tracing::debug!("Received: {}", line);
                return Ok(line.to_string());
            }

            tracing::debug!("Skipping non-JSON line: {}", line);
        }
    }

    async fn is_alive(&self) -> bool {
        let mut child = self.child.lock().await;
        matches!(child.try_wait(), Ok(None))
    }
}

/// Streamable-HTTP transport: each request is a `POST` carrying one JSON-RPC
/// message, and the matching response is read back from the HTTP body.
/// There is no persistent connection to keep alive, so `is_alive` is always
/// `true` once constructed.
pub struct HttpTransport {
    client: reqwest::Client,
    url: String,
    headers: HashMap<String, String>,
    inbox: Mutex<std::collections::VecDeque<String>>,
}

impl HttpTransport {
    pub fn new(url: String, headers: HashMap<String, String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("building MCP HTTP client")?;
        Ok(Self {
            client,
            url,
            headers,
            inbox: Mutex::new(std::collections::VecDeque::new()),
        })
    }

    fn apply_headers(&self, mut builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        for (k, v) in &self.headers {
            builder = builder.header(k, v);
        }
        builder
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, message: &str) -> Result<()> {
        let builder = self
            .client
            .post(&self.url)
            .header("content-type", "application/json")
            .body(message.to_string());
        let response = self.apply_headers(builder).send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(anyhow!("MCP HTTP transport error {}: {}", status, body));
        }
        if !body.trim().is_empty() {
            self.inbox.lock().await.push_back(body);
        }
        Ok(())
    }

    async fn receive(&self) -> Result<String> {
        loop {
            if let Some(msg) = self.inbox.lock().await.pop_front() {
                return Ok(msg);
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    async fn is_alive(&self) -> bool {
        true
    }
}

/// Server-sent-events transport: requests are posted to `url`, responses
/// arrive as `data:`-framed events on a long-lived `GET` stream opened at
/// connect time. The read side runs a background pump into an in-memory
/// queue so `receive()` never blocks on the HTTP response of `send()`.
pub struct SseTransport {
    client: reqwest::Client,
    post_url: String,
    headers: HashMap<String, String>,
    inbox: std::sync::Arc<Mutex<std::collections::VecDeque<String>>>,
    alive: std::sync::Arc<std::sync::atomic::AtomicBool>,
}

impl SseTransport {
    pub async fn connect(url: String, headers: HashMap<String, String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .context("building MCP SSE client")?;

        let inbox = std::sync::Arc::new(Mutex::new(std::collections::VecDeque::new()));
        let alive = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(true));

        let mut builder = client.get(&url).header("accept", "text/event-stream");
        for (k, v) in &headers {
            builder = builder.header(k, v);
        }
        let response = builder.send().await.context("opening MCP SSE stream")?;
        if !response.status().is_success() {
            return Err(anyhow!("MCP SSE connect failed: {}", response.status()));
        }

        let pump_inbox = inbox.clone();
        let pump_alive = alive.clone();
        let mut stream = response.bytes_stream();
        tokio::spawn(async move {
            use futures::StreamExt;
            let mut buf = String::new();
            while let Some(chunk) = stream.next().await {
                let Ok(chunk) = chunk else {
                    break;
                };
                buf.push_str(&String::from_utf8_lossy(&chunk));
                while let Some(pos) = buf.find("\n\n") {
                    let frame: String = buf.drain(..pos + 2).collect();
                    for line in frame.lines() {
                        if let Some(data) = line.strip_prefix("data:") {
                            pump_inbox.lock().await.push_back(data.trim().to_string());
                        }
                    }
                }
            }
            pump_alive.store(false, std::sync::atomic::Ordering::SeqCst);
        });

        Ok(Self {
            client,
            post_url: url,
            headers,
            inbox,
            alive,
        })
    }
}

#[async_trait]
impl Transport for SseTransport {
    async fn send(&self, message: &str) -> Result<()> {
        let mut builder = self
            .client
            .post(&self.post_url)
            .header("content-type", "application/json");
        for (k, v) in &self.headers {
            builder = builder.header(k, v);
        }
        let response = builder.body(message.to_string()).send().await?;
        if !response.status().is_success() {
            return Err(anyhow!("MCP SSE post failed: {}", response.status()));
        }
        Ok(())
    }

    async fn receive(&self) -> Result<String> {
        loop {
            if let Some(msg) = self.inbox.lock().await.pop_front() {
                return Ok(msg);
            }
            if !self.alive.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(anyhow!("MCP SSE stream closed"));
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    async fn is_alive(&self) -> bool {
        self.alive.load(std::sync::atomic::Ordering::SeqCst)
    }
}
