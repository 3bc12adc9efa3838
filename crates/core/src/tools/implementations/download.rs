//! Download tool - Stream a URL to a file, size-limited (spec §4.3).

use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::tools::registry::Tool;
use crate::tools::{parse_params, ToolContext, ToolResult};

const MAX_DOWNLOAD_BYTES: u64 = 100 * 1024 * 1024;
const DEFAULT_TIMEOUT_MS: u64 = 60_000;

pub struct DownloadTool;

#[derive(Deserialize)]
struct Params {
    url: String,
    file_path: String,
    #[serde(default)]
    timeout: Option<u64>,
}

#[async_trait]
impl Tool for DownloadTool {
    fn name(&self) -> &str {
        "download"
    }

    fn description(&self) -> &str {
        "Download a URL to a local file, streaming the response. Limited to 100 MB; creates parent directories as needed."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "url": {
                    "type": "string",
                    "description": "The URL to download"
                },
                "file_path": {
                    "type": "string",
                    "description": "Destination path for the downloaded file"
                },
                "timeout": {
                    "type": "number",
                    "description": "Request timeout in milliseconds (default: 60000)"
                }
            },
            "required": ["url", "file_path"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> ToolResult {
        let params = match parse_params::<Params>(params) {
            Ok(p) => p,
            Err(e) => return e,
        };

        let parsed = match url::Url::parse(&params.url) {
            Ok(u) => u,
            Err(e) => return ToolResult::invalid_parameters(format!("Invalid URL: {}", e)),
        };

        if !matches!(parsed.scheme(), "https" | "http") {
            return ToolResult::error_with_code(
                "access_denied",
                "Only HTTP(S) URLs are permitted",
            );
        }

        let dest = match ctx.sandboxed_resolve_new_path(&params.file_path) {
            Ok(p) => p,
            Err(e) => return ToolResult::error(e),
        };

        if let Some(parent) = dest.parent() {
            if let Err(e) = fs::create_dir_all(parent).await {
                return ToolResult::error(format!("Failed to create parent directories: {}", e));
            }
        }

        let timeout_ms = params.timeout.unwrap_or(DEFAULT_TIMEOUT_MS).min(600_000);
        let client = match reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
        {
            Ok(c) => c,
            Err(e) => return ToolResult::error(format!("Failed to build HTTP client: {}", e)),
        };

        let response = match client.get(parsed.clone()).send().await {
            Ok(r) => r,
            Err(e) => return ToolResult::error(format!("Request failed: {}", e)),
        };

        let status = response.status();
        if !status.is_success() {
            return ToolResult::error_with_code(
                "tool_error",
                format!("Request returned status {}", status.as_u16()),
            );
        }

        if let Some(len) = response.content_length() {
            if len > MAX_DOWNLOAD_BYTES {
                return ToolResult::error_with_code(
                    "tool_error",
                    format!(
                        "Response too large: {} bytes exceeds {} byte limit",
                        len, MAX_DOWNLOAD_BYTES
                    ),
                );
            }
        }

        let mut file = match fs::File::create(&dest).await {
            Ok(f) => f,
            Err(e) => return ToolResult::error(format!("Failed to create file: {}", e)),
        };

        let mut stream = response.bytes_stream();
        let mut written: u64 = 0;

        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(c) => c,
                Err(e) => {
                    let _ = fs::remove_file(&dest).await;
                    return ToolResult::error(format!("Download failed: {}", e));
                }
            };

            written += chunk.len() as u64;
            if written > MAX_DOWNLOAD_BYTES {
                let _ = fs::remove_file(&dest).await;
                return ToolResult::error_with_code(
                    "tool_error",
                    format!("Download exceeded {} byte limit", MAX_DOWNLOAD_BYTES),
                );
            }

            if let Err(e) = file.write_all(&chunk).await {
                let _ = fs::remove_file(&dest).await;
                return ToolResult::error(format!("Failed to write file: {}", e));
            }
        }

        if let Err(e) = file.flush().await {
            return ToolResult::error(format!("Failed to flush file: {}", e));
        }

        ToolResult::success_data(json!({
            "file_path": dest.display().to_string(),
            "bytes_written": written
        }))
    }
}
