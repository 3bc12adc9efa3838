//! Fetch tool - HTTPS GET with size limit and format conversion (spec §4.3).

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

use crate::tools::registry::Tool;
use crate::tools::{parse_params, ToolContext, ToolResult};

const MAX_RESPONSE_BYTES: usize = 5 * 1024 * 1024;
const DEFAULT_TIMEOUT_MS: u64 = 30_000;

pub struct FetchTool;

#[derive(Deserialize)]
struct Params {
    url: String,
    #[serde(default)]
    format: Option<String>,
    #[serde(default)]
    timeout: Option<u64>,
}

#[async_trait]
impl Tool for FetchTool {
    fn name(&self) -> &str {
        "fetch"
    }

    fn description(&self) -> &str {
        "Fetch a URL over HTTPS and return its content as text, markdown, or html. Limited to 5 MB responses."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "url": {
                    "type": "string",
                    "description": "The HTTPS URL to fetch"
                },
                "format": {
                    "type": "string",
                    "enum": ["text", "markdown", "html"],
                    "description": "Output format (default: text)"
                },
                "timeout": {
                    "type": "number",
                    "description": "Request timeout in milliseconds (default: 30000)"
                }
            },
            "required": ["url"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, params: Value, _ctx: &ToolContext) -> ToolResult {
        let params = match parse_params::<Params>(params) {
            Ok(p) => p,
            Err(e) => return e,
        };

        let parsed = match url::Url::parse(&params.url) {
            Ok(u) => u,
            Err(e) => return ToolResult::invalid_parameters(format!("Invalid URL: {}", e)),
        };

        if parsed.scheme() != "https" {
            return ToolResult::error_with_code(
                "access_denied",
                "Only HTTPS URLs are permitted",
            );
        }

        let timeout_ms = params.timeout.unwrap_or(DEFAULT_TIMEOUT_MS).min(120_000);
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

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        let bytes = match response.bytes().await {
            Ok(b) => b,
            Err(e) => return ToolResult::error(format!("Failed to read response body: {}", e)),
        };

        if bytes.len() > MAX_RESPONSE_BYTES {
            return ToolResult::error_with_code(
                "tool_error",
                format!(
                    "Response too large: {} bytes exceeds {} byte limit",
                    bytes.len(),
                    MAX_RESPONSE_BYTES
                ),
            );
        }

        let text = match String::from_utf8(bytes.to_vec()) {
            Ok(t) => t,
            Err(e) => return ToolResult::error(format!("Response is not valid UTF-8: {}", e)),
        };

        let format = params.format.as_deref().unwrap_or("text");
        let converted = match format {
            "markdown" => html_to_markdown(&text, &content_type),
            "html" => text.clone(),
            _ => strip_html_if_present(&text, &content_type),
        };

        ToolResult::success_data(json!({
            "content": converted,
            "content_type": content_type,
            "status": status.as_u16(),
            "url": parsed.to_string()
        }))
    }
}

/// Plain-text extraction: strip tags and collapse whitespace, keeping only
/// the page's visible text content.
fn strip_html_if_present(body: &str, content_type: &str) -> String {
    if !content_type.contains("html") {
        return body.to_string();
    }

    let document = scraper::Html::parse_document(body);
    let selector = scraper::Selector::parse("body").unwrap_or_else(|_| {
        scraper::Selector::parse("*").expect("universal selector is always valid")
    });

    let text: String = document
        .select(&selector)
        .next()
        .map(|el| el.text().collect::<Vec<_>>().join(" "))
        .unwrap_or_default();

    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn html_to_markdown(body: &str, content_type: &str) -> String {
    if content_type.contains("html") {
        html2md::parse_html(body)
    } else {
        body.to_string()
    }
}
