//! Write tool - Create or overwrite files

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::fs;
use tracing::info;

use crate::tools::registry::Tool;
use crate::tools::{parse_params, ToolContext, ToolResult};

pub struct WriteTool;

#[derive(Deserialize)]
struct Params {
    file_path: String,
    content: String,
}

#[async_trait]
impl Tool for WriteTool {
    fn name(&self) -> &str {
        "write"
    }

    fn description(&self) -> &str {
        "Create or overwrite files. Creates parent directories if needed. Reports LSP errors after write."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "file_path": {
                    "type": "string",
                    "description": "The absolute path to the file to write"
                },
                "content": {
                    "type": "string",
                    "description": "The content to write to the file"
                }
            },
            "required": ["file_path", "content"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> ToolResult {
        let params = match parse_params::<Params>(params) {
            Ok(p) => p,
            Err(e) => return e,
        };

        // First resolve the path normally
        let path = ctx.resolve_path(&params.file_path);
        info!(
            "Write tool: resolved path = {:?}, working_dir = {:?}",
            path, ctx.working_dir
        );

        // Validate sandbox if configured (must check before creating directories)
        if let Some(ref sandbox) = ctx.sandbox_root {
            // For new files, validate the parent directory is within sandbox
            let check_path = if path.exists() {
                path.clone()
            } else {
                path.parent()
                    .map(|p| p.to_path_buf())
                    .unwrap_or_else(|| path.clone())
            };

            if let Ok(canonical) = check_path.canonicalize() {
                if !canonical.starts_with(sandbox) {
                    return ToolResult::error(format!(
                        "Access denied: path '{}' is outside workspace",
                        params.file_path
                    ));
                }
            } else if !check_path.starts_with(sandbox) {
                // Parent doesn't exist yet - check if it would be within sandbox
                return ToolResult::error(format!(
                    "Access denied: path '{}' is outside workspace",
                    params.file_path
                ));
            }
        }

        if let Err(msg) = ctx.read_tracker.check_read_before_write(&path).await {
            return ToolResult::error_with_code("read_before_write", msg);
        }

        // Create parent directories if needed
        if let Some(parent) = path.parent().filter(|p| !p.exists()) {
            info!("Write tool: creating parent directory {:?}", parent);
            if let Err(e) = fs::create_dir_all(parent).await {
                return ToolResult::error(format!("Failed to create directory: {}", e));
            }
        }

        match fs::write(&path, &params.content).await {
            Ok(_) => {
                ctx.read_tracker.record_read(&path).await;

                let output = json!({
                    "message": format!("Successfully wrote {} lines", params.content.lines().count()),
                    "bytes_written": params.content.len(),
                    "file_path": path.display().to_string()
                })
                .to_string();

                ToolResult::success(output)
            }
            Err(e) => ToolResult::error(format!("Failed to write file: {}", e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::implementations::read::ReadTool;
    use crate::tools::registry::ToolContext;

    #[tokio::test]
    async fn write_creates_a_new_file_without_needing_a_prior_view() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ToolContext {
            working_dir: dir.path().to_path_buf(),
            ..Default::default()
        };

        let result = WriteTool
            .execute(json!({"file_path": "new.txt", "content": "hello"}), &ctx)
            .await;
        assert!(!result.is_error, "{}", result.output);
        assert_eq!(
            tokio::fs::read_to_string(dir.path().join("new.txt")).await.unwrap(),
            "hello"
        );
    }

    #[tokio::test]
    async fn write_over_an_existing_unread_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("existing.txt");
        tokio::fs::write(&path, "original").await.unwrap();
        let ctx = ToolContext {
            working_dir: dir.path().to_path_buf(),
            ..Default::default()
        };

        let result = WriteTool
            .execute(json!({"file_path": "existing.txt", "content": "overwritten"}), &ctx)
            .await;
        assert!(result.is_error);
        assert_eq!(tokio::fs::read_to_string(&path).await.unwrap(), "original");
    }

    #[tokio::test]
    async fn write_over_a_previously_viewed_file_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("existing.txt");
        tokio::fs::write(&path, "original").await.unwrap();
        let ctx = ToolContext {
            working_dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        ReadTool.execute(json!({"file_path": "existing.txt"}), &ctx).await;

        let result = WriteTool
            .execute(json!({"file_path": "existing.txt", "content": "overwritten"}), &ctx)
            .await;
        assert!(!result.is_error, "{}", result.output);
        assert_eq!(tokio::fs::read_to_string(&path).await.unwrap(), "overwritten");
    }

    #[tokio::test]
    async fn write_creates_missing_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ToolContext {
            working_dir: dir.path().to_path_buf(),
            ..Default::default()
        };

        let result = WriteTool
            .execute(json!({"file_path": "nested/dir/file.txt", "content": "x"}), &ctx)
            .await;
        assert!(!result.is_error, "{}", result.output);
        assert!(dir.path().join("nested/dir/file.txt").exists());
    }
}
