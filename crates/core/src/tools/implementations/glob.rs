//! Glob tool - Find files by doublestar pattern, newest-first (spec §4.3).
//!
//! Shells out to `rg --files -g <pattern>` when ripgrep is on `PATH` (faster
//! on large trees and already honors `.gitignore`), falling back to an
//! in-process `ignore::WalkBuilder` walk filtered by the `glob` crate's
//! pattern matcher otherwise.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::time::SystemTime;

use crate::tools::registry::Tool;
use crate::tools::{parse_params, ToolContext, ToolResult};

const DEFAULT_LIMIT: usize = 100;
const MAX_LIMIT: usize = 1000;

pub struct GlobTool;

#[derive(Deserialize)]
struct Params {
    pattern: String,
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    limit: Option<usize>,
}

struct Match {
    path: PathBuf,
    modified: SystemTime,
}

#[async_trait]
impl Tool for GlobTool {
    fn name(&self) -> &str {
        "glob"
    }

    fn description(&self) -> &str {
        "Find files matching a doublestar glob pattern (e.g. **/*.rs). Results are sorted newest-first."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": {
                    "type": "string",
                    "description": "Doublestar glob pattern, e.g. '**/*.ts'"
                },
                "path": {
                    "type": "string",
                    "description": "Directory to search within (default: working directory)"
                },
                "limit": {
                    "type": "number",
                    "description": "Maximum number of matches to return (default: 100)"
                }
            },
            "required": ["pattern"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> ToolResult {
        let params = match parse_params::<Params>(params) {
            Ok(p) => p,
            Err(e) => return e,
        };

        let base = match &params.path {
            Some(p) => match ctx.sandboxed_resolve(p) {
                Ok(resolved) => resolved,
                Err(e) => return ToolResult::error(e),
            },
            None => ctx.working_dir.clone(),
        };

        if !base.is_dir() {
            return ToolResult::error(format!("Path is not a directory: {}", base.display()));
        }

        let limit = params.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT);

        let matches = match which::which("rg") {
            Ok(rg_path) => run_ripgrep(&rg_path, &base, &params.pattern).await,
            Err(_) => None,
        };

        let mut matches = match matches {
            Some(m) => m,
            None => walk_in_process(&base, &params.pattern),
        };

        matches.sort_by(|a, b| b.modified.cmp(&a.modified));
        let total = matches.len();
        matches.truncate(limit);

        let files: Vec<String> = matches
            .iter()
            .map(|m| m.path.display().to_string())
            .collect();

        ToolResult::success_data(json!({
            "files": files,
            "total_matches": total,
            "truncated": total > limit
        }))
    }
}

async fn run_ripgrep(rg_path: &std::path::Path, base: &std::path::Path, pattern: &str) -> Option<Vec<Match>> {
    let output = tokio::process::Command::new(rg_path)
        .arg("--files")
        .arg("-g")
        .arg(pattern)
        .current_dir(base)
        .output()
        .await
        .ok()?;

    if !output.status.success() && output.stdout.is_empty() {
        return None;
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let mut matches = Vec::new();
    for line in stdout.lines() {
        let full = base.join(line);
        let modified = std::fs::metadata(&full)
            .and_then(|m| m.modified())
            .unwrap_or(SystemTime::UNIX_EPOCH);
        matches.push(Match {
            path: full,
            modified,
        });
    }
    Some(matches)
}

fn walk_in_process(base: &std::path::Path, pattern: &str) -> Vec<Match> {
    let glob_pattern = base.join(pattern);
    let pattern_str = glob_pattern.to_string_lossy().to_string();

    let compiled = match glob::Pattern::new(&pattern_str) {
        Ok(p) => p,
        Err(_) => return Vec::new(),
    };

    let mut matches = Vec::new();
    let walker = ignore::WalkBuilder::new(base)
        .hidden(false)
        .standard_filters(true)
        .build();

    for entry in walker.flatten() {
        if !entry.file_type().map(|ft| ft.is_file()).unwrap_or(false) {
            continue;
        }
        let path = entry.path();
        if compiled.matches_path(path) {
            let modified = entry
                .metadata()
                .ok()
                .and_then(|m| m.modified().ok())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            matches.push(Match {
                path: path.to_path_buf(),
                modified,
            });
        }
    }
    matches
}
