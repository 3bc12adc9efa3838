//! List directory tool - Breadth-first directory listing with depth/limit

use async_trait::async_trait;
use ignore::WalkBuilder;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::tools::registry::Tool;
use crate::tools::{parse_params, ToolContext, ToolResult};

const DEFAULT_DEPTH: usize = 2;
const DEFAULT_LIMIT: usize = 1000;
const MAX_LIMIT: usize = 10_000;

/// Extra ignore-file names honored alongside `.gitignore` and the built-in
/// `ignore` crate defaults (spec §4.3's `ls` contract).
const EXTRA_IGNORE_FILES: &[&str] = &[".crushignore"];

pub struct ListTool;

#[derive(Deserialize)]
struct Params {
    path: String,
    #[serde(default)]
    depth: Option<usize>,
    #[serde(default)]
    limit: Option<usize>,
}

struct Entry {
    display_path: String,
    is_dir: bool,
}

#[async_trait]
impl Tool for ListTool {
    fn name(&self) -> &str {
        "ls"
    }

    fn description(&self) -> &str {
        "List directory contents recursively. Shows files and subdirectories with tree structure. Use depth to control recursion (default 2) and limit to cap entries (default 1000)."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "The directory path to list"
                },
                "depth": {
                    "type": "number",
                    "description": "Maximum recursion depth (default: 2)"
                },
                "limit": {
                    "type": "number",
                    "description": "Maximum number of entries to return (default: 1000)"
                }
            },
            "required": ["path"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> ToolResult {
        let params = match parse_params::<Params>(params) {
            Ok(p) => p,
            Err(e) => return e,
        };

        let max_depth = params.depth.unwrap_or(DEFAULT_DEPTH);
        let limit = params.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT);

        let path = match ctx.sandboxed_resolve(&params.path) {
            Ok(p) => p,
            Err(e) => {
                let fallback = ctx.resolve_path(&params.path);
                if !fallback.exists() {
                    return ToolResult::error(format!("Directory not found: {}", params.path));
                }
                return ToolResult::error(e);
            }
        };

        if !path.is_dir() {
            return ToolResult::error(format!("Path is not a directory: {}", path.display()));
        }

        // WalkBuilder honors .gitignore, .git/info/exclude, and a global
        // ignore file out of the box; add the project's `.crushignore` on
        // top and walk breadth-first up to `max_depth`, sorted
        // directories-first then case-insensitively within each directory.
        let mut walker = WalkBuilder::new(&path);
        walker
            .max_depth(Some(max_depth + 1))
            .hidden(true)
            .standard_filters(true)
            .sort_by_file_name(|a, b| a.to_string_lossy().to_lowercase().cmp(&b.to_string_lossy().to_lowercase()));
        for name in EXTRA_IGNORE_FILES {
            walker.add_custom_ignore_filename(name);
        }

        let mut entries: Vec<Entry> = Vec::new();
        for result in walker.build() {
            if entries.len() >= limit {
                break;
            }
            let dirent = match result {
                Ok(d) => d,
                Err(_) => continue,
            };
            let entry_path = dirent.path();
            if entry_path == path {
                continue;
            }
            let is_dir = dirent.file_type().map(|ft| ft.is_dir()).unwrap_or(false);
            let relative = entry_path
                .strip_prefix(&path)
                .unwrap_or(entry_path)
                .to_string_lossy()
                .to_string();
            let display = if is_dir {
                format!("{}/", relative)
            } else {
                relative
            };
            entries.push(Entry {
                display_path: display,
                is_dir,
            });
        }

        let total = entries.len();
        let dir_count = entries.iter().filter(|e| e.is_dir).count();
        let file_count = total - dir_count;

        let listing: Vec<String> = entries.iter().map(|e| e.display_path.clone()).collect();
        let output_text = listing.join("\n");

        ToolResult::success_data(json!({
            "output": output_text,
            "total_entries": total,
            "directories": dir_count,
            "files": file_count,
            "truncated": total >= limit
        }))
    }
}
