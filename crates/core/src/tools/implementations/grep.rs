//! Grep tool - Regex content search with line numbers (spec §4.3).
//!
//! Walks the tree with `ignore::WalkBuilder` (honoring `.gitignore` and the
//! same `.crushignore` convention as `ls`) and matches each file's lines
//! against a compiled regex. Compiled patterns are cached so repeated
//! searches for the same regex across a session skip recompilation.

use async_trait::async_trait;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;

use crate::tools::registry::Tool;
use crate::tools::{parse_params, ToolContext, ToolResult};

const DEFAULT_LIMIT: usize = 200;
const MAX_LIMIT: usize = 2000;
const MAX_FILE_BYTES: usize = 5_000_000;

static REGEX_CACHE: Lazy<DashMap<String, Arc<Regex>>> = Lazy::new(DashMap::new);

fn compile(pattern: &str, literal: bool) -> Result<Arc<Regex>, String> {
    let key = format!("{}\0{}", literal, pattern);
    if let Some(cached) = REGEX_CACHE.get(&key) {
        return Ok(Arc::clone(&cached));
    }

    let source = if literal {
        regex::escape(pattern)
    } else {
        pattern.to_string()
    };

    let re = Arc::new(Regex::new(&source).map_err(|e| format!("Invalid regex: {}", e))?);
    REGEX_CACHE.insert(key, Arc::clone(&re));
    Ok(re)
}

pub struct GrepTool;

#[derive(Deserialize)]
struct Params {
    regex: String,
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    include: Option<String>,
    #[serde(default)]
    literal_text: Option<bool>,
    #[serde(default)]
    limit: Option<usize>,
}

struct Hit {
    file: String,
    line_number: usize,
    line: String,
}

#[async_trait]
impl Tool for GrepTool {
    fn name(&self) -> &str {
        "grep"
    }

    fn description(&self) -> &str {
        "Search file contents with a regex, returning matching lines with file path and line number. Honors .gitignore."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "regex": {
                    "type": "string",
                    "description": "Regular expression to search for"
                },
                "path": {
                    "type": "string",
                    "description": "Directory or file to search within (default: working directory)"
                },
                "include": {
                    "type": "string",
                    "description": "Glob pattern restricting which files are searched, e.g. '*.rs'"
                },
                "literal_text": {
                    "type": "boolean",
                    "description": "Treat `regex` as a literal string instead of a pattern"
                },
                "limit": {
                    "type": "number",
                    "description": "Maximum number of matching lines to return (default: 200)"
                }
            },
            "required": ["regex"],
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

        if !base.exists() {
            return ToolResult::error(format!("Path not found: {}", base.display()));
        }

        let regex = match compile(&params.regex, params.literal_text.unwrap_or(false)) {
            Ok(r) => r,
            Err(e) => return ToolResult::invalid_parameters(e),
        };

        let include = match &params.include {
            Some(pattern) => match glob::Pattern::new(pattern) {
                Ok(p) => Some(p),
                Err(e) => return ToolResult::invalid_parameters(format!("Invalid include pattern: {}", e)),
            },
            None => None,
        };

        let limit = params.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT);
        let base_clone = base.clone();
        let regex_clone = Arc::clone(&regex);

        let hits = tokio::task::spawn_blocking(move || {
            search_tree(&base_clone, &regex_clone, include.as_ref(), limit)
        })
        .await
        .unwrap_or_default();

        let total = hits.len();
        let results: Vec<Value> = hits
            .iter()
            .take(limit)
            .map(|h| {
                json!({
                    "file": h.file,
                    "line_number": h.line_number,
                    "line": h.line
                })
            })
            .collect();

        ToolResult::success_data(json!({
            "matches": results,
            "total_matches": total,
            "truncated": total > limit
        }))
    }
}

fn search_tree(base: &Path, regex: &Regex, include: Option<&glob::Pattern>, limit: usize) -> Vec<Hit> {
    let mut hits = Vec::new();

    if base.is_file() {
        search_file(base, regex, &mut hits, limit);
        return hits;
    }

    let walker = ignore::WalkBuilder::new(base)
        .hidden(false)
        .standard_filters(true)
        .add_custom_ignore_filename(".crushignore")
        .build();

    for entry in walker.flatten() {
        if hits.len() >= limit {
            break;
        }
        if !entry.file_type().map(|ft| ft.is_file()).unwrap_or(false) {
            continue;
        }
        let path = entry.path();
        if let Some(pattern) = include {
            let name = path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
            if !pattern.matches(&name) {
                continue;
            }
        }
        search_file(path, regex, &mut hits, limit);
    }

    hits
}

fn search_file(path: &Path, regex: &Regex, hits: &mut Vec<Hit>, limit: usize) {
    let Ok(metadata) = std::fs::metadata(path) else {
        return;
    };
    if metadata.len() as usize > MAX_FILE_BYTES {
        return;
    }

    let Ok(content) = std::fs::read_to_string(path) else {
        return;
    };

    for (idx, line) in content.lines().enumerate() {
        if hits.len() >= limit {
            break;
        }
        if regex.is_match(line) {
            hits.push(Hit {
                file: path.display().to_string(),
                line_number: idx + 1,
                line: line.to_string(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compile_caches_identical_patterns() {
        let a = compile("foo.*bar", false).unwrap();
        let b = compile("foo.*bar", false).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn literal_mode_escapes_special_characters() {
        let re = compile("a.b", true).unwrap();
        assert!(re.is_match("a.b"));
        assert!(!re.is_match("aXb"));
    }
}
