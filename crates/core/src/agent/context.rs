//! System prompt assembly and the auto-summarize token estimate (spec
//! §4.7 step 2 and §9's resolved Open Question).
//!
//! Grounded in the teacher's `agent/context.rs::build_project_context`
//! (scan well-known instruction files and prepend their contents as system
//! messages) generalized to spec's `AgentProfile::context_paths` — an
//! explicit, ordered file list rather than a fixed scan order — with the
//! scan kept as a fallback for profiles that don't configure one.

use std::path::{Path, PathBuf};

/// Instruction files scanned, in priority order, when an agent profile
/// doesn't configure explicit `context_paths`.
const PROJECT_FILES: &[&str] = &[
    "AGENTS.md",
    "agents.md",
    "CLAUDE.md",
    "claude.md",
    ".cursorrules",
    ".windsurfrules",
    ".clinerules",
    ".github/copilot-instructions.md",
];

/// Build the system-prompt prefix: the agent profile's configured
/// `context_paths`, read in order and concatenated; falls back to scanning
/// [`PROJECT_FILES`] for the first match when none are configured.
pub fn build_context_prefix(working_dir: &Path, context_paths: &[PathBuf]) -> String {
    if !context_paths.is_empty() {
        return context_paths
            .iter()
            .filter_map(|path| {
                let resolved = if path.is_absolute() {
                    path.clone()
                } else {
                    working_dir.join(path)
                };
                std::fs::read_to_string(&resolved).ok().map(|content| {
                    format!(
                        "[PROJECT INSTRUCTIONS - {}]\n\n{}\n\n[END PROJECT INSTRUCTIONS]",
                        path.display(),
                        content
                    )
                })
            })
            .collect::<Vec<_>>()
            .join("\n\n");
    }

    for filename in PROJECT_FILES {
        let path = working_dir.join(filename);
        if let Ok(content) = std::fs::read_to_string(&path) {
            return format!(
                "[PROJECT INSTRUCTIONS - {}]\n\n{}\n\n[END PROJECT INSTRUCTIONS]",
                filename, content
            );
        }
    }

    String::new()
}

/// Estimate a prompt's token count as `word_count * 1.3` (spec §9's
/// resolved Open Question: a heuristic, not a real tokenizer, since none of
/// this crate's dependencies ship one and spec.md explicitly suggests this
/// estimate as sufficient for the auto-summarize trigger).
pub fn estimate_tokens(text: &str) -> usize {
    let words = text.split_whitespace().count();
    ((words as f64) * 1.3).ceil() as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn estimate_tokens_applies_the_1_3_factor() {
        assert_eq!(estimate_tokens("one two three four five"), 7);
    }

    #[test]
    fn estimate_tokens_of_empty_text_is_zero() {
        assert_eq!(estimate_tokens(""), 0);
    }

    #[test]
    fn explicit_context_paths_take_priority_over_scan() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("CLAUDE.md"), "scanned").unwrap();
        std::fs::write(dir.path().join("notes.md"), "explicit").unwrap();

        let prefix = build_context_prefix(dir.path(), &[PathBuf::from("notes.md")]);
        assert!(prefix.contains("explicit"));
        assert!(!prefix.contains("scanned"));
    }

    #[test]
    fn falls_back_to_scanning_well_known_files() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("AGENTS.md"), "from agents file").unwrap();

        let prefix = build_context_prefix(dir.path(), &[]);
        assert!(prefix.contains("from agents file"));
    }

    #[test]
    fn no_context_paths_and_no_scan_hit_is_empty() {
        let dir = tempdir().unwrap();
        assert_eq!(build_context_prefix(dir.path(), &[]), "");
    }
}
