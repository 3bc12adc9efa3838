//! Recursive banned-command scanner for the `bash` tool (spec §4.3, §8
//! testable property 9).
//!
//! Grounded on `agent/hooks.rs::SafetyHook`'s banned-verb list, kept
//! unchanged here, but reimplemented as a parse-aware scanner instead of a
//! flat substring match: `echo $(sudo id)`, `bash -c 'sudo id'`,
//! `if true; then sudo id; fi`, and pipelines must all be caught, which a
//! single substring check on the raw command string already does for the
//! simple cases but a quoted/escaped banned verb inside a string literal
//! must NOT be caught (it's just text, not a command). We split on shell
//! metacharacters and recurse into `$(...)`, backticks, and the argument
//! list of shells that accept `-c`.

use shell_words::split as shell_split;

/// Verbs that are never allowed to run, regardless of where they appear in
/// the parsed command tree.
pub const BANNED_VERBS: &[&str] = &[
    "sudo", "su", "doas", "pkexec", "shutdown", "reboot", "halt", "poweroff", "mkfs", "dd",
];

/// Result of scanning a command for banned verbs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanResult {
    Allowed,
    Blocked { verb: String },
}

/// Scan `command` for any banned verb appearing anywhere in its parsed
/// command tree: top-level words, `$(...)`/backtick substitutions, pipeline
/// stages, `;`/`&&`/`||`-separated statements, and the command string
/// passed to `sh -c` / `bash -c` / `zsh -c`.
pub fn scan(command: &str) -> ScanResult {
    scan_recursive(command, 0)
}

fn scan_recursive(command: &str, depth: usize) -> ScanResult {
    // Recursion guard: a pathological nesting of substitutions shouldn't
    // blow the stack; anything this deep is already suspicious enough to
    // scan no further and pass through to the outer segmenter's verdict.
    if depth > 16 {
        return ScanResult::Allowed;
    }

    for segment in split_statements(command) {
        if let ScanResult::Blocked { verb } = scan_statement(&segment, depth) {
            return ScanResult::Blocked { verb };
        }
    }

    ScanResult::Allowed
}

/// Split on `;`, `&&`, `||`, and `|`, respecting single/double quotes so we
/// don't split inside a quoted string. Each resulting segment is itself
/// recursively scanned.
fn split_statements(command: &str) -> Vec<String> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut in_single = false;
    let mut in_double = false;
    let mut escaped = false;
    let mut chars = command.chars().peekable();

    while let Some(ch) = chars.next() {
        if escaped {
            current.push(ch);
            escaped = false;
            continue;
        }

        match ch {
            '\\' if !in_single => {
                current.push(ch);
                escaped = true;
            }
            '\'' if !in_double => {
                in_single = !in_single;
                current.push(ch);
            }
            '"' if !in_single => {
                in_double = !in_double;
                current.push(ch);
            }
            ';' | '&' | '|' if !in_single && !in_double => {
                // consume a doubled operator (&&, ||) as one separator
                if matches!(ch, '&' | '|') && chars.peek() == Some(&ch) {
                    chars.next();
                }
                segments.push(std::mem::take(&mut current));
            }
            _ => current.push(ch),
        }
    }
    segments.push(current);
    segments
}

fn scan_statement(statement: &str, depth: usize) -> ScanResult {
    if let Some(result) = scan_substitutions(statement, depth) {
        if matches!(result, ScanResult::Blocked { .. }) {
            return result;
        }
    }

    let words = match shell_split(&strip_substitutions(statement)) {
        Ok(w) => w,
        Err(_) => statement
            .split_whitespace()
            .map(str::to_string)
            .collect(),
    };

    scan_words(&words, depth)
}

/// Find every `$(...)` and backtick-delimited substitution in `statement`
/// and recursively scan its contents.
fn scan_substitutions(statement: &str, depth: usize) -> Option<ScanResult> {
    let bytes = statement.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' && i + 1 < bytes.len() && bytes[i + 1] == b'(' {
            if let Some(end) = matching_paren(statement, i + 1) {
                let inner = &statement[i + 2..end];
                if let ScanResult::Blocked { verb } = scan_recursive(inner, depth + 1) {
                    return Some(ScanResult::Blocked { verb });
                }
                i = end + 1;
                continue;
            }
        }
        if bytes[i] == b'`' {
            if let Some(end) = statement[i + 1..].find('`').map(|p| p + i + 1) {
                let inner = &statement[i + 1..end];
                if let ScanResult::Blocked { verb } = scan_recursive(inner, depth + 1) {
                    return Some(ScanResult::Blocked { verb });
                }
                i = end + 1;
                continue;
            }
        }
        i += 1;
    }
    None
}

fn matching_paren(s: &str, open_idx: usize) -> Option<usize> {
    let mut depth = 0i32;
    for (i, ch) in s.char_indices().skip(open_idx) {
        match ch {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Remove `$(...)`/backtick spans so the remaining top-level words can be
/// tokenized without the substitution's contents confusing word-splitting.
fn strip_substitutions(statement: &str) -> String {
    let mut out = String::new();
    let bytes = statement.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' && i + 1 < bytes.len() && bytes[i + 1] == b'(' {
            if let Some(end) = matching_paren(statement, i + 1) {
                i = end + 1;
                continue;
            }
        }
        if bytes[i] == b'`' {
            if let Some(end) = statement[i + 1..].find('`').map(|p| p + i + 1) {
                i = end + 1;
                continue;
            }
        }
        out.push(statement[i..].chars().next().unwrap());
        i += statement[i..].chars().next().unwrap().len_utf8();
    }
    out
}

/// Scan a flat word list for a banned verb at the "command position":
/// either the first word, or the word right after `if`/`then`/`else`/`do`
/// (control-flow keywords don't themselves count as a command), and recurse
/// into `sh -c` / `bash -c` / `zsh -c`'s trailing script argument.
fn scan_words(words: &[String], depth: usize) -> ScanResult {
    const CONTROL_KEYWORDS: &[&str] = &["if", "then", "else", "elif", "do", "while", "until"];

    let mut i = 0;
    while i < words.len() {
        let word = words[i].trim_start_matches(['(', '{']);
        if CONTROL_KEYWORDS.contains(&word) {
            i += 1;
            continue;
        }

        if let Some(verb) = BANNED_VERBS.iter().find(|v| **v == word) {
            return ScanResult::Blocked {
                verb: verb.to_string(),
            };
        }

        if matches!(word, "sh" | "bash" | "zsh" | "dash") {
            if let Some(c_pos) = words[i + 1..].iter().position(|w| w == "-c") {
                if let Some(script) = words.get(i + 1 + c_pos + 1) {
                    if let ScanResult::Blocked { verb } = scan_recursive(script, depth + 1) {
                        return ScanResult::Blocked { verb };
                    }
                }
            }
        }

        // Only the first non-keyword word of a statement is a command
        // position; remaining words are arguments (except the `-c` case
        // handled above, which looks ahead explicitly).
        break;
    }

    ScanResult::Allowed
}

/// Verbs (and, for a couple, specific leading arguments) known to be
/// read-only, used by the permission broker's call site to skip prompting
/// for `bash` invocations that can't mutate the workspace (spec §4.3: "Read
/// -only commands (ls, git status, go test, …) skip permission").
///
/// Intentionally conservative: only the top-level command word is
/// inspected, so `git status && rm -rf .` is NOT read-only (the `&&`
/// produces a second statement, which `is_read_only_command` does not
/// special-case — callers should prefer [`scan`] plus this check together,
/// never this check alone, when the command has more than one statement).
const READ_ONLY_VERBS: &[&str] = &["ls", "cat", "pwd", "echo", "which", "head", "tail", "wc", "file"];

/// Returns true if every statement in `command` begins with a read-only
/// verb (or `git`/`go`/`cargo`/`npm` followed by a known read-only
/// subcommand).
pub fn is_read_only_command(command: &str) -> bool {
    split_statements(command).iter().all(|stmt| {
        let words = shell_split(&strip_substitutions(stmt)).unwrap_or_default();
        let Some(first) = words.first() else {
            return true;
        };
        match first.as_str() {
            v if READ_ONLY_VERBS.contains(&v) => true,
            "git" => matches!(
                words.get(1).map(String::as_str),
                Some("status") | Some("diff") | Some("log") | Some("show") | Some("branch")
            ),
            "go" => matches!(words.get(1).map(String::as_str), Some("test") | Some("vet")),
            "cargo" => matches!(
                words.get(1).map(String::as_str),
                Some("test") | Some("check") | Some("clippy")
            ),
            "npm" | "bun" | "yarn" | "pnpm" => matches!(words.get(1).map(String::as_str), Some("test")),
            _ => false,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blocked(cmd: &str) -> bool {
        matches!(scan(cmd), ScanResult::Blocked { .. })
    }

    #[test]
    fn allows_plain_commands() {
        assert!(!blocked("ls -la"));
        assert!(!blocked("git status"));
        assert!(!blocked("echo hello"));
    }

    #[test]
    fn blocks_direct_banned_verb() {
        assert!(blocked("sudo id"));
    }

    #[test]
    fn blocks_inside_command_substitution() {
        assert!(blocked("echo $(sudo id)"));
        assert!(blocked("echo `sudo id`"));
    }

    #[test]
    fn blocks_inside_sh_c() {
        assert!(blocked("bash -c 'sudo id'"));
        assert!(blocked("sh -c \"sudo id\""));
    }

    #[test]
    fn blocks_inside_if_statement() {
        assert!(blocked("if true; then sudo id; fi"));
    }

    #[test]
    fn blocks_inside_pipeline() {
        assert!(blocked("echo hi | sudo tee /etc/passwd"));
    }

    #[test]
    fn blocks_second_statement_after_semicolon() {
        assert!(blocked("echo hi; sudo id"));
    }

    #[test]
    fn blocks_second_statement_after_and() {
        assert!(blocked("echo hi && sudo id"));
    }

    #[test]
    fn does_not_block_banned_word_in_quoted_string() {
        // "sudo" appears only as quoted text passed to `echo`, not as a
        // command in its own right.
        assert!(!blocked("echo 'do not run sudo here'"));
    }

    #[test]
    fn read_only_detects_known_verbs() {
        assert!(is_read_only_command("git status"));
        assert!(is_read_only_command("go test ./..."));
        assert!(is_read_only_command("ls -la"));
    }

    #[test]
    fn read_only_rejects_mutating_commands() {
        assert!(!is_read_only_command("rm -rf ."));
        assert!(!is_read_only_command("git status && rm -rf ."));
    }
}
