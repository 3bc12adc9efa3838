//! A single process-global shell session (spec §4.3/§4.4): the `bash` tool's
//! working directory and exported environment survive between calls, the
//! same way a real interactive shell would, without requiring one
//! long-lived child process to stay alive for the whole run (which would
//! need its own liveness/zombie-reaping story). Every invocation instead
//! appends an epilogue to the caller's command that re-prints `$PWD` and
//! `env` behind sentinel markers; the caller strips that epilogue out of
//! the raw output stream before it reaches the model or the user, and feeds
//! it to [`PersistentShell::finish`] to update the persisted state. The
//! next call starts its child process with that cwd/env applied directly
//! via `Command::current_dir`/`Command::envs`, so there is no export/cd
//! prologue to re-quote.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::sync::Mutex;

pub const CWD_MARKER: &str = "\u{1}AGENTCORE_CWD\u{1}";
pub const ENV_MARKER: &str = "\u{1}AGENTCORE_ENV\u{1}";
pub const END_MARKER: &str = "\u{1}AGENTCORE_END\u{1}";

struct ShellState {
    cwd: PathBuf,
    env: HashMap<String, String>,
}

pub struct PersistentShell {
    state: Mutex<ShellState>,
}

pub struct RawExec {
    pub stdout: String,
    pub stderr: String,
}

impl PersistentShell {
    pub fn new(working_dir: PathBuf) -> Self {
        Self {
            state: Mutex::new(ShellState {
                cwd: working_dir,
                env: HashMap::new(),
            }),
        }
    }

    /// Current persisted working directory and exported environment,
    /// snapshotted for the caller to apply to its own `Command`.
    pub async fn snapshot(&self) -> (PathBuf, HashMap<String, String>) {
        let guard = self.state.lock().await;
        (guard.cwd.clone(), guard.env.clone())
    }

    pub async fn cwd(&self) -> PathBuf {
        self.state.lock().await.cwd.clone()
    }

    /// Shell fragment appended after the caller's command that re-captures
    /// `$PWD` and the exported environment behind sentinel markers. Exits
    /// with the original command's status so the caller still sees the real
    /// exit code.
    pub fn epilogue_script() -> String {
        format!(
            "\n__agentcore_status=$?\nprintf '%s%s\\n' '{CWD_MARKER}' \"$PWD\"\nprintf '%s' '{ENV_MARKER}'\nenv\nprintf '%s%s\\n' '{END_MARKER}' \"$__agentcore_status\"\nexit $__agentcore_status\n"
        )
    }

    /// Parse a captured epilogue (the marker-delimited lines stripped out of
    /// the raw stdout stream by the caller) and update persisted state.
    /// Returns whatever text preceded the first marker, for callers that
    /// pass the full untouched combined output instead of a pre-stripped
    /// epilogue.
    pub async fn finish(&self, raw_stdout: String) -> String {
        let Some(cwd_pos) = raw_stdout.find(CWD_MARKER) else {
            return raw_stdout;
        };
        let user_output = raw_stdout[..cwd_pos].to_string();

        let after_cwd = &raw_stdout[cwd_pos + CWD_MARKER.len()..];
        let Some(newline) = after_cwd.find('\n') else {
            return user_output;
        };
        let new_cwd = after_cwd[..newline].trim().to_string();
        let after_cwd_line = &after_cwd[newline + 1..];

        let Some(env_pos) = after_cwd_line.find(ENV_MARKER) else {
            return user_output;
        };
        let after_env = &after_cwd_line[env_pos + ENV_MARKER.len()..];
        let env_block = match after_env.find(END_MARKER) {
            Some(end_pos) => &after_env[..end_pos],
            None => after_env,
        };

        let mut env = HashMap::new();
        for line in env_block.lines() {
            if let Some((key, val)) = line.split_once('=') {
                env.insert(key.to_string(), val.to_string());
            }
        }

        let mut guard = self.state.lock().await;
        if !new_cwd.is_empty() {
            guard.cwd = PathBuf::from(new_cwd);
        }
        guard.env = env;

        user_output
    }

    /// One-shot helper for callers that don't need the bounded-buffer
    /// streaming path (tests, and any future non-interactive invocation):
    /// run `command` to completion through this shell's persisted cwd/env
    /// and return its own stdout/stderr, with shell state updated as a side
    /// effect.
    pub async fn exec_simple(&self, command: &str) -> std::io::Result<RawExec> {
        let (cwd, env) = self.snapshot().await;
        let script = format!("{command}{}", Self::epilogue_script());

        let mut cmd = if cfg!(windows) {
            let mut c = Command::new("cmd");
            c.arg("/C").arg(&script);
            c
        } else {
            let mut c = Command::new("sh");
            c.arg("-c").arg(&script);
            c
        };
        cmd.current_dir(&cwd);
        cmd.envs(&env);
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

        let mut child = cmd.spawn()?;
        let mut stdout = String::new();
        let mut stderr = String::new();
        if let Some(mut out) = child.stdout.take() {
            out.read_to_string(&mut stdout).await?;
        }
        if let Some(mut err) = child.stderr.take() {
            err.read_to_string(&mut stderr).await?;
        }
        child.wait().await?;
        let cleaned = self.finish(stdout).await;
        Ok(RawExec {
            stdout: cleaned,
            stderr,
        })
    }
}

/// Resolve a relative path against the shell's *current* working directory
/// rather than the process-startup one, so tools called right after a `cd`
/// observe the right location.
pub fn resolve_against(cwd: &Path, path: &str) -> PathBuf {
    let p = PathBuf::from(path);
    if p.is_absolute() {
        p
    } else {
        cwd.join(p)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cwd_persists_across_calls() {
        let shell = PersistentShell::new(std::env::temp_dir());
        let tmp = std::env::temp_dir();
        let sub = tmp.join("agentcore_shell_test_dir");
        let _ = std::fs::create_dir_all(&sub);

        shell
            .exec_simple(&format!("cd {}", sub.display()))
            .await
            .unwrap();
        let cwd = shell.cwd().await;
        assert_eq!(cwd, sub.canonicalize().unwrap_or(sub));
    }

    #[tokio::test]
    async fn exported_var_persists_across_calls() {
        let shell = PersistentShell::new(std::env::temp_dir());
        shell
            .exec_simple("export AGENTCORE_TEST_VAR=hello")
            .await
            .unwrap();
        let result = shell.exec_simple("echo $AGENTCORE_TEST_VAR").await.unwrap();
        assert_eq!(result.stdout.trim(), "hello");
    }
}
