//! Safe code runner seam.
//!
//! The server treats code execution as an opaque collaborator behind the
//! [`CodeRunner`] trait. The default [`LocalProcessRunner`] shells out to the
//! language interpreter with a deadline and output caps; deployments wanting
//! container isolation implement the trait over their sandbox of choice.

use crate::error::{HiveError, HiveResult};
use async_trait::async_trait;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio::process::Command;

/// Languages the sandbox endpoint accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SandboxLanguage {
    Python,
    Javascript,
    Shell,
}

impl SandboxLanguage {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "python" | "python3" | "py" => Some(SandboxLanguage::Python),
            "javascript" | "js" | "node" => Some(SandboxLanguage::Javascript),
            "shell" | "sh" | "bash" => Some(SandboxLanguage::Shell),
            _ => None,
        }
    }

    /// Interpreter command plus the flag that takes inline code.
    fn command(&self) -> (&'static str, &'static str) {
        match self {
            SandboxLanguage::Python => ("python3", "-c"),
            SandboxLanguage::Javascript => ("node", "-e"),
            SandboxLanguage::Shell => ("sh", "-c"),
        }
    }
}

/// Captured output of one sandbox run.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub duration_ms: u64,
}

impl RunOutput {
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "stdout": self.stdout,
            "stderr": self.stderr,
            "exit_code": self.exit_code,
            "duration_ms": self.duration_ms,
            "success": self.exit_code == 0,
        })
    }
}

/// Executes untrusted code snippets.
#[async_trait]
pub trait CodeRunner: Send + Sync {
    async fn run(
        &self,
        code: &str,
        language: SandboxLanguage,
        timeout_secs: u64,
    ) -> HiveResult<RunOutput>;
}

/// Default runner: interpreter subprocess with a deadline, scoped to a
/// working directory. No container isolation.
pub struct LocalProcessRunner {
    workdir: PathBuf,
    max_timeout_secs: u64,
}

impl LocalProcessRunner {
    pub fn new(workdir: PathBuf) -> Self {
        Self {
            workdir,
            max_timeout_secs: 60,
        }
    }
}

const MAX_SANDBOX_OUTPUT: usize = 64 * 1024;

fn cap_output(raw: Vec<u8>) -> String {
    let mut text = String::from_utf8_lossy(&raw).to_string();
    if text.len() > MAX_SANDBOX_OUTPUT {
        text.truncate(MAX_SANDBOX_OUTPUT);
        text.push_str("\n[output truncated]");
    }
    text
}

#[async_trait]
impl CodeRunner for LocalProcessRunner {
    async fn run(
        &self,
        code: &str,
        language: SandboxLanguage,
        timeout_secs: u64,
    ) -> HiveResult<RunOutput> {
        let timeout_secs = timeout_secs.clamp(1, self.max_timeout_secs);
        let (program, flag) = language.command();

        let started = Instant::now();
        let child = Command::new(program)
            .arg(flag)
            .arg(code)
            .current_dir(&self.workdir)
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(Duration::from_secs(timeout_secs), child).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(HiveError::internal(format!(
                    "cannot spawn {}: {}",
                    program, e
                )))
            }
            Err(_) => {
                return Err(HiveError::timeout(format!(
                    "execution exceeded {}s",
                    timeout_secs
                )))
            }
        };

        Ok(RunOutput {
            stdout: cap_output(output.stdout),
            stderr: cap_output(output.stderr),
            exit_code: output.status.code().unwrap_or(-1),
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn language_parsing() {
        assert_eq!(SandboxLanguage::parse("python"), Some(SandboxLanguage::Python));
        assert_eq!(SandboxLanguage::parse("JS"), Some(SandboxLanguage::Javascript));
        assert_eq!(SandboxLanguage::parse("bash"), Some(SandboxLanguage::Shell));
        assert_eq!(SandboxLanguage::parse("cobol"), None);
    }

    #[tokio::test]
    async fn shell_runs_and_captures_output() {
        let dir = TempDir::new().unwrap();
        let runner = LocalProcessRunner::new(dir.path().to_path_buf());
        let output = runner
            .run("echo sandboxed", SandboxLanguage::Shell, 10)
            .await
            .unwrap();
        assert_eq!(output.exit_code, 0);
        assert!(output.stdout.contains("sandboxed"));
    }

    #[tokio::test]
    async fn nonzero_exit_is_reported_not_errored() {
        let dir = TempDir::new().unwrap();
        let runner = LocalProcessRunner::new(dir.path().to_path_buf());
        let output = runner
            .run("exit 7", SandboxLanguage::Shell, 10)
            .await
            .unwrap();
        assert_eq!(output.exit_code, 7);
        assert_eq!(output.to_json()["success"], false);
    }
}
