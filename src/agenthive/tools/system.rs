//! System tools: `bash`, `process_list`, `system_info`.
//!
//! `bash` is the one dangerous tool in the catalog: it refuses a small
//! denylist of destructive patterns outright and enforces a timeout, but is
//! otherwise unrestricted. Only agents whose role includes system control
//! (`executor`, `security`, `consultant`) ever see this family.

use crate::error::HiveResult;
use crate::tool_protocol::{
    SideEffect, ToolFamily, ToolHandler, ToolMetadata, ToolParameter, ToolParameterType,
    ToolRegistry, ToolResult,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::process::Command;

/// Command substrings refused without execution.
const DENIED_PATTERNS: [&str; 8] = [
    "rm -rf /",
    "rm -rf /*",
    "mkfs",
    "dd if=",
    ":(){ :|:& };:",
    "shutdown",
    "reboot",
    "> /dev/sda",
];

/// Per-command deadline default; callers may lower it, never raise it past
/// the registry's own per-tool cap.
const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 20;
const MAX_COMMAND_TIMEOUT_SECS: u64 = 28;

/// Cap on captured output per stream.
const MAX_OUTPUT_BYTES: usize = 64 * 1024;

fn truncate_output(raw: Vec<u8>) -> String {
    let mut text = String::from_utf8_lossy(&raw).to_string();
    if text.len() > MAX_OUTPUT_BYTES {
        text.truncate(MAX_OUTPUT_BYTES);
        text.push_str("\n[output truncated]");
    }
    text
}

async fn bash_impl(params: &serde_json::Value) -> HiveResult<ToolResult> {
    let command = match params.get("command").and_then(|v| v.as_str()) {
        Some(c) => c.to_string(),
        None => return Ok(ToolResult::failure("missing required parameter: command")),
    };

    for pattern in DENIED_PATTERNS.iter() {
        if command.contains(pattern) {
            return Ok(ToolResult::failure(format!(
                "refused: command matches denied pattern '{}'",
                pattern
            )));
        }
    }

    let timeout_secs = params
        .get("timeout")
        .and_then(|v| v.as_u64())
        .unwrap_or(DEFAULT_COMMAND_TIMEOUT_SECS)
        .min(MAX_COMMAND_TIMEOUT_SECS);

    let started = Instant::now();
    let child = Command::new("/bin/bash")
        .arg("-c")
        .arg(&command)
        .kill_on_drop(true)
        .output();

    match tokio::time::timeout(Duration::from_secs(timeout_secs), child).await {
        Ok(Ok(output)) => {
            let duration_ms = started.elapsed().as_millis() as u64;
            let exit_code = output.status.code().unwrap_or(-1);
            Ok(ToolResult {
                success: output.status.success(),
                output: serde_json::json!({
                    "stdout": truncate_output(output.stdout),
                    "stderr": truncate_output(output.stderr),
                    "exit_code": exit_code,
                }),
                error: if output.status.success() {
                    None
                } else {
                    Some(format!("exit code {}", exit_code))
                },
                metadata: std::iter::once((
                    "duration_ms".to_string(),
                    serde_json::json!(duration_ms),
                ))
                .collect(),
            })
        }
        Ok(Err(e)) => Ok(ToolResult::failure(format!("spawn failed: {}", e))),
        Err(_) => Ok(ToolResult::failure(format!(
            "command timed out after {}s",
            timeout_secs
        ))),
    }
}

async fn process_list_impl(params: &serde_json::Value) -> HiveResult<ToolResult> {
    let filter = params
        .get("filter")
        .and_then(|v| v.as_str())
        .map(|s| s.to_lowercase());

    let output = match Command::new("ps").arg("aux").output().await {
        Ok(output) => output,
        Err(e) => return Ok(ToolResult::failure(format!("ps failed: {}", e))),
    };
    let text = String::from_utf8_lossy(&output.stdout);
    let lines: Vec<&str> = match &filter {
        Some(f) => text
            .lines()
            .filter(|line| line.to_lowercase().contains(f))
            .take(50)
            .collect(),
        None => text.lines().take(50).collect(),
    };
    Ok(ToolResult::success(serde_json::json!({
        "processes": lines,
        "count": lines.len(),
    })))
}

async fn system_info_impl(_params: &serde_json::Value) -> HiveResult<ToolResult> {
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(0);
    let mem_total_kb = std::fs::read_to_string("/proc/meminfo")
        .ok()
        .and_then(|text| {
            text.lines()
                .find(|l| l.starts_with("MemTotal:"))
                .and_then(|l| l.split_whitespace().nth(1))
                .and_then(|v| v.parse::<u64>().ok())
        })
        .unwrap_or(0);
    Ok(ToolResult::success(serde_json::json!({
        "os": std::env::consts::OS,
        "arch": std::env::consts::ARCH,
        "cpus": cpus,
        "mem_total_kb": mem_total_kb,
    })))
}

/// Register the `system` family.
pub fn register(registry: &mut ToolRegistry) -> HiveResult<()> {
    let handler: ToolHandler =
        Arc::new(move |params| Box::pin(async move { bash_impl(&params).await }));
    registry.register(
        ToolMetadata::new(
            "bash",
            "Run a shell command and capture its output",
            ToolFamily::System,
            SideEffect::Dangerous,
        )
        .with_parameter(
            ToolParameter::new("command", ToolParameterType::String)
                .with_description("Shell command line")
                .required(),
        )
        .with_parameter(
            ToolParameter::new("timeout", ToolParameterType::Integer)
                .with_description("Seconds before the command is killed (default 20)"),
        ),
        handler,
    )?;

    let handler: ToolHandler =
        Arc::new(move |params| Box::pin(async move { process_list_impl(&params).await }));
    registry.register(
        ToolMetadata::new(
            "process_list",
            "List running processes, optionally filtered",
            ToolFamily::System,
            SideEffect::ExternalIo,
        )
        .with_parameter(
            ToolParameter::new("filter", ToolParameterType::String)
                .with_description("Case-insensitive substring filter"),
        ),
        handler,
    )?;

    let handler: ToolHandler =
        Arc::new(move |params| Box::pin(async move { system_info_impl(&params).await }));
    registry.register(
        ToolMetadata::new(
            "system_info",
            "Report OS, CPU, and memory information",
            ToolFamily::System,
            SideEffect::ReadOnly,
        ),
        handler,
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        register(&mut registry).unwrap();
        registry
    }

    #[tokio::test]
    async fn bash_runs_and_captures_stdout() {
        let result = registry()
            .execute("bash", serde_json::json!({"command": "echo hello"}))
            .await
            .unwrap();
        assert!(result.success);
        assert!(result.output["stdout"].as_str().unwrap().contains("hello"));
        assert_eq!(result.output["exit_code"], 0);
    }

    #[tokio::test]
    async fn bash_reports_nonzero_exit() {
        let result = registry()
            .execute("bash", serde_json::json!({"command": "exit 3"}))
            .await
            .unwrap();
        assert!(!result.success);
        assert_eq!(result.output["exit_code"], 3);
    }

    #[tokio::test]
    async fn denied_patterns_are_refused_without_running() {
        let result = registry()
            .execute("bash", serde_json::json!({"command": "rm -rf / --no-preserve-root"}))
            .await
            .unwrap();
        assert!(!result.success);
        assert!(result.error.unwrap().contains("refused"));
    }

    #[tokio::test]
    async fn system_info_reports_platform() {
        let result = registry()
            .execute("system_info", serde_json::json!({}))
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.output["os"], std::env::consts::OS);
    }
}
