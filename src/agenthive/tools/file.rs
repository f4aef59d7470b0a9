//! Read-only file tools: `glob`, `grep`, `tree`, `file_info`.
//!
//! All paths resolve through the [`PathGuard`]; nothing here writes.

use crate::error::HiveResult;
use crate::tool_protocol::{
    SideEffect, ToolFamily, ToolHandler, ToolMetadata, ToolParameter, ToolParameterType,
    ToolRegistry, ToolResult,
};
use crate::tools::guard::PathGuard;
use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Cap on entries returned by a single walk, to keep tool results promptable.
const MAX_WALK_ENTRIES: usize = 500;

/// Match a file name against a shell-style pattern supporting `*` and `?`.
pub fn wildcard_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    // dp[i][j]: pattern[..i] matches text[..j]
    let mut dp = vec![vec![false; t.len() + 1]; p.len() + 1];
    dp[0][0] = true;
    for i in 1..=p.len() {
        if p[i - 1] == '*' {
            dp[i][0] = dp[i - 1][0];
        }
    }
    for i in 1..=p.len() {
        for j in 1..=t.len() {
            dp[i][j] = match p[i - 1] {
                '*' => dp[i - 1][j] || dp[i][j - 1],
                '?' => dp[i - 1][j - 1],
                c => dp[i - 1][j - 1] && c == t[j - 1],
            };
        }
    }
    dp[p.len()][t.len()]
}

/// Recursively collect files under `dir`, skipping hidden entries and build
/// output directories.
fn walk_files(dir: &Path, out: &mut Vec<PathBuf>) {
    if out.len() >= MAX_WALK_ENTRIES {
        return;
    }
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return,
    };
    for entry in entries.flatten() {
        if out.len() >= MAX_WALK_ENTRIES {
            return;
        }
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with('.') || name == "node_modules" || name == "target" {
            continue;
        }
        if path.is_dir() {
            walk_files(&path, out);
        } else {
            out.push(path);
        }
    }
}

fn relative_display(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .to_string()
}

fn glob_impl(guard: &PathGuard, params: &serde_json::Value) -> HiveResult<ToolResult> {
    let pattern = match params.get("pattern").and_then(|v| v.as_str()) {
        Some(p) => p.to_string(),
        None => return Ok(ToolResult::failure("missing required parameter: pattern")),
    };
    let base = params.get("path").and_then(|v| v.as_str()).unwrap_or(".");
    let dir = match guard.resolve(base) {
        Ok(dir) => dir,
        Err(e) => return Ok(ToolResult::failure(e.to_string())),
    };

    let mut all = Vec::new();
    walk_files(&dir, &mut all);
    let files: Vec<String> = all
        .iter()
        .filter(|p| {
            p.file_name()
                .map(|n| wildcard_match(&pattern, &n.to_string_lossy()))
                .unwrap_or(false)
        })
        .map(|p| relative_display(guard.root(), p))
        .collect();

    // A bare array so chain steps can count/join the result directly.
    Ok(ToolResult::success(serde_json::json!(files)))
}

fn grep_impl(guard: &PathGuard, params: &serde_json::Value) -> HiveResult<ToolResult> {
    let pattern = match params.get("pattern").and_then(|v| v.as_str()) {
        Some(p) => p.to_string(),
        None => return Ok(ToolResult::failure("missing required parameter: pattern")),
    };
    let max_results = params
        .get("max_results")
        .and_then(|v| v.as_u64())
        .unwrap_or(100) as usize;

    // Either an explicit file list or a directory walk.
    let files: Vec<PathBuf> = if let Some(list) = params.get("files").and_then(|v| v.as_array()) {
        let mut files = Vec::new();
        for item in list {
            if let Some(raw) = item.as_str() {
                match guard.resolve(raw) {
                    Ok(path) => files.push(path),
                    Err(e) => return Ok(ToolResult::failure(e.to_string())),
                }
            }
        }
        files
    } else {
        let base = params.get("path").and_then(|v| v.as_str()).unwrap_or(".");
        let dir = match guard.resolve(base) {
            Ok(dir) => dir,
            Err(e) => return Ok(ToolResult::failure(e.to_string())),
        };
        let mut files = Vec::new();
        walk_files(&dir, &mut files);
        files
    };

    let mut matches = Vec::new();
    'outer: for file in &files {
        let content = match std::fs::read_to_string(file) {
            Ok(c) => c,
            Err(_) => continue, // binary or unreadable
        };
        for (line_number, line) in content.lines().enumerate() {
            if line.contains(&pattern) {
                matches.push(serde_json::json!({
                    "file": relative_display(guard.root(), file),
                    "line": line_number + 1,
                    "text": line.trim(),
                }));
                if matches.len() >= max_results {
                    break 'outer;
                }
            }
        }
    }

    Ok(ToolResult::success(serde_json::json!(matches)))
}

fn tree_impl(guard: &PathGuard, params: &serde_json::Value) -> HiveResult<ToolResult> {
    let base = params.get("path").and_then(|v| v.as_str()).unwrap_or(".");
    let depth = params.get("depth").and_then(|v| v.as_u64()).unwrap_or(2) as usize;
    let dir = match guard.resolve(base) {
        Ok(dir) => dir,
        Err(e) => return Ok(ToolResult::failure(e.to_string())),
    };

    fn build(path: &Path, prefix: &str, depth_left: usize, out: &mut String) {
        if depth_left == 0 {
            return;
        }
        let mut entries: Vec<_> = match std::fs::read_dir(path) {
            Ok(entries) => entries.flatten().collect(),
            Err(_) => return,
        };
        entries.sort_by_key(|e| e.file_name());
        for entry in entries {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.') {
                continue;
            }
            let child = entry.path();
            if child.is_dir() {
                out.push_str(&format!("{}{}/\n", prefix, name));
                build(&child, &format!("{}  ", prefix), depth_left - 1, out);
            } else {
                out.push_str(&format!("{}{}\n", prefix, name));
            }
        }
    }

    let mut listing = String::new();
    build(&dir, "", depth, &mut listing);
    Ok(ToolResult::success(serde_json::json!({
        "path": relative_display(guard.root(), &dir),
        "tree": listing,
    })))
}

fn file_info_impl(guard: &PathGuard, params: &serde_json::Value) -> HiveResult<ToolResult> {
    let raw = match params.get("file_path").and_then(|v| v.as_str()) {
        Some(p) => p,
        None => return Ok(ToolResult::failure("missing required parameter: file_path")),
    };
    let path = match guard.resolve(raw) {
        Ok(path) => path,
        Err(e) => return Ok(ToolResult::failure(e.to_string())),
    };
    let meta = match std::fs::metadata(&path) {
        Ok(meta) => meta,
        Err(e) => return Ok(ToolResult::failure(format!("cannot stat {}: {}", raw, e))),
    };
    let modified = meta
        .modified()
        .ok()
        .map(|t| DateTime::<Local>::from(t).to_rfc3339())
        .unwrap_or_default();
    Ok(ToolResult::success(serde_json::json!({
        "path": relative_display(guard.root(), &path),
        "size": meta.len(),
        "is_directory": meta.is_dir(),
        "modified": modified,
    })))
}

/// Register the `file` family.
pub fn register(registry: &mut ToolRegistry, guard: Arc<PathGuard>) -> HiveResult<()> {
    let g = guard.clone();
    let handler: ToolHandler = Arc::new(move |params| {
        let g = g.clone();
        Box::pin(async move { glob_impl(&g, &params) })
    });
    registry.register(
        ToolMetadata::new(
            "glob",
            "Find files matching a wildcard pattern",
            ToolFamily::File,
            SideEffect::ReadOnly,
        )
        .with_parameter(
            ToolParameter::new("pattern", ToolParameterType::String)
                .with_description("Shell-style pattern, e.g. *.py")
                .required(),
        )
        .with_parameter(
            ToolParameter::new("path", ToolParameterType::String)
                .with_description("Directory to search, relative to the project root"),
        ),
        handler,
    )?;

    let g = guard.clone();
    let handler: ToolHandler = Arc::new(move |params| {
        let g = g.clone();
        Box::pin(async move { grep_impl(&g, &params) })
    });
    registry.register(
        ToolMetadata::new(
            "grep",
            "Search file contents for a pattern",
            ToolFamily::File,
            SideEffect::ReadOnly,
        )
        .with_parameter(
            ToolParameter::new("pattern", ToolParameterType::String)
                .with_description("Substring to search for")
                .required(),
        )
        .with_parameter(
            ToolParameter::new("files", ToolParameterType::Array)
                .with_description("Explicit list of files to search"),
        )
        .with_parameter(
            ToolParameter::new("path", ToolParameterType::String)
                .with_description("Directory to search when no file list is given"),
        )
        .with_parameter(
            ToolParameter::new("max_results", ToolParameterType::Integer)
                .with_description("Cap on returned matches (default 100)"),
        ),
        handler,
    )?;

    let g = guard.clone();
    let handler: ToolHandler = Arc::new(move |params| {
        let g = g.clone();
        Box::pin(async move { tree_impl(&g, &params) })
    });
    registry.register(
        ToolMetadata::new(
            "tree",
            "Show the directory structure",
            ToolFamily::File,
            SideEffect::ReadOnly,
        )
        .with_parameter(ToolParameter::new("path", ToolParameterType::String))
        .with_parameter(
            ToolParameter::new("depth", ToolParameterType::Integer)
                .with_description("Levels to descend (default 2)"),
        ),
        handler,
    )?;

    let g = guard;
    let handler: ToolHandler = Arc::new(move |params| {
        let g = g.clone();
        Box::pin(async move { file_info_impl(&g, &params) })
    });
    registry.register(
        ToolMetadata::new(
            "file_info",
            "Get size, type, and modification time for a path",
            ToolFamily::File,
            SideEffect::ReadOnly,
        )
        .with_parameter(
            ToolParameter::new("file_path", ToolParameterType::String).required(),
        ),
        handler,
    )?;

    Ok(())
}
