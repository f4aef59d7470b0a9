//! Code-editing tools: `read_file`, `edit_file`, `write_file`, `append_file`.
//!
//! `edit_file` performs exact string replacement, the preferred way to
//! change code and the behaviour every agent prompt steers the model
//! toward. Mutating tools snapshot the prior content to a sibling `.bak`
//! before writing and resolve every path through the [`PathGuard`].

use crate::error::HiveResult;
use crate::tool_protocol::{
    SideEffect, ToolFamily, ToolHandler, ToolMetadata, ToolParameter, ToolParameterType,
    ToolRegistry, ToolResult,
};
use crate::tools::guard::{snapshot_backup, PathGuard};
use std::sync::Arc;

/// Largest file `read_file` returns in one call.
const MAX_READ_BYTES: u64 = 256 * 1024;

fn read_file_impl(guard: &PathGuard, params: &serde_json::Value) -> HiveResult<ToolResult> {
    let raw = match params.get("file_path").and_then(|v| v.as_str()) {
        Some(p) => p,
        None => return Ok(ToolResult::failure("missing required parameter: file_path")),
    };
    let path = match guard.resolve(raw) {
        Ok(path) => path,
        Err(e) => return Ok(ToolResult::failure(e.to_string())),
    };
    match std::fs::metadata(&path) {
        Ok(meta) if meta.len() > MAX_READ_BYTES => {
            return Ok(ToolResult::failure(format!(
                "{} is {} bytes, larger than the {} byte read cap",
                raw,
                meta.len(),
                MAX_READ_BYTES
            )));
        }
        Err(e) => return Ok(ToolResult::failure(format!("cannot read {}: {}", raw, e))),
        _ => {}
    }
    match std::fs::read_to_string(&path) {
        Ok(content) => {
            let lines = content.lines().count();
            Ok(ToolResult::success(serde_json::json!({
                "file_path": raw,
                "content": content,
                "lines": lines,
            })))
        }
        Err(e) => Ok(ToolResult::failure(format!("cannot read {}: {}", raw, e))),
    }
}

fn edit_file_impl(guard: &PathGuard, params: &serde_json::Value) -> HiveResult<ToolResult> {
    let raw = match params.get("file_path").and_then(|v| v.as_str()) {
        Some(p) => p,
        None => return Ok(ToolResult::failure("missing required parameter: file_path")),
    };
    let old_string = match params.get("old_string").and_then(|v| v.as_str()) {
        Some(s) => s,
        None => return Ok(ToolResult::failure("missing required parameter: old_string")),
    };
    let new_string = params
        .get("new_string")
        .and_then(|v| v.as_str())
        .unwrap_or("");
    let replace_all = params
        .get("replace_all")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    let path = match guard.resolve(raw) {
        Ok(path) => path,
        Err(e) => return Ok(ToolResult::failure(e.to_string())),
    };
    let content = match std::fs::read_to_string(&path) {
        Ok(c) => c,
        Err(e) => return Ok(ToolResult::failure(format!("cannot read {}: {}", raw, e))),
    };

    let occurrences = content.matches(old_string).count();
    if occurrences == 0 {
        return Ok(ToolResult::failure(format!(
            "old_string not found in {}",
            raw
        )));
    }

    let (updated, replaced) = if replace_all {
        (content.replace(old_string, new_string), occurrences)
    } else {
        (content.replacen(old_string, new_string, 1), 1)
    };

    if let Err(e) = snapshot_backup(&path) {
        return Ok(ToolResult::failure(format!("backup failed: {}", e)));
    }
    if let Err(e) = std::fs::write(&path, updated) {
        return Ok(ToolResult::failure(format!("cannot write {}: {}", raw, e)));
    }

    Ok(ToolResult::success(serde_json::json!({
        "file_path": raw,
        "replacements": replaced,
    })))
}

fn write_file_impl(guard: &PathGuard, params: &serde_json::Value) -> HiveResult<ToolResult> {
    let raw = match params.get("file_path").and_then(|v| v.as_str()) {
        Some(p) => p,
        None => return Ok(ToolResult::failure("missing required parameter: file_path")),
    };
    let content = params
        .get("content")
        .and_then(|v| v.as_str())
        .unwrap_or("");
    let path = match guard.resolve(raw) {
        Ok(path) => path,
        Err(e) => return Ok(ToolResult::failure(e.to_string())),
    };
    if let Some(parent) = path.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            return Ok(ToolResult::failure(format!("cannot create parent: {}", e)));
        }
    }
    if let Err(e) = snapshot_backup(&path) {
        return Ok(ToolResult::failure(format!("backup failed: {}", e)));
    }
    if let Err(e) = std::fs::write(&path, content) {
        return Ok(ToolResult::failure(format!("cannot write {}: {}", raw, e)));
    }
    Ok(ToolResult::success(serde_json::json!({
        "file_path": raw,
        "bytes_written": content.len(),
    })))
}

fn append_file_impl(guard: &PathGuard, params: &serde_json::Value) -> HiveResult<ToolResult> {
    let raw = match params.get("file_path").and_then(|v| v.as_str()) {
        Some(p) => p,
        None => return Ok(ToolResult::failure("missing required parameter: file_path")),
    };
    let content = params
        .get("content")
        .and_then(|v| v.as_str())
        .unwrap_or("");
    let path = match guard.resolve(raw) {
        Ok(path) => path,
        Err(e) => return Ok(ToolResult::failure(e.to_string())),
    };
    if let Err(e) = snapshot_backup(&path) {
        return Ok(ToolResult::failure(format!("backup failed: {}", e)));
    }
    let mut existing = std::fs::read_to_string(&path).unwrap_or_default();
    existing.push_str(content);
    if let Err(e) = std::fs::write(&path, existing) {
        return Ok(ToolResult::failure(format!("cannot write {}: {}", raw, e)));
    }
    Ok(ToolResult::success(serde_json::json!({
        "file_path": raw,
        "bytes_appended": content.len(),
    })))
}

/// Register the `code` family.
pub fn register(registry: &mut ToolRegistry, guard: Arc<PathGuard>) -> HiveResult<()> {
    let g = guard.clone();
    let handler: ToolHandler = Arc::new(move |params| {
        let g = g.clone();
        Box::pin(async move { read_file_impl(&g, &params) })
    });
    registry.register(
        ToolMetadata::new(
            "read_file",
            "Read a file's contents",
            ToolFamily::Code,
            SideEffect::ReadOnly,
        )
        .with_parameter(ToolParameter::new("file_path", ToolParameterType::String).required()),
        handler,
    )?;

    let g = guard.clone();
    let handler: ToolHandler = Arc::new(move |params| {
        let g = g.clone();
        Box::pin(async move { edit_file_impl(&g, &params) })
    });
    registry.register(
        ToolMetadata::new(
            "edit_file",
            "Replace an exact string in a file (surgical edit, never a rewrite)",
            ToolFamily::Code,
            SideEffect::Mutating,
        )
        .with_parameter(ToolParameter::new("file_path", ToolParameterType::String).required())
        .with_parameter(
            ToolParameter::new("old_string", ToolParameterType::String)
                .with_description("Exact text to replace")
                .required(),
        )
        .with_parameter(
            ToolParameter::new("new_string", ToolParameterType::String)
                .with_description("Replacement text"),
        )
        .with_parameter(
            ToolParameter::new("replace_all", ToolParameterType::Boolean)
                .with_description("Replace every occurrence instead of the first"),
        ),
        handler,
    )?;

    let g = guard.clone();
    let handler: ToolHandler = Arc::new(move |params| {
        let g = g.clone();
        Box::pin(async move { write_file_impl(&g, &params) })
    });
    registry.register(
        ToolMetadata::new(
            "write_file",
            "Write content to a file, creating it if needed",
            ToolFamily::Code,
            SideEffect::Mutating,
        )
        .with_parameter(ToolParameter::new("file_path", ToolParameterType::String).required())
        .with_parameter(ToolParameter::new("content", ToolParameterType::String).required()),
        handler,
    )?;

    let g = guard;
    let handler: ToolHandler = Arc::new(move |params| {
        let g = g.clone();
        Box::pin(async move { append_file_impl(&g, &params) })
    });
    registry.register(
        ToolMetadata::new(
            "append_file",
            "Append content to the end of a file",
            ToolFamily::Code,
            SideEffect::Mutating,
        )
        .with_parameter(ToolParameter::new("file_path", ToolParameterType::String).required())
        .with_parameter(ToolParameter::new("content", ToolParameterType::String).required()),
        handler,
    )?;

    Ok(())
}
