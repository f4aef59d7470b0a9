//! Context-memory tools: `save_context`, `recall_context`, `save_snippet`,
//! `search_memory`.
//!
//! Backed by two JSON stores (global and project), each mapping
//! `key → {value, timestamp, tags}`. Snippets live in the same stores under
//! a `snippet:` key prefix. Writes go through a temp-file rename under a
//! store-level lock.

use crate::error::HiveResult;
use crate::tool_protocol::{
    SideEffect, ToolFamily, ToolHandler, ToolMetadata, ToolParameter, ToolParameterType,
    ToolRegistry, ToolResult,
};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

/// The two JSON stores plus their file lock.
pub struct ContextMemory {
    global_path: PathBuf,
    project_path: PathBuf,
    lock: Mutex<()>,
}

impl ContextMemory {
    /// Open (or create) the stores under `memory_dir`.
    pub fn new(memory_dir: PathBuf) -> HiveResult<Self> {
        std::fs::create_dir_all(&memory_dir)?;
        Ok(Self {
            global_path: memory_dir.join("context_global.json"),
            project_path: memory_dir.join("context_project.json"),
            lock: Mutex::new(()),
        })
    }

    fn path_for(&self, scope: &str) -> &PathBuf {
        if scope == "global" {
            &self.global_path
        } else {
            &self.project_path
        }
    }

    fn load(&self, scope: &str) -> serde_json::Map<String, Value> {
        match std::fs::read_to_string(self.path_for(scope)) {
            Ok(text) => serde_json::from_str::<Value>(&text)
                .ok()
                .and_then(|v| v.as_object().cloned())
                .unwrap_or_default(),
            Err(_) => Default::default(),
        }
    }

    fn store(&self, scope: &str, map: &serde_json::Map<String, Value>) -> HiveResult<()> {
        let _guard = self.lock.lock().unwrap();
        let path = self.path_for(scope);
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_string_pretty(map)?)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Save a key with value and tags into the given scope.
    pub fn save(&self, scope: &str, key: &str, value: Value, tags: Vec<String>) -> HiveResult<()> {
        let mut map = self.load(scope);
        map.insert(
            key.to_string(),
            serde_json::json!({
                "value": value,
                "timestamp": chrono::Utc::now().timestamp(),
                "tags": tags,
            }),
        );
        self.store(scope, &map)
    }

    /// Recall a key from the given scope.
    pub fn recall(&self, scope: &str, key: &str) -> Option<Value> {
        self.load(scope).get(key).cloned()
    }

    /// Substring search over keys, values, and tags.
    pub fn search(&self, scope: &str, query: &str) -> Vec<(String, Value)> {
        let lowered = query.to_lowercase();
        self.load(scope)
            .into_iter()
            .filter(|(key, entry)| {
                key.to_lowercase().contains(&lowered)
                    || entry.to_string().to_lowercase().contains(&lowered)
            })
            .collect()
    }
}

fn scope_of(params: &Value) -> String {
    params
        .get("scope")
        .and_then(|v| v.as_str())
        .unwrap_or("project")
        .to_string()
}

fn tags_of(params: &Value) -> Vec<String> {
    params
        .get("tags")
        .and_then(|v| v.as_array())
        .map(|tags| {
            tags.iter()
                .filter_map(|t| t.as_str().map(|s| s.to_string()))
                .collect()
        })
        .unwrap_or_default()
}

/// Register the `memory` family.
pub fn register(registry: &mut ToolRegistry, memory: Arc<ContextMemory>) -> HiveResult<()> {
    let mem = memory.clone();
    let handler: ToolHandler = Arc::new(move |params| {
        let mem = mem.clone();
        Box::pin(async move {
            let key = match params.get("key").and_then(|v| v.as_str()) {
                Some(k) => k.to_string(),
                None => return Ok(ToolResult::failure("missing required parameter: key")),
            };
            let value = params.get("value").cloned().unwrap_or(Value::Null);
            let scope = scope_of(&params);
            match mem.save(&scope, &key, value, tags_of(&params)) {
                Ok(()) => Ok(ToolResult::success(serde_json::json!({
                    "saved": key,
                    "scope": scope,
                }))),
                Err(e) => Ok(ToolResult::failure(format!("save failed: {}", e))),
            }
        })
    });
    registry.register(
        ToolMetadata::new(
            "save_context",
            "Save a key/value pair into persistent context memory",
            ToolFamily::Memory,
            SideEffect::Mutating,
        )
        .with_parameter(ToolParameter::new("key", ToolParameterType::String).required())
        .with_parameter(ToolParameter::new("value", ToolParameterType::String).required())
        .with_parameter(
            ToolParameter::new("scope", ToolParameterType::String)
                .with_description("'project' (default) or 'global'"),
        )
        .with_parameter(ToolParameter::new("tags", ToolParameterType::Array)),
        handler,
    )?;

    let mem = memory.clone();
    let handler: ToolHandler = Arc::new(move |params| {
        let mem = mem.clone();
        Box::pin(async move {
            let key = match params.get("key").and_then(|v| v.as_str()) {
                Some(k) => k.to_string(),
                None => return Ok(ToolResult::failure("missing required parameter: key")),
            };
            let scope = scope_of(&params);
            match mem.recall(&scope, &key) {
                Some(entry) => Ok(ToolResult::success(serde_json::json!({
                    "key": key,
                    "entry": entry,
                }))),
                None => Ok(ToolResult::failure(format!(
                    "no entry for '{}' in {} scope",
                    key, scope
                ))),
            }
        })
    });
    registry.register(
        ToolMetadata::new(
            "recall_context",
            "Recall a value previously saved in context memory",
            ToolFamily::Memory,
            SideEffect::ReadOnly,
        )
        .with_parameter(ToolParameter::new("key", ToolParameterType::String).required())
        .with_parameter(ToolParameter::new("scope", ToolParameterType::String)),
        handler,
    )?;

    let mem = memory.clone();
    let handler: ToolHandler = Arc::new(move |params| {
        let mem = mem.clone();
        Box::pin(async move {
            let name = match params.get("name").and_then(|v| v.as_str()) {
                Some(n) => n.to_string(),
                None => return Ok(ToolResult::failure("missing required parameter: name")),
            };
            let code = match params.get("code").and_then(|v| v.as_str()) {
                Some(c) => c.to_string(),
                None => return Ok(ToolResult::failure("missing required parameter: code")),
            };
            let language = params
                .get("language")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string();
            let scope = scope_of(&params);
            let key = format!("snippet:{}", name);
            let value = serde_json::json!({"code": code, "language": language});
            match mem.save(&scope, &key, value, tags_of(&params)) {
                Ok(()) => Ok(ToolResult::success(serde_json::json!({
                    "saved": key,
                    "scope": scope,
                }))),
                Err(e) => Ok(ToolResult::failure(format!("save failed: {}", e))),
            }
        })
    });
    registry.register(
        ToolMetadata::new(
            "save_snippet",
            "Save a named code snippet for later reuse",
            ToolFamily::Memory,
            SideEffect::Mutating,
        )
        .with_parameter(ToolParameter::new("name", ToolParameterType::String).required())
        .with_parameter(ToolParameter::new("code", ToolParameterType::String).required())
        .with_parameter(ToolParameter::new("language", ToolParameterType::String))
        .with_parameter(ToolParameter::new("scope", ToolParameterType::String))
        .with_parameter(ToolParameter::new("tags", ToolParameterType::Array)),
        handler,
    )?;

    let mem = memory;
    let handler: ToolHandler = Arc::new(move |params| {
        let mem = mem.clone();
        Box::pin(async move {
            let query = match params.get("query").and_then(|v| v.as_str()) {
                Some(q) => q.to_string(),
                None => return Ok(ToolResult::failure("missing required parameter: query")),
            };
            let scope = scope_of(&params);
            let hits: Vec<Value> = mem
                .search(&scope, &query)
                .into_iter()
                .map(|(key, entry)| serde_json::json!({"key": key, "entry": entry}))
                .collect();
            Ok(ToolResult::success(serde_json::json!({
                "query": query,
                "matches": hits,
                "count": hits.len(),
            })))
        })
    });
    registry.register(
        ToolMetadata::new(
            "search_memory",
            "Search context memory by substring",
            ToolFamily::Memory,
            SideEffect::ReadOnly,
        )
        .with_parameter(ToolParameter::new("query", ToolParameterType::String).required())
        .with_parameter(ToolParameter::new("scope", ToolParameterType::String)),
        handler,
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, ToolRegistry) {
        let dir = TempDir::new().unwrap();
        let memory = Arc::new(ContextMemory::new(dir.path().join("memory")).unwrap());
        let mut registry = ToolRegistry::new();
        register(&mut registry, memory).unwrap();
        (dir, registry)
    }

    #[tokio::test]
    async fn save_and_recall_round_trip() {
        let (_dir, registry) = setup();
        registry
            .execute(
                "save_context",
                serde_json::json!({"key": "db_host", "value": "10.0.0.5", "tags": ["infra"]}),
            )
            .await
            .unwrap();

        let result = registry
            .execute("recall_context", serde_json::json!({"key": "db_host"}))
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.output["entry"]["value"], "10.0.0.5");
        assert_eq!(result.output["entry"]["tags"][0], "infra");
    }

    #[tokio::test]
    async fn scopes_are_isolated() {
        let (_dir, registry) = setup();
        registry
            .execute(
                "save_context",
                serde_json::json!({"key": "k", "value": "global-v", "scope": "global"}),
            )
            .await
            .unwrap();

        let miss = registry
            .execute("recall_context", serde_json::json!({"key": "k"}))
            .await
            .unwrap();
        assert!(!miss.success);

        let hit = registry
            .execute(
                "recall_context",
                serde_json::json!({"key": "k", "scope": "global"}),
            )
            .await
            .unwrap();
        assert!(hit.success);
    }

    #[tokio::test]
    async fn snippets_are_searchable() {
        let (_dir, registry) = setup();
        registry
            .execute(
                "save_snippet",
                serde_json::json!({
                    "name": "fib",
                    "code": "def fib(n): ...",
                    "language": "python",
                }),
            )
            .await
            .unwrap();

        let result = registry
            .execute("search_memory", serde_json::json!({"query": "fib"}))
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.output["count"], 1);
        assert_eq!(result.output["matches"][0]["key"], "snippet:fib");
    }
}
