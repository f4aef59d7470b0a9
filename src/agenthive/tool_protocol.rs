//! Tool catalog and execution layer.
//!
//! Tools are declared once at startup: a [`ToolMetadata`] (name, description,
//! ordered parameters, family, side-effect class) paired with an async
//! handler. The [`ToolRegistry`] owns every declared tool; agents receive an
//! immutable [`ToolSet`], a family-filtered view sharing the same tool
//! handles, so the catalog is built once and never copied per agent.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use agenthive::tool_protocol::{
//!     ToolFamily, ToolMetadata, ToolParameter, ToolParameterType, ToolRegistry, ToolResult,
//!     SideEffect,
//! };
//!
//! # #[tokio::main]
//! # async fn main() {
//! let mut registry = ToolRegistry::new();
//! registry
//!     .register(
//!         ToolMetadata::new("add", "Adds two numbers", ToolFamily::Code, SideEffect::ReadOnly)
//!             .with_parameter(ToolParameter::new("a", ToolParameterType::Number).required())
//!             .with_parameter(ToolParameter::new("b", ToolParameterType::Number).required()),
//!         Arc::new(|params| {
//!             Box::pin(async move {
//!                 let a = params["a"].as_f64().unwrap_or(0.0);
//!                 let b = params["b"].as_f64().unwrap_or(0.0);
//!                 Ok(ToolResult::success(serde_json::json!({"result": a + b})))
//!             })
//!         }),
//!     )
//!     .unwrap();
//!
//! let result = registry
//!     .execute("add", serde_json::json!({"a": 2, "b": 2}))
//!     .await
//!     .unwrap();
//! assert_eq!(result.output["result"], 4.0);
//! # }
//! ```

use crate::client_wrapper::ToolDefinition;
use crate::error::{HiveError, HiveResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

/// Default per-tool execution deadline.
pub const TOOL_TIMEOUT_SECS: u64 = 30;

/// Functional grouping of tools; each agent is granted a union of families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolFamily {
    Code,
    File,
    System,
    Web,
    Osint,
    Memory,
}

impl ToolFamily {
    /// Stable string form used in wire payloads and chain tool ids.
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolFamily::Code => "code",
            ToolFamily::File => "file",
            ToolFamily::System => "system",
            ToolFamily::Web => "web",
            ToolFamily::Osint => "osint",
            ToolFamily::Memory => "memory",
        }
    }
}

/// Side-effect class, consulted by policy checks and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SideEffect {
    /// Pure lookup; safe to retry.
    ReadOnly,
    /// Mutates files or state under the project root.
    Mutating,
    /// Talks to the network or spawns processes without mutating the root.
    ExternalIo,
    /// Arbitrary commands; only granted to agents that are allowed to destroy
    /// things.
    Dangerous,
}

impl SideEffect {
    pub fn as_str(&self) -> &'static str {
        match self {
            SideEffect::ReadOnly => "read_only",
            SideEffect::Mutating => "mutating",
            SideEffect::ExternalIo => "external_io",
            SideEffect::Dangerous => "dangerous",
        }
    }
}

/// Declared type of a tool parameter.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ToolParameterType {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
}

impl ToolParameterType {
    fn json_schema_name(&self) -> &'static str {
        match self {
            ToolParameterType::String => "string",
            ToolParameterType::Number => "number",
            ToolParameterType::Integer => "integer",
            ToolParameterType::Boolean => "boolean",
            ToolParameterType::Array => "array",
            ToolParameterType::Object => "object",
        }
    }
}

/// A declared tool parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolParameter {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: ToolParameterType,
    pub description: Option<String>,
    pub required: bool,
}

impl ToolParameter {
    /// Define a new parameter with the provided name and type.
    pub fn new(name: impl Into<String>, param_type: ToolParameterType) -> Self {
        Self {
            name: name.into(),
            param_type,
            description: None,
            required: false,
        }
    }

    /// Add a human-readable description that surfaces in generated schemas.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Mark the parameter as required.
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

/// Static description of a tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolMetadata {
    /// Unique snake_case identifier.
    pub name: String,
    /// One-line description surfaced to the model.
    pub description: String,
    /// Ordered parameter declarations.
    pub parameters: Vec<ToolParameter>,
    /// Family the tool belongs to.
    pub family: ToolFamily,
    /// Side-effect class.
    pub side_effect: SideEffect,
}

impl ToolMetadata {
    /// Create metadata with the supplied identity.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        family: ToolFamily,
        side_effect: SideEffect,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: Vec::new(),
            family,
            side_effect,
        }
    }

    /// Append a parameter definition (builder pattern).
    pub fn with_parameter(mut self, param: ToolParameter) -> Self {
        self.parameters.push(param);
        self
    }

    /// Render this metadata as a provider-agnostic [`ToolDefinition`] with a
    /// JSON Schema parameter object.
    pub fn to_tool_definition(&self) -> ToolDefinition {
        let mut properties = serde_json::Map::new();
        let mut required: Vec<serde_json::Value> = Vec::new();
        for param in &self.parameters {
            let mut schema = serde_json::Map::new();
            schema.insert(
                "type".to_string(),
                serde_json::Value::String(param.param_type.json_schema_name().to_string()),
            );
            if let Some(desc) = &param.description {
                schema.insert(
                    "description".to_string(),
                    serde_json::Value::String(desc.clone()),
                );
            }
            properties.insert(param.name.clone(), serde_json::Value::Object(schema));
            if param.required {
                required.push(serde_json::Value::String(param.name.clone()));
            }
        }
        ToolDefinition {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters_schema: serde_json::json!({
                "type": "object",
                "properties": properties,
                "required": required,
            }),
        }
    }
}

/// Structured result of one tool execution.
///
/// Tool handlers report application-level failure through
/// [`ToolResult::failure`]; a `HiveResult::Err` from the handler means the
/// execution machinery itself broke.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// Whether the execution was successful.
    pub success: bool,
    /// Output payload.
    pub output: serde_json::Value,
    /// Error message when `success` is false.
    pub error: Option<String>,
    /// Execution metadata (timing, byte counts, etc.).
    pub metadata: HashMap<String, serde_json::Value>,
}

impl ToolResult {
    /// Convenience constructor for a successful execution.
    pub fn success(output: serde_json::Value) -> Self {
        Self {
            success: true,
            output,
            error: None,
            metadata: HashMap::new(),
        }
    }

    /// Convenience constructor for a failed execution.
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: serde_json::Value::Null,
            error: Some(error.into()),
            metadata: HashMap::new(),
        }
    }

    /// Attach execution metadata (builder pattern).
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Boxed async tool handler. Handlers receive the raw JSON arguments and must
/// be referentially transparent given their arguments plus the filesystem and
/// network they are allowed to touch.
pub type ToolHandler = Arc<
    dyn Fn(serde_json::Value) -> Pin<Box<dyn Future<Output = HiveResult<ToolResult>> + Send>>
        + Send
        + Sync,
>;

/// A declared tool: metadata plus its handler.
pub struct Tool {
    metadata: ToolMetadata,
    handler: ToolHandler,
}

impl Tool {
    /// Borrow the static metadata.
    pub fn metadata(&self) -> &ToolMetadata {
        &self.metadata
    }

    /// Run the handler under the per-tool deadline.
    pub async fn execute(&self, parameters: serde_json::Value) -> HiveResult<ToolResult> {
        match tokio::time::timeout(
            Duration::from_secs(TOOL_TIMEOUT_SECS),
            (self.handler)(parameters),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(HiveError::timeout(format!(
                "tool '{}' exceeded {}s",
                self.metadata.name, TOOL_TIMEOUT_SECS
            ))),
        }
    }
}

/// Registry of every declared tool, read-only after init.
///
/// Names are unique; listing order is deterministic (sorted by name).
#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<Tool>>,
}

impl ToolRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            tools: BTreeMap::new(),
        }
    }

    /// Register a tool; fails on a duplicate name.
    pub fn register(&mut self, metadata: ToolMetadata, handler: ToolHandler) -> HiveResult<()> {
        let name = metadata.name.clone();
        if self.tools.contains_key(&name) {
            return Err(HiveError::validation(format!(
                "duplicate tool name: {}",
                name
            )));
        }
        self.tools
            .insert(name, Arc::new(Tool { metadata, handler }));
        Ok(())
    }

    /// Borrow a tool by name.
    pub fn get(&self, name: &str) -> Option<&Arc<Tool>> {
        self.tools.get(name)
    }

    /// List metadata for every registered tool, sorted by name.
    pub fn list(&self) -> Vec<&ToolMetadata> {
        self.tools.values().map(|t| t.metadata()).collect()
    }

    /// Execute a named tool with serialized parameters.
    pub async fn execute(
        &self,
        tool_name: &str,
        parameters: serde_json::Value,
    ) -> HiveResult<ToolResult> {
        let tool = self
            .tools
            .get(tool_name)
            .ok_or_else(|| HiveError::not_found(format!("tool not found: {}", tool_name)))?;
        tool.execute(parameters).await
    }

    /// Build an immutable per-agent view covering the given families.
    ///
    /// Tool handles are shared, never copied.
    pub fn family_subset(&self, families: &[ToolFamily]) -> ToolSet {
        let tools: Vec<Arc<Tool>> = self
            .tools
            .values()
            .filter(|t| families.contains(&t.metadata().family))
            .cloned()
            .collect();
        ToolSet { tools }
    }

    /// Build a view containing exactly the named tools (used for the curated
    /// `general` subset). Unknown names are skipped.
    pub fn named_subset(&self, names: &[&str]) -> ToolSet {
        let tools: Vec<Arc<Tool>> = names
            .iter()
            .filter_map(|n| self.tools.get(*n).cloned())
            .collect();
        ToolSet { tools }
    }

    /// Every tool as a single set (the consultant view).
    pub fn full_set(&self) -> ToolSet {
        ToolSet {
            tools: self.tools.values().cloned().collect(),
        }
    }
}

/// Immutable, family-filtered view over the registry, held per agent.
#[derive(Clone, Default)]
pub struct ToolSet {
    tools: Vec<Arc<Tool>>,
}

impl ToolSet {
    /// An empty set (agents whose backend consumes no tools).
    pub fn empty() -> Self {
        Self { tools: Vec::new() }
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Borrow a tool by name.
    pub fn get(&self, name: &str) -> Option<&Arc<Tool>> {
        self.tools.iter().find(|t| t.metadata().name == name)
    }

    /// Metadata for every tool in the set.
    pub fn list(&self) -> Vec<&ToolMetadata> {
        self.tools.iter().map(|t| t.metadata()).collect()
    }

    /// Provider-agnostic definitions for the native tool protocol.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .iter()
            .map(|t| t.metadata().to_tool_definition())
            .collect()
    }

    /// Union of two sets, deduplicated by tool name.
    pub fn union(&self, other: &ToolSet) -> ToolSet {
        let mut tools = self.tools.clone();
        for tool in &other.tools {
            if !tools.iter().any(|t| t.metadata().name == tool.metadata().name) {
                tools.push(tool.clone());
            }
        }
        ToolSet { tools }
    }

    /// Execute a named tool from this set.
    pub async fn execute(
        &self,
        tool_name: &str,
        parameters: serde_json::Value,
    ) -> HiveResult<ToolResult> {
        let tool = self
            .get(tool_name)
            .ok_or_else(|| HiveError::not_found(format!("tool not found: {}", tool_name)))?;
        tool.execute(parameters).await
    }
}
