//! Declarative tool-chain executor.
//!
//! A [`ToolChain`] is a small imperative program over the tool registry:
//! ordered steps that call tools, transform data, branch on conditions, and
//! aggregate prior results, with a shared variable map threaded through.
//! String arguments of the form `$name` are replaced by `variables[name]`
//! (recursively through nested maps and sequences) before a step runs. The
//! first failing step marks the chain `failed` and stops execution.
//!
//! # Example
//!
//! ```rust,no_run
//! use agenthive::chain::{ToolChain, ToolChainExecutor};
//! use agenthive::tool_protocol::ToolRegistry;
//! use std::sync::Arc;
//!
//! # async fn demo(registry: Arc<ToolRegistry>) {
//! let executor = ToolChainExecutor::new(registry);
//! let mut chain = ToolChain::new("todo_search", "count TODOs");
//! chain.set_variable("pattern", serde_json::json!("TODO"));
//! chain.add_tool_step("grep", serde_json::json!({"pattern": "$pattern"}), "matches");
//! chain.add_transform_step("count", "matches", "todo_count");
//! let outcome = executor.execute(&mut chain).await;
//! assert!(outcome.success);
//! # }
//! ```

use crate::error::{HiveError, HiveResult};
use crate::tool_protocol::ToolRegistry;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use uuid::Uuid;

/// Kind of a chain step.
///
/// `Loop` is part of the declared vocabulary but has no executor arm; a
/// chain containing one fails validation before anything runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainStepType {
    ToolCall,
    Condition,
    Loop,
    Transform,
    Aggregate,
}

/// Execution state of a step or chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

/// One step in a chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainStep {
    pub id: String,
    pub step_type: ChainStepType,
    /// Tool to invoke (`tool_call` steps).
    pub tool_name: Option<String>,
    /// Raw parameters; may contain `$var` references.
    pub parameters: Value,
    /// Condition expression (`condition` steps).
    pub condition: Option<String>,
    /// Transform name (`transform` steps).
    pub transform_func: Option<String>,
    /// Variable name the step result is saved under.
    pub save_as: Option<String>,
    /// Variable names this step consumes (documentation only; execution
    /// order is the source order).
    pub depends_on: Vec<String>,
    pub status: ChainStatus,
    pub result: Option<Value>,
    pub error: Option<String>,
}

impl ChainStep {
    /// Free-standing tool-call step, for use inside condition branches.
    pub fn tool(
        tool_name: impl Into<String>,
        parameters: Value,
        save_as: impl Into<String>,
    ) -> Self {
        let mut step = Self::new(ChainStepType::ToolCall);
        step.tool_name = Some(tool_name.into());
        step.parameters = parameters;
        step.save_as = Some(save_as.into());
        step
    }

    fn new(step_type: ChainStepType) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            step_type,
            tool_name: None,
            parameters: Value::Object(Map::new()),
            condition: None,
            transform_func: None,
            save_as: None,
            depends_on: Vec::new(),
            status: ChainStatus::Pending,
            result: None,
            error: None,
        }
    }
}

/// An executable chain: ordered steps plus the shared variable map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolChain {
    pub id: String,
    pub name: String,
    pub description: String,
    pub steps: Vec<ChainStep>,
    pub variables: Map<String, Value>,
    pub status: ChainStatus,
}

impl ToolChain {
    /// Create an empty chain.
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            description: description.into(),
            steps: Vec::new(),
            variables: Map::new(),
            status: ChainStatus::Pending,
        }
    }

    /// Seed an initial variable.
    pub fn set_variable(&mut self, name: impl Into<String>, value: Value) {
        self.variables.insert(name.into(), value);
    }

    /// Append a tool-call step saving its output under `save_as`.
    pub fn add_tool_step(
        &mut self,
        tool_name: impl Into<String>,
        parameters: Value,
        save_as: impl Into<String>,
    ) -> &ChainStep {
        let mut step = ChainStep::new(ChainStepType::ToolCall);
        step.tool_name = Some(tool_name.into());
        step.parameters = parameters;
        step.save_as = Some(save_as.into());
        self.steps.push(step);
        self.steps.last().unwrap()
    }

    /// Append a condition step with serialized branch steps.
    pub fn add_condition_step(
        &mut self,
        condition: impl Into<String>,
        true_steps: Vec<ChainStep>,
        false_steps: Vec<ChainStep>,
        save_as: impl Into<String>,
    ) -> &ChainStep {
        let mut step = ChainStep::new(ChainStepType::Condition);
        step.condition = Some(condition.into());
        step.parameters = serde_json::json!({
            "true_steps": true_steps,
            "false_steps": false_steps,
        });
        step.save_as = Some(save_as.into());
        self.steps.push(step);
        self.steps.last().unwrap()
    }

    /// Append a transform step over an input variable.
    pub fn add_transform_step(
        &mut self,
        transform_func: impl Into<String>,
        input_var: impl Into<String>,
        save_as: impl Into<String>,
    ) -> &ChainStep {
        let mut step = ChainStep::new(ChainStepType::Transform);
        step.transform_func = Some(transform_func.into());
        step.parameters = serde_json::json!({"input": input_var.into()});
        step.save_as = Some(save_as.into());
        self.steps.push(step);
        self.steps.last().unwrap()
    }

    /// Append an aggregate step combining prior variables.
    pub fn add_aggregate_step(
        &mut self,
        function: impl Into<String>,
        inputs: Vec<String>,
        save_as: impl Into<String>,
    ) -> &ChainStep {
        let mut step = ChainStep::new(ChainStepType::Aggregate);
        step.parameters = serde_json::json!({
            "function": function.into(),
            "inputs": inputs,
        });
        step.save_as = Some(save_as.into());
        self.steps.push(step);
        self.steps.last().unwrap()
    }
}

/// Outcome of running a chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainOutcome {
    pub chain_id: String,
    pub success: bool,
    pub steps_completed: usize,
    pub error: Option<String>,
    pub variables: Map<String, Value>,
}

/// Replace `$name` references in `value` from the variable map, recursing
/// through objects and arrays. Unknown references resolve to `null`.
pub fn substitute_variables(value: &Value, variables: &Map<String, Value>) -> Value {
    match value {
        Value::String(s) => {
            if let Some(name) = s.strip_prefix('$') {
                variables.get(name).cloned().unwrap_or(Value::Null)
            } else {
                value.clone()
            }
        }
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), substitute_variables(v, variables)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| substitute_variables(item, variables))
                .collect(),
        ),
        _ => value.clone(),
    }
}

/// Compare two JSON values for condition operators. Numbers compare
/// numerically, strings lexically; mixed types are incomparable.
fn compare_values(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64().partial_cmp(&b.as_f64()),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

/// Resolve one side of a condition: `$var` lookups, then best-effort JSON
/// decoding of literals (so `3` is a number and `"x"` is a string).
fn resolve_operand(raw: &str, variables: &Map<String, Value>) -> Value {
    let trimmed = raw.trim();
    if let Some(name) = trimmed.strip_prefix('$') {
        return variables.get(name).cloned().unwrap_or(Value::Null);
    }
    if let Ok(parsed) = serde_json::from_str::<Value>(trimmed) {
        return parsed;
    }
    Value::String(trimmed.trim_matches(|c| c == '"' || c == '\'').to_string())
}

/// Evaluate a condition expression against the variable map.
///
/// Supports `$var exists` and binary comparisons with `==`, `!=`, `<=`,
/// `>=`, `<`, `>`. Anything else evaluates to false.
pub fn evaluate_condition(condition: &str, variables: &Map<String, Value>) -> bool {
    let condition = condition.trim();

    if let Some(var_part) = condition.strip_suffix("exists") {
        let name = var_part.trim().trim_start_matches('$');
        return variables.contains_key(name);
    }

    // Two-character operators first so ">=" is not read as ">".
    for op in ["==", "!=", "<=", ">=", "<", ">"] {
        if let Some(idx) = condition.find(op) {
            let left = resolve_operand(&condition[..idx], variables);
            let right = resolve_operand(&condition[idx + op.len()..], variables);
            return match op {
                "==" => left == right,
                "!=" => left != right,
                _ => match compare_values(&left, &right) {
                    Some(ord) => match op {
                        "<" => ord == Ordering::Less,
                        "<=" => ord != Ordering::Greater,
                        ">" => ord == Ordering::Greater,
                        ">=" => ord != Ordering::Less,
                        _ => false,
                    },
                    None => false,
                },
            };
        }
    }

    false
}

/// Apply a named transform to an input value.
fn apply_transform(name: &str, input: &Value, parameters: &Value) -> HiveResult<Value> {
    match name {
        "to_json" => Ok(Value::String(serde_json::to_string_pretty(input)?)),
        "from_json" => match input.as_str() {
            Some(s) => Ok(serde_json::from_str(s)
                .map_err(|e| HiveError::validation(format!("from_json failed: {}", e)))?),
            None => Err(HiveError::validation("from_json expects a string input")),
        },
        "to_list" => Ok(match input {
            Value::Array(_) => input.clone(),
            Value::String(s) => {
                Value::Array(s.chars().map(|c| Value::String(c.to_string())).collect())
            }
            Value::Object(map) => {
                Value::Array(map.keys().map(|k| Value::String(k.clone())).collect())
            }
            other => Value::Array(vec![other.clone()]),
        }),
        "count" => {
            let count = match input {
                Value::Array(items) => items.len(),
                Value::Object(map) => map.len(),
                Value::String(s) => s.chars().count(),
                Value::Null => 0,
                _ => 1,
            };
            Ok(Value::Number(count.into()))
        }
        "first" => Ok(input
            .as_array()
            .and_then(|items| items.first().cloned())
            .unwrap_or(Value::Null)),
        "last" => Ok(input
            .as_array()
            .and_then(|items| items.last().cloned())
            .unwrap_or(Value::Null)),
        "join" => {
            let separator = parameters
                .get("separator")
                .and_then(|v| v.as_str())
                .unwrap_or(", ");
            let items = input
                .as_array()
                .ok_or_else(|| HiveError::validation("join expects an array input"))?;
            let joined: Vec<String> = items.iter().map(value_to_plain_string).collect();
            Ok(Value::String(joined.join(separator)))
        }
        "split" => {
            let separator = parameters
                .get("separator")
                .and_then(|v| v.as_str())
                .unwrap_or(",");
            let text = input
                .as_str()
                .ok_or_else(|| HiveError::validation("split expects a string input"))?;
            Ok(Value::Array(
                text.split(separator)
                    .map(|part| Value::String(part.to_string()))
                    .collect(),
            ))
        }
        other => Err(HiveError::validation(format!("unknown transform: {}", other))),
    }
}

fn value_to_plain_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Executes chains against a tool registry.
pub struct ToolChainExecutor {
    registry: Arc<ToolRegistry>,
}

impl ToolChainExecutor {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self { registry }
    }

    /// Run the chain to completion or first failure.
    pub async fn execute(&self, chain: &mut ToolChain) -> ChainOutcome {
        chain.status = ChainStatus::InProgress;
        let mut steps_completed = 0usize;
        let mut failure: Option<String> = None;

        let mut steps = std::mem::take(&mut chain.steps);
        for step in steps.iter_mut() {
            step.status = ChainStatus::InProgress;
            match self.execute_step(step, &mut chain.variables).await {
                Ok(result) => {
                    if let Some(save_as) = &step.save_as {
                        chain.variables.insert(save_as.clone(), result.clone());
                    }
                    step.result = Some(result);
                    step.status = ChainStatus::Completed;
                    steps_completed += 1;
                }
                Err(e) => {
                    step.status = ChainStatus::Failed;
                    step.error = Some(e.to_string());
                    failure = Some(format!("step {} failed: {}", step.id, e));
                    break;
                }
            }
        }
        chain.steps = steps;

        chain.status = if failure.is_none() {
            ChainStatus::Completed
        } else {
            ChainStatus::Failed
        };

        ChainOutcome {
            chain_id: chain.id.clone(),
            success: failure.is_none(),
            steps_completed,
            error: failure,
            variables: chain.variables.clone(),
        }
    }

    /// Execute a single step. Boxed so condition branches can recurse.
    fn execute_step<'a>(
        &'a self,
        step: &'a ChainStep,
        variables: &'a mut Map<String, Value>,
    ) -> Pin<Box<dyn Future<Output = HiveResult<Value>> + Send + 'a>> {
        Box::pin(async move {
            match step.step_type {
                ChainStepType::ToolCall => self.run_tool_call(step, variables).await,
                ChainStepType::Transform => self.run_transform(step, variables),
                ChainStepType::Condition => self.run_condition(step, variables).await,
                ChainStepType::Aggregate => self.run_aggregate(step, variables),
                ChainStepType::Loop => Err(HiveError::validation(
                    "loop steps are declared but not executable",
                )),
            }
        })
    }

    async fn run_tool_call(
        &self,
        step: &ChainStep,
        variables: &Map<String, Value>,
    ) -> HiveResult<Value> {
        let tool_name = step
            .tool_name
            .as_ref()
            .ok_or_else(|| HiveError::validation("tool_call step without tool_name"))?;
        let params = substitute_variables(&step.parameters, variables);
        let result = self.registry.execute(tool_name, params).await?;
        if !result.success {
            return Err(HiveError::internal(
                result
                    .error
                    .unwrap_or_else(|| format!("tool {} failed", tool_name)),
            ));
        }
        Ok(result.output)
    }

    fn run_transform(
        &self,
        step: &ChainStep,
        variables: &Map<String, Value>,
    ) -> HiveResult<Value> {
        let transform = step
            .transform_func
            .as_ref()
            .ok_or_else(|| HiveError::validation("transform step without transform_func"))?;
        let input_var = step
            .parameters
            .get("input")
            .and_then(|v| v.as_str())
            .ok_or_else(|| HiveError::validation("transform step without input"))?;
        let input = variables
            .get(input_var)
            .ok_or_else(|| HiveError::validation(format!("input variable not found: {}", input_var)))?
            .clone();
        apply_transform(transform, &input, &step.parameters)
    }

    async fn run_condition(
        &self,
        step: &ChainStep,
        variables: &mut Map<String, Value>,
    ) -> HiveResult<Value> {
        let condition = step
            .condition
            .as_ref()
            .ok_or_else(|| HiveError::validation("condition step without condition"))?;
        let met = evaluate_condition(condition, variables);

        let branch_key = if met { "true_steps" } else { "false_steps" };
        let branch: Vec<ChainStep> = step
            .parameters
            .get(branch_key)
            .cloned()
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| HiveError::validation(format!("invalid {}: {}", branch_key, e)))?
            .unwrap_or_default();

        let mut branch_results = Vec::new();
        for branch_step in &branch {
            let result = self.execute_step(branch_step, variables).await?;
            if let Some(save_as) = &branch_step.save_as {
                variables.insert(save_as.clone(), result.clone());
            }
            branch_results.push(result);
        }

        Ok(serde_json::json!({
            "condition_met": met,
            "branch_results": branch_results,
        }))
    }

    fn run_aggregate(
        &self,
        step: &ChainStep,
        variables: &Map<String, Value>,
    ) -> HiveResult<Value> {
        let inputs: Vec<String> = step
            .parameters
            .get("inputs")
            .and_then(|v| v.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| item.as_str().map(|s| s.to_string()))
                    .collect()
            })
            .unwrap_or_default();
        let function = step
            .parameters
            .get("function")
            .and_then(|v| v.as_str())
            .unwrap_or("collect");

        let values: Vec<Value> = inputs
            .iter()
            .filter_map(|name| variables.get(name).cloned())
            .collect();

        match function {
            "collect" => Ok(Value::Array(values)),
            "concat" => Ok(Value::String(
                values.iter().map(value_to_plain_string).collect::<String>(),
            )),
            "merge" => {
                let mut merged = Map::new();
                for value in values {
                    if let Value::Object(map) = value {
                        merged.extend(map);
                    }
                }
                Ok(Value::Object(merged))
            }
            other => Err(HiveError::validation(format!(
                "unknown aggregate function: {}",
                other
            ))),
        }
    }
}
