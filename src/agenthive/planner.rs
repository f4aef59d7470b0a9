//! Task planner: turns a free-text task into an executable [`Plan`].
//!
//! The planner asks the reasoner backend for a JSON plan (goal, steps with
//! agent/tools/priority/dependencies, expected output, risks, duration) and
//! parses it with a three-level ladder: outermost-braces JSON decode, then a
//! line-oriented `GOAL:`/`STEP N:` parser, then a one-step trivial plan
//! carrying the original instruction. Step ids are assigned `step_1…step_N`
//! in source order; integer dependencies are normalized to those ids, and a
//! dependency may only point at an earlier step. Forward or self references
//! are dropped, which keeps the graph acyclic by construction.

use crate::agent::AgentKind;
use crate::client_wrapper::{ChatMessage, ClientWrapper};
use crate::error::{HiveError, HiveResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

/// Priority of a plan step; a failing `critical` step aborts the plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepPriority {
    Critical,
    High,
    Medium,
    Low,
}

impl StepPriority {
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "critical" => StepPriority::Critical,
            "high" => StepPriority::High,
            "low" => StepPriority::Low,
            _ => StepPriority::Medium,
        }
    }
}

/// Execution state of a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Skipped,
}

/// Execution state of a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

/// One step of a plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanStep {
    /// `step_N`, unique within the plan and sortable by source order.
    pub id: String,
    pub action: String,
    pub agent: AgentKind,
    pub tools_required: Vec<String>,
    /// Ids of earlier steps that must complete first.
    pub depends_on: Vec<String>,
    pub priority: StepPriority,
    pub estimated_duration_secs: u64,
    pub status: StepStatus,
    pub result: Option<String>,
    pub error: Option<String>,
    pub actual_duration_secs: Option<u64>,
    /// Reason a step was skipped, when it was.
    pub skip_reason: Option<String>,
}

/// An executable plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub id: String,
    pub task: String,
    pub goal: String,
    pub steps: Vec<PlanStep>,
    pub required_agents: Vec<String>,
    pub required_tools: Vec<String>,
    pub expected_output: String,
    pub risks: Vec<String>,
    pub estimated_total_duration_secs: u64,
    pub status: PlanStatus,
    pub created_at: i64,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
}

impl Plan {
    /// Counts of steps per status, observable at any time.
    pub fn progress(&self) -> serde_json::Value {
        let count = |status: StepStatus| self.steps.iter().filter(|s| s.status == status).count();
        serde_json::json!({
            "pending": count(StepStatus::Pending),
            "in_progress": count(StepStatus::InProgress),
            "completed": count(StepStatus::Completed),
            "failed": count(StepStatus::Failed),
            "skipped": count(StepStatus::Skipped),
        })
    }
}

/// Builds plans by prompting a planning-capable backend.
pub struct TaskPlanner {
    client: Arc<dyn ClientWrapper>,
    plans_dir: PathBuf,
}

impl TaskPlanner {
    /// `client` should be the reasoner's backend; `memory_dir` hosts the
    /// `plans/` directory.
    pub fn new(client: Arc<dyn ClientWrapper>, memory_dir: PathBuf) -> HiveResult<Self> {
        let plans_dir = memory_dir.join("plans");
        std::fs::create_dir_all(&plans_dir)?;
        Ok(Self { client, plans_dir })
    }

    /// Create a plan for a task, persisting it before returning.
    pub async fn create_plan(&self, task: &str, context: Option<&Value>) -> HiveResult<Plan> {
        let prompt = build_planning_prompt(task, context);
        let messages = [
            ChatMessage::system(
                "You are a task planning expert. IMPORTANT: Always respond in English only.",
            ),
            ChatMessage::user(&prompt),
        ];

        let draft = match self.client.chat(&messages, None).await {
            Ok(reply) => parse_plan_response(reply.content.as_ref(), task),
            Err(e) => {
                log::warn!("planner backend failed, using fallback plan: {}", e);
                fallback_draft(task, &e.to_string())
            }
        };

        let plan = draft.into_plan(task);
        self.save_plan(&plan).await?;
        Ok(plan)
    }

    /// Persist a plan as `plans/plan_<id>.json`.
    pub async fn save_plan(&self, plan: &Plan) -> HiveResult<()> {
        let path = self.plans_dir.join(format!("plan_{}.json", plan.id));
        tokio::fs::write(&path, serde_json::to_string_pretty(plan)?).await?;
        Ok(())
    }

    /// Load a plan by id.
    pub async fn load_plan(&self, plan_id: &str) -> HiveResult<Plan> {
        let path = self.plans_dir.join(format!("plan_{}.json", plan_id));
        let text = tokio::fs::read_to_string(&path)
            .await
            .map_err(|_| HiveError::not_found(format!("plan not found: {}", plan_id)))?;
        Ok(serde_json::from_str(&text)?)
    }
}

/// Raw step data before id assignment and dependency normalization.
struct DraftStep {
    action: String,
    agent: String,
    tools: Vec<String>,
    priority: String,
    estimated_duration: u64,
    depends_on: Vec<usize>,
}

/// Parsed plan data before it becomes a [`Plan`].
struct PlanDraft {
    goal: String,
    steps: Vec<DraftStep>,
    required_agents: Vec<String>,
    required_tools: Vec<String>,
    expected_output: String,
    risks: Vec<String>,
    estimated_total_duration: u64,
}

impl PlanDraft {
    fn into_plan(self, task: &str) -> Plan {
        let step_count = self.steps.len();
        let steps: Vec<PlanStep> = self
            .steps
            .into_iter()
            .enumerate()
            .map(|(i, draft)| {
                // A dependency may only reference an earlier step; anything
                // else would create a cycle or a forward edge, so drop it.
                let depends_on: Vec<String> = draft
                    .depends_on
                    .iter()
                    .filter(|&&dep| dep >= 1 && dep <= step_count && dep <= i)
                    .map(|dep| format!("step_{}", dep))
                    .collect();
                let dropped = draft.depends_on.len() - depends_on.len();
                if dropped > 0 {
                    log::warn!(
                        "plan step {} dropped {} invalid dependency edge(s)",
                        i + 1,
                        dropped
                    );
                }
                PlanStep {
                    id: format!("step_{}", i + 1),
                    action: draft.action,
                    agent: AgentKind::parse(&draft.agent).unwrap_or(AgentKind::General),
                    tools_required: draft.tools,
                    depends_on,
                    priority: StepPriority::parse(&draft.priority),
                    estimated_duration_secs: draft.estimated_duration,
                    status: StepStatus::Pending,
                    result: None,
                    error: None,
                    actual_duration_secs: None,
                    skip_reason: None,
                }
            })
            .collect();

        Plan {
            id: Uuid::new_v4().to_string(),
            task: task.to_string(),
            goal: self.goal,
            steps,
            required_agents: self.required_agents,
            required_tools: self.required_tools,
            expected_output: self.expected_output,
            risks: self.risks,
            estimated_total_duration_secs: self.estimated_total_duration,
            status: PlanStatus::Pending,
            created_at: chrono::Utc::now().timestamp(),
            started_at: None,
            completed_at: None,
        }
    }
}

/// The planning prompt sent to the reasoner backend.
fn build_planning_prompt(task: &str, context: Option<&Value>) -> String {
    let context_str = match context {
        Some(ctx) => format!(
            "\n\nContext:\n{}",
            serde_json::to_string_pretty(ctx).unwrap_or_default()
        ),
        None => String::new(),
    };

    format!(
        r#"Create a detailed execution plan for this task.

Task: {task}{context_str}

Create a structured plan with:

1. GOAL: Clear statement of what needs to be achieved

2. STEPS: Numbered list of specific actions
   For each step, specify:
   - Action: What to do
   - Agent: Which agent (coder/reasoner/researcher/executor/general)
   - Tools: Which tools are needed (e.g., read_file, web_search)
   - Priority: critical/high/medium/low
   - Estimated time: in seconds
   - Dependencies: Which previous steps must complete first (by step number)

3. REQUIRED_AGENTS: List all agents needed

4. REQUIRED_TOOLS: List all tools needed

5. EXPECTED_OUTPUT: Description of successful completion

6. RISKS: Potential issues to watch for

Format your response as JSON:
{{
  "goal": "...",
  "steps": [
    {{
      "action": "...",
      "agent": "coder",
      "tools": ["read_file"],
      "priority": "critical",
      "estimated_duration": 30,
      "depends_on": []
    }}
  ],
  "required_agents": ["coder", "reasoner"],
  "required_tools": ["read_file", "write_file"],
  "expected_output": "...",
  "risks": ["..."],
  "estimated_total_duration": 120
}}

Plan:"#,
        task = task,
        context_str = context_str
    )
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.as_str().map(|s| s.to_string()))
                .collect()
        })
        .unwrap_or_default()
}

/// Parse the model's plan response: JSON first, text format second, trivial
/// plan last.
fn parse_plan_response(response: &str, task: &str) -> PlanDraft {
    if let (Some(start), Some(end)) = (response.find('{'), response.rfind('}')) {
        if end > start {
            if let Ok(parsed) = serde_json::from_str::<Value>(&response[start..=end]) {
                return draft_from_json(&parsed, task);
            }
        }
    }

    let text_draft = parse_text_plan(response);
    if !text_draft.steps.is_empty() {
        return text_draft;
    }

    fallback_draft(task, "no parseable plan in response")
}

fn draft_from_json(parsed: &Value, task: &str) -> PlanDraft {
    let steps: Vec<DraftStep> = parsed
        .get("steps")
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .map(|step| DraftStep {
                    action: step
                        .get("action")
                        .and_then(|v| v.as_str())
                        .unwrap_or("")
                        .to_string(),
                    agent: step
                        .get("agent")
                        .and_then(|v| v.as_str())
                        .unwrap_or("general")
                        .to_string(),
                    tools: string_list(step.get("tools")),
                    priority: step
                        .get("priority")
                        .and_then(|v| v.as_str())
                        .unwrap_or("medium")
                        .to_string(),
                    estimated_duration: step
                        .get("estimated_duration")
                        .and_then(|v| v.as_u64())
                        .unwrap_or(30),
                    depends_on: step
                        .get("depends_on")
                        .and_then(|v| v.as_array())
                        .map(|deps| {
                            deps.iter()
                                .filter_map(|d| d.as_u64().map(|n| n as usize))
                                .collect()
                        })
                        .unwrap_or_default(),
                })
                .collect()
        })
        .unwrap_or_default();

    if steps.is_empty() {
        return fallback_draft(task, "plan JSON had no steps");
    }

    PlanDraft {
        goal: parsed
            .get("goal")
            .and_then(|v| v.as_str())
            .unwrap_or(task)
            .to_string(),
        steps,
        required_agents: string_list(parsed.get("required_agents")),
        required_tools: string_list(parsed.get("required_tools")),
        expected_output: parsed
            .get("expected_output")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string(),
        risks: string_list(parsed.get("risks")),
        estimated_total_duration: parsed
            .get("estimated_total_duration")
            .and_then(|v| v.as_u64())
            .unwrap_or(60),
    }
}

/// Line-oriented fallback: recognizes `GOAL:` and `STEP N:` markers.
fn parse_text_plan(text: &str) -> PlanDraft {
    let mut goal = String::new();
    let mut steps = Vec::new();

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let upper = line.to_uppercase();
        if upper.starts_with("GOAL") && line.contains(':') {
            goal = line.splitn(2, ':').nth(1).unwrap_or("").trim().to_string();
        } else if upper.starts_with("STEP") && line.contains(':') {
            let action = line.splitn(2, ':').nth(1).unwrap_or("").trim().to_string();
            if !action.is_empty() {
                steps.push(DraftStep {
                    action,
                    agent: "general".to_string(),
                    tools: Vec::new(),
                    priority: "medium".to_string(),
                    estimated_duration: 30,
                    depends_on: Vec::new(),
                });
            }
        }
    }

    PlanDraft {
        goal,
        steps,
        required_agents: vec!["general".to_string()],
        required_tools: Vec::new(),
        expected_output: String::new(),
        risks: Vec::new(),
        estimated_total_duration: 60,
    }
}

/// One-step trivial plan carrying the original instruction.
fn fallback_draft(task: &str, error: &str) -> PlanDraft {
    PlanDraft {
        goal: format!("Complete task: {}", task),
        steps: vec![DraftStep {
            action: task.to_string(),
            agent: "general".to_string(),
            tools: Vec::new(),
            priority: "critical".to_string(),
            estimated_duration: 60,
            depends_on: Vec::new(),
        }],
        required_agents: vec!["general".to_string()],
        required_tools: Vec::new(),
        expected_output: "Task completed".to_string(),
        risks: vec![format!("Plan parsing failed: {}", error)],
        estimated_total_duration: 60,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft(response: &str) -> Plan {
        parse_plan_response(response, "refactor the config loader").into_plan("refactor the config loader")
    }

    #[test]
    fn json_plan_parses_with_dependencies() {
        let response = r#"Here is the plan:
{
  "goal": "Refactor config loader with tests",
  "steps": [
    {"action": "Read the config loader", "agent": "coder", "tools": ["read_file"],
     "priority": "high", "estimated_duration": 20, "depends_on": []},
    {"action": "Refactor the loader", "agent": "coder", "tools": ["edit_file", "write_file"],
     "priority": "critical", "estimated_duration": 60, "depends_on": [1]},
    {"action": "Write tests", "agent": "coder", "tools": ["write_file"],
     "priority": "high", "estimated_duration": 40, "depends_on": [2]}
  ],
  "required_agents": ["coder"],
  "required_tools": ["read_file", "edit_file", "write_file"],
  "expected_output": "Refactored loader with passing tests",
  "risks": ["breaking the public API"],
  "estimated_total_duration": 120
}
Done."#;

        let plan = draft(response);
        assert_eq!(plan.steps.len(), 3);
        assert_eq!(plan.steps[0].id, "step_1");
        assert_eq!(plan.steps[1].depends_on, vec!["step_1"]);
        assert_eq!(plan.steps[2].depends_on, vec!["step_2"]);
        assert_eq!(plan.steps[1].priority, StepPriority::Critical);
        assert_eq!(plan.steps[0].agent, AgentKind::Coder);
        assert!(plan
            .steps
            .iter()
            .any(|s| s.tools_required.contains(&"write_file".to_string())));
        assert_eq!(plan.status, PlanStatus::Pending);
    }

    #[test]
    fn forward_and_self_dependencies_are_dropped() {
        let response = r#"{
  "goal": "g",
  "steps": [
    {"action": "a", "agent": "general", "depends_on": [2]},
    {"action": "b", "agent": "general", "depends_on": [2]},
    {"action": "c", "agent": "general", "depends_on": [1, 3, 99]}
  ]
}"#;
        let plan = draft(response);
        // Step 1 depended on step 2 (forward): dropped.
        assert!(plan.steps[0].depends_on.is_empty());
        // Step 2 depended on itself: dropped.
        assert!(plan.steps[1].depends_on.is_empty());
        // Step 3 keeps only the backward edge.
        assert_eq!(plan.steps[2].depends_on, vec!["step_1"]);

        // Resulting graph is acyclic: every edge points strictly backwards.
        for (i, step) in plan.steps.iter().enumerate() {
            for dep in &step.depends_on {
                let dep_index: usize = dep.trim_start_matches("step_").parse().unwrap();
                assert!(dep_index <= i);
            }
        }
    }

    #[test]
    fn text_format_fallback() {
        let response = "GOAL: clean up the module\nSTEP 1: read the file\nSTEP 2: rewrite it";
        let plan = draft(response);
        assert_eq!(plan.goal, "clean up the module");
        assert_eq!(plan.steps.len(), 2);
        assert_eq!(plan.steps[0].action, "read the file");
        assert_eq!(plan.steps[0].agent, AgentKind::General);
    }

    #[test]
    fn garbage_yields_trivial_plan() {
        let plan = draft("I cannot help with that.");
        assert_eq!(plan.steps.len(), 1);
        assert_eq!(plan.steps[0].action, "refactor the config loader");
        assert_eq!(plan.steps[0].priority, StepPriority::Critical);
        assert!(!plan.risks.is_empty());
    }

    #[test]
    fn progress_counts() {
        let mut plan = draft("GOAL: g\nSTEP 1: a\nSTEP 2: b");
        plan.steps[0].status = StepStatus::Completed;
        let progress = plan.progress();
        assert_eq!(progress["completed"], 1);
        assert_eq!(progress["pending"], 1);
        assert_eq!(progress["failed"], 0);
    }
}
