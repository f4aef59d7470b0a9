//! Plan executor: a sequential DAG scheduler over [`Plan`] steps.
//!
//! Steps run one at a time in source order within the ready set (steps whose
//! dependencies are all `completed`), which keeps execution deterministic and
//! makes each step's results stable inputs for its dependents. Policies:
//! a failing `critical` step marks the plan `failed` and aborts the rest; a
//! non-critical failure leaves dependents to be skipped with a reason when
//! they reach the selector; every step runs under a deadline of twice its
//! declared estimate, bounded by a hard cap.
//!
//! The step-running seam is the [`StepRunner`] trait, implemented by the
//! agent engine in production and by mocks in tests.

use crate::agent::AgentKind;
use crate::error::{HiveError, HiveResult};
use crate::planner::{Plan, PlanStatus, PlanStep, StepPriority, StepStatus, TaskPlanner};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Floor for the per-step deadline so zero estimates still get a chance.
const MIN_STEP_TIMEOUT_SECS: u64 = 10;

/// Cap on the per-step deadline. A step gets twice its declared estimate,
/// but never more than this, so an inflated estimate cannot hold the plan
/// hostage.
const MAX_STEP_TIMEOUT_SECS: u64 = 300;

/// Runs one plan step with a specific agent. Implemented by the agent engine.
#[async_trait]
pub trait StepRunner: Send + Sync {
    /// Execute `task` as `agent` within `session_id`, with `context`
    /// carrying the plan goal and dependency results.
    async fn run_step(
        &self,
        agent: AgentKind,
        task: &str,
        session_id: &str,
        context: &Value,
    ) -> HiveResult<String>;
}

/// Aggregate result of one plan execution.
#[derive(Debug, Clone)]
pub struct PlanRunResult {
    pub plan_id: String,
    pub task: String,
    pub steps_completed: usize,
    pub steps_failed: usize,
    pub step_results: Vec<Value>,
    pub success: bool,
    pub error: Option<String>,
}

impl PlanRunResult {
    pub fn to_json(&self) -> Value {
        serde_json::json!({
            "plan_id": self.plan_id,
            "task": self.task,
            "steps_completed": self.steps_completed,
            "steps_failed": self.steps_failed,
            "step_results": self.step_results,
            "success": self.success,
            "error": self.error,
        })
    }
}

/// Sequential plan executor.
pub struct PlanExecutor {
    runner: Arc<dyn StepRunner>,
    planner: Arc<TaskPlanner>,
}

impl PlanExecutor {
    pub fn new(runner: Arc<dyn StepRunner>, planner: Arc<TaskPlanner>) -> Self {
        Self { runner, planner }
    }

    /// Execute the plan, mutating step states in place and persisting the
    /// final plan state.
    pub async fn execute(&self, plan: &mut Plan, session_id: &str) -> PlanRunResult {
        plan.status = PlanStatus::InProgress;
        plan.started_at = Some(chrono::Utc::now().timestamp());

        let mut result = PlanRunResult {
            plan_id: plan.id.clone(),
            task: plan.task.clone(),
            steps_completed: 0,
            steps_failed: 0,
            step_results: Vec::new(),
            success: false,
            error: None,
        };

        for index in 0..plan.steps.len() {
            if !dependencies_met(&plan.steps[index], &plan.steps) {
                let step = &mut plan.steps[index];
                step.status = StepStatus::Skipped;
                let reason = "dependencies not completed".to_string();
                step.skip_reason = Some(reason.clone());
                result.step_results.push(serde_json::json!({
                    "step_id": step.id,
                    "status": "skipped",
                    "reason": reason,
                }));
                continue;
            }

            let context = build_step_context(&plan.steps[index], plan);
            let step_result = self
                .execute_step(&mut plan.steps[index], session_id, &context)
                .await;
            result.step_results.push(step_result);

            let step = &plan.steps[index];
            match step.status {
                StepStatus::Completed => result.steps_completed += 1,
                StepStatus::Failed => {
                    result.steps_failed += 1;
                    if step.priority == StepPriority::Critical {
                        result.error = Some(format!("Critical step failed: {}", step.action));
                        plan.status = PlanStatus::Failed;
                        break;
                    }
                }
                _ => {}
            }
        }

        if plan.status != PlanStatus::Failed {
            plan.status = PlanStatus::Completed;
            result.success = true;
        }
        plan.completed_at = Some(chrono::Utc::now().timestamp());

        if let Err(e) = self.planner.save_plan(plan).await {
            log::warn!("failed to persist plan {}: {}", plan.id, e);
        }

        result
    }

    /// Run one step under its deadline and record the outcome on the step.
    async fn execute_step(&self, step: &mut PlanStep, session_id: &str, context: &Value) -> Value {
        step.status = StepStatus::InProgress;
        let started = Instant::now();

        let timeout_secs = step_timeout_secs(step.estimated_duration_secs);
        let run = self
            .runner
            .run_step(step.agent, &step.action, session_id, context);

        let outcome: HiveResult<String> =
            match tokio::time::timeout(Duration::from_secs(timeout_secs), run).await {
                Ok(result) => result,
                Err(_) => Err(HiveError::timeout(format!(
                    "step exceeded {}s deadline",
                    timeout_secs
                ))),
            };

        let duration = started.elapsed().as_secs();
        step.actual_duration_secs = Some(duration);

        match outcome {
            Ok(response) => {
                step.status = StepStatus::Completed;
                step.result = Some(response.clone());
                serde_json::json!({
                    "step_id": step.id,
                    "status": "completed",
                    "action": step.action,
                    "agent_used": step.agent.as_str(),
                    "duration": duration,
                    "result": response,
                })
            }
            Err(e) => {
                step.status = StepStatus::Failed;
                step.error = Some(e.to_string());
                serde_json::json!({
                    "step_id": step.id,
                    "status": "failed",
                    "action": step.action,
                    "error": e.to_string(),
                    "duration": duration,
                })
            }
        }
    }
}

/// Per-step deadline: twice the declared estimate, floored so zero
/// estimates still run and capped so inflated estimates stay bounded.
fn step_timeout_secs(estimated_duration_secs: u64) -> u64 {
    (estimated_duration_secs * 2)
        .max(MIN_STEP_TIMEOUT_SECS)
        .min(MAX_STEP_TIMEOUT_SECS)
}

/// A step is ready iff every dependency completed.
fn dependencies_met(step: &PlanStep, steps: &[PlanStep]) -> bool {
    step.depends_on.iter().all(|dep_id| {
        steps
            .iter()
            .find(|s| &s.id == dep_id)
            .map(|s| s.status == StepStatus::Completed)
            .unwrap_or(false)
    })
}

/// Context passed to a step: plan goal plus each dependency's result.
fn build_step_context(step: &PlanStep, plan: &Plan) -> Value {
    let previous_results: Vec<Value> = step
        .depends_on
        .iter()
        .filter_map(|dep_id| {
            plan.steps
                .iter()
                .find(|s| &s.id == dep_id)
                .and_then(|dep| {
                    dep.result.as_ref().map(|result| {
                        serde_json::json!({
                            "step_id": dep.id,
                            "action": dep.action,
                            "result": result,
                        })
                    })
                })
        })
        .collect();

    serde_json::json!({
        "plan_goal": plan.goal,
        "current_step": step.id,
        "previous_results": previous_results,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client_wrapper::{ChatMessage, ClientWrapper, ToolDefinition};
    use std::collections::HashSet;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Runner that succeeds or fails per an action substring, recording the
    /// order in which steps ran.
    struct ScriptedRunner {
        fail_on: Vec<String>,
        ran: Mutex<Vec<String>>,
        seen_context: Mutex<Vec<Value>>,
    }

    #[async_trait]
    impl StepRunner for ScriptedRunner {
        async fn run_step(
            &self,
            _agent: AgentKind,
            task: &str,
            _session_id: &str,
            context: &Value,
        ) -> HiveResult<String> {
            self.ran.lock().unwrap().push(task.to_string());
            self.seen_context.lock().unwrap().push(context.clone());
            if self.fail_on.iter().any(|f| task.contains(f)) {
                Err(HiveError::internal(format!("scripted failure for {}", task)))
            } else {
                Ok(format!("done: {}", task))
            }
        }
    }

    struct SilentClient;

    #[async_trait]
    impl ClientWrapper for SilentClient {
        async fn chat(
            &self,
            _messages: &[ChatMessage],
            _tools: Option<&[ToolDefinition]>,
        ) -> HiveResult<ChatMessage> {
            Ok(ChatMessage::assistant("{}"))
        }
        fn model_name(&self) -> &str {
            "silent"
        }
    }

    fn planner(dir: &TempDir) -> Arc<TaskPlanner> {
        Arc::new(
            TaskPlanner::new(Arc::new(SilentClient), dir.path().join("memory")).unwrap(),
        )
    }

    fn step(id: usize, action: &str, deps: &[usize], priority: StepPriority) -> PlanStep {
        PlanStep {
            id: format!("step_{}", id),
            action: action.to_string(),
            agent: AgentKind::General,
            tools_required: Vec::new(),
            depends_on: deps.iter().map(|d| format!("step_{}", d)).collect(),
            priority,
            estimated_duration_secs: 5,
            status: StepStatus::Pending,
            result: None,
            error: None,
            actual_duration_secs: None,
            skip_reason: None,
        }
    }

    fn plan_with(steps: Vec<PlanStep>) -> Plan {
        Plan {
            id: "test-plan".to_string(),
            task: "test".to_string(),
            goal: "test goal".to_string(),
            steps,
            required_agents: Vec::new(),
            required_tools: Vec::new(),
            expected_output: String::new(),
            risks: Vec::new(),
            estimated_total_duration_secs: 60,
            status: PlanStatus::Pending,
            created_at: 0,
            started_at: None,
            completed_at: None,
        }
    }

    #[test]
    fn step_deadline_is_floored_and_capped() {
        assert_eq!(step_timeout_secs(0), MIN_STEP_TIMEOUT_SECS);
        assert_eq!(step_timeout_secs(3), MIN_STEP_TIMEOUT_SECS);
        assert_eq!(step_timeout_secs(30), 60);
        // An inflated planner estimate cannot exceed the cap.
        assert_eq!(step_timeout_secs(3600), MAX_STEP_TIMEOUT_SECS);
        assert_eq!(step_timeout_secs(u64::MAX / 4), MAX_STEP_TIMEOUT_SECS);
    }

    #[tokio::test]
    async fn all_steps_succeed() {
        let dir = TempDir::new().unwrap();
        let runner = Arc::new(ScriptedRunner {
            fail_on: vec![],
            ran: Mutex::new(Vec::new()),
            seen_context: Mutex::new(Vec::new()),
        });
        let executor = PlanExecutor::new(runner.clone(), planner(&dir));

        let mut plan = plan_with(vec![
            step(1, "read", &[], StepPriority::High),
            step(2, "modify", &[1], StepPriority::Critical),
            step(3, "test", &[2], StepPriority::High),
        ]);

        let result = executor.execute(&mut plan, "s1").await;
        assert!(result.success);
        assert_eq!(result.steps_completed, plan.steps.len());
        assert_eq!(plan.status, PlanStatus::Completed);
        assert_eq!(
            *runner.ran.lock().unwrap(),
            vec!["read", "modify", "test"]
        );
    }

    #[tokio::test]
    async fn critical_failure_aborts() {
        let dir = TempDir::new().unwrap();
        let runner = Arc::new(ScriptedRunner {
            fail_on: vec!["modify".to_string()],
            ran: Mutex::new(Vec::new()),
            seen_context: Mutex::new(Vec::new()),
        });
        let executor = PlanExecutor::new(runner.clone(), planner(&dir));

        let mut plan = plan_with(vec![
            step(1, "read", &[], StepPriority::High),
            step(2, "modify", &[1], StepPriority::Critical),
            step(3, "test", &[2], StepPriority::High),
        ]);

        let result = executor.execute(&mut plan, "s1").await;
        assert!(!result.success);
        assert_eq!(plan.status, PlanStatus::Failed);
        assert!(result.error.unwrap().contains("Critical step failed"));
        // Step 3 never ran.
        assert_eq!(runner.ran.lock().unwrap().len(), 2);
        assert_eq!(plan.steps[2].status, StepStatus::Pending);
    }

    #[tokio::test]
    async fn noncritical_failure_skips_dependents() {
        let dir = TempDir::new().unwrap();
        let runner = Arc::new(ScriptedRunner {
            fail_on: vec!["flaky".to_string()],
            ran: Mutex::new(Vec::new()),
            seen_context: Mutex::new(Vec::new()),
        });
        let executor = PlanExecutor::new(runner, planner(&dir));

        let mut plan = plan_with(vec![
            step(1, "flaky fetch", &[], StepPriority::Medium),
            step(2, "process fetch output", &[1], StepPriority::Medium),
            step(3, "independent cleanup", &[], StepPriority::Medium),
        ]);

        let result = executor.execute(&mut plan, "s1").await;
        assert!(result.success); // no critical failure
        assert_eq!(result.steps_failed, 1);
        assert_eq!(plan.steps[1].status, StepStatus::Skipped);
        assert!(plan.steps[1].skip_reason.is_some());
        assert_eq!(plan.steps[2].status, StepStatus::Completed);

        // Invariant: nothing entered in_progress before its dependencies
        // completed; a skipped step was never run at all.
        let mut completed: HashSet<&str> = HashSet::new();
        for step in &plan.steps {
            if step.status == StepStatus::Completed {
                for dep in &step.depends_on {
                    assert!(completed.contains(dep.as_str()));
                }
                completed.insert(&step.id);
            }
        }
    }

    #[tokio::test]
    async fn dependency_results_flow_into_context() {
        let dir = TempDir::new().unwrap();
        let runner = Arc::new(ScriptedRunner {
            fail_on: vec![],
            ran: Mutex::new(Vec::new()),
            seen_context: Mutex::new(Vec::new()),
        });
        let executor = PlanExecutor::new(runner.clone(), planner(&dir));

        let mut plan = plan_with(vec![
            step(1, "produce", &[], StepPriority::High),
            step(2, "consume", &[1], StepPriority::High),
        ]);

        executor.execute(&mut plan, "s1").await;

        let contexts = runner.seen_context.lock().unwrap();
        assert_eq!(contexts[1]["plan_goal"], "test goal");
        assert_eq!(contexts[1]["previous_results"][0]["step_id"], "step_1");
        assert_eq!(
            contexts[1]["previous_results"][0]["result"],
            "done: produce"
        );
    }
}
