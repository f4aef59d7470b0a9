//! Agent-to-agent delegation and multi-agent collaboration.
//!
//! Point-to-point delegation creates a persisted [`Delegation`] record and a
//! `request` message on the inter-agent queue; executing it runs the target
//! agent and sends a `result` (or `error`) message back. `request_help`
//! picks the best helper by word-overlap against each agent's capability
//! phrases. Collaboration is coordinator-led: the coordinator drafts a plan,
//! each participant works its subtask in sequence (seeing the plan and all
//! prior contributions), and the coordinator synthesizes the final answer.

use crate::agent::AgentKind;
use crate::error::{HiveError, HiveResult};
use crate::executor::StepRunner;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Kind of an inter-agent message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Request,
    Response,
    Query,
    Result,
    Error,
}

/// Priority of a delegation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DelegationPriority {
    Low,
    Normal,
    High,
    Urgent,
}

/// Lifecycle state of a delegation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DelegationStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

/// One message on the inter-agent queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentMessage {
    pub id: String,
    pub from_agent: AgentKind,
    pub to_agent: AgentKind,
    pub message_type: MessageType,
    pub content: Value,
    pub task_id: String,
    pub priority: DelegationPriority,
    pub requires_response: bool,
    pub timestamp: i64,
    /// Id of the message this one answers, for `result`/`error` messages.
    pub response_to: Option<String>,
}

/// A delegated task from one agent to another.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Delegation {
    pub id: String,
    pub parent_task_id: String,
    pub from_agent: AgentKind,
    pub to_agent: AgentKind,
    pub task_description: String,
    pub context: Value,
    pub priority: DelegationPriority,
    pub status: DelegationStatus,
    pub created_at: i64,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
    pub result: Option<String>,
    pub error: Option<String>,
}

/// Capability phrases per agent, used by helper selection.
fn capabilities(agent: AgentKind) -> &'static [&'static str] {
    match agent {
        AgentKind::Coder => &[
            "write code",
            "debug code",
            "refactor code",
            "review code",
            "explain code",
            "optimize code",
        ],
        AgentKind::Reasoner => &[
            "create plan",
            "analyze problem",
            "make decision",
            "evaluate options",
            "find solution",
            "explain logic",
        ],
        AgentKind::Researcher => &[
            "find information",
            "search documentation",
            "compare alternatives",
            "gather context",
            "verify facts",
        ],
        AgentKind::Executor => &[
            "run command",
            "execute script",
            "test code",
            "deploy changes",
            "manage files",
        ],
        AgentKind::General => &[
            "answer question",
            "have conversation",
            "explain concept",
            "summarize text",
        ],
        _ => &[],
    }
}

/// Candidates considered for help requests, in scoring order.
const HELPER_CANDIDATES: [AgentKind; 5] = [
    AgentKind::Coder,
    AgentKind::Reasoner,
    AgentKind::Researcher,
    AgentKind::Executor,
    AgentKind::General,
];

/// Result of one collaboration run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollaborationOutcome {
    pub collaboration_id: String,
    pub success: bool,
    pub coordinator: AgentKind,
    pub plan: String,
    /// Per-participant contribution or error text, in execution order.
    pub contributions: Vec<Value>,
    pub synthesis: Option<String>,
    pub error: Option<String>,
}

/// Manages delegations, the message queue, and collaborations.
pub struct DelegationManager {
    runner: Arc<dyn StepRunner>,
    delegations_dir: PathBuf,
    active: Mutex<std::collections::HashMap<String, Delegation>>,
    queue: Mutex<Vec<AgentMessage>>,
}

impl DelegationManager {
    /// `memory_dir` hosts the `delegations/` directory.
    pub fn new(runner: Arc<dyn StepRunner>, memory_dir: PathBuf) -> HiveResult<Self> {
        let delegations_dir = memory_dir.join("delegations");
        std::fs::create_dir_all(&delegations_dir)?;
        Ok(Self {
            runner,
            delegations_dir,
            active: Mutex::new(std::collections::HashMap::new()),
            queue: Mutex::new(Vec::new()),
        })
    }

    /// Create a delegation record and enqueue the `request` message.
    pub async fn delegate(
        &self,
        from_agent: AgentKind,
        to_agent: AgentKind,
        task: &str,
        context: Value,
        parent_task_id: &str,
        priority: DelegationPriority,
    ) -> HiveResult<Delegation> {
        let delegation = Delegation {
            id: Uuid::new_v4().to_string(),
            parent_task_id: parent_task_id.to_string(),
            from_agent,
            to_agent,
            task_description: task.to_string(),
            context: context.clone(),
            priority,
            status: DelegationStatus::Pending,
            created_at: chrono::Utc::now().timestamp(),
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
        };

        let message = AgentMessage {
            id: Uuid::new_v4().to_string(),
            from_agent,
            to_agent,
            message_type: MessageType::Request,
            content: serde_json::json!({
                "task": task,
                "context": context,
                "delegation_id": delegation.id,
            }),
            task_id: parent_task_id.to_string(),
            priority,
            requires_response: true,
            timestamp: chrono::Utc::now().timestamp(),
            response_to: None,
        };

        self.queue.lock().await.push(message);
        self.active
            .lock()
            .await
            .insert(delegation.id.clone(), delegation.clone());
        self.save_delegation(&delegation).await?;
        Ok(delegation)
    }

    /// Execute a pending delegation with its target agent.
    pub async fn execute_delegation(
        &self,
        delegation_id: &str,
        session_id: &str,
    ) -> HiveResult<Value> {
        let mut delegation = self
            .active
            .lock()
            .await
            .get(delegation_id)
            .cloned()
            .ok_or_else(|| {
                HiveError::not_found(format!("delegation not found: {}", delegation_id))
            })?;

        delegation.status = DelegationStatus::InProgress;
        delegation.started_at = Some(chrono::Utc::now().timestamp());

        let run = self
            .runner
            .run_step(
                delegation.to_agent,
                &delegation.task_description,
                session_id,
                &delegation.context,
            )
            .await;

        delegation.completed_at = Some(chrono::Utc::now().timestamp());
        let outcome = match run {
            Ok(response) => {
                delegation.status = DelegationStatus::Completed;
                delegation.result = Some(response.clone());
                self.enqueue_outcome_message(&delegation, MessageType::Result, &response)
                    .await;
                Ok(serde_json::json!({
                    "success": true,
                    "delegation_id": delegation.id,
                    "result": response,
                    "duration": delegation.completed_at.unwrap() - delegation.started_at.unwrap(),
                }))
            }
            Err(e) => {
                delegation.status = DelegationStatus::Failed;
                delegation.error = Some(e.to_string());
                self.enqueue_outcome_message(&delegation, MessageType::Error, &e.to_string())
                    .await;
                Ok(serde_json::json!({
                    "success": false,
                    "delegation_id": delegation.id,
                    "error": e.to_string(),
                }))
            }
        };

        self.active
            .lock()
            .await
            .insert(delegation.id.clone(), delegation.clone());
        self.save_delegation(&delegation).await?;
        outcome
    }

    /// Queue a `result`/`error` message back to the requesting agent.
    async fn enqueue_outcome_message(
        &self,
        delegation: &Delegation,
        message_type: MessageType,
        payload: &str,
    ) {
        let message = AgentMessage {
            id: Uuid::new_v4().to_string(),
            from_agent: delegation.to_agent,
            to_agent: delegation.from_agent,
            message_type,
            content: serde_json::json!({
                "delegation_id": delegation.id,
                "payload": payload,
            }),
            task_id: delegation.parent_task_id.clone(),
            priority: delegation.priority,
            requires_response: false,
            timestamp: chrono::Utc::now().timestamp(),
            response_to: Some(delegation.id.clone()),
        };
        self.queue.lock().await.push(message);
    }

    /// Delegate to whichever agent best matches the stated need.
    pub async fn request_help(
        &self,
        requesting_agent: AgentKind,
        help_needed: &str,
        context: Value,
        task_id: &str,
    ) -> HiveResult<Value> {
        let helper = select_helper(help_needed, requesting_agent);
        let delegation = self
            .delegate(
                requesting_agent,
                helper,
                help_needed,
                context,
                task_id,
                DelegationPriority::High,
            )
            .await?;

        Ok(serde_json::json!({
            "success": true,
            "delegation_id": delegation.id,
            "helper_agent": helper.as_str(),
            "message": format!("Delegated to {} agent", helper.as_str()),
        }))
    }

    /// Coordinator-led collaboration: plan, fan out, synthesize.
    pub async fn collaborate(
        &self,
        agents: &[AgentKind],
        task: &str,
        session_id: &str,
        coordinator: AgentKind,
    ) -> HiveResult<CollaborationOutcome> {
        if agents.is_empty() {
            return Err(HiveError::validation("collaboration requires agents"));
        }
        let collaboration_id = Uuid::new_v4().to_string();
        let agent_names: Vec<&str> = agents.iter().map(|a| a.as_str()).collect();

        // Step 1: coordinator drafts the plan.
        let plan_request = format!(
            "Create a collaboration plan for this task involving these agents: {}\n\n\
             Task: {}\n\n\
             For each agent, specify:\n\
             1. What they should do\n\
             2. What information they need from other agents\n\
             3. In what order they should work",
            agent_names.join(", "),
            task
        );
        let plan = self
            .runner
            .run_step(
                coordinator,
                &plan_request,
                session_id,
                &serde_json::json!({"collaboration_id": collaboration_id}),
            )
            .await?;

        // Step 2: participants work in sequence, each seeing the plan and
        // everything produced so far. Failures are preserved, not fatal.
        let mut contributions: Vec<Value> = Vec::new();
        for agent in agents {
            let prior: Vec<String> = contributions
                .iter()
                .map(|c| {
                    format!(
                        "{}: {}",
                        c["agent"].as_str().unwrap_or(""),
                        c["result"].as_str().or(c["error"].as_str()).unwrap_or("")
                    )
                })
                .collect();
            let subtask = format!(
                "You are collaborating on this task: {}\n\n\
                 Coordinator plan:\n{}\n\n\
                 Results from other agents so far:\n{}\n\n\
                 Contribute your part now.",
                task,
                plan,
                if prior.is_empty() {
                    "(none yet)".to_string()
                } else {
                    prior.join("\n\n")
                }
            );

            match self
                .runner
                .run_step(*agent, &subtask, session_id, &Value::Null)
                .await
            {
                Ok(result) => contributions.push(serde_json::json!({
                    "agent": agent.as_str(),
                    "result": result,
                })),
                Err(e) => contributions.push(serde_json::json!({
                    "agent": agent.as_str(),
                    "error": e.to_string(),
                })),
            }
        }

        // Step 3: coordinator synthesizes. Collaboration succeeds iff this
        // final step does.
        let contributions_text: Vec<String> = contributions
            .iter()
            .map(|c| serde_json::to_string_pretty(c).unwrap_or_default())
            .collect();
        let synthesis_request = format!(
            "Synthesize a final answer for this task from the agents' contributions.\n\n\
             Task: {}\n\nContributions:\n{}",
            task,
            contributions_text.join("\n")
        );

        match self
            .runner
            .run_step(coordinator, &synthesis_request, session_id, &Value::Null)
            .await
        {
            Ok(synthesis) => Ok(CollaborationOutcome {
                collaboration_id,
                success: true,
                coordinator,
                plan,
                contributions,
                synthesis: Some(synthesis),
                error: None,
            }),
            Err(e) => Ok(CollaborationOutcome {
                collaboration_id,
                success: false,
                coordinator,
                plan,
                contributions,
                synthesis: None,
                error: Some(e.to_string()),
            }),
        }
    }

    /// Snapshot of one delegation.
    pub async fn get_delegation(&self, delegation_id: &str) -> Option<Delegation> {
        self.active.lock().await.get(delegation_id).cloned()
    }

    /// Messages on the queue, optionally filtered to one recipient.
    pub async fn message_queue(&self, for_agent: Option<AgentKind>) -> Vec<AgentMessage> {
        let queue = self.queue.lock().await;
        match for_agent {
            Some(agent) => queue
                .iter()
                .filter(|m| m.to_agent == agent)
                .cloned()
                .collect(),
            None => queue.clone(),
        }
    }

    async fn save_delegation(&self, delegation: &Delegation) -> HiveResult<()> {
        let path = self
            .delegations_dir
            .join(format!("delegation_{}.json", delegation.id));
        tokio::fs::write(&path, serde_json::to_string_pretty(delegation)?).await?;
        Ok(())
    }
}

/// Pick the best helper by capability word overlap; the requester is
/// excluded, and the reasoner (or general, when the reasoner asks) is the
/// default.
pub fn select_helper(task: &str, exclude: AgentKind) -> AgentKind {
    let task_lower = task.to_lowercase();
    let mut best: Option<AgentKind> = None;
    let mut best_score = 0usize;

    for candidate in HELPER_CANDIDATES.iter() {
        if *candidate == exclude {
            continue;
        }
        let mut score = 0usize;
        for capability in capabilities(*candidate) {
            if capability
                .split_whitespace()
                .any(|word| task_lower.contains(word))
            {
                score += 1;
            }
        }
        if score > best_score {
            best_score = score;
            best = Some(*candidate);
        }
    }

    match best {
        Some(agent) if best_score > 0 => agent,
        _ => {
            if exclude == AgentKind::Reasoner {
                AgentKind::General
            } else {
                AgentKind::Reasoner
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;
    use tempfile::TempDir;

    /// Runner that records calls and optionally fails for one agent.
    struct RecordingRunner {
        fail_agent: Option<AgentKind>,
        calls: StdMutex<Vec<(AgentKind, String)>>,
    }

    #[async_trait]
    impl StepRunner for RecordingRunner {
        async fn run_step(
            &self,
            agent: AgentKind,
            task: &str,
            _session_id: &str,
            _context: &Value,
        ) -> HiveResult<String> {
            self.calls.lock().unwrap().push((agent, task.to_string()));
            if self.fail_agent == Some(agent) {
                Err(HiveError::transport("backend down"))
            } else {
                Ok(format!("{} says ok", agent.as_str()))
            }
        }
    }

    fn manager(fail_agent: Option<AgentKind>) -> (TempDir, DelegationManager, Arc<RecordingRunner>) {
        let dir = TempDir::new().unwrap();
        let runner = Arc::new(RecordingRunner {
            fail_agent,
            calls: StdMutex::new(Vec::new()),
        });
        let manager =
            DelegationManager::new(runner.clone(), dir.path().join("memory")).unwrap();
        (dir, manager, runner)
    }

    #[tokio::test]
    async fn delegate_then_execute_round_trip() {
        let (_dir, manager, _runner) = manager(None);
        let delegation = manager
            .delegate(
                AgentKind::Reasoner,
                AgentKind::Coder,
                "write the parser",
                serde_json::json!({"module": "parser"}),
                "task-1",
                DelegationPriority::Normal,
            )
            .await
            .unwrap();
        assert_eq!(delegation.status, DelegationStatus::Pending);

        // A request message is on the queue for the coder.
        let inbox = manager.message_queue(Some(AgentKind::Coder)).await;
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].message_type, MessageType::Request);
        assert!(inbox[0].requires_response);

        let outcome = manager
            .execute_delegation(&delegation.id, "s1")
            .await
            .unwrap();
        assert_eq!(outcome["success"], true);

        let updated = manager.get_delegation(&delegation.id).await.unwrap();
        assert_eq!(updated.status, DelegationStatus::Completed);
        assert!(updated.result.unwrap().contains("coder"));

        // Result message flows back to the requester.
        let replies = manager.message_queue(Some(AgentKind::Reasoner)).await;
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].message_type, MessageType::Result);
        assert_eq!(replies[0].response_to.as_deref(), Some(delegation.id.as_str()));
    }

    #[tokio::test]
    async fn failed_delegation_sends_error_message() {
        let (_dir, manager, _runner) = manager(Some(AgentKind::Executor));
        let delegation = manager
            .delegate(
                AgentKind::Coder,
                AgentKind::Executor,
                "run the tests",
                Value::Null,
                "task-2",
                DelegationPriority::High,
            )
            .await
            .unwrap();

        let outcome = manager
            .execute_delegation(&delegation.id, "s1")
            .await
            .unwrap();
        assert_eq!(outcome["success"], false);

        let updated = manager.get_delegation(&delegation.id).await.unwrap();
        assert_eq!(updated.status, DelegationStatus::Failed);

        let replies = manager.message_queue(Some(AgentKind::Coder)).await;
        assert_eq!(replies[0].message_type, MessageType::Error);
    }

    #[test]
    fn helper_selection_matches_capabilities() {
        assert_eq!(
            select_helper("I need someone to debug this code", AgentKind::Reasoner),
            AgentKind::Coder
        );
        assert_eq!(
            select_helper("search the documentation for this", AgentKind::Coder),
            AgentKind::Researcher
        );
        // Requester is excluded even on a perfect match.
        assert_ne!(
            select_helper("write code for me", AgentKind::Coder),
            AgentKind::Coder
        );
    }

    #[test]
    fn helper_defaults() {
        assert_eq!(select_helper("xyzzy", AgentKind::Coder), AgentKind::Reasoner);
        assert_eq!(
            select_helper("xyzzy", AgentKind::Reasoner),
            AgentKind::General
        );
    }

    #[tokio::test]
    async fn collaboration_runs_plan_participants_synthesis() {
        let (_dir, manager, runner) = manager(None);
        let outcome = manager
            .collaborate(
                &[AgentKind::Coder, AgentKind::Researcher],
                "build a scraper",
                "s1",
                AgentKind::Reasoner,
            )
            .await
            .unwrap();

        assert!(outcome.success);
        assert_eq!(outcome.contributions.len(), 2);
        assert!(outcome.synthesis.is_some());

        let calls = runner.calls.lock().unwrap();
        // plan + 2 participants + synthesis
        assert_eq!(calls.len(), 4);
        assert_eq!(calls[0].0, AgentKind::Reasoner);
        assert_eq!(calls[1].0, AgentKind::Coder);
        assert_eq!(calls[2].0, AgentKind::Researcher);
        assert_eq!(calls[3].0, AgentKind::Reasoner);
        // The second participant sees the first's contribution.
        assert!(calls[2].1.contains("coder says ok"));
    }

    #[tokio::test]
    async fn partial_failure_is_preserved_in_the_aggregate() {
        let (_dir, manager, _runner) = manager(Some(AgentKind::Researcher));
        let outcome = manager
            .collaborate(
                &[AgentKind::Coder, AgentKind::Researcher],
                "build a scraper",
                "s1",
                AgentKind::Reasoner,
            )
            .await
            .unwrap();

        // Synthesis still runs, so the collaboration succeeds overall.
        assert!(outcome.success);
        assert!(outcome.contributions[1]["error"]
            .as_str()
            .unwrap()
            .contains("backend down"));
    }
}
