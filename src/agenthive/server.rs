//! HTTP surface and streaming frontend.
//!
//! JSON endpoints for chat, classification, voting, planning, delegation,
//! collaboration, sandbox execution, metrics, and session inspection, plus
//! the SSE streaming endpoint. Every error is a JSON body
//! `{"error": {"kind", "message"}}` with the status class from the error
//! taxonomy; streams end with exactly one terminal `done`/`error` event and
//! a client disconnect trips the engine's cancel token.

use crate::agent::AgentKind;
use crate::delegation::{DelegationManager, DelegationPriority};
use crate::engine::{AgentEngine, CancelToken, StreamFrame};
use crate::error::{ErrorKind, HiveError, HiveResult};
use crate::executor::PlanExecutor;
use crate::memory::{MessageRole, SessionStore};
use crate::planner::TaskPlanner;
use crate::sandbox::{CodeRunner, SandboxLanguage};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router as AxumRouter};
use serde::Deserialize;
use serde_json::{json, Value};
use std::convert::Infallible;
use std::sync::Arc;
use tokio::net::TcpListener;
use uuid::Uuid;

/// Shared application state handed to every handler.
pub struct AppState {
    pub engine: Arc<AgentEngine>,
    pub memory: Arc<SessionStore>,
    pub planner: Arc<TaskPlanner>,
    pub plan_executor: Arc<PlanExecutor>,
    pub delegation: Arc<DelegationManager>,
    pub sandbox: Arc<dyn CodeRunner>,
}

/// Build the router with every endpoint mounted.
pub fn build_router(state: Arc<AppState>) -> AxumRouter {
    AxumRouter::new()
        .route("/chat", post(chat))
        .route("/chat/stream", post(chat_stream))
        .route("/classify", post(classify))
        .route("/agents", get(agents))
        .route("/vote", post(vote))
        .route("/plan", post(create_plan))
        .route("/plan/{id}/execute", post(execute_plan))
        .route("/delegate", post(delegate))
        .route("/collaborate", post(collaborate))
        .route("/sandbox/execute", post(sandbox_execute))
        .route("/metrics/agent/{agent}", get(agent_metrics))
        .route("/metrics/report", get(metrics_report))
        .route("/session/{id}", get(session))
        .route("/session/{id}/history", get(session_history))
        .with_state(state)
}

/// Bind and serve until the process exits.
pub async fn serve(state: Arc<AppState>, bind_addr: &str) -> HiveResult<()> {
    let listener = TcpListener::bind(bind_addr)
        .await
        .map_err(|e| HiveError::internal(format!("cannot bind {}: {}", bind_addr, e)))?;
    log::info!("agenthive listening on {}", bind_addr);
    axum::serve(listener, build_router(state))
        .await
        .map_err(|e| HiveError::internal(format!("server failed: {}", e)))?;
    Ok(())
}

// ---- Error plumbing ----

/// Render a [`HiveError`] as the JSON error body with its status class.
fn error_response(err: HiveError) -> Response {
    let status =
        StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let message = if err.kind == ErrorKind::Internal {
        // Internal faults surface opaquely; the detail goes to the log.
        let id = Uuid::new_v4().to_string();
        log::error!("internal error {}: {}", id, err);
        format!("internal error (id {})", id)
    } else {
        err.message.clone()
    };
    (
        status,
        Json(json!({"error": {"kind": err.kind.as_str(), "message": message}})),
    )
        .into_response()
}

fn require_str<'a>(body: &'a Value, field: &str) -> HiveResult<&'a str> {
    body.get(field)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| HiveError::validation(format!("missing field: {}", field)))
}

fn parse_agent(raw: &str) -> HiveResult<AgentKind> {
    AgentKind::parse(raw).ok_or_else(|| HiveError::validation(format!("unknown agent: {}", raw)))
}

#[derive(Deserialize)]
struct DaysQuery {
    days: Option<u32>,
}

#[derive(Deserialize)]
struct LimitQuery {
    limit: Option<usize>,
}

// ---- Chat ----

async fn chat(State(state): State<Arc<AppState>>, Json(body): Json<Value>) -> Response {
    let message = match require_str(&body, "message") {
        Ok(message) => message.to_string(),
        Err(e) => return error_response(e),
    };
    let user_id = body
        .get("user_id")
        .and_then(|v| v.as_str())
        .unwrap_or("default");
    let session_id = state
        .memory
        .ensure_session(body.get("session_id").and_then(|v| v.as_str()), user_id)
        .await;

    if let Err(e) = state
        .memory
        .add_message(&session_id, MessageRole::User, &message, None, &[])
        .await
    {
        return error_response(e);
    }

    let outcome = state.engine.execute_task(&message, &session_id).await;

    let _ = state
        .memory
        .add_message(
            &session_id,
            MessageRole::Assistant,
            &outcome.response,
            Some(outcome.agent_used.as_str()),
            &outcome.tools_used,
        )
        .await;

    let summary = state.memory.conversation_summary(&session_id).await;
    Json(json!({
        "response": outcome.response,
        "session_id": session_id,
        "agent_used": outcome.agent_used.as_str(),
        "agent_name": outcome.agent_name,
        "routing": outcome.routing,
        "execution_time": outcome.execution_time_secs,
        "tools_used": outcome.tools_used,
        "conversation_summary": summary,
        "status": if outcome.success { "success" } else { "error" },
    }))
    .into_response()
}

/// Cancels the engine task when the SSE stream is dropped by the client.
struct CancelOnDrop(CancelToken);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

async fn chat_stream(State(state): State<Arc<AppState>>, Json(body): Json<Value>) -> Response {
    let message = match require_str(&body, "message") {
        Ok(message) => message.to_string(),
        Err(e) => return error_response(e),
    };
    let user_id = body
        .get("user_id")
        .and_then(|v| v.as_str())
        .unwrap_or("default");
    let session_id = state
        .memory
        .ensure_session(body.get("session_id").and_then(|v| v.as_str()), user_id)
        .await;

    if let Err(e) = state
        .memory
        .add_message(&session_id, MessageRole::User, &message, None, &[])
        .await
    {
        return error_response(e);
    }

    let (rx, token) = state
        .engine
        .execute_task_streaming(message, session_id.clone());

    struct SseState {
        rx: tokio::sync::mpsc::Receiver<StreamFrame>,
        _guard: CancelOnDrop,
        memory: Arc<SessionStore>,
        session_id: String,
        finished: bool,
    }

    let sse_state = SseState {
        rx,
        _guard: CancelOnDrop(token),
        memory: state.memory.clone(),
        session_id,
        finished: false,
    };

    let stream = futures_util::stream::unfold(sse_state, |mut st| async move {
        if st.finished {
            return None;
        }
        let frame = st.rx.recv().await?;
        if frame.is_terminal() {
            st.finished = true;
        }
        // Streamed replies land in conversation memory at the terminal event.
        if let StreamFrame::Done {
            response,
            agent_used,
            tools_used,
            ..
        } = &frame
        {
            let _ = st
                .memory
                .add_message(
                    &st.session_id,
                    MessageRole::Assistant,
                    response,
                    Some(agent_used.as_str()),
                    tools_used,
                )
                .await;
        }
        let event = Event::default()
            .event(frame.event_type())
            .json_data(frame.data())
            .unwrap_or_else(|_| Event::default().event("error").data("{}"));
        Some((Ok::<_, Infallible>(event), st))
    });

    Sse::new(stream).keep_alive(KeepAlive::default()).into_response()
}

// ---- Classification & catalog ----

async fn classify(State(state): State<Arc<AppState>>, Json(body): Json<Value>) -> Response {
    let instruction = match require_str(&body, "instruction") {
        Ok(instruction) => instruction,
        Err(e) => return error_response(e),
    };
    let routing = state.engine.route(instruction);
    let profile = state.engine.catalog().profile(routing.agent);
    Json(json!({
        "agent_type": routing.agent.as_str(),
        "classification": routing.classification.to_json(),
        "strategy": routing.strategy.as_str(),
        "estimated_time": routing.estimated_time,
        "agent_config": profile.to_public_json(),
    }))
    .into_response()
}

async fn agents(State(state): State<Arc<AppState>>) -> Response {
    let profiles: Vec<Value> = state
        .engine
        .catalog()
        .profiles()
        .iter()
        .map(|p| p.to_public_json())
        .collect();
    Json(json!({"agents": profiles, "stats": state.engine.stats_json()})).into_response()
}

// ---- Voting ----

async fn vote(State(state): State<Arc<AppState>>, Json(body): Json<Value>) -> Response {
    let question = match require_str(&body, "question") {
        Ok(question) => question.to_string(),
        Err(e) => return error_response(e),
    };
    let options: Vec<String> = body
        .get("options")
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.as_str().map(|s| s.to_string()))
                .collect()
        })
        .unwrap_or_default();
    if options.len() < 2 {
        return error_response(HiveError::validation("options must contain at least 2 entries"));
    }
    let context = body
        .get("context")
        .and_then(|v| v.as_str())
        .unwrap_or("");
    let use_external = body
        .get("use_external")
        .and_then(|v| v.as_bool())
        .unwrap_or(true);

    match state
        .engine
        .vote(&question, &options, context, use_external)
        .await
    {
        Ok(outcome) => Json(outcome.to_json()).into_response(),
        Err(e) => error_response(e),
    }
}

// ---- Planning ----

async fn create_plan(State(state): State<Arc<AppState>>, Json(body): Json<Value>) -> Response {
    let task = match require_str(&body, "task") {
        Ok(task) => task,
        Err(e) => return error_response(e),
    };
    match state.planner.create_plan(task, body.get("context")).await {
        Ok(plan) => Json(json!({
            "plan_id": plan.id,
            "goal": plan.goal,
            "steps": plan.steps,
            "estimated_duration": plan.estimated_total_duration_secs,
        }))
        .into_response(),
        Err(e) => error_response(e),
    }
}

async fn execute_plan(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> Response {
    let mut plan = match state.planner.load_plan(&id).await {
        Ok(plan) => plan,
        Err(e) => return error_response(e),
    };
    let session_id = state
        .memory
        .ensure_session(body.get("session_id").and_then(|v| v.as_str()), "default")
        .await;

    let result = state.plan_executor.execute(&mut plan, &session_id).await;
    let mut out = result.to_json();
    out["plan_status"] = json!(plan.status);
    out["progress"] = plan.progress();
    Json(out).into_response()
}

// ---- Delegation & collaboration ----

async fn delegate(State(state): State<Arc<AppState>>, Json(body): Json<Value>) -> Response {
    let from_agent = match require_str(&body, "from_agent").and_then(parse_agent) {
        Ok(agent) => agent,
        Err(e) => return error_response(e),
    };
    let to_agent = match require_str(&body, "to_agent").and_then(parse_agent) {
        Ok(agent) => agent,
        Err(e) => return error_response(e),
    };
    let task = match require_str(&body, "task") {
        Ok(task) => task.to_string(),
        Err(e) => return error_response(e),
    };
    let context = body.get("context").cloned().unwrap_or(Value::Null);
    let parent_task_id = body
        .get("parent_task_id")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let delegation = match state
        .delegation
        .delegate(
            from_agent,
            to_agent,
            &task,
            context,
            &parent_task_id,
            DelegationPriority::Normal,
        )
        .await
    {
        Ok(delegation) => delegation,
        Err(e) => return error_response(e),
    };

    let session_id = state.memory.ensure_session(None, "delegation").await;
    match state
        .delegation
        .execute_delegation(&delegation.id, &session_id)
        .await
    {
        Ok(outcome) => Json(outcome).into_response(),
        Err(e) => error_response(e),
    }
}

async fn collaborate(State(state): State<Arc<AppState>>, Json(body): Json<Value>) -> Response {
    let task = match require_str(&body, "task") {
        Ok(task) => task.to_string(),
        Err(e) => return error_response(e),
    };
    let agents: Vec<AgentKind> = match body
        .get("agents")
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.as_str())
                .map(parse_agent)
                .collect::<HiveResult<Vec<_>>>()
        })
        .unwrap_or_else(|| Err(HiveError::validation("missing field: agents")))
    {
        Ok(agents) if !agents.is_empty() => agents,
        Ok(_) => return error_response(HiveError::validation("agents must be non-empty")),
        Err(e) => return error_response(e),
    };
    let coordinator = match body
        .get("coordinator")
        .and_then(|v| v.as_str())
        .map(parse_agent)
        .unwrap_or(Ok(AgentKind::Reasoner))
    {
        Ok(agent) => agent,
        Err(e) => return error_response(e),
    };
    let session_id = state
        .memory
        .ensure_session(body.get("session_id").and_then(|v| v.as_str()), "default")
        .await;

    match state
        .delegation
        .collaborate(&agents, &task, &session_id, coordinator)
        .await
    {
        Ok(outcome) => Json(json!({
            "collaboration_id": outcome.collaboration_id,
            "success": outcome.success,
            "coordinator": outcome.coordinator.as_str(),
            "plan": outcome.plan,
            "contributions": outcome.contributions,
            "synthesis": outcome.synthesis,
            "error": outcome.error,
        }))
        .into_response(),
        Err(e) => error_response(e),
    }
}

// ---- Sandbox ----

async fn sandbox_execute(State(state): State<Arc<AppState>>, Json(body): Json<Value>) -> Response {
    let code = match require_str(&body, "code") {
        Ok(code) => code.to_string(),
        Err(e) => return error_response(e),
    };
    let language = match body
        .get("language")
        .and_then(|v| v.as_str())
        .and_then(SandboxLanguage::parse)
    {
        Some(language) => language,
        None => {
            return error_response(HiveError::validation(
                "language must be one of python, javascript, shell",
            ))
        }
    };
    let timeout = body.get("timeout").and_then(|v| v.as_u64()).unwrap_or(30);

    match state.sandbox.run(&code, language, timeout).await {
        Ok(output) => Json(output.to_json()).into_response(),
        Err(e) => error_response(e),
    }
}

// ---- Metrics ----

async fn agent_metrics(
    State(state): State<Arc<AppState>>,
    Path(agent): Path<String>,
    Query(query): Query<DaysQuery>,
) -> Response {
    let agent = match parse_agent(&agent) {
        Ok(agent) => agent,
        Err(e) => return error_response(e),
    };
    match state
        .engine
        .evaluator()
        .agent_metrics(agent.as_str(), query.days.unwrap_or(30))
    {
        Ok(metrics) => Json(metrics).into_response(),
        Err(e) => error_response(e),
    }
}

async fn metrics_report(
    State(state): State<Arc<AppState>>,
    Query(query): Query<DaysQuery>,
) -> Response {
    match state
        .engine
        .evaluator()
        .summary_report(query.days.unwrap_or(7))
    {
        Ok(report) => (
            StatusCode::OK,
            [("Content-Type", "text/markdown; charset=utf-8")],
            report,
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}

// ---- Sessions ----

async fn session(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Response {
    match state.memory.get_session(&id).await {
        Some(session) => Json(serde_json::to_value(&session).unwrap_or(Value::Null)).into_response(),
        None => error_response(HiveError::not_found(format!("session not found: {}", id))),
    }
}

async fn session_history(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<LimitQuery>,
) -> Response {
    match state.memory.history(&id, query.limit).await {
        Ok(messages) => Json(json!({
            "session_id": id,
            "messages": messages,
        }))
        .into_response(),
        Err(e) => error_response(e),
    }
}
