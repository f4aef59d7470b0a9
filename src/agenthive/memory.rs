//! Conversation memory: session lifecycle, append-only message logs, and
//! durable snapshots.
//!
//! Sessions live in memory and are persisted explicitly: [`SessionStore::
//! save_session`] writes a JSON snapshot into the shared `conversations.json`
//! index, and [`SessionStore::load_session`] restores one. The index is read
//! lazily on first access rather than at startup. [`SessionStore::
//! add_message`] is the sole writer on a session's log; it also maintains
//! `last_active`, the message counter, and the agent/tool usage sets, so the
//! invariant `messages.len() == metadata.total_messages` holds across any
//! call sequence. Idle sessions past the TTL are evicted from memory without
//! touching their persisted copies.

use crate::error::{HiveError, HiveResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Mutex as StdMutex;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

/// Default idle TTL before a session is eligible for eviction.
pub const DEFAULT_IDLE_TTL_SECS: f64 = 3600.0;

/// Current wall-clock time as fractional epoch seconds.
fn now_ts() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}

/// Role of a stored message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

/// One immutable entry in a session's message log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: String,
    pub role: MessageRole,
    pub content: String,
    pub timestamp: f64,
    /// Agent that produced the message; assistant messages only.
    pub agent: Option<String>,
    pub tools_used: Vec<String>,
}

/// Mutable per-session working context.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionContext {
    pub current_project: Option<String>,
    /// Ordered set: first touch order, no duplicates.
    pub active_files: Vec<String>,
    pub last_agent: Option<String>,
    pub task_history: Vec<serde_json::Value>,
}

/// Aggregate counters over the log. `BTreeSet` keeps the serialized arrays
/// sorted and stable.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionMetadata {
    pub total_messages: usize,
    pub agents_used: BTreeSet<String>,
    pub tools_used: BTreeSet<String>,
}

/// One conversation session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub user_id: String,
    pub created_at: f64,
    pub last_active: f64,
    pub messages: Vec<StoredMessage>,
    pub context: SessionContext,
    pub metadata: SessionMetadata,
}

impl Session {
    fn new(user_id: &str) -> Self {
        let now = now_ts();
        Self {
            session_id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            created_at: now,
            last_active: now,
            messages: Vec::new(),
            context: SessionContext::default(),
            metadata: SessionMetadata::default(),
        }
    }
}

/// In-memory session store with explicit JSON persistence.
pub struct SessionStore {
    sessions: RwLock<HashMap<String, Session>>,
    /// Lazily loaded persistent index (`conversations.json` content).
    persistent: Mutex<Option<HashMap<String, Session>>>,
    /// Opaque pass-through workspace state (`workspace_state.json`).
    workspace: Mutex<Option<serde_json::Value>>,
    /// Serializes snapshot-file writes.
    file_lock: Mutex<()>,
    /// Sessions with a persistence write currently in flight.
    persisting: StdMutex<HashSet<String>>,
    conversations_path: PathBuf,
    workspace_path: PathBuf,
    idle_ttl_secs: f64,
}

impl SessionStore {
    /// Create a store rooted at `memory_dir` (created if missing).
    pub fn new(memory_dir: PathBuf) -> HiveResult<Self> {
        std::fs::create_dir_all(&memory_dir)?;
        Ok(Self {
            sessions: RwLock::new(HashMap::new()),
            persistent: Mutex::new(None),
            workspace: Mutex::new(None),
            file_lock: Mutex::new(()),
            persisting: StdMutex::new(HashSet::new()),
            conversations_path: memory_dir.join("conversations.json"),
            workspace_path: memory_dir.join("workspace_state.json"),
            idle_ttl_secs: DEFAULT_IDLE_TTL_SECS,
        })
    }

    /// Override the idle TTL (builder pattern).
    pub fn with_idle_ttl(mut self, secs: f64) -> Self {
        self.idle_ttl_secs = secs;
        self
    }

    /// Create a new session and return its id.
    pub async fn create_session(&self, user_id: &str) -> String {
        let session = Session::new(user_id);
        let id = session.session_id.clone();
        self.sessions.write().await.insert(id.clone(), session);
        id
    }

    /// Fetch a session snapshot by id.
    pub async fn get_session(&self, session_id: &str) -> Option<Session> {
        self.sessions.read().await.get(session_id).cloned()
    }

    /// Return the session id, creating a session when the id is absent or
    /// unknown. This is the front door used by the chat endpoints.
    pub async fn ensure_session(&self, session_id: Option<&str>, user_id: &str) -> String {
        if let Some(id) = session_id {
            if self.sessions.read().await.contains_key(id) {
                return id.to_string();
            }
            // Unknown id supplied by the client: adopt it so the client's
            // handle stays valid across server restarts.
            let mut session = Session::new(user_id);
            session.session_id = id.to_string();
            self.sessions.write().await.insert(id.to_string(), session);
            return id.to_string();
        }
        self.create_session(user_id).await
    }

    /// Append a message to a session's log. The sole writer on the log.
    pub async fn add_message(
        &self,
        session_id: &str,
        role: MessageRole,
        content: &str,
        agent: Option<&str>,
        tools_used: &[String],
    ) -> HiveResult<()> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| HiveError::not_found(format!("session not found: {}", session_id)))?;

        session.messages.push(StoredMessage {
            id: Uuid::new_v4().to_string(),
            role,
            content: content.to_string(),
            timestamp: now_ts(),
            agent: agent.map(|a| a.to_string()),
            tools_used: tools_used.to_vec(),
        });
        session.last_active = now_ts();
        session.metadata.total_messages += 1;

        if let Some(agent) = agent {
            session.metadata.agents_used.insert(agent.to_string());
            session.context.last_agent = Some(agent.to_string());
        }
        for tool in tools_used {
            session.metadata.tools_used.insert(tool.clone());
        }
        Ok(())
    }

    /// Last `limit` messages (all when `limit` is `None`).
    pub async fn history(
        &self,
        session_id: &str,
        limit: Option<usize>,
    ) -> HiveResult<Vec<StoredMessage>> {
        let sessions = self.sessions.read().await;
        let session = sessions
            .get(session_id)
            .ok_or_else(|| HiveError::not_found(format!("session not found: {}", session_id)))?;
        let messages = &session.messages;
        let start = match limit {
            Some(n) if n < messages.len() => messages.len() - n,
            _ => 0,
        };
        Ok(messages[start..].to_vec())
    }

    /// Merge updates into the session context.
    pub async fn update_context(
        &self,
        session_id: &str,
        updates: serde_json::Value,
    ) -> HiveResult<()> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| HiveError::not_found(format!("session not found: {}", session_id)))?;

        if let Some(obj) = updates.as_object() {
            if let Some(project) = obj.get("current_project").and_then(|v| v.as_str()) {
                session.context.current_project = Some(project.to_string());
            }
            if let Some(task) = obj.get("task") {
                session.context.task_history.push(task.clone());
            }
        }
        Ok(())
    }

    /// Record a file as active in the session (ordered, deduplicated).
    pub async fn add_active_file(&self, session_id: &str, file_path: &str) -> HiveResult<()> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| HiveError::not_found(format!("session not found: {}", session_id)))?;
        if !session.context.active_files.iter().any(|f| f == file_path) {
            session.context.active_files.push(file_path.to_string());
        }
        Ok(())
    }

    /// One-line summary used in chat responses.
    pub async fn conversation_summary(&self, session_id: &str) -> String {
        match self.get_session(session_id).await {
            Some(s) => format!(
                "{} messages, agents: {}",
                s.metadata.total_messages,
                s.metadata
                    .agents_used
                    .iter()
                    .cloned()
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
            None => String::new(),
        }
    }

    /// Persist a session snapshot into the shared index file.
    ///
    /// Returns `Ok(false)` without writing when another persist for the same
    /// session is already in flight (the store guarantees at most one).
    pub async fn save_session(&self, session_id: &str) -> HiveResult<bool> {
        let session = self
            .get_session(session_id)
            .await
            .ok_or_else(|| HiveError::not_found(format!("session not found: {}", session_id)))?;

        {
            let mut in_flight = self.persisting.lock().unwrap();
            if !in_flight.insert(session_id.to_string()) {
                return Ok(false);
            }
        }

        let result = self.save_session_inner(session).await;

        self.persisting.lock().unwrap().remove(session_id);
        result.map(|_| true)
    }

    async fn save_session_inner(&self, session: Session) -> HiveResult<()> {
        let mut persistent = self.persistent.lock().await;
        let index = self.load_index_if_needed(&mut persistent).await?;
        index.insert(session.session_id.clone(), session);

        let serialized = serde_json::to_string_pretty(&*index)?;
        let _guard = self.file_lock.lock().await;
        let tmp = self.conversations_path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serialized).await?;
        tokio::fs::rename(&tmp, &self.conversations_path).await?;
        Ok(())
    }

    /// Restore a previously persisted session into memory.
    pub async fn load_session(&self, session_id: &str) -> HiveResult<bool> {
        let mut persistent = self.persistent.lock().await;
        let index = self.load_index_if_needed(&mut persistent).await?;
        match index.get(session_id) {
            Some(session) => {
                self.sessions
                    .write()
                    .await
                    .insert(session_id.to_string(), session.clone());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn load_index_if_needed<'a>(
        &self,
        slot: &'a mut Option<HashMap<String, Session>>,
    ) -> HiveResult<&'a mut HashMap<String, Session>> {
        if slot.is_none() {
            let loaded = match tokio::fs::read_to_string(&self.conversations_path).await {
                Ok(text) => serde_json::from_str(&text).unwrap_or_else(|e| {
                    log::warn!("conversations.json unreadable, starting fresh: {}", e);
                    HashMap::new()
                }),
                Err(_) => HashMap::new(),
            };
            *slot = Some(loaded);
        }
        Ok(slot.as_mut().unwrap())
    }

    /// Evict sessions idle past the TTL. Persisted copies are untouched.
    /// Returns the number evicted.
    pub async fn evict_idle(&self) -> usize {
        let cutoff = now_ts() - self.idle_ttl_secs;
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, s| s.last_active >= cutoff);
        before - sessions.len()
    }

    /// Read the opaque workspace state, loading the file on first access.
    pub async fn workspace_state(&self) -> serde_json::Value {
        let mut slot = self.workspace.lock().await;
        if slot.is_none() {
            let loaded = match tokio::fs::read_to_string(&self.workspace_path).await {
                Ok(text) => serde_json::from_str(&text)
                    .unwrap_or_else(|_| serde_json::Value::Object(Default::default())),
                Err(_) => serde_json::Value::Object(Default::default()),
            };
            *slot = Some(loaded);
        }
        slot.clone().unwrap()
    }

    /// Replace and persist the opaque workspace state.
    pub async fn set_workspace_state(&self, state: serde_json::Value) -> HiveResult<()> {
        let serialized = serde_json::to_string_pretty(&state)?;
        *self.workspace.lock().await = Some(state);
        let _guard = self.file_lock.lock().await;
        tokio::fs::write(&self.workspace_path, serialized).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (TempDir, SessionStore) {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::new(dir.path().join("memory")).unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn message_count_matches_log_length() {
        let (_dir, store) = store();
        let id = store.create_session("u1").await;

        for i in 0..7 {
            let role = if i % 2 == 0 {
                MessageRole::User
            } else {
                MessageRole::Assistant
            };
            let agent = if role == MessageRole::Assistant {
                Some("coder")
            } else {
                None
            };
            store
                .add_message(&id, role, &format!("msg {}", i), agent, &[])
                .await
                .unwrap();
        }

        let session = store.get_session(&id).await.unwrap();
        assert_eq!(session.messages.len(), session.metadata.total_messages);
        assert_eq!(session.metadata.total_messages, 7);
    }

    #[tokio::test]
    async fn last_agent_tracks_latest_assistant() {
        let (_dir, store) = store();
        let id = store.create_session("u1").await;

        store
            .add_message(&id, MessageRole::Assistant, "a", Some("coder"), &[])
            .await
            .unwrap();
        store
            .add_message(&id, MessageRole::Assistant, "b", Some("reasoner"), &[])
            .await
            .unwrap();

        let session = store.get_session(&id).await.unwrap();
        assert_eq!(session.context.last_agent.as_deref(), Some("reasoner"));
        assert!(session.metadata.agents_used.contains("coder"));
        assert!(session.metadata.agents_used.contains("reasoner"));
    }

    #[tokio::test]
    async fn tools_accumulate_into_metadata() {
        let (_dir, store) = store();
        let id = store.create_session("u1").await;
        store
            .add_message(
                &id,
                MessageRole::Assistant,
                "done",
                Some("executor"),
                &["bash".to_string(), "glob".to_string()],
            )
            .await
            .unwrap();
        let session = store.get_session(&id).await.unwrap();
        assert!(session.metadata.tools_used.contains("bash"));
        assert!(session.metadata.tools_used.contains("glob"));
    }

    #[tokio::test]
    async fn history_limit_returns_tail() {
        let (_dir, store) = store();
        let id = store.create_session("u1").await;
        for i in 0..5 {
            store
                .add_message(&id, MessageRole::User, &format!("m{}", i), None, &[])
                .await
                .unwrap();
        }
        let tail = store.history(&id, Some(2)).await.unwrap();
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].content, "m3");
        assert_eq!(tail[1].content, "m4");
    }

    #[tokio::test]
    async fn save_and_load_round_trip() {
        let (_dir, store) = store();
        let id = store.create_session("u1").await;
        store
            .add_message(&id, MessageRole::Assistant, "hi", Some("general"), &[])
            .await
            .unwrap();
        assert!(store.save_session(&id).await.unwrap());

        // Simulate eviction, then restore from disk.
        let store2 = store;
        store2.sessions.write().await.clear();
        assert!(store2.get_session(&id).await.is_none());
        assert!(store2.load_session(&id).await.unwrap());

        let restored = store2.get_session(&id).await.unwrap();
        assert_eq!(restored.metadata.total_messages, 1);
        assert_eq!(restored.context.last_agent.as_deref(), Some("general"));
    }

    #[tokio::test]
    async fn eviction_preserves_persisted_copy() {
        let (_dir, store) = store();
        let store = store.with_idle_ttl(0.0);
        let id = store.create_session("u1").await;
        store.save_session(&id).await.unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        let evicted = store.evict_idle().await;
        assert_eq!(evicted, 1);
        assert!(store.get_session(&id).await.is_none());
        assert!(store.load_session(&id).await.unwrap());
    }

    #[tokio::test]
    async fn active_files_stay_ordered_and_unique() {
        let (_dir, store) = store();
        let id = store.create_session("u1").await;
        store.add_active_file(&id, "a.rs").await.unwrap();
        store.add_active_file(&id, "b.rs").await.unwrap();
        store.add_active_file(&id, "a.rs").await.unwrap();
        let session = store.get_session(&id).await.unwrap();
        assert_eq!(session.context.active_files, vec!["a.rs", "b.rs"]);
    }

    #[tokio::test]
    async fn workspace_state_round_trips() {
        let (_dir, store) = store();
        let state = serde_json::json!({"open_tabs": ["a.rs"], "zoom": 1.5});
        store.set_workspace_state(state.clone()).await.unwrap();
        assert_eq!(store.workspace_state().await, state);
    }

    #[tokio::test]
    async fn ensure_session_adopts_client_ids() {
        let (_dir, store) = store();
        let id = store.ensure_session(Some("client-chosen"), "u1").await;
        assert_eq!(id, "client-chosen");
        assert!(store.get_session("client-chosen").await.is_some());

        let same = store.ensure_session(Some("client-chosen"), "u1").await;
        assert_eq!(same, "client-chosen");
    }
}
