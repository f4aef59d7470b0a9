// src/lib.rs

// Import the top-level `agenthive` module.
pub mod agenthive;

// Re-export the commonly used pieces so callers don't have to navigate the
// whole hierarchy.
pub use agenthive::agent::{self, AgentCatalog, AgentKind, AgentProfile};
pub use agenthive::chain;
pub use agenthive::client_wrapper::{self, ChatMessage, ClientWrapper, Role};
pub use agenthive::clients;
pub use agenthive::config::{self, ServerConfig};
pub use agenthive::delegation;
pub use agenthive::device::{self, DeviceProfile};
pub use agenthive::engine::{self, AgentEngine};
pub use agenthive::error::{self, ErrorKind, HiveError, HiveResult};
pub use agenthive::evaluator::{self, Evaluator};
pub use agenthive::executor;
pub use agenthive::memory::{self, SessionStore};
pub use agenthive::planner::{self, TaskPlanner};
pub use agenthive::react;
pub use agenthive::router::{self, Router};
pub use agenthive::sandbox;
pub use agenthive::server;
pub use agenthive::tool_protocol;
pub use agenthive::tools;
pub use agenthive::voting;
