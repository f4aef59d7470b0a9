//! Server configuration.
//!
//! [`ServerConfig`] is read from the environment once at startup and is
//! immutable afterwards. It carries endpoint base URLs for the local and
//! cloud backends, API keys, the project root that scopes every mutating
//! tool, and optional overrides for device detection and the router's
//! keyword table.
//!
//! # Example
//!
//! ```rust
//! use agenthive::config::ServerConfig;
//!
//! std::env::set_var("AGENTHIVE_PROJECT_ROOT", "/tmp");
//! let config = ServerConfig::from_env();
//! assert_eq!(config.project_root, std::path::PathBuf::from("/tmp"));
//! ```

use std::env;
use std::path::PathBuf;

/// Immutable process-wide configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the HTTP server binds to.
    pub bind_addr: String,
    /// Root path that scopes file tools and hosts the `memory/` state dir.
    pub project_root: PathBuf,
    /// OpenAI-compatible local backend base URL.
    pub local_llm_endpoint: String,
    /// Ollama daemon base URL.
    pub ollama_endpoint: String,
    /// API key for the tool-native cloud backend, when configured.
    pub anthropic_api_key: Option<String>,
    /// API key for the cloud vision backend, when configured.
    pub cloud_vision_api_key: Option<String>,
    /// Cloud vision base URL.
    pub cloud_vision_endpoint: String,
    /// Optional `desktop`/`mobile` override for device detection.
    pub device_override: Option<String>,
    /// Optional path to a JSON keyword-table override for the router.
    pub router_profiles_path: Option<PathBuf>,
}

impl ServerConfig {
    /// Read configuration from the environment, applying defaults.
    pub fn from_env() -> Self {
        let project_root = env::var("AGENTHIVE_PROJECT_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

        Self {
            bind_addr: env::var("AGENTHIVE_BIND").unwrap_or_else(|_| "127.0.0.1:8800".to_string()),
            project_root,
            local_llm_endpoint: env::var("LOCAL_LLM_ENDPOINT")
                .unwrap_or_else(|_| "http://127.0.0.1:8000/v1".to_string()),
            ollama_endpoint: env::var("OLLAMA_ENDPOINT")
                .unwrap_or_else(|_| "http://127.0.0.1:11434".to_string()),
            anthropic_api_key: env::var("ANTHROPIC_API_KEY").ok().filter(|k| !k.is_empty()),
            cloud_vision_api_key: env::var("CLOUD_VISION_API_KEY")
                .ok()
                .filter(|k| !k.is_empty()),
            cloud_vision_endpoint: env::var("CLOUD_VISION_ENDPOINT")
                .unwrap_or_else(|_| "https://api.groq.com/openai/v1".to_string()),
            device_override: env::var("AGENTHIVE_DEVICE").ok().filter(|d| !d.is_empty()),
            router_profiles_path: env::var("AGENTHIVE_ROUTER_PROFILES").ok().map(PathBuf::from),
        }
    }

    /// Directory holding every persisted artifact (sessions, plans,
    /// delegations, telemetry, context memory).
    pub fn memory_dir(&self) -> PathBuf {
        self.project_root.join("memory")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_applied() {
        // Only assert on values not plausibly set by the environment.
        let config = ServerConfig {
            bind_addr: "127.0.0.1:8800".into(),
            project_root: PathBuf::from("/srv/hive"),
            local_llm_endpoint: "http://127.0.0.1:8000/v1".into(),
            ollama_endpoint: "http://127.0.0.1:11434".into(),
            anthropic_api_key: None,
            cloud_vision_api_key: None,
            cloud_vision_endpoint: "https://api.groq.com/openai/v1".into(),
            device_override: None,
            router_profiles_path: None,
        };
        assert_eq!(config.memory_dir(), PathBuf::from("/srv/hive/memory"));
    }
}
