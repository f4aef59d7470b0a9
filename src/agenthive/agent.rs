//! Agent identities and profiles.
//!
//! Agents are a closed set: each [`AgentKind`] variant owns exactly one
//! [`AgentProfile`] describing its backend, capabilities, speed/quality
//! tiers, and flags. Profiles are configured once at init by
//! [`AgentCatalog::bootstrap`] and never mutated; string forms of the enum
//! exist only at the JSON boundary.
//!
//! # Example
//!
//! ```rust
//! use agenthive::agent::AgentKind;
//!
//! let kind = AgentKind::parse("coder").unwrap();
//! assert_eq!(kind.as_str(), "coder");
//! assert!(AgentKind::parse("wizard").is_none());
//! ```

use crate::config::ServerConfig;
use crate::device::DeviceProfile;
use crate::tool_protocol::ToolFamily;
use serde_json::Value;

/// The closed set of agent identities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AgentKind {
    /// Code writing, debugging, refactoring.
    Coder,
    /// Planning, logic, problem solving.
    Reasoner,
    /// Web research, documentation lookup.
    Researcher,
    /// Command execution, system tasks.
    Executor,
    /// General conversation, simple Q&A.
    General,
    /// Cloud expert for high-level decisions, with native tool calling.
    Consultant,
    /// Cybersecurity, pentesting, vulnerability analysis.
    Security,
    /// Local vision/image analysis.
    VisionLocal,
    /// Cloud vision (fast, consumes images directly).
    VisionCloud,
}

impl AgentKind {
    /// Every agent kind, in declaration order.
    pub const ALL: [AgentKind; 9] = [
        AgentKind::Coder,
        AgentKind::Reasoner,
        AgentKind::Researcher,
        AgentKind::Executor,
        AgentKind::General,
        AgentKind::Consultant,
        AgentKind::Security,
        AgentKind::VisionLocal,
        AgentKind::VisionCloud,
    ];

    /// Stable string key, used in JSON and persisted records.
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentKind::Coder => "coder",
            AgentKind::Reasoner => "reasoner",
            AgentKind::Researcher => "researcher",
            AgentKind::Executor => "executor",
            AgentKind::General => "general",
            AgentKind::Consultant => "consultant",
            AgentKind::Security => "security",
            AgentKind::VisionLocal => "vision_local",
            AgentKind::VisionCloud => "vision_cloud",
        }
    }

    /// Parse a string key produced by [`as_str`](AgentKind::as_str).
    ///
    /// Also accepts the bare `vision` alias used by planner output.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "coder" => Some(AgentKind::Coder),
            "reasoner" => Some(AgentKind::Reasoner),
            "researcher" => Some(AgentKind::Researcher),
            "executor" => Some(AgentKind::Executor),
            "general" => Some(AgentKind::General),
            "consultant" => Some(AgentKind::Consultant),
            "security" => Some(AgentKind::Security),
            "vision_local" | "vision" => Some(AgentKind::VisionLocal),
            "vision_cloud" => Some(AgentKind::VisionCloud),
            _ => None,
        }
    }

    /// Tool families granted to this agent.
    ///
    /// `VisionCloud` gets none (its backend consumes images directly) and
    /// `General` uses a curated named subset instead; see
    /// [`AgentKind::curated_tools`].
    pub fn tool_families(&self) -> &'static [ToolFamily] {
        match self {
            AgentKind::Coder => &[ToolFamily::Code, ToolFamily::File, ToolFamily::Memory],
            AgentKind::Executor => &[ToolFamily::System, ToolFamily::File, ToolFamily::Memory],
            AgentKind::Researcher => &[
                ToolFamily::Web,
                ToolFamily::Osint,
                ToolFamily::File,
                ToolFamily::Memory,
            ],
            AgentKind::Reasoner => &[ToolFamily::Memory],
            AgentKind::Security => &[
                ToolFamily::Osint,
                ToolFamily::Web,
                ToolFamily::System,
                ToolFamily::File,
                ToolFamily::Code,
                ToolFamily::Memory,
            ],
            AgentKind::Consultant => &[
                ToolFamily::Code,
                ToolFamily::File,
                ToolFamily::System,
                ToolFamily::Web,
                ToolFamily::Osint,
                ToolFamily::Memory,
            ],
            AgentKind::VisionLocal => &[ToolFamily::File, ToolFamily::Web, ToolFamily::Memory],
            AgentKind::VisionCloud => &[],
            AgentKind::General => &[ToolFamily::Memory],
        }
    }

    /// The small curated tool subset granted to `general` on top of its
    /// memory family.
    pub fn curated_tools(&self) -> &'static [&'static str] {
        match self {
            AgentKind::General => &["read_file", "glob", "web_search"],
            _ => &[],
        }
    }
}

// Serialization boundary: the enum crosses the wire and the persisted
// formats only in its stable string form.
impl serde::Serialize for AgentKind {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> serde::Deserialize<'de> for AgentKind {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = <String as serde::Deserialize>::deserialize(deserializer)?;
        AgentKind::parse(&s)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown agent: {}", s)))
    }
}

/// Backend transport an agent speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// OpenAI-compatible local server (llama.cpp and friends).
    OpenAiCompatibleLocal,
    /// Local Ollama daemon.
    OllamaLocal,
    /// Cloud API with a native tool protocol.
    CloudToolNative,
    /// Cloud chat/vision API.
    CloudVision,
    /// External helper agent reached through the local endpoint with the
    /// full prompt-driven tool loop.
    EnhancedExternal,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::OpenAiCompatibleLocal => "openai_compatible_local",
            BackendKind::OllamaLocal => "ollama_local",
            BackendKind::CloudToolNative => "cloud_tool_native",
            BackendKind::CloudVision => "cloud_vision",
            BackendKind::EnhancedExternal => "enhanced_external",
        }
    }
}

/// Latency tier used for time estimates in routing responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeedTier {
    Fast,
    Medium,
    Slow,
    VerySlow,
}

impl SpeedTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpeedTier::Fast => "fast",
            SpeedTier::Medium => "medium",
            SpeedTier::Slow => "slow",
            SpeedTier::VerySlow => "very_slow",
        }
    }

    /// Human estimate surfaced by the router.
    pub fn estimate(&self) -> &'static str {
        match self {
            SpeedTier::Fast => "2-5 seconds",
            SpeedTier::Medium => "5-15 seconds",
            SpeedTier::Slow => "10-30 seconds",
            SpeedTier::VerySlow => "30-120 seconds",
        }
    }
}

/// Output quality tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QualityTier {
    Medium,
    High,
}

impl QualityTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            QualityTier::Medium => "medium",
            QualityTier::High => "high",
        }
    }
}

/// Static configuration of one agent.
#[derive(Debug, Clone)]
pub struct AgentProfile {
    pub kind: AgentKind,
    /// Human-readable display name.
    pub name: String,
    pub backend: BackendKind,
    /// Endpoint base URL, `None` for backends resolved at call time.
    pub endpoint: Option<String>,
    /// Model identifier passed to the backend.
    pub model: String,
    /// Capability phrases, also used by delegation helper selection.
    pub capabilities: Vec<&'static str>,
    pub speed: SpeedTier,
    pub quality: QualityTier,
    /// Whether the engine runs a tool loop for this agent.
    pub tools_enabled: bool,
    /// Model is uncensored (local, abliterated weights).
    pub uncensored: bool,
    /// Agent handles image input.
    pub vision: bool,
    /// Backend is a paid cloud API.
    pub cloud: bool,
}

impl AgentProfile {
    /// Public JSON view (no secrets live here; keys stay in the config).
    pub fn to_public_json(&self) -> Value {
        serde_json::json!({
            "agent": self.kind.as_str(),
            "name": self.name,
            "backend": self.backend.as_str(),
            "endpoint": self.endpoint,
            "model": self.model,
            "capabilities": self.capabilities,
            "speed": self.speed.as_str(),
            "quality": self.quality.as_str(),
            "tools_enabled": self.tools_enabled,
            "uncensored": self.uncensored,
            "vision": self.vision,
            "cloud": self.cloud,
        })
    }
}

/// The full set of agent profiles, one per [`AgentKind`]. Immutable after
/// bootstrap.
pub struct AgentCatalog {
    profiles: Vec<AgentProfile>,
}

impl AgentCatalog {
    /// Build the catalog from configuration and the detected device profile.
    pub fn bootstrap(config: &ServerConfig, device: &DeviceProfile) -> Self {
        let local = Some(config.local_llm_endpoint.clone());
        let local_model = format!("llamacpp:{}", device.model_name);

        let profiles = vec![
            AgentProfile {
                kind: AgentKind::Coder,
                name: "Qwen Coder".to_string(),
                backend: BackendKind::OpenAiCompatibleLocal,
                endpoint: local.clone(),
                model: local_model.clone(),
                capabilities: vec!["code_writing", "debugging", "refactoring", "code_review"],
                speed: SpeedTier::Slow,
                quality: QualityTier::High,
                tools_enabled: true,
                uncensored: true,
                vision: false,
                cloud: false,
            },
            AgentProfile {
                kind: AgentKind::Reasoner,
                name: "Reasoning Agent".to_string(),
                backend: BackendKind::OpenAiCompatibleLocal,
                endpoint: local.clone(),
                model: local_model.clone(),
                capabilities: vec!["planning", "logic", "problem_solving", "analysis"],
                speed: SpeedTier::Slow,
                quality: QualityTier::High,
                tools_enabled: true,
                uncensored: true,
                vision: false,
                cloud: false,
            },
            AgentProfile {
                kind: AgentKind::Researcher,
                name: "Research Agent".to_string(),
                backend: BackendKind::EnhancedExternal,
                endpoint: local.clone(),
                model: local_model.clone(),
                capabilities: vec!["web_search", "documentation", "fact_checking"],
                speed: SpeedTier::VerySlow,
                quality: QualityTier::High,
                tools_enabled: true,
                uncensored: false,
                vision: false,
                cloud: false,
            },
            AgentProfile {
                kind: AgentKind::Executor,
                name: "Executor Agent".to_string(),
                backend: BackendKind::EnhancedExternal,
                endpoint: local.clone(),
                model: local_model.clone(),
                capabilities: vec!["command_execution", "file_operations", "system_tasks"],
                speed: SpeedTier::Medium,
                quality: QualityTier::Medium,
                tools_enabled: true,
                uncensored: false,
                vision: false,
                cloud: false,
            },
            AgentProfile {
                kind: AgentKind::General,
                name: "General Assistant".to_string(),
                backend: BackendKind::OpenAiCompatibleLocal,
                endpoint: local.clone(),
                model: local_model.clone(),
                capabilities: vec!["conversation", "simple_qa", "summaries"],
                speed: SpeedTier::Fast,
                quality: QualityTier::Medium,
                tools_enabled: true,
                uncensored: false,
                vision: false,
                cloud: false,
            },
            AgentProfile {
                kind: AgentKind::Consultant,
                name: "Cloud Consultant".to_string(),
                backend: BackendKind::CloudToolNative,
                endpoint: None,
                model: "claude-3-5-sonnet-latest".to_string(),
                capabilities: vec!["expert_advice", "complex_decisions", "deep_analysis"],
                speed: SpeedTier::Medium,
                quality: QualityTier::High,
                tools_enabled: true,
                uncensored: false,
                vision: false,
                cloud: true,
            },
            AgentProfile {
                kind: AgentKind::Security,
                name: "Security Agent".to_string(),
                backend: BackendKind::OpenAiCompatibleLocal,
                endpoint: local.clone(),
                model: local_model.clone(),
                capabilities: vec![
                    "pentesting",
                    "vulnerability_analysis",
                    "osint",
                    "exploit_analysis",
                ],
                speed: SpeedTier::Slow,
                quality: QualityTier::High,
                tools_enabled: true,
                uncensored: true,
                vision: false,
                cloud: false,
            },
            AgentProfile {
                kind: AgentKind::VisionLocal,
                name: "Local Vision Agent".to_string(),
                backend: BackendKind::OpenAiCompatibleLocal,
                endpoint: local,
                model: local_model,
                capabilities: vec!["image_analysis", "ui_understanding", "screenshot_analysis"],
                speed: SpeedTier::Slow,
                quality: QualityTier::Medium,
                tools_enabled: true,
                uncensored: false,
                vision: true,
                cloud: false,
            },
            AgentProfile {
                kind: AgentKind::VisionCloud,
                name: "Cloud Vision Agent".to_string(),
                backend: BackendKind::CloudVision,
                endpoint: Some(config.cloud_vision_endpoint.clone()),
                model: "llama-3.2-90b-vision-preview".to_string(),
                capabilities: vec!["image_analysis", "ocr", "fast_vision"],
                speed: SpeedTier::Fast,
                quality: QualityTier::High,
                tools_enabled: false,
                uncensored: false,
                vision: true,
                cloud: true,
            },
        ];

        Self { profiles }
    }

    /// Borrow the profile for a kind. Every kind has exactly one profile.
    pub fn profile(&self, kind: AgentKind) -> &AgentProfile {
        self.profiles
            .iter()
            .find(|p| p.kind == kind)
            .expect("catalog covers every agent kind")
    }

    /// Every profile in declaration order.
    pub fn profiles(&self) -> &[AgentProfile] {
        &self.profiles
    }
}
