//! Task classifier and router.
//!
//! Maps a free-text instruction onto the agent capability space by counting
//! lowercase keyword occurrences against per-agent vocabularies, with
//! hand-tuned weights for the safety-sensitive agents. The table is data:
//! the built-in profiles can be swapped wholesale from a JSON file without
//! code changes, which keeps A/B experiments out of the compiled router.
//!
//! Classification is a pure function of the instruction (same input, same
//! `{agent, complexity}`), so routing decisions are reproducible in tests
//! and in telemetry.
//!
//! # Example
//!
//! ```rust
//! use agenthive::agent::AgentKind;
//! use agenthive::router::Router;
//!
//! let router = Router::new();
//! let c = router.classify("Write a Python function to calculate fibonacci numbers");
//! assert_eq!(c.agent, AgentKind::Coder);
//! assert_eq!(c.complexity.as_str(), "simple");
//! ```

use crate::agent::{AgentCatalog, AgentKind};
use crate::error::{HiveError, HiveResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Phrases that mark an instruction as multi-step.
const MULTI_STEP_CONNECTIVES: [&str; 5] = ["and then", "after that", "next", "also", "additionally"];

/// Tie-break order when two agents score equally. Safety-sensitive agents
/// first; cloud vision ahead of local so the engine's fallback chain (cloud →
/// local when the key is absent) has something to fall back from.
const TIE_BREAK_ORDER: [AgentKind; 8] = [
    AgentKind::Security,
    AgentKind::VisionCloud,
    AgentKind::VisionLocal,
    AgentKind::Consultant,
    AgentKind::Coder,
    AgentKind::Researcher,
    AgentKind::Executor,
    AgentKind::Reasoner,
];

/// One agent's scoring vocabulary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeywordProfile {
    /// Agent key (string form of [`AgentKind`]).
    pub agent: String,
    /// Score multiplier applied to the raw keyword count.
    pub weight: f64,
    /// Lowercase keywords/phrases matched by substring.
    pub keywords: Vec<String>,
}

/// The complete scoring table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterProfiles {
    pub profiles: Vec<KeywordProfile>,
}

impl RouterProfiles {
    /// The built-in table.
    pub fn builtin() -> Self {
        fn profile(agent: AgentKind, weight: f64, keywords: &[&str]) -> KeywordProfile {
            KeywordProfile {
                agent: agent.as_str().to_string(),
                weight,
                keywords: keywords.iter().map(|k| k.to_string()).collect(),
            }
        }

        let code = [
            "code", "function", "class", "debug", "bug", "error", "refactor", "implement",
            "write code", "python", "javascript", "script", "algorithm", "optimize", "fix",
            "syntax", "variable",
        ];
        let research = [
            "search",
            "find",
            "lookup",
            "research",
            "what is",
            "who is",
            "when did",
            "how to",
            "wikipedia",
            "documentation",
            "docs",
            "latest",
            "current",
            "news",
            "github",
            "library",
        ];
        let execute = [
            "run",
            "execute",
            "list files",
            "read file",
            "write file",
            "create file",
            "delete",
            "move",
            "copy",
            "command",
            "bash",
            "shell",
            "directory",
        ];
        let planning = [
            "plan",
            "strategy",
            "approach",
            "analyze",
            "compare",
            "evaluate",
            "pros and cons",
            "should i",
            "which",
            "best way",
            "explain why",
            "logic",
            "reasoning",
        ];
        let consultant = [
            "vote",
            "decide",
            "choose between",
            "which option",
            "expert opinion",
            "deep thought",
            "complex decision",
            "consult",
            "advise",
            "recommend",
            "philosophical",
            "ethical",
            "strategic decision",
            "critical choice",
        ];
        let security = [
            "hack",
            "hacking",
            "exploit",
            "vulnerability",
            "vuln",
            "penetration test",
            "pentest",
            "security",
            "cybersecurity",
            "injection",
            "xss",
            "csrf",
            "sql injection",
            "buffer overflow",
            "reverse engineering",
            "malware",
            "backdoor",
            "rootkit",
            "privilege escalation",
            "brute force",
            "crack",
            "password crack",
            "hash",
            "decrypt",
            "encryption",
            "cryptography",
            "nmap",
            "metasploit",
            "burp suite",
            "wireshark",
            "kali",
            "red team",
            "blue team",
            "threat",
            "attack",
            "payload",
            "shellcode",
            "zero day",
            "cve",
            "security audit",
            "web security",
            "network security",
            "firewall",
            "bypass",
            "evade",
            "stealth",
            "osint",
            "reconnaissance",
            "footprint",
            "enumeration",
            "port scan",
            "directory traversal",
            "lfi",
            "rfi",
            "command injection",
            "code injection",
            "deserialization",
            "xxe",
        ];
        let vision = [
            "image",
            "screenshot",
            "picture",
            "photo",
            "visual",
            "see",
            "look at",
            "what do you see",
            "analyze image",
            "describe image",
            "ui",
            "interface",
            "diagram",
            "chart",
            "graph",
            "drawing",
            "render",
            "displayed",
            "shown",
            "screen",
            "display",
            "visible",
            "ocr",
            "read text from",
            "extract text",
            "recognize",
            "detect",
            "identify in image",
            "what's in",
            "show me",
        ];

        Self {
            profiles: vec![
                profile(AgentKind::Coder, 1.0, &code),
                profile(AgentKind::Researcher, 1.0, &research),
                profile(AgentKind::Executor, 1.0, &execute),
                profile(AgentKind::Reasoner, 1.0, &planning),
                profile(AgentKind::Consultant, 2.0, &consultant),
                profile(AgentKind::Security, 2.5, &security),
                profile(AgentKind::VisionCloud, 2.0, &vision),
                profile(AgentKind::VisionLocal, 2.0, &vision),
            ],
        }
    }

    /// Load a replacement table from a JSON file.
    pub fn from_json_file(path: &Path) -> HiveResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            HiveError::validation(format!(
                "cannot read router profiles {}: {}",
                path.display(),
                e
            ))
        })?;
        let profiles: RouterProfiles = serde_json::from_str(&text)
            .map_err(|e| HiveError::validation(format!("invalid router profiles: {}", e)))?;
        for p in &profiles.profiles {
            if AgentKind::parse(&p.agent).is_none() {
                return Err(HiveError::validation(format!(
                    "unknown agent in router profiles: {}",
                    p.agent
                )));
            }
        }
        Ok(profiles)
    }
}

/// Task complexity levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Complexity {
    Simple,
    Medium,
    Complex,
}

impl Complexity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Complexity::Simple => "simple",
            Complexity::Medium => "medium",
            Complexity::Complex => "complex",
        }
    }
}

/// Execution strategy implied by complexity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    SingleAgent,
    MultiAgent,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::SingleAgent => "single_agent",
            Strategy::MultiAgent => "multi_agent",
        }
    }
}

/// Result of classifying one instruction.
#[derive(Debug, Clone)]
pub struct Classification {
    pub agent: AgentKind,
    pub complexity: Complexity,
    pub confidence: f64,
    pub requires_tools: bool,
    pub reasoning: String,
    pub word_count: usize,
    pub has_multi_steps: bool,
}

impl Classification {
    /// JSON view for the wire boundary.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "agent_type": self.agent.as_str(),
            "complexity": self.complexity.as_str(),
            "confidence": self.confidence,
            "requires_tools": self.requires_tools,
            "reasoning": self.reasoning,
            "word_count": self.word_count,
            "has_multi_steps": self.has_multi_steps,
        })
    }
}

/// Result of routing one instruction.
#[derive(Debug, Clone)]
pub struct Routing {
    pub agent: AgentKind,
    pub classification: Classification,
    pub strategy: Strategy,
    pub estimated_time: &'static str,
}

impl Routing {
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "agent": self.agent.as_str(),
            "classification": self.classification.to_json(),
            "strategy": self.strategy.as_str(),
            "estimated_time": self.estimated_time,
        })
    }
}

/// The classifier/router.
pub struct Router {
    profiles: RouterProfiles,
}

impl Router {
    /// Router over the built-in keyword table.
    pub fn new() -> Self {
        Self {
            profiles: RouterProfiles::builtin(),
        }
    }

    /// Router over a custom table.
    pub fn with_profiles(profiles: RouterProfiles) -> Self {
        Self { profiles }
    }

    /// Score the instruction against every profile and classify it.
    pub fn classify(&self, instruction: &str) -> Classification {
        let lowered = instruction.to_lowercase();

        let mut best: Option<(AgentKind, f64)> = None;
        for candidate in TIE_BREAK_ORDER.iter() {
            let score = self.score_for(*candidate, &lowered);
            if score <= 0.0 {
                continue;
            }
            // Earlier tie-break entries win equal scores.
            let better = match best {
                Some((_, best_score)) => score > best_score,
                None => true,
            };
            if better {
                best = Some((*candidate, score));
            }
        }

        let (agent, confidence, reasoning) = match best {
            Some((agent, score)) => (
                agent,
                (score / 3.0).min(1.0),
                // The diagnostic carries the weighted score, the same number
                // the winner was picked by.
                format!("Matched {} keywords (score: {})", agent.as_str(), score),
            ),
            None => (
                AgentKind::General,
                0.5,
                "No keyword matches; defaulting to general".to_string(),
            ),
        };

        let word_count = instruction.split_whitespace().count();
        let has_multi_steps = MULTI_STEP_CONNECTIVES
            .iter()
            .any(|phrase| lowered.contains(phrase));

        let complexity = if word_count < 10 && !has_multi_steps {
            Complexity::Simple
        } else if word_count < 30 && !has_multi_steps {
            Complexity::Medium
        } else {
            Complexity::Complex
        };

        let requires_tools = matches!(
            agent,
            AgentKind::Researcher | AgentKind::Executor | AgentKind::Coder | AgentKind::Security
        );

        Classification {
            agent,
            complexity,
            confidence,
            requires_tools,
            reasoning,
            word_count,
            has_multi_steps,
        }
    }

    /// Classify and attach strategy plus a time estimate from the catalog.
    pub fn route(&self, instruction: &str, catalog: &AgentCatalog) -> Routing {
        let classification = self.classify(instruction);
        let strategy = if classification.complexity == Complexity::Complex {
            Strategy::MultiAgent
        } else {
            Strategy::SingleAgent
        };
        let estimated_time = catalog.profile(classification.agent).speed.estimate();
        Routing {
            agent: classification.agent,
            classification,
            strategy,
            estimated_time,
        }
    }

    /// Weighted keyword score for one agent.
    fn score_for(&self, agent: AgentKind, lowered_instruction: &str) -> f64 {
        let key = agent.as_str();
        for profile in &self.profiles.profiles {
            if profile.agent == key {
                let raw = profile
                    .keywords
                    .iter()
                    .filter(|kw| lowered_instruction.contains(kw.as_str()))
                    .count();
                return raw as f64 * profile.weight;
            }
        }
        0.0
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_code_request_routes_to_coder() {
        let router = Router::new();
        let c = router.classify("Write a Python function to calculate fibonacci numbers");
        assert_eq!(c.agent, AgentKind::Coder);
        assert_eq!(c.complexity, Complexity::Simple);
        assert_eq!(c.word_count, 8);
        assert!(!c.has_multi_steps);
        assert!(c.requires_tools);
    }

    #[test]
    fn security_question_scores_high_confidence() {
        let router = Router::new();
        let c = router.classify("How does SQL injection work?");
        assert_eq!(c.agent, AgentKind::Security);
        assert!(c.confidence >= 0.83, "confidence was {}", c.confidence);
    }

    #[test]
    fn vision_request_prefers_cloud() {
        let router = Router::new();
        let c = router.classify("Describe this screenshot");
        assert_eq!(c.agent, AgentKind::VisionCloud);
    }

    #[test]
    fn no_matches_defaults_to_general() {
        let router = Router::new();
        let c = router.classify("hello");
        assert_eq!(c.agent, AgentKind::General);
        assert!((c.confidence - 0.5).abs() < f64::EPSILON);
        assert!(!c.requires_tools);
    }

    #[test]
    fn connectives_force_complex() {
        let router = Router::new();
        let c = router.classify("fix the bug and then run the tests");
        assert_eq!(c.complexity, Complexity::Complex);
        assert!(c.has_multi_steps);
    }

    #[test]
    fn medium_by_word_count() {
        let router = Router::new();
        let c = router.classify(
            "Please refactor the parser module so the tokenizer handles unicode input correctly",
        );
        assert_eq!(c.complexity, Complexity::Medium);
    }

    #[test]
    fn reasoning_reports_the_weighted_score() {
        let router = Router::new();
        // "sql injection" and "injection" both hit: raw 2, weighted 5.
        let c = router.classify("How does SQL injection work?");
        assert!(c.reasoning.contains("(score: 5)"), "was: {}", c.reasoning);

        // A single security hit surfaces the fractional weight.
        let c = router.classify("compute a hash");
        assert_eq!(c.agent, AgentKind::Security);
        assert!(c.reasoning.contains("(score: 2.5)"), "was: {}", c.reasoning);
    }

    #[test]
    fn classification_is_deterministic() {
        let router = Router::new();
        let a = router.classify("plan a strategy to compare these approaches");
        let b = router.classify("plan a strategy to compare these approaches");
        assert_eq!(a.agent, b.agent);
        assert_eq!(a.complexity, b.complexity);
        assert!((a.confidence - b.confidence).abs() < f64::EPSILON);
    }

    #[test]
    fn confidence_caps_at_one() {
        let router = Router::new();
        let c = router.classify(
            "hack the firewall with an exploit payload to bypass network security and pentest it",
        );
        assert_eq!(c.agent, AgentKind::Security);
        assert!((c.confidence - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn custom_profiles_swap_the_table() {
        let profiles = RouterProfiles {
            profiles: vec![KeywordProfile {
                agent: "executor".to_string(),
                weight: 1.0,
                keywords: vec!["banana".to_string()],
            }],
        };
        let router = Router::with_profiles(profiles);
        let c = router.classify("peel the banana");
        assert_eq!(c.agent, AgentKind::Executor);
    }
}
