//! Device detection and resource profiles.
//!
//! At startup the server detects whether it is running on a high-resource
//! desktop or a low-resource mobile environment (Termux) and selects one of
//! two canonical [`DeviceProfile`]s: model path, context window, thread
//! count, GPU layers, batch size, image-generation flag, and memory budget.
//! The profile feeds the backend adapters and the engine and is immutable
//! after startup.

use std::env;
use std::path::Path;

/// Detected execution environment class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    /// High-resource machine (workstation, server).
    Desktop,
    /// Low-resource ARM environment (phone under Termux, small SBC).
    Mobile,
}

impl DeviceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceKind::Desktop => "desktop",
            DeviceKind::Mobile => "mobile",
        }
    }

    /// Parse an override string; unknown values fall back to detection.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "desktop" | "pc" => Some(DeviceKind::Desktop),
            "mobile" | "android" => Some(DeviceKind::Mobile),
            _ => None,
        }
    }
}

/// Resource limits and model selection for the running device.
#[derive(Debug, Clone)]
pub struct DeviceProfile {
    pub kind: DeviceKind,
    /// Path to the local model weights relative to the model store.
    pub model_path: String,
    /// Human-readable model name.
    pub model_name: String,
    /// Context window passed to the local backend.
    pub context_window: usize,
    /// Worker thread count for the local backend.
    pub threads: usize,
    /// GPU layers to offload; 0 on devices without a usable GPU.
    pub gpu_layers: usize,
    /// Prompt batch size.
    pub batch_size: usize,
    /// Whether local image generation is enabled.
    pub image_generation: bool,
    /// Memory budget in GiB assumed available for inference.
    pub memory_budget_gb: usize,
}

impl DeviceProfile {
    /// High-resource profile.
    pub fn desktop() -> Self {
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        Self {
            kind: DeviceKind::Desktop,
            model_path: "llama.cpp/models/Qwen2.5-Coder-14B-Instruct-abliterated-Q4_K_M.gguf"
                .to_string(),
            model_name: "Qwen2.5-Coder-14B-Instruct-Abliterated".to_string(),
            context_window: 8192,
            threads: if cpus > 2 { cpus - 2 } else { 2 },
            gpu_layers: 45,
            batch_size: 512,
            image_generation: true,
            memory_budget_gb: 16,
        }
    }

    /// Low-resource profile.
    pub fn mobile() -> Self {
        Self {
            kind: DeviceKind::Mobile,
            model_path: "llama.cpp/models/mistral-7b-instruct-v0.2.Q4_K_M.gguf".to_string(),
            model_name: "Mistral-7B-Instruct-v0.2".to_string(),
            context_window: 4096,
            threads: 4,
            gpu_layers: 0,
            batch_size: 256,
            image_generation: false,
            memory_budget_gb: 4,
        }
    }

    /// Detect the environment and build the matching profile.
    ///
    /// `override_kind` (from configuration) wins over detection.
    pub fn detect(override_kind: Option<&str>) -> Self {
        if let Some(kind) = override_kind.and_then(DeviceKind::parse) {
            return match kind {
                DeviceKind::Desktop => Self::desktop(),
                DeviceKind::Mobile => Self::mobile(),
            };
        }
        match detect_kind() {
            DeviceKind::Desktop => Self::desktop(),
            DeviceKind::Mobile => Self::mobile(),
        }
    }
}

/// Inspect well-known filesystem and environment markers.
fn detect_kind() -> DeviceKind {
    if Path::new("/data/data/com.termux").exists() {
        return DeviceKind::Mobile;
    }
    if env::var("TERMUX_VERSION").is_ok() {
        return DeviceKind::Mobile;
    }
    if let Ok(prefix) = env::var("PREFIX") {
        if prefix.contains("com.termux") {
            return DeviceKind::Mobile;
        }
    }
    // ARM could be a phone or an ARM workstation; the Termux storage link
    // disambiguates.
    let arch = env::consts::ARCH;
    if arch.starts_with("arm") || arch.starts_with("aarch") {
        if let Some(home) = env::var_os("HOME") {
            if Path::new(&home).join("storage").exists() {
                return DeviceKind::Mobile;
            }
        }
    }
    DeviceKind::Desktop
}
