use std::error::Error;
use std::fmt;
use chrono::{serde::ts_seconds, DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Inference capability class. Each tier is backed by a distinct model size
/// and a distinct running server process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Fast,
    Balanced,
    Powerful,
}

impl Tier {
    /// All tiers, in escalation order.
    pub const ALL: [Tier; 3] = [Tier::Fast, Tier::Balanced, Tier::Powerful];

    /// Picks a tier for a model from its parameter count in billions.
    ///
    /// Models under ~4B parameters serve the fast tier, up to ~13B the
    /// balanced tier, anything larger the powerful tier. Unknown sizes land
    /// on balanced so an unparseable size label never claims the fast slot.
    pub fn for_parameter_billions(params: Option<f64>) -> Tier {
        match params {
            Some(p) if p <= 4.0 => Tier::Fast,
            Some(p) if p <= 13.0 => Tier::Balanced,
            Some(_) => Tier::Powerful,
            None => Tier::Balanced,
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tier::Fast => write!(f, "fast"),
            Tier::Balanced => write!(f, "balanced"),
            Tier::Powerful => write!(f, "powerful"),
        }
    }
}

impl std::str::FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "fast" => Ok(Tier::Fast),
            "balanced" => Ok(Tier::Balanced),
            "powerful" => Ok(Tier::Powerful),
            other => Err(format!("Unknown tier: {}", other)),
        }
    }
}

/// Subprocess settings for one model, initialized from the tier defaults at
/// discovery and adjustable per model afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeSettings {
    /// Layers offloaded to the GPU
    pub gpu_layers: u32,
    /// Context window passed to llama-server
    pub context_size: usize,
    /// Worker threads (server default when absent)
    pub threads: Option<usize>,
    /// Batch size passed to llama-server
    pub batch_size: usize,
    /// Whether to enable flash attention
    pub flash_attention: bool,
    /// Whether to memory-map model weights
    pub mmap: bool,
}

/// Represents a model entry in the registry file.
///
/// This struct contains persistent metadata about a discovered model and is
/// serialized to/from the model_registry.json file. Entries are created by
/// a discovery scan and removed only when a later scan no longer finds the
/// file; tier overrides, the enabled flag, and runtime settings survive
/// rescans.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelEntry {
    /// Unique identifier, derived from the filename stem
    pub model_id: String,
    /// Filename of the model file (relative to the models directory)
    pub filename: String,
    /// Human-readable name of the model
    pub name: String,
    /// Architecture of the model (e.g., "llama", "qwen2")
    pub architecture: String,
    /// Size label from the file (e.g., "7B", "0.6B")
    pub size_label: String,
    /// Quantization format name (e.g., "Q4_K_M")
    pub quantization: String,
    /// Parameter count in billions, when the size label parses
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameter_billions: Option<f64>,
    /// Number of tensors reported by the file header
    pub tensor_count: u64,
    /// Tier this model serves; auto-assigned at discovery, user-overridable
    pub tier: Tier,
    /// Whether the model participates in the fleet
    pub enabled: bool,
    /// Port of this model's running server, when one is assigned
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_port: Option<u16>,
    /// Subprocess settings for this model
    pub runtime: RuntimeSettings,
    /// When the model was added to the registry
    #[serde(with = "ts_seconds")]
    pub added_date: DateTime<Utc>,
}

/// Custom error types for registry operations
#[derive(Debug)]
pub enum RegistryError {
    /// Wraps std::io::Error for file operations
    IoError(std::io::Error),
    /// Registry file could not be parsed or written
    SerdeError(serde_json::Error),
    /// No entry exists for the requested model id
    ModelNotFound(String),
    /// A lock on the registry state was poisoned
    LockPoisoned,
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RegistryError::IoError(e) => write!(f, "I/O error: {}", e),
            RegistryError::SerdeError(e) => write!(f, "Registry serialization error: {}", e),
            RegistryError::ModelNotFound(id) => write!(f, "Model not found: {}", id),
            RegistryError::LockPoisoned => write!(f, "Registry lock poisoned"),
        }
    }
}

impl Error for RegistryError {}

impl From<std::io::Error> for RegistryError {
    fn from(err: std::io::Error) -> Self {
        RegistryError::IoError(err)
    }
}

impl From<serde_json::Error> for RegistryError {
    fn from(err: serde_json::Error) -> Self {
        RegistryError::SerdeError(err)
    }
}
