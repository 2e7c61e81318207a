use std::error::Error;
use std::fmt;
use chrono::{serde::ts_seconds, DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::inference::InferenceError;
use crate::registry::Tier;
use crate::retrieval::RetrievalArtifact;
use crate::routing::ComplexityAssessment;

/// Longest query text accepted, in characters.
pub const MAX_QUERY_CHARS: usize = 10_000;

/// Query execution mode. A closed set: the last three are declared but not
/// implemented and fail fast rather than degrading to `simple`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QueryMode {
    Simple,
    TwoStage,
    Council,
    Debate,
    MultiChat,
}

impl Default for QueryMode {
    fn default() -> Self {
        QueryMode::Simple
    }
}

impl fmt::Display for QueryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryMode::Simple => write!(f, "simple"),
            QueryMode::TwoStage => write!(f, "two-stage"),
            QueryMode::Council => write!(f, "council"),
            QueryMode::Debate => write!(f, "debate"),
            QueryMode::MultiChat => write!(f, "multi-chat"),
        }
    }
}

/// One user query, immutable once submitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRequest {
    /// Query text, 1 to 10000 characters
    pub text: String,
    /// Execution mode
    #[serde(default)]
    pub mode: QueryMode,
    /// Whether to retrieve document context before inference
    #[serde(default = "default_use_context")]
    pub use_context: bool,
    /// Generation cap passed to the server
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    /// Sampling temperature passed to the server
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

fn default_use_context() -> bool {
    true
}

fn default_max_tokens() -> usize {
    512
}

fn default_temperature() -> f32 {
    0.7
}

/// Which step of the pipeline a stage record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageKind {
    /// The single inference pass of `simple` mode
    Answer,
    /// The fast-tier first pass of `two-stage` mode
    Draft,
    /// The refinement pass of `two-stage` mode
    Refine,
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageKind::Answer => write!(f, "answer"),
            StageKind::Draft => write!(f, "draft"),
            StageKind::Refine => write!(f, "refine"),
        }
    }
}

/// Provenance for one inference pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageRecord {
    /// Which pipeline step this was
    pub stage: StageKind,
    /// Tier the call went to
    pub tier: Tier,
    /// Model that served the call
    pub model_id: String,
    /// Prompt tokens evaluated by the server
    pub prompt_tokens: usize,
    /// Tokens generated by the server
    pub completion_tokens: usize,
    /// True when the server reused prompt tokens from its cache
    pub cache_hit: bool,
    /// Wall-clock time for this stage, in milliseconds
    pub elapsed_ms: u64,
    /// Context artifacts included in this stage's prompt
    pub artifacts: Vec<RetrievalArtifact>,
    /// True when retrieval was requested but unavailable
    pub retrieval_degraded: bool,
    /// Warning when the index was built with a different embedding model
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_mismatch: Option<String>,
}

/// Final result of one orchestrated query. Built once at the end of the
/// pipeline and never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResponse {
    /// Unique id for this response
    pub id: String,
    /// The query text, echoed back
    pub text: String,
    /// Mode the query ran under
    pub mode: QueryMode,
    /// The authoritative answer text. For `two-stage` this is the
    /// refinement output; the draft lives in its stage record.
    pub answer: String,
    /// Complexity assessment that drove tier selection
    pub assessment: ComplexityAssessment,
    /// Per-stage provenance, in execution order
    pub stages: Vec<StageRecord>,
    /// Tiers used, in execution order
    pub tiers_used: Vec<Tier>,
    /// Total orchestration time, in milliseconds
    pub total_elapsed_ms: u64,
    /// When the response was assembled
    #[serde(with = "ts_seconds")]
    pub created: DateTime<Utc>,
}

/// Custom error types for query orchestration
#[derive(Debug)]
pub enum OrchestrationError {
    /// The request failed validation before any work started
    InvalidRequest(String),
    /// The requested mode is declared but not implemented
    UnsupportedMode(QueryMode),
    /// No ready server exists for the tier the pipeline needs
    NoServerForTier(Tier),
    /// An inference stage failed after its retries were exhausted
    StageFailed {
        stage: StageKind,
        tier: Tier,
        source: InferenceError,
    },
}

impl fmt::Display for OrchestrationError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            OrchestrationError::InvalidRequest(msg) => write!(f, "Invalid query: {}", msg),
            OrchestrationError::UnsupportedMode(mode) => {
                write!(f, "Query mode '{}' is not implemented", mode)
            }
            OrchestrationError::NoServerForTier(tier) => {
                write!(f, "No ready server for tier {}", tier)
            }
            OrchestrationError::StageFailed { stage, tier, source } => {
                write!(f, "The {} stage failed on tier {}: {}", stage, tier, source)
            }
        }
    }
}

impl Error for OrchestrationError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            OrchestrationError::StageFailed { source, .. } => Some(source),
            _ => None,
        }
    }
}
