//! # Query Orchestrator Module
//!
//! Coordinates one query end to end: complexity assessment picks the
//! tier(s), the retriever optionally supplies context under a token budget,
//! and the fleet's ready servers run one (`simple`) or two (`two-stage`)
//! inference passes. The final response carries full provenance: the
//! assessment, per-stage model ids, token counts, timings, and the context
//! artifacts used. Declared-but-unimplemented modes fail fast before any
//! resource is touched.

mod orchestrator;
mod types;

pub use orchestrator::Orchestrator;
pub use types::{
    OrchestrationError, QueryMode, QueryRequest, QueryResponse, StageKind, StageRecord,
    MAX_QUERY_CHARS,
};
