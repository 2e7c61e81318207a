//! # API Server Module
//!
//! The outward HTTP surface: query submission and the metadata endpoints
//! the operator tooling consumes. Orchestration errors map onto status
//! codes (bad request, not implemented, service unavailable, bad gateway)
//! and every payload travels in the same response envelope.

mod routes;
mod server;
mod types;

pub use server::{ApiServer, AppState};
pub use types::{ApiResponse, FleetStartResponse, ScanResponse, SetEnabledRequest, SetTierRequest};
