//! # Server Fleet Module
//!
//! Starts, stops, and health-checks one llama-server subprocess per enabled
//! model. Each handle walks an explicit state machine (`starting` →
//! `ready` → `error`/`stopped`); an errored handle never self-heals and
//! waits for an explicit restart. Fleet startup runs all spawns
//! concurrently so total latency is the slowest model load rather than the
//! sum, and a steady-state poll loop watches every ready server, tolerating
//! an empty fleet.

mod fleet;
mod types;

pub use fleet::{FleetManager, FleetSummary};
pub use types::{ServerHandle, ServerState, StartupError};
