//! # Operator Console Module
//!
//! Interactive line-edited console against a running instance's HTTP API:
//! submit queries, switch mode and context retrieval, list the registry,
//! and watch fleet state.

mod console;
mod display;

pub use console::run;
pub use display::{display_fleet_table, display_models_table};
