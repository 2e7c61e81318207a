//! # Model Registry Module
//!
//! Tracks every GGUF model discovered in the models directory: identity and
//! file metadata, tier assignment, enabled state, assigned subprocess port,
//! and per-model runtime settings. The registry is the single owner of this
//! state; discovery scans, enable/disable toggles, and the fleet's port
//! bookkeeping all go through it.
//!
//! State lives behind a `RwLock` so the API server can read concurrently
//! while scans and toggles take exclusive writes, and is persisted to a
//! `model_registry.json` file in the models directory so tier overrides and
//! enabled flags survive restarts.

mod registry;
mod types;

pub use registry::{ModelRegistry, ScanSummary};
pub use types::{ModelEntry, RegistryError, RuntimeSettings, Tier};
