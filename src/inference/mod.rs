//! # Inference Client Module
//!
//! Issues completion calls against the managed llama-server processes and
//! owns the per-tier timing policy: a hard per-call timeout, a bounded
//! number of retries with a fixed linear delay between attempts, and a
//! per-tier admission gate so concurrent queries queue instead of piling
//! onto one subprocess.
//!
//! The transport sits behind the `InferenceBackend` trait so orchestration
//! can be exercised against mock backends; `HttpBackend` is the production
//! implementation.

mod client;

pub use client::{
    HttpBackend, InferenceBackend, InferenceClient, InferenceError, InferenceOutput,
    InferenceRequest, TierEndpoint, TierEndpoints, TierPolicy,
};
