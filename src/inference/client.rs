use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::Semaphore;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, warn};

use crate::config::{TierConfig, TiersConfig};
use crate::registry::Tier;

/// One inference call: the prompt and its generation parameters.
#[derive(Debug, Clone)]
pub struct InferenceRequest {
    pub prompt: String,
    pub max_tokens: usize,
    pub temperature: f32,
}

/// Generated text plus token accounting from the server.
#[derive(Debug, Clone)]
pub struct InferenceOutput {
    pub text: String,
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    /// Prompt tokens the server reused from its prompt cache
    pub cached_tokens: usize,
}

/// Custom error types for inference calls
#[derive(Debug)]
pub enum InferenceError {
    /// The call did not complete within the tier's time budget
    Timeout { attempts: u32, budget: Duration },
    /// The server could not be reached or dropped the connection
    Transport(String),
    /// The server answered with something other than a completion
    BadResponse(String),
}

impl fmt::Display for InferenceError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            InferenceError::Timeout { attempts, budget } => write!(
                f,
                "Inference timed out after {} attempt{} within {:.1}s",
                attempts,
                if *attempts == 1 { "" } else { "s" },
                budget.as_secs_f64()
            ),
            InferenceError::Transport(msg) => write!(f, "Inference transport error: {}", msg),
            InferenceError::BadResponse(msg) => write!(f, "Unusable inference response: {}", msg),
        }
    }
}

impl Error for InferenceError {}

/// A tier's resolved endpoint: which model is serving and where.
#[derive(Debug, Clone)]
pub struct TierEndpoint {
    pub model_id: String,
    pub url: String,
}

/// Resolves a tier to a ready server. Implemented by the fleet manager;
/// consumed by the orchestrator.
pub trait TierEndpoints: Send + Sync {
    fn endpoint(&self, tier: Tier) -> Option<TierEndpoint>;
}

/// Timing policy for one tier's inference calls.
///
/// `timeout` caps a single attempt, and the whole call (attempts plus the
/// fixed delays between them) is bounded by
/// `timeout + max_retries * retry_delay`. The delay is linear on purpose:
/// an earlier exponential scheme let the worst case outgrow the caller's
/// own timeout, which turned server-side failures into silent client-side
/// ones.
#[derive(Debug, Clone)]
pub struct TierPolicy {
    pub timeout: Duration,
    pub max_retries: u32,
    pub retry_delay: Duration,
}

impl TierPolicy {
    pub fn from_config(config: &TierConfig) -> Self {
        Self {
            timeout: Duration::from_secs_f64(config.timeout_seconds),
            max_retries: config.max_retries,
            retry_delay: Duration::from_secs_f64(config.retry_delay_seconds),
        }
    }

    /// Upper bound on one call's wall-clock time.
    pub fn worst_case(&self) -> Duration {
        self.timeout + self.retry_delay * self.max_retries
    }
}

/// Raw completion transport against one server endpoint.
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    async fn complete(
        &self,
        endpoint: &str,
        request: &InferenceRequest,
    ) -> Result<InferenceOutput, InferenceError>;
}

/// llama-server completion response shape.
#[derive(Deserialize)]
struct CompletionResponse {
    content: String,
    #[serde(default)]
    tokens_evaluated: usize,
    #[serde(default)]
    tokens_predicted: usize,
    #[serde(default)]
    tokens_cached: usize,
}

/// Production backend: POSTs to a llama-server /completion endpoint.
pub struct HttpBackend {
    client: reqwest::Client,
}

impl HttpBackend {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl InferenceBackend for HttpBackend {
    async fn complete(
        &self,
        endpoint: &str,
        request: &InferenceRequest,
    ) -> Result<InferenceOutput, InferenceError> {
        let url = format!("{}/completion", endpoint.trim_end_matches('/'));

        let response = self
            .client
            .post(&url)
            .json(&json!({
                "prompt": request.prompt,
                "n_predict": request.max_tokens,
                "temperature": request.temperature,
            }))
            .send()
            .await
            .map_err(|e| InferenceError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(InferenceError::BadResponse(format!(
                "Server returned HTTP {}", response.status()
            )));
        }

        let parsed: CompletionResponse = response
            .json()
            .await
            .map_err(|e| InferenceError::BadResponse(e.to_string()))?;

        Ok(InferenceOutput {
            text: parsed.content,
            prompt_tokens: parsed.tokens_evaluated,
            completion_tokens: parsed.tokens_predicted,
            cached_tokens: parsed.tokens_cached,
        })
    }
}

/// Applies tier policy and admission gating to a backend.
///
/// Each tier holds a semaphore sized by its `max_concurrent` setting, so
/// queries beyond that bound queue here rather than reaching the
/// subprocess. Acquisition order is the queue policy; nothing is rejected.
pub struct InferenceClient {
    backend: Arc<dyn InferenceBackend>,
    policies: HashMap<Tier, TierPolicy>,
    gates: HashMap<Tier, Arc<Semaphore>>,
}

impl InferenceClient {
    pub fn new(backend: Arc<dyn InferenceBackend>, tiers: &TiersConfig) -> Self {
        let mut policies = HashMap::new();
        let mut gates = HashMap::new();
        for tier in Tier::ALL {
            let config = tiers.get(tier);
            policies.insert(tier, TierPolicy::from_config(config));
            gates.insert(tier, Arc::new(Semaphore::new(config.max_concurrent)));
        }
        Self { backend, policies, gates }
    }

    /// The policy applied to a tier's calls.
    pub fn policy(&self, tier: Tier) -> &TierPolicy {
        &self.policies[&tier]
    }

    /// Runs one completion against a tier's endpoint under its policy.
    pub async fn generate(
        &self,
        tier: Tier,
        endpoint: &TierEndpoint,
        request: &InferenceRequest,
    ) -> Result<InferenceOutput, InferenceError> {
        // Queue behind the tier's admission gate. The semaphore is never
        // closed, so acquisition only fails if the client is being torn
        // down mid-call.
        let gate = Arc::clone(&self.gates[&tier]);
        let _permit = gate
            .acquire_owned()
            .await
            .map_err(|_| InferenceError::Transport("Tier admission gate closed".to_string()))?;

        let policy = &self.policies[&tier];
        call_with_retry(self.backend.as_ref(), &endpoint.url, request, policy).await
    }
}

/// Attempt-with-timeout, retry-with-fixed-delay combinator.
///
/// A single attempt never runs longer than `policy.timeout`, and the whole
/// call is capped by the overall deadline `policy.worst_case()`. Attempts
/// draw their timeout from whichever budget is smaller, and a retry delay
/// is only taken when enough of the deadline is left to make another
/// attempt worthwhile. Against a server that never responds this comes out
/// to exactly `timeout + max_retries * retry_delay` of wall clock.
async fn call_with_retry(
    backend: &dyn InferenceBackend,
    endpoint: &str,
    request: &InferenceRequest,
    policy: &TierPolicy,
) -> Result<InferenceOutput, InferenceError> {
    let deadline = Instant::now() + policy.worst_case();
    let mut attempts = 0u32;
    let mut last_error = None;

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if attempts > policy.max_retries || remaining.is_zero() {
            break;
        }

        let attempt_timeout = policy.timeout.min(remaining);
        attempts += 1;
        debug!(
            "Inference attempt {}/{} against {} ({:.1}s budget)",
            attempts,
            policy.max_retries + 1,
            endpoint,
            attempt_timeout.as_secs_f64()
        );

        match timeout(attempt_timeout, backend.complete(endpoint, request)).await {
            Ok(Ok(output)) => return Ok(output),
            Ok(Err(e)) => {
                warn!("Inference attempt {} failed: {}", attempts, e);
                last_error = Some(e);
            }
            Err(_) => {
                warn!(
                    "Inference attempt {} timed out after {:.1}s",
                    attempts,
                    attempt_timeout.as_secs_f64()
                );
                last_error = Some(InferenceError::Timeout {
                    attempts,
                    budget: policy.worst_case(),
                });
            }
        }

        if attempts > policy.max_retries {
            break;
        }
        let left = deadline.saturating_duration_since(Instant::now());
        if left <= policy.retry_delay {
            break;
        }
        sleep(policy.retry_delay).await;
    }

    Err(last_error.unwrap_or(InferenceError::Timeout {
        attempts,
        budget: policy.worst_case(),
    }))
}
