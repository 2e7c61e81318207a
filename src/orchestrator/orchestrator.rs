use std::sync::Arc;
use std::time::Instant;
use chrono::Utc;
use tracing::{error, info};
use uuid::Uuid;

use crate::inference::{InferenceClient, InferenceRequest, TierEndpoints};
use crate::orchestrator::types::{
    OrchestrationError, QueryMode, QueryRequest, QueryResponse, StageKind, StageRecord,
    MAX_QUERY_CHARS,
};
use crate::registry::Tier;
use crate::retrieval::{ContextRetriever, RetrievalArtifact, RetrievalResult};
use crate::routing::{ComplexityAssessment, ComplexityRouter};

/// Top-level query coordinator.
///
/// For each request it sequences: complexity assessment, optional context
/// retrieval, one or two inference stages against the fleet's ready
/// servers, and response assembly with full provenance. Retrieval failures
/// are absorbed into metadata; an inference failure after its retries
/// aborts the whole query with stage and tier attribution, never a partial
/// result.
pub struct Orchestrator {
    router: ComplexityRouter,
    retriever: ContextRetriever,
    client: InferenceClient,
    endpoints: Arc<dyn TierEndpoints>,
    token_budget: usize,
    min_relevance: f32,
}

impl Orchestrator {
    pub fn new(
        router: ComplexityRouter,
        retriever: ContextRetriever,
        client: InferenceClient,
        endpoints: Arc<dyn TierEndpoints>,
        token_budget: usize,
        min_relevance: f32,
    ) -> Self {
        Self {
            router,
            retriever,
            client,
            endpoints,
            token_budget,
            min_relevance,
        }
    }

    /// Executes one query to completion.
    ///
    /// Unsupported modes fail here, before any retrieval or inference is
    /// attempted.
    pub async fn execute(&self, request: QueryRequest) -> Result<QueryResponse, OrchestrationError> {
        validate(&request)?;

        match request.mode {
            QueryMode::Simple => self.run_simple(request).await,
            QueryMode::TwoStage => self.run_two_stage(request).await,
            mode @ (QueryMode::Council | QueryMode::Debate | QueryMode::MultiChat) => {
                Err(OrchestrationError::UnsupportedMode(mode))
            }
        }
    }

    /// Single-pass pipeline: the fast tier answers, unless the complexity
    /// assessment escalates the query to a higher tier.
    async fn run_simple(&self, request: QueryRequest) -> Result<QueryResponse, OrchestrationError> {
        let started = Instant::now();
        let assessment = self.router.assess(&request.text);
        let tier = assessment.bucket.tier();
        info!(
            "Query classified {:?} (score {:.2}), answering on tier {}",
            assessment.bucket, assessment.score, tier
        );

        let retrieval = self.retrieve_if_requested(&request).await;
        let prompt = compose_prompt(&request.text, &retrieval.artifacts);

        let (record, answer) = self
            .run_stage(StageKind::Answer, tier, prompt, retrieval, &request)
            .await?;

        Ok(assemble(request, assessment, answer, vec![record], started))
    }

    /// Two-pass pipeline: the fast tier drafts, then the tier picked by the
    /// complexity assessment refines the draft. The refinement output is
    /// the authoritative answer; the draft survives in its stage record.
    async fn run_two_stage(&self, request: QueryRequest) -> Result<QueryResponse, OrchestrationError> {
        let started = Instant::now();
        let assessment = self.router.assess(&request.text);
        let refine_tier = assessment.bucket.tier();
        info!(
            "Query classified {:?} (score {:.2}), drafting on {} then refining on {}",
            assessment.bucket, assessment.score, Tier::Fast, refine_tier
        );

        let retrieval = self.retrieve_if_requested(&request).await;
        let draft_prompt = compose_prompt(&request.text, &retrieval.artifacts);
        let (draft_record, draft) = self
            .run_stage(StageKind::Draft, Tier::Fast, draft_prompt, retrieval, &request)
            .await?;

        // Stage 2 depends on the draft, so it only starts once stage 1
        // succeeded; a stage 1 failure has already aborted the query.
        let refine_prompt = compose_refinement_prompt(&request.text, &draft);
        let (refine_record, answer) = self
            .run_stage(StageKind::Refine, refine_tier, refine_prompt, no_retrieval(), &request)
            .await?;

        Ok(assemble(
            request,
            assessment,
            answer,
            vec![draft_record, refine_record],
            started,
        ))
    }

    /// Retrieves context when the request asks for it. Never fails: a
    /// missing index or a broken embedding endpoint comes back as a
    /// degraded, empty result and the query proceeds without context.
    async fn retrieve_if_requested(&self, request: &QueryRequest) -> RetrievalResult {
        if !request.use_context {
            return no_retrieval();
        }
        self.retriever
            .retrieve(&request.text, self.token_budget, self.min_relevance)
            .await
    }

    /// Runs one inference pass on a tier and folds the result into a stage
    /// record. Fails when the tier has no ready server or the call
    /// exhausts its retries.
    async fn run_stage(
        &self,
        stage: StageKind,
        tier: Tier,
        prompt: String,
        retrieval: RetrievalResult,
        request: &QueryRequest,
    ) -> Result<(StageRecord, String), OrchestrationError> {
        let endpoint = self
            .endpoints
            .endpoint(tier)
            .ok_or(OrchestrationError::NoServerForTier(tier))?;

        let inference = InferenceRequest {
            prompt,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        };

        let stage_started = Instant::now();
        let output = self
            .client
            .generate(tier, &endpoint, &inference)
            .await
            .map_err(|source| {
                error!("The {} stage failed on tier {}: {}", stage, tier, source);
                OrchestrationError::StageFailed { stage, tier, source }
            })?;
        let elapsed_ms = stage_started.elapsed().as_millis() as u64;

        info!(
            "Stage {} on {} ({}): {} prompt + {} completion tokens in {}ms",
            stage, tier, endpoint.model_id, output.prompt_tokens, output.completion_tokens,
            elapsed_ms
        );

        let record = StageRecord {
            stage,
            tier,
            model_id: endpoint.model_id,
            prompt_tokens: output.prompt_tokens,
            completion_tokens: output.completion_tokens,
            cache_hit: output.cached_tokens > 0,
            elapsed_ms,
            artifacts: retrieval.artifacts,
            retrieval_degraded: retrieval.degraded,
            model_mismatch: retrieval.model_mismatch,
        };

        Ok((record, output.text))
    }
}

/// Request validation; runs before any mode dispatch.
fn validate(request: &QueryRequest) -> Result<(), OrchestrationError> {
    if request.text.trim().is_empty() {
        return Err(OrchestrationError::InvalidRequest(
            "query text must not be empty".to_string(),
        ));
    }
    let chars = request.text.chars().count();
    if chars > MAX_QUERY_CHARS {
        return Err(OrchestrationError::InvalidRequest(format!(
            "query text is {} characters, the maximum is {}",
            chars, MAX_QUERY_CHARS
        )));
    }
    Ok(())
}

/// An empty, non-degraded retrieval result for stages that do not use
/// context.
fn no_retrieval() -> RetrievalResult {
    RetrievalResult {
        artifacts: Vec::new(),
        degraded: false,
        model_mismatch: None,
    }
}

/// Builds the inference prompt, prefixing retrieved context when present.
fn compose_prompt(query: &str, artifacts: &[RetrievalArtifact]) -> String {
    if artifacts.is_empty() {
        return query.to_string();
    }

    let mut prompt = String::from("Answer the question using the context below.\n\n");
    for artifact in artifacts {
        prompt.push_str(&format!("[{}]\n{}\n\n", artifact.source_id, artifact.text));
    }
    prompt.push_str(&format!("Question: {}\nAnswer:", query));
    prompt
}

/// Builds the stage-2 prompt from the original query and the stage-1 draft.
fn compose_refinement_prompt(query: &str, draft: &str) -> String {
    format!(
        "A first-pass answer to a question is given below. Improve it: fix any \
         mistakes, fill in gaps, and tighten the reasoning. Reply with the \
         improved answer only.\n\nQuestion: {}\n\nDraft answer:\n{}\n\nImproved answer:",
        query, draft
    )
}

/// Assembles the immutable response at the end of the pipeline.
fn assemble(
    request: QueryRequest,
    assessment: ComplexityAssessment,
    answer: String,
    stages: Vec<StageRecord>,
    started: Instant,
) -> QueryResponse {
    let tiers_used = stages.iter().map(|s| s.tier).collect();
    QueryResponse {
        id: Uuid::new_v4().to_string(),
        text: request.text,
        mode: request.mode,
        answer,
        assessment,
        stages,
        tiers_used,
        total_elapsed_ms: started.elapsed().as_millis() as u64,
        created: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RoutingConfig, TierConfig, TiersConfig};
    use crate::inference::{InferenceBackend, InferenceError, InferenceOutput, TierEndpoint};
    use crate::retrieval::{Embedder, IndexMetadata, IndexedChunk, RetrievalError, VectorIndex};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Endpoints for every tier, named after the tier for easy assertions.
    struct AllTiers;

    impl TierEndpoints for AllTiers {
        fn endpoint(&self, tier: Tier) -> Option<TierEndpoint> {
            Some(TierEndpoint {
                model_id: format!("{}-model", tier),
                url: format!("http://{}", tier),
            })
        }
    }

    /// Endpoints with no powerful-tier server.
    struct NoPowerful;

    impl TierEndpoints for NoPowerful {
        fn endpoint(&self, tier: Tier) -> Option<TierEndpoint> {
            match tier {
                Tier::Powerful => None,
                _ => Some(TierEndpoint {
                    model_id: format!("{}-model", tier),
                    url: format!("http://{}", tier),
                }),
            }
        }
    }

    /// Backend that records every call and answers with its endpoint name.
    struct RecordingBackend {
        calls: Mutex<Vec<(String, String)>>,
        fail_on: Option<&'static str>,
    }

    impl RecordingBackend {
        fn new() -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                fail_on: None,
            }
        }

        fn failing_on(endpoint_fragment: &'static str) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                fail_on: Some(endpoint_fragment),
            }
        }

        fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }

        fn prompts(&self) -> Vec<String> {
            self.calls.lock().unwrap().iter().map(|(_, p)| p.clone()).collect()
        }
    }

    #[async_trait]
    impl InferenceBackend for RecordingBackend {
        async fn complete(
            &self,
            endpoint: &str,
            request: &InferenceRequest,
        ) -> Result<InferenceOutput, InferenceError> {
            self.calls
                .lock()
                .unwrap()
                .push((endpoint.to_string(), request.prompt.clone()));
            if let Some(fragment) = self.fail_on {
                if endpoint.contains(fragment) {
                    return Err(InferenceError::Transport("connection refused".to_string()));
                }
            }
            Ok(InferenceOutput {
                text: format!("reply from {}", endpoint),
                prompt_tokens: 10,
                completion_tokens: 5,
                cached_tokens: 0,
            })
        }
    }

    /// Embedder that counts invocations, for asserting retrieval never ran.
    struct CountingEmbedder {
        calls: AtomicUsize,
    }

    impl CountingEmbedder {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Embedder for CountingEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, RetrievalError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![1.0, 0.0])
        }

        fn model_name(&self) -> &str {
            "test-embedder"
        }
    }

    fn tier_config() -> TierConfig {
        TierConfig {
            timeout_seconds: 1.0,
            max_retries: 0,
            retry_delay_seconds: 0.0,
            max_concurrent: 2,
            context_size: 4096,
            gpu_layers: 0,
            threads: None,
            batch_size: 512,
            flash_attention: false,
            mmap: true,
        }
    }

    fn test_index(model: &str) -> VectorIndex {
        let chunks = vec![IndexedChunk {
            source_id: "doc-1".to_string(),
            text: "Context about X.".to_string(),
            token_count: 4,
            embedding: vec![1.0, 0.0],
        }];
        let metadata = IndexMetadata {
            embedding_model: model.to_string(),
            dimension: 2,
            chunk_count: chunks.len(),
            built_at: Utc::now(),
        };
        VectorIndex::from_chunks(metadata, chunks).unwrap()
    }

    fn orchestrator(
        backend: Arc<dyn InferenceBackend>,
        endpoints: Arc<dyn TierEndpoints>,
        index: Option<VectorIndex>,
        embedder: Arc<dyn Embedder>,
    ) -> Orchestrator {
        let tiers = TiersConfig {
            fast: tier_config(),
            balanced: tier_config(),
            powerful: tier_config(),
        };
        Orchestrator::new(
            ComplexityRouter::new(&RoutingConfig {
                simple_max: 3.0,
                moderate_max: 7.0,
            }),
            ContextRetriever::with_index(index, embedder, "test-embedder".to_string()),
            InferenceClient::new(backend, &tiers),
            endpoints,
            100,
            0.1,
        )
    }

    fn request(text: &str, mode: QueryMode, use_context: bool) -> QueryRequest {
        QueryRequest {
            text: text.to_string(),
            mode,
            use_context,
            max_tokens: 64,
            temperature: 0.7,
        }
    }

    #[tokio::test]
    async fn simple_lookup_answers_on_the_fast_tier() {
        let backend = Arc::new(RecordingBackend::new());
        let orch = orchestrator(
            backend.clone(),
            Arc::new(AllTiers),
            None,
            Arc::new(CountingEmbedder::new()),
        );

        let response = orch
            .execute(request("What is X?", QueryMode::Simple, false))
            .await
            .unwrap();

        assert_eq!(response.tiers_used, vec![Tier::Fast]);
        assert_eq!(response.stages.len(), 1);
        assert_eq!(response.stages[0].stage, StageKind::Answer);
        assert_eq!(response.stages[0].model_id, "fast-model");
        assert_eq!(response.answer, "reply from http://fast");
        assert_eq!(response.text, "What is X?");
        assert_eq!(backend.call_count(), 1);
    }

    #[tokio::test]
    async fn two_stage_drafts_fast_and_refines_on_the_assessed_tier() {
        let backend = Arc::new(RecordingBackend::new());
        let orch = orchestrator(
            backend.clone(),
            Arc::new(AllTiers),
            None,
            Arc::new(CountingEmbedder::new()),
        );

        let response = orch
            .execute(request(
                "Analyze the tradeoffs between X and Y considering Z",
                QueryMode::TwoStage,
                false,
            ))
            .await
            .unwrap();

        assert_eq!(response.stages.len(), 2);
        assert_eq!(response.stages[0].stage, StageKind::Draft);
        assert_eq!(response.stages[0].tier, Tier::Fast);
        assert_eq!(response.stages[1].stage, StageKind::Refine);
        assert_eq!(response.stages[1].tier, Tier::Powerful);
        assert_eq!(response.tiers_used, vec![Tier::Fast, Tier::Powerful]);
        // The refinement output is the authoritative answer
        assert_eq!(response.answer, "reply from http://powerful");

        // The refinement prompt carries the original query and the draft
        let prompts = backend.prompts();
        assert_eq!(prompts.len(), 2);
        assert!(prompts[1].contains("Analyze the tradeoffs"));
        assert!(prompts[1].contains("reply from http://fast"));
    }

    #[tokio::test]
    async fn unsupported_mode_fails_before_any_work() {
        let backend = Arc::new(RecordingBackend::new());
        let embedder = Arc::new(CountingEmbedder::new());
        let orch = orchestrator(
            backend.clone(),
            Arc::new(AllTiers),
            Some(test_index("test-embedder")),
            embedder.clone(),
        );

        let result = orch
            .execute(request("Settle this argument", QueryMode::Debate, true))
            .await;

        assert!(matches!(
            result,
            Err(OrchestrationError::UnsupportedMode(QueryMode::Debate))
        ));
        // Zero inference calls and zero retrieval calls were issued
        assert_eq!(backend.call_count(), 0);
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn refine_failure_aborts_with_stage_attribution() {
        let backend = Arc::new(RecordingBackend::failing_on("powerful"));
        let orch = orchestrator(
            backend.clone(),
            Arc::new(AllTiers),
            None,
            Arc::new(CountingEmbedder::new()),
        );

        let result = orch
            .execute(request(
                "Analyze the tradeoffs between X and Y considering Z",
                QueryMode::TwoStage,
                false,
            ))
            .await;

        match result {
            Err(OrchestrationError::StageFailed { stage, tier, .. }) => {
                assert_eq!(stage, StageKind::Refine);
                assert_eq!(tier, Tier::Powerful);
            }
            other => panic!("expected StageFailed, got {:?}", other.map(|r| r.answer)),
        }
        // The draft ran; no partial response leaked out
        assert_eq!(backend.call_count(), 2);
    }

    #[tokio::test]
    async fn missing_tier_server_fails_after_the_draft() {
        let backend = Arc::new(RecordingBackend::new());
        let orch = orchestrator(
            backend.clone(),
            Arc::new(NoPowerful),
            None,
            Arc::new(CountingEmbedder::new()),
        );

        let result = orch
            .execute(request(
                "Analyze the tradeoffs between X and Y considering Z",
                QueryMode::TwoStage,
                false,
            ))
            .await;

        assert!(matches!(
            result,
            Err(OrchestrationError::NoServerForTier(Tier::Powerful))
        ));
        assert_eq!(backend.call_count(), 1);
    }

    #[tokio::test]
    async fn degraded_retrieval_is_absorbed_into_metadata() {
        let backend = Arc::new(RecordingBackend::new());
        let orch = orchestrator(
            backend.clone(),
            Arc::new(AllTiers),
            None, // no index loaded
            Arc::new(CountingEmbedder::new()),
        );

        let response = orch
            .execute(request("What is X?", QueryMode::Simple, true))
            .await
            .unwrap();

        assert!(response.stages[0].retrieval_degraded);
        assert!(response.stages[0].artifacts.is_empty());
        assert_eq!(response.answer, "reply from http://fast");
    }

    #[tokio::test]
    async fn retrieved_context_reaches_the_prompt_with_provenance() {
        let backend = Arc::new(RecordingBackend::new());
        let orch = orchestrator(
            backend.clone(),
            Arc::new(AllTiers),
            Some(test_index("test-embedder")),
            Arc::new(CountingEmbedder::new()),
        );

        let response = orch
            .execute(request("What is X?", QueryMode::Simple, true))
            .await
            .unwrap();

        assert!(!response.stages[0].retrieval_degraded);
        assert_eq!(response.stages[0].artifacts.len(), 1);
        assert_eq!(response.stages[0].artifacts[0].source_id, "doc-1");
        assert!(backend.prompts()[0].contains("Context about X."));
    }

    #[tokio::test]
    async fn embedding_model_mismatch_is_surfaced_in_the_stage_record() {
        let backend = Arc::new(RecordingBackend::new());
        let orch = orchestrator(
            backend.clone(),
            Arc::new(AllTiers),
            Some(test_index("some-older-model")),
            Arc::new(CountingEmbedder::new()),
        );

        let response = orch
            .execute(request("What is X?", QueryMode::Simple, true))
            .await
            .unwrap();

        assert!(response.stages[0].model_mismatch.is_some());
    }

    #[tokio::test]
    async fn empty_and_oversized_queries_are_rejected() {
        let backend = Arc::new(RecordingBackend::new());
        let orch = orchestrator(
            backend.clone(),
            Arc::new(AllTiers),
            None,
            Arc::new(CountingEmbedder::new()),
        );

        let empty = orch.execute(request("   ", QueryMode::Simple, false)).await;
        assert!(matches!(empty, Err(OrchestrationError::InvalidRequest(_))));

        let oversized = "x".repeat(MAX_QUERY_CHARS + 1);
        let too_long = orch
            .execute(request(&oversized, QueryMode::Simple, false))
            .await;
        assert!(matches!(too_long, Err(OrchestrationError::InvalidRequest(_))));

        assert_eq!(backend.call_count(), 0);
    }
}
