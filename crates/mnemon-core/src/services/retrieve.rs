//! Retrieval: prompt analysis, lookup-index generation, vector search.

use crate::bus::{Envelope, Topic};
use crate::config::RetrievalConfig;
use crate::error::{HostError, PipelineError, PluginError};
use crate::metrics::{MetricName, MetricsTracker};
use crate::model::{ConversationDirection, Prompt, PromptAnalysis, RetrieveResult};
use crate::plugin::{CallArgs, Embedding, LanguageModel, PluginRegistry, VectorStore};
use crate::prompts;
use crate::recorder::CallSite;
use crate::runtime::{Service, ServiceContext};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Arc, OnceLock};

const SERVICE_NAME: &str = "RetrieveService";

/// Retrieval counters.
#[derive(Debug, Clone, Copy)]
pub enum RetrieveMetric {
    /// Prompts accepted for retrieval.
    PromptsReceived,
    /// Analyses completed.
    AnalysesCompleted,
    /// Vector queries issued.
    VectorQueries,
}

impl MetricName for RetrieveMetric {
    fn as_str(&self) -> &'static str {
        match self {
            RetrieveMetric::PromptsReceived => "prompts_received",
            RetrieveMetric::AnalysesCompleted => "analyses_completed",
            RetrieveMetric::VectorQueries => "vector_queries",
        }
    }
}

/// The `RETRIEVE_COMPLETE` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrieveOutcome {
    /// The prompt that was analyzed.
    pub prompt: Prompt,
    /// Derived analysis facts.
    pub analysis: PromptAnalysis,
    /// Ordered candidate engram ids.
    pub retrieve_result: RetrieveResult,
}

#[derive(Deserialize)]
struct IndexTextArray {
    index_text_array: Vec<String>,
}

struct Inner {
    llm_analyze: Arc<dyn LanguageModel>,
    llm_gen_indices: Arc<dyn LanguageModel>,
    embedding: Arc<dyn Embedding>,
    vector: Arc<dyn VectorStore>,
    retrieval: RetrievalConfig,
    metrics: MetricsTracker,
    ctx: OnceLock<ServiceContext>,
}

impl Inner {
    fn ctx(&self) -> &ServiceContext {
        self.ctx.get().expect("service started")
    }

    /// Call indexes per prompt: 0 analysis, 1 lookup generation, 2 lookup
    /// embedding, `3 + i` the vector query for lookup `i`.
    fn site(&self, call_index: usize, prompt_id: &str) -> CallSite {
        CallSite::new(SERVICE_NAME, call_index, prompt_id)
    }

    async fn process(self: Arc<Self>, prompt: Prompt) -> Result<(), PipelineError> {
        // Conversation direction.
        let args = CallArgs::for_site(self.site(0, &prompt.id));
        let reply = self
            .llm_analyze
            .submit(
                &prompts::render_conversation(&prompt),
                Some(&prompts::conversation_schema()),
                &args,
            )
            .await?;
        let direction: ConversationDirection =
            serde_json::from_str(&reply.text).map_err(|e| PipelineError::MalformedPayload {
                record: "ConversationDirection",
                message: e.to_string(),
            })?;

        // Lookup indices. An empty array just means nothing to search for.
        let args = CallArgs::for_site(self.site(1, &prompt.id));
        let reply = self
            .llm_gen_indices
            .submit(
                &prompts::render_lookup_indices(&prompt),
                Some(&prompts::index_array_schema()),
                &args,
            )
            .await?;
        let lookups: IndexTextArray =
            serde_json::from_str(&reply.text).map_err(|e| PipelineError::MalformedPayload {
                record: "index_text_array",
                message: e.to_string(),
            })?;

        let analysis = PromptAnalysis {
            prompt_id: prompt.id.clone(),
            conversation_direction: direction,
            indices: lookups.index_text_array.clone(),
        };
        self.metrics.increment(RetrieveMetric::AnalysesCompleted);

        // Embed the lookups and query the vector store, preserving lookup
        // order and deduplicating candidates.
        let mut engram_ids = Vec::new();
        if !analysis.indices.is_empty() {
            let args = CallArgs::for_site(self.site(2, &prompt.id));
            let vectors = self.embedding.generate(&analysis.indices, &args).await?;

            let mut seen = HashSet::new();
            for (i, vector) in vectors.iter().enumerate() {
                let args = CallArgs::for_site(self.site(3 + i, &prompt.id)).with_query_limits(
                    self.retrieval.n_results,
                    self.retrieval.threshold,
                );
                let ids = self.vector.query("main", vector, &args).await?;
                self.metrics.increment(RetrieveMetric::VectorQueries);
                for id in ids {
                    if seen.insert(id.clone()) {
                        engram_ids.push(id);
                    }
                }
            }
        }

        let outcome = RetrieveOutcome {
            analysis,
            retrieve_result: RetrieveResult {
                prompt_id: prompt.id.clone(),
                engram_ids,
            },
            prompt,
        };
        match serde_json::to_value(&outcome) {
            Ok(payload) => self.ctx().publish(Topic::RetrieveComplete, payload),
            Err(e) => {
                return Err(PipelineError::MalformedPayload {
                    record: "RetrieveOutcome",
                    message: e.to_string(),
                })
            }
        }
        Ok(())
    }
}

/// Analyzes prompts, selects candidate memory, and publishes
/// `RETRIEVE_COMPLETE`.
pub struct RetrieveService {
    inner: Arc<Inner>,
}

impl RetrieveService {
    /// Resolve the service's plugins from the registry.
    pub fn new(
        registry: &PluginRegistry,
        retrieval: RetrievalConfig,
    ) -> Result<Self, PluginError> {
        Ok(Self {
            inner: Arc::new(Inner {
                llm_analyze: registry.llm("analyze")?,
                llm_gen_indices: registry.llm("gen_indices")?,
                embedding: registry.embedding("gen_embed")?,
                vector: registry.vector("db")?,
                retrieval,
                metrics: MetricsTracker::new(),
                ctx: OnceLock::new(),
            }),
        })
    }

    /// Entry point for callers outside the fabric: publish the prompt on
    /// `SUBMIT_PROMPT`. The service's own subscription picks it up.
    pub fn submit(&self, prompt: &Prompt) {
        match serde_json::to_value(prompt) {
            Ok(payload) => self.inner.ctx().publish(Topic::SubmitPrompt, payload),
            Err(e) => tracing::error!(error = %e, "Failed to serialize prompt"),
        }
    }
}

#[async_trait::async_trait]
impl Service for RetrieveService {
    fn name(&self) -> &'static str {
        SERVICE_NAME
    }

    async fn start(&self, ctx: ServiceContext) -> Result<(), HostError> {
        ctx.subscribe(Topic::SubmitPrompt);
        ctx.subscribe(Topic::Acknowledge);
        self.inner.ctx.set(ctx).ok();
        Ok(())
    }

    async fn handle(&self, envelope: Envelope) {
        match envelope.topic {
            Topic::SubmitPrompt => {
                let prompt: Prompt = match serde_json::from_value(envelope.payload) {
                    Ok(prompt) => prompt,
                    Err(e) => {
                        tracing::error!(error = %e, "Dropping malformed prompt");
                        return;
                    }
                };
                self.inner.metrics.increment(RetrieveMetric::PromptsReceived);

                let inner = self.inner.clone();
                self.inner.ctx().run_task(async move {
                    let prompt_id = prompt.id.clone();
                    if let Err(e) = inner.clone().process(prompt).await {
                        tracing::error!(prompt_id = %prompt_id, error = %e, "Retrieval failed");
                    }
                });
            }
            Topic::Acknowledge => {
                let ctx = self.inner.ctx();
                let packet = self.inner.metrics.get_and_reset_packet();
                ctx.publish(
                    Topic::Status,
                    super::status_payload(ctx, self.name(), packet),
                );
            }
            other => {
                tracing::debug!(topic = %other, "Ignoring unexpected topic");
            }
        }
    }
}
