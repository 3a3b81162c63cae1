//! Consolidation: observation → engrams → indices → embeddings.
//!
//! Triggered by `OBSERVATION_COMPLETE`. Two independent branches run per
//! observation: the summary branch embeds the meta's full summary and emits
//! `META_COMPLETE`; the engram branch registers engrams, fans out index
//! generation per engram, joins, fans out embedding generation per index
//! set, joins again, and emits `ENGRAM_COMPLETE`. The branches fail
//! independently and consumers must not assume an ordering between
//! `META_COMPLETE` and `ENGRAM_COMPLETE`.
//!
//! Per engram the state machine is `REGISTERED → INDEXED → EMBEDDED →
//! EMITTED → EVICTED`; transitions are driven only by the join barriers.
//! Any contract violation (id collision, empty index array, missing
//! context) aborts the observation; its in-flight entries are evicted so
//! the builder is empty between observations.

use crate::bus::{Envelope, Topic};
use crate::error::{HostError, PipelineError, PluginError};
use crate::metrics::{MetricName, MetricsTracker};
use crate::model::{Engram, Index, Meta, Observation};
use crate::plugin::{CallArgs, Embedding, LanguageModel, PluginRegistry};
use crate::prompts;
use crate::recorder::{CallSite, MockRecorder};
use crate::runtime::{Service, ServiceContext};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

const SERVICE_NAME: &str = "ConsolidateService";

/// Consolidation counters.
#[derive(Debug, Clone, Copy)]
pub enum ConsolidateMetric {
    /// Observations admitted.
    ObservationsReceived,
    /// Summary embeddings attached.
    SummariesGenerated,
    /// Engrams registered for enrichment.
    EngramsGenerated,
    /// Index texts produced by the language model.
    IndicesGenerated,
    /// Index embeddings produced.
    EmbeddingsGenerated,
}

impl MetricName for ConsolidateMetric {
    fn as_str(&self) -> &'static str {
        match self {
            ConsolidateMetric::ObservationsReceived => "observations_received",
            ConsolidateMetric::SummariesGenerated => "summaries_generated",
            ConsolidateMetric::EngramsGenerated => "engrams_generated",
            ConsolidateMetric::IndicesGenerated => "indices_generated",
            ConsolidateMetric::EmbeddingsGenerated => "embeddings_generated",
        }
    }
}

/// Output of one index-generation task.
struct IndexSet {
    engram_id: String,
    source_id: String,
    indices: Vec<String>,
}

/// Output of one embedding task.
struct EmbeddedEngram {
    engram_id: String,
}

#[derive(Deserialize)]
struct IndexTextArray {
    index_text_array: Vec<String>,
}

struct Pipeline {
    llm_gen_indices: Arc<dyn LanguageModel>,
    embedding_gen_embed: Arc<dyn Embedding>,
    recorder: Arc<MockRecorder>,
    metrics: MetricsTracker,
    /// Engrams exclusively owned by this service while in flight.
    engram_builder: Mutex<HashMap<String, Engram>>,
    training_mode: AtomicBool,
    ctx: OnceLock<ServiceContext>,
}

impl Pipeline {
    fn ctx(&self) -> &ServiceContext {
        self.ctx.get().expect("service started")
    }

    fn training(&self) -> bool {
        self.training_mode.load(Ordering::SeqCst)
    }

    /// Recorder/replay call indexes per observation with `n` engrams:
    /// 0 is the service boundary (observation in, engram array out),
    /// `1 + i` the index generation for engram `i`, `1 + n + i` the
    /// embedding batch for engram `i`, and `1 + 2n` the summary embedding.
    fn site(&self, call_index: usize, source_id: &str) -> CallSite {
        CallSite::new(SERVICE_NAME, call_index, source_id)
    }

    /// The summary branch: embed `meta.summary_full.text` and emit
    /// `META_COMPLETE`.
    async fn summary_embeddings(
        self: Arc<Self>,
        mut meta: Meta,
        observation_id: String,
        source_id: String,
        engram_count: usize,
    ) -> Result<(), PipelineError> {
        if meta.summary_full.text.is_empty() {
            return Err(PipelineError::MissingSummary { observation_id });
        }

        let site = self.site(1 + 2 * engram_count, &source_id);
        let args = CallArgs::for_site(site.clone());
        let vectors = self
            .embedding_gen_embed
            .generate(&[meta.summary_full.text.clone()], &args)
            .await?;
        if self.training() {
            self.recorder
                .record_output(&site, serde_json::json!({"embeddings_list": vectors}));
        }

        let vector = vectors.into_iter().next().ok_or_else(|| {
            PluginError::Parse("embedding plugin returned no vector for summary".to_string())
        })?;
        meta.summary_full.embedding = Some(vector);
        self.metrics.increment(ConsolidateMetric::SummariesGenerated);

        match serde_json::to_value(&meta) {
            Ok(payload) => self.ctx().publish(Topic::MetaComplete, payload),
            Err(e) => {
                return Err(PipelineError::MalformedPayload {
                    record: "Meta",
                    message: e.to_string(),
                })
            }
        }
        Ok(())
    }

    /// The engram branch: register, fan out indices, join, fan out
    /// embeddings, join, emit, evict.
    async fn consolidate(self: Arc<Self>, observation: Observation) -> Result<(), PipelineError> {
        let source_id = observation.source_id.clone();
        let engram_count = observation.engram_list.len();

        {
            let mut builder = self.engram_builder.lock().expect("builder lock poisoned");
            for engram in &observation.engram_list {
                if builder.contains_key(&engram.id) {
                    return Err(PipelineError::EngramIdCollision {
                        id: engram.id.clone(),
                    });
                }
                builder.insert(engram.id.clone(), engram.clone());
            }
        }
        self.metrics
            .increment_by(ConsolidateMetric::EngramsGenerated, engram_count as u64);

        let engram_id_array: Vec<String> = observation
            .engram_list
            .iter()
            .map(|e| e.id.clone())
            .collect();
        self.ctx().publish(
            Topic::EngramCreated,
            serde_json::json!({
                "source_id": source_id,
                "engram_id_array": engram_id_array,
            }),
        );

        // Join barrier A: one index-generation task per engram.
        let index_futures: Vec<_> = observation
            .engram_list
            .iter()
            .enumerate()
            .map(|(i, engram)| {
                let pipeline = self.clone();
                let source_id = source_id.clone();
                let engram = engram.clone();
                async move { pipeline.gen_indices(i, source_id, engram).await }
            })
            .collect();
        let index_sets = self.ctx().run_tasks(index_futures).await?;

        // Join barrier B: one embedding task per index set.
        let embed_futures: Vec<_> = index_sets
            .into_iter()
            .enumerate()
            .map(|(i, index_set)| {
                let pipeline = self.clone();
                async move { pipeline.gen_embeddings(index_set, i, engram_count).await }
            })
            .collect();
        let completed = self.ctx().run_tasks(embed_futures).await?;

        // Positional join order equals input order, so the completion
        // payload preserves the observation's engram order.
        let engram_array: Vec<Engram> = {
            let builder = self.engram_builder.lock().expect("builder lock poisoned");
            completed
                .iter()
                .filter_map(|done| builder.get(&done.engram_id).cloned())
                .collect()
        };

        let payload = serde_json::json!({
            "source_id": source_id,
            "engram_array": engram_array,
        });
        self.ctx().publish(Topic::EngramComplete, payload.clone());
        if self.training() {
            self.recorder.record_output(&self.site(0, &source_id), payload);
        }

        let mut builder = self.engram_builder.lock().expect("builder lock poisoned");
        for done in &completed {
            tracing::debug!(engram_id = %done.engram_id, "Evicting completed engram");
            builder.remove(&done.engram_id);
        }
        Ok(())
    }

    async fn gen_indices(
        self: Arc<Self>,
        position: usize,
        source_id: String,
        engram: Engram,
    ) -> Result<IndexSet, PipelineError> {
        let context = engram
            .context
            .as_ref()
            .ok_or_else(|| PipelineError::MissingContext {
                engram_id: engram.id.clone(),
            })?;

        let prompt = prompts::render_gen_indices(&engram);
        let schema = prompts::index_array_schema();
        let site = self.site(1 + position, &source_id);
        let args = CallArgs::for_site(site.clone());

        let reply = self
            .llm_gen_indices
            .submit(&prompt, Some(&schema), &args)
            .await?;
        if self.training() {
            self.recorder
                .record_output(&site, serde_json::json!({"llm_response": reply.text}));
        }

        let parsed: IndexTextArray =
            serde_json::from_str(&reply.text).map_err(|e| PipelineError::MalformedPayload {
                record: "index_text_array",
                message: e.to_string(),
            })?;
        if parsed.index_text_array.is_empty() {
            return Err(PipelineError::EmptyIndexArray {
                engram_id: engram.id.clone(),
            });
        }
        self.metrics.increment_by(
            ConsolidateMetric::IndicesGenerated,
            parsed.index_text_array.len() as u64,
        );

        let mut context_string = String::from("Context: ");
        for (key, value) in context {
            if value != "null" {
                context_string.push_str(&format!("{key}: {value}\n"));
            }
        }

        let indices = parsed
            .index_text_array
            .into_iter()
            .map(|text| format!("{context_string} Content: {text}"))
            .collect();

        Ok(IndexSet {
            engram_id: engram.id,
            source_id,
            indices,
        })
    }

    async fn gen_embeddings(
        self: Arc<Self>,
        index_set: IndexSet,
        position: usize,
        engram_count: usize,
    ) -> Result<EmbeddedEngram, PipelineError> {
        tracing::debug!(
            engram_id = %index_set.engram_id,
            indices = index_set.indices.len(),
            "Generating embeddings"
        );

        let site = self.site(1 + engram_count + position, &index_set.source_id);
        let args = CallArgs::for_site(site.clone());
        let vectors = self
            .embedding_gen_embed
            .generate(&index_set.indices, &args)
            .await?;
        if self.training() {
            self.recorder
                .record_output(&site, serde_json::json!({"embeddings_list": vectors}));
        }
        self.metrics.increment_by(
            ConsolidateMetric::EmbeddingsGenerated,
            vectors.len() as u64,
        );

        let index_array: Vec<Index> = index_set
            .indices
            .iter()
            .zip(vectors)
            .map(|(text, vector)| Index::new(text.clone(), vector))
            .collect();
        let index_id_array: Vec<String> = index_array.iter().map(|i| i.id.clone()).collect();

        {
            let mut builder = self.engram_builder.lock().expect("builder lock poisoned");
            let engram =
                builder
                    .get_mut(&index_set.engram_id)
                    .ok_or_else(|| PipelineError::TaskFailed {
                        message: format!(
                            "engram {} vanished from the builder mid-flight",
                            index_set.engram_id
                        ),
                    })?;
            engram.indices = Some(index_array.clone());
        }

        self.ctx().publish(
            Topic::IndexCreated,
            serde_json::json!({
                "source_id": index_set.source_id,
                "index_id_array": index_id_array,
            }),
        );
        self.ctx().publish(
            Topic::IndexComplete,
            serde_json::json!({
                "source_id": index_set.source_id,
                "engram_id": index_set.engram_id,
                "index": index_array,
            }),
        );

        Ok(EmbeddedEngram {
            engram_id: index_set.engram_id,
        })
    }

    fn evict(&self, engram_ids: &[String]) {
        let mut builder = self.engram_builder.lock().expect("builder lock poisoned");
        for id in engram_ids {
            builder.remove(id);
        }
    }
}

/// Orchestrates the post-processing pipeline for completed observations.
pub struct ConsolidateService {
    pipeline: Arc<Pipeline>,
}

impl ConsolidateService {
    /// Resolve the pipeline's plugins from the registry.
    pub fn new(
        registry: &PluginRegistry,
        recorder: Arc<MockRecorder>,
    ) -> Result<Self, PluginError> {
        Ok(Self {
            pipeline: Arc::new(Pipeline {
                llm_gen_indices: registry.llm("gen_indices")?,
                embedding_gen_embed: registry.embedding("gen_embed")?,
                recorder,
                metrics: MetricsTracker::new(),
                engram_builder: Mutex::new(HashMap::new()),
                training_mode: AtomicBool::new(false),
                ctx: OnceLock::new(),
            }),
        })
    }

    /// Whether any engrams are currently in flight.
    pub fn has_inflight_engrams(&self) -> bool {
        !self
            .pipeline
            .engram_builder
            .lock()
            .expect("builder lock poisoned")
            .is_empty()
    }

    fn on_observation_complete(&self, payload: serde_json::Value) {
        let observation: Observation = match serde_json::from_value(payload.clone()) {
            Ok(observation) => observation,
            Err(e) => {
                tracing::error!(error = %e, "Dropping malformed observation");
                return;
            }
        };
        self.pipeline
            .metrics
            .increment(ConsolidateMetric::ObservationsReceived);

        if self.pipeline.training() {
            self.pipeline
                .recorder
                .record_input(&self.pipeline.site(0, &observation.source_id), payload);
        }

        // Summary branch, independent of the engram branch.
        let pipeline = self.pipeline.clone();
        let meta = observation.meta.clone();
        let observation_id = observation.id.clone();
        let source_id = observation.source_id.clone();
        let engram_count = observation.engram_list.len();
        self.pipeline.ctx().run_task(async move {
            if let Err(e) = pipeline
                .clone()
                .summary_embeddings(meta, observation_id, source_id.clone(), engram_count)
                .await
            {
                tracing::error!(source_id = %source_id, error = %e, "Summary embedding failed");
            }
        });

        // Engram branch. A failure abandons the observation and evicts its
        // in-flight entries.
        let pipeline = self.pipeline.clone();
        let engram_ids: Vec<String> = observation
            .engram_list
            .iter()
            .map(|e| e.id.clone())
            .collect();
        let source_id = observation.source_id.clone();
        self.pipeline.ctx().run_task(async move {
            if let Err(e) = pipeline.clone().consolidate(observation).await {
                tracing::error!(source_id = %source_id, error = %e, "Observation consolidation failed");
                pipeline.evict(&engram_ids);
            }
        });
    }
}

#[async_trait::async_trait]
impl Service for ConsolidateService {
    fn name(&self) -> &'static str {
        SERVICE_NAME
    }

    async fn start(&self, ctx: ServiceContext) -> Result<(), HostError> {
        ctx.subscribe(Topic::ObservationComplete);
        ctx.subscribe(Topic::SetTrainingMode);
        ctx.subscribe(Topic::Acknowledge);
        self.pipeline.ctx.set(ctx).ok();
        Ok(())
    }

    async fn handle(&self, envelope: Envelope) {
        match envelope.topic {
            Topic::ObservationComplete => self.on_observation_complete(envelope.payload),
            Topic::SetTrainingMode => {
                let enabled = envelope.payload["training_mode"].as_bool().unwrap_or(false);
                self.pipeline.training_mode.store(enabled, Ordering::SeqCst);
                tracing::debug!(enabled, "Training mode updated");
            }
            Topic::Acknowledge => {
                let ctx = self.pipeline.ctx();
                let packet = self.pipeline.metrics.get_and_reset_packet();
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
