//! Response generation: the main prompt grounded in retrieved memory.

use super::retrieve::RetrieveOutcome;
use crate::bus::{Envelope, Topic};
use crate::error::{HostError, PipelineError, PluginError};
use crate::metrics::{MetricName, MetricsTracker};
use crate::model::Response;
use crate::plugin::{CallArgs, DocumentStore, LanguageModel, PluginRegistry};
use crate::prompts;
use crate::recorder::CallSite;
use crate::runtime::{Service, ServiceContext};
use std::sync::{Arc, OnceLock};

const SERVICE_NAME: &str = "RespondService";

/// Response counters.
#[derive(Debug, Clone, Copy)]
pub enum RespondMetric {
    /// Retrieval results consumed.
    RetrievalsReceived,
    /// Responses published.
    ResponsesPublished,
    /// Engrams hydrated from the document store.
    EngramsHydrated,
}

impl MetricName for RespondMetric {
    fn as_str(&self) -> &'static str {
        match self {
            RespondMetric::RetrievalsReceived => "retrievals_received",
            RespondMetric::ResponsesPublished => "responses_published",
            RespondMetric::EngramsHydrated => "engrams_hydrated",
        }
    }
}

struct Inner {
    llm_respond: Arc<dyn LanguageModel>,
    documents: Arc<dyn DocumentStore>,
    metrics: MetricsTracker,
    ctx: OnceLock<ServiceContext>,
}

impl Inner {
    fn ctx(&self) -> &ServiceContext {
        self.ctx.get().expect("service started")
    }

    async fn process(self: Arc<Self>, outcome: RetrieveOutcome) -> Result<(), PipelineError> {
        let engrams = self
            .documents
            .fetch_engrams(&outcome.retrieve_result.engram_ids)
            .await?;
        self.metrics
            .increment_by(RespondMetric::EngramsHydrated, engrams.len() as u64);

        let prompt_text = prompts::render_main(
            &outcome.prompt,
            &outcome.analysis.conversation_direction.current_user_intent,
            &engrams,
        );
        let args = CallArgs::for_site(CallSite::new(SERVICE_NAME, 0, &outcome.prompt.id));
        let reply = self.llm_respond.submit(&prompt_text, None, &args).await?;

        let response = Response::new(
            reply.text,
            outcome.prompt,
            outcome.analysis,
            outcome.retrieve_result,
        );
        self.metrics.increment(RespondMetric::ResponsesPublished);

        match serde_json::to_value(&response) {
            Ok(payload) => self.ctx().publish(Topic::MainPromptComplete, payload),
            Err(e) => {
                return Err(PipelineError::MalformedPayload {
                    record: "Response",
                    message: e.to_string(),
                })
            }
        }
        Ok(())
    }
}

/// Consumes `RETRIEVE_COMPLETE`, calls the language model, and publishes
/// `MAIN_PROMPT_COMPLETE`.
pub struct RespondService {
    inner: Arc<Inner>,
}

impl RespondService {
    /// Resolve the service's plugins from the registry.
    pub fn new(registry: &PluginRegistry) -> Result<Self, PluginError> {
        Ok(Self {
            inner: Arc::new(Inner {
                llm_respond: registry.llm("respond")?,
                documents: registry.document("document")?,
                metrics: MetricsTracker::new(),
                ctx: OnceLock::new(),
            }),
        })
    }
}

#[async_trait::async_trait]
impl Service for RespondService {
    fn name(&self) -> &'static str {
        SERVICE_NAME
    }

    async fn start(&self, ctx: ServiceContext) -> Result<(), HostError> {
        ctx.subscribe(Topic::RetrieveComplete);
        ctx.subscribe(Topic::Acknowledge);
        self.inner.ctx.set(ctx).ok();
        Ok(())
    }

    async fn handle(&self, envelope: Envelope) {
        match envelope.topic {
            Topic::RetrieveComplete => {
                let outcome: RetrieveOutcome = match serde_json::from_value(envelope.payload) {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        tracing::error!(error = %e, "Dropping malformed retrieval result");
                        return;
                    }
                };
                self.inner
                    .metrics
                    .increment(RespondMetric::RetrievalsReceived);

                let inner = self.inner.clone();
                self.inner.ctx().run_task(async move {
                    let prompt_id = outcome.prompt.id.clone();
                    if let Err(e) = inner.clone().process(outcome).await {
                        tracing::error!(prompt_id = %prompt_id, error = %e, "Response generation failed");
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
