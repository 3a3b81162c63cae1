//! Codification: turn a completed exchange into an observation.
//!
//! Only exchanges in training mode are codified, either because the prompt
//! carried the flag or because `SET_TRAINING_MODE` toggled it on for the
//! whole service.

use crate::bus::{Envelope, Topic};
use crate::error::{HostError, PipelineError, PluginError};
use crate::metrics::{MetricName, MetricsTracker};
use crate::model::{Engram, Meta, Observation, Response, Summary};
use crate::plugin::{CallArgs, LanguageModel, PluginRegistry};
use crate::prompts;
use crate::recorder::{CallSite, MockRecorder};
use crate::runtime::{Service, ServiceContext};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

const SERVICE_NAME: &str = "CodifyService";

/// Codify counters.
#[derive(Debug, Clone, Copy)]
pub enum CodifyMetric {
    /// Responses consumed.
    ResponsesReceived,
    /// Responses skipped because training mode was off.
    ResponsesSkipped,
    /// Observations published.
    ObservationsPublished,
}

impl MetricName for CodifyMetric {
    fn as_str(&self) -> &'static str {
        match self {
            CodifyMetric::ResponsesReceived => "responses_received",
            CodifyMetric::ResponsesSkipped => "responses_skipped",
            CodifyMetric::ObservationsPublished => "observations_published",
        }
    }
}

#[derive(Deserialize)]
struct CodifyReply {
    #[serde(default)]
    summary_initial: Option<String>,
    summary_full: String,
    #[serde(default)]
    keywords: Vec<String>,
    engrams: Vec<CodifiedEngram>,
}

#[derive(Deserialize)]
struct CodifiedEngram {
    content: String,
    #[serde(default)]
    context: Option<BTreeMap<String, String>>,
    #[serde(default)]
    is_native_source: bool,
    #[serde(default)]
    accuracy: i64,
    #[serde(default)]
    relevancy: i64,
}

struct Inner {
    llm_codify: Arc<dyn LanguageModel>,
    recorder: Arc<MockRecorder>,
    training_mode: AtomicBool,
    metrics: MetricsTracker,
    ctx: OnceLock<ServiceContext>,
}

impl Inner {
    fn ctx(&self) -> &ServiceContext {
        self.ctx.get().expect("service started")
    }

    async fn process(self: Arc<Self>, response: Response) -> Result<(), PipelineError> {
        let site = CallSite::new(SERVICE_NAME, 0, &response.id);
        let args = CallArgs::for_site(site.clone());
        let reply = self
            .llm_codify
            .submit(
                &prompts::render_codify(&response),
                Some(&prompts::codify_schema()),
                &args,
            )
            .await?;
        self.recorder
            .record_output(&site, serde_json::json!({"llm_response": reply.text}));

        let parsed: CodifyReply =
            serde_json::from_str(&reply.text).map_err(|e| PipelineError::MalformedPayload {
                record: "CodifyReply",
                message: e.to_string(),
            })?;

        let observation = build_observation(&response, parsed);
        self.metrics.increment(CodifyMetric::ObservationsPublished);

        let payload =
            serde_json::to_value(&observation).map_err(|e| PipelineError::MalformedPayload {
                record: "Observation",
                message: e.to_string(),
            })?;
        self.recorder.record_output(
            &CallSite::new(SERVICE_NAME, 1, &response.id),
            payload.clone(),
        );
        self.ctx().publish(Topic::ObservationComplete, payload);
        Ok(())
    }
}

/// Build the observation record from a codify reply. Engrams whose context
/// the model omitted get a minimal topic context so downstream consolidation
/// never sees a null context.
fn build_observation(response: &Response, reply: CodifyReply) -> Observation {
    let location = format!("response/{}", response.id);
    let fallback_topic = reply
        .keywords
        .first()
        .cloned()
        .unwrap_or_else(|| "general".to_string());

    let engram_list: Vec<Engram> = reply
        .engrams
        .into_iter()
        .map(|codified| {
            let context = codified.context.filter(|c| !c.is_empty()).unwrap_or_else(|| {
                let mut map = BTreeMap::new();
                map.insert("topic".to_string(), fallback_topic.clone());
                map
            });
            Engram::new(
                response.id.clone(),
                location.clone(),
                codified.content,
                codified.is_native_source,
            )
            .with_context(context)
            .with_scores(codified.accuracy, codified.relevancy)
        })
        .collect();

    let meta = Meta::new(
        vec![location],
        vec![response.id.clone()],
        reply.keywords,
        reply.summary_initial,
        Summary::new(reply.summary_full),
    );

    Observation::new(response.id.clone(), meta, engram_list)
}

/// Consumes `MAIN_PROMPT_COMPLETE` and publishes `OBSERVATION_COMPLETE` for
/// training-mode exchanges.
pub struct CodifyService {
    inner: Arc<Inner>,
}

impl CodifyService {
    /// Resolve the service's plugins from the registry.
    pub fn new(
        registry: &PluginRegistry,
        recorder: Arc<MockRecorder>,
    ) -> Result<Self, PluginError> {
        Ok(Self {
            inner: Arc::new(Inner {
                llm_codify: registry.llm("codify")?,
                recorder,
                training_mode: AtomicBool::new(false),
                metrics: MetricsTracker::new(),
                ctx: OnceLock::new(),
            }),
        })
    }
}

#[async_trait::async_trait]
impl Service for CodifyService {
    fn name(&self) -> &'static str {
        SERVICE_NAME
    }

    async fn start(&self, ctx: ServiceContext) -> Result<(), HostError> {
        ctx.subscribe(Topic::MainPromptComplete);
        ctx.subscribe(Topic::SetTrainingMode);
        ctx.subscribe(Topic::Acknowledge);
        self.inner.ctx.set(ctx).ok();
        Ok(())
    }

    async fn handle(&self, envelope: Envelope) {
        match envelope.topic {
            Topic::MainPromptComplete => {
                let response: Response = match serde_json::from_value(envelope.payload.clone()) {
                    Ok(response) => response,
                    Err(e) => {
                        tracing::error!(error = %e, "Dropping malformed response");
                        return;
                    }
                };
                self.inner.metrics.increment(CodifyMetric::ResponsesReceived);

                let training = response.prompt.training_mode
                    || self.inner.training_mode.load(Ordering::SeqCst);
                if !training {
                    self.inner.metrics.increment(CodifyMetric::ResponsesSkipped);
                    tracing::debug!(response_id = %response.id, "Not in training mode, skipping codify");
                    return;
                }

                self.inner.recorder.record_input(
                    &CallSite::new(SERVICE_NAME, 0, &response.id),
                    envelope.payload,
                );

                let inner = self.inner.clone();
                self.inner.ctx().run_task(async move {
                    let response_id = response.id.clone();
                    if let Err(e) = inner.clone().process(response).await {
                        tracing::error!(response_id = %response_id, error = %e, "Codify failed");
                    }
                });
            }
            Topic::SetTrainingMode => {
                let enabled = envelope.payload["training_mode"].as_bool().unwrap_or(false);
                self.inner.training_mode.store(enabled, Ordering::SeqCst);
                tracing::debug!(enabled, "Training mode updated");
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
