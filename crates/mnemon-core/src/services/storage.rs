//! Persistence: responses, metas, engrams, and their vector rows.

use crate::bus::{Envelope, Topic};
use crate::error::{HostError, PipelineError, PluginError};
use crate::metrics::{MetricName, MetricsTracker};
use crate::model::{Engram, Index, Meta, Response};
use crate::plugin::{DocumentStore, PluginRegistry, VectorStore};
use crate::runtime::{Service, ServiceContext};
use serde::Deserialize;
use std::sync::{Arc, OnceLock};

const SERVICE_NAME: &str = "StorageService";

/// The vector collection engram indices are inserted into.
const MAIN_COLLECTION: &str = "main";
/// The vector collection summary embeddings are inserted into.
const META_COLLECTION: &str = "meta";

/// Storage counters.
#[derive(Debug, Clone, Copy)]
pub enum StorageMetric {
    /// Responses persisted.
    ResponsesSaved,
    /// Metas persisted.
    MetasSaved,
    /// Engrams persisted.
    EngramsSaved,
    /// Index rows inserted into the vector store.
    IndicesInserted,
}

impl MetricName for StorageMetric {
    fn as_str(&self) -> &'static str {
        match self {
            StorageMetric::ResponsesSaved => "responses_saved",
            StorageMetric::MetasSaved => "metas_saved",
            StorageMetric::EngramsSaved => "engrams_saved",
            StorageMetric::IndicesInserted => "indices_inserted",
        }
    }
}

#[derive(Deserialize)]
struct EngramCompletePayload {
    engram_array: Vec<Engram>,
}

struct Inner {
    documents: Arc<dyn DocumentStore>,
    vector: Arc<dyn VectorStore>,
    metrics: MetricsTracker,
    ctx: OnceLock<ServiceContext>,
}

impl Inner {
    fn ctx(&self) -> &ServiceContext {
        self.ctx.get().expect("service started")
    }

    async fn persist_response(self: Arc<Self>, response: Response) -> Result<(), PipelineError> {
        self.documents.save_response(&response).await?;
        self.metrics.increment(StorageMetric::ResponsesSaved);
        Ok(())
    }

    async fn persist_meta(self: Arc<Self>, meta: Meta) -> Result<(), PipelineError> {
        self.documents.save_meta(&meta).await?;
        self.metrics.increment(StorageMetric::MetasSaved);

        if let Some(embedding) = &meta.summary_full.embedding {
            let row = Index::new(meta.summary_full.text.clone(), embedding.clone());
            self.vector
                .insert(META_COLLECTION, &[row], &meta.id)
                .await?;
            self.metrics.increment(StorageMetric::IndicesInserted);
        }
        Ok(())
    }

    async fn persist_engrams(
        self: Arc<Self>,
        engrams: Vec<Engram>,
    ) -> Result<(), PipelineError> {
        self.documents.save_engrams(&engrams).await?;
        self.metrics
            .increment_by(StorageMetric::EngramsSaved, engrams.len() as u64);

        for engram in &engrams {
            if let Some(indices) = &engram.indices {
                self.vector
                    .insert(MAIN_COLLECTION, indices, &engram.id)
                    .await?;
                self.metrics
                    .increment_by(StorageMetric::IndicesInserted, indices.len() as u64);
            }
        }
        Ok(())
    }
}

/// Persists pipeline output: `MAIN_PROMPT_COMPLETE` responses,
/// `META_COMPLETE` metas, and `ENGRAM_COMPLETE` engram batches.
pub struct StorageService {
    inner: Arc<Inner>,
}

impl StorageService {
    /// Resolve the service's plugins from the registry.
    pub fn new(registry: &PluginRegistry) -> Result<Self, PluginError> {
        Ok(Self {
            inner: Arc::new(Inner {
                documents: registry.document("document")?,
                vector: registry.vector("db")?,
                metrics: MetricsTracker::new(),
                ctx: OnceLock::new(),
            }),
        })
    }
}

#[async_trait::async_trait]
impl Service for StorageService {
    fn name(&self) -> &'static str {
        SERVICE_NAME
    }

    async fn start(&self, ctx: ServiceContext) -> Result<(), HostError> {
        ctx.subscribe(Topic::MainPromptComplete);
        ctx.subscribe(Topic::MetaComplete);
        ctx.subscribe(Topic::EngramComplete);
        ctx.subscribe(Topic::Acknowledge);
        self.inner.ctx.set(ctx).ok();
        Ok(())
    }

    async fn handle(&self, envelope: Envelope) {
        match envelope.topic {
            Topic::MainPromptComplete => match serde_json::from_value::<Response>(envelope.payload)
            {
                Ok(response) => {
                    let inner = self.inner.clone();
                    self.inner.ctx().run_task(async move {
                        if let Err(e) = inner.clone().persist_response(response).await {
                            tracing::error!(error = %e, "Failed to persist response");
                        }
                    });
                }
                Err(e) => tracing::error!(error = %e, "Dropping malformed response"),
            },
            Topic::MetaComplete => match serde_json::from_value::<Meta>(envelope.payload) {
                Ok(meta) => {
                    let inner = self.inner.clone();
                    self.inner.ctx().run_task(async move {
                        if let Err(e) = inner.clone().persist_meta(meta).await {
                            tracing::error!(error = %e, "Failed to persist meta");
                        }
                    });
                }
                Err(e) => tracing::error!(error = %e, "Dropping malformed meta"),
            },
            Topic::EngramComplete => {
                match serde_json::from_value::<EngramCompletePayload>(envelope.payload) {
                    Ok(payload) => {
                        let inner = self.inner.clone();
                        self.inner.ctx().run_task(async move {
                            if let Err(e) = inner.clone().persist_engrams(payload.engram_array).await
                            {
                                tracing::error!(error = %e, "Failed to persist engrams");
                            }
                        });
                    }
                    Err(e) => tracing::error!(error = %e, "Dropping malformed engram batch"),
                }
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
