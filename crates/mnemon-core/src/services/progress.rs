//! Progress tracking: per-source completion of the memory-formation round.
//!
//! Watches `ENGRAM_CREATED`, `ENGRAM_COMPLETE`, and `META_COMPLETE` and
//! marks a source finished once every registered engram has completed and
//! the meta has its summary embedding. Callers can await a source through
//! [`ProgressService::wait_for_source`].

use crate::bus::{Envelope, Topic};
use crate::error::HostError;
use crate::metrics::{MetricName, MetricsTracker};
use crate::model::Meta;
use crate::runtime::{Service, ServiceContext};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, OnceLock};
use tokio::sync::Notify;

const SERVICE_NAME: &str = "ProgressService";

/// Progress counters.
#[derive(Debug, Clone, Copy)]
pub enum ProgressMetric {
    /// Engrams registered for tracking.
    EngramsTracked,
    /// Engrams observed complete.
    EngramsCompleted,
    /// Metas observed complete.
    MetasCompleted,
    /// Sources fully finished.
    SourcesFinished,
}

impl MetricName for ProgressMetric {
    fn as_str(&self) -> &'static str {
        match self {
            ProgressMetric::EngramsTracked => "engrams_tracked",
            ProgressMetric::EngramsCompleted => "engrams_completed",
            ProgressMetric::MetasCompleted => "metas_completed",
            ProgressMetric::SourcesFinished => "sources_finished",
        }
    }
}

#[derive(Debug, Default)]
struct SourceProgress {
    expected: HashSet<String>,
    completed: HashSet<String>,
    meta_done: bool,
}

impl SourceProgress {
    fn is_finished(&self) -> bool {
        !self.expected.is_empty()
            && self.meta_done
            && self.expected.iter().all(|id| self.completed.contains(id))
    }
}

#[derive(Debug, Default)]
struct State {
    in_flight: HashMap<String, SourceProgress>,
    finished: HashSet<String>,
}

#[derive(Deserialize)]
struct EngramCreatedPayload {
    source_id: String,
    engram_id_array: Vec<String>,
}

#[derive(Deserialize)]
struct EngramCompletePayload {
    source_id: String,
    engram_array: Vec<CompletedEngram>,
}

#[derive(Deserialize)]
struct CompletedEngram {
    id: String,
}

struct Inner {
    state: Mutex<State>,
    notify: Notify,
    metrics: MetricsTracker,
    ctx: OnceLock<ServiceContext>,
}

impl Inner {
    fn ctx(&self) -> &ServiceContext {
        self.ctx.get().expect("service started")
    }

    fn check_finished(&self, state: &mut State, source_id: &str) {
        let finished = state
            .in_flight
            .get(source_id)
            .is_some_and(SourceProgress::is_finished);
        if finished {
            state.in_flight.remove(source_id);
            state.finished.insert(source_id.to_string());
            self.metrics.increment(ProgressMetric::SourcesFinished);
            tracing::info!(source_id = %source_id, "Memory formation complete");
            self.notify.notify_waiters();
        }
    }
}

/// Tracks per-source engram and meta completion.
pub struct ProgressService {
    inner: Arc<Inner>,
}

impl Default for ProgressService {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressService {
    /// Create a tracker with no sources in flight.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::default()),
                notify: Notify::new(),
                metrics: MetricsTracker::new(),
                ctx: OnceLock::new(),
            }),
        }
    }

    /// Whether a source's memory round has fully completed.
    pub fn is_finished(&self, source_id: &str) -> bool {
        self.inner
            .state
            .lock()
            .expect("progress lock poisoned")
            .finished
            .contains(source_id)
    }

    /// Wait until a source's memory round completes.
    pub async fn wait_for_source(&self, source_id: &str) {
        loop {
            let notified = self.inner.notify.notified();
            if self.is_finished(source_id) {
                return;
            }
            notified.await;
        }
    }

    /// Wait until any source finishes and return its id.
    pub async fn wait_for_any_source(&self) -> String {
        loop {
            let notified = self.inner.notify.notified();
            if let Some(id) = self
                .inner
                .state
                .lock()
                .expect("progress lock poisoned")
                .finished
                .iter()
                .next()
                .cloned()
            {
                return id;
            }
            notified.await;
        }
    }
}

#[async_trait::async_trait]
impl Service for ProgressService {
    fn name(&self) -> &'static str {
        SERVICE_NAME
    }

    async fn start(&self, ctx: ServiceContext) -> Result<(), HostError> {
        ctx.subscribe(Topic::EngramCreated);
        ctx.subscribe(Topic::EngramComplete);
        ctx.subscribe(Topic::MetaComplete);
        ctx.subscribe(Topic::Acknowledge);
        self.inner.ctx.set(ctx).ok();
        Ok(())
    }

    async fn handle(&self, envelope: Envelope) {
        match envelope.topic {
            Topic::EngramCreated => {
                let Ok(payload) =
                    serde_json::from_value::<EngramCreatedPayload>(envelope.payload)
                else {
                    tracing::error!("Dropping malformed ENGRAM_CREATED payload");
                    return;
                };
                self.inner.metrics.increment_by(
                    ProgressMetric::EngramsTracked,
                    payload.engram_id_array.len() as u64,
                );
                let mut state = self.inner.state.lock().expect("progress lock poisoned");
                state
                    .in_flight
                    .entry(payload.source_id)
                    .or_default()
                    .expected
                    .extend(payload.engram_id_array);
            }
            Topic::EngramComplete => {
                let Ok(payload) =
                    serde_json::from_value::<EngramCompletePayload>(envelope.payload)
                else {
                    tracing::error!("Dropping malformed ENGRAM_COMPLETE payload");
                    return;
                };
                self.inner.metrics.increment_by(
                    ProgressMetric::EngramsCompleted,
                    payload.engram_array.len() as u64,
                );
                let mut state = self.inner.state.lock().expect("progress lock poisoned");
                state
                    .in_flight
                    .entry(payload.source_id.clone())
                    .or_default()
                    .completed
                    .extend(payload.engram_array.into_iter().map(|e| e.id));
                self.inner.check_finished(&mut state, &payload.source_id);
            }
            Topic::MetaComplete => {
                let Ok(meta) = serde_json::from_value::<Meta>(envelope.payload) else {
                    tracing::error!("Dropping malformed META_COMPLETE payload");
                    return;
                };
                self.inner.metrics.increment(ProgressMetric::MetasCompleted);
                let mut state = self.inner.state.lock().expect("progress lock poisoned");
                for source_id in &meta.source_ids {
                    state.in_flight.entry(source_id.clone()).or_default().meta_done = true;
                    self.inner.check_finished(&mut state, source_id);
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
