//! The per-service scheduler handle.

use crate::bus::{BusClient, Topic};
use crate::error::PipelineError;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Handle a service uses to publish, subscribe, and schedule work.
///
/// Cloning is cheap; all clones share the same task registry and
/// cancellation tokens.
#[derive(Clone)]
pub struct ServiceContext {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    service_name: &'static str,
    service_id: String,
    bus: BusClient,
    /// Child token for this service's background work.
    cancel: CancellationToken,
    /// Root token; cancelling it shuts the whole host down.
    root_cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    join_grace: Duration,
}

impl ServiceContext {
    pub(crate) fn new(
        service_name: &'static str,
        bus: BusClient,
        root_cancel: CancellationToken,
        join_grace: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                service_name,
                service_id: uuid::Uuid::new_v4().to_string(),
                bus,
                cancel: root_cancel.child_token(),
                root_cancel,
                tasks: Mutex::new(Vec::new()),
                join_grace,
            }),
        }
    }

    /// The owning service's name.
    pub fn service_name(&self) -> &'static str {
        self.inner.service_name
    }

    /// The opaque id generated for this service instance.
    pub fn service_id(&self) -> &str {
        &self.inner.service_id
    }

    /// Non-blocking publish onto the fabric.
    pub fn publish(&self, topic: Topic, payload: serde_json::Value) {
        self.inner.bus.publish(topic, payload);
    }

    /// Route `topic` into this service's inbox.
    pub fn subscribe(&self, topic: Topic) {
        self.inner.bus.subscribe(topic);
    }

    /// Submit one tracked task. The task should log its own failures; at
    /// shutdown it gets the join grace window before being abandoned.
    pub fn run_task<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(future);
        self.inner
            .tasks
            .lock()
            .expect("task registry lock poisoned")
            .push(handle);
    }

    /// Submit a fire-and-forget loop tied to the service lifetime. The
    /// future is responsible for observing [`ServiceContext::cancel_token`].
    pub fn run_background<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.run_task(future);
    }

    /// The core fan-in primitive: run every future concurrently and await
    /// them all. Output order equals input order, never completion order.
    ///
    /// The first failure aborts the join and surfaces as the stage error;
    /// sibling tasks are left to finish on their own.
    pub async fn run_tasks<T, F>(&self, futures: Vec<F>) -> Result<Vec<T>, PipelineError>
    where
        T: Send + 'static,
        F: Future<Output = Result<T, PipelineError>> + Send + 'static,
    {
        let handles: Vec<JoinHandle<Result<T, PipelineError>>> =
            futures.into_iter().map(tokio::spawn).collect();

        let mut results = Vec::with_capacity(handles.len());
        let mut first_error = None;
        for joined in futures::future::join_all(handles).await {
            match joined {
                Ok(Ok(value)) => results.push(value),
                Ok(Err(e)) => {
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
                Err(join_error) => {
                    if first_error.is_none() {
                        first_error = Some(PipelineError::TaskFailed {
                            message: join_error.to_string(),
                        });
                    }
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(results),
        }
    }

    /// This service's cancellation token, observed by background loops.
    pub fn cancel_token(&self) -> CancellationToken {
        self.inner.cancel.clone()
    }

    /// Request shutdown of the whole host.
    pub fn trigger_shutdown(&self) {
        self.inner.root_cancel.cancel();
    }

    /// Cancel background work and give in-flight tasks the grace window,
    /// then abandon whatever is still running.
    pub(crate) async fn drain(&self) {
        self.inner.cancel.cancel();
        let handles: Vec<JoinHandle<()>> = self
            .inner
            .tasks
            .lock()
            .expect("task registry lock poisoned")
            .drain(..)
            .collect();

        let grace = self.inner.join_grace;
        let all = futures::future::join_all(handles.into_iter().map(|handle| async move {
            match tokio::time::timeout(grace, handle).await {
                Ok(_) => {}
                Err(_) => {
                    tracing::warn!("Task exceeded join grace window, abandoning");
                }
            }
        }));
        all.await;
        tracing::debug!(service = self.inner.service_name, "Service drained");
    }
}
