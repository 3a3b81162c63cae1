//! Per-service handle onto the fabric.

use super::{Envelope, Router, Topic};
use std::sync::Arc;
use tokio::sync::mpsc;

/// A service's view of the bus: publish to the fabric, subscribe topics into
/// the service's own inbox.
///
/// Cloning is cheap; all clones feed the same inbox.
#[derive(Debug, Clone)]
pub struct BusClient {
    service_name: &'static str,
    router: Arc<Router>,
    inbox: mpsc::UnboundedSender<Envelope>,
}

impl BusClient {
    /// Create a client that routes subscriptions into `inbox`.
    pub fn new(
        service_name: &'static str,
        router: Arc<Router>,
        inbox: mpsc::UnboundedSender<Envelope>,
    ) -> Self {
        Self {
            service_name,
            router,
            inbox,
        }
    }

    /// Non-blocking publish to every subscriber of `topic`.
    pub fn publish(&self, topic: Topic, payload: serde_json::Value) {
        let envelope = Envelope::new(topic, payload);
        let delivered = self.router.publish(&envelope);
        tracing::trace!(
            service = self.service_name,
            topic = %topic,
            delivered,
            "Published message"
        );
    }

    /// Route `topic` into this service's inbox.
    pub fn subscribe(&self, topic: Topic) {
        tracing::debug!(service = self.service_name, topic = %topic, "Subscribed");
        self.router.subscribe(topic, self.inbox.clone());
    }

    /// The owning service's name.
    pub fn service_name(&self) -> &'static str {
        self.service_name
    }
}
