//! In-process topic fan-out.

use super::{Envelope, Topic};
use std::collections::HashMap;
use std::sync::RwLock;
use tokio::sync::mpsc;

/// The in-process fast path: topic to subscriber inboxes.
///
/// Publishing is non-blocking and at-most-once. A subscriber whose inbox has
/// closed is pruned on the next publish to that topic.
#[derive(Debug, Default)]
pub struct Router {
    subscribers: RwLock<HashMap<Topic, Vec<mpsc::UnboundedSender<Envelope>>>>,
}

impl Router {
    /// Create an empty router.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an inbox for a topic.
    pub fn subscribe(&self, topic: Topic, inbox: mpsc::UnboundedSender<Envelope>) {
        let mut subscribers = self.subscribers.write().expect("router lock poisoned");
        subscribers.entry(topic).or_default().push(inbox);
    }

    /// Deliver an envelope to every live subscriber of its topic.
    ///
    /// Returns the number of inboxes the envelope reached.
    pub fn publish(&self, envelope: &Envelope) -> usize {
        let mut subscribers = self.subscribers.write().expect("router lock poisoned");
        let Some(inboxes) = subscribers.get_mut(&envelope.topic) else {
            return 0;
        };

        let mut delivered = 0;
        inboxes.retain(|inbox| match inbox.send(envelope.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(_) => {
                tracing::warn!(topic = %envelope.topic, "Dropping closed subscriber");
                false
            }
        });
        delivered
    }

    /// The number of live subscribers for a topic.
    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.subscribers
            .read()
            .expect("router lock poisoned")
            .get(&topic)
            .map_or(0, Vec::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_reaches_every_subscriber() {
        let router = Router::new();
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        router.subscribe(Topic::Status, tx_a);
        router.subscribe(Topic::Status, tx_b);

        let envelope = Envelope::new(Topic::Status, serde_json::json!({"ok": true}));
        assert_eq!(router.publish(&envelope), 2);

        assert_eq!(rx_a.try_recv().expect("recv a"), envelope);
        assert_eq!(rx_b.try_recv().expect("recv b"), envelope);
    }

    #[test]
    fn publish_without_subscribers_is_silent() {
        let router = Router::new();
        let envelope = Envelope::new(Topic::Status, serde_json::Value::Null);
        assert_eq!(router.publish(&envelope), 0);
    }

    #[test]
    fn closed_subscribers_are_pruned() {
        let router = Router::new();
        let (tx, rx) = mpsc::unbounded_channel();
        router.subscribe(Topic::Status, tx);
        drop(rx);

        let envelope = Envelope::new(Topic::Status, serde_json::Value::Null);
        assert_eq!(router.publish(&envelope), 0);
        assert_eq!(router.subscriber_count(Topic::Status), 0);
    }

    #[test]
    fn topics_are_isolated() {
        let router = Router::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        router.subscribe(Topic::MetaComplete, tx);

        router.publish(&Envelope::new(Topic::EngramComplete, serde_json::Value::Null));
        assert!(rx.try_recv().is_err());
    }
}
