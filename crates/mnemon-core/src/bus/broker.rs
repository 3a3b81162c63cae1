//! Cross-process fan-in/fan-out of topic+payload frames.
//!
//! The broker binds a pull endpoint (inbound from external publishers) and a
//! pub endpoint (outbound to external subscribers). A message is two
//! length-delimited frames: frame 0 the topic UTF-8 bytes, frame 1 the
//! payload UTF-8 JSON. Inbound frames are re-injected into the in-process
//! router; every envelope on the fabric is mirrored out to all connected
//! subscribers. Bind failure on either endpoint is fatal at startup.

use super::{Envelope, Topic};
use crate::config::{parse_endpoint, BrokerConfig};
use crate::error::{BusError, HostError};
use crate::metrics::{MetricName, MetricsTracker};
use crate::runtime::{Service, ServiceContext};
use futures::{SinkExt, StreamExt};
use std::sync::{Arc, OnceLock};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};

/// Broker traffic counters.
#[derive(Debug, Clone, Copy)]
pub enum BrokerMetric {
    /// Frames received on the pull endpoint.
    MessagesReceived,
    /// Envelopes mirrored out the pub endpoint.
    MessagesSent,
}

impl MetricName for BrokerMetric {
    fn as_str(&self) -> &'static str {
        match self {
            BrokerMetric::MessagesReceived => "messages_received",
            BrokerMetric::MessagesSent => "messages_sent",
        }
    }
}

type Subscribers = Arc<Mutex<Vec<FramedWrite<OwnedWriteHalf, LengthDelimitedCodec>>>>;

/// The broker service.
pub struct BrokerService {
    pull_addr: String,
    pub_addr: String,
    metrics: Arc<MetricsTracker>,
    subscribers: Subscribers,
    ctx: OnceLock<ServiceContext>,
}

impl BrokerService {
    /// Create a broker from config; endpoint strings are validated here,
    /// binding happens at start.
    pub fn new(config: &BrokerConfig) -> Result<Self, BusError> {
        let pull_addr =
            parse_endpoint(&config.pull_endpoint).ok_or_else(|| BusError::InvalidEndpoint {
                endpoint: config.pull_endpoint.clone(),
                message: "expected tcp://host:port".to_string(),
            })?;
        let pub_addr =
            parse_endpoint(&config.pub_endpoint).ok_or_else(|| BusError::InvalidEndpoint {
                endpoint: config.pub_endpoint.clone(),
                message: "expected tcp://host:port".to_string(),
            })?;
        Ok(Self {
            pull_addr,
            pub_addr,
            metrics: Arc::new(MetricsTracker::new()),
            subscribers: Arc::new(Mutex::new(Vec::new())),
            ctx: OnceLock::new(),
        })
    }

    fn ctx(&self) -> &ServiceContext {
        self.ctx.get().expect("broker started")
    }

    /// Read frame pairs from one publisher connection and re-inject them
    /// into the fabric.
    async fn drain_publisher(stream: TcpStream, ctx: ServiceContext, metrics: Arc<MetricsTracker>) {
        let peer = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        let (read_half, _write_half): (OwnedReadHalf, OwnedWriteHalf) = stream.into_split();
        let mut framed = FramedRead::new(read_half, LengthDelimitedCodec::new());

        loop {
            let topic = match framed.next().await {
                Some(Ok(frame)) => frame,
                Some(Err(e)) => {
                    tracing::warn!(peer = %peer, error = %e, "Publisher read error");
                    return;
                }
                None => return,
            };
            let payload = match framed.next().await {
                Some(Ok(frame)) => frame,
                Some(Err(e)) => {
                    tracing::warn!(peer = %peer, error = %e, "Publisher read error");
                    return;
                }
                None => {
                    tracing::warn!(peer = %peer, "Publisher closed mid-message");
                    return;
                }
            };

            match Envelope::from_frames(&topic, &payload) {
                Ok(envelope) => {
                    metrics.increment(BrokerMetric::MessagesReceived);
                    ctx.publish(envelope.topic, envelope.payload);
                }
                Err(e) => {
                    tracing::warn!(peer = %peer, error = %e, "Dropping malformed frame");
                }
            }
        }
    }

    /// Mirror one envelope to every connected subscriber, pruning the dead.
    async fn fan_out(&self, envelope: &Envelope) {
        let (topic, payload) = envelope.to_frames();
        let mut subscribers = self.subscribers.lock().await;
        let mut live = Vec::with_capacity(subscribers.len());
        for mut framed in subscribers.drain(..) {
            let sent = framed.send(topic.clone().into()).await.is_ok()
                && framed.send(payload.clone().into()).await.is_ok();
            if sent {
                live.push(framed);
            } else {
                tracing::debug!("Pruning closed subscriber connection");
            }
        }
        *subscribers = live;
        self.metrics.increment(BrokerMetric::MessagesSent);
    }
}

#[async_trait::async_trait]
impl Service for BrokerService {
    fn name(&self) -> &'static str {
        "BrokerService"
    }

    async fn start(&self, ctx: ServiceContext) -> Result<(), HostError> {
        let pull_listener =
            TcpListener::bind(&self.pull_addr)
                .await
                .map_err(|source| BusError::Bind {
                    endpoint: self.pull_addr.clone(),
                    source,
                })?;
        let pub_listener =
            TcpListener::bind(&self.pub_addr)
                .await
                .map_err(|source| BusError::Bind {
                    endpoint: self.pub_addr.clone(),
                    source,
                })?;
        tracing::info!(pull = %self.pull_addr, publish = %self.pub_addr, "Broker bound");

        // Mirror the whole fabric onto the pub endpoint.
        for topic in Topic::ALL {
            ctx.subscribe(topic);
        }

        let accept_ctx = ctx.clone();
        let accept_metrics = self.metrics.clone();
        let cancel = ctx.cancel_token();
        ctx.run_background(async move {
            loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    accepted = pull_listener.accept() => match accepted {
                        Ok((stream, _)) => {
                            let conn_ctx = accept_ctx.clone();
                            let conn_metrics = accept_metrics.clone();
                            tokio::spawn(Self::drain_publisher(stream, conn_ctx, conn_metrics));
                        }
                        Err(e) => tracing::warn!(error = %e, "Pull accept failed"),
                    }
                }
            }
        });

        let subscribers = self.subscribers.clone();
        let cancel = ctx.cancel_token();
        ctx.run_background(async move {
            loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    accepted = pub_listener.accept() => match accepted {
                        Ok((stream, peer)) => {
                            tracing::debug!(peer = %peer, "Subscriber connected");
                            let (_read, write) = stream.into_split();
                            subscribers
                                .lock()
                                .await
                                .push(FramedWrite::new(write, LengthDelimitedCodec::new()));
                        }
                        Err(e) => tracing::warn!(error = %e, "Pub accept failed"),
                    }
                }
            }
        });

        self.ctx.set(ctx).ok();
        Ok(())
    }

    async fn handle(&self, envelope: Envelope) {
        if envelope.topic == Topic::Acknowledge {
            let packet = self.metrics.get_and_reset_packet();
            self.ctx().publish(
                Topic::Status,
                serde_json::json!({
                    "id": self.ctx().service_id(),
                    "name": self.name(),
                    "timestamp": chrono::Utc::now().timestamp_millis(),
                    "metrics": packet,
                }),
            );
        }
        self.fan_out(&envelope).await;
    }
}
