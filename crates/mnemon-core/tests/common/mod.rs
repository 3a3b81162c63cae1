//! Shared scaffolding for integration tests: stub plugins, an envelope
//! collector service, and host helpers.
#![allow(dead_code)]

use mnemon_core::bus::{Envelope, Topic};
use mnemon_core::config::Config;
use mnemon_core::error::{HostError, PluginError};
use mnemon_core::plugin::{CallArgs, Embedding, LanguageModel, LlmReply, StreamPacket};
use mnemon_core::runtime::{Service, ServiceContext};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;

/// Language model stub that picks a canned reply by substring match against
/// the prompt, falling back to a default reply.
pub struct StubLlm {
    by_needle: Vec<(String, String)>,
    fallback: String,
}

impl StubLlm {
    pub fn new(fallback: impl Into<String>) -> Self {
        Self {
            by_needle: Vec::new(),
            fallback: fallback.into(),
        }
    }

    /// Reply with `reply` whenever the prompt contains `needle`.
    pub fn on(mut self, needle: impl Into<String>, reply: impl Into<String>) -> Self {
        self.by_needle.push((needle.into(), reply.into()));
        self
    }

    /// A stub that answers every index-generation prompt with the same
    /// index text array.
    pub fn indices(texts: &[&str]) -> Self {
        Self::new(
            serde_json::json!({"index_text_array": texts.iter().map(|t| (*t).to_string()).collect::<Vec<_>>()})
                .to_string(),
        )
    }
}

#[async_trait::async_trait]
impl LanguageModel for StubLlm {
    fn name(&self) -> &str {
        "stub"
    }

    async fn submit(
        &self,
        prompt: &str,
        _structured_schema: Option<&serde_json::Value>,
        _args: &CallArgs,
    ) -> Result<LlmReply, PluginError> {
        for (needle, reply) in &self.by_needle {
            if prompt.contains(needle.as_str()) {
                return Ok(LlmReply {
                    text: reply.clone(),
                });
            }
        }
        Ok(LlmReply {
            text: self.fallback.clone(),
        })
    }

    async fn submit_streaming(
        &self,
        prompt: &str,
        args: &CallArgs,
        sink: mpsc::Sender<StreamPacket>,
    ) -> Result<LlmReply, PluginError> {
        let reply = self.submit(prompt, None, args).await?;
        let _ = sink
            .send(StreamPacket {
                packet: reply.text.clone(),
                finish: true,
                finish_reason: "stop".to_string(),
            })
            .await;
        Ok(reply)
    }
}

/// Embedding stub returning one fixed vector per input, with an optional
/// poison string that fails the whole batch.
pub struct StubEmbedding {
    vector: Vec<f32>,
    fail_on: Option<String>,
}

impl StubEmbedding {
    pub fn fixed(vector: Vec<f32>) -> Self {
        Self {
            vector,
            fail_on: None,
        }
    }

    /// Fail any batch containing `needle`.
    pub fn failing_on(mut self, needle: impl Into<String>) -> Self {
        self.fail_on = Some(needle.into());
        self
    }
}

#[async_trait::async_trait]
impl Embedding for StubEmbedding {
    fn name(&self) -> &str {
        "stub"
    }

    fn dimensions(&self) -> usize {
        self.vector.len()
    }

    async fn generate(
        &self,
        strings: &[String],
        _args: &CallArgs,
    ) -> Result<Vec<Vec<f32>>, PluginError> {
        if let Some(needle) = &self.fail_on {
            if strings.iter().any(|s| s.contains(needle.as_str())) {
                return Err(PluginError::Api {
                    status: 500,
                    message: "stub embedding failure".to_string(),
                });
            }
        }
        Ok(vec![self.vector.clone(); strings.len()])
    }
}

/// Test service that records every envelope on its subscribed topics.
pub struct Collector {
    topics: Vec<Topic>,
    seen: Mutex<Vec<Envelope>>,
}

impl Collector {
    pub fn new(topics: Vec<Topic>) -> Self {
        Self {
            topics,
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn envelopes(&self) -> Vec<Envelope> {
        self.seen.lock().expect("collector lock").clone()
    }

    pub fn payloads(&self, topic: Topic) -> Vec<serde_json::Value> {
        self.envelopes()
            .into_iter()
            .filter(|e| e.topic == topic)
            .map(|e| e.payload)
            .collect()
    }

    pub fn count(&self, topic: Topic) -> usize {
        self.payloads(topic).len()
    }

    /// Poll until `topic` has been seen at least `n` times, or the deadline
    /// passes. Returns whether the condition was met.
    pub async fn wait_for(&self, topic: Topic, n: usize, deadline: Duration) -> bool {
        let start = tokio::time::Instant::now();
        while start.elapsed() < deadline {
            if self.count(topic) >= n {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }
}

#[async_trait::async_trait]
impl Service for Collector {
    fn name(&self) -> &'static str {
        "CollectorService"
    }

    async fn start(&self, ctx: ServiceContext) -> Result<(), HostError> {
        for topic in &self.topics {
            ctx.subscribe(*topic);
        }
        Ok(())
    }

    async fn handle(&self, envelope: Envelope) {
        self.seen.lock().expect("collector lock").push(envelope);
    }
}

/// Config pointing all storage at a temp directory, broker disabled.
pub fn test_config(dir: &tempfile::TempDir) -> Config {
    let mut config = Config::default();
    config.storage.root_path = dir.path().to_string_lossy().to_string();
    config.broker.enabled = false;
    config
}

/// Group STATUS payloads by service name.
pub fn statuses_by_name(payloads: &[serde_json::Value]) -> HashMap<String, Vec<serde_json::Value>> {
    let mut by_name: HashMap<String, Vec<serde_json::Value>> = HashMap::new();
    for payload in payloads {
        let name = payload["name"].as_str().unwrap_or("unknown").to_string();
        by_name.entry(name).or_default().push(payload.clone());
    }
    by_name
}
