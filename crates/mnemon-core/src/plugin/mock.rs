//! Replay implementations of every plugin interface.
//!
//! In the mock profile, plugin calls never reach a real backend: each call
//! looks up the output recorded for its call site and returns it verbatim.
//! A few fixed-output constructors exist for tests that don't need a
//! recorder.

use super::{CallArgs, DocumentStore, Embedding, LanguageModel, LlmReply, StreamPacket, VectorStore};
use crate::error::PluginError;
use crate::model::{Engram, Index, Meta, Response};
use crate::recorder::{CallSite, MockRecorder};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

fn site_from(args: &CallArgs) -> Result<&CallSite, PluginError> {
    args.call_site.as_ref().ok_or_else(|| PluginError::Store {
        message: "replay plugin called without a call site".to_string(),
    })
}

fn replay(recorder: &MockRecorder, site: &CallSite) -> Result<serde_json::Value, PluginError> {
    recorder
        .lookup_output(site)
        .ok_or_else(|| PluginError::ReplayMiss {
            key: MockRecorder::miss_key(site),
        })
}

/// Language model that replays recorded responses.
pub struct MockLlm {
    recorder: Arc<MockRecorder>,
}

impl MockLlm {
    /// Create a replay language model over a recorder.
    pub fn new(recorder: Arc<MockRecorder>) -> Self {
        Self { recorder }
    }
}

#[derive(Deserialize)]
struct RecordedLlmReply {
    llm_response: String,
}

#[async_trait::async_trait]
impl LanguageModel for MockLlm {
    fn name(&self) -> &str {
        "mock"
    }

    async fn submit(
        &self,
        _prompt: &str,
        _structured_schema: Option<&serde_json::Value>,
        args: &CallArgs,
    ) -> Result<LlmReply, PluginError> {
        let site = site_from(args)?;
        let recorded = replay(&self.recorder, site)?;
        let reply: RecordedLlmReply = serde_json::from_value(recorded)
            .map_err(|e| PluginError::Parse(format!("recorded llm output is malformed: {e}")))?;
        Ok(LlmReply {
            text: reply.llm_response,
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
                finish: false,
                finish_reason: String::new(),
            })
            .await;
        let _ = sink
            .send(StreamPacket {
                packet: String::new(),
                finish: true,
                finish_reason: "stop".to_string(),
            })
            .await;
        Ok(reply)
    }
}

/// Embedding model that replays recorded vectors, or returns a fixed vector
/// for every input.
pub struct MockEmbedding {
    mode: EmbeddingMode,
}

enum EmbeddingMode {
    Replay(Arc<MockRecorder>),
    Fixed(Vec<f32>),
}

impl MockEmbedding {
    /// Create a replay embedding model over a recorder.
    pub fn new(recorder: Arc<MockRecorder>) -> Self {
        Self {
            mode: EmbeddingMode::Replay(recorder),
        }
    }

    /// Create an embedding model that returns `vector` for every input.
    pub fn fixed(vector: Vec<f32>) -> Self {
        Self {
            mode: EmbeddingMode::Fixed(vector),
        }
    }
}

#[derive(Deserialize)]
struct RecordedEmbeddings {
    embeddings_list: Vec<Vec<f32>>,
}

#[async_trait::async_trait]
impl Embedding for MockEmbedding {
    fn name(&self) -> &str {
        "mock"
    }

    fn dimensions(&self) -> usize {
        match &self.mode {
            EmbeddingMode::Replay(_) => 0,
            EmbeddingMode::Fixed(vector) => vector.len(),
        }
    }

    async fn generate(
        &self,
        strings: &[String],
        args: &CallArgs,
    ) -> Result<Vec<Vec<f32>>, PluginError> {
        match &self.mode {
            EmbeddingMode::Fixed(vector) => Ok(vec![vector.clone(); strings.len()]),
            EmbeddingMode::Replay(recorder) => {
                let site = site_from(args)?;
                let recorded = replay(recorder, site)?;
                let parsed: RecordedEmbeddings = serde_json::from_value(recorded).map_err(|e| {
                    PluginError::Parse(format!("recorded embeddings are malformed: {e}"))
                })?;
                if parsed.embeddings_list.len() != strings.len() {
                    return Err(PluginError::Parse(format!(
                        "recorded embedding count mismatch: {} recorded for {} inputs",
                        parsed.embeddings_list.len(),
                        strings.len()
                    )));
                }
                Ok(parsed.embeddings_list)
            }
        }
    }
}

/// In-memory vector store for the mock profile.
///
/// Queries replay recorded id sets when a recorder entry exists; inserts are
/// retained for inspection.
#[derive(Default)]
pub struct MockVectorStore {
    recorder: Option<Arc<MockRecorder>>,
    inserted: Mutex<Vec<(String, String, usize)>>,
}

impl MockVectorStore {
    /// Create a store with no recorder; queries return nothing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store replaying query results from a recorder.
    pub fn with_recorder(recorder: Arc<MockRecorder>) -> Self {
        Self {
            recorder: Some(recorder),
            inserted: Mutex::new(Vec::new()),
        }
    }

    /// `(collection, obj_id, index_count)` for every insert so far.
    pub fn inserted(&self) -> Vec<(String, String, usize)> {
        self.inserted.lock().expect("mock vector lock poisoned").clone()
    }
}

#[derive(Deserialize)]
struct RecordedQuerySet {
    query_set: Vec<String>,
}

#[async_trait::async_trait]
impl VectorStore for MockVectorStore {
    fn name(&self) -> &str {
        "mock"
    }

    async fn query(
        &self,
        _collection: &str,
        _embedding: &[f32],
        args: &CallArgs,
    ) -> Result<Vec<String>, PluginError> {
        let Some(recorder) = &self.recorder else {
            return Ok(Vec::new());
        };
        let site = site_from(args)?;
        match recorder.lookup_output(site) {
            Some(recorded) => {
                let parsed: RecordedQuerySet = serde_json::from_value(recorded).map_err(|e| {
                    PluginError::Parse(format!("recorded query set is malformed: {e}"))
                })?;
                Ok(parsed.query_set)
            }
            None => Ok(Vec::new()),
        }
    }

    async fn insert(
        &self,
        collection: &str,
        indices: &[Index],
        obj_id: &str,
    ) -> Result<(), PluginError> {
        self.inserted
            .lock()
            .expect("mock vector lock poisoned")
            .push((collection.to_string(), obj_id.to_string(), indices.len()));
        Ok(())
    }
}

/// In-memory document store for the mock profile.
#[derive(Default)]
pub struct MockDocumentStore {
    responses: Mutex<HashMap<String, Response>>,
    metas: Mutex<HashMap<String, Meta>>,
    engrams: Mutex<HashMap<String, Engram>>,
}

impl MockDocumentStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored engrams.
    pub fn engram_count(&self) -> usize {
        self.engrams.lock().expect("mock store lock poisoned").len()
    }

    /// Number of stored metas.
    pub fn meta_count(&self) -> usize {
        self.metas.lock().expect("mock store lock poisoned").len()
    }

    /// Number of stored responses.
    pub fn response_count(&self) -> usize {
        self.responses.lock().expect("mock store lock poisoned").len()
    }

    /// Seed an engram, for retrieval tests.
    pub fn seed_engram(&self, engram: Engram) {
        self.engrams
            .lock()
            .expect("mock store lock poisoned")
            .insert(engram.id.clone(), engram);
    }
}

#[async_trait::async_trait]
impl DocumentStore for MockDocumentStore {
    fn name(&self) -> &str {
        "mock"
    }

    async fn save_response(&self, response: &Response) -> Result<(), PluginError> {
        self.responses
            .lock()
            .expect("mock store lock poisoned")
            .insert(response.id.clone(), response.clone());
        Ok(())
    }

    async fn save_meta(&self, meta: &Meta) -> Result<(), PluginError> {
        self.metas
            .lock()
            .expect("mock store lock poisoned")
            .insert(meta.id.clone(), meta.clone());
        Ok(())
    }

    async fn save_engrams(&self, engrams: &[Engram]) -> Result<(), PluginError> {
        let mut store = self.engrams.lock().expect("mock store lock poisoned");
        for engram in engrams {
            store.insert(engram.id.clone(), engram.clone());
        }
        Ok(())
    }

    async fn fetch_engrams(&self, ids: &[String]) -> Result<Vec<Engram>, PluginError> {
        let store = self.engrams.lock().expect("mock store lock poisoned");
        Ok(ids.iter().filter_map(|id| store.get(id).cloned()).collect())
    }

    async fn close(&self) -> Result<(), PluginError> {
        Ok(())
    }
}
