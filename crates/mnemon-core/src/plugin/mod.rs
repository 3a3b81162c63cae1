//! Plugin layer: typed interfaces per capability plus the registry that
//! resolves `(kind, usage)` pairs to concrete handles.
//!
//! The standard profile wires Gemini-backed language-model and embedding
//! adapters, a file-backed vector store, and a SQLite document store. The
//! mock profile wires replay implementations of the same interfaces over the
//! [`crate::recorder::MockRecorder`].

pub mod document;
pub mod gemini;
pub mod mock;
pub mod vector;

use crate::error::PluginError;
use crate::model::{Engram, Index, Meta, Response};
use crate::recorder::CallSite;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Arguments threaded through every plugin call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CallArgs {
    /// Model override for language-model and embedding calls.
    pub model: Option<String>,
    /// Distance threshold for vector queries; smaller is closer.
    pub threshold: Option<f32>,
    /// Result cap for vector queries.
    pub n_results: Option<usize>,
    /// The call site, used for recording and replay.
    pub call_site: Option<CallSite>,
}

impl CallArgs {
    /// Arguments carrying only a call site.
    pub fn for_site(site: CallSite) -> Self {
        Self {
            call_site: Some(site),
            ..Self::default()
        }
    }

    /// Set the model override.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Set the vector-query cardinality.
    pub fn with_query_limits(mut self, n_results: usize, threshold: f32) -> Self {
        self.n_results = Some(n_results);
        self.threshold = Some(threshold);
        self
    }
}

/// The text returned by a language-model call. JSON text when a structured
/// schema was supplied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LlmReply {
    /// The model's response text.
    pub text: String,
}

/// One increment of a streaming language-model response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamPacket {
    /// The text delta.
    pub packet: String,
    /// True on the terminal frame.
    pub finish: bool,
    /// The provider's finish reason, empty until the terminal frame.
    pub finish_reason: String,
}

/// A large language model resolved by `(llm, usage)`.
#[async_trait::async_trait]
pub trait LanguageModel: Send + Sync {
    /// The provider's display name.
    fn name(&self) -> &str;

    /// Submit a prompt. When `structured_schema` is given the reply text is
    /// JSON conforming to it; fenced code wrappers are stripped by the
    /// adapter.
    async fn submit(
        &self,
        prompt: &str,
        structured_schema: Option<&serde_json::Value>,
        args: &CallArgs,
    ) -> Result<LlmReply, PluginError>;

    /// Submit a prompt and stream increments into `sink`; the final packet
    /// carries `finish = true`. Returns the accumulated full text.
    async fn submit_streaming(
        &self,
        prompt: &str,
        args: &CallArgs,
        sink: mpsc::Sender<StreamPacket>,
    ) -> Result<LlmReply, PluginError>;
}

/// An embedding model resolved by `(embedding, usage)`.
#[async_trait::async_trait]
pub trait Embedding: Send + Sync {
    /// The provider's display name.
    fn name(&self) -> &str;

    /// The fixed output dimensionality.
    fn dimensions(&self) -> usize;

    /// Embed a batch of strings, preserving input order.
    async fn generate(
        &self,
        strings: &[String],
        args: &CallArgs,
    ) -> Result<Vec<Vec<f32>>, PluginError>;
}

/// A vector store resolved by `(vector_db, collection)`.
#[async_trait::async_trait]
pub trait VectorStore: Send + Sync {
    /// The store's display name.
    fn name(&self) -> &str;

    /// Return document ids whose distance to `embedding` is strictly below
    /// `args.threshold` (default 0.5), capped at `args.n_results` (default
    /// 2), ordered by distance ascending.
    async fn query(
        &self,
        collection: &str,
        embedding: &[f32],
        args: &CallArgs,
    ) -> Result<Vec<String>, PluginError>;

    /// Insert each index as a `(document = obj_id, embedding, fresh id)` row.
    async fn insert(
        &self,
        collection: &str,
        indices: &[Index],
        obj_id: &str,
    ) -> Result<(), PluginError>;
}

/// A document/relational store resolved by `(db, usage)`.
#[async_trait::async_trait]
pub trait DocumentStore: Send + Sync {
    /// The store's display name.
    fn name(&self) -> &str;

    /// Persist a response record.
    async fn save_response(&self, response: &Response) -> Result<(), PluginError>;

    /// Persist a meta record.
    async fn save_meta(&self, meta: &Meta) -> Result<(), PluginError>;

    /// Persist a batch of enriched engrams.
    async fn save_engrams(&self, engrams: &[Engram]) -> Result<(), PluginError>;

    /// Fetch engrams by id, preserving the requested order. Unknown ids are
    /// skipped.
    async fn fetch_engrams(&self, ids: &[String]) -> Result<Vec<Engram>, PluginError>;

    /// Release the underlying connection.
    async fn close(&self) -> Result<(), PluginError>;
}

/// Resolves `(kind, usage)` pairs to typed plugin handles.
#[derive(Default)]
pub struct PluginRegistry {
    llm: HashMap<String, Arc<dyn LanguageModel>>,
    embedding: HashMap<String, Arc<dyn Embedding>>,
    vector: HashMap<String, Arc<dyn VectorStore>>,
    document: HashMap<String, Arc<dyn DocumentStore>>,
}

impl PluginRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a language model under a usage slot.
    pub fn register_llm(&mut self, usage: impl Into<String>, handle: Arc<dyn LanguageModel>) {
        self.llm.insert(usage.into(), handle);
    }

    /// Register an embedding model under a usage slot.
    pub fn register_embedding(&mut self, usage: impl Into<String>, handle: Arc<dyn Embedding>) {
        self.embedding.insert(usage.into(), handle);
    }

    /// Register a vector store under a usage slot.
    pub fn register_vector(&mut self, usage: impl Into<String>, handle: Arc<dyn VectorStore>) {
        self.vector.insert(usage.into(), handle);
    }

    /// Register a document store under a usage slot.
    pub fn register_document(&mut self, usage: impl Into<String>, handle: Arc<dyn DocumentStore>) {
        self.document.insert(usage.into(), handle);
    }

    /// Resolve `(llm, usage)`.
    pub fn llm(&self, usage: &str) -> Result<Arc<dyn LanguageModel>, PluginError> {
        self.llm.get(usage).cloned().ok_or_else(|| {
            PluginError::NotRegistered {
                kind: "llm".to_string(),
                usage: usage.to_string(),
            }
        })
    }

    /// Resolve `(embedding, usage)`.
    pub fn embedding(&self, usage: &str) -> Result<Arc<dyn Embedding>, PluginError> {
        self.embedding.get(usage).cloned().ok_or_else(|| {
            PluginError::NotRegistered {
                kind: "embedding".to_string(),
                usage: usage.to_string(),
            }
        })
    }

    /// Resolve `(vector_db, usage)`.
    pub fn vector(&self, usage: &str) -> Result<Arc<dyn VectorStore>, PluginError> {
        self.vector.get(usage).cloned().ok_or_else(|| {
            PluginError::NotRegistered {
                kind: "vector_db".to_string(),
                usage: usage.to_string(),
            }
        })
    }

    /// Resolve `(db, usage)`.
    pub fn document(&self, usage: &str) -> Result<Arc<dyn DocumentStore>, PluginError> {
        self.document.get(usage).cloned().ok_or_else(|| {
            PluginError::NotRegistered {
                kind: "db".to_string(),
                usage: usage.to_string(),
            }
        })
    }
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("llm", &self.llm.keys().collect::<Vec<_>>())
            .field("embedding", &self.embedding.keys().collect::<Vec<_>>())
            .field("vector", &self.vector.keys().collect::<Vec<_>>())
            .field("document", &self.document.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Strip a fenced code wrapper (```json, ```toml, or bare ```) from model
/// output, returning the inner text.
pub(crate) fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    if !trimmed.ends_with("```") {
        return trimmed;
    }
    for prefix in ["```json", "```toml", "```"] {
        if let Some(rest) = trimmed.strip_prefix(prefix) {
            return rest.trim_end_matches("```").trim();
        }
    }
    trimmed
}
