//! Engrams and their searchable indices.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A textual lookup string paired with its embedding vector.
///
/// The granule of vector search. Each index belongs to exactly one engram.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Index {
    /// Opaque index id.
    pub id: String,
    /// The lookup text, context-prefixed during consolidation.
    pub text: String,
    /// The embedding vector for `text`.
    pub embedding: Vec<f32>,
}

impl Index {
    /// Create an index with a fresh id.
    pub fn new(text: impl Into<String>, embedding: Vec<f32>) -> Self {
        Self {
            id: super::fresh_id(),
            text: text.into(),
            embedding,
        }
    }
}

/// A unit of durable memory: one contiguous piece of content with grounding
/// context and, once consolidated, searchable indices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Engram {
    /// Opaque engram id, unique within a running consolidation.
    pub id: String,
    /// The id of the exchange that produced this engram.
    pub source_id: String,
    /// Opaque origin label (e.g. `response/<id>`).
    pub location: String,
    /// The textual body.
    pub content: String,
    /// True when `content` is verbatim from the source, false when paraphrased.
    pub is_native_source: bool,
    /// Grounding key/value pairs such as a section title. Ordered so the
    /// derived context prefix is deterministic.
    pub context: Option<BTreeMap<String, String>>,
    /// Integer accuracy score used by merge filters.
    pub accuracy: i64,
    /// Integer relevancy score used by merge filters.
    pub relevancy: i64,
    /// Ordered indices, attached by consolidation.
    pub indices: Option<Vec<Index>>,
    /// Creation timestamp.
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl Engram {
    /// Create an engram with a fresh id and no indices.
    pub fn new(
        source_id: impl Into<String>,
        location: impl Into<String>,
        content: impl Into<String>,
        is_native_source: bool,
    ) -> Self {
        Self {
            id: super::fresh_id(),
            source_id: source_id.into(),
            location: location.into(),
            content: content.into(),
            is_native_source,
            context: None,
            accuracy: 0,
            relevancy: 0,
            indices: None,
            created_at: chrono::Utc::now(),
        }
    }

    /// Attach a grounding context map.
    pub fn with_context(mut self, context: BTreeMap<String, String>) -> Self {
        self.context = Some(context);
        self
    }

    /// Set the merge-filter scores.
    pub fn with_scores(mut self, accuracy: i64, relevancy: i64) -> Self {
        self.accuracy = accuracy;
        self.relevancy = relevancy;
        self
    }

    /// Render the engram as a prompt block for index generation.
    pub fn render(&self) -> String {
        let mut out = String::from("<begin>\n");
        out.push_str(&format!("location: {}\n", self.location));
        if let Some(context) = &self.context {
            for (key, value) in context {
                out.push_str(&format!("{key}: {value}\n"));
            }
        }
        if let Some(indices) = &self.indices {
            out.push_str("<indices>\n");
            for index in indices {
                out.push_str(&index.text);
                out.push('\n');
            }
            out.push_str("</indices>\n");
        }
        if self.is_native_source {
            out.push_str("The text is directly from the source.\n");
        } else {
            out.push_str("The text is paraphrased from the source.\n");
        }
        out.push_str(&format!("<text>{}</text>\n", self.content));
        out.push_str("</end>\n");
        out
    }
}
