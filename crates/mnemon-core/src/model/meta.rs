//! Summary-side metadata for an observation.

use serde::{Deserialize, Serialize};

/// A summary text with its embedding, computed during consolidation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    /// The summary text.
    pub text: String,
    /// The embedding vector, attached by the consolidation summary branch.
    pub embedding: Option<Vec<f32>>,
}

impl Summary {
    /// Create a summary with no embedding yet.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            embedding: None,
        }
    }
}

/// Summary-side metadata for an observation: merged keywords, locations and
/// source ids plus the short and full summaries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Meta {
    /// Opaque meta id.
    pub id: String,
    /// Origin labels merged across the observation's engrams.
    pub locations: Vec<String>,
    /// Exchange ids merged across the observation's engrams.
    pub source_ids: Vec<String>,
    /// Keywords describing the observation.
    pub keywords: Vec<String>,
    /// A short summary line.
    pub summary_initial: Option<String>,
    /// The full summary; its embedding is attached by consolidation.
    pub summary_full: Summary,
}

impl Meta {
    /// Create a meta record with a fresh id.
    pub fn new(
        locations: Vec<String>,
        source_ids: Vec<String>,
        keywords: Vec<String>,
        summary_initial: Option<String>,
        summary_full: Summary,
    ) -> Self {
        Self {
            id: super::fresh_id(),
            locations,
            source_ids,
            keywords,
            summary_initial,
            summary_full,
        }
    }

    /// Render the meta as a TOML-style block, skipping absent fields.
    pub fn render(&self) -> String {
        fn escape(value: &str) -> String {
            format!("\"{value}\"")
        }

        fn list(values: &[String]) -> String {
            let quoted: Vec<String> = values.iter().map(|v| escape(v)).collect();
            format!("[{}]", quoted.join(", "))
        }

        let mut out = vec!["[meta]".to_string()];
        out.push(format!("id = {}", escape(&self.id)));
        out.push(format!("locations = {}", list(&self.locations)));
        out.push(format!("source_ids = {}", list(&self.source_ids)));
        out.push(format!("keywords = {}", list(&self.keywords)));
        if let Some(initial) = &self.summary_initial {
            out.push(format!("summary_initial = {}", escape(initial)));
        }
        if !self.summary_full.text.is_empty() {
            out.push(format!("summary_full = {}", escape(&self.summary_full.text)));
        }
        out.join("\n")
    }
}
