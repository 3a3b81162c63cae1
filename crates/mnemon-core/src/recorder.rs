//! Record/replay store for plugin calls and service boundaries.
//!
//! During a training run, services record their inputs, outputs, and every
//! plugin reply keyed by call site. In the mock profile the replay plugins
//! return those recorded payloads verbatim, so the whole pipeline can be
//! exercised without any real backend.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Identifies one plugin call: which service made it, the zero-based call
/// index within the stage fan-out, and the source id the call served.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallSite {
    /// The calling service's name.
    pub service: String,
    /// Zero-based call index within the stage.
    pub call_index: usize,
    /// The source id (response id) the call served.
    pub source_id: String,
}

impl CallSite {
    /// Create a call site.
    pub fn new(service: impl Into<String>, call_index: usize, source_id: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            call_index,
            source_id: source_id.into(),
        }
    }

    fn key(&self, direction: &str) -> String {
        format!(
            "{}-{}-{}-{}",
            self.service, self.call_index, self.source_id, direction
        )
    }
}

/// Process-wide record/replay map, owned by the host and handed to plugin
/// adapters and services explicitly.
#[derive(Debug, Default)]
pub struct MockRecorder {
    entries: Mutex<BTreeMap<String, serde_json::Value>>,
}

impl MockRecorder {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the input payload for a call site.
    pub fn record_input(&self, site: &CallSite, payload: serde_json::Value) {
        self.insert(site.key("input"), payload);
    }

    /// Record the output payload for a call site.
    pub fn record_output(&self, site: &CallSite, payload: serde_json::Value) {
        self.insert(site.key("output"), payload);
    }

    /// Look up the recorded output for a call site.
    pub fn lookup_output(&self, site: &CallSite) -> Option<serde_json::Value> {
        self.entries
            .lock()
            .expect("recorder lock poisoned")
            .get(&site.key("output"))
            .cloned()
    }

    /// Look up the recorded input for a call site.
    pub fn lookup_input(&self, site: &CallSite) -> Option<serde_json::Value> {
        self.entries
            .lock()
            .expect("recorder lock poisoned")
            .get(&site.key("input"))
            .cloned()
    }

    /// The key a replay miss should report for a call site.
    pub fn miss_key(site: &CallSite) -> String {
        site.key("output")
    }

    /// Number of recorded entries.
    pub fn len(&self) -> usize {
        self.entries.lock().expect("recorder lock poisoned").len()
    }

    /// Whether anything has been recorded.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Serialize all entries to a JSON file.
    pub fn write_to_disk(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let entries = self.entries.lock().expect("recorder lock poisoned");
        let json = serde_json::to_string_pretty(&*entries)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, json)
    }

    /// Load entries from a JSON file, replacing the current contents.
    pub fn load_from_disk(&self, path: &Path) -> std::io::Result<()> {
        let contents = std::fs::read_to_string(path)?;
        let loaded: BTreeMap<String, serde_json::Value> = serde_json::from_str(&contents)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        *self.entries.lock().expect("recorder lock poisoned") = loaded;
        Ok(())
    }

    /// Default on-disk location under the storage root.
    pub fn default_path(root: &str) -> PathBuf {
        PathBuf::from(root).join("mock_data.json")
    }

    fn insert(&self, key: String, payload: serde_json::Value) {
        self.entries
            .lock()
            .expect("recorder lock poisoned")
            .insert(key, payload);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_format_matches_contract() {
        let site = CallSite::new("ConsolidateService", 2, "src-9");
        assert_eq!(site.key("input"), "ConsolidateService-2-src-9-input");
        assert_eq!(
            MockRecorder::miss_key(&site),
            "ConsolidateService-2-src-9-output"
        );
    }

    #[test]
    fn record_and_lookup() {
        let recorder = MockRecorder::new();
        let site = CallSite::new("RetrieveService", 0, "src-1");

        recorder.record_output(&site, serde_json::json!({"llm_response": "ok"}));
        assert_eq!(
            recorder.lookup_output(&site),
            Some(serde_json::json!({"llm_response": "ok"}))
        );
        assert!(recorder.lookup_input(&site).is_none());
    }

    #[test]
    fn lookup_is_keyed_per_call_index() {
        let recorder = MockRecorder::new();
        recorder.record_output(
            &CallSite::new("S", 0, "src"),
            serde_json::json!("first"),
        );
        recorder.record_output(
            &CallSite::new("S", 1, "src"),
            serde_json::json!("second"),
        );

        assert_eq!(
            recorder.lookup_output(&CallSite::new("S", 1, "src")),
            Some(serde_json::json!("second"))
        );
    }

    #[test]
    fn disk_roundtrip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("mock_data.json");

        let recorder = MockRecorder::new();
        let site = CallSite::new("CodifyService", 0, "src-1");
        recorder.record_input(&site, serde_json::json!({"prompt": "hi"}));
        recorder.record_output(&site, serde_json::json!({"engrams": []}));
        recorder.write_to_disk(&path).expect("write");

        let reloaded = MockRecorder::new();
        reloaded.load_from_disk(&path).expect("load");
        assert_eq!(reloaded.len(), 2);
        assert_eq!(
            reloaded.lookup_output(&site),
            Some(serde_json::json!({"engrams": []}))
        );
    }
}
