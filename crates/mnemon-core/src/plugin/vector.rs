//! File-backed vector store.
//!
//! Rows live in JSON files under `<root>/vector_db/<collection>.json`. The
//! underlying files are not reentrant, so a coarse process-wide lock guards
//! query and insert; file I/O runs on the blocking pool.

use super::{CallArgs, VectorStore};
use crate::error::PluginError;
use crate::model::Index;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

const DEFAULT_THRESHOLD: f32 = 0.5;
const DEFAULT_N_RESULTS: usize = 2;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Row {
    id: String,
    document: String,
    embedding: Vec<f32>,
}

/// Vector store persisting rows as JSON files per collection.
pub struct FileVectorStore {
    root: PathBuf,
    state: Arc<Mutex<HashMap<String, Vec<Row>>>>,
}

impl FileVectorStore {
    /// Open a store rooted at `<root>/vector_db`, loading any existing
    /// collection files.
    pub fn open(root: &str) -> Result<Self, PluginError> {
        let root = PathBuf::from(root).join("vector_db");
        std::fs::create_dir_all(&root).map_err(|e| PluginError::Store {
            message: format!("failed to create {}: {e}", root.display()),
        })?;

        let mut state = HashMap::new();
        let entries = std::fs::read_dir(&root).map_err(|e| PluginError::Store {
            message: format!("failed to read {}: {e}", root.display()),
        })?;
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(collection) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let rows = Self::load_collection(&path)?;
            state.insert(collection.to_string(), rows);
        }

        Ok(Self {
            root,
            state: Arc::new(Mutex::new(state)),
        })
    }

    fn load_collection(path: &Path) -> Result<Vec<Row>, PluginError> {
        let contents = std::fs::read_to_string(path).map_err(|e| PluginError::Store {
            message: format!("failed to read {}: {e}", path.display()),
        })?;
        serde_json::from_str(&contents).map_err(|e| PluginError::Store {
            message: format!("corrupt collection file {}: {e}", path.display()),
        })
    }

    fn collection_path(root: &Path, collection: &str) -> PathBuf {
        root.join(format!("{collection}.json"))
    }

    /// Cosine distance between two vectors; 0 is identical, larger is
    /// farther. Mismatched or zero-magnitude vectors are maximally distant.
    fn distance(a: &[f32], b: &[f32]) -> f32 {
        if a.len() != b.len() || a.is_empty() {
            return f32::MAX;
        }
        let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
        let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm_a == 0.0 || norm_b == 0.0 {
            return f32::MAX;
        }
        1.0 - dot / (norm_a * norm_b)
    }
}

#[async_trait::async_trait]
impl VectorStore for FileVectorStore {
    fn name(&self) -> &str {
        "file"
    }

    async fn query(
        &self,
        collection: &str,
        embedding: &[f32],
        args: &CallArgs,
    ) -> Result<Vec<String>, PluginError> {
        let threshold = args.threshold.unwrap_or(DEFAULT_THRESHOLD);
        let n_results = args.n_results.unwrap_or(DEFAULT_N_RESULTS);
        let state = self.state.clone();
        let collection = collection.to_string();
        let embedding = embedding.to_vec();

        tokio::task::spawn_blocking(move || {
            let state = state.lock().expect("vector store lock poisoned");
            let Some(rows) = state.get(&collection) else {
                return Ok(Vec::new());
            };

            let mut scored: Vec<(f32, &Row)> = rows
                .iter()
                .map(|row| (Self::distance(&embedding, &row.embedding), row))
                .filter(|(distance, _)| *distance < threshold)
                .collect();
            scored.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

            let mut seen = std::collections::HashSet::new();
            let mut ids = Vec::new();
            for (_, row) in scored {
                if ids.len() == n_results {
                    break;
                }
                if seen.insert(row.document.clone()) {
                    ids.push(row.document.clone());
                }
            }
            Ok(ids)
        })
        .await
        .map_err(|e| PluginError::Store {
            message: format!("vector query task failed: {e}"),
        })?
    }

    async fn insert(
        &self,
        collection: &str,
        indices: &[Index],
        obj_id: &str,
    ) -> Result<(), PluginError> {
        let state = self.state.clone();
        let root = self.root.clone();
        let collection = collection.to_string();
        let obj_id = obj_id.to_string();
        let indices = indices.to_vec();

        tokio::task::spawn_blocking(move || {
            let mut state = state.lock().expect("vector store lock poisoned");
            let rows = state.entry(collection.clone()).or_default();
            for index in &indices {
                rows.push(Row {
                    id: uuid::Uuid::new_v4().to_string(),
                    document: obj_id.clone(),
                    embedding: index.embedding.clone(),
                });
            }

            let path = Self::collection_path(&root, &collection);
            let json = serde_json::to_string(&rows).map_err(|e| PluginError::Store {
                message: format!("failed to serialize collection {collection}: {e}"),
            })?;
            std::fs::write(&path, json).map_err(|e| PluginError::Store {
                message: format!("failed to write {}: {e}", path.display()),
            })
        })
        .await
        .map_err(|e| PluginError::Store {
            message: format!("vector insert task failed: {e}"),
        })?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index(text: &str, embedding: Vec<f32>) -> Index {
        Index::new(text, embedding)
    }

    #[tokio::test]
    async fn insert_then_query_finds_close_documents() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileVectorStore::open(dir.path().to_str().expect("path")).expect("open");

        store
            .insert("main", &[index("a", vec![1.0, 0.0])], "engram-1")
            .await
            .expect("insert");
        store
            .insert("main", &[index("b", vec![0.0, 1.0])], "engram-2")
            .await
            .expect("insert");

        // Identical direction: distance 0, well under the default threshold.
        let ids = store
            .query("main", &[1.0, 0.0], &CallArgs::default())
            .await
            .expect("query");
        assert_eq!(ids, vec!["engram-1".to_string()]);
    }

    #[tokio::test]
    async fn query_respects_n_results_cap() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileVectorStore::open(dir.path().to_str().expect("path")).expect("open");

        for i in 0..5 {
            store
                .insert("main", &[index("t", vec![1.0, 0.01 * i as f32])], &format!("e-{i}"))
                .await
                .expect("insert");
        }

        let args = CallArgs::default().with_query_limits(3, 0.5);
        let ids = store.query("main", &[1.0, 0.0], &args).await.expect("query");
        assert_eq!(ids.len(), 3);
        // Closest first.
        assert_eq!(ids[0], "e-0");
    }

    #[tokio::test]
    async fn query_excludes_documents_at_or_beyond_threshold() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileVectorStore::open(dir.path().to_str().expect("path")).expect("open");

        // Orthogonal: cosine distance 1.0, beyond the default threshold 0.5.
        store
            .insert("main", &[index("far", vec![0.0, 1.0])], "engram-far")
            .await
            .expect("insert");

        let ids = store
            .query("main", &[1.0, 0.0], &CallArgs::default())
            .await
            .expect("query");
        assert!(ids.is_empty());
    }

    #[tokio::test]
    async fn query_unknown_collection_is_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileVectorStore::open(dir.path().to_str().expect("path")).expect("open");
        let ids = store
            .query("missing", &[1.0], &CallArgs::default())
            .await
            .expect("query");
        assert!(ids.is_empty());
    }

    #[tokio::test]
    async fn collections_persist_across_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path().to_str().expect("path").to_string();

        {
            let store = FileVectorStore::open(&root).expect("open");
            store
                .insert("meta", &[index("summary", vec![1.0, 0.0])], "meta-1")
                .await
                .expect("insert");
        }

        let store = FileVectorStore::open(&root).expect("reopen");
        let ids = store
            .query("meta", &[1.0, 0.0], &CallArgs::default())
            .await
            .expect("query");
        assert_eq!(ids, vec!["meta-1".to_string()]);
    }

    #[test]
    fn distance_properties() {
        assert!(FileVectorStore::distance(&[1.0, 0.0], &[1.0, 0.0]) < 1e-6);
        assert!((FileVectorStore::distance(&[1.0, 0.0], &[0.0, 1.0]) - 1.0).abs() < 1e-6);
        assert_eq!(FileVectorStore::distance(&[1.0], &[1.0, 0.0]), f32::MAX);
        assert_eq!(FileVectorStore::distance(&[0.0], &[0.0]), f32::MAX);
    }
}
