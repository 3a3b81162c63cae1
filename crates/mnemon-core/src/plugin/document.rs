//! SQLite document store.
//!
//! Records are stored as JSON bodies keyed by their opaque ids. Uses SQLx
//! with WAL mode for concurrent access; the schema lives in embedded
//! migrations.

use super::{DocumentStore, PluginError};
use crate::error::StorageError;
use crate::model::{Engram, Meta, Response};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::Row as _;
use std::str::FromStr;
use std::time::Duration;

/// Type alias for the SQLite connection pool.
pub type DbPool = sqlx::SqlitePool;

/// Initialize the SQLite database for a long-running host.
///
/// Creates the database file and parent directories if they don't exist,
/// configures WAL mode, runs embedded migrations, and returns a pool.
pub async fn init_db(db_path: &str) -> Result<DbPool, StorageError> {
    if let Some(parent) = std::path::Path::new(db_path).parent() {
        std::fs::create_dir_all(parent).map_err(|e| StorageError::Connection {
            source: sqlx::Error::Configuration(
                format!("failed to create directory {}: {e}", parent.display()).into(),
            ),
        })?;
    }

    let connect_options = SqliteConnectOptions::from_str(&format!("sqlite:{db_path}"))
        .map_err(|e| StorageError::Connection { source: e })?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(Duration::from_secs(5))
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(4)
        .min_connections(1)
        .idle_timeout(Duration::from_secs(300))
        .connect_with(connect_options)
        .await
        .map_err(|e| StorageError::Connection { source: e })?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(|e| StorageError::Migration { source: e })?;

    Ok(pool)
}

/// Initialize an in-memory SQLite database for testing.
#[cfg(any(test, feature = "test-helpers"))]
pub async fn init_test_db() -> Result<DbPool, StorageError> {
    let connect_options = SqliteConnectOptions::from_str("sqlite::memory:")
        .map_err(|e| StorageError::Connection { source: e })?
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(connect_options)
        .await
        .map_err(|e| StorageError::Connection { source: e })?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(|e| StorageError::Migration { source: e })?;

    Ok(pool)
}

/// Document store over a SQLite pool.
pub struct SqliteDocumentStore {
    pool: DbPool,
}

impl SqliteDocumentStore {
    /// Wrap an initialized pool.
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn store_error(e: sqlx::Error) -> PluginError {
        PluginError::Store {
            message: StorageError::Query { source: e }.to_string(),
        }
    }

    fn encode<T: serde::Serialize>(record: &T) -> Result<String, PluginError> {
        serde_json::to_string(record).map_err(|e| PluginError::Store {
            message: format!("failed to encode record: {e}"),
        })
    }
}

#[async_trait::async_trait]
impl DocumentStore for SqliteDocumentStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn save_response(&self, response: &Response) -> Result<(), PluginError> {
        sqlx::query("INSERT OR REPLACE INTO responses (id, body) VALUES (?, ?)")
            .bind(&response.id)
            .bind(Self::encode(response)?)
            .execute(&self.pool)
            .await
            .map_err(Self::store_error)?;
        Ok(())
    }

    async fn save_meta(&self, meta: &Meta) -> Result<(), PluginError> {
        sqlx::query("INSERT OR REPLACE INTO metas (id, body) VALUES (?, ?)")
            .bind(&meta.id)
            .bind(Self::encode(meta)?)
            .execute(&self.pool)
            .await
            .map_err(Self::store_error)?;
        Ok(())
    }

    async fn save_engrams(&self, engrams: &[Engram]) -> Result<(), PluginError> {
        let mut tx = self.pool.begin().await.map_err(Self::store_error)?;
        for engram in engrams {
            sqlx::query("INSERT OR REPLACE INTO engrams (id, source_id, body) VALUES (?, ?, ?)")
                .bind(&engram.id)
                .bind(&engram.source_id)
                .bind(Self::encode(engram)?)
                .execute(&mut *tx)
                .await
                .map_err(Self::store_error)?;
        }
        tx.commit().await.map_err(Self::store_error)?;
        Ok(())
    }

    async fn fetch_engrams(&self, ids: &[String]) -> Result<Vec<Engram>, PluginError> {
        let mut engrams = Vec::with_capacity(ids.len());
        for id in ids {
            let row = sqlx::query("SELECT body FROM engrams WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(Self::store_error)?;
            let Some(row) = row else {
                tracing::warn!(engram_id = %id, "Requested engram not in store, skipping");
                continue;
            };
            let body: String = row.get("body");
            let engram = serde_json::from_str(&body).map_err(|e| PluginError::Store {
                message: StorageError::Decode(e.to_string()).to_string(),
            })?;
            engrams.push(engram);
        }
        Ok(engrams)
    }

    async fn close(&self) -> Result<(), PluginError> {
        self.pool.close().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        ConversationDirection, Index, Prompt, PromptAnalysis, RetrieveResult, Summary,
    };
    use crate::model::{Engram, Meta, Response};

    async fn test_store() -> SqliteDocumentStore {
        let pool = init_test_db().await.expect("init db");
        SqliteDocumentStore::new(pool)
    }

    fn sample_response() -> Response {
        let prompt = Prompt::new("question");
        let analysis = PromptAnalysis {
            prompt_id: prompt.id.clone(),
            conversation_direction: ConversationDirection::default(),
            indices: vec![],
        };
        let retrieve = RetrieveResult {
            prompt_id: prompt.id.clone(),
            engram_ids: vec![],
        };
        Response::new("answer", prompt, analysis, retrieve)
    }

    #[tokio::test]
    async fn save_and_fetch_engrams_preserves_order() {
        let store = test_store().await;

        let mut first = Engram::new("src", "loc", "first", true);
        first.indices = Some(vec![Index::new("i1", vec![0.1])]);
        let second = Engram::new("src", "loc", "second", false);

        store
            .save_engrams(&[first.clone(), second.clone()])
            .await
            .expect("save");

        let fetched = store
            .fetch_engrams(&[second.id.clone(), first.id.clone()])
            .await
            .expect("fetch");
        assert_eq!(fetched.len(), 2);
        assert_eq!(fetched[0].content, "second");
        assert_eq!(fetched[1].content, "first");
        assert_eq!(fetched[1].indices.as_ref().map(Vec::len), Some(1));
    }

    #[tokio::test]
    async fn fetch_skips_unknown_ids() {
        let store = test_store().await;
        let engram = Engram::new("src", "loc", "body", true);
        store.save_engrams(&[engram.clone()]).await.expect("save");

        let fetched = store
            .fetch_engrams(&["missing".to_string(), engram.id.clone()])
            .await
            .expect("fetch");
        assert_eq!(fetched.len(), 1);
        assert_eq!(fetched[0].id, engram.id);
    }

    #[tokio::test]
    async fn save_response_and_meta() {
        let store = test_store().await;
        store
            .save_response(&sample_response())
            .await
            .expect("save response");

        let meta = Meta::new(vec![], vec![], vec![], None, Summary::new("summary"));
        store.save_meta(&meta).await.expect("save meta");
    }

    #[tokio::test]
    async fn save_is_idempotent_per_id() {
        let store = test_store().await;
        let engram = Engram::new("src", "loc", "body", true);
        store.save_engrams(&[engram.clone()]).await.expect("first");
        store.save_engrams(&[engram.clone()]).await.expect("second");

        let fetched = store.fetch_engrams(&[engram.id]).await.expect("fetch");
        assert_eq!(fetched.len(), 1);
    }
}
