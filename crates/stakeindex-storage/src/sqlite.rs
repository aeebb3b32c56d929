//! SQLite entity store for StakeIndex.
//!
//! Every entity is one row in a single `entities` table, keyed by
//! `(kind, id)`, with the JSON body stored as text. Secondary lookups use
//! `json_extract`, and each event's writes are applied in one transaction.
//!
//! # Usage
//! ```rust,no_run
//! use stakeindex_storage::sqlite::SqliteStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // File-backed (persistent)
//! let store = SqliteStore::open("./stakeindex.db").await?;
//!
//! // In-memory (tests / ephemeral)
//! let store = SqliteStore::in_memory().await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use serde_json::Value;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use stakeindex_core::error::ProcessingError;
use stakeindex_core::store::{Change, EntityStore};

fn storage_err(e: sqlx::Error) -> ProcessingError {
    ProcessingError::Storage(e.to_string())
}

/// SQLite-backed entity store.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) a SQLite database at `path`.
    ///
    /// The path may be a plain file path (`"./stakeindex.db"`) or a full
    /// SQLite URL (`"sqlite:./stakeindex.db?mode=rwc"`).
    pub async fn open(path: &str) -> Result<Self, ProcessingError> {
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite:{path}?mode=rwc")
        };

        let pool = SqlitePool::connect(&url).await.map_err(storage_err)?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Open an in-memory SQLite database.
    ///
    /// Limited to one connection: every connection to `:memory:` would
    /// otherwise see its own empty database.
    pub async fn in_memory() -> Result<Self, ProcessingError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(storage_err)?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Create tables and enable WAL mode.
    async fn init_schema(&self) -> Result<(), ProcessingError> {
        sqlx::query("PRAGMA journal_mode=WAL;")
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS entities (
                kind TEXT NOT NULL,
                id   TEXT NOT NULL,
                body TEXT NOT NULL,
                PRIMARY KEY (kind, id)
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        Ok(())
    }

    /// Number of stored entities of `kind`.
    pub async fn count(&self, kind: &str) -> Result<u64, ProcessingError> {
        let row = sqlx::query("SELECT COUNT(*) AS cnt FROM entities WHERE kind = ?")
            .bind(kind)
            .fetch_one(&self.pool)
            .await
            .map_err(storage_err)?;

        let cnt: i64 = row.get("cnt");
        Ok(cnt as u64)
    }
}

#[async_trait]
impl EntityStore for SqliteStore {
    async fn get(&self, kind: &str, id: &str) -> Result<Option<Value>, ProcessingError> {
        let row = sqlx::query("SELECT body FROM entities WHERE kind = ? AND id = ?")
            .bind(kind)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;

        row.map(|r| serde_json::from_str::<Value>(&r.get::<String, _>("body")))
            .transpose()
            .map_err(ProcessingError::from)
    }

    async fn find_by(
        &self,
        kind: &str,
        field: &str,
        value: &Value,
    ) -> Result<Vec<Value>, ProcessingError> {
        let path = format!("$.{field}");
        let query = match value {
            Value::String(s) => sqlx::query(
                "SELECT body FROM entities
                 WHERE kind = ? AND json_extract(body, ?) = ?
                 ORDER BY id",
            )
            .bind(kind)
            .bind(path)
            .bind(s.clone()),
            other => sqlx::query(
                "SELECT body FROM entities
                 WHERE kind = ? AND json_quote(json_extract(body, ?)) = ?
                 ORDER BY id",
            )
            .bind(kind)
            .bind(path)
            .bind(other.to_string()),
        };

        let rows = query.fetch_all(&self.pool).await.map_err(storage_err)?;
        rows.iter()
            .map(|r| {
                serde_json::from_str::<Value>(&r.get::<String, _>("body"))
                    .map_err(ProcessingError::from)
            })
            .collect()
    }

    async fn commit(&self, changes: Vec<Change>) -> Result<(), ProcessingError> {
        let mut tx = self.pool.begin().await.map_err(storage_err)?;
        let count = changes.len();

        for change in changes {
            match change {
                Change::Upsert { kind, id, body } => {
                    sqlx::query("INSERT OR REPLACE INTO entities (kind, id, body) VALUES (?, ?, ?)")
                        .bind(kind)
                        .bind(id)
                        .bind(body.to_string())
                        .execute(&mut *tx)
                        .await
                        .map_err(storage_err)?;
                }
                Change::Remove { kind, id } => {
                    sqlx::query("DELETE FROM entities WHERE kind = ? AND id = ?")
                        .bind(kind)
                        .bind(id)
                        .execute(&mut *tx)
                        .await
                        .map_err(storage_err)?;
                }
            }
        }

        tx.commit().await.map_err(storage_err)?;
        debug!(changes = count, "committed entity changes");
        Ok(())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
