//! SQLite-backed [`CollectionBackend`].
//!
//! Each collection is a single row holding its serialized entry sequence,
//! mirroring the key-value contract of the backend trait.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use fieldlens_core::models::CollectionEntry;
use fieldlens_core::store::CollectionBackend;

use crate::config::Config;
use crate::{db, migrate};

pub struct SqliteBackend {
    pool: SqlitePool,
}

impl SqliteBackend {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect and make sure the schema exists.
    pub async fn open(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::ensure_schema(&pool).await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl CollectionBackend for SqliteBackend {
    async fn load(&self, collection: &str) -> Result<Vec<CollectionEntry>> {
        let row = sqlx::query("SELECT entries_json FROM collections WHERE name = ?")
            .bind(collection)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let text: String = row.get("entries_json");
                serde_json::from_str(&text)
                    .with_context(|| format!("corrupt collection '{}'", collection))
            }
            None => Ok(Vec::new()),
        }
    }

    async fn store(&self, collection: &str, entries: &[CollectionEntry]) -> Result<()> {
        let text = serde_json::to_string(entries)?;
        sqlx::query(
            r#"
            INSERT INTO collections (name, entries_json, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(name) DO UPDATE SET
                entries_json = excluded.entries_json,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(collection)
        .bind(&text)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
