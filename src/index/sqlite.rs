//! SQLite-backed [`VectorIndex`].
//!
//! One `chunks` table holding text, flat metadata columns, and the embedding
//! as a little-endian f32 BLOB. Queries load candidate rows and rank by
//! cosine similarity in process; at the scale of a per-user document set
//! this stays well under the cost of the embedding call that precedes it.

use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::Row;

use super::{
    blob_to_vec, cosine_similarity, vec_to_blob, ChunkMeta, ChunkRecord, Filter, MetaPatch,
    ScoredChunk, VectorIndex,
};
use crate::error::Result;

pub struct SqliteIndex {
    pool: SqlitePool,
}

impl SqliteIndex {
    /// Open (creating if missing) the index database at `path`.
    pub async fn connect(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chunks (
                id TEXT PRIMARY KEY,
                filename TEXT NOT NULL,
                original_filename TEXT NOT NULL,
                chunk_index INTEGER NOT NULL,
                "group" TEXT NOT NULL,
                text TEXT NOT NULL,
                embedding BLOB NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_filename ON chunks (filename)")
            .execute(&pool)
            .await?;

        Ok(Self { pool })
    }

    fn meta_from_row(row: &sqlx::sqlite::SqliteRow) -> ChunkMeta {
        ChunkMeta {
            filename: row.get("filename"),
            original_filename: row.get("original_filename"),
            chunk_index: row.get::<i64, _>("chunk_index") as usize,
            group: row.get("group"),
        }
    }
}

#[async_trait]
impl VectorIndex for SqliteIndex {
    async fn upsert(&self, records: &[ChunkRecord]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for record in records {
            sqlx::query(
                r#"
                INSERT INTO chunks (id, filename, original_filename, chunk_index, "group", text, embedding)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(id) DO UPDATE SET
                    filename = excluded.filename,
                    original_filename = excluded.original_filename,
                    chunk_index = excluded.chunk_index,
                    "group" = excluded."group",
                    text = excluded.text,
                    embedding = excluded.embedding
                "#,
            )
            .bind(&record.id)
            .bind(&record.meta.filename)
            .bind(&record.meta.original_filename)
            .bind(record.meta.chunk_index as i64)
            .bind(&record.meta.group)
            .bind(&record.text)
            .bind(vec_to_blob(&record.embedding))
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn query(
        &self,
        embedding: &[f32],
        top_k: usize,
        filter: Option<&Filter>,
    ) -> Result<Vec<ScoredChunk>> {
        const COLUMNS: &str =
            r#"SELECT filename, original_filename, chunk_index, "group", text, embedding FROM chunks"#;

        let rows = match filter {
            None => sqlx::query(COLUMNS).fetch_all(&self.pool).await?,
            Some(Filter::Filename(name)) => {
                sqlx::query(&format!("{COLUMNS} WHERE filename = ?"))
                    .bind(name)
                    .fetch_all(&self.pool)
                    .await?
            }
            Some(Filter::Group(group)) => {
                sqlx::query(&format!(r#"{COLUMNS} WHERE "group" = ?"#))
                    .bind(group)
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        let mut scored: Vec<ScoredChunk> = rows
            .iter()
            .map(|row| {
                let stored = blob_to_vec(row.get::<Vec<u8>, _>("embedding").as_slice());
                ScoredChunk {
                    text: row.get("text"),
                    meta: Self::meta_from_row(row),
                    score: cosine_similarity(embedding, &stored),
                }
            })
            .collect();
        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(top_k);
        Ok(scored)
    }

    async fn get(&self, filter: Option<&Filter>) -> Result<Vec<(String, ChunkMeta)>> {
        const COLUMNS: &str =
            r#"SELECT id, filename, original_filename, chunk_index, "group" FROM chunks"#;

        let rows = match filter {
            None => sqlx::query(COLUMNS).fetch_all(&self.pool).await?,
            Some(Filter::Filename(name)) => {
                sqlx::query(&format!("{COLUMNS} WHERE filename = ?"))
                    .bind(name)
                    .fetch_all(&self.pool)
                    .await?
            }
            Some(Filter::Group(group)) => {
                sqlx::query(&format!(r#"{COLUMNS} WHERE "group" = ?"#))
                    .bind(group)
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        Ok(rows
            .iter()
            .map(|row| (row.get("id"), Self::meta_from_row(row)))
            .collect())
    }

    async fn update(&self, ids: &[String], patch: &MetaPatch) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for id in ids {
            sqlx::query(r#"UPDATE chunks SET "group" = ? WHERE id = ?"#)
                .bind(&patch.group)
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn delete(&self, ids: &[String]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for id in ids {
            sqlx::query("DELETE FROM chunks WHERE id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn count(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }
}
