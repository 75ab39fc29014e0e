//! In-memory [`VectorIndex`] for tests.
//!
//! A `Vec` of chunk records behind an `RwLock`; query is brute-force cosine
//! over everything stored.

use std::cmp::Ordering;
use std::sync::RwLock;

use async_trait::async_trait;

use super::{cosine_similarity, ChunkMeta, ChunkRecord, Filter, MetaPatch, ScoredChunk, VectorIndex};
use crate::error::Result;

pub struct MemoryIndex {
    rows: RwLock<Vec<ChunkRecord>>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self {
            rows: RwLock::new(Vec::new()),
        }
    }
}

impl Default for MemoryIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VectorIndex for MemoryIndex {
    async fn upsert(&self, records: &[ChunkRecord]) -> Result<()> {
        let mut rows = self.rows.write().unwrap();
        for record in records {
            match rows.iter_mut().find(|r| r.id == record.id) {
                Some(existing) => *existing = record.clone(),
                None => rows.push(record.clone()),
            }
        }
        Ok(())
    }

    async fn query(
        &self,
        embedding: &[f32],
        top_k: usize,
        filter: Option<&Filter>,
    ) -> Result<Vec<ScoredChunk>> {
        let rows = self.rows.read().unwrap();
        let mut scored: Vec<ScoredChunk> = rows
            .iter()
            .filter(|r| filter.map_or(true, |f| f.matches(&r.meta)))
            .map(|r| ScoredChunk {
                text: r.text.clone(),
                meta: r.meta.clone(),
                score: cosine_similarity(embedding, &r.embedding),
            })
            .collect();
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
        scored.truncate(top_k);
        Ok(scored)
    }

    async fn get(&self, filter: Option<&Filter>) -> Result<Vec<(String, ChunkMeta)>> {
        let rows = self.rows.read().unwrap();
        Ok(rows
            .iter()
            .filter(|r| filter.map_or(true, |f| f.matches(&r.meta)))
            .map(|r| (r.id.clone(), r.meta.clone()))
            .collect())
    }

    async fn update(&self, ids: &[String], patch: &MetaPatch) -> Result<()> {
        let mut rows = self.rows.write().unwrap();
        for row in rows.iter_mut() {
            if ids.contains(&row.id) {
                row.meta.group = patch.group.clone();
            }
        }
        Ok(())
    }

    async fn delete(&self, ids: &[String]) -> Result<()> {
        let mut rows = self.rows.write().unwrap();
        rows.retain(|r| !ids.contains(&r.id));
        Ok(())
    }

    async fn count(&self) -> Result<u64> {
        Ok(self.rows.read().unwrap().len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::chunk_id;

    fn record(name: &str, index: usize, group: &str, embedding: Vec<f32>) -> ChunkRecord {
        ChunkRecord {
            id: chunk_id(name, index),
            text: format!("chunk {index} of {name}"),
            embedding,
            meta: ChunkMeta {
                filename: name.to_string(),
                original_filename: name.to_string(),
                chunk_index: index,
                group: group.to_string(),
            },
        }
    }

    #[tokio::test]
    async fn upsert_replaces_by_id() {
        let index = MemoryIndex::new();
        index.upsert(&[record("a.pdf", 0, "g", vec![1.0, 0.0])]).await.unwrap();
        index.upsert(&[record("a.pdf", 0, "h", vec![0.0, 1.0])]).await.unwrap();

        assert_eq!(index.count().await.unwrap(), 1);
        let (_, meta) = index.get(None).await.unwrap().remove(0);
        assert_eq!(meta.group, "h");
    }

    #[tokio::test]
    async fn query_ranks_by_similarity_and_honors_filter() {
        let index = MemoryIndex::new();
        index
            .upsert(&[
                record("a.pdf", 0, "g", vec![1.0, 0.0]),
                record("b.pdf", 0, "g", vec![0.6, 0.8]),
                record("c.pdf", 0, "other", vec![1.0, 0.1]),
            ])
            .await
            .unwrap();

        let hits = index.query(&[1.0, 0.0], 10, None).await.unwrap();
        assert_eq!(hits[0].meta.filename, "a.pdf");

        let filter = Filter::Group("g".to_string());
        let hits = index.query(&[1.0, 0.0], 10, Some(&filter)).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|h| h.meta.group == "g"));
    }

    #[tokio::test]
    async fn update_patches_group_only_for_listed_ids() {
        let index = MemoryIndex::new();
        index
            .upsert(&[
                record("a.pdf", 0, "", vec![1.0]),
                record("a.pdf", 1, "kept", vec![1.0]),
            ])
            .await
            .unwrap();

        let patch = MetaPatch {
            group: "fixed".to_string(),
        };
        index.update(&[chunk_id("a.pdf", 0)], &patch).await.unwrap();

        let metas: Vec<ChunkMeta> = index
            .get(None)
            .await
            .unwrap()
            .into_iter()
            .map(|(_, m)| m)
            .collect();
        assert!(metas.iter().any(|m| m.chunk_index == 0 && m.group == "fixed"));
        assert!(metas.iter().any(|m| m.chunk_index == 1 && m.group == "kept"));
    }

    #[tokio::test]
    async fn delete_removes_listed_ids() {
        let index = MemoryIndex::new();
        index
            .upsert(&[
                record("a.pdf", 0, "g", vec![1.0]),
                record("a.pdf", 1, "g", vec![1.0]),
            ])
            .await
            .unwrap();
        index.delete(&[chunk_id("a.pdf", 0)]).await.unwrap();
        assert_eq!(index.count().await.unwrap(), 1);
    }
}
