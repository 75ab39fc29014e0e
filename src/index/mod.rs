//! Vector index boundary.
//!
//! [`VectorIndex`] is the seam to the vector similarity engine: chunk rows go
//! in with embeddings and flat metadata, ranked candidates come out. Filters
//! are single-field equality matches, mirroring the flat field→value maps of
//! the external engine contract. Two backends ship with the crate:
//!
//! - [`SqliteIndex`] — vectors as little-endian f32 BLOBs in SQLite,
//!   brute-force cosine ranking; the default.
//! - [`MemoryIndex`] — `Vec` behind an `RwLock`; used by tests.
//!
//! Retrieval does not rerank: `top_k` is a large candidate cap (default 100)
//! and the retrieval assembler bounds what reaches the language model by
//! character budget, not by count.

pub mod memory;
pub mod sqlite;

pub use memory::MemoryIndex;
pub use sqlite::SqliteIndex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Flat metadata stored alongside each chunk vector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMeta {
    /// Stored name of the owning file.
    pub filename: String,
    pub original_filename: String,
    pub chunk_index: usize,
    /// The only mutable field; must mirror the owning file's group.
    pub group: String,
}

/// One indexed chunk: id, text, embedding, metadata.
#[derive(Debug, Clone)]
pub struct ChunkRecord {
    pub id: String,
    pub text: String,
    pub embedding: Vec<f32>,
    pub meta: ChunkMeta,
}

/// Chunk ids are `<stored_name>_<index>`, stable until the file is
/// re-chunked.
pub fn chunk_id(stored_name: &str, index: usize) -> String {
    format!("{stored_name}_{index}")
}

/// A ranked query result.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub text: String,
    pub meta: ChunkMeta,
    pub score: f32,
}

/// Equality match on a single metadata field.
#[derive(Debug, Clone)]
pub enum Filter {
    Filename(String),
    Group(String),
}

impl Filter {
    pub fn matches(&self, meta: &ChunkMeta) -> bool {
        match self {
            Filter::Filename(name) => meta.filename == *name,
            Filter::Group(group) => meta.group == *group,
        }
    }
}

/// Patch applied by [`VectorIndex::update`]. Carries the group field, the
/// only chunk metadata that changes after creation.
#[derive(Debug, Clone)]
pub struct MetaPatch {
    pub group: String,
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Insert or replace chunk rows by id.
    async fn upsert(&self, records: &[ChunkRecord]) -> Result<()>;

    /// Candidates ranked by cosine similarity, best first, capped at
    /// `top_k`.
    async fn query(
        &self,
        embedding: &[f32],
        top_k: usize,
        filter: Option<&Filter>,
    ) -> Result<Vec<ScoredChunk>>;

    /// Ids and metadata of matching chunks; `None` returns every chunk.
    async fn get(&self, filter: Option<&Filter>) -> Result<Vec<(String, ChunkMeta)>>;

    /// Apply `patch` to every listed id.
    async fn update(&self, ids: &[String], patch: &MetaPatch) -> Result<()>;

    async fn delete(&self, ids: &[String]) -> Result<()>;

    async fn count(&self) -> Result<u64>;
}

/// Encode a float vector as little-endian f32 bytes for BLOB storage.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB produced by [`vec_to_blob`].
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity in `[-1.0, 1.0]`. Empty or mismatched vectors score
/// `0.0`.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }
    dot / denom
}
