//! Ingestion pipeline and cross-store consistency operations.
//!
//! Three stores hold the state of one uploaded document: the file store owns
//! the bytes, the metadata store the file-level record, the vector index the
//! derived chunks. This module is the only writer allowed to touch more than
//! one of them in a single logical operation, and each operation mutates the
//! stores in a fixed order so that an interruption leaves a bounded, known
//! inconsistency instead of an arbitrary one.
//!
//! Upload rollback is deliberately asymmetric: a failure anywhere between
//! extraction and the metadata upsert deletes the just-persisted physical
//! file, but index and metadata writes that already happened are left in
//! place. Metadata reads default missing records, and the repair sweep
//! ([`Pipeline::fix_groups`]) is the reconciliation mechanism for the group
//! field. Full two-phase commit across the three stores is out of scope.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::chunk;
use crate::config::Config;
use crate::embedding::{self, Embedder};
use crate::error::{Error, Result};
use crate::extract;
use crate::index::{chunk_id, ChunkMeta, ChunkRecord, Filter, MetaPatch, SqliteIndex, VectorIndex};
use crate::metadata::{MetadataStore, DEFAULT_GROUP};
use crate::ocr::{self, OcrEngine};
use crate::store::{extension_of, FileStore};

/// One stored document as surfaced by `GET /files/`.
#[derive(Debug, Clone, Serialize)]
pub struct StoredFile {
    pub filename: String,
    pub original_filename: String,
    pub size: u64,
    pub upload_time: String,
    pub group: String,
}

/// What an upload produced.
#[derive(Debug)]
pub struct UploadOutcome {
    pub stored_name: String,
    pub original_name: String,
    pub text: String,
    pub chunk_count: usize,
}

pub struct Pipeline {
    files: FileStore,
    metadata: MetadataStore,
    index: Arc<dyn VectorIndex>,
    embedder: Arc<dyn Embedder>,
    ocr: Arc<dyn OcrEngine>,
    chunk_size: usize,
    overlap: usize,
}

impl Pipeline {
    pub fn new(
        files: FileStore,
        metadata: MetadataStore,
        index: Arc<dyn VectorIndex>,
        embedder: Arc<dyn Embedder>,
        ocr: Arc<dyn OcrEngine>,
        chunk_size: usize,
        overlap: usize,
    ) -> Self {
        Self {
            files,
            metadata,
            index,
            embedder,
            ocr,
            chunk_size,
            overlap,
        }
    }

    /// Assemble the pipeline from configuration: file and metadata stores
    /// under the storage root, the SQLite index, and the configured
    /// embedder and OCR engine.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let files = FileStore::new(&config.storage.root)?;
        let metadata = MetadataStore::new(&config.storage.root);
        let index = SqliteIndex::connect(&config.index.resolved_path(&config.storage.root)).await?;
        let embedder = embedding::create_embedder(&config.embedding)?;
        let ocr = ocr::create_engine(&config.ocr);
        Ok(Self::new(
            files,
            metadata,
            Arc::new(index),
            embedder,
            ocr,
            config.chunking.chunk_size,
            config.chunking.overlap,
        ))
    }

    pub fn index(&self) -> Arc<dyn VectorIndex> {
        Arc::clone(&self.index)
    }

    pub fn embedder(&self) -> Arc<dyn Embedder> {
        Arc::clone(&self.embedder)
    }

    /// Run the upload saga: validate the extension, persist the bytes,
    /// extract text, chunk, embed the batch, upsert chunks (tagged with the
    /// default group), upsert the file record. A failure after the bytes
    /// were persisted deletes the physical file and surfaces the typed
    /// error; see the module docs for what is and is not rolled back.
    pub async fn upload(&self, original_name: &str, bytes: &[u8]) -> Result<UploadOutcome> {
        let stored_name = self.files.save(original_name, bytes)?;
        info!(file = %stored_name, size = bytes.len(), "stored upload");

        match self.ingest(&stored_name, original_name).await {
            Ok((text, chunk_count)) => Ok(UploadOutcome {
                stored_name,
                original_name: original_name.to_string(),
                text,
                chunk_count,
            }),
            Err(err) => {
                if let Err(cleanup) = self.files.delete(&stored_name) {
                    warn!(file = %stored_name, "rollback delete failed: {cleanup}");
                }
                Err(err)
            }
        }
    }

    async fn ingest(&self, stored_name: &str, original_name: &str) -> Result<(String, usize)> {
        let ext = extension_of(stored_name)
            .ok_or_else(|| Error::Validation(format!("file has no extension: {stored_name}")))?;
        let path = self.files.path_of(stored_name);

        let text = extract::extract_text(&path, &ext, self.ocr.as_ref()).await?;
        info!(file = %stored_name, chars = text.chars().count(), "extracted text");

        // Zero chunks is a valid terminal state (empty document).
        let chunks = chunk::split(&text, self.chunk_size, self.overlap);
        if !chunks.is_empty() {
            let embeddings = self.embedder.embed(&chunks).await?;
            let records: Vec<ChunkRecord> = chunks
                .iter()
                .zip(embeddings)
                .enumerate()
                .map(|(i, (text, embedding))| ChunkRecord {
                    id: chunk_id(stored_name, i),
                    text: text.clone(),
                    embedding,
                    meta: ChunkMeta {
                        filename: stored_name.to_string(),
                        original_filename: original_name.to_string(),
                        chunk_index: i,
                        group: DEFAULT_GROUP.to_string(),
                    },
                })
                .collect();
            self.index.upsert(&records).await?;
        }

        self.metadata
            .upsert(stored_name, original_name, DEFAULT_GROUP)?;
        info!(file = %stored_name, chunks = chunks.len(), "indexed");
        Ok((text, chunks.len()))
    }

    /// Remove a document: physical file first, then its chunks, then the
    /// metadata record. An interruption after the file removal leaves
    /// orphan chunks; the fixed order keeps that the only possible gap.
    pub async fn delete(&self, stored_name: &str) -> Result<()> {
        self.files.delete(stored_name)?;

        let filter = Filter::Filename(stored_name.to_string());
        let ids: Vec<String> = self
            .index
            .get(Some(&filter))
            .await?
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        if !ids.is_empty() {
            self.index.delete(&ids).await?;
        }

        self.metadata.remove(stored_name)?;
        info!(file = %stored_name, chunks = ids.len(), "deleted");
        Ok(())
    }

    /// Rename a document: file store first (fails fast on a missing source
    /// or occupied target), then the metadata key.
    ///
    /// Chunk ids and `meta.filename` are left untouched on purpose: chunks
    /// of a renamed file keep the old stored name and are no longer
    /// reachable through filename filters until the file is uploaded again.
    /// Extending rename to re-tag chunks would change observable behavior,
    /// so the gap is documented rather than fixed.
    pub fn rename(&self, old: &str, new: &str) -> Result<()> {
        self.files.rename(old, new)?;
        self.metadata.rename_key(old, new)?;
        info!(from = %old, to = %new, "renamed");
        Ok(())
    }

    /// Reassign a document's group: metadata record first, then every chunk
    /// with `filename == stored_name`. A file with zero chunks succeeds.
    pub async fn set_group(&self, stored_name: &str, group: &str) -> Result<()> {
        if !self.files.exists(stored_name) {
            return Err(Error::NotFound(format!("file not found: {stored_name}")));
        }
        self.metadata.set_group(stored_name, group)?;

        let filter = Filter::Filename(stored_name.to_string());
        let ids: Vec<String> = self
            .index
            .get(Some(&filter))
            .await?
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        if !ids.is_empty() {
            self.index
                .update(
                    &ids,
                    &MetaPatch {
                        group: group.to_string(),
                    },
                )
                .await?;
        }
        info!(file = %stored_name, group = %group, chunks = ids.len(), "regrouped");
        Ok(())
    }

    /// Repair sweep: patch every chunk whose group field is missing or
    /// empty to the default group, in one batch. Idempotent, safe to run
    /// repeatedly, never consults the metadata store. Returns the number of
    /// chunks patched.
    pub async fn fix_groups(&self) -> Result<u64> {
        let ids: Vec<String> = self
            .index
            .get(None)
            .await?
            .into_iter()
            .filter(|(_, meta)| meta.group.trim().is_empty())
            .map(|(id, _)| id)
            .collect();
        if ids.is_empty() {
            return Ok(0);
        }
        self.index
            .update(
                &ids,
                &MetaPatch {
                    group: DEFAULT_GROUP.to_string(),
                },
            )
            .await?;
        info!(fixed = ids.len(), "repaired chunk group fields");
        Ok(ids.len() as u64)
    }

    /// Stored files newest first, enriched with metadata records (defaulted
    /// where absent).
    pub fn list_files(&self) -> Result<Vec<StoredFile>> {
        let records = self.metadata.load()?;
        Ok(self
            .files
            .list()?
            .into_iter()
            .map(|entry| {
                let record = records.get(&entry.name);
                StoredFile {
                    original_filename: record
                        .map(|r| r.original_filename.clone())
                        .unwrap_or_else(|| entry.name.clone()),
                    group: record
                        .map(|r| r.group.clone())
                        .unwrap_or_else(|| DEFAULT_GROUP.to_string()),
                    upload_time: entry.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
                    size: entry.size,
                    filename: entry.name,
                }
            })
            .collect())
    }

    pub fn groups(&self) -> Result<BTreeMap<String, Vec<String>>> {
        self.metadata.groups()
    }
}
