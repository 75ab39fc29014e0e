//! Retrieval assembler.
//!
//! Turns a question into an answer: embed the question, pull the top
//! candidates from the vector index (optionally scoped to a group),
//! deduplicate the source filenames, concatenate chunk texts into a
//! character-bounded context, and hand context plus raw question to the
//! chat model. The index's similarity ranking is trusted as-is — there is
//! no reranking — and the candidate volume is capped by character budget,
//! not count.

use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use crate::embedding::Embedder;
use crate::error::{Error, Result};
use crate::index::{Filter, VectorIndex};
use crate::llm::ChatModel;

const CHUNK_SEPARATOR: &str = "\n\n---\n\n";
const TRUNCATION_MARKER: &str = "\n...[content truncated]...";

#[derive(Debug, Serialize)]
pub struct Answer {
    pub answer: String,
    /// Stored names of the files the matched chunks came from, first-seen
    /// order, each at most once.
    pub source_files: Vec<String>,
}

pub struct Assembler {
    index: Arc<dyn VectorIndex>,
    embedder: Arc<dyn Embedder>,
    chat: Arc<dyn ChatModel>,
    top_k: usize,
    max_context_chars: usize,
}

impl Assembler {
    pub fn new(
        index: Arc<dyn VectorIndex>,
        embedder: Arc<dyn Embedder>,
        chat: Arc<dyn ChatModel>,
        top_k: usize,
        max_context_chars: usize,
    ) -> Self {
        Self {
            index,
            embedder,
            chat,
            top_k,
            max_context_chars,
        }
    }

    pub async fn answer(&self, question: &str, group: Option<&str>) -> Result<Answer> {
        let question = question.trim();
        if question.is_empty() {
            return Err(Error::Validation("question must not be empty".to_string()));
        }
        if self.index.count().await? == 0 {
            return Err(Error::Validation(
                "no documents available; upload a document first".to_string(),
            ));
        }

        let embedding = self.embedder.embed_query(question).await?;
        let filter = group.map(|g| Filter::Group(g.to_string()));
        let hits = self
            .index
            .query(&embedding, self.top_k, filter.as_ref())
            .await?;
        if hits.is_empty() {
            return Err(Error::Validation(
                "no relevant document content found".to_string(),
            ));
        }

        let mut source_files: Vec<String> = Vec::new();
        for hit in &hits {
            if !source_files.contains(&hit.meta.filename) {
                source_files.push(hit.meta.filename.clone());
            }
        }
        info!(chunks = hits.len(), sources = source_files.len(), "retrieved context");

        let combined = hits
            .iter()
            .map(|h| h.text.as_str())
            .collect::<Vec<_>>()
            .join(CHUNK_SEPARATOR);
        let combined = bound_context(&combined, self.max_context_chars);

        let answer = self
            .chat
            .complete(&instruction_context(&combined), question)
            .await?;
        Ok(Answer {
            answer,
            source_files,
        })
    }
}

/// Cap `text` at `max_chars` characters, appending a marker when cut.
fn bound_context(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars).collect();
    out.push_str(TRUNCATION_MARKER);
    out
}

fn instruction_context(content: &str) -> String {
    format!(
        "You are a document question-answering assistant. Answer the user's \
         question based on the document content below. If the question cannot \
         be answered from that content, say so explicitly. Keep answers \
         professional, accurate and concise.\n\n\
         Relevant document content:\n{content}\n\n\
         Additional rules:\n\
         1. Answer only from the provided document content\n\
         2. If the content is insufficient to answer, state that directly\n\
         3. Stay objective and accurate; do not add personal opinions\n\
         4. If information conflicts across documents, point out the conflict\n"
    )
}
