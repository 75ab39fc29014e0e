//! # docqa
//!
//! A document question-answering service: upload docx, xlsx and PDF
//! documents, have them chunked and embedded into a vector index, and ask
//! natural-language questions answered by retrieval-augmented generation
//! against an external chat-completion model.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌───────────────────────────────┐   ┌──────────────┐
//! │  Upload  │──▶│  Pipeline                     │──▶│ File store   │
//! │ (HTTP /  │   │  extract → chunk → embed →    │   │ Metadata     │
//! │  CLI)    │   │  index + metadata, in order   │   │ Vector index │
//! └──────────┘   └───────────────────────────────┘   └──────┬───────┘
//!                                                           │
//! ┌──────────┐   ┌───────────────────────────────┐          │
//! │ Question │──▶│  Assembler                    │◀─────────┘
//! │          │   │  query → dedup → context →    │
//! │          │   │  chat completion              │
//! └──────────┘   └───────────────────────────────┘
//! ```
//!
//! Three stores hold a document's state — physical bytes, the file-level
//! metadata record, and the chunk rows in the vector index. The pipeline is
//! the only component that writes to more than one of them per operation;
//! [`pipeline`] documents the ordering and the deliberate rollback
//! asymmetry.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`error`] | Typed error taxonomy with the HTTP status mapping |
//! | [`chunk`] | Sliding-window text chunker |
//! | [`store`] | Physical file store with collision-free names |
//! | [`metadata`] | Flat JSON record set: stored name → original name, group |
//! | [`index`] | `VectorIndex` seam with SQLite and in-memory backends |
//! | [`embedding`] | `Embedder` seam: hashed offline, OpenAI-compatible, Ollama |
//! | [`extract`] | docx/xlsx/PDF text extraction with per-page OCR fallback |
//! | [`ocr`] | External-command OCR engine |
//! | [`llm`] | Chat-completion client and the held API credential |
//! | [`pipeline`] | Ingestion saga and cross-store consistency operations |
//! | [`answer`] | Retrieval assembler |
//! | [`server`] | HTTP surface |

pub mod answer;
pub mod chunk;
pub mod config;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod index;
pub mod llm;
pub mod metadata;
pub mod ocr;
pub mod pipeline;
pub mod server;
pub mod store;
