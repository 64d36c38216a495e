//! # Multi-KB RAG Core
//!
//! Shared, I/O-free logic for Multi-KB RAG: data models, knowledge-base
//! naming, metadata parsing and layered merging, relevance scoring, the
//! overlapping text splitter, and the traits through which the engine talks
//! to its external collaborators (embedding provider, chat model, re-ranker,
//! vector store).
//!
//! This crate contains no tokio, reqwest, or filesystem I/O. Concrete
//! collaborators live in the `multi-kb-rag` app crate; the in-memory
//! [`store::memory::InMemoryVectorStore`] lives here so tests and the
//! `memory` backend can share it.

pub mod chunk;
pub mod embedding;
pub mod error;
pub mod llm;
pub mod metadata;
pub mod models;
pub mod naming;
pub mod rerank;
pub mod scoring;
pub mod store;

pub use error::KbError;
