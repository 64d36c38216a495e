//! # Multi-KB RAG
//!
//! Retrieval-augmented chat over several independently managed knowledge
//! bases, with a semantic router that picks the right one from the question
//! alone.
//!
//! ## Architecture
//!
//! ```text
//!  upload ──▶ extract ─▶ metadata ─▶ chunk+embed ──▶ ┌──────────────┐
//!                                     │              │ kb_<name>    │  one collection per KB
//!                                     └─ describe ─▶ │ router index │  one entry per KB
//!                                                    └──────┬───────┘
//!  chat_global ─▶ route ─┐                                  │
//!  chat_with_kb ─────────┴─▶ condense ─▶ search ─▶ rerank ─▶ answer
//! ```
//!
//! The [`engine::Engine`] owns every component and is shared by the CLI,
//! the REST tool API and the MCP endpoint.
//!
//! ## Quick Start
//!
//! ```bash
//! mkb upload legal ./fees.txt
//! mkb chat --kb legal "What is the filing fee?"
//! mkb chat --global "What is the filing fee?"
//! mkb serve
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`engine`] | Engine context and caller-facing operations |
//! | [`collections`] | Knowledge-base lifecycle |
//! | [`router`] | Router index and query routing |
//! | [`ingest`] | Upload pipeline |
//! | [`chat`] | Conversational retrieval |
//! | [`session`] | Per-session chat memory |
//! | [`metadata`] | LLM metadata extraction |
//! | [`extract`] | PDF / text / DOCX text extraction |
//! | [`embedding`] | Embedding providers |
//! | [`llm`] | OpenAI-compatible chat model |
//! | [`rerank`] | Cross-encoder re-rankers |
//! | [`qdrant`] | Qdrant vector store |
//! | [`tools`] | Tool registry over the engine operations |
//! | [`mcp`] | MCP protocol bridge |
//! | [`server`] | HTTP server |

pub mod chat;
pub mod collections;
pub mod config;
pub mod embedding;
pub mod engine;
pub mod extract;
pub mod ingest;
pub mod llm;
pub mod mcp;
pub mod metadata;
pub mod qdrant;
pub mod rerank;
pub mod router;
pub mod server;
pub mod session;
pub mod tools;
