//! Deterministic collaborators for driving the engine without a network.

#![allow(dead_code)]

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use serde_json::json;

use multi_kb_rag::engine::{Components, Engine, EngineSettings};
use multi_kb_rag::extract::{DocumentExtractor, MIME_TEXT};
use multi_kb_rag::ingest::UploadRequest;
use multi_kb_rag_core::embedding::{normalize, EmbeddingProvider};
use multi_kb_rag_core::llm::ChatModel;
use multi_kb_rag_core::models::{
    CollectionStats, Payload, PayloadFilter, PointRecord, ScoredPoint, CONTENT_KEY,
};
use multi_kb_rag_core::rerank::Reranker;
use multi_kb_rag_core::store::memory::InMemoryVectorStore;
use multi_kb_rag_core::store::VectorStore;

pub const DIMS: usize = 1024;

fn words(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .collect()
}

/// Hashed bag-of-words, L2-normalized.
pub struct HashEmbedder;

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    fn model_name(&self) -> &str {
        "hash-bow"
    }

    fn dims(&self) -> usize {
        DIMS
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|t| {
                let mut v = vec![0.0f32; DIMS];
                for w in words(t) {
                    let mut h = DefaultHasher::new();
                    w.hash(&mut h);
                    v[(h.finish() as usize) % DIMS] += 1.0;
                }
                normalize(&mut v);
                v
            })
            .collect())
    }
}

/// Scores each document by the share of query words it contains.
pub struct LexicalReranker;

#[async_trait]
impl Reranker for LexicalReranker {
    fn model_name(&self) -> &str {
        "lexical"
    }

    async fn score(&self, query: &str, documents: &[String]) -> Result<Option<Vec<f32>>> {
        let q = words(query);
        if q.is_empty() {
            return Ok(Some(vec![0.0; documents.len()]));
        }
        Ok(Some(
            documents
                .iter()
                .map(|d| {
                    let dw = words(d);
                    q.iter().filter(|w| dw.contains(w)).count() as f32 / q.len() as f32
                })
                .collect(),
        ))
    }
}

/// Prompt-aware scripted LLM.
///
/// * classification prompts: the excerpt's first line becomes the title,
///   unless a raw reply is forced with [`FakeLlm::set_metadata_reply`];
/// * condense prompts: echo the latest question;
/// * answer prompts: echo the context block.
#[derive(Default)]
pub struct FakeLlm {
    prompts: Mutex<Vec<String>>,
    metadata_reply: Mutex<Option<String>>,
    fail_answers: AtomicBool,
}

pub const SEPARATOR: &str = "---------------------";

impl FakeLlm {
    pub fn set_metadata_reply(&self, reply: &str) {
        *self.metadata_reply.lock().unwrap() = Some(reply.to_string());
    }

    pub fn fail_answers(&self, fail: bool) {
        self.fail_answers.store(fail, Ordering::SeqCst);
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    pub fn condense_calls(&self) -> usize {
        self.prompts()
            .iter()
            .filter(|p| p.starts_with("Given the chat history"))
            .count()
    }
}

fn between<'a>(s: &'a str, start: &str, end: &str) -> &'a str {
    let Some(i) = s.find(start) else { return "" };
    let rest = &s[i + start.len()..];
    match rest.find(end) {
        Some(j) => &rest[..j],
        None => rest,
    }
}

#[async_trait]
impl ChatModel for FakeLlm {
    fn model_name(&self) -> &str {
        "fake"
    }

    async fn invoke(&self, prompt: &str) -> Result<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());

        if prompt.contains("document classification assistant") {
            if let Some(reply) = self.metadata_reply.lock().unwrap().clone() {
                return Ok(reply);
            }
            let excerpt = between(prompt, &format!("{}\n", SEPARATOR), &format!("\n{}", SEPARATOR));
            let title = excerpt.lines().next().unwrap_or("").trim();
            return Ok(format!(
                "```json\n{}\n```",
                json!({
                    "doc_type": "Document",
                    "category": "General",
                    "status": "Published",
                    "title": title,
                })
            ));
        }

        if prompt.starts_with("Given the chat history") {
            return Ok(between(prompt, "Latest question: ", "\n").to_string());
        }

        if self.fail_answers.load(Ordering::SeqCst) {
            bail!("LLM request timed out");
        }
        let context = between(prompt, "Context:\n", "\n\nQuestion:");
        Ok(format!("According to the documents: {}", context))
    }
}

/// Returns one vector fewer than it was asked for.
pub struct ShortEmbedder;

#[async_trait]
impl EmbeddingProvider for ShortEmbedder {
    fn model_name(&self) -> &str {
        "short"
    }

    fn dims(&self) -> usize {
        DIMS
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = HashEmbedder.embed_batch(texts).await?;
        vectors.pop();
        Ok(vectors)
    }
}

/// In-memory store whose writes of document chunks fail, as an unreachable
/// backend would. Collection and sentinel writes go through.
pub struct ChunkRejectingStore {
    pub inner: InMemoryVectorStore,
}

#[async_trait]
impl VectorStore for ChunkRejectingStore {
    async fn create_collection(&self, name: &str, dims: usize) -> Result<()> {
        self.inner.create_collection(name, dims).await
    }

    async fn describe_collection(&self, name: &str) -> Result<Option<CollectionStats>> {
        self.inner.describe_collection(name).await
    }

    async fn list_collections(&self) -> Result<Vec<String>> {
        self.inner.list_collections().await
    }

    async fn delete_collection(&self, name: &str) -> Result<()> {
        self.inner.delete_collection(name).await
    }

    async fn upsert(&self, collection: &str, points: Vec<PointRecord>) -> Result<()> {
        if points.iter().any(|p| p.payload.contains_key(CONTENT_KEY)) {
            return Err(anyhow!("connection refused"));
        }
        self.inner.upsert(collection, points).await
    }

    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        limit: usize,
        filter: Option<&PayloadFilter>,
    ) -> Result<Vec<ScoredPoint>> {
        self.inner.search(collection, vector, limit, filter).await
    }

    async fn scroll(
        &self,
        collection: &str,
        filter: &PayloadFilter,
        limit: usize,
    ) -> Result<Vec<PointRecord>> {
        self.inner.scroll(collection, filter, limit).await
    }

    async fn delete_points(&self, collection: &str, ids: &[String]) -> Result<()> {
        self.inner.delete_points(collection, ids).await
    }
}

/// Engine over caller-chosen store and embedder, with the scripted LLM.
pub fn engine_over(
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn EmbeddingProvider>,
) -> (Engine, Arc<FakeLlm>) {
    let llm = Arc::new(FakeLlm::default());
    let engine = Engine::new(
        EngineSettings::default(),
        Components {
            store,
            embedder,
            llm: llm.clone(),
            reranker: Arc::new(LexicalReranker),
            extractor: Arc::new(DocumentExtractor),
        },
    );
    (engine, llm)
}

pub struct Harness {
    pub engine: Engine,
    pub store: Arc<InMemoryVectorStore>,
    pub llm: Arc<FakeLlm>,
}

pub fn harness() -> Harness {
    harness_with(EngineSettings::default(), Arc::new(LexicalReranker))
}

pub fn harness_with(settings: EngineSettings, reranker: Arc<dyn Reranker>) -> Harness {
    let store = Arc::new(InMemoryVectorStore::new());
    let llm = Arc::new(FakeLlm::default());
    let engine = Engine::new(
        settings,
        Components {
            store: store.clone(),
            embedder: Arc::new(HashEmbedder),
            llm: llm.clone(),
            reranker,
            extractor: Arc::new(DocumentExtractor),
        },
    );
    Harness { engine, store, llm }
}

pub fn text_upload(kb_name: &str, filename: &str, text: &str, auto_create: bool) -> UploadRequest {
    UploadRequest {
        kb_name: kb_name.to_string(),
        filename: filename.to_string(),
        content_type: MIME_TEXT.to_string(),
        bytes: text.as_bytes().to_vec(),
        auto_create,
        metadata: Payload::new(),
    }
}
