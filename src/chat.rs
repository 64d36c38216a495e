//! Conversational retrieval over one knowledge base.
//!
//! The session lock is held from reading history until the new turn is
//! appended. A call that fails anywhere leaves the session untouched.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use multi_kb_rag_core::embedding::EmbeddingProvider;
use multi_kb_rag_core::llm::{condense_prompt, qa_prompt, ChatModel};
use multi_kb_rag_core::models::{Payload, PayloadFilter, ScoredPoint, Turn, CONTENT_KEY, METADATA_KEY, TYPE_KEY};
use multi_kb_rag_core::rerank::{rerank_top_n, Reranker};
use multi_kb_rag_core::scoring::{resolve_scores, Confidence};
use multi_kb_rag_core::store::VectorStore;
use multi_kb_rag_core::KbError;

use crate::config::RetrievalConfig;
use crate::engine::log_upstream;
use crate::metadata::truncate_chars;
use crate::session::SessionStore;

/// One retrieved passage surfaced with an answer.
#[derive(Debug, Clone, Serialize)]
pub struct Source {
    pub content: String,
    pub filename: String,
    pub page_number: u64,
    pub score: f64,
    pub confidence: Confidence,
    pub metadata: Payload,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatAnswer {
    pub kb_name: String,
    pub session_id: String,
    pub answer: String,
    pub sources: Vec<Source>,
}

pub struct RetrievalChat {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    reranker: Arc<dyn Reranker>,
    llm: Arc<dyn ChatModel>,
    sessions: Arc<SessionStore>,
    settings: RetrievalConfig,
}

fn content_of(point: &ScoredPoint) -> String {
    point
        .payload
        .get(CONTENT_KEY)
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string()
}

impl RetrievalChat {
    pub fn new(
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        reranker: Arc<dyn Reranker>,
        llm: Arc<dyn ChatModel>,
        sessions: Arc<SessionStore>,
        settings: RetrievalConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            reranker,
            llm,
            sessions,
            settings,
        }
    }

    /// Answer `query` from `collection`, which the caller has checked exists.
    /// `top_k` overrides the configured result count for this call.
    pub async fn chat(
        &self,
        kb_name: &str,
        collection: &str,
        query: &str,
        session_id: &str,
        top_k: Option<usize>,
    ) -> Result<ChatAnswer, KbError> {
        let handle = self.sessions.get_or_create(collection, session_id);
        let mut session = handle.lock().await;

        let history = session.history();
        let question = if history.is_empty() {
            query.to_string()
        } else {
            let condensed = self
                .llm
                .invoke(&condense_prompt(&history, query))
                .await
                .map_err(|e| log_upstream("condense question", e))?;
            let condensed = condensed.trim();
            debug!(session = session_id, standalone = condensed, "question condensed");
            if condensed.is_empty() {
                query.to_string()
            } else {
                condensed.to_string()
            }
        };

        let k = top_k.unwrap_or(self.settings.top_n).max(1);
        let n = self.settings.candidate_k.max(k);

        let vector = self
            .embedder
            .embed(&question)
            .await
            .map_err(|e| log_upstream("embed query", e))?;
        let hits = self
            .store
            .search(collection, &vector, n, Some(&PayloadFilter::documents_only()))
            .await
            .map_err(|e| log_upstream("vector search", e))?;

        let texts: Vec<String> = hits.iter().map(content_of).collect();
        let scores = match self.reranker.score(&question, &texts).await {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %format!("{:#}", e), "rerank failed, keeping vector order");
                None
            }
        };
        let ranked = rerank_top_n(hits, scores, k);
        let resolved = resolve_scores(&ranked.iter().map(|r| r.score).collect::<Vec<_>>());

        let context: Vec<String> = ranked.iter().map(|r| content_of(&r.item)).collect();
        let answer = self
            .llm
            .invoke(&qa_prompt(&context, &question))
            .await
            .map_err(|e| log_upstream("generate answer", e))?
            .trim()
            .to_string();

        session.append(Turn {
            question: query.to_string(),
            answer: answer.clone(),
        });
        drop(session);

        let sources: Vec<Source> = ranked
            .into_iter()
            .zip(resolved)
            .map(|(r, score)| self.source(&r.item, score))
            .collect();

        info!(
            kb = kb_name,
            session = session_id,
            candidates = texts.len(),
            sources = sources.len(),
            "chat answered"
        );
        Ok(ChatAnswer {
            kb_name: kb_name.to_string(),
            session_id: session_id.to_string(),
            answer,
            sources,
        })
    }

    fn source(&self, point: &ScoredPoint, score: f64) -> Source {
        let text = content_of(point);
        let preview = truncate_chars(&text, self.settings.preview_chars);
        let content = if preview.len() < text.len() {
            format!("{}...", preview)
        } else {
            text.clone()
        };

        let mut metadata = point
            .payload
            .get(METADATA_KEY)
            .and_then(|m| m.as_object())
            .cloned()
            .unwrap_or_default();
        metadata.remove(TYPE_KEY);

        Source {
            content,
            filename: metadata
                .get("filename")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            page_number: metadata
                .get("page_number")
                .and_then(Value::as_u64)
                .unwrap_or(0),
            score,
            confidence: Confidence::from_score(score),
            metadata,
        }
    }
}
