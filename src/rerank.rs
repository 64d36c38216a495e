//! Cross-encoder re-ranker backends.
//!
//! | Provider | Backend |
//! |----------|---------|
//! | `local` | fastembed `TextRerank` (default model `bge-reranker-v2-m3`) |
//! | `ollama` | `POST /api/rerank` on an Ollama-compatible server |
//! | `disabled` | no scores; results keep vector order with rank fallback scores |

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

pub use multi_kb_rag_core::rerank::Reranker;

use crate::config::RerankerConfig;

pub fn create_reranker(config: &RerankerConfig) -> Result<Arc<dyn Reranker>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledReranker)),
        "ollama" => Ok(Arc::new(OllamaReranker::new(config)?)),
        #[cfg(feature = "local-models")]
        "local" => Ok(Arc::new(LocalReranker::new(config)?)),
        #[cfg(not(feature = "local-models"))]
        "local" => bail!("Local reranker requires --features local-models"),
        other => bail!("Unknown reranker provider: {}", other),
    }
}

/// Produces no scores.
pub struct DisabledReranker;

#[async_trait]
impl Reranker for DisabledReranker {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn score(&self, _query: &str, _documents: &[String]) -> Result<Option<Vec<f32>>> {
        Ok(None)
    }
}

// ============ Ollama ============

pub struct OllamaReranker {
    client: reqwest::Client,
    url: String,
    model: String,
}

impl OllamaReranker {
    pub fn new(config: &RerankerConfig) -> Result<Self> {
        let base = config
            .url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string());
        Ok(Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(config.timeout_secs))
                .build()
                .context("Failed to build HTTP client")?,
            url: format!("{}/api/rerank", base.trim_end_matches('/')),
            model: config.model.clone(),
        })
    }
}

#[derive(Deserialize)]
struct RerankResponse {
    results: Vec<RerankResult>,
}

#[derive(Deserialize)]
struct RerankResult {
    /// Absent on servers that answer in input order.
    #[serde(default)]
    index: Option<usize>,
    relevance_score: f32,
}

#[async_trait]
impl Reranker for OllamaReranker {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn score(&self, query: &str, documents: &[String]) -> Result<Option<Vec<f32>>> {
        if documents.is_empty() {
            return Ok(Some(Vec::new()));
        }

        debug!(count = documents.len(), "reranking via Ollama");
        let response = self
            .client
            .post(&self.url)
            .json(&json!({
                "model": self.model,
                "query": query,
                "documents": documents,
            }))
            .send()
            .await
            .context("Failed to call Ollama rerank API")?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            warn!("Ollama /api/rerank endpoint not available, results keep vector order");
            return Ok(None);
        }
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            bail!("Ollama rerank API error (status {}): {}", status, text);
        }

        let parsed: RerankResponse = response
            .json()
            .await
            .context("Failed to parse Ollama rerank response")?;
        Ok(scores_by_index(parsed.results, documents.len()))
    }
}

/// Scatter `(index, score)` pairs back into input order. Any gap means the
/// server answered for a different document set, so no scores are used.
fn scores_by_index(results: Vec<RerankResult>, len: usize) -> Option<Vec<f32>> {
    let mut scores = vec![None; len];
    for (pos, r) in results.into_iter().enumerate() {
        if let Some(slot) = scores.get_mut(r.index.unwrap_or(pos)) {
            *slot = Some(r.relevance_score);
        }
    }
    scores.into_iter().collect()
}

// ============ Local (fastembed) ============

/// Map a cross-encoder logit onto a [0, 1] relevance score.
#[cfg_attr(not(feature = "local-models"), allow(dead_code))]
fn sigmoid(logit: f32) -> f32 {
    1.0 / (1.0 + (-logit).exp())
}

#[cfg(feature = "local-models")]
pub struct LocalReranker {
    model_name: String,
    model: tokio::sync::OnceCell<Arc<std::sync::Mutex<fastembed::TextRerank>>>,
}

#[cfg(feature = "local-models")]
impl LocalReranker {
    pub fn new(config: &RerankerConfig) -> Result<Self> {
        config_to_fastembed_reranker(&config.model)?;
        Ok(Self {
            model_name: config.model.clone(),
            model: tokio::sync::OnceCell::new(),
        })
    }

    async fn model(&self) -> Result<Arc<std::sync::Mutex<fastembed::TextRerank>>> {
        let name = self.model_name.clone();
        self.model
            .get_or_try_init(|| async move {
                let which = config_to_fastembed_reranker(&name)?;
                tokio::task::spawn_blocking(move || {
                    fastembed::TextRerank::try_new(
                        fastembed::RerankInitOptions::new(which)
                            .with_show_download_progress(true),
                    )
                    .map(|m| Arc::new(std::sync::Mutex::new(m)))
                    .map_err(|e| anyhow::anyhow!("Failed to initialize local reranker: {}", e))
                })
                .await?
            })
            .await
            .cloned()
    }
}

#[cfg(feature = "local-models")]
#[async_trait]
impl Reranker for LocalReranker {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    async fn score(&self, query: &str, documents: &[String]) -> Result<Option<Vec<f32>>> {
        if documents.is_empty() {
            return Ok(Some(Vec::new()));
        }
        let model = self.model().await?;
        let query = query.to_string();
        let docs = documents.to_vec();
        let len = docs.len();

        let results = tokio::task::spawn_blocking(move || {
            let mut guard = model
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            let refs: Vec<&str> = docs.iter().map(String::as_str).collect();
            guard
                .rerank(query.as_str(), refs, false, None)
                .map_err(|e| anyhow::anyhow!("Local rerank failed: {}", e))
        })
        .await??;

        let pairs = results
            .into_iter()
            .map(|r| RerankResult {
                index: Some(r.index),
                relevance_score: sigmoid(r.score),
            })
            .collect();
        Ok(scores_by_index(pairs, len))
    }
}

#[cfg(feature = "local-models")]
fn config_to_fastembed_reranker(name: &str) -> Result<fastembed::RerankerModel> {
    match name {
        "bge-reranker-v2-m3" => Ok(fastembed::RerankerModel::BGERerankerV2M3),
        "bge-reranker-base" => Ok(fastembed::RerankerModel::BGERerankerBase),
        other => bail!(
            "Unknown local reranker model: '{}'. Supported models: \
             bge-reranker-v2-m3, bge-reranker-base",
            other
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scores_are_scattered_into_input_order() {
        let results = vec![
            RerankResult {
                index: Some(2),
                relevance_score: 0.9,
            },
            RerankResult {
                index: Some(0),
                relevance_score: 0.1,
            },
            RerankResult {
                index: Some(1),
                relevance_score: 0.5,
            },
        ];
        assert_eq!(scores_by_index(results, 3), Some(vec![0.1, 0.5, 0.9]));
    }

    #[test]
    fn positional_results_keep_input_order() {
        let results = vec![
            RerankResult {
                index: None,
                relevance_score: 0.3,
            },
            RerankResult {
                index: None,
                relevance_score: 0.7,
            },
        ];
        assert_eq!(scores_by_index(results, 2), Some(vec![0.3, 0.7]));
    }

    #[test]
    fn incomplete_results_yield_no_scores() {
        let results = vec![RerankResult {
            index: Some(0),
            relevance_score: 0.1,
        }];
        assert_eq!(scores_by_index(results, 2), None);
    }

    #[test]
    fn logits_map_into_unit_interval() {
        assert_eq!(sigmoid(0.0), 0.5);
        assert!(sigmoid(8.0) > 0.99 && sigmoid(8.0) <= 1.0);
        assert!(sigmoid(-8.0) < 0.01 && sigmoid(-8.0) >= 0.0);

        let results = [3.2f32, -1.5, 0.4]
            .iter()
            .enumerate()
            .map(|(i, &logit)| RerankResult {
                index: Some(i),
                relevance_score: sigmoid(logit),
            })
            .collect();
        let scores = scores_by_index(results, 3).unwrap();
        assert!(scores.iter().all(|s| (0.0..=1.0).contains(s)));
        assert!(scores[0] > scores[2] && scores[2] > scores[1]);
    }

    #[tokio::test]
    async fn disabled_returns_none() {
        let r = DisabledReranker;
        assert!(r.score("q", &["a".into()]).await.unwrap().is_none());
    }
}
