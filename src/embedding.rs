//! Embedding provider implementations.
//!
//! Concrete backends for the core [`EmbeddingProvider`] trait:
//! - **[`OpenAIProvider`]** calls an OpenAI-compatible `/embeddings` endpoint.
//! - **[`OllamaProvider`]** calls a local Ollama instance's `/api/embed`.
//! - **[`LocalProvider`]** runs a fastembed model in-process (feature
//!   `local-models`); no network calls after the model download.
//!
//! Every provider splits input into `batch_size` batches and L2-normalizes
//! the returned vectors, so cosine scores from the vector store are
//! comparable across providers.
//!
//! # Retry Strategy
//!
//! The HTTP providers use exponential backoff for transient errors:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

pub use multi_kb_rag_core::embedding::{normalize, EmbeddingProvider};

use crate::config::EmbeddingConfig;

/// Instantiate the provider named by `config.provider`.
pub fn create_provider(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "openai" => Ok(Arc::new(OpenAIProvider::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaProvider::new(config)?)),
        #[cfg(feature = "local-models")]
        "local" => Ok(Arc::new(LocalProvider::new(config)?)),
        #[cfg(not(feature = "local-models"))]
        "local" => bail!("Local embedding provider requires --features local-models"),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

/// Validate shape, then normalize every vector.
fn finish(mut vectors: Vec<Vec<f32>>, expected: usize, dims: usize) -> Result<Vec<Vec<f32>>> {
    if vectors.len() != expected {
        bail!(
            "embedding provider returned {} vectors for {} inputs",
            vectors.len(),
            expected
        );
    }
    for v in vectors.iter_mut() {
        if v.len() != dims {
            bail!(
                "embedding has {} dimensions, configured embedding.dims is {}",
                v.len(),
                dims
            );
        }
        normalize(v);
    }
    Ok(vectors)
}

/// POST `body` to `url` with retry/backoff, returning the parsed JSON reply.
async fn post_with_retry(
    client: &reqwest::Client,
    url: &str,
    bearer: Option<&str>,
    body: &Value,
    max_retries: u32,
    label: &str,
) -> Result<Value> {
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            debug!(attempt, ?delay, "{} retrying", label);
            tokio::time::sleep(delay).await;
        }

        let mut req = client.post(url).json(body);
        if let Some(key) = bearer {
            req = req.bearer_auth(key);
        }

        match req.send().await {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    return response
                        .json()
                        .await
                        .with_context(|| format!("{} returned invalid JSON", label));
                }

                let body_text = response.text().await.unwrap_or_default();
                if status.as_u16() == 429 || status.is_server_error() {
                    warn!(%status, "{} transient error", label);
                    last_err = Some(anyhow!("{} error {}: {}", label, status, body_text));
                    continue;
                }

                bail!("{} error {}: {}", label, status, body_text);
            }
            Err(e) => {
                warn!(error = %e, "{} connection error", label);
                last_err = Some(anyhow!("{} connection error ({}): {}", label, url, e));
            }
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow!("{} failed after retries", label)))
}

fn build_client(timeout_secs: u64) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .context("Failed to build HTTP client")
}

// ============ OpenAI Provider ============

/// Embedding provider for OpenAI-compatible APIs.
///
/// Reads the API key from the environment variable named by
/// `embedding.api_key_env` (default `OPENAI_API_KEY`).
pub struct OpenAIProvider {
    model: String,
    dims: usize,
    url: String,
    api_key: String,
    batch_size: usize,
    max_retries: u32,
    client: reqwest::Client,
}

impl OpenAIProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .map_err(|_| anyhow!("{} environment variable not set", config.api_key_env))?;
        let base = config
            .url
            .clone()
            .unwrap_or_else(|| "https://api.openai.com/v1".to_string());

        Ok(Self {
            model: config.model.clone(),
            dims: config.dims,
            url: format!("{}/embeddings", base.trim_end_matches('/')),
            api_key,
            batch_size: config.batch_size,
            max_retries: config.max_retries,
            client: build_client(config.timeout_secs)?,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIProvider {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size.max(1)) {
            let body = serde_json::json!({ "model": self.model, "input": batch });
            let json = post_with_retry(
                &self.client,
                &self.url,
                Some(&self.api_key),
                &body,
                self.max_retries,
                "OpenAI embeddings",
            )
            .await?;
            out.extend(parse_openai_response(&json)?);
        }
        finish(out, texts.len(), self.dims)
    }
}

/// Extract `data[].embedding`, ordered by `data[].index`.
fn parse_openai_response(json: &Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow!("Invalid OpenAI response: missing data array"))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (pos, item) in data.iter().enumerate() {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| anyhow!("Invalid OpenAI response: missing embedding"))?;
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(pos);
        indexed.push((index, to_f32_vec(embedding)));
    }
    indexed.sort_by_key(|(i, _)| *i);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

// ============ Ollama Provider ============

/// Embedding provider using a local Ollama instance (`POST /api/embed`).
pub struct OllamaProvider {
    model: String,
    dims: usize,
    url: String,
    batch_size: usize,
    max_retries: u32,
    client: reqwest::Client,
}

impl OllamaProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let base = config
            .url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string());
        Ok(Self {
            model: config.model.clone(),
            dims: config.dims,
            url: format!("{}/api/embed", base.trim_end_matches('/')),
            batch_size: config.batch_size,
            max_retries: config.max_retries,
            client: build_client(config.timeout_secs)?,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaProvider {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size.max(1)) {
            let body = serde_json::json!({ "model": self.model, "input": batch });
            let json = post_with_retry(
                &self.client,
                &self.url,
                None,
                &body,
                self.max_retries,
                "Ollama embeddings",
            )
            .await?;
            out.extend(parse_ollama_response(&json)?);
        }
        finish(out, texts.len(), self.dims)
    }
}

fn parse_ollama_response(json: &Value) -> Result<Vec<Vec<f32>>> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| anyhow!("Invalid Ollama response: missing embeddings array"))?;

    embeddings
        .iter()
        .map(|e| {
            e.as_array()
                .map(|a| to_f32_vec(a))
                .ok_or_else(|| anyhow!("Invalid Ollama response: embedding is not an array"))
        })
        .collect()
}

fn to_f32_vec(values: &[Value]) -> Vec<f32> {
    values
        .iter()
        .map(|v| v.as_f64().unwrap_or(0.0) as f32)
        .collect()
}

// ============ Local Provider (fastembed) ============

/// In-process embedding via fastembed. The model is downloaded from
/// Hugging Face on first use and cached.
#[cfg(feature = "local-models")]
pub struct LocalProvider {
    model_name: String,
    dims: usize,
    batch_size: usize,
    model: tokio::sync::OnceCell<Arc<std::sync::Mutex<fastembed::TextEmbedding>>>,
}

#[cfg(feature = "local-models")]
impl LocalProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        // Fail on unknown names at startup rather than on first upload.
        config_to_fastembed_model(&config.model)?;
        Ok(Self {
            model_name: config.model.clone(),
            dims: config.dims,
            batch_size: config.batch_size,
            model: tokio::sync::OnceCell::new(),
        })
    }

    async fn model(&self) -> Result<Arc<std::sync::Mutex<fastembed::TextEmbedding>>> {
        let name = self.model_name.clone();
        self.model
            .get_or_try_init(|| async move {
                let which = config_to_fastembed_model(&name)?;
                tokio::task::spawn_blocking(move || {
                    fastembed::TextEmbedding::try_new(
                        fastembed::InitOptions::new(which).with_show_download_progress(true),
                    )
                    .map(|m| Arc::new(std::sync::Mutex::new(m)))
                    .map_err(|e| anyhow!("Failed to initialize local embedding model: {}", e))
                })
                .await?
            })
            .await
            .cloned()
    }
}

#[cfg(feature = "local-models")]
#[async_trait]
impl EmbeddingProvider for LocalProvider {
    fn model_name(&self) -> &str {
        &self.model_name
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let model = self.model().await?;
        let batch_size = self.batch_size;
        let inputs = texts.to_vec();

        let vectors = tokio::task::spawn_blocking(move || {
            let mut guard = model
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            guard
                .embed(inputs, Some(batch_size))
                .map_err(|e| anyhow!("Local embedding failed: {}", e))
        })
        .await??;

        finish(vectors, texts.len(), self.dims)
    }
}

#[cfg(feature = "local-models")]
fn config_to_fastembed_model(name: &str) -> Result<fastembed::EmbeddingModel> {
    match name {
        "all-minilm-l6-v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
        "bge-small-en-v1.5" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
        "bge-base-en-v1.5" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
        "bge-large-en-v1.5" => Ok(fastembed::EmbeddingModel::BGELargeENV15),
        "multilingual-e5-small" => Ok(fastembed::EmbeddingModel::MultilingualE5Small),
        "multilingual-e5-base" => Ok(fastembed::EmbeddingModel::MultilingualE5Base),
        "multilingual-e5-large" => Ok(fastembed::EmbeddingModel::MultilingualE5Large),
        other => bail!(
            "Unknown local embedding model: '{}'. Supported models: \
             all-minilm-l6-v2, bge-small-en-v1.5, bge-base-en-v1.5, bge-large-en-v1.5, \
             multilingual-e5-small, multilingual-e5-base, multilingual-e5-large",
            other
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn openai_response_is_reordered_by_index() {
        let json = json!({
            "data": [
                { "index": 1, "embedding": [0.0, 1.0] },
                { "index": 0, "embedding": [1.0, 0.0] }
            ]
        });
        let v = parse_openai_response(&json).unwrap();
        assert_eq!(v, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[test]
    fn openai_response_without_data_errors() {
        assert!(parse_openai_response(&json!({ "error": "nope" })).is_err());
    }

    #[test]
    fn ollama_response_parses() {
        let v = parse_ollama_response(&json!({ "embeddings": [[3.0, 4.0]] })).unwrap();
        assert_eq!(v, vec![vec![3.0, 4.0]]);
        assert!(parse_ollama_response(&json!({ "embeddings": [1.0] })).is_err());
    }

    #[test]
    fn finish_normalizes_and_checks_shape() {
        let v = finish(vec![vec![3.0, 4.0]], 1, 2).unwrap();
        assert!((v[0][0] - 0.6).abs() < 1e-6);

        assert!(finish(vec![vec![1.0, 0.0]], 2, 2).is_err());
        assert!(finish(vec![vec![1.0, 0.0, 0.0]], 1, 2).is_err());
    }

    #[test]
    fn openai_requires_api_key() {
        let config = EmbeddingConfig {
            provider: "openai".into(),
            model: "text-embedding-3-small".into(),
            dims: 1536,
            url: None,
            api_key_env: "MKB_TEST_DEFINITELY_UNSET_KEY".into(),
            batch_size: 64,
            max_retries: 0,
            timeout_secs: 5,
        };
        let err = OpenAIProvider::new(&config).err().unwrap();
        assert!(err.to_string().contains("MKB_TEST_DEFINITELY_UNSET_KEY"));
    }
}
