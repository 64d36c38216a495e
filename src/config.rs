//! TOML configuration parsing and validation.
//!
//! Every section has defaults except `[embedding]`, `[llm]` and
//! `[reranker]`, whose models must be chosen explicitly. See
//! `config/mkb.example.toml` for a complete file.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub vector_store: VectorStoreConfig,
    pub embedding: EmbeddingConfig,
    pub llm: LlmConfig,
    #[serde(default)]
    pub reranker: RerankerConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub sessions: SessionConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct VectorStoreConfig {
    /// `"qdrant"` or `"memory"`.
    #[serde(default = "default_store_provider")]
    pub provider: String,
    #[serde(default = "default_qdrant_url")]
    pub url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            provider: default_store_provider(),
            url: default_qdrant_url(),
            api_key: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_store_provider() -> String {
    "qdrant".to_string()
}
fn default_qdrant_url() -> String {
    "http://localhost:6333".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// `"openai"`, `"ollama"` or `"local"`.
    pub provider: String,
    pub model: String,
    pub dims: usize,
    /// Base URL; defaults per provider.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    /// OpenAI-compatible base URL, e.g. `https://api.openai.com/v1`.
    pub base_url: String,
    pub model: String,
    /// Name of the environment variable holding the API key.
    #[serde(default = "default_llm_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_llm_retries")]
    pub max_retries: u32,
}

fn default_llm_key_env() -> String {
    "LLM_API_KEY".to_string()
}
fn default_max_tokens() -> u32 {
    1500
}
fn default_temperature() -> f32 {
    0.5
}
fn default_llm_timeout() -> u64 {
    120
}
fn default_llm_retries() -> u32 {
    2
}

#[derive(Debug, Deserialize, Clone)]
pub struct RerankerConfig {
    /// `"local"`, `"ollama"` or `"disabled"`.
    #[serde(default = "default_reranker_provider")]
    pub provider: String,
    #[serde(default = "default_reranker_model")]
    pub model: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
}

impl Default for RerankerConfig {
    fn default() -> Self {
        Self {
            provider: default_reranker_provider(),
            model: default_reranker_model(),
            url: None,
            timeout_secs: default_llm_timeout(),
        }
    }
}

fn default_reranker_provider() -> String {
    if cfg!(feature = "local-models") {
        "local".to_string()
    } else {
        "disabled".to_string()
    }
}
fn default_reranker_model() -> String {
    "bge-reranker-v2-m3".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    1000
}
fn default_chunk_overlap() -> usize {
    200
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Candidates fetched by vector search before re-ranking (N).
    #[serde(default = "default_candidate_k")]
    pub candidate_k: usize,
    /// Results kept after re-ranking (K).
    #[serde(default = "default_top_n")]
    pub top_n: usize,
    /// Default `top_k` advertised to tool callers.
    #[serde(default = "default_top_k")]
    pub default_top_k: usize,
    #[serde(default = "default_preview_chars")]
    pub preview_chars: usize,
    #[serde(default = "default_metadata_budget")]
    pub metadata_char_budget: usize,
    #[serde(default = "default_router_threshold")]
    pub router_threshold: f32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            candidate_k: default_candidate_k(),
            top_n: default_top_n(),
            default_top_k: default_top_k(),
            preview_chars: default_preview_chars(),
            metadata_char_budget: default_metadata_budget(),
            router_threshold: default_router_threshold(),
        }
    }
}

fn default_candidate_k() -> usize {
    10
}
fn default_top_n() -> usize {
    3
}
fn default_top_k() -> usize {
    5
}
fn default_preview_chars() -> usize {
    200
}
fn default_metadata_budget() -> usize {
    4000
}
fn default_router_threshold() -> f32 {
    0.4
}

#[derive(Debug, Deserialize, Clone)]
pub struct SessionConfig {
    /// Most recent turns kept per session; 0 keeps everything.
    #[serde(default = "default_max_turns")]
    pub max_turns: usize,
    /// Idle seconds before a session is dropped; 0 never expires.
    #[serde(default = "default_idle_ttl")]
    pub idle_ttl_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_turns: default_max_turns(),
            idle_ttl_secs: default_idle_ttl(),
        }
    }
}

fn default_max_turns() -> usize {
    20
}
fn default_idle_ttl() -> u64 {
    3600
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8000".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Parse and validate configuration text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    match config.vector_store.provider.as_str() {
        "qdrant" | "memory" => {}
        other => bail!(
            "Unknown vector store provider: '{}'. Must be qdrant or memory.",
            other
        ),
    }

    match config.embedding.provider.as_str() {
        "openai" | "ollama" | "local" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be openai, ollama, or local.",
            other
        ),
    }
    if config.embedding.dims == 0 {
        bail!("embedding.dims must be > 0");
    }
    if config.embedding.batch_size == 0 {
        bail!("embedding.batch_size must be > 0");
    }

    match config.reranker.provider.as_str() {
        "local" | "ollama" | "disabled" => {}
        other => bail!(
            "Unknown reranker provider: '{}'. Must be local, ollama, or disabled.",
            other
        ),
    }

    if config.chunking.chunk_size == 0 {
        bail!("chunking.chunk_size must be > 0");
    }
    if config.chunking.chunk_overlap >= config.chunking.chunk_size {
        bail!("chunking.chunk_overlap must be smaller than chunking.chunk_size");
    }

    let r = &config.retrieval;
    if r.top_n == 0 {
        bail!("retrieval.top_n must be >= 1");
    }
    if r.top_n > r.candidate_k {
        bail!(
            "retrieval.top_n ({}) must not exceed retrieval.candidate_k ({})",
            r.top_n,
            r.candidate_k
        );
    }
    if !(0.0..=1.0).contains(&r.router_threshold) {
        bail!("retrieval.router_threshold must be in [0.0, 1.0]");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const MINIMAL: &str = r#"
[embedding]
provider = "ollama"
model = "bge-m3"
dims = 1024

[llm]
base_url = "http://localhost:11434/v1"
model = "llama3.1"
"#;

    #[test]
    fn minimal_config_gets_defaults() {
        let c = parse_config(MINIMAL).unwrap();
        assert_eq!(c.vector_store.provider, "qdrant");
        assert_eq!(c.chunking.chunk_size, 1000);
        assert_eq!(c.chunking.chunk_overlap, 200);
        assert_eq!(c.retrieval.candidate_k, 10);
        assert_eq!(c.retrieval.top_n, 3);
        assert_eq!(c.retrieval.preview_chars, 200);
        assert_eq!(c.retrieval.router_threshold, 0.4);
        assert_eq!(c.llm.max_tokens, 1500);
        assert_eq!(c.llm.timeout_secs, 120);
        let expected_reranker = if cfg!(feature = "local-models") {
            "local"
        } else {
            "disabled"
        };
        assert_eq!(c.reranker.provider, expected_reranker);
        assert_eq!(c.sessions.max_turns, 20);
        assert_eq!(c.server.bind, "127.0.0.1:8000");
    }

    #[test]
    fn rejects_overlap_not_below_size() {
        let text = format!("{}\n[chunking]\nchunk_size = 100\nchunk_overlap = 100\n", MINIMAL);
        let err = parse_config(&text).unwrap_err();
        assert!(err.to_string().contains("chunk_overlap"));
    }

    #[test]
    fn rejects_top_n_above_candidates() {
        let text = format!("{}\n[retrieval]\ncandidate_k = 2\ntop_n = 3\n", MINIMAL);
        assert!(parse_config(&text).is_err());
    }

    #[test]
    fn rejects_unknown_providers() {
        let text = MINIMAL.replace("\"ollama\"", "\"cohere\"");
        let err = parse_config(&text).unwrap_err();
        assert!(err.to_string().contains("cohere"));

        let text = format!("{}\n[vector_store]\nprovider = \"pinecone\"\n", MINIMAL);
        assert!(parse_config(&text).is_err());
    }

    #[test]
    fn rejects_zero_dims() {
        let text = MINIMAL.replace("dims = 1024", "dims = 0");
        assert!(parse_config(&text).is_err());
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(MINIMAL.as_bytes()).unwrap();
        let c = load_config(file.path()).unwrap();
        assert_eq!(c.embedding.model, "bge-m3");
    }

    #[test]
    fn missing_file_has_context() {
        let err = load_config(Path::new("/nonexistent/mkb.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }

    #[test]
    fn shipped_example_config_is_valid() {
        let c = parse_config(include_str!("../config/mkb.example.toml")).unwrap();
        assert_eq!(c.vector_store.provider, "qdrant");
        assert_eq!(c.retrieval.default_top_k, 5);
        assert!(c.retrieval.top_n <= c.retrieval.candidate_k);
    }
}
