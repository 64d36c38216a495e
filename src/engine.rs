//! The engine context and its caller-facing operations.
//!
//! [`Engine`] is built once at startup and shared by every transport (CLI,
//! REST tools, MCP). Each operation returns an [`OpResult`]: a `success`
//! flag plus either a result payload or a `message`, never an error.
//!
//! | Operation | Failure kinds |
//! |-----------|---------------|
//! | [`create_collection`](Engine::create_collection) | `already_exists`, `invalid_input`, `upstream_failure` |
//! | [`list_collections`](Engine::list_collections) | `upstream_failure` |
//! | [`get_collection_info`](Engine::get_collection_info) | `not_found`, `upstream_failure` |
//! | [`upload_document`](Engine::upload_document) | `not_found`, `extraction_failure`, `upstream_failure` |
//! | [`chat_with_kb`](Engine::chat_with_kb) | `not_found`, `upstream_failure` |
//! | [`chat_global`](Engine::chat_global) | `not_found`, `upstream_failure` |
//! | [`clear_chat_history`](Engine::clear_chat_history) | `not_found` |
//! | [`delete_collection`](Engine::delete_collection) | `not_found`, `upstream_failure` |

use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{error, info};

use multi_kb_rag_core::chunk::TextSplitter;
use multi_kb_rag_core::embedding::EmbeddingProvider;
use multi_kb_rag_core::llm::ChatModel;
use multi_kb_rag_core::naming::collection_name;
use multi_kb_rag_core::rerank::Reranker;
use multi_kb_rag_core::scoring::{round4, Confidence};
use multi_kb_rag_core::store::memory::InMemoryVectorStore;
use multi_kb_rag_core::store::VectorStore;
use multi_kb_rag_core::KbError;

use crate::chat::RetrievalChat;
use crate::collections::CollectionManager;
use crate::config::{ChunkingConfig, Config, RetrievalConfig, SessionConfig};
use crate::embedding::create_provider;
use crate::extract::{DocumentExtractor, TextExtractor};
use crate::ingest::{IngestPipeline, UploadRequest};
use crate::llm::OpenAiChatModel;
use crate::metadata::MetadataExtractor;
use crate::qdrant::QdrantStore;
use crate::rerank::create_reranker;
use crate::router::{RouteMatch, RouterIndex, ROUTING_METHOD};
use crate::session::SessionStore;

/// Log an upstream failure with its full chain and convert it for callers.
pub(crate) fn log_upstream(op: &str, err: anyhow::Error) -> KbError {
    error!(op, error = %format!("{:#}", err), "upstream call failed");
    KbError::upstream(&err.context(format!("{} failed", op)))
}

/// Result of a caller-facing operation.
///
/// Serializes flat: `{"success": bool, ...fields}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OpResult {
    pub success: bool,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl OpResult {
    /// A success whose fields are taken from `payload` (an object).
    pub fn ok(payload: impl Serialize) -> Self {
        match serde_json::to_value(payload) {
            Ok(Value::Object(fields)) => Self {
                success: true,
                fields,
            },
            Ok(other) => Self::ok_empty().with("result", other),
            Err(e) => Self::failure(format!("Failed to serialize result: {}", e)),
        }
    }

    pub fn ok_empty() -> Self {
        Self {
            success: true,
            fields: Map::new(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            fields: Map::new(),
        }
        .with("message", message.into())
    }

    pub fn from_error(err: &KbError) -> Self {
        Self::failure(err.to_string()).with("error_kind", err.kind())
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn message(&self) -> Option<&str> {
        self.get("message").and_then(Value::as_str)
    }

    pub fn to_json(&self) -> Value {
        let mut out = self.fields.clone();
        out.insert("success".into(), Value::Bool(self.success));
        Value::Object(out)
    }
}

/// External collaborators the engine is built from.
pub struct Components {
    pub store: Arc<dyn VectorStore>,
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub llm: Arc<dyn ChatModel>,
    pub reranker: Arc<dyn Reranker>,
    pub extractor: Arc<dyn TextExtractor>,
}

impl Components {
    /// Build the configured collaborators. Network clients connect lazily.
    pub fn from_config(config: &Config) -> Result<Self> {
        let store: Arc<dyn VectorStore> = match config.vector_store.provider.as_str() {
            "memory" => Arc::new(InMemoryVectorStore::new()),
            _ => Arc::new(QdrantStore::new(&config.vector_store)?),
        };
        Ok(Self {
            store,
            embedder: create_provider(&config.embedding)
                .context("Failed to create embedding provider")?,
            llm: Arc::new(OpenAiChatModel::new(&config.llm)?),
            reranker: create_reranker(&config.reranker).context("Failed to create reranker")?,
            extractor: Arc::new(DocumentExtractor),
        })
    }
}

/// Engine tunables taken from the config file.
#[derive(Debug, Clone, Default)]
pub struct EngineSettings {
    pub chunking: ChunkingConfig,
    pub retrieval: RetrievalConfig,
    pub sessions: SessionConfig,
}

impl From<&Config> for EngineSettings {
    fn from(config: &Config) -> Self {
        Self {
            chunking: config.chunking.clone(),
            retrieval: config.retrieval.clone(),
            sessions: config.sessions.clone(),
        }
    }
}

pub struct Engine {
    collections: Arc<CollectionManager>,
    router: RouterIndex,
    ingest: IngestPipeline,
    chat: RetrievalChat,
    sessions: Arc<SessionStore>,
    default_top_k: usize,
}

impl Engine {
    pub fn new(settings: EngineSettings, parts: Components) -> Self {
        let sessions = Arc::new(SessionStore::from_config(&settings.sessions));
        let router = RouterIndex::new(
            parts.store.clone(),
            parts.embedder.clone(),
            settings.retrieval.router_threshold,
        );
        let collections = Arc::new(CollectionManager::new(
            parts.store.clone(),
            router.clone(),
            sessions.clone(),
            parts.embedder.dims(),
        ));
        let ingest = IngestPipeline::new(
            parts.extractor,
            MetadataExtractor::new(parts.llm.clone(), settings.retrieval.metadata_char_budget),
            TextSplitter::new(settings.chunking.chunk_size, settings.chunking.chunk_overlap),
            parts.embedder.clone(),
            parts.store.clone(),
            collections.clone(),
            router.clone(),
        );
        let default_top_k = settings.retrieval.default_top_k;
        let chat = RetrievalChat::new(
            parts.store,
            parts.embedder,
            parts.reranker,
            parts.llm,
            sessions.clone(),
            settings.retrieval,
        );
        Self {
            collections,
            router,
            ingest,
            chat,
            sessions,
            default_top_k,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self::new(
            EngineSettings::from(config),
            Components::from_config(config)?,
        ))
    }

    /// `top_k` that transports apply when a caller omits it. Library calls
    /// passing `None` use the configured `top_n` instead.
    pub fn default_top_k(&self) -> usize {
        self.default_top_k
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub async fn create_collection(&self, kb_name: &str, description: Option<&str>) -> OpResult {
        match self
            .collections
            .create(kb_name, description.unwrap_or_default())
            .await
        {
            Ok(created) => OpResult::ok(created),
            Err(e @ KbError::AlreadyExists(_)) => OpResult::from_error(&e)
                .with("message", format!("Collection '{}' already exists", kb_name.trim()))
                .with("collection_name", collection_name(kb_name)),
            Err(e) => OpResult::from_error(&e),
        }
    }

    pub async fn list_collections(&self) -> OpResult {
        match self.collections.list().await {
            Ok(kbs) => {
                let count = kbs.len();
                OpResult::ok_empty()
                    .with("collections", serde_json::to_value(kbs).unwrap_or_default())
                    .with("count", count)
            }
            Err(e) => OpResult::from_error(&e),
        }
    }

    pub async fn get_collection_info(&self, kb_name: &str) -> OpResult {
        match self.collections.info(kb_name).await {
            Ok(Some(info)) => OpResult::ok(info),
            Ok(None) => OpResult::from_error(&KbError::NotFound(kb_name.trim().to_string()))
                .with("message", format!("Collection '{}' not found", kb_name.trim()))
                .with("available_kbs", self.collections.names().await),
            Err(e) => OpResult::from_error(&e),
        }
    }

    pub async fn upload_document(&self, req: UploadRequest) -> OpResult {
        let kb_name = req.kb_name.trim().to_string();
        match self.ingest.upload(req).await {
            Ok(report) => {
                let message = format!(
                    "Uploaded {} to '{}' ({} pages, {} chunks)",
                    report.filename, report.kb_name, report.pages, report.chunks
                );
                OpResult::ok(report).with("message", message)
            }
            Err(failure) => {
                let mut result = OpResult::from_error(&failure.error);
                if let KbError::NotFound(_) = failure.error {
                    result = result
                        .with(
                            "message",
                            format!(
                                "Knowledge base '{}' does not exist. Please create it first using \
                                 create_collection, or set auto_create=true to create automatically.",
                                kb_name
                            ),
                        )
                        .with(
                            "suggestion",
                            format!(
                                "Try: create_collection(kb_name='{}') or \
                                 upload_document_to_kb(..., auto_create=true)",
                                kb_name
                            ),
                        );
                }
                if let Some(meta) = failure.ai_metadata {
                    result = result.with("ai_metadata", serde_json::to_value(meta).unwrap_or_default());
                }
                if let Some(description) = failure.description {
                    result = result.with("description", description);
                }
                result
            }
        }
    }

    pub async fn chat_with_kb(
        &self,
        kb_name: &str,
        query: &str,
        session_id: &str,
        top_k: Option<usize>,
    ) -> OpResult {
        let kb_name = kb_name.trim();
        if query.trim().is_empty() {
            return OpResult::from_error(&KbError::InvalidInput("query must not be empty".into()));
        }
        let collection = collection_name(kb_name);
        if !self.collections.exists(kb_name).await {
            return OpResult::from_error(&KbError::NotFound(kb_name.to_string()))
                .with(
                    "message",
                    format!(
                        "Knowledge base '{}' does not exist. Please upload documents first.",
                        kb_name
                    ),
                )
                .with(
                    "suggestion",
                    format!(
                        "Try: upload_document_to_kb(kb_name='{}', ...) to create KB and add \
                         documents, then use chat_with_kb.",
                        kb_name
                    ),
                )
                .with("available_kbs", self.collections.names().await);
        }

        match self
            .chat
            .chat(kb_name, &collection, query, session_id, top_k)
            .await
        {
            Ok(answer) => OpResult::ok(answer),
            Err(e) => OpResult::from_error(&e),
        }
    }

    /// Pick a KB for `query` from the router index.
    pub async fn route_to_kb(&self, query: &str) -> Result<Option<RouteMatch>> {
        self.router.route(query).await
    }

    /// Route `query` and report the decision without chatting.
    pub async fn route(&self, query: &str) -> OpResult {
        match self.router.route(query).await {
            Ok(Some(m)) => {
                let score = round4(m.score as f64);
                OpResult::ok(&m)
                    .with("score", score)
                    .with("confidence", Confidence::from_score(score).as_str())
            }
            Ok(None) => self.unrouted().await,
            Err(e) => OpResult::from_error(&log_upstream("route query", e)),
        }
    }

    async fn unrouted(&self) -> OpResult {
        OpResult::from_error(&KbError::NotFound("no matching knowledge base".into()))
            .with(
                "message",
                "Could not determine a relevant knowledge base for this query.",
            )
            .with(
                "suggestion",
                "Try: chat_with_kb(kb_name=..., ...) with one of the available knowledge bases.",
            )
            .with("available_kbs", self.collections.names().await)
    }

    pub async fn chat_global(&self, query: &str, session_id: &str, top_k: Option<usize>) -> OpResult {
        if query.trim().is_empty() {
            return OpResult::from_error(&KbError::InvalidInput("query must not be empty".into()));
        }
        let routed = match self.router.route(query).await {
            Ok(Some(m)) => m,
            Ok(None) => return self.unrouted().await,
            Err(e) => return OpResult::from_error(&log_upstream("route query", e)),
        };

        info!(kb = %routed.kb_name, score = routed.score, "chat routed");
        let result = self
            .chat_with_kb(&routed.kb_name, query, session_id, top_k)
            .await;
        if !result.success {
            return result;
        }
        let score = round4(routed.score as f64);
        result
            .with("routed_kb", routed.kb_name)
            .with("routing_confidence", score)
            .with("routing_confidence_level", Confidence::from_score(score).as_str())
            .with("routing_method", ROUTING_METHOD)
    }

    pub async fn clear_chat_history(&self, kb_name: &str, session_id: &str) -> OpResult {
        let collection = collection_name(kb_name);
        if self.sessions.clear(&collection, session_id) {
            info!(collection = %collection, session = session_id, "session cleared");
            OpResult::ok_empty().with(
                "message",
                format!("Chat history cleared for session {}", session_id),
            )
        } else {
            OpResult::from_error(&KbError::SessionNotFound {
                kb: kb_name.trim().to_string(),
                session: session_id.to_string(),
            })
            .with("message", "Session not found")
        }
    }

    pub async fn delete_collection(&self, kb_name: &str) -> OpResult {
        match self.collections.delete(kb_name).await {
            Ok(collection) => OpResult::ok_empty()
                .with(
                    "message",
                    format!("Collection '{}' deleted successfully", kb_name.trim()),
                )
                .with("collection_name", collection),
            Err(e @ KbError::NotFound(_)) => OpResult::from_error(&e)
                .with("message", format!("Collection '{}' not found", kb_name.trim())),
            Err(e) => OpResult::from_error(&e),
        }
    }
}
