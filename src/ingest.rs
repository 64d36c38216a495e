//! Ingestion pipeline: one uploaded document into one knowledge base.
//!
//! Steps, in order:
//!
//! 1. Reject unsupported content types, then extract pages.
//! 2. Abort when no page has text.
//! 3. Extract AI metadata from the first page.
//! 4. Compose the KB description from that metadata.
//! 5. Resolve the KB, auto-creating it when allowed.
//! 6. Merge metadata layers per page and split into chunks.
//! 7. Embed and upsert the chunks.
//! 8. Refresh the sentinel and router entry with the new description.
//!
//! Nothing before step 5 touches storage. Failures from step 5 on carry the
//! AI metadata gathered so far. Work committed before a failure (e.g. an
//! auto-created KB) is left in place; chunk ids are content-derived, so
//! retrying the same upload overwrites rather than duplicates.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use multi_kb_rag_core::chunk::TextSplitter;
use multi_kb_rag_core::embedding::EmbeddingProvider;
use multi_kb_rag_core::metadata::{DocMetadata, LayeredMetadata, MetadataLayer};
use multi_kb_rag_core::models::{DocumentChunk, Payload, PointRecord};
use multi_kb_rag_core::naming::collection_name;
use multi_kb_rag_core::store::VectorStore;
use multi_kb_rag_core::KbError;

use crate::collections::CollectionManager;
use crate::engine::log_upstream;
use crate::extract::{TextExtractor, SUPPORTED_TYPES};
use crate::metadata::MetadataExtractor;
use crate::router::RouterIndex;

#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub kb_name: String,
    pub filename: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
    pub auto_create: bool,
    /// Caller overrides, highest merge priority.
    pub metadata: Payload,
}

#[derive(Debug, Clone, Serialize)]
pub struct UploadReport {
    pub kb_name: String,
    pub collection_name: String,
    pub filename: String,
    pub chunks: usize,
    pub pages: usize,
    pub created_kb: bool,
    pub description: String,
    pub ai_metadata: DocMetadata,
    /// `"extracted"` or `"default"`.
    pub metadata_source: &'static str,
}

/// A failed upload, with whatever AI metadata was gathered before failing.
#[derive(Debug)]
pub struct UploadFailure {
    pub error: KbError,
    pub ai_metadata: Option<DocMetadata>,
    pub description: Option<String>,
}

impl From<KbError> for UploadFailure {
    fn from(error: KbError) -> Self {
        Self {
            error,
            ai_metadata: None,
            description: None,
        }
    }
}

pub struct IngestPipeline {
    extractor: Arc<dyn TextExtractor>,
    metadata: MetadataExtractor,
    splitter: TextSplitter,
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn VectorStore>,
    collections: Arc<CollectionManager>,
    router: RouterIndex,
}

impl IngestPipeline {
    pub fn new(
        extractor: Arc<dyn TextExtractor>,
        metadata: MetadataExtractor,
        splitter: TextSplitter,
        embedder: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn VectorStore>,
        collections: Arc<CollectionManager>,
        router: RouterIndex,
    ) -> Self {
        Self {
            extractor,
            metadata,
            splitter,
            embedder,
            store,
            collections,
            router,
        }
    }

    pub async fn upload(&self, req: UploadRequest) -> Result<UploadReport, UploadFailure> {
        let kb_name = req.kb_name.trim().to_string();
        let collection = collection_name(&kb_name);

        if !self.extractor.supports(&req.content_type) {
            return Err(KbError::Extraction(format!(
                "Unsupported content type '{}'. Supported: {}",
                req.content_type,
                SUPPORTED_TYPES.join(", ")
            ))
            .into());
        }

        info!(kb = %kb_name, file = %req.filename, "extracting text");
        let pages = self
            .extractor
            .extract(&req.bytes, &req.content_type)
            .map_err(|e| KbError::Extraction(format!("Failed to extract text from file: {}", e)))?;
        let Some(first_page) = pages.first() else {
            return Err(KbError::Extraction("Failed to extract text from file".into()).into());
        };

        let outcome = self.metadata.extract(&first_page.text).await;
        let ai_metadata = outcome.metadata();
        let description = ai_metadata.describe();
        let fail = |error: KbError| UploadFailure {
            error,
            ai_metadata: Some(ai_metadata.clone()),
            description: Some(description.clone()),
        };

        let mut created_kb = false;
        if !self.store.collection_exists(&collection).await {
            if !req.auto_create {
                return Err(fail(KbError::NotFound(kb_name.clone())));
            }
            info!(kb = %kb_name, "auto-creating knowledge base");
            match self.collections.create(&kb_name, &description).await {
                Ok(_) => created_kb = true,
                // Lost a race with a concurrent upload; the KB is there now.
                Err(KbError::AlreadyExists(_)) => {}
                Err(e) => return Err(fail(e)),
            }
        }

        let uploaded_at = chrono::Utc::now().to_rfc3339();
        let mut chunks: Vec<DocumentChunk> = Vec::new();
        for page in &pages {
            let mut system = Payload::new();
            system.insert("kb_name".into(), Value::String(kb_name.clone()));
            system.insert("filename".into(), Value::String(req.filename.clone()));
            system.insert("page_number".into(), Value::from(page.page_number));
            system.insert("uploaded_at".into(), Value::String(uploaded_at.clone()));

            let mut layers = LayeredMetadata::new();
            layers
                .set(MetadataLayer::System, system)
                .set(MetadataLayer::Extracted, ai_metadata.to_payload())
                .set(MetadataLayer::Caller, req.metadata.clone());

            let source_key = format!("{}#{}", req.filename, page.page_number);
            chunks.extend(
                self.splitter
                    .split_page(&source_key, &page.text, &layers.merged()),
            );
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = self
            .embedder
            .embed_batch(&texts)
            .await
            .map_err(|e| fail(log_upstream("embed chunks", e)))?;
        if vectors.len() != chunks.len() {
            return Err(fail(log_upstream(
                "embed chunks",
                anyhow::anyhow!(
                    "embedding provider returned {} vectors for {} chunks",
                    vectors.len(),
                    chunks.len()
                ),
            )));
        }
        let points: Vec<PointRecord> = chunks
            .iter()
            .zip(vectors)
            .map(|(chunk, vector)| PointRecord {
                id: chunk.id.clone(),
                vector,
                payload: chunk.to_payload(),
            })
            .collect();
        self.store
            .upsert(&collection, points)
            .await
            .map_err(|e| fail(log_upstream("store chunks", e)))?;

        if let Err(e) = self
            .collections
            .record_upload(&kb_name, &collection, &description)
            .await
        {
            warn!(kb = %kb_name, error = %format!("{:#}", e), "collection metadata refresh failed");
        }
        if let Err(e) = self.router.register(&kb_name, &collection, &description).await {
            warn!(kb = %kb_name, error = %format!("{:#}", e), "router refresh failed");
        }

        info!(
            kb = %kb_name,
            file = %req.filename,
            pages = pages.len(),
            chunks = chunks.len(),
            "document uploaded"
        );
        Ok(UploadReport {
            kb_name,
            collection_name: collection,
            filename: req.filename,
            chunks: chunks.len(),
            pages: pages.len(),
            created_kb,
            description,
            metadata_source: if outcome.is_parsed() {
                "extracted"
            } else {
                "default"
            },
            ai_metadata,
        })
    }
}
