//! Collection Manager: knowledge-base lifecycle.
//!
//! Every KB collection holds one sentinel point (tagged
//! `_type = "collection_metadata"`) carrying its description, creation time
//! and upload count. The sentinel has a zero vector and a deterministic id, so
//! refreshing it overwrites rather than duplicates.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use multi_kb_rag_core::metadata::{is_meaningful_description, NO_DESCRIPTION};
use multi_kb_rag_core::models::{Payload, PayloadFilter, PointRecord, SENTINEL_TYPE, TYPE_KEY};
use multi_kb_rag_core::naming::{collection_name, kb_name_from_collection, normalize_kb_name};
use multi_kb_rag_core::store::VectorStore;
use multi_kb_rag_core::KbError;

use crate::engine::log_upstream;
use crate::router::RouterIndex;
use crate::session::SessionStore;

#[derive(Debug, Clone, Serialize)]
pub struct CreatedKb {
    pub kb_name: String,
    pub collection_name: String,
    pub description: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct KbSummary {
    pub kb_name: String,
    pub collection_name: String,
    pub description: String,
    pub points_count: u64,
    pub vectors_count: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct KbInfo {
    pub kb_name: String,
    pub collection_name: String,
    pub points_count: u64,
    pub vectors_count: u64,
    pub metadata: Payload,
}

pub struct CollectionManager {
    store: Arc<dyn VectorStore>,
    router: RouterIndex,
    sessions: Arc<SessionStore>,
    dims: usize,
}

/// Point id of the sentinel in `collection`.
pub fn sentinel_id(collection: &str) -> String {
    Uuid::new_v5(
        &Uuid::NAMESPACE_OID,
        format!("{}#{}", collection, SENTINEL_TYPE).as_bytes(),
    )
    .to_string()
}

impl CollectionManager {
    pub fn new(
        store: Arc<dyn VectorStore>,
        router: RouterIndex,
        sessions: Arc<SessionStore>,
        dims: usize,
    ) -> Self {
        Self {
            store,
            router,
            sessions,
            dims,
        }
    }

    pub async fn exists(&self, kb_name: &str) -> bool {
        self.store.collection_exists(&collection_name(kb_name)).await
    }

    /// Create a KB collection with its sentinel, registering a router entry
    /// when `description` is meaningful.
    pub async fn create(&self, kb_name: &str, description: &str) -> Result<CreatedKb, KbError> {
        let kb_name = kb_name.trim();
        if normalize_kb_name(kb_name).is_empty() {
            return Err(KbError::InvalidInput("kb_name must not be empty".into()));
        }
        let collection = collection_name(kb_name);
        if self.store.collection_exists(&collection).await {
            return Err(KbError::AlreadyExists(collection));
        }

        self.store
            .create_collection(&collection, self.dims)
            .await
            .map_err(|e| log_upstream("create collection", e))?;

        let created_at = chrono::Utc::now().to_rfc3339();
        let mut sentinel = Payload::new();
        sentinel.insert(TYPE_KEY.into(), Value::String(SENTINEL_TYPE.into()));
        sentinel.insert("kb_name".into(), Value::String(kb_name.to_string()));
        sentinel.insert("description".into(), Value::String(description.to_string()));
        sentinel.insert("created_at".into(), Value::String(created_at.clone()));
        sentinel.insert("document_count".into(), Value::from(0u64));
        self.write_sentinel(&collection, sentinel)
            .await
            .map_err(|e| log_upstream("write collection metadata", e))?;

        if let Err(e) = self.router.register(kb_name, &collection, description).await {
            warn!(kb = kb_name, error = %format!("{:#}", e), "router registration failed");
        }

        info!(kb = kb_name, collection = %collection, "knowledge base created");
        Ok(CreatedKb {
            kb_name: kb_name.to_string(),
            collection_name: collection,
            description: description.to_string(),
            created_at,
        })
    }

    async fn write_sentinel(&self, collection: &str, payload: Payload) -> anyhow::Result<()> {
        self.store
            .upsert(
                collection,
                vec![PointRecord {
                    id: sentinel_id(collection),
                    vector: vec![0.0; self.dims],
                    payload,
                }],
            )
            .await
    }

    /// The sentinel payload of `collection`, if present.
    pub async fn sentinel(&self, collection: &str) -> anyhow::Result<Option<Payload>> {
        let points = self
            .store
            .scroll(collection, &PayloadFilter::sentinel_only(), 1)
            .await?;
        Ok(points.into_iter().next().map(|p| p.payload))
    }

    /// Record an upload in the sentinel: bump `document_count` and take
    /// `description` unless it is a placeholder replacing a real one. A
    /// missing sentinel is recreated.
    pub async fn record_upload(
        &self,
        kb_name: &str,
        collection: &str,
        description: &str,
    ) -> anyhow::Result<()> {
        let mut payload = self.sentinel(collection).await?.unwrap_or_else(|| {
            let mut p = Payload::new();
            p.insert(TYPE_KEY.into(), Value::String(SENTINEL_TYPE.into()));
            p.insert("kb_name".into(), Value::String(kb_name.to_string()));
            p.insert(
                "created_at".into(),
                Value::String(chrono::Utc::now().to_rfc3339()),
            );
            p
        });
        let count = payload
            .get("document_count")
            .and_then(|v| v.as_u64())
            .unwrap_or(0);
        payload.insert("document_count".into(), Value::from(count + 1));
        let current_is_real = payload
            .get("description")
            .and_then(|d| d.as_str())
            .is_some_and(is_meaningful_description);
        if is_meaningful_description(description) || !current_is_real {
            payload.insert("description".into(), Value::String(description.to_string()));
        } else {
            debug!(collection, "placeholder description not recorded");
        }
        payload.insert(
            "updated_at".into(),
            Value::String(chrono::Utc::now().to_rfc3339()),
        );
        self.write_sentinel(collection, payload).await
    }

    /// All KBs in name order. Descriptions and counts are best-effort.
    pub async fn list(&self) -> Result<Vec<KbSummary>, KbError> {
        let mut names = self
            .store
            .list_collections()
            .await
            .map_err(|e| log_upstream("list collections", e))?;
        names.sort();

        let mut out = Vec::new();
        for collection in names {
            let Some(kb_name) = kb_name_from_collection(&collection) else {
                continue;
            };
            let description = match self.sentinel(&collection).await {
                Ok(Some(p)) => p
                    .get("description")
                    .and_then(|d| d.as_str())
                    .filter(|d| !d.trim().is_empty())
                    .unwrap_or(NO_DESCRIPTION)
                    .to_string(),
                Ok(None) => NO_DESCRIPTION.to_string(),
                Err(e) => {
                    debug!(collection = %collection, error = %e, "sentinel unreadable");
                    NO_DESCRIPTION.to_string()
                }
            };
            let stats = self
                .store
                .describe_collection(&collection)
                .await
                .ok()
                .flatten()
                .unwrap_or_default();
            out.push(KbSummary {
                kb_name: kb_name.to_string(),
                collection_name: collection.clone(),
                description,
                points_count: stats.points_count,
                vectors_count: stats.vectors_count,
            });
        }
        Ok(out)
    }

    /// Names of every KB; empty when listing fails.
    pub async fn names(&self) -> Vec<String> {
        self.list()
            .await
            .map(|kbs| kbs.into_iter().map(|k| k.kb_name).collect())
            .unwrap_or_default()
    }

    /// Counts and sentinel metadata, or `None` when the KB does not exist.
    pub async fn info(&self, kb_name: &str) -> Result<Option<KbInfo>, KbError> {
        let collection = collection_name(kb_name);
        let Some(stats) = self
            .store
            .describe_collection(&collection)
            .await
            .map_err(|e| log_upstream("describe collection", e))?
        else {
            return Ok(None);
        };

        let metadata = match self.sentinel(&collection).await {
            Ok(Some(mut p)) => {
                p.remove(TYPE_KEY);
                p
            }
            Ok(None) => Payload::new(),
            Err(e) => {
                debug!(collection = %collection, error = %e, "sentinel unreadable");
                Payload::new()
            }
        };

        Ok(Some(KbInfo {
            kb_name: kb_name.trim().to_string(),
            collection_name: collection,
            points_count: stats.points_count,
            vectors_count: stats.vectors_count,
            metadata,
        }))
    }

    /// Drop the collection, its sessions, and its router entry.
    pub async fn delete(&self, kb_name: &str) -> Result<String, KbError> {
        let collection = collection_name(kb_name);
        if !self.store.collection_exists(&collection).await {
            return Err(KbError::NotFound(kb_name.trim().to_string()));
        }
        self.store
            .delete_collection(&collection)
            .await
            .map_err(|e| log_upstream("delete collection", e))?;

        let dropped = self.sessions.drop_collection(&collection);
        if let Err(e) = self.router.remove(&collection).await {
            warn!(collection = %collection, error = %format!("{:#}", e), "router entry removal failed");
        }
        info!(collection = %collection, sessions = dropped, "knowledge base deleted");
        Ok(collection)
    }
}
