//! Router index: one description embedding per knowledge base.
//!
//! Entries live in the global [`ROUTER_COLLECTION`]. Each entry's point id is
//! a UUID v5 of the KB's collection name, so re-registering a KB overwrites
//! its previous entry rather than adding a second one.

use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};
use uuid::Uuid;

use multi_kb_rag_core::embedding::EmbeddingProvider;
use multi_kb_rag_core::metadata::is_meaningful_description;
use multi_kb_rag_core::models::{Payload, PayloadFilter, PointRecord};
use multi_kb_rag_core::naming::ROUTER_COLLECTION;
use multi_kb_rag_core::store::VectorStore;

/// Tag reported with auto-routed chat responses.
pub const ROUTING_METHOD: &str = "semantic_router";

/// The KB picked for a query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouteMatch {
    pub kb_name: String,
    pub collection_name: String,
    pub score: f32,
}

#[derive(Clone)]
pub struct RouterIndex {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    threshold: f32,
}

/// Point id of the router entry for `collection`.
pub fn entry_id(collection: &str) -> String {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, collection.as_bytes()).to_string()
}

impl RouterIndex {
    pub fn new(
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        threshold: f32,
    ) -> Self {
        Self {
            store,
            embedder,
            threshold,
        }
    }

    async fn ensure_collection(&self) -> Result<()> {
        if !self.store.collection_exists(ROUTER_COLLECTION).await {
            info!(collection = ROUTER_COLLECTION, "creating router index");
            self.store
                .create_collection(ROUTER_COLLECTION, self.embedder.dims())
                .await
                .context("Failed to create router index")?;
        }
        Ok(())
    }

    /// Upsert the entry for a KB. Placeholder descriptions are skipped and
    /// reported as `Ok(false)`.
    pub async fn register(&self, kb_name: &str, collection: &str, description: &str) -> Result<bool> {
        if !is_meaningful_description(description) {
            debug!(kb = kb_name, "skipping router entry for placeholder description");
            return Ok(false);
        }
        self.ensure_collection().await?;

        let vector = self
            .embedder
            .embed(description)
            .await
            .context("Failed to embed KB description")?;

        let mut payload = Payload::new();
        payload.insert("kb_name".into(), Value::String(kb_name.to_string()));
        payload.insert("collection_name".into(), Value::String(collection.to_string()));
        payload.insert("description".into(), Value::String(description.to_string()));
        payload.insert(
            "updated_at".into(),
            Value::String(chrono::Utc::now().to_rfc3339()),
        );

        self.store
            .upsert(
                ROUTER_COLLECTION,
                vec![PointRecord {
                    id: entry_id(collection),
                    vector,
                    payload,
                }],
            )
            .await
            .context("Failed to upsert router entry")?;
        info!(kb = kb_name, collection, "router entry registered");
        Ok(true)
    }

    /// Remove a KB's entry, if the index exists.
    pub async fn remove(&self, collection: &str) -> Result<()> {
        if !self.store.collection_exists(ROUTER_COLLECTION).await {
            return Ok(());
        }
        self.store
            .delete_points(ROUTER_COLLECTION, &[entry_id(collection)])
            .await
            .context("Failed to remove router entry")
    }

    /// Number of registered entries; zero when the index does not exist.
    pub async fn entry_count(&self) -> Result<u64> {
        Ok(self
            .store
            .describe_collection(ROUTER_COLLECTION)
            .await?
            .map(|s| s.points_count)
            .unwrap_or(0))
    }

    /// The entry payload for `collection`, if registered.
    pub async fn entry(&self, collection: &str) -> Result<Option<Payload>> {
        if !self.store.collection_exists(ROUTER_COLLECTION).await {
            return Ok(None);
        }
        let hits = self
            .store
            .scroll(
                ROUTER_COLLECTION,
                &PayloadFilter::new().must("collection_name", collection),
                1,
            )
            .await?;
        Ok(hits.into_iter().next().map(|p| p.payload))
    }

    /// Pick the KB whose description best matches `query`, or `None` when
    /// the index is empty or the best score is below the threshold.
    pub async fn route(&self, query: &str) -> Result<Option<RouteMatch>> {
        if self.entry_count().await? == 0 {
            debug!("router index empty");
            return Ok(None);
        }

        let vector = self
            .embedder
            .embed(query)
            .await
            .context("Failed to embed query for routing")?;
        let hits = self
            .store
            .search(ROUTER_COLLECTION, &vector, 1, None)
            .await
            .context("Router index search failed")?;

        let Some(best) = hits.into_iter().next() else {
            return Ok(None);
        };

        let text = |key: &str| {
            best.payload
                .get(key)
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string()
        };
        let kb_name = text("kb_name");

        if best.score < self.threshold {
            info!(
                best = %kb_name,
                score = best.score,
                threshold = self.threshold,
                "route rejected, best match below threshold"
            );
            return Ok(None);
        }

        info!(kb = %kb_name, score = best.score, "query routed");
        Ok(Some(RouteMatch {
            collection_name: text("collection_name"),
            kb_name,
            score: best.score,
        }))
    }
}
