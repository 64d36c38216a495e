//! In-memory [`VectorStore`] implementation for testing and the `memory`
//! backend.
//!
//! Uses `BTreeMap`s behind a `std::sync::RwLock`. Search is brute-force
//! cosine similarity over every point in the collection.

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::models::{CollectionStats, PayloadFilter, PointRecord, ScoredPoint};

use super::VectorStore;

struct Collection {
    dims: usize,
    points: BTreeMap<String, PointRecord>,
}

/// In-memory vector store. Contents are lost when dropped.
#[derive(Default)]
pub struct InMemoryVectorStore {
    collections: RwLock<BTreeMap<String, Collection>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<String, Collection>> {
        self.collections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<String, Collection>> {
        self.collections
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

fn missing(name: &str) -> anyhow::Error {
    anyhow!("collection '{}' not found", name)
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn create_collection(&self, name: &str, dims: usize) -> Result<()> {
        let mut cols = self.write();
        if cols.contains_key(name) {
            bail!("collection '{}' already exists", name);
        }
        cols.insert(
            name.to_string(),
            Collection {
                dims,
                points: BTreeMap::new(),
            },
        );
        Ok(())
    }

    async fn describe_collection(&self, name: &str) -> Result<Option<CollectionStats>> {
        Ok(self.read().get(name).map(|c| {
            let n = c.points.len() as u64;
            CollectionStats {
                points_count: n,
                vectors_count: n,
            }
        }))
    }

    async fn list_collections(&self) -> Result<Vec<String>> {
        Ok(self.read().keys().cloned().collect())
    }

    async fn delete_collection(&self, name: &str) -> Result<()> {
        self.write().remove(name).map(|_| ()).ok_or_else(|| missing(name))
    }

    async fn upsert(&self, collection: &str, points: Vec<PointRecord>) -> Result<()> {
        let mut cols = self.write();
        let col = cols.get_mut(collection).ok_or_else(|| missing(collection))?;
        if let Some(bad) = points.iter().find(|p| p.vector.len() != col.dims) {
            bail!(
                "point '{}' has {} dimensions, collection '{}' expects {}",
                bad.id,
                bad.vector.len(),
                collection,
                col.dims
            );
        }
        for p in points {
            col.points.insert(p.id.clone(), p);
        }
        Ok(())
    }

    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        limit: usize,
        filter: Option<&PayloadFilter>,
    ) -> Result<Vec<ScoredPoint>> {
        let cols = self.read();
        let col = cols.get(collection).ok_or_else(|| missing(collection))?;

        let mut hits: Vec<ScoredPoint> = col
            .points
            .values()
            .filter(|p| filter.map(|f| f.matches(&p.payload)).unwrap_or(true))
            .map(|p| ScoredPoint {
                id: p.id.clone(),
                score: cosine_similarity(vector, &p.vector),
                payload: p.payload.clone(),
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(limit);
        Ok(hits)
    }

    async fn scroll(
        &self,
        collection: &str,
        filter: &PayloadFilter,
        limit: usize,
    ) -> Result<Vec<PointRecord>> {
        let cols = self.read();
        let col = cols.get(collection).ok_or_else(|| missing(collection))?;
        Ok(col
            .points
            .values()
            .filter(|p| filter.matches(&p.payload))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn delete_points(&self, collection: &str, ids: &[String]) -> Result<()> {
        let mut cols = self.write();
        let col = cols.get_mut(collection).ok_or_else(|| missing(collection))?;
        for id in ids {
            col.points.remove(id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Payload;
    use serde_json::json;

    fn point(id: &str, vector: Vec<f32>, payload: serde_json::Value) -> PointRecord {
        PointRecord {
            id: id.to_string(),
            vector,
            payload: payload.as_object().cloned().unwrap_or_else(Payload::new),
        }
    }

    #[tokio::test]
    async fn test_lifecycle() {
        let store = InMemoryVectorStore::new();
        assert!(!store.collection_exists("kb_a").await);
        store.create_collection("kb_a", 2).await.unwrap();
        assert!(store.collection_exists("kb_a").await);
        assert!(store.create_collection("kb_a", 2).await.is_err());
        assert_eq!(store.list_collections().await.unwrap(), vec!["kb_a"]);
        store.delete_collection("kb_a").await.unwrap();
        assert!(!store.collection_exists("kb_a").await);
        assert!(store.delete_collection("kb_a").await.is_err());
    }

    #[tokio::test]
    async fn test_upsert_overwrites_by_id() {
        let store = InMemoryVectorStore::new();
        store.create_collection("c", 2).await.unwrap();
        store
            .upsert("c", vec![point("p1", vec![1.0, 0.0], json!({ "v": 1 }))])
            .await
            .unwrap();
        store
            .upsert("c", vec![point("p1", vec![0.0, 1.0], json!({ "v": 2 }))])
            .await
            .unwrap();
        let stats = store.describe_collection("c").await.unwrap().unwrap();
        assert_eq!(stats.points_count, 1);
        let all = store.scroll("c", &PayloadFilter::new(), 10).await.unwrap();
        assert_eq!(all[0].payload["v"], 2);
    }

    #[tokio::test]
    async fn test_dimension_mismatch_rejected() {
        let store = InMemoryVectorStore::new();
        store.create_collection("c", 3).await.unwrap();
        let err = store
            .upsert("c", vec![point("p", vec![1.0], json!({}))])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("expects 3"));
    }

    #[tokio::test]
    async fn test_search_ranks_and_filters() {
        let store = InMemoryVectorStore::new();
        store.create_collection("c", 2).await.unwrap();
        store
            .upsert(
                "c",
                vec![
                    point("sentinel", vec![0.0, 0.0], json!({ "_type": "collection_metadata" })),
                    point("near", vec![1.0, 0.1], json!({ "page_content": "near" })),
                    point("far", vec![0.0, 1.0], json!({ "page_content": "far" })),
                ],
            )
            .await
            .unwrap();

        let hits = store
            .search("c", &[1.0, 0.0], 10, Some(&PayloadFilter::documents_only()))
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, "near");
        assert!(hits[0].score > hits[1].score);

        let limited = store.search("c", &[1.0, 0.0], 1, None).await.unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[tokio::test]
    async fn test_scroll_and_delete_points() {
        let store = InMemoryVectorStore::new();
        store.create_collection("c", 1).await.unwrap();
        store
            .upsert(
                "c",
                vec![
                    point("a", vec![1.0], json!({ "_type": "collection_metadata" })),
                    point("b", vec![1.0], json!({})),
                ],
            )
            .await
            .unwrap();
        let sentinel = store
            .scroll("c", &PayloadFilter::sentinel_only(), 1)
            .await
            .unwrap();
        assert_eq!(sentinel.len(), 1);
        assert_eq!(sentinel[0].id, "a");

        store.delete_points("c", &["a".to_string()]).await.unwrap();
        assert_eq!(
            store.describe_collection("c").await.unwrap().unwrap().points_count,
            1
        );
    }

    #[tokio::test]
    async fn test_missing_collection_errors() {
        let store = InMemoryVectorStore::new();
        assert!(store.describe_collection("nope").await.unwrap().is_none());
        assert!(store.search("nope", &[1.0], 1, None).await.is_err());
        assert!(store.upsert("nope", vec![]).await.is_err());
    }
}
