//! Vector store abstraction.
//!
//! The [`VectorStore`] trait covers everything the engine needs from a
//! vector database: collection lifecycle, point upsert, similarity search,
//! and payload-filtered scroll. Backends: [`memory::InMemoryVectorStore`]
//! here, Qdrant (REST) in the app crate.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{CollectionStats, PayloadFilter, PointRecord, ScoredPoint};

/// Abstract vector database.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`create_collection`](VectorStore::create_collection) | Create a cosine-distance collection |
/// | [`describe_collection`](VectorStore::describe_collection) | Point/vector counts, `None` if absent |
/// | [`list_collections`](VectorStore::list_collections) | All collection names |
/// | [`delete_collection`](VectorStore::delete_collection) | Drop a collection and its points |
/// | [`upsert`](VectorStore::upsert) | Insert or overwrite points by id |
/// | [`search`](VectorStore::search) | Nearest neighbours, optionally filtered |
/// | [`scroll`](VectorStore::scroll) | Filtered listing without a query vector |
/// | [`delete_points`](VectorStore::delete_points) | Remove points by id |
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Create a collection of `dims`-dimensional vectors with cosine distance.
    async fn create_collection(&self, name: &str, dims: usize) -> Result<()>;

    async fn describe_collection(&self, name: &str) -> Result<Option<CollectionStats>>;

    /// True iff the collection can be described without error.
    async fn collection_exists(&self, name: &str) -> bool {
        matches!(self.describe_collection(name).await, Ok(Some(_)))
    }

    async fn list_collections(&self) -> Result<Vec<String>>;

    async fn delete_collection(&self, name: &str) -> Result<()>;

    async fn upsert(&self, collection: &str, points: Vec<PointRecord>) -> Result<()>;

    /// Return up to `limit` points ranked by descending cosine similarity.
    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        limit: usize,
        filter: Option<&PayloadFilter>,
    ) -> Result<Vec<ScoredPoint>>;

    /// Return up to `limit` points matching `filter`, in id order.
    async fn scroll(
        &self,
        collection: &str,
        filter: &PayloadFilter,
        limit: usize,
    ) -> Result<Vec<PointRecord>>;

    async fn delete_points(&self, collection: &str, ids: &[String]) -> Result<()>;
}
