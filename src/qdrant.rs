//! Qdrant [`VectorStore`] over the Qdrant REST API.
//!
//! | Operation | Endpoint |
//! |-----------|----------|
//! | create | `PUT /collections/{name}` |
//! | describe | `GET /collections/{name}` (404 → absent) |
//! | list | `GET /collections` |
//! | delete | `DELETE /collections/{name}` |
//! | upsert | `PUT /collections/{name}/points?wait=true` |
//! | search | `POST /collections/{name}/points/search` |
//! | scroll | `POST /collections/{name}/points/scroll` |
//! | delete points | `POST /collections/{name}/points/delete?wait=true` |
//!
//! Payload filters translate to Qdrant `must` / `must_not` conditions with
//! `match.value`, so dotted keys (`metadata.filename`) work natively.

use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde_json::{json, Value};
use tracing::debug;

use multi_kb_rag_core::models::{
    CollectionStats, Payload, PayloadFilter, PointRecord, ScoredPoint,
};
use multi_kb_rag_core::store::VectorStore;

use crate::config::VectorStoreConfig;

pub struct QdrantStore {
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl QdrantStore {
    pub fn new(config: &VectorStoreConfig) -> Result<Self> {
        Ok(Self {
            base_url: config.url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(config.timeout_secs))
                .build()
                .context("Failed to build HTTP client")?,
        })
    }

    /// Send a request and return `(status, result)` where `result` is the
    /// `result` field of Qdrant's response envelope.
    async fn call(&self, method: Method, path: &str, body: Option<Value>) -> Result<(StatusCode, Value)> {
        let url = format!("{}{}", self.base_url, path);
        let mut req = self.client.request(method.clone(), &url);
        if let Some(key) = &self.api_key {
            req = req.header("api-key", key);
        }
        if let Some(b) = body {
            req = req.json(&b);
        }

        let response = req
            .send()
            .await
            .with_context(|| format!("Qdrant request failed: {} {}", method, path))?;
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        let json: Value = serde_json::from_str(&text).unwrap_or(Value::Null);
        debug!(%method, path, %status, "qdrant");
        Ok((status, json.get("result").cloned().unwrap_or(json)))
    }

    async fn call_ok(&self, method: Method, path: &str, body: Option<Value>) -> Result<Value> {
        let (status, result) = self.call(method.clone(), path, body).await?;
        if !status.is_success() {
            bail!("Qdrant {} {} failed with {}: {}", method, path, status, result);
        }
        Ok(result)
    }
}

fn filter_json(filter: &PayloadFilter) -> Value {
    let conditions = |pairs: &[(String, Value)]| -> Vec<Value> {
        pairs
            .iter()
            .map(|(k, v)| json!({ "key": k, "match": { "value": v } }))
            .collect()
    };
    let mut out = serde_json::Map::new();
    if !filter.must.is_empty() {
        out.insert("must".into(), Value::Array(conditions(&filter.must)));
    }
    if !filter.must_not.is_empty() {
        out.insert("must_not".into(), Value::Array(conditions(&filter.must_not)));
    }
    Value::Object(out)
}

fn point_id(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn payload_of(v: &Value) -> Payload {
    v.get("payload")
        .and_then(|p| p.as_object())
        .cloned()
        .unwrap_or_default()
}

fn vector_of(v: &Value) -> Vec<f32> {
    v.get("vector")
        .and_then(|vec| vec.as_array())
        .map(|a| a.iter().map(|x| x.as_f64().unwrap_or(0.0) as f32).collect())
        .unwrap_or_default()
}

fn stats_of(result: &Value) -> CollectionStats {
    let points = result.get("points_count").and_then(|v| v.as_u64()).unwrap_or(0);
    let vectors = result
        .get("vectors_count")
        .and_then(|v| v.as_u64())
        .unwrap_or(points);
    CollectionStats {
        points_count: points,
        vectors_count: vectors,
    }
}

#[async_trait]
impl VectorStore for QdrantStore {
    async fn create_collection(&self, name: &str, dims: usize) -> Result<()> {
        self.call_ok(
            Method::PUT,
            &format!("/collections/{}", name),
            Some(json!({ "vectors": { "size": dims, "distance": "Cosine" } })),
        )
        .await?;
        Ok(())
    }

    async fn describe_collection(&self, name: &str) -> Result<Option<CollectionStats>> {
        let (status, result) = self
            .call(Method::GET, &format!("/collections/{}", name), None)
            .await?;
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            bail!("Qdrant describe '{}' failed with {}: {}", name, status, result);
        }
        Ok(Some(stats_of(&result)))
    }

    async fn list_collections(&self) -> Result<Vec<String>> {
        let result = self.call_ok(Method::GET, "/collections", None).await?;
        let cols = result
            .get("collections")
            .and_then(|c| c.as_array())
            .ok_or_else(|| anyhow!("Invalid Qdrant response: missing collections"))?;
        Ok(cols
            .iter()
            .filter_map(|c| c.get("name").and_then(|n| n.as_str()).map(String::from))
            .collect())
    }

    async fn delete_collection(&self, name: &str) -> Result<()> {
        self.call_ok(Method::DELETE, &format!("/collections/{}", name), None)
            .await?;
        Ok(())
    }

    async fn upsert(&self, collection: &str, points: Vec<PointRecord>) -> Result<()> {
        if points.is_empty() {
            return Ok(());
        }
        let body: Vec<Value> = points
            .into_iter()
            .map(|p| json!({ "id": p.id, "vector": p.vector, "payload": p.payload }))
            .collect();
        self.call_ok(
            Method::PUT,
            &format!("/collections/{}/points?wait=true", collection),
            Some(json!({ "points": body })),
        )
        .await?;
        Ok(())
    }

    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        limit: usize,
        filter: Option<&PayloadFilter>,
    ) -> Result<Vec<ScoredPoint>> {
        let mut body = json!({ "vector": vector, "limit": limit, "with_payload": true });
        if let Some(f) = filter {
            body["filter"] = filter_json(f);
        }
        let result = self
            .call_ok(
                Method::POST,
                &format!("/collections/{}/points/search", collection),
                Some(body),
            )
            .await?;
        let hits = result
            .as_array()
            .ok_or_else(|| anyhow!("Invalid Qdrant search response"))?;
        Ok(hits
            .iter()
            .map(|h| ScoredPoint {
                id: h.get("id").map(point_id).unwrap_or_default(),
                score: h.get("score").and_then(|s| s.as_f64()).unwrap_or(0.0) as f32,
                payload: payload_of(h),
            })
            .collect())
    }

    async fn scroll(
        &self,
        collection: &str,
        filter: &PayloadFilter,
        limit: usize,
    ) -> Result<Vec<PointRecord>> {
        let result = self
            .call_ok(
                Method::POST,
                &format!("/collections/{}/points/scroll", collection),
                Some(json!({
                    "filter": filter_json(filter),
                    "limit": limit,
                    "with_payload": true,
                    "with_vector": true,
                })),
            )
            .await?;
        let points = result
            .get("points")
            .and_then(|p| p.as_array())
            .ok_or_else(|| anyhow!("Invalid Qdrant scroll response"))?;
        Ok(points
            .iter()
            .map(|p| PointRecord {
                id: p.get("id").map(point_id).unwrap_or_default(),
                vector: vector_of(p),
                payload: payload_of(p),
            })
            .collect())
    }

    async fn delete_points(&self, collection: &str, ids: &[String]) -> Result<()> {
        self.call_ok(
            Method::POST,
            &format!("/collections/{}/points/delete?wait=true", collection),
            Some(json!({ "points": ids })),
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_translates_to_conditions() {
        let f = PayloadFilter::documents_only().must("metadata.filename", "a.txt");
        let j = filter_json(&f);
        assert_eq!(j["must"][0]["key"], "metadata.filename");
        assert_eq!(j["must"][0]["match"]["value"], "a.txt");
        assert_eq!(j["must_not"][0]["key"], "_type");
        assert_eq!(j["must_not"][0]["match"]["value"], "collection_metadata");
    }

    #[test]
    fn empty_filter_is_empty_object() {
        assert_eq!(filter_json(&PayloadFilter::new()), json!({}));
    }

    #[test]
    fn stats_fall_back_to_points_count() {
        let s = stats_of(&json!({ "points_count": 7 }));
        assert_eq!(s.points_count, 7);
        assert_eq!(s.vectors_count, 7);
        let s = stats_of(&json!({ "points_count": 7, "vectors_count": 5 }));
        assert_eq!(s.vectors_count, 5);
    }

    #[test]
    fn numeric_ids_become_strings() {
        assert_eq!(point_id(&json!(42)), "42");
        assert_eq!(point_id(&json!("abc")), "abc");
    }
}
