//! Core data models shared by the engine and its collaborators.
//!
//! Vector-store points carry a free-form JSON payload. Three payload shapes
//! live in the store:
//!
//! | Shape | Where | Distinguished by |
//! |-------|-------|------------------|
//! | document chunk | every KB collection | `page_content` + `metadata` keys |
//! | sentinel | every KB collection, exactly one | `_type = "collection_metadata"` |
//! | router entry | the router index collection | one per KB, id derived from the collection name |

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// JSON object stored alongside a vector.
pub type Payload = Map<String, Value>;

/// Payload key holding the type tag of non-document points.
pub const TYPE_KEY: &str = "_type";
/// Type tag of the sentinel point carrying collection-level metadata.
pub const SENTINEL_TYPE: &str = "collection_metadata";
/// Payload key holding a chunk's text.
pub const CONTENT_KEY: &str = "page_content";
/// Payload key holding a chunk's merged metadata bag.
pub const METADATA_KEY: &str = "metadata";

/// A point as written to or scrolled from a vector collection.
#[derive(Debug, Clone, PartialEq)]
pub struct PointRecord {
    pub id: String,
    pub vector: Vec<f32>,
    pub payload: Payload,
}

/// A point returned from a similarity search, ranked by `score`.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredPoint {
    pub id: String,
    pub score: f32,
    pub payload: Payload,
}

/// Point and vector counts reported by the vector store for one collection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CollectionStats {
    pub points_count: u64,
    pub vectors_count: u64,
}

/// Payload field-equality filter.
///
/// A point matches when every `must` pair is equal to the point's payload
/// field and no `must_not` pair is.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PayloadFilter {
    pub must: Vec<(String, Value)>,
    pub must_not: Vec<(String, Value)>,
}

impl PayloadFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn must(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.must.push((key.into(), value.into()));
        self
    }

    pub fn must_not(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.must_not.push((key.into(), value.into()));
        self
    }

    /// Selects only the sentinel point of a KB collection.
    pub fn sentinel_only() -> Self {
        Self::new().must(TYPE_KEY, SENTINEL_TYPE)
    }

    /// Excludes the sentinel point from a KB collection search.
    pub fn documents_only() -> Self {
        Self::new().must_not(TYPE_KEY, SENTINEL_TYPE)
    }

    /// Evaluate the filter against a payload. Keys may be dotted paths
    /// (`metadata.filename`).
    pub fn matches(&self, payload: &Payload) -> bool {
        self.must
            .iter()
            .all(|(k, v)| lookup(payload, k) == Some(v))
            && !self
                .must_not
                .iter()
                .any(|(k, v)| lookup(payload, k) == Some(v))
    }
}

fn lookup<'a>(payload: &'a Payload, path: &str) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let first = parts.next()?;
    let mut current = payload.get(first)?;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

/// One page of text produced by the text extractor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageText {
    pub page_number: u32,
    pub text: String,
}

/// A split, embeddable slice of a page, carrying its merged metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentChunk {
    /// Deterministic point id, stable across re-uploads of the same content.
    pub id: String,
    /// Position of the chunk within its page.
    pub chunk_index: usize,
    pub text: String,
    /// SHA-256 of `text`.
    pub hash: String,
    pub metadata: Payload,
}

impl DocumentChunk {
    /// Payload layout written to the vector store.
    pub fn to_payload(&self) -> Payload {
        let mut payload = Payload::new();
        payload.insert(CONTENT_KEY.to_string(), Value::String(self.text.clone()));
        payload.insert(
            METADATA_KEY.to_string(),
            Value::Object(self.metadata.clone()),
        );
        payload
    }
}

/// One prior exchange in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub question: String,
    pub answer: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(v: Value) -> Payload {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn filter_must_and_must_not() {
        let sentinel = payload(json!({ "_type": "collection_metadata", "kb_name": "legal" }));
        let chunk = payload(json!({ "page_content": "x", "metadata": { "filename": "a.txt" } }));

        assert!(PayloadFilter::sentinel_only().matches(&sentinel));
        assert!(!PayloadFilter::sentinel_only().matches(&chunk));
        assert!(PayloadFilter::documents_only().matches(&chunk));
        assert!(!PayloadFilter::documents_only().matches(&sentinel));
    }

    #[test]
    fn filter_dotted_path() {
        let chunk = payload(json!({ "metadata": { "filename": "a.txt" } }));
        assert!(PayloadFilter::new()
            .must("metadata.filename", "a.txt")
            .matches(&chunk));
        assert!(!PayloadFilter::new()
            .must("metadata.filename", "b.txt")
            .matches(&chunk));
    }

    #[test]
    fn empty_filter_matches_everything() {
        assert!(PayloadFilter::new().matches(&Payload::new()));
    }
}
