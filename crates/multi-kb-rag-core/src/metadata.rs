//! Document metadata: LLM response parsing, layered merging, and KB
//! description composition.
//!
//! # Parse policy
//!
//! The extractor asks the LLM for a JSON object with `doc_type`, `category`,
//! `status`, and `title`. [`parse_metadata_response`] never fails:
//!
//! 1. Markdown code fences around the reply are stripped.
//! 2. The reply is parsed as JSON (falling back to the outermost `{…}` span).
//! 3. A non-object, a parse error, or an object carrying none of the four
//!    fields yields [`MetadataOutcome::Default`].
//! 4. An object carrying at least one field yields
//!    [`MetadataOutcome::Parsed`], with each missing field set to `"Unknown"`.
//!
//! # Merge order
//!
//! Chunk metadata is assembled from three [`MetadataLayer`]s, lowest priority
//! first: system-derived < AI-extracted < caller-supplied.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::Payload;

/// Value used for any field the LLM did not supply.
pub const UNKNOWN: &str = "Unknown";

/// Placeholder shown for KBs whose sentinel carries no usable description.
pub const NO_DESCRIPTION: &str = "No description";

/// Instruction template for metadata extraction. `{context_str}` is replaced
/// by the (truncated) first page of the document.
pub const METADATA_EXTRACTOR_TEMPLATE: &str = "\
You are a document classification assistant.
Read the document excerpt below and return ONLY a JSON object with exactly these keys:
  \"doc_type\": the kind of document (e.g. Act, Regulation, Manual, Report, Contract, Form),
  \"category\": the subject area (e.g. Legal, Medical, Finance, Engineering),
  \"status\": the document status if stated (e.g. Published, Draft, Repealed), otherwise \"Unknown\",
  \"title\": the document title as written in the text.
Do not add any explanation.
---------------------
{context_str}
---------------------
JSON:";

/// Structured fields extracted from a document's first page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocMetadata {
    pub doc_type: String,
    pub category: String,
    pub status: String,
    pub title: String,
}

impl DocMetadata {
    /// The complete default record used when extraction fails.
    pub fn fallback() -> Self {
        Self {
            doc_type: UNKNOWN.to_string(),
            category: UNKNOWN.to_string(),
            status: UNKNOWN.to_string(),
            title: "N/A".to_string(),
        }
    }

    /// Render as a payload layer for [`LayeredMetadata`].
    pub fn to_payload(&self) -> Payload {
        let mut p = Payload::new();
        p.insert("doc_type".into(), Value::String(self.doc_type.clone()));
        p.insert("category".into(), Value::String(self.category.clone()));
        p.insert("status".into(), Value::String(self.status.clone()));
        p.insert("title".into(), Value::String(self.title.clone()));
        p
    }

    /// Compose a KB description: `"[doc_type] title - Category: category (status)"`.
    ///
    /// The status clause is omitted when the status is empty or unknown.
    pub fn describe(&self) -> String {
        let mut out = format!(
            "[{}] {} - Category: {}",
            self.doc_type.trim(),
            self.title.trim(),
            self.category.trim()
        );
        if !is_unknown(&self.status) {
            out.push_str(&format!(" ({})", self.status.trim()));
        }
        out
    }
}

/// Result of parsing an LLM metadata reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataOutcome {
    Parsed(DocMetadata),
    Default { reason: String },
}

impl MetadataOutcome {
    pub fn metadata(&self) -> DocMetadata {
        match self {
            MetadataOutcome::Parsed(m) => m.clone(),
            MetadataOutcome::Default { .. } => DocMetadata::fallback(),
        }
    }

    pub fn is_parsed(&self) -> bool {
        matches!(self, MetadataOutcome::Parsed(_))
    }
}

/// Parse an LLM reply into metadata, falling back to defaults.
pub fn parse_metadata_response(raw: &str) -> MetadataOutcome {
    let stripped = strip_code_fence(raw);

    let value: Value = match serde_json::from_str(stripped) {
        Ok(v) => v,
        Err(first_err) => match outer_object(stripped).map(serde_json::from_str::<Value>) {
            Some(Ok(v)) => v,
            _ => {
                return MetadataOutcome::Default {
                    reason: format!("reply is not JSON: {}", first_err),
                }
            }
        },
    };

    let obj = match value.as_object() {
        Some(o) => o,
        None => {
            return MetadataOutcome::Default {
                reason: "reply is not a JSON object".to_string(),
            }
        }
    };

    let fields = ["doc_type", "category", "status", "title"];
    if !fields.iter().any(|f| obj.contains_key(*f)) {
        return MetadataOutcome::Default {
            reason: "reply carries none of the metadata fields".to_string(),
        };
    }

    let field = |key: &str| -> String {
        match obj.get(key) {
            Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
            Some(Value::Number(n)) => n.to_string(),
            Some(Value::Bool(b)) => b.to_string(),
            _ => UNKNOWN.to_string(),
        }
    };

    MetadataOutcome::Parsed(DocMetadata {
        doc_type: field("doc_type"),
        category: field("category"),
        status: field("status"),
        title: field("title"),
    })
}

/// Remove a surrounding Markdown code fence (```` ```json ... ``` ````).
pub fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string (e.g. `json`) on the opening fence line.
    let body = match rest.find('\n') {
        Some(pos) => &rest[pos + 1..],
        None => rest.trim_start_matches("json"),
    };
    body.trim_end().trim_end_matches("```").trim()
}

fn outer_object(s: &str) -> Option<&str> {
    let start = s.find('{')?;
    let end = s.rfind('}')?;
    (end > start).then(|| &s[start..=end])
}

fn is_unknown(s: &str) -> bool {
    let t = s.trim();
    t.is_empty() || t.eq_ignore_ascii_case(UNKNOWN) || t.eq_ignore_ascii_case("n/a")
}

/// True when `description` would be a useful routing target.
///
/// Empty text, the [`NO_DESCRIPTION`] placeholder, auto-create notes, and the
/// description composed from fallback metadata are all rejected.
pub fn is_meaningful_description(description: &str) -> bool {
    let d = description.trim();
    !(d.is_empty()
        || d.eq_ignore_ascii_case(NO_DESCRIPTION)
        || d.starts_with("Auto-created for")
        || d == DocMetadata::fallback().describe())
}

/// Metadata sources in increasing priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MetadataLayer {
    /// Filename, page number, timestamps, KB name.
    System,
    /// Fields inferred by the metadata extractor.
    Extracted,
    /// Overrides supplied by the caller.
    Caller,
}

/// Metadata assembled from prioritized layers.
///
/// ```rust
/// use multi_kb_rag_core::metadata::{LayeredMetadata, MetadataLayer};
/// use serde_json::json;
///
/// let mut layers = LayeredMetadata::new();
/// layers.set(MetadataLayer::Caller, json!({ "title": "Mine" }).as_object().unwrap().clone());
/// layers.set(MetadataLayer::Extracted, json!({ "title": "AI" }).as_object().unwrap().clone());
/// assert_eq!(layers.merged()["title"], "Mine");
/// ```
#[derive(Debug, Clone, Default)]
pub struct LayeredMetadata {
    layers: BTreeMap<MetadataLayer, Payload>,
}

impl LayeredMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the contents of one layer.
    pub fn set(&mut self, layer: MetadataLayer, fields: Payload) -> &mut Self {
        self.layers.insert(layer, fields);
        self
    }

    pub fn layer(&self, layer: MetadataLayer) -> Option<&Payload> {
        self.layers.get(&layer)
    }

    /// Flatten the layers; higher-priority layers overwrite lower ones key by key.
    pub fn merged(&self) -> Payload {
        let mut out = Payload::new();
        for fields in self.layers.values() {
            for (k, v) in fields {
                out.insert(k.clone(), v.clone());
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(v: Value) -> Payload {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn parses_fenced_json() {
        let raw = "```json\n{\"doc_type\": \"Act\", \"category\": \"Legal\", \"status\": \"Published\", \"title\": \"Firearms Act\"}\n```";
        let out = parse_metadata_response(raw);
        assert!(out.is_parsed());
        let m = out.metadata();
        assert_eq!(m.doc_type, "Act");
        assert_eq!(m.title, "Firearms Act");
    }

    #[test]
    fn parses_bare_fence_without_language() {
        let raw = "```\n{\"doc_type\": \"Memo\"}\n```";
        assert_eq!(parse_metadata_response(raw).metadata().doc_type, "Memo");
    }

    #[test]
    fn parses_json_wrapped_in_prose() {
        let raw = "Sure! Here it is: {\"doc_type\": \"Report\", \"title\": \"Q3\"} Hope that helps.";
        let m = parse_metadata_response(raw).metadata();
        assert_eq!(m.doc_type, "Report");
        assert_eq!(m.title, "Q3");
    }

    #[test]
    fn missing_fields_become_unknown() {
        let m = parse_metadata_response(r#"{"doc_type": "Manual"}"#).metadata();
        assert_eq!(m.doc_type, "Manual");
        assert_eq!(m.category, "Unknown");
        assert_eq!(m.status, "Unknown");
        assert_eq!(m.title, "Unknown");
    }

    #[test]
    fn garbage_falls_back_to_defaults() {
        let out = parse_metadata_response("I could not read the document.");
        assert!(!out.is_parsed());
        assert_eq!(out.metadata(), DocMetadata::fallback());
    }

    #[test]
    fn non_object_falls_back() {
        assert!(!parse_metadata_response("[1, 2, 3]").is_parsed());
        assert!(!parse_metadata_response("\"just a string\"").is_parsed());
    }

    #[test]
    fn object_without_any_field_falls_back() {
        assert!(!parse_metadata_response(r#"{"foo": "bar"}"#).is_parsed());
    }

    #[test]
    fn describe_with_and_without_status() {
        let mut m = DocMetadata {
            doc_type: "Act".into(),
            category: "Legal".into(),
            status: "Published".into(),
            title: "Firearms Act".into(),
        };
        assert_eq!(m.describe(), "[Act] Firearms Act - Category: Legal (Published)");
        m.status = "Unknown".into();
        assert_eq!(m.describe(), "[Act] Firearms Act - Category: Legal");
        m.status = String::new();
        assert_eq!(m.describe(), "[Act] Firearms Act - Category: Legal");
    }

    #[test]
    fn placeholder_descriptions_are_not_meaningful() {
        assert!(!is_meaningful_description(""));
        assert!(!is_meaningful_description("   "));
        assert!(!is_meaningful_description("No description"));
        assert!(!is_meaningful_description("Auto-created for report.pdf"));
        assert!(!is_meaningful_description(&DocMetadata::fallback().describe()));
        assert!(is_meaningful_description("Thai firearm licensing law"));
    }

    #[test]
    fn merge_respects_layer_priority_regardless_of_insert_order() {
        let mut layers = LayeredMetadata::new();
        layers.set(
            MetadataLayer::Caller,
            obj(json!({ "category": "Override" })),
        );
        layers.set(
            MetadataLayer::System,
            obj(json!({ "filename": "a.pdf", "category": "sys", "page_number": 1 })),
        );
        layers.set(
            MetadataLayer::Extracted,
            obj(json!({ "category": "Legal", "doc_type": "Act", "filename": "ai.pdf" })),
        );

        let merged = layers.merged();
        assert_eq!(merged["category"], "Override");
        assert_eq!(merged["filename"], "ai.pdf");
        assert_eq!(merged["doc_type"], "Act");
        assert_eq!(merged["page_number"], 1);
    }

    #[test]
    fn merge_with_missing_layers() {
        let mut layers = LayeredMetadata::new();
        layers.set(MetadataLayer::System, obj(json!({ "filename": "a.pdf" })));
        assert_eq!(layers.merged()["filename"], "a.pdf");
        assert!(layers.layer(MetadataLayer::Caller).is_none());
    }
}
