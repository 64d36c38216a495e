//! LLM-backed document metadata extraction.
//!
//! Only the first page is sent, truncated to a character budget. Any LLM
//! failure degrades to [`MetadataOutcome::Default`]; extraction never fails
//! the upload.

use std::sync::Arc;

use tracing::{debug, warn};

use multi_kb_rag_core::llm::ChatModel;
use multi_kb_rag_core::metadata::{parse_metadata_response, MetadataOutcome, METADATA_EXTRACTOR_TEMPLATE};

pub struct MetadataExtractor {
    llm: Arc<dyn ChatModel>,
    char_budget: usize,
}

impl MetadataExtractor {
    pub fn new(llm: Arc<dyn ChatModel>, char_budget: usize) -> Self {
        Self { llm, char_budget }
    }

    pub async fn extract(&self, first_page: &str) -> MetadataOutcome {
        let excerpt = truncate_chars(first_page.trim(), self.char_budget);
        if excerpt.is_empty() {
            return MetadataOutcome::Default {
                reason: "first page has no text".into(),
            };
        }

        let prompt = METADATA_EXTRACTOR_TEMPLATE.replace("{context_str}", excerpt);
        match self.llm.invoke(&prompt).await {
            Ok(reply) => {
                let outcome = parse_metadata_response(&reply);
                if let MetadataOutcome::Default { reason } = &outcome {
                    warn!(%reason, "metadata reply unusable, using defaults");
                } else {
                    debug!("metadata extracted");
                }
                outcome
            }
            Err(e) => {
                warn!(error = %format!("{:#}", e), "metadata extraction failed, using defaults");
                MetadataOutcome::Default {
                    reason: format!("LLM call failed: {:#}", e),
                }
            }
        }
    }
}

/// The first `max` characters of `s`, cut on a char boundary.
pub fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{bail, Result};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct Scripted {
        reply: Result<String, String>,
        prompts: Mutex<Vec<String>>,
    }

    impl Scripted {
        fn new(reply: Result<&str, &str>) -> Self {
            Self {
                reply: reply.map(String::from).map_err(String::from),
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ChatModel for Scripted {
        fn model_name(&self) -> &str {
            "scripted"
        }
        async fn invoke(&self, prompt: &str) -> Result<String> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            match &self.reply {
                Ok(r) => Ok(r.clone()),
                Err(e) => bail!("{}", e),
            }
        }
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_chars("กขคง", 2), "กข");
        assert_eq!(truncate_chars("abc", 10), "abc");
        assert_eq!(truncate_chars("abc", 0), "");
    }

    #[tokio::test]
    async fn parses_llm_reply() {
        let llm = Arc::new(Scripted::new(Ok(
            r#"{"doc_type":"Act","category":"Legal","status":"Published","title":"Firearms Act"}"#,
        )));
        let ex = MetadataExtractor::new(llm, 100);
        let out = ex.extract("Firearms Act B.E. 2490").await;
        assert!(out.is_parsed());
        assert_eq!(out.metadata().title, "Firearms Act");
    }

    #[tokio::test]
    async fn prompt_carries_truncated_page() {
        let llm = Arc::new(Scripted::new(Ok("{}")));
        let ex = MetadataExtractor::new(llm.clone(), 5);
        ex.extract("abcdefghij").await;
        let prompts = llm.prompts.lock().unwrap();
        assert!(prompts[0].contains("abcde\n"));
        assert!(!prompts[0].contains("abcdef"));
    }

    #[tokio::test]
    async fn llm_failure_degrades_to_defaults() {
        let llm = Arc::new(Scripted::new(Err("timeout")));
        let ex = MetadataExtractor::new(llm, 100);
        let out = ex.extract("text").await;
        assert!(!out.is_parsed());
        assert_eq!(out.metadata().doc_type, "Unknown");
    }

    #[tokio::test]
    async fn blank_page_skips_llm() {
        let llm = Arc::new(Scripted::new(Ok("{}")));
        let ex = MetadataExtractor::new(llm.clone(), 100);
        assert!(!ex.extract("   ").await.is_parsed());
        assert!(llm.prompts.lock().unwrap().is_empty());
    }
}
