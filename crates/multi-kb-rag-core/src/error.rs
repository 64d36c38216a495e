//! Error taxonomy surfaced by caller-facing operations.

use thiserror::Error;

/// Failure categories the engine reports to callers.
///
/// Collaborators return `anyhow::Error`; the engine wraps those in
/// [`KbError::Upstream`] at the call site after logging the full chain.
#[derive(Debug, Error)]
pub enum KbError {
    #[error("Knowledge base '{0}' does not exist")]
    NotFound(String),

    #[error("Collection '{0}' already exists")]
    AlreadyExists(String),

    #[error("Session '{session}' not found in knowledge base '{kb}'")]
    SessionNotFound { kb: String, session: String },

    #[error("{0}")]
    Upstream(String),

    #[error("{0}")]
    Extraction(String),

    #[error("{0}")]
    InvalidInput(String),
}

impl KbError {
    /// Stable machine-readable tag for the failure category.
    pub fn kind(&self) -> &'static str {
        match self {
            KbError::NotFound(_) | KbError::SessionNotFound { .. } => "not_found",
            KbError::AlreadyExists(_) => "already_exists",
            KbError::Upstream(_) => "upstream_failure",
            KbError::Extraction(_) => "extraction_failure",
            KbError::InvalidInput(_) => "invalid_input",
        }
    }

    pub fn upstream(err: &anyhow::Error) -> Self {
        KbError::Upstream(format!("{:#}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_stable() {
        assert_eq!(KbError::NotFound("x".into()).kind(), "not_found");
        assert_eq!(KbError::AlreadyExists("x".into()).kind(), "already_exists");
        assert_eq!(
            KbError::upstream(&anyhow::anyhow!("boom")).kind(),
            "upstream_failure"
        );
    }

    #[test]
    fn upstream_keeps_context_chain() {
        let err = anyhow::anyhow!("connection refused").context("vector store search");
        let msg = KbError::upstream(&err).to_string();
        assert!(msg.contains("vector store search"));
        assert!(msg.contains("connection refused"));
    }
}
