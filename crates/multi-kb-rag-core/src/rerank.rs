//! Second-stage re-ranking.
//!
//! A [`Reranker`] scores each candidate passage against the query. Backends
//! that cannot produce scores (or a disabled re-ranker) return `Ok(None)`,
//! in which case candidates keep their vector-search order and surface the
//! rank fallback score from [`crate::scoring`].

use anyhow::Result;
use async_trait::async_trait;

#[async_trait]
pub trait Reranker: Send + Sync {
    fn model_name(&self) -> &str;

    /// Score every document against `query`, one score per document in
    /// input order, or `None` when no scores are available.
    async fn score(&self, query: &str, documents: &[String]) -> Result<Option<Vec<f32>>>;
}

/// A candidate kept after re-ranking, with its explicit score if any.
#[derive(Debug, Clone, PartialEq)]
pub struct Ranked<T> {
    pub item: T,
    pub score: Option<f32>,
}

/// Order `items` by `scores` (descending, stable) and keep the best `top_n`.
///
/// Without scores (or with a score count that does not match) the original
/// order is kept and every result is unscored.
pub fn rerank_top_n<T>(items: Vec<T>, scores: Option<Vec<f32>>, top_n: usize) -> Vec<Ranked<T>> {
    match scores {
        Some(scores) if scores.len() == items.len() => {
            let mut paired: Vec<Ranked<T>> = items
                .into_iter()
                .zip(scores)
                .map(|(item, s)| Ranked {
                    item,
                    score: Some(s),
                })
                .collect();
            paired.sort_by(|a, b| {
                b.score
                    .unwrap_or(f32::MIN)
                    .partial_cmp(&a.score.unwrap_or(f32::MIN))
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            paired.truncate(top_n);
            paired
        }
        _ => items
            .into_iter()
            .take(top_n)
            .map(|item| Ranked { item, score: None })
            .collect(),
    }
}
