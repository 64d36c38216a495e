//! Relevance score presentation: confidence buckets, rank fallback, rounding.

use serde::{Deserialize, Serialize};

/// Qualitative label attached to a surfaced relevance score.
///
/// Lower bounds are inclusive: `0.7` is `High`, `0.5` is `Medium`,
/// `0.3` is `Low`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    High,
    Medium,
    Low,
    VeryLow,
}

impl Confidence {
    pub fn from_score(score: f64) -> Self {
        if score >= 0.7 {
            Confidence::High
        } else if score >= 0.5 {
            Confidence::Medium
        } else if score >= 0.3 {
            Confidence::Low
        } else {
            Confidence::VeryLow
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Confidence::High => "high",
            Confidence::Medium => "medium",
            Confidence::Low => "low",
            Confidence::VeryLow => "very_low",
        }
    }
}

impl std::fmt::Display for Confidence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Score assigned to an unscored result at 0-based `rank`: `1.0 - 0.1 * rank`,
/// floored at zero.
pub fn rank_fallback_score(rank: usize) -> f64 {
    round4((1.0 - 0.1 * rank as f64).max(0.0))
}

/// Round to 4 decimal places.
pub fn round4(score: f64) -> f64 {
    (score * 10_000.0).round() / 10_000.0
}

/// Resolve the surfaced score of each result in rank order, using the
/// explicit score when present and the rank fallback otherwise.
pub fn resolve_scores(explicit: &[Option<f32>]) -> Vec<f64> {
    explicit
        .iter()
        .enumerate()
        .map(|(rank, s)| match s {
            Some(v) if v.is_finite() => round4(*v as f64),
            _ => rank_fallback_score(rank),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buckets() {
        assert_eq!(Confidence::from_score(0.85), Confidence::High);
        assert_eq!(Confidence::from_score(0.55), Confidence::Medium);
        assert_eq!(Confidence::from_score(0.35), Confidence::Low);
        assert_eq!(Confidence::from_score(0.1), Confidence::VeryLow);
    }

    #[test]
    fn bucket_boundaries_are_inclusive() {
        assert_eq!(Confidence::from_score(0.7), Confidence::High);
        assert_eq!(Confidence::from_score(0.5), Confidence::Medium);
        assert_eq!(Confidence::from_score(0.3), Confidence::Low);
        assert_eq!(Confidence::from_score(0.2999), Confidence::VeryLow);
    }

    #[test]
    fn serializes_snake_case() {
        let json = serde_json::to_string(&Confidence::VeryLow).unwrap();
        assert_eq!(json, "\"very_low\"");
        assert_eq!(Confidence::High.to_string(), "high");
    }

    #[test]
    fn three_unscored_results() {
        assert_eq!(resolve_scores(&[None, None, None]), vec![1.0, 0.9, 0.8]);
    }

    #[test]
    fn fallback_never_goes_negative() {
        assert_eq!(rank_fallback_score(10), 0.0);
        assert_eq!(rank_fallback_score(15), 0.0);
    }

    #[test]
    fn explicit_scores_are_rounded() {
        let scores = resolve_scores(&[Some(0.987_654), None, Some(f32::NAN)]);
        assert_eq!(scores[0], 0.9877);
        assert_eq!(scores[1], 0.9);
        assert_eq!(scores[2], 0.8);
    }
}
