//! Per-candidate and per-claim results.

use crate::chunk::Chunk;
use serde::{Deserialize, Serialize};

/// Score and explanation for one (claim, candidate page) pair.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlignmentOutcome {
    /// Alignment similarity of the best matching chunk; 0 when nothing aligned.
    pub score: f64,
    /// Candidate chunk the score belongs to.
    pub matched_chunk: Option<Chunk>,
    /// LLM comparison, absent when that call failed.
    pub explanation: Option<String>,
    /// Stance from -2 (contradicts) to 2 (supports).
    pub rating: Option<i8>,
}

impl AlignmentOutcome {
    /// Zero-score outcome with nothing matched.
    pub fn empty() -> Self {
        Self::default()
    }
}

/// Why a candidate produced no comparison. Diagnostic only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The fetcher returned an error.
    FetchFailed,
    /// The fetch exceeded its timeout.
    FetchTimedOut,
    /// Extraction left fewer than ten characters.
    NoContent,
    /// Nothing survived chunking or selection.
    NoChunks,
}

/// Terminal state of one candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum CandidateState {
    /// Scored and explained.
    Completed,
    /// Scored; the explanation call failed or timed out.
    CompletedWithoutExplanation,
    /// Not scored.
    Skipped(SkipReason),
}

/// Result for one candidate URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateReport {
    /// Candidate page.
    pub url: String,
    /// Position in the search results.
    pub rank: usize,
    /// Score and explanation.
    pub outcome: AlignmentOutcome,
    /// How processing ended.
    pub state: CandidateState,
}

impl CandidateReport {
    /// Zero-score report for a candidate that could not be compared.
    pub fn skipped(url: impl Into<String>, rank: usize, reason: SkipReason) -> Self {
        Self {
            url: url.into(),
            rank,
            outcome: AlignmentOutcome::empty(),
            state: CandidateState::Skipped(reason),
        }
    }

    /// Signed stance in `[-1, 1]` derived from the rating, if the explanation carried one.
    pub fn stance(&self) -> Option<f64> {
        self.outcome.rating.map(|rating| f64::from(rating) / 2.0)
    }

    /// True unless the candidate was skipped.
    pub fn is_scored(&self) -> bool {
        !matches!(self.state, CandidateState::Skipped(_))
    }
}

/// Which stance wins when candidates disagree.
///
/// Applied to the signed LLM rating of each candidate. Alignment scores carry no sign, so they
/// only break ties and rank candidates that have no rating.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
pub enum BestMatchPolicy {
    /// Strongest stance either way; ties prefer support.
    #[default]
    MaxAbsolute,
    /// Most supportive stance.
    PreferSupport,
    /// Most contradicting stance.
    PreferContradiction,
}

impl BestMatchPolicy {
    /// True when stance `candidate` strictly beats `incumbent`.
    pub fn prefers(self, candidate: f64, incumbent: f64) -> bool {
        match self {
            Self::MaxAbsolute => {
                let (c, i) = (candidate.abs(), incumbent.abs());
                c > i || (c == i && candidate > incumbent)
            }
            Self::PreferSupport => candidate > incumbent,
            Self::PreferContradiction => candidate < incumbent,
        }
    }

    /// True when `candidate` should replace `incumbent` as the best report.
    ///
    /// Rated reports beat unrated ones. Equal stances fall back to the alignment score.
    fn beats(self, candidate: &CandidateReport, incumbent: &CandidateReport) -> bool {
        match (candidate.stance(), incumbent.stance()) {
            (Some(c), Some(i)) if c != i => self.prefers(c, i),
            (Some(_), None) => true,
            (None, Some(_)) => false,
            _ => candidate.outcome.score > incumbent.outcome.score,
        }
    }
}

/// Everything learned about one claim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimReport {
    /// The claim chunk from the user's page.
    pub claim: Chunk,
    /// Search query used.
    pub query: String,
    /// Candidates sorted by rank.
    pub candidates: Vec<CandidateReport>,
    /// Reduction applied by [`ClaimReport::best`].
    pub policy: BestMatchPolicy,
    /// Why the claim produced no candidates, when verification itself failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ClaimReport {
    /// Best scored candidate under the report's policy; remaining ties go to the better rank.
    pub fn best(&self) -> Option<&CandidateReport> {
        let mut scored: Vec<&CandidateReport> =
            self.candidates.iter().filter(|c| c.is_scored()).collect();
        scored.sort_by_key(|c| c.rank);
        scored.into_iter().fold(None, |best, candidate| match best {
            Some(incumbent) if !self.policy.beats(candidate, incumbent) => Some(incumbent),
            _ => Some(candidate),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scored(rank: usize, score: f64, rating: Option<i8>) -> CandidateReport {
        CandidateReport {
            url: format!("https://example.org/{rank}"),
            rank,
            outcome: AlignmentOutcome {
                score,
                rating,
                ..AlignmentOutcome::empty()
            },
            state: CandidateState::Completed,
        }
    }

    fn report(policy: BestMatchPolicy, candidates: Vec<CandidateReport>) -> ClaimReport {
        ClaimReport {
            claim: Chunk::new("c0", "claim"),
            query: "q".into(),
            candidates,
            policy,
            error: None,
        }
    }

    #[test]
    fn max_absolute_prefers_magnitude_then_support() {
        let policy = BestMatchPolicy::MaxAbsolute;
        assert!(policy.prefers(-1.0, 0.5));
        assert!(policy.prefers(1.0, -1.0));
        assert!(!policy.prefers(-1.0, 1.0));
        assert!(!policy.prefers(0.5, 0.5));
    }

    #[test]
    fn policies_follow_the_rating_not_the_alignment() {
        let candidates = vec![
            scored(0, 0.92, Some(2)),
            scored(1, 0.40, Some(-2)),
            scored(2, 0.03, Some(0)),
        ];
        let best = |policy| report(policy, candidates.clone()).best().map(|c| c.rank);
        assert_eq!(best(BestMatchPolicy::MaxAbsolute), Some(0));
        assert_eq!(best(BestMatchPolicy::PreferSupport), Some(0));
        assert_eq!(best(BestMatchPolicy::PreferContradiction), Some(1));
    }

    #[test]
    fn contradiction_never_picks_an_unaligned_chunk_without_a_stance() {
        let unrated = report(
            BestMatchPolicy::PreferContradiction,
            vec![scored(0, 0.92, None), scored(1, 0.03, None)],
        );
        assert_eq!(unrated.best().map(|c| c.rank), Some(0));
    }

    #[test]
    fn equal_stances_fall_back_to_alignment_then_rank() {
        let by_score = report(
            BestMatchPolicy::MaxAbsolute,
            vec![scored(0, 0.4, Some(1)), scored(1, 0.8, Some(1))],
        );
        assert_eq!(by_score.best().map(|c| c.rank), Some(1));
        let by_rank = report(
            BestMatchPolicy::MaxAbsolute,
            vec![scored(1, 0.8, Some(1)), scored(0, 0.8, Some(1))],
        );
        assert_eq!(by_rank.best().map(|c| c.rank), Some(0));
    }

    #[test]
    fn rated_candidates_beat_unrated_ones() {
        let mixed = report(
            BestMatchPolicy::PreferSupport,
            vec![scored(0, 0.9, None), scored(1, 0.2, Some(-1))],
        );
        assert_eq!(mixed.best().map(|c| c.rank), Some(1));
    }

    #[test]
    fn best_ignores_completion_order_and_skips() {
        let report = report(
            BestMatchPolicy::MaxAbsolute,
            vec![
                scored(2, 0.8, Some(2)),
                CandidateReport::skipped("https://example.org/0", 0, SkipReason::FetchFailed),
                scored(1, 0.8, Some(2)),
                scored(3, 0.4, Some(-1)),
            ],
        );
        assert_eq!(report.best().map(|c| c.rank), Some(1));
    }

    #[test]
    fn all_skipped_has_no_best() {
        let report = report(
            BestMatchPolicy::default(),
            vec![CandidateReport::skipped("u", 0, SkipReason::NoContent)],
        );
        assert!(report.best().is_none());
    }

    #[test]
    fn state_serializes_with_reason() {
        let json = serde_json::to_value(CandidateState::Skipped(SkipReason::FetchTimedOut)).expect("json");
        assert_eq!(json, serde_json::json!({"state": "skipped", "reason": "fetch_timed_out"}));
    }
}
