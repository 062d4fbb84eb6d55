//! Diversity-aware chunk selection (maximal marginal relevance).
//!
//! Every strategy reduces to the same pair of inputs: a per-chunk importance vector and a
//! pairwise similarity matrix. The greedy MMR loop in [`mmr`] is shared by all of them, so
//! swapping strategies never changes the selection contract:
//!
//! * zero requested chunks (or empty input) yields an empty list,
//! * a request at or above the input size returns a copy of the input,
//! * otherwise exactly `n` distinct input chunks come back, most important first.

mod centroid;
mod lexical;
mod terms;
mod textrank;

pub use centroid::{kmeans, CentroidStrategy, Clustering, KMeansParams, REPRESENTATIVE_BONUS};
pub use lexical::LexicalStrategy;
pub use terms::{TfIdfMatrix, TfIdfParams};
pub use textrank::{pagerank, PageRankParams, TextRankStrategy};

use crate::chunk::{Chunk, ScoredChunk};
use crate::controls::SelectorControls;
use crate::model_cache::ModelCache;
use crate::pool::{ComputePool, PoolError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Failures while scoring chunks.
#[derive(Debug, Error)]
pub enum SelectError {
    /// The embedding backend failed.
    #[error("embedding failed: {0}")]
    Embedding(#[source] anyhow::Error),
    /// The strategy returned vectors that do not match the input.
    #[error("strategy {strategy} returned {got} scores for {expected} chunks")]
    ShapeMismatch {
        /// Strategy name.
        strategy: &'static str,
        /// Number of chunks passed in.
        expected: usize,
        /// Number of scores returned.
        got: usize,
    },
    /// The compute pool dropped the job.
    #[error(transparent)]
    Pool(#[from] PoolError),
}

/// Importance and similarity produced by one strategy run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StrategyScores {
    /// Standalone importance per chunk (any non-negative scale).
    pub importance: Vec<f64>,
    /// Pairwise similarity in `[0, 1]`.
    pub similarity: Vec<Vec<f64>>,
    /// Named inputs behind each importance value.
    pub features: Vec<BTreeMap<String, f64>>,
}

/// Computes `(importance, similarity)` for a set of chunks.
pub trait SelectionStrategy: Send + Sync {
    /// Short name for logs and feature maps.
    fn name(&self) -> &'static str;

    /// Scores `chunks`; `n` is the requested selection size for strategies that cluster.
    fn scores(&self, chunks: &[Chunk], n: usize) -> Result<StrategyScores, SelectError>;
}

/// Built-in strategies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyKind {
    /// TF-IDF weight sums and cosine redundancy.
    #[default]
    Lexical,
    /// PageRank over the TF-IDF similarity graph.
    TextRank,
    /// k-means over embeddings, representatives nearest each centroid.
    EmbeddingCentroid,
}

impl StrategyKind {
    /// Instantiates the strategy against shared models.
    pub fn build(self, cache: Arc<ModelCache>, centrality_weight: f64) -> Arc<dyn SelectionStrategy> {
        match self {
            Self::Lexical => Arc::new(LexicalStrategy::new(cache)),
            Self::TextRank => Arc::new(TextRankStrategy::new(cache)),
            Self::EmbeddingCentroid => Arc::new(CentroidStrategy::new(cache, centrality_weight)),
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Lexical => "lexical",
            Self::TextRank => "text-rank",
            Self::EmbeddingCentroid => "embedding-centroid",
        };
        f.write_str(name)
    }
}

/// One MMR pick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MmrPick {
    /// Index into the scored input.
    pub index: usize,
    /// Objective value when picked.
    pub objective: f64,
    /// Highest similarity to anything picked earlier (0 for the seed).
    pub max_redundancy: f64,
}

/// Greedy maximal marginal relevance over precomputed scores.
///
/// Importance is scaled so its maximum is 1. The seed is the most important item; each later
/// round takes the item maximizing `λ·importance + (1−λ)·min(1 − similarity to picked)`.
/// Ties go to the lower index.
pub fn mmr(importance: &[f64], similarity: &[Vec<f64>], n: usize, lambda: f64) -> Vec<MmrPick> {
    let size = importance.len();
    let n = n.min(size);
    if n == 0 {
        return Vec::new();
    }
    let peak = importance.iter().copied().fold(0.0f64, f64::max);
    let scaled: Vec<f64> = importance
        .iter()
        .map(|v| if peak > 0.0 { v.max(0.0) / peak } else { 0.0 })
        .collect();

    let mut picked: Vec<MmrPick> = Vec::with_capacity(n);
    let mut taken = vec![false; size];
    let mut max_sim = vec![0.0f64; size];
    while picked.len() < n {
        let mut best: Option<(usize, f64)> = None;
        for idx in (0..size).filter(|&idx| !taken[idx]) {
            let objective = if picked.is_empty() {
                scaled[idx]
            } else {
                lambda * scaled[idx] + (1.0 - lambda) * (1.0 - max_sim[idx])
            };
            if best.map_or(true, |(_, value)| objective > value) {
                best = Some((idx, objective));
            }
        }
        let Some((index, objective)) = best else {
            break;
        };
        taken[index] = true;
        picked.push(MmrPick {
            index,
            objective,
            max_redundancy: max_sim[index],
        });
        for idx in 0..size {
            let sim = similarity
                .get(index)
                .and_then(|row| row.get(idx))
                .copied()
                .unwrap_or(0.0);
            max_sim[idx] = max_sim[idx].max(sim);
        }
    }
    picked
}

/// Groups items into topics and returns one leader per topic first, then the rest by importance.
///
/// Topics are built greedily in importance order: an unassigned item joins the current leader's
/// topic when their similarity reaches `min_topic_similarity`. Topics are visited by size, then
/// by leader importance, both descending.
pub fn topic_cover(
    importance: &[f64],
    similarity: &[Vec<f64>],
    n: usize,
    min_topic_similarity: f64,
) -> Vec<usize> {
    let size = importance.len();
    let mut order: Vec<usize> = (0..size).collect();
    order.sort_by(|&a, &b| importance[b].total_cmp(&importance[a]));

    let mut assigned = vec![false; size];
    let mut topics: Vec<Vec<usize>> = Vec::new();
    for (pos, &leader) in order.iter().enumerate() {
        if assigned[leader] {
            continue;
        }
        assigned[leader] = true;
        let mut topic = vec![leader];
        for &other in &order[pos + 1..] {
            if !assigned[other] && similarity[leader][other] >= min_topic_similarity {
                assigned[other] = true;
                topic.push(other);
            }
        }
        topics.push(topic);
    }
    topics.sort_by(|a, b| {
        b.len()
            .cmp(&a.len())
            .then_with(|| importance[b[0]].total_cmp(&importance[a[0]]))
    });

    let mut chosen: Vec<usize> = topics.iter().map(|topic| topic[0]).take(n).collect();
    for idx in order {
        if chosen.len() >= n {
            break;
        }
        if !chosen.contains(&idx) {
            chosen.push(idx);
        }
    }
    chosen
}

/// Selects diverse, important chunks with a pluggable strategy.
#[derive(Clone)]
pub struct ChunkSelector {
    strategy: Arc<dyn SelectionStrategy>,
    lambda: f64,
    min_topic_similarity: f64,
}

impl fmt::Debug for ChunkSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkSelector")
            .field("strategy", &self.strategy.name())
            .field("lambda", &self.lambda)
            .finish()
    }
}

impl ChunkSelector {
    /// Wraps a strategy with the MMR trade-off `lambda` (clamped to `[0, 1]`).
    pub fn new(strategy: Arc<dyn SelectionStrategy>, lambda: f64) -> Self {
        Self {
            strategy,
            lambda: lambda.clamp(0.0, 1.0),
            min_topic_similarity: 0.15,
        }
    }

    /// Builds the configured strategy.
    pub fn from_controls(controls: &SelectorControls, cache: Arc<ModelCache>) -> Self {
        let strategy = controls
            .strategy()
            .build(cache, controls.centrality_weight());
        Self::new(strategy, controls.lambda()).with_min_topic_similarity(controls.min_topic_similarity())
    }

    /// Similarity threshold used by [`ChunkSelector::select_topic_covering`].
    pub fn with_min_topic_similarity(mut self, threshold: f64) -> Self {
        self.min_topic_similarity = threshold;
        self
    }

    /// Strategy name.
    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    /// MMR trade-off in use.
    pub fn lambda(&self) -> f64 {
        self.lambda
    }

    /// Strategy scores with each chunk's importance hint applied as a multiplier.
    fn scores(&self, chunks: &[Chunk], n: usize) -> Result<StrategyScores, SelectError> {
        let mut scores = self.strategy.scores(chunks, n)?;
        let square = scores.similarity.len() == chunks.len()
            && scores.similarity.iter().all(|row| row.len() == chunks.len());
        if scores.importance.len() != chunks.len() || !square {
            return Err(SelectError::ShapeMismatch {
                strategy: self.strategy.name(),
                expected: chunks.len(),
                got: scores.importance.len(),
            });
        }
        scores.features.resize_with(chunks.len(), BTreeMap::new);
        for (idx, chunk) in chunks.iter().enumerate() {
            if let Some(hint) = chunk.importance_hint() {
                scores.importance[idx] *= hint.max(0.0);
                scores.features[idx].insert("importance_hint".to_string(), hint);
            }
        }
        Ok(scores)
    }

    /// Picks up to `n` chunks, most important first.
    pub fn select(&self, chunks: &[Chunk], n: usize) -> Result<Vec<Chunk>, SelectError> {
        if n == 0 || chunks.is_empty() {
            return Ok(Vec::new());
        }
        if n >= chunks.len() {
            return Ok(chunks.to_vec());
        }
        Ok(self
            .select_scored(chunks, n)?
            .into_iter()
            .map(|scored| scored.chunk)
            .collect())
    }

    /// Like [`ChunkSelector::select`] but keeps the scores.
    ///
    /// When `n` covers the whole input, chunks keep their input order and `relevance` is the
    /// scaled importance.
    pub fn select_scored(&self, chunks: &[Chunk], n: usize) -> Result<Vec<ScoredChunk>, SelectError> {
        if n == 0 || chunks.is_empty() {
            return Ok(Vec::new());
        }
        let scores = self.scores(chunks, n.min(chunks.len()))?;
        let picks = if n >= chunks.len() {
            let peak = scores.importance.iter().copied().fold(0.0f64, f64::max);
            (0..chunks.len())
                .map(|index| MmrPick {
                    index,
                    objective: if peak > 0.0 { scores.importance[index] / peak } else { 0.0 },
                    max_redundancy: 0.0,
                })
                .collect()
        } else {
            mmr(&scores.importance, &scores.similarity, n, self.lambda)
        };
        tracing::debug!(
            strategy = self.strategy.name(),
            requested = n,
            available = chunks.len(),
            picked = picks.len(),
            "selected chunks"
        );

        Ok(picks
            .into_iter()
            .map(|pick| {
                let mut features = scores.features.get(pick.index).cloned().unwrap_or_default();
                features.insert("max_redundancy".to_string(), pick.max_redundancy);
                ScoredChunk {
                    chunk: chunks[pick.index].clone(),
                    relevance: pick.objective,
                    contributing_features: features,
                }
            })
            .collect())
    }

    /// Covers as many distinct topics as possible before repeating one.
    pub fn select_topic_covering(&self, chunks: &[Chunk], n: usize) -> Result<Vec<Chunk>, SelectError> {
        if n == 0 || chunks.is_empty() {
            return Ok(Vec::new());
        }
        if n >= chunks.len() {
            return Ok(chunks.to_vec());
        }
        let scores = self.scores(chunks, n)?;
        Ok(topic_cover(
            &scores.importance,
            &scores.similarity,
            n,
            self.min_topic_similarity,
        )
        .into_iter()
        .map(|idx| chunks[idx].clone())
        .collect())
    }

    /// Runs [`ChunkSelector::select`] on the compute pool.
    pub async fn select_on(
        &self,
        pool: &ComputePool,
        chunks: Vec<Chunk>,
        n: usize,
    ) -> Result<Vec<Chunk>, SelectError> {
        let selector = self.clone();
        pool.run(move || selector.select(&chunks, n)).await?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedScores(StrategyScores);

    impl SelectionStrategy for FixedScores {
        fn name(&self) -> &'static str {
            "fixed"
        }

        fn scores(&self, _chunks: &[Chunk], _n: usize) -> Result<StrategyScores, SelectError> {
            Ok(self.0.clone())
        }
    }

    fn fixed(importance: Vec<f64>, similarity: Vec<Vec<f64>>) -> ChunkSelector {
        let features = vec![BTreeMap::new(); importance.len()];
        ChunkSelector::new(
            Arc::new(FixedScores(StrategyScores {
                importance,
                similarity,
                features,
            })),
            0.5,
        )
    }

    #[test]
    fn zero_request_is_empty() {
        let selector = fixed(vec![1.0], vec![vec![1.0]]);
        let chunks = Chunk::from_texts(["only"]);
        assert!(selector.select(&chunks, 0).expect("select").is_empty());
        assert!(selector.select(&[], 3).expect("select").is_empty());
    }

    #[test]
    fn oversized_request_copies_input() {
        let selector = fixed(vec![0.1, 0.9], vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
        let chunks = Chunk::from_texts(["a", "b"]);
        assert_eq!(selector.select(&chunks, 5).expect("select"), chunks);
    }

    #[test]
    fn mmr_skips_redundant_chunk() {
        // 0 and 1 are near duplicates; 2 is less important but different.
        let similarity = vec![
            vec![1.0, 0.95, 0.1],
            vec![0.95, 1.0, 0.1],
            vec![0.1, 0.1, 1.0],
        ];
        let picks = mmr(&[1.0, 0.9, 0.5], &similarity, 2, 0.5);
        let order: Vec<usize> = picks.iter().map(|p| p.index).collect();
        assert_eq!(order, vec![0, 2]);
        assert!((picks[1].max_redundancy - 0.1).abs() < 1e-12);
    }

    #[test]
    fn lambda_one_is_pure_importance() {
        let similarity = vec![
            vec![1.0, 0.95, 0.1],
            vec![0.95, 1.0, 0.1],
            vec![0.1, 0.1, 1.0],
        ];
        let order: Vec<usize> = mmr(&[1.0, 0.9, 0.5], &similarity, 3, 1.0)
            .iter()
            .map(|p| p.index)
            .collect();
        assert_eq!(order, vec![0, 1, 2]);
    }

    #[test]
    fn ties_prefer_lower_index() {
        let similarity = vec![vec![0.0; 3]; 3];
        let order: Vec<usize> = mmr(&[0.5, 0.5, 0.5], &similarity, 2, 0.7)
            .iter()
            .map(|p| p.index)
            .collect();
        assert_eq!(order, vec![0, 1]);
    }

    #[test]
    fn shape_mismatch_is_reported() {
        let selector = fixed(vec![1.0], vec![vec![1.0]]);
        let chunks = Chunk::from_texts(["a", "b", "c"]);
        assert!(matches!(
            selector.select(&chunks, 2),
            Err(SelectError::ShapeMismatch { expected: 3, got: 1, .. })
        ));
    }

    #[test]
    fn topic_cover_takes_one_per_topic_first() {
        let similarity = vec![
            vec![1.0, 0.8, 0.0, 0.0],
            vec![0.8, 1.0, 0.0, 0.0],
            vec![0.0, 0.0, 1.0, 0.9],
            vec![0.0, 0.0, 0.9, 1.0],
        ];
        assert_eq!(topic_cover(&[0.9, 0.8, 0.7, 0.2], &similarity, 2, 0.15), vec![0, 2]);
        assert_eq!(topic_cover(&[0.9, 0.8, 0.7, 0.2], &similarity, 3, 0.15), vec![0, 2, 1]);
    }

    #[test]
    fn scored_selection_reports_features() {
        let selector = fixed(
            vec![1.0, 0.2, 0.6],
            vec![vec![1.0, 0.0, 0.0], vec![0.0, 1.0, 0.0], vec![0.0, 0.0, 1.0]],
        );
        let chunks = Chunk::from_texts(["a", "b", "c"]);
        let scored = selector.select_scored(&chunks, 2).expect("select");
        assert_eq!(scored[0].chunk.id(), "c0");
        assert_eq!(scored[0].relevance, 1.0);
        assert_eq!(scored[1].chunk.id(), "c2");
        assert_eq!(scored[1].contributing_features["max_redundancy"], 0.0);
    }

    #[test]
    fn importance_hint_scales_strategy_importance() {
        let selector = fixed(
            vec![1.0, 0.9, 0.5],
            vec![vec![1.0, 0.0, 0.0], vec![0.0, 1.0, 0.0], vec![0.0, 0.0, 1.0]],
        );
        let mut chunks = Chunk::from_texts(["a", "b", "c"]);
        chunks[0] = chunks[0].clone().with_importance_hint(0.1);
        let scored = selector.select_scored(&chunks, 1).expect("select");
        assert_eq!(scored[0].chunk.id(), "c1");
        let all = selector.select_scored(&chunks, 3).expect("select");
        assert_eq!(all[0].contributing_features["importance_hint"], 0.1);
    }

    const BRIDGE: &str = "The Sydney Harbour Bridge is a steel through arch bridge that carries rail, \
        vehicle, bicycle and pedestrian traffic between the central business district and the North \
        Shore. The bridge opened in 1932 after eight years of construction and remains one of the \
        most photographed landmarks in Australia today.";
    const SOURDOUGH: &str = "Sourdough bread relies on a starter culture of wild yeast and lactic acid \
        bacteria instead of commercial yeast. Bakers feed the starter with flour and water, mix it \
        into a dough with salt, and let the dough ferment slowly for many hours, which gives the \
        loaf its tangy flavour and open crumb.";
    const DECK: &str = "The bridge deck carries eight vehicle lanes and two railway lines, and its arch \
        span reaches 503 metres. Workers painted the bridge with grey paint during construction, and \
        repainting the bridge steel remains a continuous maintenance task for the crews who climb \
        the arch of the bridge every week.";
    const OCTOPUS: &str = "Octopuses are soft bodied molluscs with eight arms, three hearts and blue \
        blood. They can change the colour and texture of their skin within a fraction of a second, \
        solve simple puzzles in laboratory experiments, and squeeze through any opening larger than \
        their hard beak when escaping predators.";

    fn document_chunks() -> Vec<Chunk> {
        use crate::segmenter::{HtmlSegmenter, Segmenter};
        let markdown = [BRIDGE, SOURDOUGH, DECK, OCTOPUS].join("\n\n");
        assert!((1150..=1250).contains(&markdown.chars().count()));
        HtmlSegmenter::new().chunk_markdown(&markdown, None, 250, 320)
    }

    #[test]
    fn lexical_selection_over_a_segmented_document() {
        let chunks = document_chunks();
        assert_eq!(chunks.len(), 4);
        assert!(chunks.iter().all(|chunk| chunk.char_len() >= 250));

        let cache = Arc::new(ModelCache::default());
        let strategy = StrategyKind::Lexical.build(Arc::clone(&cache), 0.3);
        let importance = strategy.scores(&chunks, 2).expect("scores").importance;
        let mut by_importance: Vec<usize> = (0..chunks.len()).collect();
        by_importance.sort_by(|&a, &b| importance[b].total_cmp(&importance[a]));

        let selected = ChunkSelector::new(strategy, 1.0)
            .select(&chunks, 2)
            .expect("select");
        assert_eq!(selected.len(), 2);
        assert_ne!(selected[0].id(), selected[1].id());
        assert!(selected.iter().all(|chunk| chunks.contains(chunk)));
        assert_eq!(selected[0], chunks[by_importance[0]]);
        assert_eq!(selected[1], chunks[by_importance[1]]);
    }

    #[test]
    fn every_strategy_keeps_the_selection_contract() {
        let chunks = document_chunks();
        let cache = Arc::new(ModelCache::default());
        for kind in [
            StrategyKind::Lexical,
            StrategyKind::TextRank,
            StrategyKind::EmbeddingCentroid,
        ] {
            let selector = ChunkSelector::new(kind.build(Arc::clone(&cache), 0.3), 0.6);
            for n in 0..=chunks.len() + 1 {
                let selected = selector.select(&chunks, n).expect("select");
                assert_eq!(selected.len(), n.min(chunks.len()), "{kind} with n={n}");
                let mut ids: Vec<&str> = selected.iter().map(Chunk::id).collect();
                ids.sort_unstable();
                ids.dedup();
                assert_eq!(ids.len(), selected.len(), "{kind} repeated a chunk");
                assert!(selected.iter().all(|chunk| chunks.contains(chunk)));
                if n >= chunks.len() {
                    assert_eq!(selected, chunks, "{kind} with n={n}");
                }
            }
        }
    }

    #[tokio::test(flavor = "current_thread")]
    async fn selection_runs_on_pool() {
        let selector = fixed(
            vec![0.3, 0.9, 0.1],
            vec![vec![1.0, 0.0, 0.0], vec![0.0, 1.0, 0.0], vec![0.0, 0.0, 1.0]],
        );
        let pool = ComputePool::new(1).expect("pool");
        let chosen = selector
            .select_on(&pool, Chunk::from_texts(["a", "b", "c"]), 1)
            .await
            .expect("select");
        assert_eq!(chosen[0].id(), "c1");
    }
}
