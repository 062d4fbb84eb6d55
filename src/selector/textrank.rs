//! Graph-centrality importance: PageRank over the TF-IDF similarity graph.

use super::terms::{TfIdfMatrix, TfIdfParams};
use super::{SelectError, SelectionStrategy, StrategyScores};
use crate::chunk::Chunk;
use crate::model_cache::ModelCache;
use std::collections::BTreeMap;
use std::sync::Arc;

/// PageRank settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageRankParams {
    /// Probability of following an edge instead of teleporting.
    pub damping: f64,
    /// Convergence threshold per node (L1 change below `n × tolerance`).
    pub tolerance: f64,
    /// Iteration cap.
    pub max_iterations: usize,
}

impl Default for PageRankParams {
    fn default() -> Self {
        Self {
            damping: 0.85,
            tolerance: 1e-5,
            max_iterations: 50,
        }
    }
}

/// Weighted PageRank over a dense adjacency matrix, ignoring self-loops.
///
/// Nodes without outgoing weight spread their mass uniformly. Returns the last iterate if the
/// cap is hit before convergence.
pub fn pagerank(weights: &[Vec<f64>], params: PageRankParams) -> Vec<f64> {
    let n = weights.len();
    if n == 0 {
        return Vec::new();
    }
    let out_weight: Vec<f64> = (0..n)
        .map(|j| (0..n).filter(|&i| i != j).map(|i| weights[j][i].max(0.0)).sum())
        .collect();
    let uniform = 1.0 / n as f64;
    let mut rank = vec![uniform; n];

    for iteration in 0..params.max_iterations {
        let dangling: f64 = (0..n)
            .filter(|&j| out_weight[j] <= 0.0)
            .map(|j| rank[j])
            .sum();
        let mut next = vec![(1.0 - params.damping) * uniform + params.damping * dangling * uniform; n];
        for (j, rank_j) in rank.iter().enumerate() {
            if out_weight[j] <= 0.0 {
                continue;
            }
            for (i, slot) in next.iter_mut().enumerate() {
                if i != j {
                    *slot += params.damping * rank_j * weights[j][i].max(0.0) / out_weight[j];
                }
            }
        }
        let change: f64 = next.iter().zip(&rank).map(|(a, b)| (a - b).abs()).sum();
        rank = next;
        if change < n as f64 * params.tolerance {
            tracing::trace!(iteration, "pagerank converged");
            return rank;
        }
    }
    tracing::debug!(iterations = params.max_iterations, "pagerank hit iteration cap");
    rank
}

/// Importance is PageRank mass; similarity is TF-IDF cosine.
pub struct TextRankStrategy {
    cache: Arc<ModelCache>,
    params: PageRankParams,
}

impl TextRankStrategy {
    /// Creates the strategy with default PageRank settings.
    pub fn new(cache: Arc<ModelCache>) -> Self {
        Self::with_params(cache, PageRankParams::default())
    }

    /// Creates the strategy with explicit PageRank settings.
    pub fn with_params(cache: Arc<ModelCache>, params: PageRankParams) -> Self {
        Self { cache, params }
    }
}

impl SelectionStrategy for TextRankStrategy {
    fn name(&self) -> &'static str {
        "textrank"
    }

    fn scores(&self, chunks: &[Chunk], _n: usize) -> Result<StrategyScores, SelectError> {
        let texts: Vec<&str> = chunks.iter().map(Chunk::text).collect();
        let similarity = TfIdfMatrix::build(&texts, &self.cache, TfIdfParams::textrank())
            .cosine_matrix();
        let importance = pagerank(&similarity, self.params);
        let features = importance
            .iter()
            .map(|rank| BTreeMap::from([("pagerank".to_string(), *rank)]))
            .collect();
        Ok(StrategyScores {
            importance,
            similarity,
            features,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ranks_sum_to_one() {
        let weights = vec![
            vec![1.0, 0.5, 0.1],
            vec![0.5, 1.0, 0.0],
            vec![0.1, 0.0, 1.0],
        ];
        let ranks = pagerank(&weights, PageRankParams::default());
        assert!((ranks.iter().sum::<f64>() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn hub_node_ranks_highest() {
        let weights = vec![
            vec![0.0, 0.9, 0.9, 0.9],
            vec![0.9, 0.0, 0.0, 0.0],
            vec![0.9, 0.0, 0.0, 0.0],
            vec![0.9, 0.0, 0.0, 0.0],
        ];
        let ranks = pagerank(&weights, PageRankParams::default());
        assert!(ranks[0] > ranks[1]);
        assert!((ranks[1] - ranks[2]).abs() < 1e-9);
    }

    #[test]
    fn disconnected_graph_is_uniform() {
        let weights = vec![vec![0.0; 3]; 3];
        let ranks = pagerank(&weights, PageRankParams::default());
        assert!(ranks.iter().all(|r| (r - 1.0 / 3.0).abs() < 1e-12));
    }

    #[test]
    fn central_chunk_gets_most_mass() {
        let strategy = TextRankStrategy::new(Arc::new(ModelCache::default()));
        let chunks = Chunk::from_texts([
            "harbour bridge railway",
            "harbour bridge toll",
            "harbour bridge railway toll opening",
            "railway opening toll",
        ]);
        let scores = strategy.scores(&chunks, 2).expect("scores");
        let best = scores
            .importance
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(idx, _)| idx);
        assert_eq!(best, Some(2));
    }

    #[test]
    fn empty_graph_has_no_ranks() {
        assert!(pagerank(&[], PageRankParams::default()).is_empty());
    }
}
