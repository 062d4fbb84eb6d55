//! Alignment-based retrieval: rank candidate chunks against a query chunk.

use crate::align::AlignmentScorer;
use crate::chunk::Chunk;
use rayon::prelude::*;
use std::collections::HashSet;
use thiserror::Error;

/// Contract violations surfaced by [`AlignmentRetriever`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RetrieveError {
    /// A query index did not point into the chunk list.
    #[error("chunk index {index} out of range for {len} chunks")]
    IndexOutOfRange {
        /// Requested index.
        index: usize,
        /// Number of chunks available.
        len: usize,
    },
}

/// Ranks chunks by Smith-Waterman similarity.
#[derive(Debug, Clone, Copy)]
pub struct AlignmentRetriever {
    scorer: AlignmentScorer,
    overlap_threshold: f64,
}

impl Default for AlignmentRetriever {
    fn default() -> Self {
        Self::new(AlignmentScorer::default())
    }
}

impl AlignmentRetriever {
    /// Wraps a scorer; batch matrix reuse kicks in at 50% query/candidate overlap.
    pub fn new(scorer: AlignmentScorer) -> Self {
        Self {
            scorer,
            overlap_threshold: 0.5,
        }
    }

    /// Share of queries that must also be candidates before [`Self::batch_retrieve`] builds one
    /// shared matrix.
    pub fn with_overlap_threshold(mut self, threshold: f64) -> Self {
        self.overlap_threshold = threshold;
        self
    }

    /// Scorer in use.
    pub fn scorer(&self) -> &AlignmentScorer {
        &self.scorer
    }

    /// Top `k` candidates by similarity to `query`, highest first; ties keep input order.
    pub fn retrieve_top_k(&self, query: &Chunk, candidates: &[Chunk], k: usize) -> Vec<(Chunk, f64)> {
        let scores: Vec<f64> = candidates
            .par_iter()
            .map(|candidate| self.scorer.similarity(query.text(), candidate.text()))
            .collect();
        rank(candidates, &scores, k, None)
    }

    /// [`Self::retrieve_top_k`] for many queries.
    ///
    /// When most queries also appear among the candidates, one symmetric matrix over the union
    /// is computed and reused. Both paths produce identical rankings.
    pub fn batch_retrieve(
        &self,
        queries: &[Chunk],
        candidates: &[Chunk],
        k: usize,
    ) -> Vec<Vec<(Chunk, f64)>> {
        if queries.is_empty() {
            return Vec::new();
        }
        let candidate_texts: HashSet<&str> = candidates.iter().map(Chunk::text).collect();
        let overlapping = queries
            .iter()
            .filter(|query| candidate_texts.contains(query.text()))
            .count();
        let overlap = overlapping as f64 / queries.len() as f64;
        if overlap < self.overlap_threshold {
            tracing::debug!(overlap, "batch retrieval scoring per query");
            return queries
                .iter()
                .map(|query| self.retrieve_top_k(query, candidates, k))
                .collect();
        }

        tracing::debug!(overlap, "batch retrieval using shared similarity matrix");
        let mut union: Vec<&str> = candidates.iter().map(Chunk::text).collect();
        let mut seen: HashSet<&str> = union.iter().copied().collect();
        for query in queries {
            if seen.insert(query.text()) {
                union.push(query.text());
            }
        }
        let matrix = self.text_matrix(&union);
        let position = |text: &str| union.iter().position(|t| *t == text);

        queries
            .iter()
            .map(|query| match position(query.text()) {
                Some(row) => rank(candidates, &matrix[row][..candidates.len()], k, None),
                None => self.retrieve_top_k(query, candidates, k),
            })
            .collect()
    }

    /// Symmetric pairwise similarity. The diagonal is each text's self-alignment: 1.0, or 0.0 for
    /// text that normalizes to nothing.
    pub fn similarity_matrix(&self, chunks: &[Chunk]) -> Vec<Vec<f64>> {
        let texts: Vec<&str> = chunks.iter().map(Chunk::text).collect();
        self.text_matrix(&texts)
    }

    fn text_matrix(&self, texts: &[&str]) -> Vec<Vec<f64>> {
        let n = texts.len();
        // Diagonal plus upper triangle, rows in parallel; alignment similarity is symmetric.
        let upper: Vec<Vec<f64>> = (0..n)
            .into_par_iter()
            .map(|i| {
                (i..n)
                    .map(|j| self.scorer.similarity(texts[i], texts[j]))
                    .collect()
            })
            .collect();
        let mut matrix = vec![vec![0.0; n]; n];
        for (i, row) in upper.iter().enumerate() {
            for (offset, sim) in row.iter().enumerate() {
                let j = i + offset;
                matrix[i][j] = *sim;
                matrix[j][i] = *sim;
            }
        }
        matrix
    }

    /// Uses `chunks[index]` as the query against all chunks.
    pub fn retrieve_by_index(
        &self,
        chunks: &[Chunk],
        index: usize,
        k: usize,
        exclude_query: bool,
    ) -> Result<Vec<(Chunk, f64)>, RetrieveError> {
        let query = chunks.get(index).ok_or(RetrieveError::IndexOutOfRange {
            index,
            len: chunks.len(),
        })?;
        let scores: Vec<f64> = chunks
            .par_iter()
            .map(|candidate| self.scorer.similarity(query.text(), candidate.text()))
            .collect();
        let skip = exclude_query.then_some(index);
        Ok(rank(chunks, &scores, k, skip))
    }

    /// Greedy clusters of mutually similar chunks.
    ///
    /// Each unassigned chunk, in input order, seeds a cluster with every later unassigned chunk
    /// whose similarity to it reaches `threshold`. Clusters smaller than `min_cluster_size` are
    /// dropped. Returns indices into `chunks`.
    pub fn find_clusters(
        &self,
        chunks: &[Chunk],
        threshold: f64,
        min_cluster_size: usize,
    ) -> Vec<Vec<usize>> {
        let matrix = self.similarity_matrix(chunks);
        let mut assigned = vec![false; chunks.len()];
        let mut clusters = Vec::new();
        for seed in 0..chunks.len() {
            if assigned[seed] {
                continue;
            }
            let mut cluster = vec![seed];
            for other in (seed + 1)..chunks.len() {
                if !assigned[other] && matrix[seed][other] >= threshold {
                    cluster.push(other);
                }
            }
            if cluster.len() >= min_cluster_size.max(1) {
                for &idx in &cluster {
                    assigned[idx] = true;
                }
                clusters.push(cluster);
            }
        }
        clusters
    }
}

fn rank(candidates: &[Chunk], scores: &[f64], k: usize, skip: Option<usize>) -> Vec<(Chunk, f64)> {
    let mut order: Vec<usize> = (0..candidates.len())
        .filter(|idx| Some(*idx) != skip)
        .collect();
    // Stable, so equal scores keep candidate order.
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));
    order
        .into_iter()
        .take(k)
        .map(|idx| (candidates[idx].clone(), scores[idx]))
        .collect()
}
