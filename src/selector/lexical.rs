//! TF-IDF importance with cosine redundancy.

use super::terms::{TfIdfMatrix, TfIdfParams};
use super::{SelectError, SelectionStrategy, StrategyScores};
use crate::chunk::Chunk;
use crate::model_cache::ModelCache;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Importance is the chunk's summed TF-IDF weight over 1-2-grams.
pub struct LexicalStrategy {
    cache: Arc<ModelCache>,
    params: TfIdfParams,
}

impl LexicalStrategy {
    /// Creates the strategy with the default lexical filters.
    pub fn new(cache: Arc<ModelCache>) -> Self {
        Self {
            cache,
            params: TfIdfParams::lexical(),
        }
    }
}

impl SelectionStrategy for LexicalStrategy {
    fn name(&self) -> &'static str {
        "lexical"
    }

    fn scores(&self, chunks: &[Chunk], _n: usize) -> Result<StrategyScores, SelectError> {
        let texts: Vec<&str> = chunks.iter().map(Chunk::text).collect();
        let matrix = TfIdfMatrix::build(&texts, &self.cache, self.params);
        let importance = matrix.row_sums();
        let features = importance
            .iter()
            .map(|sum| BTreeMap::from([("tfidf_sum".to_string(), *sum)]))
            .collect();
        Ok(StrategyScores {
            importance,
            similarity: matrix.cosine_matrix(),
            features,
        })
    }
}
