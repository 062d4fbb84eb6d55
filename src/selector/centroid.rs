//! Embedding-centroid strategy: k-means over chunk embeddings, one representative per cluster.

use super::{SelectError, SelectionStrategy, StrategyScores};
use crate::chunk::Chunk;
use crate::embedder::cosine;
use crate::model_cache::ModelCache;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Added to each cluster representative's importance. Any non-representative scores at most
/// 1.0 overall, so representatives win every MMR round while λ > 0.5.
pub const REPRESENTATIVE_BONUS: f64 = 2.0;

/// k-means settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KMeansParams {
    /// Base seed; restart `r` uses `seed + r`.
    pub seed: u64,
    /// Independent k-means++ restarts; the lowest inertia wins.
    pub restarts: usize,
    /// Lloyd iterations per restart.
    pub max_iterations: usize,
}

impl Default for KMeansParams {
    fn default() -> Self {
        Self {
            seed: 42,
            restarts: 10,
            max_iterations: 300,
        }
    }
}

/// Cluster assignment.
#[derive(Debug, Clone, PartialEq)]
pub struct Clustering {
    /// Cluster index per point.
    pub labels: Vec<usize>,
    /// Centroid per cluster.
    pub centroids: Vec<Vec<f64>>,
    /// Sum of squared distances to assigned centroids.
    pub inertia: f64,
}

fn squared_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

fn nearest(point: &[f64], centroids: &[Vec<f64>]) -> (usize, f64) {
    let mut best = (0, f64::INFINITY);
    for (idx, centroid) in centroids.iter().enumerate() {
        let distance = squared_distance(point, centroid);
        if distance < best.1 {
            best = (idx, distance);
        }
    }
    best
}

fn seed_centroids(points: &[Vec<f64>], k: usize, rng: &mut ChaCha8Rng) -> Vec<Vec<f64>> {
    let mut centroids = vec![points[rng.gen_range(0..points.len())].clone()];
    while centroids.len() < k {
        let weights: Vec<f64> = points
            .iter()
            .map(|point| nearest(point, &centroids).1)
            .collect();
        let total: f64 = weights.iter().sum();
        let pick = if total <= 0.0 {
            rng.gen_range(0..points.len())
        } else {
            let mut target = rng.gen::<f64>() * total;
            let mut chosen = points.len() - 1;
            for (idx, weight) in weights.iter().enumerate() {
                if target < *weight {
                    chosen = idx;
                    break;
                }
                target -= weight;
            }
            chosen
        };
        centroids.push(points[pick].clone());
    }
    centroids
}

fn lloyd(points: &[Vec<f64>], mut centroids: Vec<Vec<f64>>, max_iterations: usize) -> Clustering {
    let k = centroids.len();
    let dims = points[0].len();
    let mut labels = vec![usize::MAX; points.len()];

    for _ in 0..max_iterations {
        let mut changed = false;
        for (idx, point) in points.iter().enumerate() {
            let (label, _) = nearest(point, &centroids);
            if labels[idx] != label {
                labels[idx] = label;
                changed = true;
            }
        }
        if !changed {
            break;
        }

        let mut sums = vec![vec![0.0; dims]; k];
        let mut counts = vec![0usize; k];
        for (point, &label) in points.iter().zip(&labels) {
            counts[label] += 1;
            sums[label]
                .iter_mut()
                .zip(point)
                .for_each(|(sum, value)| *sum += value);
        }
        for cluster in 0..k {
            if counts[cluster] == 0 {
                // Re-seed an empty cluster with the point farthest from its centroid.
                let far = points
                    .iter()
                    .enumerate()
                    .map(|(idx, point)| (idx, squared_distance(point, &centroids[labels[idx]])))
                    .max_by(|a, b| a.1.total_cmp(&b.1))
                    .map(|(idx, _)| idx)
                    .unwrap_or(0);
                centroids[cluster] = points[far].clone();
                labels[far] = cluster;
                continue;
            }
            let count = counts[cluster] as f64;
            centroids[cluster] = sums[cluster].iter().map(|sum| sum / count).collect();
        }
    }

    let inertia = points
        .iter()
        .zip(&labels)
        .map(|(point, &label)| squared_distance(point, &centroids[label]))
        .sum();
    Clustering {
        labels,
        centroids,
        inertia,
    }
}

/// Deterministic k-means with k-means++ seeding and several restarts.
///
/// `k` is clamped to `1..=points.len()`. Returns `None` for an empty input.
pub fn kmeans(points: &[Vec<f64>], k: usize, params: KMeansParams) -> Option<Clustering> {
    if points.is_empty() {
        return None;
    }
    let k = k.clamp(1, points.len());
    let mut best: Option<Clustering> = None;
    for restart in 0..params.restarts.max(1) {
        let mut rng = ChaCha8Rng::seed_from_u64(params.seed.wrapping_add(restart as u64));
        let centroids = seed_centroids(points, k, &mut rng);
        let candidate = lloyd(points, centroids, params.max_iterations.max(1));
        if best
            .as_ref()
            .map_or(true, |current| candidate.inertia < current.inertia)
        {
            best = Some(candidate);
        }
    }
    best
}

fn min_max_normalize(values: &[f64]) -> Vec<f64> {
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !(max - min).is_normal() {
        return vec![1.0; values.len()];
    }
    values.iter().map(|v| (v - min) / (max - min)).collect()
}

/// Embeds chunks, clusters them into `n` groups and favors the chunk nearest each centroid.
pub struct CentroidStrategy {
    cache: Arc<ModelCache>,
    centrality_weight: f64,
    params: KMeansParams,
}

impl CentroidStrategy {
    /// Creates the strategy; `centrality_weight` blends in mean pairwise similarity.
    pub fn new(cache: Arc<ModelCache>, centrality_weight: f64) -> Self {
        Self {
            cache,
            centrality_weight: centrality_weight.clamp(0.0, 1.0),
            params: KMeansParams::default(),
        }
    }

    /// Overrides the k-means settings.
    pub fn with_kmeans(mut self, params: KMeansParams) -> Self {
        self.params = params;
        self
    }
}

impl SelectionStrategy for CentroidStrategy {
    fn name(&self) -> &'static str {
        "embedding_centroid"
    }

    fn scores(&self, chunks: &[Chunk], n: usize) -> Result<StrategyScores, SelectError> {
        if chunks.is_empty() {
            return Ok(StrategyScores::default());
        }
        let texts: Vec<&str> = chunks.iter().map(Chunk::text).collect();
        let embeddings = self
            .cache
            .embedder()
            .embed(&texts)
            .map_err(SelectError::Embedding)?;
        if embeddings.len() != chunks.len() {
            return Err(SelectError::Embedding(anyhow::anyhow!(
                "embedder returned {} vectors for {} chunks",
                embeddings.len(),
                chunks.len()
            )));
        }
        let points: Vec<Vec<f64>> = embeddings
            .iter()
            .map(|v| v.iter().map(|x| f64::from(*x)).collect())
            .collect();

        let size = chunks.len();
        let mut similarity = vec![vec![0.0; size]; size];
        for i in 0..size {
            similarity[i][i] = 1.0;
            for j in (i + 1)..size {
                let sim = cosine(&embeddings[i], &embeddings[j]).clamp(0.0, 1.0);
                similarity[i][j] = sim;
                similarity[j][i] = sim;
            }
        }
        let centrality: Vec<f64> = (0..size)
            .map(|i| {
                if size == 1 {
                    return 1.0;
                }
                (0..size).filter(|&j| j != i).map(|j| similarity[i][j]).sum::<f64>()
                    / (size - 1) as f64
            })
            .collect();

        let Some(clustering) = kmeans(&points, n, self.params) else {
            return Ok(StrategyScores::default());
        };

        let mut importance = vec![0.0; size];
        let mut features = vec![BTreeMap::new(); size];
        for cluster in 0..clustering.centroids.len() {
            let members: Vec<usize> = (0..size)
                .filter(|&idx| clustering.labels[idx] == cluster)
                .collect();
            if members.is_empty() {
                continue;
            }
            let proximity: Vec<f64> = members
                .iter()
                .map(|&idx| -squared_distance(&points[idx], &clustering.centroids[cluster]).sqrt())
                .collect();
            let member_centrality: Vec<f64> = members.iter().map(|&idx| centrality[idx]).collect();
            let proximity = min_max_normalize(&proximity);
            let member_centrality = min_max_normalize(&member_centrality);

            let mut representative = (members[0], f64::NEG_INFINITY);
            for (pos, &idx) in members.iter().enumerate() {
                let blended = (1.0 - self.centrality_weight) * proximity[pos]
                    + self.centrality_weight * member_centrality[pos];
                importance[idx] = blended;
                features[idx] = BTreeMap::from([
                    ("centroid_proximity".to_string(), proximity[pos]),
                    ("centrality".to_string(), member_centrality[pos]),
                    ("cluster".to_string(), cluster as f64),
                    ("representative".to_string(), 0.0),
                ]);
                if blended > representative.1 {
                    representative = (idx, blended);
                }
            }
            importance[representative.0] += REPRESENTATIVE_BONUS;
            features[representative.0].insert("representative".to_string(), 1.0);
        }

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

    fn blobs() -> Vec<Vec<f64>> {
        vec![
            vec![0.0, 0.0],
            vec![0.1, 0.0],
            vec![0.0, 0.1],
            vec![5.0, 5.0],
            vec![5.1, 5.0],
            vec![5.0, 5.1],
        ]
    }

    #[test]
    fn kmeans_separates_blobs() {
        let clustering = kmeans(&blobs(), 2, KMeansParams::default()).expect("clusters");
        assert_eq!(clustering.labels[0], clustering.labels[1]);
        assert_eq!(clustering.labels[0], clustering.labels[2]);
        assert_eq!(clustering.labels[3], clustering.labels[4]);
        assert_ne!(clustering.labels[0], clustering.labels[3]);
    }

    #[test]
    fn kmeans_is_deterministic() {
        let first = kmeans(&blobs(), 3, KMeansParams::default());
        let second = kmeans(&blobs(), 3, KMeansParams::default());
        assert_eq!(first, second);
    }

    #[test]
    fn kmeans_clamps_k_and_handles_duplicates() {
        let points = vec![vec![1.0, 1.0]; 3];
        let clustering = kmeans(&points, 10, KMeansParams::default()).expect("clusters");
        assert_eq!(clustering.centroids.len(), 3);
        assert_eq!(clustering.inertia, 0.0);
        assert!(kmeans(&[], 2, KMeansParams::default()).is_none());
    }

    #[test]
    fn one_representative_per_cluster() {
        let strategy = CentroidStrategy::new(Arc::new(ModelCache::default()), 0.3);
        let chunks = Chunk::from_texts([
            "harbour bridge opened to railway traffic",
            "the harbour bridge carries railway traffic",
            "pasta with basil and tomato sauce",
            "tomato sauce pasta recipe with basil",
        ]);
        let scores = strategy.scores(&chunks, 2).expect("scores");
        let representatives = scores
            .features
            .iter()
            .filter(|f| f.get("representative") == Some(&1.0))
            .count();
        assert_eq!(representatives, 2);
        assert!(scores
            .importance
            .iter()
            .filter(|v| **v >= REPRESENTATIVE_BONUS)
            .count()
            == 2);
    }
}
