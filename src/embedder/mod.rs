//! Text embedding backends for the centroid selection strategy.

mod openai;

pub use openai::{EmbeddingEndpoint, OpenAiEmbedder};

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Embedding backends selectable from configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum EmbedderKind {
    /// [`HashingEmbedder`], offline.
    #[default]
    Hashing,
    /// [`OpenAiEmbedder`] against an OpenAI-compatible endpoint.
    OpenAi,
}

/// Maps texts to dense vectors. Implementations must be safe to share across threads.
pub trait Embedder: Send + Sync {
    /// Embeds every input, preserving order.
    fn embed(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>>;

    /// Short backend name for logs.
    fn name(&self) -> &str;
}

/// Deterministic feature-hashing embedder; needs no model files or network.
///
/// Words are hashed with FNV-1a into `dimensions` buckets, weighted by sublinear term
/// frequency with a signed bucket to soften collisions, and L2-normalized.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimensions: usize,
}

impl HashingEmbedder {
    /// Creates an embedder producing `dimensions`-wide vectors (at least 1).
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    /// Output width.
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn fnv1a(term: &str) -> u64 {
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in term.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        hash
    }

    fn vector(&self, text: &str) -> Vec<f32> {
        let mut counts: std::collections::HashMap<String, f32> = std::collections::HashMap::new();
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|token| token.chars().count() >= 2)
        {
            *counts.entry(token.to_lowercase()).or_default() += 1.0;
        }

        let mut vector = vec![0.0f32; self.dimensions];
        for (term, count) in counts {
            let hash = Self::fnv1a(&term);
            let bucket = (hash % self.dimensions as u64) as usize;
            let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign * (1.0 + count.ln());
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            vector.iter_mut().for_each(|v| *v /= norm);
        }
        vector
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(384)
    }
}

impl Embedder for HashingEmbedder {
    fn embed(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>> {
        Ok(inputs.iter().map(|text| self.vector(text)).collect())
    }

    fn name(&self) -> &str {
        "hashing"
    }
}

/// Cosine similarity; zero when either vector is all zeros.
pub fn cosine(a: &[f32], b: &[f32]) -> f64 {
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a <= f64::EPSILON || norm_b <= f64::EPSILON {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}
