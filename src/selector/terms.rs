//! Term extraction and sparse TF-IDF weighting shared by the lexical strategies.

use crate::model_cache::ModelCache;
use std::collections::HashMap;

/// Document-frequency filters and n-gram range for one vectorizer run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TfIdfParams {
    /// Minimum number of documents a term must occur in.
    pub min_df: usize,
    /// Maximum share of documents a term may occur in.
    pub max_df: f64,
    /// Longest n-gram to include.
    pub max_ngram: usize,
    /// Shortest word (in chars) kept as a unigram.
    pub min_word_len: usize,
}

impl TfIdfParams {
    /// Settings for the lexical importance strategy.
    pub fn lexical() -> Self {
        Self {
            min_df: 2,
            max_df: 0.95,
            max_ngram: 2,
            min_word_len: 3,
        }
    }

    /// Settings for the graph-centrality strategy.
    pub fn textrank() -> Self {
        Self {
            min_df: 1,
            max_df: 0.9,
            max_ngram: 2,
            min_word_len: 3,
        }
    }
}

/// Lowercases, splits on non-alphanumerics, drops short and stop words, and lemmatizes.
pub fn words(text: &str, cache: &ModelCache, min_word_len: usize) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|raw| raw.chars().count() >= min_word_len)
        .map(str::to_lowercase)
        .filter(|word| !cache.is_stop_word(word))
        .map(|word| lemmatize(&word))
        .collect()
}

/// Light suffix stripping so inflected forms share a term.
pub fn lemmatize(word: &str) -> String {
    let len = word.chars().count();
    if word.chars().any(|c| c.is_ascii_digit()) || !word.is_ascii() {
        return word.to_string();
    }
    if len > 4 && word.ends_with("ies") {
        return format!("{}y", &word[..word.len() - 3]);
    }
    if word.ends_with("sses") {
        return word[..word.len() - 2].to_string();
    }
    if len > 5 && word.ends_with("ing") {
        return word[..word.len() - 3].to_string();
    }
    if len > 4 && word.ends_with("ed") && !word.ends_with("eed") {
        return word[..word.len() - 2].to_string();
    }
    if len > 3 && word.ends_with('s') && !word.ends_with("ss") && !word.ends_with("us") {
        return word[..word.len() - 1].to_string();
    }
    word.to_string()
}

/// Unigrams plus joined n-grams up to `max_ngram`.
pub fn ngrams(words: &[String], max_ngram: usize) -> Vec<String> {
    let mut terms = words.to_vec();
    for size in 2..=max_ngram.max(1) {
        terms.extend(words.windows(size).map(|window| window.join(" ")));
    }
    terms
}

/// Sparse, L2-normalized TF-IDF rows.
#[derive(Debug, Clone)]
pub struct TfIdfMatrix {
    rows: Vec<Vec<(usize, f64)>>,
    vocabulary: usize,
}

impl TfIdfMatrix {
    /// Vectorizes `texts`, relaxing the document-frequency filters if they leave no terms.
    pub fn build(texts: &[&str], cache: &ModelCache, params: TfIdfParams) -> Self {
        let documents: Vec<Vec<String>> = texts
            .iter()
            .map(|text| ngrams(&words(text, cache, params.min_word_len), params.max_ngram))
            .collect();

        let relaxed = [
            params,
            TfIdfParams { min_df: 1, ..params },
            TfIdfParams {
                min_df: 1,
                max_df: 1.0,
                ..params
            },
        ];
        let mut matrix = Self::from_terms(&documents, params);
        for attempt in relaxed.iter().skip(1) {
            if matrix.vocabulary > 0 {
                break;
            }
            tracing::debug!(min_df = attempt.min_df, max_df = attempt.max_df, "relaxing tf-idf filters");
            matrix = Self::from_terms(&documents, *attempt);
        }
        matrix
    }

    fn from_terms(documents: &[Vec<String>], params: TfIdfParams) -> Self {
        let n_docs = documents.len();
        let mut document_frequency: HashMap<&str, usize> = HashMap::new();
        for terms in documents {
            let mut seen: Vec<&str> = terms.iter().map(String::as_str).collect();
            seen.sort_unstable();
            seen.dedup();
            for term in seen {
                *document_frequency.entry(term).or_default() += 1;
            }
        }

        let max_docs = params.max_df * n_docs as f64;
        let mut kept: Vec<&str> = document_frequency
            .iter()
            .filter(|(_, &df)| df >= params.min_df && df as f64 <= max_docs)
            .map(|(term, _)| *term)
            .collect();
        kept.sort_unstable();
        let index: HashMap<&str, usize> = kept
            .iter()
            .enumerate()
            .map(|(idx, term)| (*term, idx))
            .collect();

        let rows = documents
            .iter()
            .map(|terms| {
                let mut counts: HashMap<usize, f64> = HashMap::new();
                for term in terms {
                    if let Some(&idx) = index.get(term.as_str()) {
                        *counts.entry(idx).or_default() += 1.0;
                    }
                }
                let mut row: Vec<(usize, f64)> = counts
                    .into_iter()
                    .map(|(idx, tf)| {
                        let df = document_frequency[kept[idx]] as f64;
                        let idf = ((1.0 + n_docs as f64) / (1.0 + df)).ln() + 1.0;
                        (idx, tf * idf)
                    })
                    .collect();
                row.sort_unstable_by_key(|(idx, _)| *idx);
                let norm = row.iter().map(|(_, w)| w * w).sum::<f64>().sqrt();
                if norm > 0.0 {
                    row.iter_mut().for_each(|(_, w)| *w /= norm);
                }
                row
            })
            .collect();

        Self {
            rows,
            vocabulary: kept.len(),
        }
    }

    /// Number of retained terms.
    pub fn vocabulary(&self) -> usize {
        self.vocabulary
    }

    /// Sum of each document's weights.
    pub fn row_sums(&self) -> Vec<f64> {
        self.rows
            .iter()
            .map(|row| row.iter().map(|(_, w)| w).sum())
            .collect()
    }

    /// Dense pairwise cosine similarity; the diagonal is 1 for non-empty rows.
    pub fn cosine_matrix(&self) -> Vec<Vec<f64>> {
        let n = self.rows.len();
        let mut matrix = vec![vec![0.0; n]; n];
        for i in 0..n {
            if !self.rows[i].is_empty() {
                matrix[i][i] = 1.0;
            }
            for j in (i + 1)..n {
                let sim = sparse_dot(&self.rows[i], &self.rows[j]);
                matrix[i][j] = sim;
                matrix[j][i] = sim;
            }
        }
        matrix
    }
}

fn sparse_dot(a: &[(usize, f64)], b: &[(usize, f64)]) -> f64 {
    let (mut i, mut j, mut dot) = (0, 0, 0.0);
    while i < a.len() && j < b.len() {
        match a[i].0.cmp(&b[j].0) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                dot += a[i].1 * b[j].1;
                i += 1;
                j += 1;
            }
        }
    }
    dot
}
