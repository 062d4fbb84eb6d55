//! Smith-Waterman local alignment between two passages.
//!
//! Alignment rewards exact local wording overlap, which is what matters when checking that two
//! texts state the same literal claim. The score is normalized by the best achievable score of
//! the shorter sequence so pairs of different sizes stay comparable.
//!
//! Cost is `O(|A|·|B|)` in time and memory; callers keep inputs short by chunking first.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Gap marker used in rendered alignments.
pub const GAP: &str = "-";

/// Unit of comparison.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    /// Unicode scalar values.
    #[default]
    Chars,
    /// Whitespace-separated words.
    Words,
}

/// Match, mismatch and gap weights.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringScheme {
    /// Added for equal symbols.
    pub match_score: i32,
    /// Added for differing symbols.
    pub mismatch_score: i32,
    /// Added for an insertion or deletion.
    pub gap_score: i32,
}

impl Default for ScoringScheme {
    fn default() -> Self {
        Self {
            match_score: 3,
            mismatch_score: -2,
            gap_score: -1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trace {
    Stop,
    Diagonal,
    Up,
    Left,
}

// Scratch DP state; lives only for one `local_align` call.
struct AlignmentMatrix {
    cols: usize,
    scores: Vec<i32>,
    trace: Vec<Trace>,
}

impl AlignmentMatrix {
    fn new(rows: usize, cols: usize) -> Self {
        Self {
            cols,
            scores: vec![0; rows * cols],
            trace: vec![Trace::Stop; rows * cols],
        }
    }

    fn score(&self, i: usize, j: usize) -> i32 {
        self.scores[i * self.cols + j]
    }

    fn trace(&self, i: usize, j: usize) -> Trace {
        self.trace[i * self.cols + j]
    }

    fn set(&mut self, i: usize, j: usize, score: i32, trace: Trace) {
        let idx = i * self.cols + j;
        self.scores[idx] = score;
        self.trace[idx] = trace;
    }
}

/// Index pairs of an optimal local alignment; `None` marks a gap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalAlignment {
    /// Best cell value.
    pub raw_score: i32,
    /// Aligned positions, first to last.
    pub pairs: Vec<(Option<usize>, Option<usize>)>,
}

/// Runs Smith-Waterman over two symbol slices.
///
/// Equal candidates resolve diagonal first, then up, then left, so substitutions surface as a
/// single mismatch column instead of a gap pair. The best cell only moves on a strictly greater
/// score, so the first maximum in row-major order wins.
pub fn local_align<T: PartialEq>(a: &[T], b: &[T], scheme: &ScoringScheme) -> LocalAlignment {
    let rows = a.len() + 1;
    let cols = b.len() + 1;
    let mut matrix = AlignmentMatrix::new(rows, cols);
    let mut best = (0i32, 0usize, 0usize);

    for i in 1..rows {
        for j in 1..cols {
            let substitution = if a[i - 1] == b[j - 1] {
                scheme.match_score
            } else {
                scheme.mismatch_score
            };
            let diagonal = matrix.score(i - 1, j - 1) + substitution;
            let up = matrix.score(i - 1, j) + scheme.gap_score;
            let left = matrix.score(i, j - 1) + scheme.gap_score;
            let value = 0.max(diagonal).max(up).max(left);
            let trace = if value == 0 {
                Trace::Stop
            } else if value == diagonal {
                Trace::Diagonal
            } else if value == up {
                Trace::Up
            } else {
                Trace::Left
            };
            matrix.set(i, j, value, trace);
            if value > best.0 {
                best = (value, i, j);
            }
        }
    }

    let (raw_score, mut i, mut j) = best;
    let mut pairs = Vec::new();
    if raw_score == 0 {
        return LocalAlignment { raw_score, pairs };
    }
    loop {
        match matrix.trace(i, j) {
            Trace::Stop => break,
            Trace::Diagonal => {
                pairs.push((Some(i - 1), Some(j - 1)));
                i -= 1;
                j -= 1;
            }
            Trace::Up => {
                pairs.push((Some(i - 1), None));
                i -= 1;
            }
            Trace::Left => {
                pairs.push((None, Some(j - 1)));
                j -= 1;
            }
        }
    }
    pairs.reverse();
    LocalAlignment { raw_score, pairs }
}

/// Classification of one alignment column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnKind {
    /// Equal symbols.
    Match,
    /// Differing symbols.
    Mismatch,
    /// Symbol only in the first sequence.
    GapInB,
    /// Symbol only in the second sequence.
    GapInA,
}

/// One column of a rendered alignment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AlignedColumn {
    /// Symbol from the first sequence, `None` for a gap.
    pub a: Option<String>,
    /// Symbol from the second sequence, `None` for a gap.
    pub b: Option<String>,
}

impl AlignedColumn {
    /// Kind of this column.
    pub fn kind(&self) -> ColumnKind {
        match (&self.a, &self.b) {
            (Some(a), Some(b)) if a == b => ColumnKind::Match,
            (Some(_), Some(_)) => ColumnKind::Mismatch,
            (Some(_), None) => ColumnKind::GapInB,
            _ => ColumnKind::GapInA,
        }
    }
}

/// Result of aligning two passages.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alignment {
    /// `raw_score / (match_score × min(|A|,|B|))`, within `[0, 1]`.
    pub score: f64,
    /// Best local cell value.
    pub raw_score: i32,
    /// First passage as aligned, gaps rendered as `-`.
    pub aligned_a: String,
    /// Second passage as aligned.
    pub aligned_b: String,
    /// Column-by-column view.
    pub columns: Vec<AlignedColumn>,
}

impl Alignment {
    fn empty() -> Self {
        Self {
            score: 0.0,
            raw_score: 0,
            aligned_a: String::new(),
            aligned_b: String::new(),
            columns: Vec::new(),
        }
    }

    /// Columns where both sides hold different symbols.
    pub fn mismatches(&self) -> impl Iterator<Item = &AlignedColumn> {
        self.columns
            .iter()
            .filter(|column| column.kind() == ColumnKind::Mismatch)
    }

    /// Counts columns by kind.
    pub fn details(&self) -> AlignmentDetails {
        let mut details = AlignmentDetails {
            score: self.score,
            raw_score: self.raw_score,
            matches: 0,
            mismatches: 0,
            gaps: 0,
            aligned_a: self.aligned_a.clone(),
            aligned_b: self.aligned_b.clone(),
        };
        for column in &self.columns {
            match column.kind() {
                ColumnKind::Match => details.matches += 1,
                ColumnKind::Mismatch => details.mismatches += 1,
                ColumnKind::GapInA | ColumnKind::GapInB => details.gaps += 1,
            }
        }
        details
    }
}

/// Column counts for reporting.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlignmentDetails {
    /// Normalized score.
    pub score: f64,
    /// Raw local score.
    pub raw_score: i32,
    /// Matching columns.
    pub matches: usize,
    /// Substitution columns.
    pub mismatches: usize,
    /// Gap columns on either side.
    pub gaps: usize,
    /// First passage as aligned.
    pub aligned_a: String,
    /// Second passage as aligned.
    pub aligned_b: String,
}

/// Aligns two strings without any preprocessing.
pub fn align(a: &str, b: &str, scheme: &ScoringScheme, granularity: Granularity) -> Alignment {
    let a = split(a, granularity, false);
    let b = split(b, granularity, false);
    align_symbols(&a, &b, scheme, granularity)
}

fn align_symbols(
    a: &[String],
    b: &[String],
    scheme: &ScoringScheme,
    granularity: Granularity,
) -> Alignment {
    let shorter = a.len().min(b.len());
    let denominator = i64::from(scheme.match_score) * shorter as i64;
    if denominator <= 0 {
        return Alignment::empty();
    }
    let local = local_align(a, b, scheme);
    if local.raw_score == 0 {
        return Alignment::empty();
    }

    let columns: Vec<AlignedColumn> = local
        .pairs
        .iter()
        .map(|&(i, j)| AlignedColumn {
            a: i.map(|idx| a[idx].clone()),
            b: j.map(|idx| b[idx].clone()),
        })
        .collect();
    let separator = match granularity {
        Granularity::Chars => "",
        Granularity::Words => " ",
    };
    let aligned_a = join_symbols(columns.iter().map(|c| c.a.as_deref()), separator);
    let aligned_b = join_symbols(columns.iter().map(|c| c.b.as_deref()), separator);
    let score = (f64::from(local.raw_score) / denominator as f64).clamp(0.0, 1.0);

    Alignment {
        score,
        raw_score: local.raw_score,
        aligned_a,
        aligned_b,
        columns,
    }
}

fn join_symbols<'a>(symbols: impl Iterator<Item = Option<&'a str>>, separator: &str) -> String {
    symbols
        .map(|symbol| symbol.unwrap_or(GAP))
        .collect::<Vec<_>>()
        .join(separator)
}

/// Splits text into symbols, optionally normalizing it first.
///
/// Normalization lowercases and collapses whitespace. At char level it drops punctuation; at
/// word level it trims punctuation off token edges, so `2.1` survives while `Paris,` becomes
/// `paris`.
pub fn split(text: &str, granularity: Granularity, normalize: bool) -> Vec<String> {
    match (granularity, normalize) {
        (Granularity::Chars, false) => text.chars().map(String::from).collect(),
        (Granularity::Words, false) => text.split_whitespace().map(str::to_string).collect(),
        (Granularity::Chars, true) => {
            let mut symbols = Vec::with_capacity(text.len());
            let mut last_space = true;
            for ch in text.chars() {
                if ch.is_whitespace() {
                    if !last_space {
                        symbols.push(" ".to_string());
                    }
                    last_space = true;
                } else if ch.is_alphanumeric() {
                    symbols.extend(ch.to_lowercase().map(String::from));
                    last_space = false;
                }
            }
            if symbols.last().is_some_and(|s| s == " ") {
                symbols.pop();
            }
            symbols
        }
        (Granularity::Words, true) => text
            .split_whitespace()
            .map(|token| token.trim_matches(|c: char| !c.is_alphanumeric()))
            .filter(|token| !token.is_empty())
            .map(str::to_lowercase)
            .collect(),
    }
}

/// Configured aligner used by the retriever and verifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlignmentScorer {
    scheme: ScoringScheme,
    granularity: Granularity,
    normalize: bool,
}

impl Default for AlignmentScorer {
    fn default() -> Self {
        Self::new(ScoringScheme::default(), Granularity::default())
    }
}

impl AlignmentScorer {
    /// Creates a scorer; text normalization is on.
    pub fn new(scheme: ScoringScheme, granularity: Granularity) -> Self {
        Self {
            scheme,
            granularity,
            normalize: true,
        }
    }

    /// Turns text normalization on or off.
    pub fn with_normalization(mut self, normalize: bool) -> Self {
        self.normalize = normalize;
        self
    }

    /// Weights in use.
    pub fn scheme(&self) -> &ScoringScheme {
        &self.scheme
    }

    /// Symbol granularity in use.
    pub fn granularity(&self) -> Granularity {
        self.granularity
    }

    /// Aligns two passages.
    pub fn align(&self, a: &str, b: &str) -> Alignment {
        let a = split(a, self.granularity, self.normalize);
        let b = split(b, self.granularity, self.normalize);
        align_symbols(&a, &b, &self.scheme, self.granularity)
    }

    /// Normalized similarity only.
    pub fn similarity(&self, a: &str, b: &str) -> f64 {
        self.align(a, b).score
    }

    /// Column counts for a pair.
    pub fn details(&self, a: &str, b: &str) -> AlignmentDetails {
        self.align(a, b).details()
    }
}

impl fmt::Display for Alignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "score {:.3} (raw {})", self.score, self.raw_score)?;
        writeln!(f, "{}", self.aligned_a)?;
        write!(f, "{}", self.aligned_b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words() -> AlignmentScorer {
        AlignmentScorer::new(ScoringScheme::default(), Granularity::Words)
    }

    #[test]
    fn identical_sequences_score_one() {
        let alignment = align(
            "the quick brown fox",
            "the quick brown fox",
            &ScoringScheme::default(),
            Granularity::Chars,
        );
        assert_eq!(alignment.score, 1.0);
        assert_eq!(alignment.aligned_a, "the quick brown fox");
        assert_eq!(alignment.aligned_a, alignment.aligned_b);
    }

    #[test]
    fn disjoint_symbols_score_zero_with_empty_alignment() {
        let alignment = align("abc", "xyz", &ScoringScheme::default(), Granularity::Chars);
        assert_eq!(alignment.score, 0.0);
        assert!(alignment.aligned_a.is_empty());
        assert!(alignment.aligned_b.is_empty());
        assert!(alignment.columns.is_empty());
    }

    #[test]
    fn empty_input_scores_zero() {
        let alignment = align("", "abc", &ScoringScheme::default(), Granularity::Chars);
        assert_eq!(alignment.score, 0.0);
        assert_eq!(alignment.raw_score, 0);
    }

    #[test]
    fn local_alignment_ignores_flanks() {
        let alignment = align("xxabcxx", "yyabcyy", &ScoringScheme::default(), Granularity::Chars);
        assert_eq!(alignment.raw_score, 9);
        assert_eq!(alignment.aligned_a, "abc");
        assert_eq!(alignment.aligned_b, "abc");
        assert!((alignment.score - 9.0 / 21.0).abs() < 1e-9);
    }

    #[test]
    fn token_alignment_localizes_numeric_mismatch() {
        let alignment = words().align(
            "Paris is the capital of France with population 2.1 million",
            "Paris, capital of France, population 2.2 million",
        );
        assert!(alignment.score > 0.5, "score was {}", alignment.score);
        let mismatches: Vec<_> = alignment.mismatches().collect();
        assert_eq!(mismatches.len(), 1);
        assert_eq!(mismatches[0].a.as_deref(), Some("2.1"));
        assert_eq!(mismatches[0].b.as_deref(), Some("2.2"));
        assert_eq!(
            alignment.aligned_b,
            "paris - - capital of france - population 2.2 million"
        );
    }

    #[test]
    fn details_count_columns() {
        let details = words().details(
            "Paris is the capital of France with population 2.1 million",
            "Paris, capital of France, population 2.2 million",
        );
        assert_eq!(details.matches, 6);
        assert_eq!(details.mismatches, 1);
        assert_eq!(details.gaps, 3);
        assert_eq!(details.raw_score, 13);
    }

    #[test]
    fn gaps_render_with_marker() {
        let alignment = align("abcd", "abxcd", &ScoringScheme::default(), Granularity::Chars);
        assert_eq!(alignment.aligned_a, "ab-cd");
        assert_eq!(alignment.aligned_b, "abxcd");
    }

    #[test]
    fn char_normalization_drops_punctuation_and_case() {
        assert_eq!(
            split("  Hi,  There! ", Granularity::Chars, true).concat(),
            "hi there"
        );
        assert_eq!(
            split("Rome, 2.5 km.", Granularity::Words, true),
            vec!["rome", "2.5", "km"]
        );
    }

    #[test]
    fn non_positive_match_score_yields_zero() {
        let scheme = ScoringScheme {
            match_score: 0,
            ..ScoringScheme::default()
        };
        assert_eq!(align("aaa", "aaa", &scheme, Granularity::Chars).score, 0.0);
    }
}
