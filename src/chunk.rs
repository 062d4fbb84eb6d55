//! Chunk records shared by the selector, retriever and verifier.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Where a chunk came from inside its source document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSpan {
    /// Source URL when the document was fetched.
    pub url: Option<String>,
    /// Byte offset of the chunk start within the extracted text.
    pub start: usize,
    /// Exclusive byte offset of the chunk end.
    pub end: usize,
}

/// Bounded span of extracted document text; the unit of comparison.
///
/// Fields are private so a chunk cannot change after it has been handed out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    id: String,
    text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    importance_hint: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    source_span: Option<SourceSpan>,
}

impl Chunk {
    /// Creates a chunk with the given document-local id.
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            importance_hint: None,
            source_span: None,
        }
    }

    /// Attaches a caller-provided importance hint.
    pub fn with_importance_hint(mut self, hint: f64) -> Self {
        self.importance_hint = Some(hint);
        self
    }

    /// Attaches the chunk's location in its source document.
    pub fn with_source_span(mut self, span: SourceSpan) -> Self {
        self.source_span = Some(span);
        self
    }

    /// Builds chunks with ordinal ids (`c0`, `c1`, ...) from plain texts.
    pub fn from_texts<I, S>(texts: I) -> Vec<Chunk>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        texts
            .into_iter()
            .enumerate()
            .map(|(idx, text)| Chunk::new(format!("c{idx}"), text))
            .collect()
    }

    /// Document-local identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Chunk text.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Length in characters.
    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }

    /// Optional importance hint.
    pub fn importance_hint(&self) -> Option<f64> {
        self.importance_hint
    }

    /// Optional source location.
    pub fn source_span(&self) -> Option<&SourceSpan> {
        self.source_span.as_ref()
    }
}

/// Selector output: a chunk with the score that got it picked.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredChunk {
    /// The selected chunk.
    pub chunk: Chunk,
    /// Strategy-specific relevance (the MMR objective at selection time).
    pub relevance: f64,
    /// Named inputs behind `relevance`, e.g. `tfidf_sum` or `pagerank`.
    pub contributing_features: BTreeMap<String, f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_texts_assigns_ordinal_ids() {
        let chunks = Chunk::from_texts(["alpha", "beta"]);
        assert_eq!(chunks[0].id(), "c0");
        assert_eq!(chunks[1].id(), "c1");
        assert_eq!(chunks[1].text(), "beta");
    }

    #[test]
    fn serializes_without_empty_optionals() {
        let json = serde_json::to_value(Chunk::new("c3", "text")).expect("serialize");
        assert_eq!(json, serde_json::json!({"id": "c3", "text": "text"}));
    }
}
