//! Process-wide immutable model state.
//!
//! Built once at startup and shared behind an `Arc`. Nothing in here changes after
//! construction, so selector runs can read it from any worker without locking.

use crate::controls::SelectorControls;
use crate::embedder::{Embedder, EmbedderKind, EmbeddingEndpoint, HashingEmbedder, OpenAiEmbedder};
use anyhow::{Context, Result};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

const ENGLISH_STOP_WORDS: &[&str] = &[
    "a", "about", "above", "after", "again", "against", "all", "also", "am", "an", "and", "any",
    "are", "as", "at", "be", "because", "been", "before", "being", "below", "between", "both",
    "but", "by", "can", "could", "did", "do", "does", "doing", "down", "during", "each", "few",
    "for", "from", "further", "had", "has", "have", "having", "he", "her", "here", "hers",
    "herself", "him", "himself", "his", "how", "however", "i", "if", "in", "into", "is", "it",
    "its", "itself", "just", "may", "me", "might", "more", "most", "must", "my", "myself", "no",
    "nor", "not", "now", "of", "off", "on", "once", "only", "or", "other", "our", "ours",
    "ourselves", "out", "over", "own", "same", "she", "should", "so", "some", "such", "than",
    "that", "the", "their", "theirs", "them", "themselves", "then", "there", "these", "they",
    "this", "those", "through", "to", "too", "under", "until", "up", "very", "was", "we", "were",
    "what", "when", "where", "which", "while", "who", "whom", "why", "will", "with", "would",
    "you", "your", "yours", "yourself", "yourselves",
];

const GERMAN_STOP_WORDS: &[&str] = &[
    "aber", "alle", "allem", "allen", "aller", "als", "also", "am", "an", "andere", "anderen",
    "auch", "auf", "aus", "bei", "bin", "bis", "bist", "da", "damit", "dann", "das", "dass",
    "dein", "dem", "den", "denn", "der", "des", "dich", "die", "dies", "diese", "diesem",
    "diesen", "dieser", "dieses", "doch", "dort", "du", "durch", "ein", "eine", "einem",
    "einen", "einer", "eines", "er", "es", "euer", "für", "gegen", "hat", "hatte", "hier",
    "hin", "ich", "ihr", "ihre", "im", "in", "ist", "jede", "jedem", "jeden", "jeder", "kann",
    "kein", "keine", "mich", "mit", "muss", "nach", "nicht", "noch", "nun", "nur", "ob", "oder",
    "ohne", "sehr", "sein", "seine", "sich", "sie", "sind", "so", "soll", "über", "um", "und",
    "uns", "unter", "vom", "von", "vor", "war", "waren", "was", "weil", "wenn", "werden", "wie",
    "wird", "wir", "wo", "zu", "zum", "zur",
];

/// Shared, read-only models used by the selector strategies.
pub struct ModelCache {
    embedder: Arc<dyn Embedder>,
    stop_words: HashSet<String>,
}

impl ModelCache {
    /// Wraps an embedder with the built-in English and German stop-word lexicon.
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        let stop_words = ENGLISH_STOP_WORDS
            .iter()
            .chain(GERMAN_STOP_WORDS)
            .map(|word| word.to_string())
            .collect();
        Self {
            embedder,
            stop_words,
        }
    }

    /// Builds the embedder named by `controls`.
    ///
    /// The remote embedder uses a blocking HTTP client, so call this outside the async runtime.
    pub fn from_controls(controls: &SelectorControls) -> Result<Self> {
        let embedder: Arc<dyn Embedder> = match controls.embedder() {
            EmbedderKind::Hashing => Arc::new(HashingEmbedder::default()),
            EmbedderKind::OpenAi => {
                let endpoint = EmbeddingEndpoint {
                    api_key: controls
                        .embedding_api_key()
                        .context("remote embedder requires an API key")?
                        .to_string(),
                    base_url: controls
                        .embedding_base_url()
                        .unwrap_or(OPENAI_BASE_URL)
                        .to_string(),
                    model: controls.embedding_model().to_string(),
                    dimensions: None,
                };
                Arc::new(OpenAiEmbedder::new(endpoint, Duration::from_secs(30))?)
            }
        };
        tracing::debug!(embedder = embedder.name(), "model cache ready");
        Ok(Self::new(embedder))
    }

    /// Adds extra stop words; only callable while building the cache.
    pub fn with_stop_words<I, S>(mut self, words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.stop_words
            .extend(words.into_iter().map(|word| word.as_ref().to_lowercase()));
        self
    }

    /// Embedding backend.
    pub fn embedder(&self) -> &dyn Embedder {
        self.embedder.as_ref()
    }

    /// True when `word` (already lowercased) is a stop word.
    pub fn is_stop_word(&self, word: &str) -> bool {
        self.stop_words.contains(word)
    }
}

impl Default for ModelCache {
    fn default() -> Self {
        Self::new(Arc::new(HashingEmbedder::default()))
    }
}

impl fmt::Debug for ModelCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelCache")
            .field("embedder", &self.embedder.name())
            .field("stop_words", &self.stop_words.len())
            .finish()
    }
}
