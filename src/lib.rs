#![warn(missing_docs)]
//! Core library entry points for the fastcheck claim verifier.
//!
//! A claim chunk from one page is searched for on the web, candidate pages are fetched and
//! chunked, and the best Smith-Waterman match per page is explained by an LLM.

pub mod align;
pub mod chunk;
pub mod controls;
pub mod embedder;
pub mod fetch;
pub mod llm;
pub mod model_cache;
pub mod pool;
pub mod retriever;
pub mod search;
pub mod segmenter;
pub mod selector;
pub mod verifier;

pub use align::{align, Alignment, AlignmentDetails, AlignmentScorer, Granularity, ScoringScheme};
pub use chunk::{Chunk, ScoredChunk, SourceSpan};
pub use controls::{
    Cli, ConfigError, LlmControls, SearchControls, SegmentControls, SelectorControls,
    TimeoutControls, VerifierControls,
};
pub use fetch::{FetchedHtml, HttpFetcher, PageFetcher};
pub use llm::{build_client, CompletionClient, LlmProviderKind, PromptSet};
pub use model_cache::ModelCache;
pub use pool::{ComputePool, PoolError};
pub use retriever::{AlignmentRetriever, RetrieveError};
pub use search::{
    ProviderError, ProviderRegistry, SearchEngine, SearchError, SearchFederator, SearchProvider,
    SearchResult,
};
pub use segmenter::{markdown_to_plain, HtmlSegmenter, Segmenter};
pub use selector::{ChunkSelector, SelectError, SelectionStrategy, StrategyKind};
pub use verifier::{
    AlignmentOutcome, BestMatchPolicy, CandidateReport, CandidateState, ClaimReport, Collaborators,
    SkipReason, Verifier, VerifyError,
};
